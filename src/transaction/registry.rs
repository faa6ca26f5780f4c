//! Contract registry: interfaces by name, handles by (name, address).

use crate::chain::MethodCall;
use crate::transaction::codec::{CallCodec, CodecError, JsonCallCodec};

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// The callable surface of a contract and how to encode calls to it.
#[derive(Clone)]
pub struct ContractInterface {
	pub methods: BTreeSet<String>,
	/// Event name to its `topics[0]` hash, lower-cased.
	pub events: BTreeMap<String, String>,
	pub codec: Arc<dyn CallCodec>,
}

impl ContractInterface {
	/// An interface using [`JsonCallCodec`].
	pub fn new<I, S>(methods: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			methods: methods.into_iter().map(Into::into).collect(),
			events: BTreeMap::new(),
			codec: Arc::new(JsonCallCodec),
		}
	}

	pub fn with_event(mut self, name: impl Into<String>, topic: impl AsRef<str>) -> Self {
		self.events
			.insert(name.into(), topic.as_ref().to_ascii_lowercase());
		self
	}

	pub fn with_codec(mut self, codec: Arc<dyn CallCodec>) -> Self {
		self.codec = codec;
		self
	}

	pub fn has_method(&self, method: &str) -> bool {
		self.methods.contains(method)
	}

	pub fn event_topic(&self, event: &str) -> Option<&str> {
		self.events.get(event).map(String::as_str)
	}

	/// Reverse lookup of an event by its topic hash.
	pub fn event_name(&self, topic: &str) -> Option<&str> {
		self.events
			.iter()
			.find(|(_, t)| t.eq_ignore_ascii_case(topic))
			.map(|(name, _)| name.as_str())
	}
}

impl fmt::Debug for ContractInterface {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ContractInterface")
			.field("methods", &self.methods)
			.field("events", &self.events)
			.field("codec", &self.codec)
			.finish()
	}
}

/// Where a contract was deployed on one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
	pub network_id: u64,
	pub address: String,
}

/// A deployed contract as described by its build artifact.
#[derive(Debug, Clone)]
pub struct ContractConfig {
	pub name: String,
	pub interface: ContractInterface,
	/// Explicit address. Takes precedence over `deployments`.
	pub address: Option<String>,
	/// Deployments in the order they happened; the last one is the default address.
	pub deployments: Vec<Deployment>,
}

/// A contract bound to an address.
#[derive(Debug, Clone)]
pub struct ContractHandle {
	pub name: String,
	pub address: String,
	pub interface: ContractInterface,
}

/// A resolved method, ready to encode calls and decode results.
#[derive(Debug, Clone)]
pub struct MethodHandle {
	pub contract: Arc<ContractHandle>,
	pub method: String,
}

impl MethodHandle {
	pub fn encode(&self, args: &[Value]) -> Result<MethodCall, CodecError> {
		let data = self.contract.interface.codec.encode_call(&self.method, args)?;
		Ok(MethodCall {
			contract: self.contract.name.clone(),
			method: self.method.clone(),
			to: Some(self.contract.address.clone()),
			data,
		})
	}

	pub fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
		self.contract.interface.codec.decode_result(&self.method, data)
	}
}

/// Error types for contract resolution
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("Contract {0} is not registered")]
	NotRegistered(String),

	#[error("Contract {contract} has no method {method}")]
	UnknownMethod { contract: String, method: String },

	#[error("Contract {0} has no address and no deployments")]
	MissingAddress(String),

	#[error("Contract {contract} has no event {event}")]
	UnknownEvent { contract: String, event: String },
}

/// Caches contract interfaces and address-bound handles.
#[derive(Default)]
pub struct ContractRegistry {
	interfaces: RwLock<HashMap<String, ContractInterface>>,
	default_addresses: RwLock<HashMap<String, String>>,
	handles: RwLock<HashMap<(String, String), Arc<ContractHandle>>>,
}

impl ContractRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a deployed contract at its explicit address, or at its most recent
	/// deployment when no address is given.
	pub fn register_contract(
		&self,
		config: ContractConfig,
	) -> Result<Arc<ContractHandle>, RegistryError> {
		let address = config
			.address
			.or_else(|| config.deployments.last().map(|d| d.address.clone()))
			.ok_or_else(|| RegistryError::MissingAddress(config.name.clone()))?
			.to_ascii_lowercase();

		let handle = Arc::new(ContractHandle {
			name: config.name.clone(),
			address: address.clone(),
			interface: config.interface.clone(),
		});

		self.interfaces
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(config.name.clone(), config.interface);
		self.default_addresses
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(config.name.clone(), address.clone());
		self.handles
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert((config.name.clone(), address.clone()), handle.clone());

		debug!("Registered contract {} at {}", config.name, address);
		Ok(handle)
	}

	/// Registers an interface without an address. Resolving it needs an explicit address.
	pub fn register_interface(&self, name: impl Into<String>, interface: ContractInterface) {
		let name = name.into();
		debug!("Registered interface {}", name);
		self.interfaces
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(name, interface);
	}

	/// Handle for `name` at `address`, or at its registered default address.
	pub fn contract(
		&self,
		name: &str,
		address: Option<&str>,
	) -> Result<Arc<ContractHandle>, RegistryError> {
		let address = match address {
			Some(address) => address.to_ascii_lowercase(),
			None => self
				.default_addresses
				.read()
				.unwrap_or_else(PoisonError::into_inner)
				.get(name)
				.cloned()
				.ok_or_else(|| {
					if self.is_registered(name) {
						RegistryError::MissingAddress(name.to_string())
					} else {
						RegistryError::NotRegistered(name.to_string())
					}
				})?,
		};

		let key = (name.to_string(), address);
		if let Some(handle) = self
			.handles
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&key)
		{
			return Ok(handle.clone());
		}

		let interface = self
			.interfaces
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(name)
			.cloned()
			.ok_or_else(|| RegistryError::NotRegistered(name.to_string()))?;
		let handle = Arc::new(ContractHandle {
			name: key.0.clone(),
			address: key.1.clone(),
			interface,
		});
		let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
		Ok(handles.entry(key).or_insert(handle).clone())
	}

	/// Resolves a callable method.
	pub fn resolve(
		&self,
		name: &str,
		address: Option<&str>,
		method: &str,
	) -> Result<MethodHandle, RegistryError> {
		let contract = self.contract(name, address)?;
		if !contract.interface.has_method(method) {
			return Err(RegistryError::UnknownMethod {
				contract: name.to_string(),
				method: method.to_string(),
			});
		}
		Ok(MethodHandle {
			contract,
			method: method.to_string(),
		})
	}

	pub fn is_registered(&self, name: &str) -> bool {
		self.interfaces
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.contains_key(name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn asset_interface() -> ContractInterface {
		ContractInterface::new(["confidentialTransfer", "balanceOf"])
			.with_event("Transfer", "0xDDF2")
	}

	fn asset_config(address: Option<&str>) -> ContractConfig {
		ContractConfig {
			name: "ZkAsset".to_string(),
			interface: asset_interface(),
			address: address.map(str::to_string),
			deployments: vec![
				Deployment {
					network_id: 1,
					address: "0x0000000000000000000000000000000000000001".to_string(),
				},
				Deployment {
					network_id: 1337,
					address: "0x00000000000000000000000000000000000000AA".to_string(),
				},
			],
		}
	}

	#[test]
	fn test_register_contract_uses_latest_deployment() {
		let registry = ContractRegistry::new();
		let handle = registry.register_contract(asset_config(None)).unwrap();
		assert_eq!(handle.address, "0x00000000000000000000000000000000000000aa");

		let method = registry.resolve("ZkAsset", None, "balanceOf").unwrap();
		assert_eq!(method.contract.address, handle.address);
		assert!(Arc::ptr_eq(&method.contract, &handle));
	}

	#[test]
	fn test_register_contract_prefers_explicit_address() {
		let registry = ContractRegistry::new();
		let handle = registry
			.register_contract(asset_config(Some("0xBEEF")))
			.unwrap();
		assert_eq!(handle.address, "0xbeef");
	}

	#[test]
	fn test_register_contract_without_address_fails() {
		let registry = ContractRegistry::new();
		let mut config = asset_config(None);
		config.deployments.clear();
		assert!(matches!(
			registry.register_contract(config),
			Err(RegistryError::MissingAddress(_))
		));
		assert!(!registry.is_registered("ZkAsset"));
	}

	#[test]
	fn test_interface_needs_explicit_address() {
		let registry = ContractRegistry::new();
		registry.register_interface("NoteRegistry", ContractInterface::new(["validateProof"]));

		assert!(matches!(
			registry.resolve("NoteRegistry", None, "validateProof"),
			Err(RegistryError::MissingAddress(_))
		));

		let first = registry
			.resolve("NoteRegistry", Some("0xCC"), "validateProof")
			.unwrap();
		let second = registry
			.resolve("NoteRegistry", Some("0xcc"), "validateProof")
			.unwrap();
		assert!(Arc::ptr_eq(&first.contract, &second.contract));
	}

	#[test]
	fn test_resolve_errors() {
		let registry = ContractRegistry::new();
		registry.register_contract(asset_config(None)).unwrap();

		assert!(matches!(
			registry.resolve("Missing", None, "balanceOf"),
			Err(RegistryError::NotRegistered(_))
		));
		assert!(matches!(
			registry.resolve("ZkAsset", None, "mint"),
			Err(RegistryError::UnknownMethod { .. })
		));
	}

	#[test]
	fn test_method_handle_encodes_call() {
		let registry = ContractRegistry::new();
		registry.register_contract(asset_config(None)).unwrap();

		let method = registry.resolve("ZkAsset", None, "balanceOf").unwrap();
		let call = method.encode(&[json!("0x01")]).unwrap();
		assert_eq!(call.contract, "ZkAsset");
		assert_eq!(call.method, "balanceOf");
		assert_eq!(
			call.to.as_deref(),
			Some("0x00000000000000000000000000000000000000aa")
		);
		assert_eq!(method.decode(&call.data).unwrap()["args"][0], "0x01");
	}

	#[test]
	fn test_interface_event_topics() {
		let interface = asset_interface();
		assert_eq!(interface.event_topic("Transfer"), Some("0xddf2"));
		assert_eq!(interface.event_name("0xDDF2"), Some("Transfer"));
		assert_eq!(interface.event_name("0x01"), None);
	}
}
