//!
//! Transaction submission and confirmation.
//!
//! `TransactionEngine` resolves a contract method through the registry, submits a call,
//! send or locally signed send through a `LedgerClient`, and for writes polls the node until
//! a receipt shows up or the receipt policy gives up. It also deploys contracts into the
//! registry and reads their past events.

use crate::chain::{CallSettings, ChainError, LedgerClient, MethodCall, Receipt, TxHash};
use crate::retry::{RetryError, RetryPolicy};
use crate::transaction::events::{ContractEvent, EventQuery};
use crate::transaction::registry::{ContractConfig, ContractRegistry};
use crate::transaction::types::*;
use crate::transaction::{DEFAULT_GAS_CEILING, DEFAULT_SIGNED_GAS_PRICE};

use std::sync::Arc;
use tracing::{debug, info, warn};

enum PollError {
	/// Not mined yet.
	Pending,
	Query(ChainError),
}

/// Submits contract calls and waits for their receipts.
///
/// The engine holds no state between submissions. Retrying a failed `submit` may send the
/// transaction twice; callers that cannot tolerate that must deduplicate themselves.
pub struct TransactionEngine<L: LedgerClient> {
	client: Arc<L>,
	registry: Arc<ContractRegistry>,
	signer: Option<Arc<dyn TransactionSigner>>,
	receipt_policy: RetryPolicy,
	gas_ceiling: u64,
	default_gas_price: u128,
}

impl<L: LedgerClient> TransactionEngine<L> {
	pub fn new(client: Arc<L>, registry: Arc<ContractRegistry>) -> Self {
		Self {
			client,
			registry,
			signer: None,
			receipt_policy: RetryPolicy::receipt_polling(),
			gas_ceiling: DEFAULT_GAS_CEILING,
			default_gas_price: DEFAULT_SIGNED_GAS_PRICE,
		}
	}

	/// Sets the signer used for `SignedSend`
	pub fn with_signer(mut self, signer: Arc<dyn TransactionSigner>) -> Self {
		self.signer = Some(signer);
		self
	}

	/// Sets the policy for receipt polling
	pub fn with_receipt_policy(mut self, policy: RetryPolicy) -> Self {
		self.receipt_policy = policy;
		self
	}

	/// Sets the gas limit for calls and sends
	pub fn with_gas_ceiling(mut self, gas: u64) -> Self {
		self.gas_ceiling = gas;
		self
	}

	/// Sets the gas price for signed sends that do not specify one
	pub fn with_default_gas_price(mut self, gas_price: u128) -> Self {
		self.default_gas_price = gas_price;
		self
	}

	pub fn registry(&self) -> &ContractRegistry {
		&self.registry
	}

	/// Submits the request and returns its terminal outcome.
	pub async fn submit(
		&self,
		request: TransactionRequest,
	) -> Result<TransactionOutcome, TransactionError> {
		let method = self.registry.resolve(
			&request.contract_name,
			request.contract_address.as_deref(),
			&request.method_name,
		)?;
		let call = method.encode(&request.args)?;
		debug!(
			"{:?} {}.{} at {} from {}",
			request.kind, call.contract, call.method, method.contract.address, request.account
		);

		match request.kind {
			TransactionKind::Call => {
				// Callers may raise or lower the ceiling for reads.
				let settings = CallSettings::default()
					.with_gas(self.gas_ceiling)
					.overridden_by(&request.settings);
				let data = self
					.client
					.call(&request.account, &call, &settings)
					.await
					.map_err(TransactionError::Call)?;
				Ok(TransactionOutcome::Value(method.decode(&data)?))
			}
			TransactionKind::Send => {
				let settings = request.settings.clone().with_gas(self.gas_ceiling);
				let hash = self
					.client
					.send_transaction(&request.account, &call, &settings)
					.await
					.map_err(TransactionError::Submission)?;
				info!("Sent {}.{} as {}", call.contract, call.method, hash);
				Ok(TransactionOutcome::Receipt(self.await_receipt(hash).await?))
			}
			TransactionKind::SignedSend => {
				let signer = self.signer.as_ref().ok_or(TransactionError::MissingSigner)?;
				let estimate_settings = CallSettings {
					value: request.settings.value,
					..Default::default()
				};
				let estimated_gas = self
					.client
					.estimate_gas(&request.account, &call, &estimate_settings)
					.await
					.map_err(TransactionError::Estimation)?;

				let transaction = UnsignedTransaction {
					from: request.account.clone(),
					to: method.contract.address.clone(),
					data: call.data.clone(),
					gas: request.settings.gas.unwrap_or(estimated_gas),
					gas_price: request.settings.gas_price.unwrap_or(self.default_gas_price),
					value: request.settings.value,
					nonce: request.settings.nonce,
				};
				let raw = signer.sign(&transaction).await?;
				let hash = self
					.client
					.send_raw_transaction(&raw)
					.await
					.map_err(TransactionError::Submission)?;
				info!(
					"Sent signed {}.{} as {} (gas {})",
					call.contract, call.method, hash, transaction.gas
				);
				Ok(TransactionOutcome::Receipt(self.await_receipt(hash).await?))
			}
		}
	}

	/// Deploys a contract and registers it under its name at the created address.
	///
	/// The gas estimate is padded by 10% unless the settings fix the gas.
	pub async fn deploy(
		&self,
		request: DeployRequest,
	) -> Result<DeployedContract, TransactionError> {
		let data = request
			.interface
			.codec
			.encode_deploy(&request.bytecode, &request.args)?;
		let call = MethodCall {
			contract: request.name.clone(),
			method: "constructor".to_string(),
			to: None,
			data,
		};

		let estimate_settings = CallSettings {
			value: request.settings.value,
			..Default::default()
		};
		let estimated_gas = self
			.client
			.estimate_gas(&request.account, &call, &estimate_settings)
			.await
			.map_err(TransactionError::Estimation)?;
		let settings = CallSettings::default()
			.with_gas(padded_gas(estimated_gas))
			.overridden_by(&request.settings);

		let hash = self
			.client
			.send_transaction(&request.account, &call, &settings)
			.await
			.map_err(TransactionError::Submission)?;
		info!("Sent deployment of {} as {}", request.name, hash);

		let receipt = self.await_receipt(hash).await?;
		let Some(address) = receipt.contract_address.clone() else {
			return Err(TransactionError::MissingContractAddress(
				receipt.transaction_hash,
			));
		};
		let contract = self.registry.register_contract(ContractConfig {
			name: request.name,
			interface: request.interface,
			address: Some(address),
			deployments: Vec::new(),
		})?;
		info!("Deployed {} at {}", contract.name, contract.address);
		Ok(DeployedContract { contract, receipt })
	}

	/// Reads past logs of a registered contract. Logs dropped by a reorganisation are
	/// skipped.
	pub async fn past_events(
		&self,
		contract_name: &str,
		address: Option<&str>,
		query: &EventQuery,
	) -> Result<Vec<ContractEvent>, TransactionError> {
		let contract = self.registry.contract(contract_name, address)?;
		let filter = query.filter_for(&contract)?;
		let logs = self
			.client
			.get_logs(&filter)
			.await
			.map_err(TransactionError::Events)?;
		debug!("{} logs for {} at {}", logs.len(), contract.name, contract.address);

		logs.into_iter()
			.filter(|log| {
				if log.removed {
					warn!("Skipping removed log in tx {:?}", log.transaction_hash);
				}
				!log.removed
			})
			.map(|log| ContractEvent::from_log(&contract.interface, log))
			.collect::<Result<Vec<_>, _>>()
			.map_err(TransactionError::Events)
	}

	/// Polls for the receipt of `hash` under the receipt policy.
	///
	/// An empty answer is retried; a failed query ends polling immediately.
	pub async fn await_receipt(&self, hash: TxHash) -> Result<Receipt, TransactionError> {
		let client = self.client.as_ref();
		let tx_hash = &hash;
		let receipt = self
			.receipt_policy
			.retry(|| async move {
				match client.transaction_receipt(tx_hash).await {
					Ok(Some(receipt)) => Ok(receipt),
					Ok(None) => Err(backoff::Error::transient(PollError::Pending)),
					Err(e) => Err(backoff::Error::permanent(PollError::Query(e))),
				}
			})
			.await;

		match receipt {
			Ok(receipt) => {
				info!(
					"Transaction {} mined in block {}",
					receipt.transaction_hash, receipt.block_number
				);
				Ok(receipt)
			}
			Err(RetryError::Permanent(PollError::Query(source))) => {
				Err(TransactionError::ReceiptPoll { hash, source })
			}
			Err(e) => Err(TransactionError::ReceiptTimeout {
				hash,
				attempts: e.attempts(),
			}),
		}
	}
}

fn padded_gas(estimate: u64) -> u64 {
	estimate.saturating_mul(11) / 10
}
