//! Binding the merged ABI to the Diamond proxy.
//!
//! A [`DiamondContract`] is either read-only, bound to the plain provider of a
//! [`WorkingProvider`], or signer-bound, with a local wallet layered on the
//! same transport. Functions are looked up by name in the merged ABI at call
//! time, so any facet function is reachable without generated bindings.

use alloy_contract::{ContractInstance, Interface};
use alloy_dyn_abi::{DynSolValue, Specifier};
use alloy_json_abi::{Function, JsonAbi};
use alloy_network::{EthereumWallet, ReceiptResponse};
use alloy_primitives::{Address, TxHash};
use alloy_provider::{DynProvider, PendingTransactionError, Provider, ProviderBuilder};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::chain::{EvmPrivateKey, WorkingProvider};
use crate::values::outputs_to_json;

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("Function {0} is not part of the Diamond ABI")]
    UnknownFunction(String),
    #[error("No overload of {function} accepts {arity} argument(s) of the given types")]
    NoMatchingOverload { function: String, arity: usize },
    #[error("Invalid argument for {param}: {source}")]
    Coerce {
        param: String,
        #[source]
        source: alloy_dyn_abi::Error,
    },
    #[error("Contract is read-only; a signer is required to send {0}")]
    ReadOnly(String),
    #[error("Invalid signer key: {0}")]
    Signer(String),
    #[error(transparent)]
    Call(#[from] alloy_contract::Error),
    #[error(transparent)]
    Pending(#[from] PendingTransactionError),
    #[error("Transaction {0} reverted")]
    Reverted(TxHash),
}

/// Decoded return values of a call, together with the ABI entry that produced them.
#[derive(Debug, Clone)]
pub struct CallOutput {
    pub function: Function,
    pub values: Vec<DynSolValue>,
}

impl CallOutput {
    pub fn to_json(&self) -> Value {
        outputs_to_json(&self.function.outputs, &self.values)
    }
}

#[derive(Clone)]
pub struct DiamondContract {
    instance: ContractInstance<DynProvider>,
    signer: Option<Address>,
    endpoint: Url,
    receipt_timeout: Duration,
}

impl std::fmt::Debug for DiamondContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiamondContract")
            .field("address", self.instance.address())
            .field("signer", &self.signer)
            .field("endpoint", &self.endpoint.as_str())
            .finish()
    }
}

impl DiamondContract {
    /// Binds `abi` at `address` for `eth_call` only.
    pub fn read_only(address: Address, abi: JsonAbi, provider: &WorkingProvider) -> Self {
        let erased = provider.provider().clone().erased();
        Self {
            instance: ContractInstance::new(address, erased, Interface::new(abi)),
            signer: None,
            endpoint: provider.endpoint().clone(),
            receipt_timeout: Duration::from_secs(30),
        }
    }

    /// Binds `abi` at `address` with `key` signing every transaction.
    ///
    /// The signer reuses the transport of `provider`, so writes go to the same
    /// endpoint that passed the liveness probe.
    pub fn signer_bound(
        address: Address,
        abi: JsonAbi,
        provider: &WorkingProvider,
        key: &EvmPrivateKey,
    ) -> Result<Self, ContractError> {
        let signer = PrivateKeySigner::from_bytes(key.as_b256())
            .map_err(|e| ContractError::Signer(e.to_string()))?
            .with_chain_id(Some(provider.chain().inner()));
        let signer_address = signer.address();
        let wallet = EthereumWallet::from(signer);
        let erased = ProviderBuilder::new()
            .wallet(wallet)
            .connect_client(provider.client().clone())
            .erased();
        tracing::info!(chain = %provider.chain(), signer = %signer_address, "Using signer-bound Diamond");
        Ok(Self {
            instance: ContractInstance::new(address, erased, Interface::new(abi)),
            signer: Some(signer_address),
            endpoint: provider.endpoint().clone(),
            receipt_timeout: Duration::from_secs(30),
        })
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn address(&self) -> Address {
        *self.instance.address()
    }

    pub fn abi(&self) -> &JsonAbi {
        self.instance.abi()
    }

    pub fn signer(&self) -> Option<Address> {
        self.signer
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Picks the overload of `name` whose inputs accept `args`.
    fn select(&self, name: &str, args: &[DynSolValue]) -> Result<&Function, ContractError> {
        let overloads = self
            .abi()
            .function(name)
            .ok_or_else(|| ContractError::UnknownFunction(name.to_string()))?;
        overloads
            .iter()
            .find(|function| {
                function.inputs.len() == args.len()
                    && function.inputs.iter().zip(args).all(|(param, arg)| {
                        param.resolve().map(|ty| ty.matches(arg)).unwrap_or(false)
                    })
            })
            .ok_or_else(|| ContractError::NoMatchingOverload {
                function: name.to_string(),
                arity: args.len(),
            })
    }

    /// Coerces textual arguments against the first overload of `name` with a
    /// matching arity.
    pub fn coerce_args(&self, name: &str, args: &[&str]) -> Result<Vec<DynSolValue>, ContractError> {
        let overloads = self
            .abi()
            .function(name)
            .ok_or_else(|| ContractError::UnknownFunction(name.to_string()))?;
        let function = overloads
            .iter()
            .find(|function| function.inputs.len() == args.len())
            .ok_or_else(|| ContractError::NoMatchingOverload {
                function: name.to_string(),
                arity: args.len(),
            })?;
        function
            .inputs
            .iter()
            .zip(args)
            .map(|(param, arg)| {
                let label = if param.name.is_empty() {
                    param.ty.clone()
                } else {
                    param.name.clone()
                };
                param
                    .resolve()
                    .and_then(|ty| ty.coerce_str(arg))
                    .map_err(|source| ContractError::Coerce { param: label, source })
            })
            .collect()
    }

    /// Executes `name` with `eth_call` and decodes its outputs.
    pub async fn call(&self, name: &str, args: &[DynSolValue]) -> Result<CallOutput, ContractError> {
        let function = self.select(name, args)?.clone();
        let values = self
            .instance
            .function_from_selector(&function.selector(), args)?
            .call()
            .await?;
        Ok(CallOutput { function, values })
    }

    pub async fn call_str(&self, name: &str, args: &[&str]) -> Result<CallOutput, ContractError> {
        let args = self.coerce_args(name, args)?;
        self.call(name, &args).await
    }

    /// Submits `name` as a transaction and waits for a successful receipt.
    pub async fn send(&self, name: &str, args: &[DynSolValue]) -> Result<TxHash, ContractError> {
        if self.signer.is_none() {
            return Err(ContractError::ReadOnly(name.to_string()));
        }
        let function = self.select(name, args)?;
        let pending = self
            .instance
            .function_from_selector(&function.selector(), args)?
            .send()
            .await?;
        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await?;
        confirmed(name, &receipt)
    }

    pub async fn send_str(&self, name: &str, args: &[&str]) -> Result<TxHash, ContractError> {
        let args = self.coerce_args(name, args)?;
        self.send(name, &args).await
    }
}

/// The transaction hash of a successful receipt, or [`ContractError::Reverted`].
fn confirmed(name: &str, receipt: &impl ReceiptResponse) -> Result<TxHash, ContractError> {
    let tx_hash = receipt.transaction_hash();
    if !receipt.status() {
        tracing::warn!(function = name, tx = %tx_hash, "Diamond transaction reverted");
        return Err(ContractError::Reverted(tx_hash));
    }
    tracing::info!(function = name, tx = %tx_hash, "Diamond transaction confirmed");
    Ok(tx_hash)
}
