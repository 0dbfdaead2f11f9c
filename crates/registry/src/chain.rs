use std::sync::OnceLock;
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::{reqwest, Http};
use alloy::transports::TransportError;
use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// Failure reported by a chain backend.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("{0}")]
    Rpc(String),

    /// The node rejected the call with revert data.
    #[error("execution reverted")]
    Revert(Bytes),
}

/// One log of a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
}

/// The parts of a receipt the client reconciles against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub success: bool,
    pub logs: Vec<LogEntry>,
}

/// Minimal EVM access the registry client needs.
#[async_trait]
pub trait ChainBackend: Send + Sync {
    /// EVM chain id of the connected node.
    async fn chain_id(&self) -> Result<u64, ChainError>;

    /// Account that signs sends, if a key is loaded.
    fn sender(&self) -> Option<Address>;

    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Gas estimate for the call, unpadded.
    async fn estimate_gas(&self, to: Address, data: Bytes) -> Result<u64, ChainError>;

    /// Current EIP-1559 max fee per gas, in wei.
    async fn max_fee_per_gas(&self) -> Result<u128, ChainError>;

    /// Signs, broadcasts, and waits for the receipt.
    async fn send(&self, to: Address, data: Bytes, gas_limit: u64) -> Result<TxReceipt, ChainError>;
}

/// JSON-RPC backend over alloy.
///
/// Construction does no I/O; the chain id is fetched on first use.
pub struct AlloyBackend {
    provider: DynProvider,
    sender: Option<Address>,
    chain_id: OnceLock<u64>,
    receipt_timeout: Duration,
}

impl std::fmt::Debug for AlloyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlloyBackend")
            .field("sender", &self.sender)
            .field("chain_id", &self.chain_id.get())
            .field("receipt_timeout", &self.receipt_timeout)
            .finish()
    }
}

impl AlloyBackend {
    /// Backend for `rpc_url`. Without a signer it is read-only. Each request
    /// is bounded by `rpc_timeout`; waiting for a receipt by `receipt_timeout`.
    pub fn new(
        rpc_url: &str,
        signer: Option<PrivateKeySigner>,
        rpc_timeout: Duration,
        receipt_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| ChainError::Rpc(format!("invalid RPC URL {rpc_url}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| ChainError::Rpc(format!("failed to build RPC client: {e}")))?;
        let client = RpcClient::new(Http::with_client(http, url), false);

        let sender = signer.as_ref().map(|s| s.address());
        let provider = match signer {
            Some(signer) => ProviderBuilder::new()
                .wallet(EthereumWallet::from(signer))
                .connect_client(client)
                .erased(),
            None => ProviderBuilder::new().connect_client(client).erased(),
        };
        Ok(Self {
            provider,
            sender,
            chain_id: OnceLock::new(),
            receipt_timeout,
        })
    }

    fn request(&self, to: Address, data: Bytes) -> TransactionRequest {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        match self.sender {
            Some(from) => tx.with_from(from),
            None => tx,
        }
    }
}

fn rpc_error(e: TransportError) -> ChainError {
    if let Some(data) = e.as_error_resp().and_then(|r| r.as_revert_data()) {
        return ChainError::Revert(data);
    }
    ChainError::Rpc(e.to_string())
}

#[async_trait]
impl ChainBackend for AlloyBackend {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        if let Some(id) = self.chain_id.get() {
            return Ok(*id);
        }
        let id = self.provider.get_chain_id().await.map_err(rpc_error)?;
        debug!(chain_id = id, sender = ?self.sender, "connected to chain");
        Ok(*self.chain_id.get_or_init(|| id))
    }

    fn sender(&self) -> Option<Address> {
        self.sender
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        self.provider
            .call(self.request(to, data))
            .await
            .map_err(rpc_error)
    }

    /// Gas estimate for the call, unpadded.
    async fn estimate_gas(&self, to: Address, data: Bytes) -> Result<u64, ChainError> {
        self.provider
            .estimate_gas(self.request(to, data))
            .await
            .map_err(rpc_error)
    }

    async fn max_fee_per_gas(&self) -> Result<u128, ChainError> {
        let fees = self.provider.estimate_eip1559_fees().await.map_err(rpc_error)?;
        Ok(fees.max_fee_per_gas)
    }

    async fn send(&self, to: Address, data: Bytes, gas_limit: u64) -> Result<TxReceipt, ChainError> {
        if self.sender.is_none() {
            return Err(ChainError::Rpc("no signer configured".into()));
        }
        let tx = self.request(to, data).with_gas_limit(gas_limit);
        let pending = self.provider.send_transaction(tx).await.map_err(rpc_error)?;
        debug!(tx_hash = %pending.tx_hash(), "transaction broadcast");
        let receipt = pending
            .with_timeout(Some(self.receipt_timeout))
            .get_receipt()
            .await
            .map_err(|e| {
                ChainError::Rpc(format!(
                    "waiting for receipt (limit {}s): {e}",
                    self.receipt_timeout.as_secs()
                ))
            })?;

        let logs = receipt
            .inner
            .logs()
            .iter()
            .map(|log| LogEntry {
                address: log.inner.address,
                topics: log.inner.data.topics().to_vec(),
                data: log.inner.data.data.clone(),
            })
            .collect();
        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            logs,
        })
    }
}

/// Parses `ETH_PRIVATE_KEY` into a signer. The key never appears in errors.
pub fn signer_from_key(key: &wfctl_core::secret::Secret<String>) -> Result<PrivateKeySigner, crate::TxError> {
    let normalized = wfctl_core::validation::normalize_private_key(key.expose())
        .map_err(|e| crate::TxError::InvalidKey(e.to_string()))?;
    normalized
        .parse::<PrivateKeySigner>()
        .map_err(|_| crate::TxError::InvalidKey("not a valid secp256k1 secret".into()))
}
