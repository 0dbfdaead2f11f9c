use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::utils::format_ether;
use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolInterface};
use tracing::{debug, info, warn};

use wfctl_core::model::{OwnerAddress, RegisterWorkflowParams, TxStrategy, WorkflowId, WorkflowMetadata};
use wfctl_core::now_unix;

use crate::abi::{self, IWorkflowRegistryErrors, WorkflowMetadataView};
use crate::chain::{ChainBackend, ChainError};
use crate::error::TxError;
use crate::paging;

const GAS_BUFFER_PERCENT: u64 = 20;

/// Outcome of a registry write, one variant per strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutput {
    /// Mined with a successful receipt.
    Regular { tx_hash: B256 },
    /// Calldata built for external signing; nothing was sent.
    Raw { to: Address, calldata: Bytes },
    /// Signed by a hardware wallet.
    HwWallet { tx_hash: B256 },
}

impl TxOutput {
    /// Hash of the broadcast transaction, if one was sent.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            Self::Regular { tx_hash } | Self::HwWallet { tx_hash } => Some(*tx_hash),
            Self::Raw { .. } => None,
        }
    }
}

/// Interactive yes/no confirmation.
pub trait Confirm: Send + Sync {
    fn confirm(&self, prompt: &str) -> std::io::Result<bool>;
}

/// Registry key of an (owner, name) pair.
pub fn hash_key(owner: &OwnerAddress, name: &str) -> B256 {
    let mut buf = Vec::with_capacity(20 + name.len());
    buf.extend_from_slice(owner.as_bytes());
    buf.extend_from_slice(name.as_bytes());
    keccak256(buf)
}

/// Workflow registry client.
///
/// Writes go through [`RegistryClient::transact`], the only place that
/// branches on [`TxStrategy`].
pub struct RegistryClient {
    backend: Arc<dyn ChainBackend>,
    contract: Address,
    strategy: TxStrategy,
    chain_name: String,
    skip_confirmation: bool,
    confirmer: Option<Arc<dyn Confirm>>,
    verified: AtomicBool,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("contract", &self.contract)
            .field("strategy", &self.strategy)
            .field("chain_name", &self.chain_name)
            .finish()
    }
}

impl RegistryClient {
    pub fn new(backend: Arc<dyn ChainBackend>, contract: Address, strategy: TxStrategy) -> Self {
        Self {
            backend,
            contract,
            strategy,
            chain_name: String::new(),
            skip_confirmation: true,
            confirmer: None,
            verified: AtomicBool::new(false),
        }
    }

    pub fn with_chain_name(mut self, name: impl Into<String>) -> Self {
        self.chain_name = name.into();
        self
    }

    /// Same chain and contract, different strategy.
    pub fn with_strategy(&self, strategy: TxStrategy) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            contract: self.contract,
            strategy,
            chain_name: self.chain_name.clone(),
            skip_confirmation: self.skip_confirmation,
            confirmer: self.confirmer.clone(),
            verified: AtomicBool::new(self.verified.load(Ordering::Relaxed)),
        }
    }

    /// Requires confirmation of every broadcast unless `skip` is set.
    pub fn with_confirm(mut self, confirmer: Arc<dyn Confirm>, skip: bool) -> Self {
        self.confirmer = Some(confirmer);
        self.skip_confirmation = skip;
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub fn strategy(&self) -> &TxStrategy {
        &self.strategy
    }

    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    pub async fn chain_id(&self) -> Result<u64, TxError> {
        self.backend
            .chain_id()
            .await
            .map_err(|e| chain_error("eth_chainId", e))
    }

    /// Signing account, if a key is loaded.
    pub fn sender(&self) -> Option<Address> {
        self.backend.sender()
    }

    // ---- strategy dispatch ----

    async fn transact<C: SolCall>(
        &self,
        call: C,
        function: &str,
        expected_events: &str,
    ) -> Result<TxOutput, TxError> {
        if let TxStrategy::HwWallet { .. } = self.strategy {
            return Err(TxError::HardwareWalletUnsupported);
        }
        self.ensure_supported().await?;

        let data = Bytes::from(call.abi_encode());
        match &self.strategy {
            TxStrategy::RawCalldata => {
                debug!(function, len = data.len(), "calldata built, not sending");
                Ok(TxOutput::Raw {
                    to: self.contract,
                    calldata: data,
                })
            }
            TxStrategy::SignSend => self.sign_and_send(data, function, expected_events).await,
            TxStrategy::HwWallet { .. } => Err(TxError::HardwareWalletUnsupported),
        }
    }

    async fn sign_and_send(
        &self,
        data: Bytes,
        function: &str,
        expected_events: &str,
    ) -> Result<TxOutput, TxError> {
        if self.backend.sender().is_none() {
            return Err(TxError::ReadOnly);
        }

        let estimate = self
            .backend
            .estimate_gas(self.contract, data.clone())
            .await
            .map_err(|e| chain_error(function, e))?;
        let gas_limit = estimate + estimate * GAS_BUFFER_PERCENT / 100;
        let max_fee = self
            .backend
            .max_fee_per_gas()
            .await
            .map_err(|e| chain_error(function, e))?;

        let chain_id = self.chain_id().await?;
        self.preview(chain_id, function, &data, gas_limit, max_fee);
        if !self.skip_confirmation {
            if let Some(confirmer) = &self.confirmer {
                let ok = confirmer
                    .confirm("Do you want to execute this transaction?")
                    .map_err(TxError::Prompt)?;
                if !ok {
                    return Err(TxError::Declined);
                }
            }
        }

        let receipt = self
            .backend
            .send(self.contract, data, gas_limit)
            .await
            .map_err(|e| chain_error(function, e))?;
        let tx_hash = receipt.tx_hash;
        info!(function, tx_hash = %tx_hash, "transaction mined");

        if !receipt.success {
            return Err(TxError::ReceiptFailed { tx_hash });
        }

        let wanted: Vec<B256> = expected_events
            .split('|')
            .filter_map(abi::event_signature)
            .collect();
        let found = receipt.logs.iter().any(|log| {
            log.address == self.contract
                && log.topics.first().is_some_and(|t| wanted.contains(t))
        });
        if !found {
            warn!(function, tx_hash = %tx_hash, expected = expected_events, "expected event not emitted");
            return Err(TxError::EventMissing {
                tx_hash,
                expected: expected_events.to_string(),
            });
        }
        Ok(TxOutput::Regular { tx_hash })
    }

    fn preview(&self, chain_id: u64, function: &str, data: &Bytes, gas_limit: u64, max_fee: u128) {
        let cost = U256::from(gas_limit) * U256::from(max_fee);
        println!("Transaction details:");
        println!("  Chain:          {} ({chain_id})", self.chain_name);
        println!("  To:             {}", self.contract);
        println!("  Function:       {function}");
        println!("  Data:           {data}");
        println!(
            "  Estimated cost: {gas_limit} gas x {max_fee} wei = {} ETH",
            format_ether(cost)
        );
    }

    async fn read<C: SolCall>(&self, call: C, function: &str) -> Result<C::Return, TxError> {
        let out = self
            .backend
            .call(self.contract, Bytes::from(call.abi_encode()))
            .await
            .map_err(|e| chain_error(function, e))?;
        C::abi_decode_returns(&out).map_err(|e| TxError::Decode {
            function: function.to_string(),
            reason: e.to_string(),
        })
    }

    // ---- registry identity ----

    pub async fn type_and_version(&self) -> Result<String, TxError> {
        self.read(abi::typeAndVersionCall {}, "typeAndVersion").await
    }

    /// Rejects registries that are not a supported `WorkflowRegistry 2.x`.
    pub async fn ensure_supported(&self) -> Result<(), TxError> {
        if self.verified.load(Ordering::Relaxed) {
            return Ok(());
        }
        let type_and_version = self.type_and_version().await?;
        if !type_and_version.starts_with(abi::SUPPORTED_TYPE_AND_VERSION) {
            return Err(TxError::UnsupportedRegistry {
                address: self.contract.to_string(),
                type_and_version,
            });
        }
        debug!(%type_and_version, "registry version accepted");
        self.verified.store(true, Ordering::Relaxed);
        Ok(())
    }

    // ---- ownership linking ----

    pub async fn link_owner(
        &self,
        valid_until: u64,
        proof: &[u8],
        signature: &[u8],
    ) -> Result<TxOutput, TxError> {
        let call = abi::linkOwnerCall {
            validityTimestamp: U256::from(valid_until),
            proof: proof32(proof)?,
            signature: Bytes::copy_from_slice(signature),
        };
        self.transact(call, "LinkOwner", "OwnershipLinkUpdated").await
    }

    pub async fn unlink_owner(
        &self,
        owner: &OwnerAddress,
        valid_until: u64,
        signature: &[u8],
        action: u8,
    ) -> Result<TxOutput, TxError> {
        let call = abi::unlinkOwnerCall {
            owner: address(owner),
            validityTimestamp: U256::from(valid_until),
            signature: Bytes::copy_from_slice(signature),
            action,
        };
        self.transact(call, "UnlinkOwner", "OwnershipLinkUpdated").await
    }

    /// Dry-runs `linkOwner`; a revert comes back decoded.
    pub async fn can_link_owner(
        &self,
        owner: &OwnerAddress,
        valid_until: u64,
        proof: &[u8],
        signature: &[u8],
    ) -> Result<(), TxError> {
        let call = abi::canLinkOwnerCall {
            owner: address(owner),
            validityTimestamp: U256::from(valid_until),
            proof: proof32(proof)?,
            signature: Bytes::copy_from_slice(signature),
        };
        self.read(call, "CanLinkOwner").await.map(|_| ())
    }

    pub async fn can_unlink_owner(
        &self,
        owner: &OwnerAddress,
        valid_until: u64,
        signature: &[u8],
        action: u8,
    ) -> Result<(), TxError> {
        let call = abi::canUnlinkOwnerCall {
            owner: address(owner),
            validityTimestamp: U256::from(valid_until),
            signature: Bytes::copy_from_slice(signature),
            action,
        };
        self.read(call, "CanUnlinkOwner").await.map(|_| ())
    }

    pub async fn is_owner_linked(&self, owner: &OwnerAddress) -> Result<bool, TxError> {
        self.read(abi::isOwnerLinkedCall { owner: address(owner) }, "IsOwnerLinked")
            .await
    }

    pub async fn get_linked_owners(&self, start: u64, limit: u64) -> Result<Vec<OwnerAddress>, TxError> {
        let owners = self
            .read(
                abi::getLinkedOwnersCall {
                    start: U256::from(start),
                    limit: U256::from(limit),
                },
                "GetLinkedOwners",
            )
            .await?;
        Ok(owners.into_iter().map(|a| OwnerAddress(a.into_array())).collect())
    }

    pub async fn total_linked_owners(&self) -> Result<U256, TxError> {
        self.read(abi::totalLinkedOwnersCall {}, "TotalLinkedOwners").await
    }

    // ---- workflow writes ----

    pub async fn upsert_workflow(&self, params: &RegisterWorkflowParams) -> Result<TxOutput, TxError> {
        let call = abi::upsertWorkflowCall {
            workflowName: params.name.clone(),
            tag: params.tag.clone(),
            workflowId: B256::from(params.workflow_id.0),
            status: params.status.as_u8(),
            donFamily: params.don_family.clone(),
            binaryUrl: params.binary_url.clone(),
            configUrl: params.config_url.clone(),
            attributes: Bytes::copy_from_slice(&params.attributes),
            keepAlive: params.keep_alive,
        };
        self.transact(call, "UpsertWorkflow", "WorkflowRegistered|WorkflowUpdated")
            .await
    }

    pub async fn activate_workflow(&self, id: &WorkflowId, don_family: &str) -> Result<TxOutput, TxError> {
        let call = abi::activateWorkflowCall {
            workflowId: B256::from(id.0),
            donFamily: don_family.to_string(),
        };
        self.transact(call, "ActivateWorkflow", "WorkflowActivated").await
    }

    pub async fn batch_pause_workflows(&self, ids: &[WorkflowId]) -> Result<TxOutput, TxError> {
        if ids.is_empty() {
            return Err(TxError::InvalidArgument("no workflow IDs to pause".into()));
        }
        let call = abi::batchPauseWorkflowsCall {
            workflowIds: ids.iter().map(|id| B256::from(id.0)).collect(),
        };
        self.transact(call, "BatchPauseWorkflows", "WorkflowStatusUpdated")
            .await
    }

    pub async fn delete_workflow(&self, id: &WorkflowId) -> Result<TxOutput, TxError> {
        let call = abi::deleteWorkflowCall {
            workflowId: B256::from(id.0),
        };
        self.transact(call, "DeleteWorkflow", "WorkflowDeleted").await
    }

    // ---- workflow reads ----

    /// Looks up one workflow version. `None` when the registry has no such entry.
    pub async fn get_workflow(
        &self,
        owner: &OwnerAddress,
        name: &str,
        tag: &str,
    ) -> Result<Option<WorkflowMetadata>, TxError> {
        let call = abi::getWorkflowCall {
            owner: address(owner),
            workflowName: name.to_string(),
            tag: tag.to_string(),
        };
        let out = self
            .backend
            .call(self.contract, Bytes::from(call.abi_encode()))
            .await;
        let out = match out {
            Ok(out) => out,
            Err(ChainError::Revert(data)) if is_workflow_missing(&data) => return Ok(None),
            Err(e) => return Err(chain_error("GetWorkflow", e)),
        };
        let view = abi::getWorkflowCall::abi_decode_returns(&out).map_err(|e| TxError::Decode {
            function: "GetWorkflow".into(),
            reason: e.to_string(),
        })?;
        if view.workflowId.is_zero() {
            return Ok(None);
        }
        Ok(Some(metadata(view)))
    }

    pub async fn get_workflow_list_by_owner_and_name(
        &self,
        owner: &OwnerAddress,
        name: &str,
        start: u64,
        limit: u64,
    ) -> Result<Vec<WorkflowMetadata>, TxError> {
        let call = abi::getWorkflowListByOwnerAndNameCall {
            owner: address(owner),
            workflowName: name.to_string(),
            start: U256::from(start),
            limit: U256::from(limit),
        };
        let views = self.read(call, "GetWorkflowListByOwnerAndName").await?;
        Ok(views.into_iter().map(metadata).collect())
    }

    pub async fn get_workflow_list_by_owner(
        &self,
        owner: &OwnerAddress,
        start: u64,
        limit: u64,
    ) -> Result<Vec<WorkflowMetadata>, TxError> {
        let call = abi::getWorkflowListByOwnerCall {
            owner: address(owner),
            start: U256::from(start),
            limit: U256::from(limit),
        };
        let views = self.read(call, "GetWorkflowListByOwner").await?;
        Ok(views.into_iter().map(metadata).collect())
    }

    /// Every version registered for (owner, name).
    pub async fn list_workflows_by_name(
        &self,
        owner: &OwnerAddress,
        name: &str,
        page_size: u64,
    ) -> Result<Vec<WorkflowMetadata>, TxError> {
        paging::collect_pages(page_size, move |start, limit| {
            self.get_workflow_list_by_owner_and_name(owner, name, start, limit)
        })
        .await
    }

    /// Every workflow the owner has registered.
    pub async fn list_workflows_by_owner(
        &self,
        owner: &OwnerAddress,
        page_size: u64,
    ) -> Result<Vec<WorkflowMetadata>, TxError> {
        paging::collect_pages(page_size, move |start, limit| {
            self.get_workflow_list_by_owner(owner, start, limit)
        })
        .await
    }

    pub async fn get_max_workflows_per_user_don(
        &self,
        owner: &OwnerAddress,
        don_family: &str,
    ) -> Result<u32, TxError> {
        let call = abi::getMaxWorkflowsPerUserDONCall {
            user: address(owner),
            donFamily: don_family.to_string(),
        };
        self.read(call, "GetMaxWorkflowsPerUserDON").await
    }

    // ---- request allowlist ----

    /// Allowlists a request digest until `now + duration`.
    pub async fn allowlist_request(&self, digest_hex: &str, duration: Duration) -> Result<TxOutput, TxError> {
        let digest = digest(digest_hex)?;
        let deadline = u64::try_from(now_unix())
            .unwrap_or_default()
            .saturating_add(duration.as_secs());
        let expiry = u32::try_from(deadline)
            .map_err(|_| TxError::InvalidArgument(format!("deadline {deadline} does not fit in uint32")))?;
        let call = abi::allowlistRequestCall {
            requestDigest: digest,
            expiryTimestamp: expiry,
        };
        self.transact(call, "AllowlistRequest", "RequestAllowlisted").await
    }

    pub async fn is_request_allowlisted(&self, owner: &OwnerAddress, digest_hex: &str) -> Result<bool, TxError> {
        let call = abi::isRequestAllowlistedCall {
            owner: address(owner),
            requestDigest: digest(digest_hex)?,
        };
        self.read(call, "IsRequestAllowlisted").await
    }
}

fn address(owner: &OwnerAddress) -> Address {
    Address::from(owner.0)
}

fn proof32(proof: &[u8]) -> Result<B256, TxError> {
    let arr: [u8; 32] = proof
        .try_into()
        .map_err(|_| TxError::InvalidArgument(format!("proof hash must be 32 bytes, got {}", proof.len())))?;
    Ok(B256::from(arr))
}

fn digest(digest_hex: &str) -> Result<B256, TxError> {
    let bytes = hex::decode(digest_hex.trim_start_matches("0x"))
        .map_err(|e| TxError::InvalidArgument(format!("invalid digest hex: {e}")))?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| TxError::InvalidArgument(format!("digest must be 32 bytes, got {}", b.len())))?;
    Ok(B256::from(arr))
}

fn is_workflow_missing(data: &[u8]) -> bool {
    matches!(
        IWorkflowRegistryErrors::abi_decode(data),
        Ok(IWorkflowRegistryErrors::WorkflowDoesNotExist(_))
    )
}

fn chain_error(function: &str, e: ChainError) -> TxError {
    match e {
        ChainError::Rpc(msg) => TxError::Rpc(msg),
        ChainError::Revert(data) => TxError::Reverted {
            function: function.to_string(),
            reason: abi::decode_revert(&data).unwrap_or_else(|| format!("unknown revert data {data}")),
        },
    }
}

fn metadata(v: WorkflowMetadataView) -> WorkflowMetadata {
    WorkflowMetadata {
        workflow_id: WorkflowId(v.workflowId.0),
        owner: OwnerAddress(v.owner.into_array()),
        created_at: v.createdAt,
        status: v.status,
        workflow_name: v.workflowName,
        binary_url: v.binaryUrl,
        config_url: v.configUrl,
        tag: v.tag,
        attributes: v.attributes.to_vec(),
        don_family: v.donFamily,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_key_binds_owner_and_name() {
        let a: OwnerAddress = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".parse().unwrap();
        let b: OwnerAddress = "0x70997970c51812dc3a010c7d01b50e0d17dc79c8".parse().unwrap();
        assert_ne!(hash_key(&a, "wf"), hash_key(&b, "wf"));
        assert_ne!(hash_key(&a, "wf"), hash_key(&a, "wf2"));
        assert_eq!(hash_key(&a, "wf"), hash_key(&a, "wf"));
    }

    #[test]
    fn digest_length_is_enforced() {
        let err = digest(&"ab".repeat(31)).unwrap_err();
        assert_eq!(err.to_string(), "digest must be 32 bytes, got 31");
        assert!(digest(&format!("0x{}", "ab".repeat(32))).is_ok());
    }

    #[test]
    fn proof_length_is_enforced() {
        assert!(proof32(&[0u8; 32]).is_ok());
        let err = proof32(&[0u8; 33]).unwrap_err();
        assert_eq!(err.to_string(), "proof hash must be 32 bytes, got 33");
    }
}
