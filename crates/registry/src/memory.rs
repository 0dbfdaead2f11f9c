//! In-memory registry backend.
//!
//! Decodes calldata with the same `sol!` codec as the client, applies it to a
//! small model of the registry, and answers with ABI-encoded returns, revert
//! data, and receipts carrying real event topics.

use std::collections::HashSet;
use std::sync::Mutex;

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::sol_types::{SolCall, SolError, SolEvent, SolInterface};
use async_trait::async_trait;

use wfctl_core::now_unix;

use crate::abi::{self, IWorkflowRegistryCalls as Call, WorkflowMetadataView};
use crate::chain::{ChainBackend, ChainError, LogEntry, TxReceipt};

/// Address the in-memory registry is reachable at.
pub const MEMORY_REGISTRY_ADDRESS: Address = Address::new([0xee; 20]);

const MAX_NAME_LEN: usize = 64;
const GAS_ESTIMATE: u64 = 100_000;
const MAX_FEE_PER_GAS: u128 = 1_000_000_000;

/// Call recorded by [`MemoryRegistry::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTx {
    pub function: &'static str,
    pub data: Bytes,
}

#[derive(Debug, Clone)]
struct State {
    type_and_version: String,
    linked: Vec<Address>,
    used_proofs: HashSet<B256>,
    workflows: Vec<WorkflowMetadataView>,
    allowlisted: HashSet<(Address, B256)>,
    max_per_don: u32,
    clock: u64,
}

#[derive(Debug, Default)]
struct Knobs {
    suppress_events: bool,
    fail_receipts: bool,
}

/// Fake [`ChainBackend`] holding registry state in memory.
#[derive(Debug)]
pub struct MemoryRegistry {
    sender: Option<Address>,
    state: Mutex<State>,
    knobs: Mutex<Knobs>,
    sent: Mutex<Vec<SentTx>>,
}

impl MemoryRegistry {
    /// Registry whose transactions are signed by `sender`.
    pub fn new(sender: Address) -> Self {
        Self::build(Some(sender))
    }

    /// Registry with no signing key.
    pub fn read_only() -> Self {
        Self::build(None)
    }

    fn build(sender: Option<Address>) -> Self {
        Self {
            sender,
            state: Mutex::new(State {
                type_and_version: "WorkflowRegistry 2.0.0".into(),
                linked: Vec::new(),
                used_proofs: HashSet::new(),
                workflows: Vec::new(),
                allowlisted: HashSet::new(),
                max_per_don: 10,
                clock: now_unix().max(0) as u64,
            }),
            knobs: Mutex::new(Knobs::default()),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn link(&self, owner: Address) {
        let mut st = self.state();
        if !st.linked.contains(&owner) {
            st.linked.push(owner);
        }
    }

    pub fn is_linked(&self, owner: Address) -> bool {
        self.state().linked.contains(&owner)
    }

    pub fn set_type_and_version(&self, value: &str) {
        self.state().type_and_version = value.to_string();
    }

    pub fn set_max_workflows_per_don(&self, max: u32) {
        self.state().max_per_don = max;
    }

    /// Mined receipts carry no logs.
    pub fn suppress_events(&self, on: bool) {
        self.knobs.lock().unwrap_or_else(|p| p.into_inner()).suppress_events = on;
    }

    /// Mined receipts report failure.
    pub fn fail_receipts(&self, on: bool) {
        self.knobs.lock().unwrap_or_else(|p| p.into_inner()).fail_receipts = on;
    }

    /// Every transaction broadcast so far.
    pub fn sent(&self) -> Vec<SentTx> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Names of broadcast functions, in order.
    pub fn sent_functions(&self) -> Vec<&'static str> {
        self.sent().into_iter().map(|t| t.function).collect()
    }

    /// Snapshot of every registered workflow.
    pub fn workflows(&self) -> Vec<WorkflowMetadataView> {
        self.state().workflows.clone()
    }

    fn sender_or_zero(&self) -> Address {
        self.sender.unwrap_or(Address::ZERO)
    }
}

#[async_trait]
impl ChainBackend for MemoryRegistry {
    async fn chain_id(&self) -> Result<u64, ChainError> {
        Ok(1337)
    }

    fn sender(&self) -> Option<Address> {
        self.sender
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let mut scratch = self.state().clone();
        execute(&mut scratch, to, self.sender_or_zero(), &data).map(|(out, _)| out)
    }

    async fn estimate_gas(&self, to: Address, data: Bytes) -> Result<u64, ChainError> {
        let mut scratch = self.state().clone();
        execute(&mut scratch, to, self.sender_or_zero(), &data)?;
        Ok(GAS_ESTIMATE)
    }

    async fn max_fee_per_gas(&self) -> Result<u128, ChainError> {
        Ok(MAX_FEE_PER_GAS)
    }

    async fn send(&self, to: Address, data: Bytes, _gas_limit: u64) -> Result<TxReceipt, ChainError> {
        let sender = self
            .sender
            .ok_or_else(|| ChainError::Rpc("no signer configured".into()))?;
        let (_, logs) = {
            let mut st = self.state();
            execute(&mut st, to, sender, &data)?
        };

        let mut sent = self.sent.lock().unwrap_or_else(|p| p.into_inner());
        let mut preimage = data.to_vec();
        preimage.extend_from_slice(&(sent.len() as u64).to_be_bytes());
        let tx_hash = keccak256(preimage);
        sent.push(SentTx {
            function: function_name(&data),
            data,
        });

        let knobs = self.knobs.lock().unwrap_or_else(|p| p.into_inner());
        Ok(TxReceipt {
            tx_hash,
            success: !knobs.fail_receipts,
            logs: if knobs.suppress_events { Vec::new() } else { logs },
        })
    }
}

fn function_name(data: &[u8]) -> &'static str {
    let Some(selector) = data.get(..4) else {
        return "unknown";
    };
    let table: [([u8; 4], &'static str); 7] = [
        (abi::linkOwnerCall::SELECTOR, "linkOwner"),
        (abi::unlinkOwnerCall::SELECTOR, "unlinkOwner"),
        (abi::upsertWorkflowCall::SELECTOR, "upsertWorkflow"),
        (abi::activateWorkflowCall::SELECTOR, "activateWorkflow"),
        (abi::batchPauseWorkflowsCall::SELECTOR, "batchPauseWorkflows"),
        (abi::deleteWorkflowCall::SELECTOR, "deleteWorkflow"),
        (abi::allowlistRequestCall::SELECTOR, "allowlistRequest"),
    ];
    table
        .iter()
        .find(|(s, _)| s.as_slice() == selector)
        .map_or("unknown", |(_, name)| name)
}

fn revert<E: SolError>(err: E) -> ChainError {
    ChainError::Revert(Bytes::from(err.abi_encode()))
}

fn log<E: SolEvent>(contract: Address, event: &E) -> LogEntry {
    let data = event.encode_log_data();
    LogEntry {
        address: contract,
        topics: data.topics().to_vec(),
        data: data.data,
    }
}

fn page<T: Clone>(items: &[T], start: U256, limit: U256) -> Vec<T> {
    let start = usize::try_from(start).unwrap_or(usize::MAX);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    items.iter().skip(start).take(limit).cloned().collect()
}

fn find_owned(st: &State, sender: Address, id: B256) -> Result<usize, ChainError> {
    let idx = st
        .workflows
        .iter()
        .position(|w| w.workflowId == id)
        .ok_or_else(|| revert(abi::WorkflowDoesNotExist {}))?;
    if st.workflows[idx].owner != sender {
        return Err(revert(abi::CallerIsNotWorkflowOwner { caller: sender }));
    }
    Ok(idx)
}

fn active_on_don(st: &State, owner: Address, don: &str) -> usize {
    st.workflows
        .iter()
        .filter(|w| w.owner == owner && w.donFamily == don && w.status == 0)
        .count()
}

fn check_link(st: &State, owner: Address, validity: U256, proof: B256) -> Result<(), ChainError> {
    let now = U256::from(st.clock);
    if validity < now {
        return Err(revert(abi::LinkOwnerRequestExpired {
            caller: owner,
            currentTime: now,
            expiryTimestamp: validity,
        }));
    }
    if st.linked.contains(&owner) {
        return Err(revert(abi::OwnershipLinkAlreadyExists { owner }));
    }
    if st.used_proofs.contains(&proof) {
        return Err(revert(abi::OwnershipProofAlreadyUsed { owner, proof }));
    }
    Ok(())
}

fn check_unlink(st: &State, caller: Address, owner: Address, validity: U256) -> Result<(), ChainError> {
    let now = U256::from(st.clock);
    if validity < now {
        return Err(revert(abi::UnlinkOwnerRequestExpired {
            caller,
            currentTime: now,
            expiryTimestamp: validity,
        }));
    }
    if !st.linked.contains(&owner) {
        return Err(revert(abi::OwnershipLinkDoesNotExist { owner }));
    }
    Ok(())
}

fn require_linked(st: &State, owner: Address) -> Result<(), ChainError> {
    if st.linked.contains(&owner) {
        Ok(())
    } else {
        Err(revert(abi::OwnershipLinkDoesNotExist { owner }))
    }
}

/// Applies one call. Returns the encoded output and the emitted logs.
fn execute(
    st: &mut State,
    contract: Address,
    sender: Address,
    data: &[u8],
) -> Result<(Bytes, Vec<LogEntry>), ChainError> {
    let call = Call::abi_decode(data).map_err(|e| ChainError::Rpc(format!("unknown call: {e}")))?;
    let mut logs = Vec::new();

    let out: Vec<u8> = match call {
        Call::typeAndVersion(_) => abi::typeAndVersionCall::abi_encode_returns(&st.type_and_version),

        Call::isOwnerLinked(c) => abi::isOwnerLinkedCall::abi_encode_returns(&st.linked.contains(&c.owner)),
        Call::getLinkedOwners(c) => {
            abi::getLinkedOwnersCall::abi_encode_returns(&page(&st.linked, c.start, c.limit))
        }
        Call::totalLinkedOwners(_) => {
            abi::totalLinkedOwnersCall::abi_encode_returns(&U256::from(st.linked.len()))
        }
        Call::canLinkOwner(c) => {
            check_link(st, c.owner, c.validityTimestamp, c.proof)?;
            Vec::new()
        }
        Call::canUnlinkOwner(c) => {
            check_unlink(st, c.owner, c.owner, c.validityTimestamp)?;
            Vec::new()
        }
        Call::linkOwner(c) => {
            check_link(st, sender, c.validityTimestamp, c.proof)?;
            st.linked.push(sender);
            st.used_proofs.insert(c.proof);
            logs.push(log(
                contract,
                &abi::OwnershipLinkUpdated {
                    owner: sender,
                    proof: c.proof,
                    added: true,
                },
            ));
            Vec::new()
        }
        Call::unlinkOwner(c) => {
            check_unlink(st, sender, c.owner, c.validityTimestamp)?;
            st.linked.retain(|a| *a != c.owner);
            match c.action {
                1 => st.workflows.retain(|w| w.owner != c.owner),
                2 => st
                    .workflows
                    .iter_mut()
                    .filter(|w| w.owner == c.owner)
                    .for_each(|w| w.status = 1),
                _ => {}
            }
            logs.push(log(
                contract,
                &abi::OwnershipLinkUpdated {
                    owner: c.owner,
                    proof: B256::ZERO,
                    added: false,
                },
            ));
            Vec::new()
        }

        Call::upsertWorkflow(c) => {
            require_linked(st, sender)?;
            if c.workflowId.is_zero() {
                return Err(revert(abi::ZeroWorkflowIDNotAllowed {}));
            }
            if c.workflowName.len() > MAX_NAME_LEN {
                return Err(revert(abi::WorkflowNameTooLong {
                    providedLength: U256::from(c.workflowName.len()),
                    maxAllowedLength: MAX_NAME_LEN as u8,
                }));
            }
            let existing = st
                .workflows
                .iter()
                .position(|w| w.owner == sender && w.workflowName == c.workflowName && w.tag == c.tag);
            let taken_elsewhere = st
                .workflows
                .iter()
                .enumerate()
                .any(|(i, w)| w.workflowId == c.workflowId && Some(i) != existing);
            if taken_elsewhere {
                return Err(revert(abi::WorkflowIDAlreadyExists {
                    workflowId: c.workflowId,
                }));
            }

            match existing {
                Some(i) => {
                    let w = &mut st.workflows[i];
                    let old = w.workflowId;
                    w.workflowId = c.workflowId;
                    w.status = c.status;
                    w.donFamily = c.donFamily.clone();
                    w.binaryUrl = c.binaryUrl;
                    w.configUrl = c.configUrl;
                    w.attributes = c.attributes;
                    logs.push(log(
                        contract,
                        &abi::WorkflowUpdated {
                            oldWorkflowId: old,
                            newWorkflowId: c.workflowId,
                            owner: sender,
                            donFamily: c.donFamily,
                            workflowName: c.workflowName.clone(),
                        },
                    ));
                }
                None => {
                    if c.status == 0
                        && active_on_don(st, sender, &c.donFamily) >= st.max_per_don as usize
                    {
                        return Err(revert(abi::MaxWorkflowsPerUserDONExceeded {
                            owner: sender,
                            donFamily: c.donFamily,
                        }));
                    }
                    st.clock += 1;
                    st.workflows.push(WorkflowMetadataView {
                        workflowId: c.workflowId,
                        owner: sender,
                        createdAt: st.clock,
                        status: c.status,
                        workflowName: c.workflowName.clone(),
                        binaryUrl: c.binaryUrl,
                        configUrl: c.configUrl,
                        tag: c.tag.clone(),
                        attributes: c.attributes,
                        donFamily: c.donFamily.clone(),
                    });
                    logs.push(log(
                        contract,
                        &abi::WorkflowRegistered {
                            workflowId: c.workflowId,
                            owner: sender,
                            donFamily: c.donFamily,
                            status: c.status,
                            workflowName: c.workflowName.clone(),
                        },
                    ));
                }
            }
            if !c.keepAlive {
                for w in st.workflows.iter_mut().filter(|w| {
                    w.owner == sender && w.workflowName == c.workflowName && w.tag != c.tag
                }) {
                    w.status = 1;
                }
            }
            Vec::new()
        }
        Call::activateWorkflow(c) => {
            let i = find_owned(st, sender, c.workflowId)?;
            let w = &mut st.workflows[i];
            w.status = 0;
            w.donFamily = c.donFamily.clone();
            logs.push(log(
                contract,
                &abi::WorkflowActivated {
                    workflowId: c.workflowId,
                    owner: sender,
                    donFamily: c.donFamily,
                    workflowName: w.workflowName.clone(),
                },
            ));
            Vec::new()
        }
        Call::batchPauseWorkflows(c) => {
            for id in c.workflowIds {
                let i = find_owned(st, sender, id)?;
                let w = &mut st.workflows[i];
                w.status = 1;
                logs.push(log(
                    contract,
                    &abi::WorkflowStatusUpdated {
                        workflowId: id,
                        owner: sender,
                        donFamily: w.donFamily.clone(),
                        status: 1,
                        workflowName: w.workflowName.clone(),
                    },
                ));
            }
            Vec::new()
        }
        Call::deleteWorkflow(c) => {
            let i = find_owned(st, sender, c.workflowId)?;
            let w = st.workflows.remove(i);
            logs.push(log(
                contract,
                &abi::WorkflowDeleted {
                    workflowId: c.workflowId,
                    owner: sender,
                    donFamily: w.donFamily,
                    workflowName: w.workflowName,
                },
            ));
            Vec::new()
        }

        Call::getWorkflow(c) => {
            let w = st
                .workflows
                .iter()
                .find(|w| w.owner == c.owner && w.workflowName == c.workflowName && w.tag == c.tag)
                .ok_or_else(|| revert(abi::WorkflowDoesNotExist {}))?;
            abi::getWorkflowCall::abi_encode_returns(w)
        }
        Call::getWorkflowListByOwnerAndName(c) => {
            let matching: Vec<_> = st
                .workflows
                .iter()
                .filter(|w| w.owner == c.owner && w.workflowName == c.workflowName)
                .cloned()
                .collect();
            abi::getWorkflowListByOwnerAndNameCall::abi_encode_returns(&page(&matching, c.start, c.limit))
        }
        Call::getWorkflowListByOwner(c) => {
            let matching: Vec<_> = st
                .workflows
                .iter()
                .filter(|w| w.owner == c.owner)
                .cloned()
                .collect();
            abi::getWorkflowListByOwnerCall::abi_encode_returns(&page(&matching, c.start, c.limit))
        }
        Call::getMaxWorkflowsPerUserDON(_) => {
            abi::getMaxWorkflowsPerUserDONCall::abi_encode_returns(&st.max_per_don)
        }

        Call::allowlistRequest(c) => {
            require_linked(st, sender)?;
            st.allowlisted.insert((sender, c.requestDigest));
            logs.push(log(
                contract,
                &abi::RequestAllowlisted {
                    owner: sender,
                    requestDigest: c.requestDigest,
                    expiryTimestamp: c.expiryTimestamp,
                },
            ));
            Vec::new()
        }
        Call::isRequestAllowlisted(c) => abi::isRequestAllowlistedCall::abi_encode_returns(
            &st.allowlisted.contains(&(c.owner, c.requestDigest)),
        ),
    };
    Ok((Bytes::from(out), logs))
}
