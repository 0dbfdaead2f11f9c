//! Owner-link state machine.
//!
//! Drives an owner address from unknown to linked on the registry. Single-key
//! owners are linked in place; multi-sig owners get calldata to submit
//! themselves and the caller is told to halt.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use wfctl_core::model::{OwnerAddress, OwnerType, TxStrategy};
use wfctl_registry::{RegistryClient, TxError, TxOutput};
use wfctl_service::{LinkingClient, LinkingResponse, ServiceError};

use crate::output::print_next_steps;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("the request has expired (valid until {valid_until})")]
    Expired { valid_until: DateTime<Utc> },

    #[error("proof hash must be 32 bytes, got {0}")]
    ProofLength(usize),

    #[error("invalid {field} hex: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("key {0} is linked to another account. Please use a different owner address")]
    LinkedElsewhere(OwnerAddress),

    #[error("failed to validate key ownership: {0}")]
    Ownership(ServiceError),

    #[error("contract address validation failed: expected {expected}, service returned {returned}")]
    ContractMismatch { expected: String, returned: String },

    #[error("linking process timeout after {0} attempts")]
    Timeout(u32),

    #[error("failed to write linking response to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Tx(#[from] TxError),
}

/// States of [`LinkMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing checked yet.
    Unknown,
    /// Asking the registry whether the owner is linked.
    QueryingChain,
    /// The registry reports a link.
    ChainLinked,
    /// Asking the service whether it agrees.
    QueryingService,
    /// Chain and service agree.
    Linked,
    /// Requesting a signed link request.
    InitiatingLink,
    /// Sending `linkOwner`.
    SubmittingLinkOwner,
    /// Polling until chain and service both see the link.
    WaitingForPropagation,
    /// Calldata handed off for an external signer.
    MsigHalt,
    /// Stopped with an error.
    Failed,
}

/// How the machine finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The owner was linked before this run.
    AlreadyLinked,
    /// This run linked the owner.
    Linked,
    /// Calldata was handed to the user; the caller should stop here.
    Halted,
}

/// Bounded waiting for chain and service to agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep after the link transaction before the first check.
    pub initial_wait: Duration,
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(36),
            attempts: 5,
            interval: Duration::from_secs(3),
        }
    }
}

impl PollPolicy {
    /// No sleeping at all.
    pub fn immediate(attempts: u32) -> Self {
        Self {
            initial_wait: Duration::ZERO,
            attempts,
            interval: Duration::ZERO,
        }
    }
}

/// A link or unlink request that passed local checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedRequest {
    /// Unix seconds.
    pub valid_until: u64,
    pub proof: Vec<u8>,
    pub signature: Vec<u8>,
}

/// Rejects expired requests and decodes proof and signature.
///
/// The proof is only required when `need_proof` is set; unlink requests carry
/// none that the contract checks.
pub fn check_request(
    resp: &LinkingResponse,
    now: DateTime<Utc>,
    need_proof: bool,
) -> Result<CheckedRequest, LinkError> {
    let valid_until = resp.valid_until_utc()?;
    if now > valid_until {
        return Err(LinkError::Expired { valid_until });
    }
    let proof = if need_proof {
        let proof = decode_hex("proof", &resp.ownership_proof_hash)?;
        if proof.len() != 32 {
            return Err(LinkError::ProofLength(proof.len()));
        }
        proof
    } else {
        Vec::new()
    };
    Ok(CheckedRequest {
        valid_until: u64::try_from(valid_until.timestamp()).unwrap_or_default(),
        proof,
        signature: decode_hex("signature", &resp.signature)?,
    })
}

fn decode_hex(field: &'static str, raw: &str) -> Result<Vec<u8>, LinkError> {
    hex::decode(raw.trim_start_matches("0x")).map_err(|e| LinkError::InvalidHex {
        field,
        reason: e.to_string(),
    })
}

/// Fails unless the service signed for the registry we are talking to.
pub fn check_contract(registry: &RegistryClient, resp: &LinkingResponse) -> Result<(), LinkError> {
    let expected = registry.contract().to_string();
    if !expected.eq_ignore_ascii_case(&resp.contract_address) {
        return Err(LinkError::ContractMismatch {
            expected,
            returned: resp.contract_address.clone(),
        });
    }
    info!("contract address validation passed");
    Ok(())
}

/// Writes a linking response as `linking_<owner>_<unix>.json`, owner-only.
pub fn persist_response(
    dir: &Path,
    owner: &OwnerAddress,
    resp: &LinkingResponse,
    now: DateTime<Utc>,
) -> Result<PathBuf, LinkError> {
    let path = dir.join(format!("linking_{owner}_{}.json", now.timestamp()));
    let persist = |source| LinkError::Persist {
        path: path.clone(),
        source,
    };
    let body = serde_json::to_vec_pretty(resp).map_err(|e| persist(e.into()))?;

    let mut opts = OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(&path).map_err(persist)?;
    file.write_all(&body).map_err(persist)?;
    Ok(path)
}

/// Owner-link state machine. One instance per run.
pub struct LinkMachine<'a> {
    registry: &'a RegistryClient,
    linking: &'a LinkingClient,
    owner: OwnerAddress,
    owner_type: OwnerType,
    label: String,
    poll: PollPolicy,
    work_dir: PathBuf,
    state: LinkState,
}

impl<'a> LinkMachine<'a> {
    /// Machine for `owner`, starting in [`LinkState::Unknown`] with the
    /// default poll policy.
    pub fn new(
        registry: &'a RegistryClient,
        linking: &'a LinkingClient,
        owner: OwnerAddress,
        owner_type: OwnerType,
    ) -> Self {
        Self {
            registry,
            linking,
            owner,
            owner_type,
            label: String::new(),
            poll: PollPolicy::default(),
            work_dir: PathBuf::from("."),
            state: LinkState::Unknown,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    fn enter(&mut self, next: LinkState) {
        debug!(from = ?self.state, to = ?next, owner = %self.owner, "link state");
        self.state = next;
    }

    /// Runs to `Linked` or `MsigHalt`. Any error leaves the machine in `Failed`.
    pub async fn ensure_linked(&mut self) -> Result<LinkOutcome, LinkError> {
        let result = self.run().await;
        if result.is_err() {
            self.enter(LinkState::Failed);
        }
        result
    }

    async fn run(&mut self) -> Result<LinkOutcome, LinkError> {
        self.enter(LinkState::QueryingChain);
        if self.registry.is_owner_linked(&self.owner).await? {
            self.enter(LinkState::ChainLinked);
            return self.confirm_existing_link().await;
        }

        info!(owner = %self.owner, owner_type = ?self.owner_type, "owner not linked; starting auto-link");
        self.enter(LinkState::InitiatingLink);
        let owner = self.owner.to_string();
        let resp = self
            .linking
            .initiate_linking(&owner, &self.label, self.owner_type)
            .await?;
        check_contract(self.registry, &resp)?;
        let checked = check_request(&resp, Utc::now(), true)?;

        if self.owner_type == OwnerType::Msig {
            return self.halt_for_msig(&resp, &checked).await;
        }

        self.enter(LinkState::SubmittingLinkOwner);
        self.registry
            .can_link_owner(&self.owner, checked.valid_until, &checked.proof, &checked.signature)
            .await?;
        let out = match self
            .registry
            .link_owner(checked.valid_until, &checked.proof, &checked.signature)
            .await
        {
            Ok(out) => out,
            Err(e) if e.is_event_missing() => {
                warn!(error = %e, "link transaction mined without the expected event; verifying by polling");
                TxOutput::Regular {
                    tx_hash: e.tx_hash().unwrap_or_default(),
                }
            }
            Err(e) => return Err(e.into()),
        };
        if let TxOutput::Raw { to, calldata } = &out {
            println!("Link transaction prepared, not sent.");
            print_next_steps(self.registry.chain_name(), *to, calldata);
            self.enter(LinkState::MsigHalt);
            return Ok(LinkOutcome::Halted);
        }
        if let Some(hash) = out.tx_hash() {
            println!("Link transaction confirmed: {hash}");
        }

        self.enter(LinkState::WaitingForPropagation);
        self.wait_for_propagation().await?;
        self.enter(LinkState::Linked);
        println!("Owner {} linked", self.owner);
        Ok(LinkOutcome::Linked)
    }

    async fn confirm_existing_link(&mut self) -> Result<LinkOutcome, LinkError> {
        self.enter(LinkState::QueryingService);
        let owner = self.owner.to_string();
        let attempts = self.poll.attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.linking.is_owner_verified(&owner).await {
                Ok(true) => {
                    self.enter(LinkState::Linked);
                    return Ok(LinkOutcome::AlreadyLinked);
                }
                Ok(false) => {
                    debug!(attempt, "service does not list the owner as verified");
                    last_err = None;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "owner verification query failed");
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }
        // Only a definite "not verified" from the service means another account.
        match last_err {
            Some(e) => Err(LinkError::Ownership(e)),
            None => Err(LinkError::LinkedElsewhere(self.owner)),
        }
    }

    async fn halt_for_msig(
        &mut self,
        resp: &LinkingResponse,
        checked: &CheckedRequest,
    ) -> Result<LinkOutcome, LinkError> {
        if let TxOutput::Raw { to, calldata } = msig_link_calldata(self.registry, checked).await? {
            print_next_steps(self.registry.chain_name(), to, &calldata);
        }
        let path = persist_response(&self.work_dir, &self.owner, resp, Utc::now())?;
        info!(path = %path.display(), "linking response saved");
        println!("MSIG auto-link initiated. Halting deploy. Submit the multisig transaction, then re-run deploy.");
        self.enter(LinkState::MsigHalt);
        Ok(LinkOutcome::Halted)
    }

    async fn wait_for_propagation(&mut self) -> Result<(), LinkError> {
        tokio::time::sleep(self.poll.initial_wait).await;
        let owner = self.owner.to_string();
        for attempt in 1..=self.poll.attempts {
            let on_chain = self.registry.is_owner_linked(&self.owner).await;
            let verified = self.linking.is_owner_verified(&owner).await;
            match (on_chain, verified) {
                (Ok(true), Ok(true)) => return Ok(()),
                (chain, service) => debug!(
                    attempt,
                    chain = ?chain.ok(),
                    service = ?service.ok(),
                    "link not yet visible"
                ),
            }
            if attempt < self.poll.attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }
        Err(LinkError::Timeout(self.poll.attempts))
    }
}

/// Calldata for a multi-sig `linkOwner`, built without touching the chain.
pub async fn msig_link_calldata(
    registry: &RegistryClient,
    checked: &CheckedRequest,
) -> Result<TxOutput, LinkError> {
    let raw = registry.with_strategy(TxStrategy::RawCalldata);
    Ok(raw
        .link_owner(checked.valid_until, &checked.proof, &checked.signature)
        .await?)
}
