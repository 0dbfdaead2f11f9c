//! Owner-linking handshake with the service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use wfctl_core::model::OwnerType;
use wfctl_core::new_idempotency_key;

use crate::error::ServiceError;
use crate::graphql::GraphQlClient;

/// Environment label the service files link requests under.
pub const LINK_ENVIRONMENT: &str = "PRODUCTION_TESTNET";

/// Verification status of a fully processed link. The spelling matches the service.
pub const VERIFICATION_STATUS_SUCCESSFUL: &str = "VERIFICATION_STATUS_SUCCESSFULL";

const INITIATE_LINKING: &str = r#"
mutation InitiateLinking($request: InitiateLinkingRequest!) {
  initiateLinking(request: $request) {
    ownershipProofHash
    workflowOwnerAddress
    validUntil
    signature
    chainSelector
    contractAddress
    transactionData
    functionSignature
    functionArgs
  }
}"#;

const INITIATE_UNLINKING: &str = r#"
mutation InitiateUnlinking($request: InitiateUnlinkingRequest!) {
  initiateUnlinking(request: $request) {
    ownershipProofHash
    validUntil
    signature
    chainSelector
    contractAddress
    transactionData
    functionSignature
    functionArgs
  }
}"#;

const LIST_WORKFLOW_OWNERS: &str = r#"
query {
  listWorkflowOwners(filters: { linkStatus: LINKED_ONLY }) {
    linkedOwners {
      workflowOwnerAddress
      verificationStatus
    }
  }
}"#;

/// A signed link or unlink request, valid until `valid_until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkingResponse {
    pub ownership_proof_hash: String,
    #[serde(default)]
    pub workflow_owner_address: String,
    /// RFC 3339.
    pub valid_until: String,
    pub signature: String,
    /// Decimal chain selector.
    pub chain_selector: String,
    pub contract_address: String,
    #[serde(default)]
    pub transaction_data: String,
    #[serde(default)]
    pub function_signature: String,
    #[serde(default)]
    pub function_args: Vec<String>,
}

impl LinkingResponse {
    /// Parsed expiry.
    pub fn valid_until_utc(&self) -> Result<DateTime<Utc>, ServiceError> {
        DateTime::parse_from_rfc3339(&self.valid_until)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ServiceError::InvalidRequest {
                what: "validUntil format",
                reason: e.to_string(),
            })
    }

    /// Parsed chain selector.
    pub fn chain_selector_u64(&self) -> Result<u64, ServiceError> {
        self.chain_selector
            .parse()
            .map_err(|_| ServiceError::InvalidRequest {
                what: "chain selector",
                reason: self.chain_selector.clone(),
            })
    }

    /// The on-chain unlink action, carried as the fourth function argument.
    pub fn unlink_action(&self) -> Result<u8, ServiceError> {
        let raw = self
            .function_args
            .get(3)
            .ok_or_else(|| ServiceError::InvalidRequest {
                what: "functionArgs",
                reason: format!("unexpected functionArgs length: {}", self.function_args.len()),
            })?;
        raw.parse().map_err(|_| ServiceError::InvalidRequest {
            what: "action",
            reason: raw.clone(),
        })
    }
}

/// What to do with existing workflows before an unlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PreUnlinkAction {
    None,
    RemoveWorkflows,
    PauseWorkflows,
}

impl PreUnlinkAction {
    /// All choices, in menu order.
    pub const ALL: [Self; 3] = [Self::None, Self::RemoveWorkflows, Self::PauseWorkflows];

    /// 1-based menu id, as accepted by `--action-id`.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id.checked_sub(1)? as usize).copied()
    }

    /// Human description shown in the selection prompt.
    pub fn description(self) -> &'static str {
        match self {
            Self::None => "No action prior to unlinking",
            Self::RemoveWorkflows => "Remove all workflows owned by the owner prior to unlinking",
            Self::PauseWorkflows => "Pause all workflows owned by the owner prior to unlinking",
        }
    }
}

/// An owner address linked to the caller's organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedOwner {
    pub workflow_owner_address: String,
    pub verification_status: String,
}

impl LinkedOwner {
    /// True once the service has finished verifying the on-chain link.
    pub fn is_verified(&self) -> bool {
        self.verification_status == VERIFICATION_STATUS_SUCCESSFUL
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateLinkingData {
    initiate_linking: LinkingResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateUnlinkingData {
    initiate_unlinking: LinkingResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListOwnersData {
    list_workflow_owners: LinkedOwners,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkedOwners {
    #[serde(default)]
    linked_owners: Vec<LinkedOwner>,
}

/// Linking mutations and owner queries.
#[derive(Debug, Clone)]
pub struct LinkingClient {
    gql: GraphQlClient,
}

impl LinkingClient {
    pub fn new(gql: GraphQlClient) -> Self {
        Self { gql }
    }

    /// Requests a signed link proof for `owner`. Each call carries a fresh
    /// idempotency key.
    pub async fn initiate_linking(
        &self,
        owner: &str,
        label: &str,
        owner_type: OwnerType,
    ) -> Result<LinkingResponse, ServiceError> {
        let vars = json!({
            "request": {
                "workflowOwnerAddress": owner,
                "workflowOwnerLabel": label,
                "environment": LINK_ENVIRONMENT,
                "requestProcess": owner_type.request_process(),
            }
        });
        let key = new_idempotency_key();
        let data: InitiateLinkingData = self.gql.execute(INITIATE_LINKING, vars, Some(&key)).await?;
        debug!(owner, valid_until = %data.initiate_linking.valid_until, "received linking response");
        Ok(data.initiate_linking)
    }

    /// Requests a signed unlink authorization for `owner`.
    pub async fn initiate_unlinking(
        &self,
        owner: &str,
        action: PreUnlinkAction,
    ) -> Result<LinkingResponse, ServiceError> {
        let vars = json!({
            "request": {
                "preUnlinkAction": action,
                "workflowOwnerAddress": owner,
                "environment": LINK_ENVIRONMENT,
            }
        });
        let data: InitiateUnlinkingData = self.gql.execute(INITIATE_UNLINKING, vars, None).await?;
        Ok(data.initiate_unlinking)
    }

    /// Owners linked to the caller's organization.
    pub async fn list_workflow_owners(&self) -> Result<Vec<LinkedOwner>, ServiceError> {
        let data: ListOwnersData = self
            .gql
            .execute(LIST_WORKFLOW_OWNERS, json!({}), None)
            .await?;
        Ok(data.list_workflow_owners.linked_owners)
    }

    /// True if `owner` is linked to the caller and verified. Address comparison
    /// ignores case.
    pub async fn is_owner_verified(&self, owner: &str) -> Result<bool, ServiceError> {
        let owners = self.list_workflow_owners().await?;
        let found = owners
            .iter()
            .find(|o| o.workflow_owner_address.eq_ignore_ascii_case(owner));
        match found {
            Some(o) => {
                debug!(owner, status = %o.verification_status, "owner found in linked owners");
                Ok(o.is_verified())
            }
            None => {
                debug!(owner, "owner not found in linked owners list");
                Ok(false)
            }
        }
    }
}
