//! Workflow registry ABI.

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::{SolEvent, SolInterface};

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface IWorkflowRegistry {
        struct WorkflowMetadataView {
            bytes32 workflowId;
            address owner;
            uint64 createdAt;
            uint8 status;
            string workflowName;
            string binaryUrl;
            string configUrl;
            string tag;
            bytes attributes;
            string donFamily;
        }

        function typeAndVersion() external view returns (string);

        function linkOwner(uint256 validityTimestamp, bytes32 proof, bytes signature) external;
        function unlinkOwner(address owner, uint256 validityTimestamp, bytes signature, uint8 action) external;
        function canLinkOwner(address owner, uint256 validityTimestamp, bytes32 proof, bytes signature) external view;
        function canUnlinkOwner(address owner, uint256 validityTimestamp, bytes signature, uint8 action) external view;
        function isOwnerLinked(address owner) external view returns (bool);
        function getLinkedOwners(uint256 start, uint256 limit) external view returns (address[]);
        function totalLinkedOwners() external view returns (uint256);

        function upsertWorkflow(
            string workflowName,
            string tag,
            bytes32 workflowId,
            uint8 status,
            string donFamily,
            string binaryUrl,
            string configUrl,
            bytes attributes,
            bool keepAlive
        ) external;
        function activateWorkflow(bytes32 workflowId, string donFamily) external;
        function batchPauseWorkflows(bytes32[] workflowIds) external;
        function deleteWorkflow(bytes32 workflowId) external;

        function getWorkflow(address owner, string workflowName, string tag) external view returns (WorkflowMetadataView);
        function getWorkflowListByOwnerAndName(address owner, string workflowName, uint256 start, uint256 limit)
            external view returns (WorkflowMetadataView[]);
        function getWorkflowListByOwner(address owner, uint256 start, uint256 limit)
            external view returns (WorkflowMetadataView[]);
        function getMaxWorkflowsPerUserDON(address user, string donFamily) external view returns (uint32);

        function allowlistRequest(bytes32 requestDigest, uint32 expiryTimestamp) external;
        function isRequestAllowlisted(address owner, bytes32 requestDigest) external view returns (bool);

        event OwnershipLinkUpdated(address indexed owner, bytes32 indexed proof, bool indexed added);
        event WorkflowRegistered(bytes32 indexed workflowId, address indexed owner, string donFamily, uint8 status, string workflowName);
        event WorkflowUpdated(bytes32 indexed oldWorkflowId, bytes32 indexed newWorkflowId, address indexed owner, string donFamily, string workflowName);
        event WorkflowActivated(bytes32 indexed workflowId, address indexed owner, string donFamily, string workflowName);
        event WorkflowStatusUpdated(bytes32 indexed workflowId, address indexed owner, string donFamily, uint8 status, string workflowName);
        event WorkflowDeleted(bytes32 indexed workflowId, address indexed owner, string donFamily, string workflowName);
        event RequestAllowlisted(address indexed owner, bytes32 indexed requestDigest, uint32 expiryTimestamp);

        error CallerIsNotWorkflowOwner(address caller);
        error OwnershipLinkAlreadyExists(address owner);
        error OwnershipLinkDoesNotExist(address owner);
        error OwnershipProofAlreadyUsed(address owner, bytes32 proof);
        error LinkOwnerRequestExpired(address caller, uint256 currentTime, uint256 expiryTimestamp);
        error UnlinkOwnerRequestExpired(address caller, uint256 currentTime, uint256 expiryTimestamp);
        error InvalidOwnershipLink(address owner, uint256 validityTimestamp, bytes32 proof, bytes signature);
        error InvalidSignature(bytes signature, uint8 recoverErrorId, bytes32 recoverErrorArg);
        error WorkflowDoesNotExist();
        error WorkflowIDAlreadyExists(bytes32 workflowId);
        error ZeroWorkflowIDNotAllowed();
        error WorkflowNameTooLong(uint256 providedLength, uint8 maxAllowedLength);
        error URLTooLong(uint256 providedLength, uint8 maxAllowedLength);
        error MaxWorkflowsPerUserDONExceeded(address owner, string donFamily);
        error DonNotAllowed(string donFamily);
    }
}

pub use IWorkflowRegistry::*;

/// Prefix every supported registry reports from `typeAndVersion()`.
pub const SUPPORTED_TYPE_AND_VERSION: &str = "WorkflowRegistry 2.";

/// Topic0 for a registry event, by its Solidity name.
pub fn event_signature(name: &str) -> Option<B256> {
    let hash = match name {
        "OwnershipLinkUpdated" => OwnershipLinkUpdated::SIGNATURE_HASH,
        "WorkflowRegistered" => WorkflowRegistered::SIGNATURE_HASH,
        "WorkflowUpdated" => WorkflowUpdated::SIGNATURE_HASH,
        "WorkflowActivated" => WorkflowActivated::SIGNATURE_HASH,
        "WorkflowStatusUpdated" => WorkflowStatusUpdated::SIGNATURE_HASH,
        "WorkflowDeleted" => WorkflowDeleted::SIGNATURE_HASH,
        "RequestAllowlisted" => RequestAllowlisted::SIGNATURE_HASH,
        _ => return None,
    };
    Some(hash)
}

/// Renders revert data as `Name: field=value, ...`.
///
/// Known registry errors are decoded by selector; a plain `Error(string)` falls
/// back to its reason. Anything else is `None`.
pub fn decode_revert(data: &[u8]) -> Option<String> {
    use IWorkflowRegistryErrors as E;

    if data.len() < 4 {
        return None;
    }
    let Ok(err) = E::abi_decode(data) else {
        return alloy::sol_types::decode_revert_reason(data);
    };
    let s = match err {
        E::CallerIsNotWorkflowOwner(e) => format!("CallerIsNotWorkflowOwner: caller={}", e.caller),
        E::OwnershipLinkAlreadyExists(e) => format!("OwnershipLinkAlreadyExists: owner={}", e.owner),
        E::OwnershipLinkDoesNotExist(e) => format!("OwnershipLinkDoesNotExist: owner={}", e.owner),
        E::OwnershipProofAlreadyUsed(e) => {
            format!("OwnershipProofAlreadyUsed: owner={}, proof={}", e.owner, e.proof)
        }
        E::LinkOwnerRequestExpired(e) => format!(
            "LinkOwnerRequestExpired: caller={}, currentTime={}, expiryTimestamp={}",
            e.caller, e.currentTime, e.expiryTimestamp
        ),
        E::UnlinkOwnerRequestExpired(e) => format!(
            "UnlinkOwnerRequestExpired: caller={}, currentTime={}, expiryTimestamp={}",
            e.caller, e.currentTime, e.expiryTimestamp
        ),
        E::InvalidOwnershipLink(e) => format!(
            "InvalidOwnershipLink: owner={}, validityTimestamp={}, proof={}",
            e.owner, e.validityTimestamp, e.proof
        ),
        E::InvalidSignature(e) => format!(
            "InvalidSignature: signature={}, recoverErrorId={}",
            e.signature, e.recoverErrorId
        ),
        E::WorkflowDoesNotExist(_) => "WorkflowDoesNotExist".to_string(),
        E::WorkflowIDAlreadyExists(e) => format!("WorkflowIDAlreadyExists: workflowId={}", e.workflowId),
        E::ZeroWorkflowIDNotAllowed(_) => "ZeroWorkflowIDNotAllowed".to_string(),
        E::WorkflowNameTooLong(e) => format!(
            "WorkflowNameTooLong: providedLength={}, maxAllowedLength={}",
            e.providedLength, e.maxAllowedLength
        ),
        E::URLTooLong(e) => format!(
            "URLTooLong: providedLength={}, maxAllowedLength={}",
            e.providedLength, e.maxAllowedLength
        ),
        E::MaxWorkflowsPerUserDONExceeded(e) => format!(
            "MaxWorkflowsPerUserDONExceeded: owner={}, donFamily={}",
            e.owner, e.donFamily
        ),
        E::DonNotAllowed(e) => format!("DonNotAllowed: donFamily={}", e.donFamily),
    };
    Some(s)
}
