use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::validation::ValidationError;

/// Content-addressed workflow identifier (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowId(pub [u8; 32]);

impl WorkflowId {
    /// Lowercase hex without `0x`, the form the service and explorer expect.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WorkflowId({})", self.to_hex())
    }
}

impl FromStr for WorkflowId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw).map_err(|_| ValidationError::InvalidHex {
            field: "workflow_id".into(),
        })?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| ValidationError::WrongLength {
                field: "workflow_id".into(),
                expected: 32,
                actual: b.len(),
            })?;
        Ok(Self(arr))
    }
}

impl Serialize for WorkflowId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for WorkflowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 20-byte EVM account address.
///
/// Parsing requires the `0x` prefix; display is always lowercase.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerAddress(pub [u8; 20]);

impl OwnerAddress {
    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OwnerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerAddress({self})")
    }
}

impl FromStr for OwnerAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidAddress {
            field: "workflow_owner".into(),
            value: s.to_string(),
        };
        let raw = s.strip_prefix("0x").ok_or_else(invalid)?;
        if raw.len() != 40 {
            return Err(invalid());
        }
        let bytes = hex::decode(raw).map_err(|_| invalid())?;
        let arr: [u8; 20] = bytes.try_into().map_err(|_| invalid())?;
        Ok(Self(arr))
    }
}

impl Serialize for OwnerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for OwnerAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Host language of a workflow source tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowLanguage {
    /// Go compiled for the wasip1 sandbox ABI.
    GolangWasm,
    /// TypeScript compiled by the SDK's compile script.
    TypescriptWasm,
    /// Raw WASM produced by `make build`.
    PrebuiltWasm,
}

impl fmt::Display for WorkflowLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::GolangWasm => "golang-wasm",
            Self::TypescriptWasm => "typescript-wasm",
            Self::PrebuiltWasm => "prebuilt-wasm",
        };
        f.write_str(s)
    }
}

/// On-chain workflow status byte.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// `0`
    Active,
    /// `1`
    Paused,
}

impl WorkflowStatus {
    /// Initial status for an upsert: active when auto-starting, paused otherwise.
    pub fn initial(auto_start: bool) -> Self {
        if auto_start {
            Self::Active
        } else {
            Self::Paused
        }
    }

    /// Encoded contract value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Paused => 1,
        }
    }

    /// Decodes a contract value. Unknown values are `None`.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Active),
            1 => Some(Self::Paused),
            _ => None,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("ACTIVE"),
            Self::Paused => f.write_str("PAUSED"),
        }
    }
}

/// Custody model of the workflow owner address.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    /// Single externally owned account; the CLI signs.
    #[default]
    Eoa,
    /// Multi-signature custody; the CLI only emits calldata.
    Msig,
}

impl OwnerType {
    /// Value of the service's `requestProcess` enum.
    pub fn request_process(self) -> &'static str {
        match self {
            Self::Eoa => "EOA",
            Self::Msig => "MSIG",
        }
    }
}

/// How registry writes are submitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxStrategy {
    /// Sign with the local key, broadcast, wait for a receipt.
    #[default]
    SignSend,
    /// Build calldata only, for external signing.
    RawCalldata,
    /// Delegate signing to a hardware wallet.
    HwWallet {
        /// BIP-32 derivation path.
        derivation_path: String,
    },
}

/// Deploy inputs, produced by the command layer and validated before the pipeline runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployInputs {
    /// Registry name of the workflow.
    pub workflow_name: String,
    /// Owner address, hex.
    pub workflow_owner: String,
    /// Defaults to the workflow name when empty.
    #[serde(default)]
    pub workflow_tag: String,
    /// DON family the workflow runs on.
    pub don_family: String,
    /// Main source file.
    pub workflow_path: PathBuf,
    /// Config file uploaded next to the binary.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Where the framed binary is written.
    pub output_path: PathBuf,
    /// Secrets location; hashed into the ID.
    #[serde(default)]
    pub secrets_url: Option<String>,
    /// Register as active rather than paused.
    #[serde(default = "default_true")]
    pub auto_start: bool,
    /// Leave other versions of the name running.
    #[serde(default)]
    pub keep_alive: bool,
    /// How transactions are submitted.
    #[serde(default)]
    pub tx_strategy: TxStrategy,
    /// Custody model of the owner.
    #[serde(default)]
    pub owner_type: OwnerType,
    /// Label sent when the owner is linked.
    #[serde(default)]
    pub owner_label: Option<String>,
    /// Bypass prompts.
    #[serde(default)]
    pub skip_confirmation: bool,
    /// Run in confidential mode.
    #[serde(default)]
    pub confidential: bool,
    /// `key[:namespace]` entries.
    #[serde(default)]
    pub vault_don_secrets: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl DeployInputs {
    /// Tag sent to the registry; the name stands in when no tag was given.
    pub fn effective_tag(&self) -> &str {
        if self.workflow_tag.is_empty() {
            &self.workflow_name
        } else {
            &self.workflow_tag
        }
    }
}

/// Built workflow artifact.
///
/// `binary_framed` is what gets persisted and uploaded. The ID was computed
/// from its base64-decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// ID over the decoded binary.
    pub workflow_id: WorkflowId,
    /// brotli + base64 bytes, as uploaded.
    pub binary_framed: Vec<u8>,
    /// Raw config bytes.
    pub config: Option<Vec<u8>>,
}

/// Parameters of `upsertWorkflow`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWorkflowParams {
    /// Workflow name.
    pub name: String,
    /// Version tag.
    pub tag: String,
    /// Content-addressed ID.
    pub workflow_id: WorkflowId,
    /// Initial status.
    pub status: WorkflowStatus,
    /// Target DON family.
    pub don_family: String,
    /// GET URL of the framed binary.
    pub binary_url: String,
    /// GET URL of the config, or empty.
    pub config_url: String,
    /// Encoded [`WorkflowAttributes`], or empty.
    #[serde(with = "hex_bytes")]
    pub attributes: Vec<u8>,
    /// When false the registry pauses other versions of the name.
    pub keep_alive: bool,
}

/// Registry view of one workflow version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Content-addressed ID.
    pub workflow_id: WorkflowId,
    /// Owner address.
    pub owner: OwnerAddress,
    /// Registration time, unix seconds.
    pub created_at: u64,
    /// Raw status byte; see [`WorkflowStatus::from_u8`].
    pub status: u8,
    /// Workflow name.
    pub workflow_name: String,
    /// GET URL of the framed binary.
    pub binary_url: String,
    /// GET URL of the config, or empty.
    pub config_url: String,
    /// Version tag.
    pub tag: String,
    /// Raw attributes blob.
    #[serde(with = "hex_bytes")]
    pub attributes: Vec<u8>,
    /// DON family.
    pub don_family: String,
}

impl WorkflowMetadata {
    /// Decoded status, if known.
    pub fn status(&self) -> Option<WorkflowStatus> {
        WorkflowStatus::from_u8(self.status)
    }

    /// True when the registry reports this version as active.
    pub fn is_active(&self) -> bool {
        self.status() == Some(WorkflowStatus::Active)
    }
}

/// Confidential execution attributes stored alongside a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowAttributes {
    /// Always true when attributes are present.
    pub confidential: bool,
    /// Secrets the workflow may read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vault_don_secrets: Vec<SecretIdentifier>,
}

/// Reference to a secret held by the vault DON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretIdentifier {
    /// Secret name.
    pub key: String,
    /// Namespace; empty means the default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

/// Encodes the attributes blob for an upsert.
///
/// Non-confidential workflows carry empty attributes.
pub fn build_attributes(confidential: bool, secrets: &[String]) -> serde_json::Result<Vec<u8>> {
    if !confidential {
        return Ok(Vec::new());
    }
    let vault_don_secrets = secrets
        .iter()
        .map(|s| {
            let (key, namespace) = s.split_once(':').unwrap_or((s.as_str(), ""));
            SecretIdentifier {
                key: key.to_string(),
                namespace: namespace.to_string(),
            }
        })
        .collect();
    serde_json::to_vec(&WorkflowAttributes {
        confidential: true,
        vault_don_secrets,
    })
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)
    }
}
