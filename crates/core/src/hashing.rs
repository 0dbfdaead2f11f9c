use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::{OwnerAddress, WorkflowId};

/// Leading byte of every workflow ID produced by this hasher.
pub const WORKFLOW_ID_VERSION: u8 = 0x00;

/// Inputs the workflow ID cannot be computed from.
#[derive(Debug, Error)]
pub enum HashError {
    /// Owner is not a 20-byte hex address.
    #[error("invalid workflow owner: {0}")]
    InvalidOwner(String),

    /// The decoded binary has no bytes.
    #[error("workflow binary is empty")]
    EmptyBinary,
}

/// Computes the workflow ID.
///
/// `wasm` must be the base64-decoded framed binary. Hashing the framed file
/// itself yields an ID the compute network never matches.
///
/// Layout fed to SHA-256: owner (20 bytes), then name, binary, config and
/// secrets URL each as a big-endian u64 length followed by the bytes. The first
/// byte of the digest is replaced by [`WORKFLOW_ID_VERSION`].
pub fn workflow_id(
    owner: &str,
    name: &str,
    wasm: &[u8],
    config: &[u8],
    secrets_url: &str,
) -> Result<WorkflowId, HashError> {
    let owner: OwnerAddress = owner
        .parse()
        .map_err(|_| HashError::InvalidOwner(owner.to_string()))?;
    if wasm.is_empty() {
        return Err(HashError::EmptyBinary);
    }

    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    for field in [name.as_bytes(), wasm, config, secrets_url.as_bytes()] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    let mut id: [u8; 32] = hasher.finalize().into();
    id[0] = WORKFLOW_ID_VERSION;
    Ok(WorkflowId(id))
}

/// Base64 of the MD5 digest, as sent in `Content-MD5` and the presign request.
pub fn content_md5_base64(content: &[u8]) -> String {
    STANDARD.encode(Md5::digest(content))
}

/// Hex SHA-256, used in diagnostics.
pub fn sha256_hex(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
