use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::framing::{self, FramingError};
use crate::hashing::{self, HashError};
use crate::model::{Artifact, WorkflowId};

/// Failure assembling an [`Artifact`](crate::model::Artifact).
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No owner address.
    #[error("workflow owner is required")]
    MissingOwner,

    /// No workflow name.
    #[error("workflow name is required")]
    MissingName,

    /// A binary or config file could not be read.
    #[error("failed to read {what} from {path}: {source}")]
    Read {
        /// Which file: `binary` or `config`.
        what: &'static str,
/// File that was read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The binary is not a valid framed payload.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Hash inputs were rejected.
    #[error("failed to generate workflow ID: {0}")]
    Hash(#[from] HashError),

    /// The stored ID does not match the binary.
    #[error("workflow ID mismatch: artifact carries {carried}, recomputed {recomputed}")]
    IdMismatch {
        /// ID on the artifact.
        carried: WorkflowId,
        /// ID derived from the decoded binary.
        recomputed: WorkflowId,
    },
}

/// Inputs to [`build_artifact`].
#[derive(Debug, Clone)]
pub struct ArtifactInput<'a> {
    /// Owner address, hex.
    pub owner: &'a str,
    /// Workflow name.
    pub name: &'a str,
    /// Framed binary on disk.
    pub output_path: &'a Path,
    /// Optional config file.
    pub config_path: Option<&'a Path>,
    /// Optional secrets URL, part of the ID.
    pub secrets_url: Option<&'a str>,
}

/// Reads the framed binary and config and derives the workflow ID.
///
/// This is the one place that sees both the framed bytes (kept for upload) and
/// their decoded form (fed to the hasher).
pub fn build_artifact(input: &ArtifactInput<'_>) -> Result<Artifact, ArtifactError> {
    if input.owner.is_empty() {
        return Err(ArtifactError::MissingOwner);
    }
    if input.name.is_empty() {
        return Err(ArtifactError::MissingName);
    }

    let binary_framed = std::fs::read(input.output_path).map_err(|source| ArtifactError::Read {
        what: "workflow binary",
        path: input.output_path.to_path_buf(),
        source,
    })?;

    let config = match input.config_path {
        Some(path) => Some(std::fs::read(path).map_err(|source| ArtifactError::Read {
            what: "workflow config",
            path: path.to_path_buf(),
            source,
        })?),
        None => None,
    };

    let workflow_id = compute_id(input, &binary_framed, config.as_deref())?;
    debug!(workflow_id = %workflow_id, binary_len = binary_framed.len(), "artifact built");

    Ok(Artifact {
        workflow_id,
        binary_framed,
        config,
    })
}

/// Recomputes the ID from the artifact's own bytes and rejects a mismatch.
pub fn verify_artifact(input: &ArtifactInput<'_>, artifact: &Artifact) -> Result<(), ArtifactError> {
    let recomputed = compute_id(input, &artifact.binary_framed, artifact.config.as_deref())?;
    if recomputed != artifact.workflow_id {
        return Err(ArtifactError::IdMismatch {
            carried: artifact.workflow_id,
            recomputed,
        });
    }
    Ok(())
}

fn compute_id(
    input: &ArtifactInput<'_>,
    binary_framed: &[u8],
    config: Option<&[u8]>,
) -> Result<WorkflowId, ArtifactError> {
    let decoded = framing::decode_framed(binary_framed)?;
    Ok(hashing::workflow_id(
        input.owner,
        input.name,
        &decoded,
        config.unwrap_or_default(),
        input.secrets_url.unwrap_or_default(),
    )?)
}
