use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::model::{DeployInputs, OwnerAddress, TxStrategy};

/// Upper bound on workflow name length.
pub const MAX_WORKFLOW_NAME_LEN: usize = 64;
/// Upper bound on tag and DON family length.
pub const MAX_TAG_LEN: usize = 32;
/// Upper bound on config/output path length.
pub const MAX_PATH_LEN: usize = 97;

/// A single rejected input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required value is blank.
    #[error("{field} can't be an empty string")]
    Empty {
        /// Input name.
        field: String,
    },

    /// A value exceeds its length limit.
    #[error("{field} is too long, limit is {max} characters (got {len})")]
    TooLong {
        /// Input name.
        field: String,
        /// Limit in characters.
        max: usize,
        /// Actual length.
        len: usize,
    },

    /// Only `[a-zA-Z0-9_-]` is allowed.
    #[error("{field} can only contain letters (a-z, A-Z), numbers (0-9), dashes (-), and underscores (_)")]
    InvalidCharacters {
        /// Input name.
        field: String,
    },

    /// Non-ASCII input.
    #[error("{field} must contain only ASCII characters: {value}")]
    NonAscii {
        /// Input name.
        field: String,
        /// Rejected value.
        value: String,
    },

    /// Not a `0x`-prefixed 20-byte address.
    #[error("{field} must be a valid Ethereum address starting with 0x: {value}")]
    InvalidAddress {
        /// Input name.
        field: String,
        /// Rejected value.
        value: String,
    },

    /// Not hex after stripping `0x`.
    #[error("{field} must be valid hex")]
    InvalidHex {
        /// Input name.
        field: String,
    },

    /// Decoded byte length is off.
    #[error("{field} must be {expected} bytes, got {actual}")]
    WrongLength {
        /// Input name.
        field: String,
        /// Required length in bytes.
        expected: usize,
        /// Decoded length in bytes.
        actual: usize,
    },

    /// Not a usable secp256k1 secret.
    #[error("{field} must be a valid ECDSA private key")]
    InvalidPrivateKey {
        /// Input name.
        field: String,
    },

    /// A path that must exist does not.
    #[error("{field} must be a valid existing file: {value}")]
    FileNotFound {
        /// Input name.
        field: String,
        /// Path as given.
        value: String,
    },

    /// Any other rule.
    #[error("{field}: {reason}")]
    Invalid {
        /// Input name.
        field: String,
        /// What is wrong.
        reason: String,
    },
}

/// All errors found in one input record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    /// True if nothing was rejected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn check(&mut self, res: Result<(), ValidationError>) {
        if let Err(e) = res {
            self.0.push(e);
        }
    }

    /// `Ok` when empty.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation error")?;
        for e in &self.0 {
            write!(f, "\n{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Workflow names: 1..=64 chars of `[A-Za-z0-9_-]`.
pub fn validate_workflow_name(name: &str) -> Result<(), ValidationError> {
    validate_name("workflow name", name, MAX_WORKFLOW_NAME_LEN)
}

fn validate_name(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty { field: field.into() });
    }
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.into(),
            max,
            len: value.len(),
        });
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(ValidationError::InvalidCharacters { field: field.into() });
    }
    Ok(())
}

/// Owner must be `0x`-prefixed 20-byte hex.
pub fn validate_owner_address(owner: &str) -> Result<OwnerAddress, ValidationError> {
    owner.parse()
}

/// Optional ASCII label with a length cap.
pub fn validate_label(field: &str, value: &str, max: usize) -> Result<(), ValidationError> {
    if !value.is_ascii() {
        return Err(ValidationError::NonAscii {
            field: field.into(),
            value: value.into(),
        });
    }
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field: field.into(),
            max,
            len: value.len(),
        });
    }
    Ok(())
}

/// Path arguments must be ASCII and at most [`MAX_PATH_LEN`] characters.
pub fn validate_path_arg(field: &str, path: &Path) -> Result<(), ValidationError> {
    let s = path.to_string_lossy();
    if s.is_empty() {
        return Err(ValidationError::Empty { field: field.into() });
    }
    validate_label(field, &s, MAX_PATH_LEN)
}

/// `ETH_PRIVATE_KEY` shape: 64 hex characters, optional `0x` prefix.
///
/// Returns the normalized key without prefix. Curve membership is checked
/// when the signer is constructed.
pub fn normalize_private_key(raw: &str) -> Result<String, ValidationError> {
    let key = raw.trim();
    let key = key.strip_prefix("0x").unwrap_or(key);
    if key.len() != 64 || !key.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ValidationError::InvalidPrivateKey {
            field: "ETH_PRIVATE_KEY".into(),
        });
    }
    if key.bytes().all(|b| b == b'0') {
        return Err(ValidationError::InvalidPrivateKey {
            field: "ETH_PRIVATE_KEY".into(),
        });
    }
    Ok(key.to_ascii_lowercase())
}

/// Decodes a `0x`-optional hex string that must be exactly 32 bytes.
pub fn parse_bytes32(field: &str, raw: &str) -> Result<[u8; 32], ValidationError> {
    let bytes = hex::decode(raw.trim_start_matches("0x")).map_err(|_| ValidationError::InvalidHex {
        field: field.into(),
    })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| ValidationError::WrongLength {
        field: field.into(),
        expected: 32,
        actual,
    })
}

/// Validates a full deploy input record, collecting every violation.
pub fn validate_deploy_inputs(inputs: &DeployInputs) -> Result<(), ValidationErrors> {
    let mut errs = ValidationErrors::default();

    errs.check(validate_workflow_name(&inputs.workflow_name));
    errs.check(validate_owner_address(&inputs.workflow_owner).map(|_| ()));
    errs.check(validate_label("workflow tag", &inputs.workflow_tag, MAX_TAG_LEN));

    if inputs.don_family.trim().is_empty() {
        errs.0.push(ValidationError::Empty {
            field: "don family".into(),
        });
    } else {
        errs.check(validate_label("don family", &inputs.don_family, MAX_TAG_LEN));
    }

    if !inputs.workflow_path.exists() {
        errs.0.push(ValidationError::FileNotFound {
            field: "workflow path".into(),
            value: inputs.workflow_path.display().to_string(),
        });
    }

    errs.check(validate_path_arg("output path", &inputs.output_path));
    if let Some(config) = &inputs.config_path {
        errs.check(validate_path_arg("config path", config));
        if !config.is_file() {
            errs.0.push(ValidationError::FileNotFound {
                field: "config path".into(),
                value: config.display().to_string(),
            });
        }
    }

    if let Some(url) = &inputs.secrets_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            errs.0.push(ValidationError::Invalid {
                field: "secrets url".into(),
                reason: format!("must be empty or a valid HTTP URL: {url}"),
            });
        }
    }

    if let Some(label) = &inputs.owner_label {
        errs.check(validate_label("owner label", label, MAX_TAG_LEN));
    }

    if let TxStrategy::HwWallet { derivation_path } = &inputs.tx_strategy {
        if derivation_path.trim().is_empty() {
            errs.0.push(ValidationError::Empty {
                field: "ledger derivation path".into(),
            });
        }
    }

    errs.into_result()
}
