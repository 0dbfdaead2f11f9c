#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Shared models and pure logic for the workflow registry CLI.
//!
//! Everything in this crate is deterministic and free of network I/O: the
//! data model, input validation, the workflow ID hasher, binary framing,
//! artifact assembly, secret redaction and settings loading.

/// Artifact assembly from a framed binary and config.
pub mod artifact;
/// brotli + base64 framing of WASM binaries.
pub mod framing;
/// Workflow ID and content digests.
pub mod hashing;
/// Registry and deploy data types.
pub mod model;
/// Redacting wrapper for keys and tokens.
pub mod secret;
/// Project settings, environments and credentials.
pub mod settings;
/// Input validation.
pub mod validation;

mod util;

pub use util::{new_idempotency_key, now_ms, now_unix};
