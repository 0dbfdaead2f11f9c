#![forbid(unsafe_code)]

//! Workflow registry contract client.
//!
//! Calls are encoded with the `sol!` bindings in [`abi`], submitted through a
//! [`ChainBackend`], and reconciled against the events the contract is
//! expected to emit. [`RegistryClient`] is the only place that branches on the
//! transaction strategy.

pub mod abi;
pub mod chain;
pub mod client;
pub mod error;
pub mod paging;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;


pub use chain::{signer_from_key, AlloyBackend, ChainBackend, ChainError, LogEntry, TxReceipt};
pub use client::{hash_key, Confirm, RegistryClient, TxOutput};
pub use error::TxError;
