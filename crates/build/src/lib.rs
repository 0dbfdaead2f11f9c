#![forbid(unsafe_code)]

//! Workflow build driver.
//!
//! Turns a workflow main file into raw WASM by shelling out to the host
//! language toolchain, then frames it to disk.

pub mod driver;
pub mod language;
pub mod runner;

pub use driver::{BuildDriver, BuildError};
pub use language::detect_language;
