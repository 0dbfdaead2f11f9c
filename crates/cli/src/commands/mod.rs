//! Command handlers other than `deploy`.

pub mod account;
pub mod workflow;
