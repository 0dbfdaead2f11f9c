#![forbid(unsafe_code)]

//! Client for the remote workflow service.
//!
//! The service speaks GraphQL. It hands out presigned upload URLs for
//! workflow artifacts and brokers the owner-linking handshake whose result is
//! later submitted to the registry contract.

pub mod error;
pub mod graphql;
pub mod linking;
pub mod retry;
pub mod storage;

pub use error::{ServiceError, UploadError};
pub use graphql::GraphQlClient;
pub use linking::{LinkedOwner, LinkingClient, LinkingResponse, PreUnlinkAction};
pub use retry::RetryPolicy;
pub use storage::{ArtifactType, StorageClient, UploadOutcome};
