use thiserror::Error;

use crate::storage::ArtifactType;

/// Failure talking to the GraphQL service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("credentials not provided")]
    NotLoggedIn,

    #[error("invalid {what}: {reason}")]
    InvalidRequest { what: &'static str, reason: String },

    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("graphql: {}", .0.join("; "))]
    GraphQl(Vec<String>),

    #[error("decoding response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("service response is missing {0}")]
    MissingData(&'static str),
}

impl ServiceError {
    /// True when the service reports the content is already stored.
    pub fn is_already_exists(&self) -> bool {
        self.to_string().contains("already exists")
    }

    /// False for failures another attempt cannot fix.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NotLoggedIn
                | Self::InvalidRequest { .. }
                | Self::Status {
                    status: 401 | 403,
                    ..
                }
        )
    }
}

/// Failure in the presign → upload → resolve pipeline.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("workflowID is empty")]
    EmptyWorkflowId,

    #[error("content is empty for artifactType {0}")]
    EmptyContent(ArtifactType),

    #[error("generate presigned post url: {0}")]
    Presign(#[source] ServiceError),

    #[error("upload to origin: expected status 204 or 201, got {status}: {body}")]
    OriginStatus { status: u16, body: String },

    #[error("upload to origin: {0}")]
    OriginHttp(#[source] reqwest::Error),

    #[error("generate unsigned get url: {0}")]
    Resolve(#[source] ServiceError),
}
