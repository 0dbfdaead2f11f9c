use std::fmt;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};
use wfctl_core::hashing::content_md5_base64;

use crate::error::{ServiceError, UploadError};
use crate::graphql::GraphQlClient;
use crate::retry::{retry, retry_if, RetryPolicy};

const PRESIGN_MUTATION: &str = r#"
mutation GeneratePresignedPostUrlForArtifact($artifact: GeneratePresignedPostUrlRequest!) {
  generatePresignedPostUrlForArtifact(artifact: $artifact) {
    presignedPostUrl
    presignedPostFields {
      key
      value
    }
  }
}"#;

const GET_URL_MUTATION: &str = r#"
mutation GenerateUnsignedGetUrlForArtifact($artifact: GenerateUnsignedGetUrlRequest!) {
  generateUnsignedGetUrlForArtifact(artifact: $artifact) {
    unsignedGetUrl
  }
}"#;

/// Which part of a workflow an upload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactType {
    Binary,
    Config,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary => f.write_str("BINARY"),
            Self::Config => f.write_str("CONFIG"),
        }
    }
}

/// One presigned form field. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresignedField {
    pub key: String,
    pub value: String,
}

/// Presigned POST target returned by the service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedPost {
    pub presigned_post_url: String,
    #[serde(default)]
    pub presigned_post_fields: Vec<PresignedField>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresignData {
    generate_presigned_post_url_for_artifact: PresignedPost,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUrlData {
    generate_unsigned_get_url_for_artifact: GetUrl,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUrl {
    unsigned_get_url: String,
}

/// Result of [`StorageClient::upload_artifact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Durable unsigned GET URL.
    pub url: String,
    /// False when the service already held this content.
    pub uploaded: bool,
}

/// Uploads workflow artifacts through the service's presigned-URL protocol.
#[derive(Debug, Clone)]
pub struct StorageClient {
    gql: GraphQlClient,
    http: reqwest::Client,
    registry_address: String,
    owner_address: String,
    chain_selector: u64,
    retry: RetryPolicy,
}

impl StorageClient {
    /// `http_timeout` bounds the direct POST to the blob store.
    pub fn new(
        gql: GraphQlClient,
        registry_address: impl Into<String>,
        owner_address: impl Into<String>,
        chain_selector: u64,
        http_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|source| ServiceError::Http {
                url: "blob store".into(),
                source,
            })?;
        Ok(Self {
            gql,
            http,
            registry_address: registry_address.into(),
            owner_address: owner_address.into(),
            chain_selector,
            retry: RetryPolicy::default(),
        })
    }

    /// Overrides the per-step retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Asks the service for a presigned POST target for `content`.
    pub async fn generate_post_url(
        &self,
        workflow_id: &str,
        artifact_type: ArtifactType,
        content: &[u8],
    ) -> Result<PresignedPost, ServiceError> {
        let vars = json!({
            "artifact": {
                "workflowId": workflow_id,
                "artifactType": artifact_type,
                "contentHash": content_md5_base64(content),
                "workflowOwnerAddress": self.owner_address,
                "workflowRegistryAddress": self.registry_address,
                "chainSelector": self.chain_selector.to_string(),
            }
        });
        let data: PresignData = self.gql.execute(PRESIGN_MUTATION, vars, None).await?;
        Ok(data.generate_presigned_post_url_for_artifact)
    }

    /// Asks the service for the durable GET URL of an uploaded artifact.
    pub async fn generate_get_url(
        &self,
        workflow_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<String, ServiceError> {
        let vars = json!({
            "artifact": {
                "workflowId": workflow_id,
                "artifactType": artifact_type,
                "workflowRegistryAddress": self.registry_address,
                "chainSelector": self.chain_selector.to_string(),
            }
        });
        let data: GetUrlData = self.gql.execute(GET_URL_MUTATION, vars, None).await?;
        Ok(data.generate_unsigned_get_url_for_artifact.unsigned_get_url)
    }

    /// POSTs `content` to a presigned target as a multipart form.
    ///
    /// Field order: presigned fields, `Content-Type`, `Content-MD5`, then the
    /// `file` part. Only 201 and 204 count as success.
    pub async fn upload_to_origin(
        &self,
        post: &PresignedPost,
        content: &[u8],
        content_type: &str,
    ) -> Result<(), UploadError> {
        debug!(url = %post.presigned_post_url, bytes = content.len(), "uploading to origin");

        let mut form = Form::new();
        for field in &post.presigned_post_fields {
            form = form.text(field.key.clone(), field.value.clone());
        }
        let file = Part::bytes(content.to_vec())
            .file_name("artifact")
            .mime_str("application/octet-stream")
            .map_err(UploadError::OriginHttp)?;
        form = form
            .text("Content-Type", content_type.to_string())
            .text("Content-MD5", content_md5_base64(content))
            .part("file", file);

        let resp = self
            .http
            .post(&post.presigned_post_url)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::OriginHttp)?;

        let status = resp.status();
        if status != StatusCode::CREATED && status != StatusCode::NO_CONTENT {
            let body = truncate_body(&resp.text().await.unwrap_or_default());
            error!(status = status.as_u16(), body = %body, "artifact upload failed");
            return Err(UploadError::OriginStatus {
                status: status.as_u16(),
                body,
            });
        }
        debug!("uploaded content to origin");
        Ok(())
    }

    /// Presign → upload → resolve, each step retried on its own.
    ///
    /// An "already exists" answer to the presign skips the upload and goes
    /// straight to resolving the URL.
    pub async fn upload_artifact(
        &self,
        workflow_id: &str,
        artifact_type: ArtifactType,
        content: &[u8],
        content_type: &str,
    ) -> Result<UploadOutcome, UploadError> {
        if workflow_id.is_empty() {
            return Err(UploadError::EmptyWorkflowId);
        }
        if content.is_empty() {
            return Err(UploadError::EmptyContent(artifact_type));
        }
        debug!(workflow_id, artifact_type = %artifact_type, "generating presigned post url");

        let presigned = retry_if(self.retry, "presign", ServiceError::is_retryable, || async {
            match self.generate_post_url(workflow_id, artifact_type, content).await {
                Ok(post) => Ok(Some(post)),
                Err(e) if e.is_already_exists() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(UploadError::Presign)?;

        let uploaded = match &presigned {
            Some(post) => {
                retry(self.retry, "upload", || self.upload_to_origin(post, content, content_type))
                    .await?;
                true
            }
            None => {
                info!(artifact_type = %artifact_type, "artifact already exists, skipping upload");
                false
            }
        };

        let url = retry_if(self.retry, "resolve", ServiceError::is_retryable, || {
            self.generate_get_url(workflow_id, artifact_type)
        })
        .await
        .map_err(UploadError::Resolve)?;

        Ok(UploadOutcome { url, uploaded })
    }
}

/// Longest slice of a rejected upload's body kept in the error.
const MAX_ERROR_BODY_CHARS: usize = 512;

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}
