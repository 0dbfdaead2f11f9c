use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use wfctl_core::settings::Credentials;

use crate::error::ServiceError;

/// Sent as `User-Agent` on every service request.
pub const CLIENT_USER_AGENT: &str = "wfctl";

#[derive(Serialize)]
struct Request<'a> {
    query: &'a str,
    variables: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct Response<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<ErrorEntry>,
}

#[derive(Deserialize)]
struct ErrorEntry {
    message: String,
}

/// Thin GraphQL-over-HTTP client with credential injection.
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    http: reqwest::Client,
    url: String,
    credentials: Option<Credentials>,
}

impl GraphQlClient {
    /// `timeout` bounds every request end to end.
    pub fn new(
        url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let url = url.into();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ServiceError::Http {
                url: url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            url,
            credentials,
        })
    }

    /// Endpoint this client posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn headers(&self, idempotency_key: Option<&str>) -> Result<HeaderMap, ServiceError> {
        let creds = self.credentials.as_ref().ok_or(ServiceError::NotLoggedIn)?;
        let invalid = |reason: String| ServiceError::InvalidRequest {
            what: "header",
            reason,
        };

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let mut auth = HeaderValue::from_str(&creds.authorization())
            .map_err(|_| invalid("credential contains characters not allowed in a header".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        if let Some(key) = idempotency_key {
            let value = HeaderValue::from_str(key).map_err(|e| invalid(e.to_string()))?;
            headers.insert("Idempotency-Key", value);
        }
        Ok(headers)
    }

    /// Executes one operation and decodes its `data` object.
    ///
    /// A non-empty `errors` array wins over any partial data.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
        idempotency_key: Option<&str>,
    ) -> Result<T, ServiceError> {
        let headers = self.headers(idempotency_key)?;
        let body = Request {
            query,
            variables: &variables,
        };

        let resp = self
            .http
            .post(&self.url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|source| ServiceError::Http {
                url: self.url.clone(),
                source,
            })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|source| ServiceError::Http {
            url: self.url.clone(),
            source,
        })?;
        debug!(status = status.as_u16(), bytes = text.len(), "graphql response");

        let parsed: Response<T> = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(_) if !status.is_success() => {
                return Err(ServiceError::Status {
                    status: status.as_u16(),
                    body: text,
                })
            }
            Err(e) => return Err(ServiceError::Decode(e)),
        };

        if !parsed.errors.is_empty() {
            return Err(ServiceError::GraphQl(
                parsed.errors.into_iter().map(|e| e.message).collect(),
            ));
        }
        if !status.is_success() {
            return Err(ServiceError::Status {
                status: status.as_u16(),
                body: text,
            });
        }
        parsed.data.ok_or(ServiceError::MissingData("data"))
    }
}
