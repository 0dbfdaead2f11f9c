//! Project settings, embedded environment table, and service credentials.
//!
//! Precedence: CLI flags (applied by the command layer) > environment
//! variables > project settings file > embedded environment defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::OwnerType;
use crate::secret::Secret;

/// Selects the embedded environment.
pub const ENV_VAR_ENV: &str = "WFCTL_ENV";
/// Overrides the GraphQL endpoint.
pub const ENV_VAR_GRAPHQL_URL: &str = "WFCTL_GRAPHQL_URL";
/// Overrides the registry contract address.
pub const ENV_VAR_REGISTRY_ADDRESS: &str = "WFCTL_WORKFLOW_REGISTRY_ADDRESS";
/// Overrides the registry chain selector.
pub const ENV_VAR_REGISTRY_CHAIN_SELECTOR: &str = "WFCTL_WORKFLOW_REGISTRY_CHAIN_SELECTOR";
/// RPC URL that wins over the settings file.
pub const ENV_VAR_RPC_URL: &str = "WFCTL_RPC_URL";
/// Service API key.
pub const ENV_VAR_API_KEY: &str = "WFCTL_API_KEY";
/// Service bearer token.
pub const ENV_VAR_ACCESS_TOKEN: &str = "WFCTL_ACCESS_TOKEN";
/// Hex ECDSA key used to sign transactions.
pub const ENV_VAR_PRIVATE_KEY: &str = "ETH_PRIVATE_KEY";

/// Environment used when none is selected.
pub const DEFAULT_ENV: &str = "local";
/// Project settings file name.
pub const DEFAULT_SETTINGS_FILE: &str = "project.yaml";
/// Directory under home holding credentials.
pub const CREDENTIALS_DIR: &str = ".wfctl";
/// Credentials file name.
pub const CREDENTIALS_FILE: &str = "credentials.yaml";

const DEFAULT_SERVICE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(300);

const EMBEDDED_ENVIRONMENTS: &str = include_str!("environments.yaml");

/// Failure loading settings, environments or credentials.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A settings file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A settings file is not valid YAML for its schema.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// File that failed.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: serde_yaml::Error,
    },

    /// No such entry in the embedded table.
    #[error("unknown environment '{0}'")]
    UnknownEnvironment(String),

    /// An environment override did not parse.
    #[error("invalid value for {var}: {value}")]
    InvalidOverride {
        /// Variable name.
        var: &'static str,
        /// Rejected value.
        value: String,
    },

    /// Neither a key, a token nor a credentials file was found.
    #[error("you are not logged in; set WFCTL_API_KEY or WFCTL_ACCESS_TOKEN")]
    NotLoggedIn,

    /// No RPC endpoint for the registry chain.
    #[error("no RPC URL configured for chain selector {0}")]
    MissingRpc(u64),
}

/// RPC endpoint for one chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcEndpoint {
    /// Chain the endpoint serves.
    pub chain_selector: u64,
/// JSON-RPC URL.
    pub url: String,
}

/// Blob uploader timeouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageSettings {
    #[serde(default)]
    /// GraphQL call budget in seconds.
    pub service_timeout_secs: Option<u64>,
    #[serde(default)]
    /// Blob POST budget in seconds.
    pub http_timeout_secs: Option<u64>,
}

impl StorageSettings {
    /// Budget for each GraphQL call. Defaults to 2 minutes.
    pub fn service_timeout(&self) -> Duration {
        self.service_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SERVICE_TIMEOUT)
    }

    /// Budget for the direct blob POST. Defaults to 1 minute.
    pub fn http_timeout(&self) -> Duration {
        self.http_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT)
    }
}

/// Chain RPC timeouts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainSettings {
    #[serde(default)]
    /// Per-request RPC budget in seconds.
    pub rpc_timeout_secs: Option<u64>,
    #[serde(default)]
    /// Receipt wait budget in seconds.
    pub receipt_timeout_secs: Option<u64>,
}

impl ChainSettings {
    /// Budget for a single JSON-RPC request. Defaults to 30 seconds.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RPC_TIMEOUT)
    }

    /// How long a broadcast waits to be mined. Defaults to 5 minutes.
    pub fn receipt_timeout(&self) -> Duration {
        self.receipt_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RECEIPT_TIMEOUT)
    }
}

/// Contents of `project.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    /// Embedded environment name.
    pub environment: Option<String>,
    #[serde(default)]
    /// Default owner address.
    pub workflow_owner_address: Option<String>,
    #[serde(default)]
    /// Owner custody model.
    pub workflow_owner_type: OwnerType,
    #[serde(default)]
    /// Default workflow name.
    pub workflow_name: Option<String>,
    #[serde(default)]
    /// Default main source file.
    pub workflow_path: Option<PathBuf>,
    #[serde(default)]
    /// Default config file.
    pub config_path: Option<PathBuf>,
    #[serde(default)]
    /// Default DON family.
    pub don_family: Option<String>,
    #[serde(default)]
    /// RPC endpoints by chain selector.
    pub rpcs: Vec<RpcEndpoint>,
    #[serde(default)]
    /// Blob uploader timeouts.
    pub storage: StorageSettings,
    #[serde(default)]
    /// Chain client timeouts.
    pub chain: ChainSettings,
}

impl ProjectSettings {
    /// Parses the YAML file at `path`.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let s = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&s).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`Self::load_from`], but a missing file yields defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if path.exists() {
            Self::load_from(path)
        } else {
            tracing::debug!(path = %path.display(), "no project settings file; using defaults");
            Ok(Self::default())
        }
    }

    /// RPC URL for `chain_selector`; `WFCTL_RPC_URL` wins when set.
    pub fn rpc_url(&self, chain_selector: u64) -> Result<String, SettingsError> {
        self.rpc_url_with(chain_selector, |k| std::env::var(k).ok())
    }

    /// [`Self::rpc_url`] with an explicit env lookup.
    pub fn rpc_url_with(
        &self,
        chain_selector: u64,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<String, SettingsError> {
        if let Some(url) = lookup(ENV_VAR_RPC_URL).filter(|u| !u.is_empty()) {
            return Ok(url);
        }
        self.rpcs
            .iter()
            .find(|r| r.chain_selector == chain_selector)
            .map(|r| r.url.clone())
            .ok_or(SettingsError::MissingRpc(chain_selector))
    }
}

/// Remote endpoints and registry coordinates for one deployment environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvironmentSet {
/// Table key; filled in on load.
    #[serde(default)]
    pub name: String,
    /// Service GraphQL endpoint.
    pub graphql_url: String,
    /// Registry contract address.
    pub workflow_registry_address: String,
    /// Chain selector of the registry chain.
    pub workflow_registry_chain_selector: u64,
    /// Human name of the registry chain.
    pub workflow_registry_chain_name: String,
    /// Block explorer base URL.
    pub explorer_url: String,
    /// DON family used when none is configured.
    pub default_don_family: String,
}

#[derive(Deserialize)]
struct EnvironmentFile {
    environments: BTreeMap<String, EnvironmentSet>,
}

impl EnvironmentSet {
    /// Loads a named entry from the embedded table.
    pub fn embedded(name: &str) -> Result<Self, SettingsError> {
        let file: EnvironmentFile =
            serde_yaml::from_str(EMBEDDED_ENVIRONMENTS).map_err(|source| SettingsError::Parse {
                path: PathBuf::from("<embedded environments.yaml>"),
                source,
            })?;
        let mut set = file
            .environments
            .get(name)
            .cloned()
            .ok_or_else(|| SettingsError::UnknownEnvironment(name.to_string()))?;
        set.name = name.to_string();
        Ok(set)
    }

    /// Resolves the environment from process env vars, falling back to `preferred`.
    pub fn resolve(preferred: Option<&str>) -> Result<Self, SettingsError> {
        Self::resolve_with(preferred, |k| std::env::var(k).ok())
    }

    /// [`Self::resolve`] with an explicit env lookup.
    pub fn resolve_with(
        preferred: Option<&str>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        let name = lookup(ENV_VAR_ENV)
            .filter(|v| !v.is_empty())
            .or_else(|| preferred.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_ENV.to_string());
        let mut set = Self::embedded(&name.to_ascii_lowercase())?;

        if let Some(v) = lookup(ENV_VAR_GRAPHQL_URL).filter(|v| !v.is_empty()) {
            set.graphql_url = v;
        }
        if let Some(v) = lookup(ENV_VAR_REGISTRY_ADDRESS).filter(|v| !v.is_empty()) {
            set.workflow_registry_address = v;
        }
        if let Some(v) = lookup(ENV_VAR_REGISTRY_CHAIN_SELECTOR).filter(|v| !v.is_empty()) {
            set.workflow_registry_chain_selector =
                v.parse().map_err(|_| SettingsError::InvalidOverride {
                    var: ENV_VAR_REGISTRY_CHAIN_SELECTOR,
                    value: v.clone(),
                })?;
        }
        Ok(set)
    }

    /// Explorer link for a transaction hash.
    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.explorer_url.trim_end_matches('/'), tx_hash)
    }
}

/// How requests to the remote service are authorized.
#[derive(Debug, Clone)]
pub enum Credentials {
/// `Authorization: Apikey <key>`.
    ApiKey(Secret<String>),
/// `Authorization: Bearer <token>`.
    Bearer(Secret<String>),
}

#[derive(Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    api_key: Option<Secret<String>>,
    #[serde(default)]
    access_token: Option<Secret<String>>,
}

/// Home directory holding `.wfctl/credentials.yaml`.
pub fn credentials_home() -> Option<PathBuf> {
    dirs::home_dir()
}

impl Credentials {
    /// Env vars first, then `~/.wfctl/credentials.yaml`.
    pub fn load(home: Option<&Path>) -> Result<Self, SettingsError> {
        Self::load_with(home, |k| std::env::var(k).ok())
    }

    /// [`Self::load`] against the user's home directory.
    pub fn load_default() -> Result<Self, SettingsError> {
        Self::load(credentials_home().as_deref())
    }

/// [`Self::load`] with an explicit env lookup.
    pub fn load_with(
        home: Option<&Path>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, SettingsError> {
        if let Some(key) = lookup(ENV_VAR_API_KEY).filter(|v| !v.is_empty()) {
            return Ok(Self::ApiKey(Secret::new(key)));
        }
        if let Some(token) = lookup(ENV_VAR_ACCESS_TOKEN).filter(|v| !v.is_empty()) {
            return Ok(Self::Bearer(Secret::new(token)));
        }

        let home = home.ok_or(SettingsError::NotLoggedIn)?;
        let path = home.join(CREDENTIALS_DIR).join(CREDENTIALS_FILE);
        if !path.exists() {
            return Err(SettingsError::NotLoggedIn);
        }
        let raw = std::fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;
        let file: CredentialsFile =
            serde_yaml::from_str(&raw).map_err(|source| SettingsError::Parse { path, source })?;
        match (file.api_key, file.access_token) {
            (Some(k), _) if !k.is_empty() => Ok(Self::ApiKey(k)),
            (_, Some(t)) if !t.is_empty() => Ok(Self::Bearer(t)),
            _ => Err(SettingsError::NotLoggedIn),
        }
    }

    /// `Authorization` header value.
    pub fn authorization(&self) -> String {
        match self {
            Self::ApiKey(k) => format!("Apikey {}", k.expose()),
            Self::Bearer(t) => format!("Bearer {}", t.expose()),
        }
    }
}
