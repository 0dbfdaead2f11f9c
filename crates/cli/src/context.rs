//! Everything a command needs, resolved once from flags, env and settings.

use std::path::PathBuf;
use std::sync::Arc;

use alloy::primitives::Address;
use anyhow::Context as _;
use tracing::{debug, info};

use wfctl_build::BuildDriver;
use wfctl_core::model::{OwnerAddress, OwnerType};
use wfctl_core::secret::Secret;
use wfctl_core::settings::{
    Credentials, EnvironmentSet, ProjectSettings, ENV_VAR_ENV, ENV_VAR_PRIVATE_KEY,
};
use wfctl_core::validation::validate_owner_address;
use wfctl_registry::{signer_from_key, AlloyBackend, RegistryClient};
use wfctl_service::{GraphQlClient, LinkingClient, RetryPolicy, StorageClient};

use crate::cli::GlobalArgs;
use crate::link::PollPolicy;
use crate::prompt::{Prompter, PrompterConfirm, TerminalPrompter};

/// Owner address and custody from the flags, falling back to the project settings.
pub fn resolve_owner(
    global: &GlobalArgs,
    settings: &ProjectSettings,
) -> anyhow::Result<(OwnerAddress, OwnerType)> {
    let raw = global
        .owner
        .clone()
        .or_else(|| settings.workflow_owner_address.clone())
        .context("workflow owner address is not set; pass --owner or set workflow_owner_address")?;
    let owner = validate_owner_address(&raw)?;
    let owner_type = global
        .owner_type
        .map(OwnerType::from)
        .unwrap_or(settings.workflow_owner_type);
    Ok((owner, owner_type))
}

/// Settings, environment and service client. No chain access.
pub struct Session {
    pub settings: ProjectSettings,
    pub env: EnvironmentSet,
    pub gql: GraphQlClient,
}

impl Session {
    pub fn load(global: &GlobalArgs) -> anyhow::Result<Self> {
        let settings = ProjectSettings::load_or_default(&global.project_settings)
            .context("failed to load project settings")?;

        // --env beats WFCTL_ENV, which beats the settings file.
        let flag_env = global.environment.as_deref();
        let env = EnvironmentSet::resolve_with(flag_env.or(settings.environment.as_deref()), |k| {
            if k == ENV_VAR_ENV && flag_env.is_some() {
                None
            } else {
                std::env::var(k).ok()
            }
        })
        .context("failed to resolve environment")?;
        debug!(environment = %env.name, registry = %env.workflow_registry_address, "environment resolved");

        let credentials = match Credentials::load_default() {
            Ok(c) => Some(c),
            Err(e) => {
                debug!(error = %e, "no service credentials");
                None
            }
        };
        let gql = GraphQlClient::new(
            env.graphql_url.clone(),
            credentials,
            settings.storage.service_timeout(),
        )?;
        Ok(Self { settings, env, gql })
    }
}

/// Resolved configuration and clients for one command invocation.
pub struct CommandContext {
    pub env: EnvironmentSet,
    pub settings: ProjectSettings,
    pub owner: OwnerAddress,
    pub owner_type: OwnerType,
    pub registry: RegistryClient,
    pub gql: GraphQlClient,
    pub linking: LinkingClient,
    pub prompter: Arc<dyn Prompter>,
    pub skip_confirmation: bool,
    pub poll: PollPolicy,
    pub upload_retry: RetryPolicy,
    pub driver: BuildDriver,
    /// Where linking responses are written.
    pub work_dir: PathBuf,
}

impl CommandContext {
    /// Loads settings, resolves the environment and prepares the chain client.
    /// No RPC request is made until a command first needs the chain.
    pub async fn connect(global: &GlobalArgs) -> anyhow::Result<Self> {
        let Session { settings, env, gql } = Session::load(global)?;
        let (owner, owner_type) = resolve_owner(global, &settings)?;

        let rpc_url = settings.rpc_url(env.workflow_registry_chain_selector)?;
        let signer = match std::env::var(ENV_VAR_PRIVATE_KEY) {
            Ok(raw) if !raw.is_empty() => Some(signer_from_key(&Secret::new(raw))?),
            _ => None,
        };
        if signer.is_none() {
            info!("{ENV_VAR_PRIVATE_KEY} not set; registry client is read-only");
        }
        let backend = AlloyBackend::new(
            &rpc_url,
            signer,
            settings.chain.rpc_timeout(),
            settings.chain.receipt_timeout(),
        )
        .with_context(|| format!("failed to set up RPC for chain {}", env.workflow_registry_chain_name))?;

        let contract: Address = env
            .workflow_registry_address
            .parse()
            .with_context(|| format!("invalid registry address {}", env.workflow_registry_address))?;

        let prompter: Arc<dyn Prompter> = Arc::new(TerminalPrompter);
        let registry = RegistryClient::new(Arc::new(backend), contract, global.tx_strategy(owner_type))
            .with_chain_name(env.workflow_registry_chain_name.clone())
            .with_confirm(
                Arc::new(PrompterConfirm(prompter.clone())),
                global.skip_confirmation,
            );

        Ok(Self {
            env,
            settings,
            owner,
            owner_type,
            registry,
            linking: LinkingClient::new(gql.clone()),
            gql,
            prompter,
            skip_confirmation: global.skip_confirmation,
            poll: PollPolicy::default(),
            upload_retry: RetryPolicy::default(),
            driver: BuildDriver::new(),
            work_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        })
    }

    /// Blob uploader bound to this owner and registry.
    pub fn storage(&self) -> anyhow::Result<StorageClient> {
        Ok(StorageClient::new(
            self.gql.clone(),
            self.env.workflow_registry_address.clone(),
            self.owner.to_string(),
            self.env.workflow_registry_chain_selector,
            self.settings.storage.http_timeout(),
        )?
        .with_retry(self.upload_retry))
    }

    /// Workflow name from the argument or the project settings.
    pub fn workflow_name(&self, arg: Option<&str>) -> anyhow::Result<String> {
        arg.map(str::to_string)
            .or_else(|| self.settings.workflow_name.clone())
            .context("workflow name is not set; pass it as an argument or set workflow_name")
    }

    /// DON family from the flag, the project, or the environment default.
    pub fn don_family(&self, arg: Option<&str>) -> String {
        arg.map(str::to_string)
            .or_else(|| self.settings.don_family.clone())
            .unwrap_or_else(|| self.env.default_don_family.clone())
    }

    /// Asks for confirmation unless prompts are skipped.
    pub fn confirm(&self, prompt: &str) -> anyhow::Result<bool> {
        if self.skip_confirmation {
            return Ok(true);
        }
        self.prompter.confirm(prompt).context("confirmation prompt failed")
    }
}
