//! Deploy orchestrator: validate, build, hash, link, check, upload, register.
//!
//! Steps run strictly in order and each one is safe to replay. A failure is
//! reported with the name of the step that produced it.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context as _};
use tracing::{debug, info};

use wfctl_build::BuildDriver;
use wfctl_core::artifact::{build_artifact, verify_artifact, ArtifactInput};
use wfctl_core::framing::ensure_output_extensions;
use wfctl_core::model::{
    build_attributes, Artifact, DeployInputs, OwnerAddress, RegisterWorkflowParams, TxStrategy,
    WorkflowId, WorkflowStatus,
};
use wfctl_core::settings::ProjectSettings;
use wfctl_core::validation::validate_deploy_inputs;
use wfctl_registry::{hash_key, TxError, TxOutput};
use wfctl_service::ArtifactType;

use crate::cli::{BuildArgs, DeployArgs};
use crate::context::CommandContext;
use crate::limits::check_don_limit;
use crate::link::{LinkMachine, LinkOutcome};
use crate::output::print_tx_output;

const BINARY_CONTENT_TYPE: &str = "application/octet-stream";
const CONFIG_CONTENT_TYPE: &str = "text/plain";

fn step(name: &str) -> String {
    format!("deploy step '{name}' failed")
}

/// Where the workflow comes from and where its framed binary goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPlan {
    pub name: String,
    pub workflow_path: PathBuf,
    pub output_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub secrets_url: Option<String>,
}

impl BuildPlan {
    /// Merges build flags with the project settings. Flags win.
    pub fn resolve(args: &BuildArgs, settings: &ProjectSettings) -> anyhow::Result<Self> {
        let name = args
            .name
            .clone()
            .or_else(|| settings.workflow_name.clone())
            .context("workflow name is not set; pass it as an argument or set workflow_name")?;
        let workflow_path = args
            .workflow_path
            .clone()
            .or_else(|| settings.workflow_path.clone())
            .context("workflow path is not set; pass --workflow-path or set workflow_path")?;
        let config_path = match (&args.config_path, args.include_config) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(
                settings
                    .config_path
                    .clone()
                    .context("--config given but config_path is not set in the project settings")?,
            ),
            (None, false) => None,
        };
        Ok(Self {
            name,
            workflow_path,
            output_path: args.output.clone(),
            config_path,
            secrets_url: args.secrets_url.clone().filter(|u| !u.is_empty()),
        })
    }

    /// Compiles and frames the workflow, or reuses the framed file already on disk.
    pub async fn framed_binary(&self, driver: &BuildDriver, skip_build: bool) -> anyhow::Result<PathBuf> {
        if skip_build {
            let path = ensure_output_extensions(&self.output_path);
            if !path.is_file() {
                bail!("framed binary {} does not exist; build it first", path.display());
            }
            return Ok(path);
        }
        Ok(driver.build_framed(&self.workflow_path, &self.output_path).await?)
    }

    /// Reads the framed binary at `framed` and derives the workflow ID, then
    /// checks the ID against an independent recomputation.
    pub fn artifact(&self, owner: &OwnerAddress, framed: &Path) -> anyhow::Result<Artifact> {
        let owner = owner.to_string();
        let input = ArtifactInput {
            owner: &owner,
            name: &self.name,
            output_path: framed,
            config_path: self.config_path.as_deref(),
            secrets_url: self.secrets_url.as_deref(),
        };
        let artifact = build_artifact(&input)?;
        verify_artifact(&input, &artifact)?;
        Ok(artifact)
    }
}

/// How a deploy ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Registered {
        workflow_id: WorkflowId,
        binary_url: String,
        config_url: String,
        output: TxOutput,
    },
    /// The owner link is waiting on an external signature.
    Halted { workflow_id: WorkflowId },
    /// The user declined to update an existing workflow.
    Cancelled { workflow_id: WorkflowId },
}

fn deploy_inputs(ctx: &CommandContext, args: &DeployArgs, plan: &BuildPlan) -> DeployInputs {
    DeployInputs {
        workflow_name: plan.name.clone(),
        workflow_owner: ctx.owner.to_string(),
        workflow_tag: args.tag.clone(),
        don_family: ctx.don_family(args.don_family.as_deref()),
        workflow_path: plan.workflow_path.clone(),
        config_path: plan.config_path.clone(),
        output_path: plan.output_path.clone(),
        secrets_url: plan.secrets_url.clone(),
        auto_start: args.auto_start,
        keep_alive: args.keep_alive,
        tx_strategy: ctx.registry.strategy().clone(),
        owner_type: ctx.owner_type,
        owner_label: args.owner_label.clone(),
        skip_confirmation: ctx.skip_confirmation,
        confidential: args.confidential,
        vault_don_secrets: args.vault_don_secrets.clone(),
    }
}

/// Runs the whole pipeline.
pub async fn deploy(ctx: &CommandContext, args: &DeployArgs) -> anyhow::Result<DeployOutcome> {
    let plan = BuildPlan::resolve(&args.build, &ctx.settings).with_context(|| step("validate"))?;
    let inputs = deploy_inputs(ctx, args, &plan);
    validate_deploy_inputs(&inputs).with_context(|| step("validate"))?;
    if matches!(inputs.tx_strategy, TxStrategy::HwWallet { .. }) {
        return Err(TxError::HardwareWalletUnsupported).with_context(|| step("validate"));
    }
    let tag = inputs.effective_tag().to_string();
    info!(name = %inputs.workflow_name, tag = %tag, don_family = %inputs.don_family, "deploying workflow");

    let framed = plan
        .framed_binary(&ctx.driver, false)
        .await
        .with_context(|| step("build"))?;
    println!("Workflow compiled: {}", framed.display());

    let artifact = plan
        .artifact(&ctx.owner, &framed)
        .with_context(|| step("artifact"))?;
    let workflow_id = artifact.workflow_id;
    println!("Workflow ID: {workflow_id}");
    debug!(key = %hash_key(&ctx.owner, &inputs.workflow_name), "registry key");

    let linked = LinkMachine::new(&ctx.registry, &ctx.linking, ctx.owner, ctx.owner_type)
        .with_label(inputs.owner_label.clone().unwrap_or_default())
        .with_poll(ctx.poll)
        .with_work_dir(&ctx.work_dir)
        .ensure_linked()
        .await
        .with_context(|| step("link"))?;
    if linked == LinkOutcome::Halted {
        return Ok(DeployOutcome::Halted { workflow_id });
    }

    let existing = ctx
        .registry
        .get_workflow(&ctx.owner, &inputs.workflow_name, &tag)
        .await
        .with_context(|| step("check"))?;
    match existing {
        Some(current) => {
            println!("Workflow {} already exists, this will update it", inputs.workflow_name);
            debug!(current = %current.workflow_id, "existing workflow version");
            if !ctx
                .confirm("Are you sure you want to overwrite the workflow?")
                .with_context(|| step("check"))?
            {
                println!("Deployment cancelled");
                return Ok(DeployOutcome::Cancelled { workflow_id });
            }
        }
        None => {
            let replaced = (!inputs.keep_alive).then_some(inputs.workflow_name.as_str());
            check_don_limit(&ctx.registry, &ctx.owner, &inputs.don_family, replaced)
                .await
                .with_context(|| step("check"))?;
        }
    }

    let storage = ctx.storage().with_context(|| step("upload"))?;
    let id_hex = workflow_id.to_hex();
    let binary = storage
        .upload_artifact(&id_hex, ArtifactType::Binary, &artifact.binary_framed, BINARY_CONTENT_TYPE)
        .await
        .with_context(|| step("upload"))?;
    println!("Binary uploaded: {}", binary.url);
    let config_url = match artifact.config.as_deref() {
        Some(config) if !config.is_empty() => {
            let uploaded = storage
                .upload_artifact(&id_hex, ArtifactType::Config, config, CONFIG_CONTENT_TYPE)
                .await
                .with_context(|| step("upload"))?;
            println!("Config uploaded: {}", uploaded.url);
            uploaded.url
        }
        _ => String::new(),
    };

    let params = RegisterWorkflowParams {
        name: inputs.workflow_name.clone(),
        tag,
        workflow_id,
        status: WorkflowStatus::initial(inputs.auto_start),
        don_family: inputs.don_family.clone(),
        binary_url: binary.url.clone(),
        config_url: config_url.clone(),
        attributes: build_attributes(inputs.confidential, &inputs.vault_don_secrets)
            .with_context(|| step("register"))?,
        keep_alive: inputs.keep_alive,
    };
    let output = ctx
        .registry
        .upsert_workflow(&params)
        .await
        .with_context(|| step("register"))?;
    print_tx_output(&ctx.env, &output, "Workflow deployment");
    if output.tx_hash().is_some() {
        println!("Details:");
        println!("   Workflow Name: {}", params.name);
        println!("   Workflow ID:   {workflow_id}");
        println!("   Binary URL:    {}", params.binary_url);
        if !params.config_url.is_empty() {
            println!("   Config URL:    {}", params.config_url);
        }
    }

    Ok(DeployOutcome::Registered {
        workflow_id,
        binary_url: binary.url,
        config_url,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(name: Option<&str>, include_config: bool) -> BuildArgs {
        BuildArgs {
            name: name.map(str::to_string),
            workflow_path: None,
            include_config,
            config_path: None,
            output: PathBuf::from("./binary.wasm.br.b64"),
            secrets_url: Some(String::new()),
        }
    }

    fn settings() -> ProjectSettings {
        ProjectSettings {
            workflow_name: Some("from_settings".into()),
            workflow_path: Some(PathBuf::from("wf/main.go")),
            config_path: Some(PathBuf::from("wf/config.yml")),
            ..ProjectSettings::default()
        }
    }

    #[test]
    fn flags_win_over_settings() {
        let plan = BuildPlan::resolve(&args(Some("flagged"), false), &settings()).unwrap();
        assert_eq!(plan.name, "flagged");
        assert_eq!(plan.workflow_path, PathBuf::from("wf/main.go"));
        assert_eq!(plan.config_path, None);
        assert_eq!(plan.secrets_url, None);
    }

    #[test]
    fn config_flag_pulls_settings_path() {
        let plan = BuildPlan::resolve(&args(None, true), &settings()).unwrap();
        assert_eq!(plan.name, "from_settings");
        assert_eq!(plan.config_path, Some(PathBuf::from("wf/config.yml")));
    }

    #[test]
    fn missing_workflow_path_is_reported() {
        let err = BuildPlan::resolve(&args(Some("x"), false), &ProjectSettings::default()).unwrap_err();
        assert!(err.to_string().contains("workflow path is not set"));
    }

    #[tokio::test]
    async fn skip_build_requires_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = BuildPlan::resolve(&args(Some("x"), false), &settings()).unwrap();
        plan.output_path = dir.path().join("out");
        let err = plan
            .framed_binary(&BuildDriver::with_search_path(""), true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out.wasm.br.b64 does not exist"));
    }

    #[test]
    fn step_names_are_quoted() {
        assert_eq!(step("upload"), "deploy step 'upload' failed");
    }
}
