//! Command-line surface.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use wfctl_core::model::{OwnerType, TxStrategy};
use wfctl_core::settings::DEFAULT_SETTINGS_FILE;

#[derive(Parser, Debug)]
#[command(name = "wfctl", version, about = "Build, deploy and manage registry workflows")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub cmd: Command,
}

/// Flags shared by every command.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Project settings file.
    #[arg(long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    pub project_settings: PathBuf,

    /// Environment from the embedded table (overrides WFCTL_ENV).
    #[arg(long = "env", global = true)]
    pub environment: Option<String>,

    /// Log level (env-filter syntax).
    #[arg(long, global = true, default_value = "info")]
    pub log: String,

    /// Shorthand for `--log debug`.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Workflow owner address; defaults to the project settings.
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Custody model of the owner address.
    #[arg(long, global = true, value_enum)]
    pub owner_type: Option<OwnerKind>,

    /// Emit raw calldata instead of broadcasting.
    #[arg(long, global = true)]
    pub unsigned: bool,

    /// Sign with a hardware wallet.
    #[arg(long, global = true, conflicts_with = "unsigned")]
    pub ledger: bool,

    /// BIP-32 path used with `--ledger`.
    #[arg(long, global = true, default_value = "m/44'/60'/0'/0/0")]
    pub ledger_derivation_path: String,

    /// Bypass interactive prompts.
    #[arg(long, global = true)]
    pub skip_confirmation: bool,
}

impl GlobalArgs {
    /// Filter directive for the log subscriber.
    pub fn log_filter(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.log
        }
    }

    /// Submission strategy implied by the flags and owner custody.
    pub fn tx_strategy(&self, owner_type: OwnerType) -> TxStrategy {
        if self.ledger {
            TxStrategy::HwWallet {
                derivation_path: self.ledger_derivation_path.clone(),
            }
        } else if self.unsigned || owner_type == OwnerType::Msig {
            TxStrategy::RawCalldata
        } else {
            TxStrategy::SignSend
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Eoa,
    Msig,
}

impl From<OwnerKind> for OwnerType {
    fn from(kind: OwnerKind) -> Self {
        match kind {
            OwnerKind::Eoa => OwnerType::Eoa,
            OwnerKind::Msig => OwnerType::Msig,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage workflows.
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Manage owner keys linked to the registry.
    #[command(subcommand)]
    Account(AccountCommand),
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Build, upload and register a workflow.
    Deploy(DeployArgs),
    /// Activate the most recent version of a workflow.
    Activate(TargetArgs),
    /// Pause every version of a workflow.
    Pause(TargetArgs),
    /// Delete every version of a workflow.
    Delete(TargetArgs),
    /// Print the workflow ID deploy would register.
    GenerateId(GenerateIdArgs),
}

#[derive(Subcommand, Debug)]
pub enum AccountCommand {
    /// Link the owner address to the registry.
    LinkKey {
        /// Label stored with the link; prompted for when absent.
        #[arg(long)]
        owner_label: Option<String>,
    },
    /// Unlink the owner address.
    UnlinkKey {
        /// 1 = none, 2 = remove workflows, 3 = pause workflows.
        #[arg(long)]
        action_id: Option<u32>,
    },
    /// List owner addresses linked to your organization.
    ListKey,
}

/// Build inputs shared by `deploy` and `generate-id`.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Workflow name; defaults to the project settings.
    pub name: Option<String>,

    /// Workflow main file.
    #[arg(short = 'w', long)]
    pub workflow_path: Option<PathBuf>,

    /// Include the configured workflow config file.
    #[arg(short = 'c', long = "config")]
    pub include_config: bool,

    /// Config file; implies `--config`.
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Framed binary output path.
    #[arg(short, long, default_value = "./binary.wasm.br.b64")]
    pub output: PathBuf,

    /// Secrets URL bound into the workflow ID.
    #[arg(short, long)]
    pub secrets_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DeployArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    /// Registry tag; defaults to the workflow name.
    #[arg(long, default_value = "")]
    pub tag: String,

    /// Target DON family; defaults to the project or environment setting.
    #[arg(long)]
    pub don_family: Option<String>,

    /// Register as active (true) or paused (false).
    #[arg(short = 'r', long, default_value_t = true, action = ArgAction::Set)]
    pub auto_start: bool,

    /// Keep earlier versions with the same owner and name running.
    #[arg(short = 'k', long)]
    pub keep_alive: bool,

    /// Mark the workflow for confidential execution.
    #[arg(long)]
    pub confidential: bool,

    /// Vault DON secrets as `key[:namespace]`.
    #[arg(long, value_delimiter = ',')]
    pub vault_don_secrets: Vec<String>,

    /// Label used if the owner has to be linked first.
    #[arg(long)]
    pub owner_label: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Workflow name; defaults to the project settings.
    pub name: Option<String>,

    /// DON family to activate on; defaults to the workflow's own.
    #[arg(long)]
    pub don_family: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct GenerateIdArgs {
    #[command(flatten)]
    pub build: BuildArgs,

    /// Hash the existing output file instead of building.
    #[arg(long)]
    pub skip_build: bool,
}
