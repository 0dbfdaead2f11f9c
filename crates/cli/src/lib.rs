#![forbid(unsafe_code)]

//! `wfctl`: build, deploy and manage WASM workflows on the workflow registry.
//!
//! The binary is a thin shell over [`run`]. Commands resolve a
//! [`context::CommandContext`] and drive the registry, service and build
//! crates from there.

pub mod cli;
pub mod commands;
pub mod context;
pub mod deploy;
pub mod limits;
pub mod link;
pub mod output;
pub mod prompt;

use tracing::info;

use wfctl_service::LinkingClient;

use crate::cli::{AccountCommand, Cli, Command, WorkflowCommand};
use crate::commands::{account, workflow};
use crate::context::{resolve_owner, CommandContext, Session};
use crate::deploy::DeployOutcome;

/// Runs one parsed command line to completion.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let global = cli.global;
    match cli.cmd {
        Command::Workflow(WorkflowCommand::Deploy(args)) => {
            let ctx = CommandContext::connect(&global).await?;
            match deploy::deploy(&ctx, &args).await? {
                DeployOutcome::Registered { workflow_id, .. } => {
                    info!(workflow_id = %workflow_id, "deploy finished");
                }
                DeployOutcome::Halted { workflow_id } => {
                    info!(workflow_id = %workflow_id, "deploy halted until the owner link is submitted");
                }
                DeployOutcome::Cancelled { .. } => {}
            }
        }
        Command::Workflow(WorkflowCommand::Activate(args)) => {
            let ctx = CommandContext::connect(&global).await?;
            workflow::activate(&ctx, &args).await?;
        }
        Command::Workflow(WorkflowCommand::Pause(args)) => {
            let ctx = CommandContext::connect(&global).await?;
            workflow::pause(&ctx, &args).await?;
        }
        Command::Workflow(WorkflowCommand::Delete(args)) => {
            let ctx = CommandContext::connect(&global).await?;
            workflow::delete(&ctx, &args).await?;
        }
        Command::Workflow(WorkflowCommand::GenerateId(args)) => {
            let session = Session::load(&global)?;
            let (owner, _) = resolve_owner(&global, &session.settings)?;
            let id = workflow::generate_id(
                &wfctl_build::BuildDriver::new(),
                &session.settings,
                &owner,
                &args,
            )
            .await?;
            println!("Workflow ID: {id}");
        }
        Command::Account(AccountCommand::LinkKey { owner_label }) => {
            let ctx = CommandContext::connect(&global).await?;
            account::link_key(&ctx, owner_label).await?;
        }
        Command::Account(AccountCommand::UnlinkKey { action_id }) => {
            let ctx = CommandContext::connect(&global).await?;
            account::unlink_key(&ctx, action_id).await?;
        }
        Command::Account(AccountCommand::ListKey) => {
            let session = Session::load(&global)?;
            account::list_key(&LinkingClient::new(session.gql)).await?;
        }
    }
    Ok(())
}
