//! `workflow activate | pause | delete | generate-id`.

use anyhow::{anyhow, bail, Context as _};
use tracing::{debug, warn};

use wfctl_build::BuildDriver;
use wfctl_core::model::{OwnerAddress, TxStrategy, WorkflowId, WorkflowMetadata, WorkflowStatus};
use wfctl_core::settings::ProjectSettings;
use wfctl_registry::{hash_key, TxOutput};

use crate::cli::{GenerateIdArgs, TargetArgs};
use crate::context::CommandContext;
use crate::deploy::BuildPlan;
use crate::limits::{check_don_limit, LIMIT_PAGE_SIZE};
use crate::output::print_tx_output;

/// Page size for the by-name listings behind pause and delete.
pub const LIST_PAGE_SIZE: u64 = 100;

fn not_found(name: &str, owner: &OwnerAddress) -> anyhow::Error {
    anyhow!("no workflows found for name \"{name}\" and owner \"{owner}\"")
}

/// Activates the most recently registered version of a workflow.
pub async fn activate(ctx: &CommandContext, args: &TargetArgs) -> anyhow::Result<TxOutput> {
    let name = ctx.workflow_name(args.name.as_deref())?;
    let versions = ctx
        .registry
        .list_workflows_by_name(&ctx.owner, &name, LIMIT_PAGE_SIZE)
        .await
        .context("failed to list workflows")?;
    let latest = versions
        .into_iter()
        .max_by_key(|w| w.created_at)
        .ok_or_else(|| not_found(&name, &ctx.owner))?;

    if latest.status() != Some(WorkflowStatus::Paused) {
        bail!("workflow is already active, cancelling transaction");
    }
    let don_family = args
        .don_family
        .clone()
        .unwrap_or_else(|| latest.don_family.clone());
    check_don_limit(&ctx.registry, &ctx.owner, &don_family, None).await?;

    println!(
        "Activating workflow: Name={name}, Owner={}, WorkflowID={}",
        ctx.owner, latest.workflow_id
    );
    let out = ctx
        .registry
        .activate_workflow(&latest.workflow_id, &don_family)
        .await
        .context("failed to activate workflow")?;
    print_tx_output(&ctx.env, &out, "Workflow activation");
    Ok(out)
}

/// Pauses every version of a workflow in one transaction.
pub async fn pause(ctx: &CommandContext, args: &TargetArgs) -> anyhow::Result<TxOutput> {
    let name = ctx.workflow_name(args.name.as_deref())?;
    let ids: Vec<WorkflowId> = ctx
        .registry
        .list_workflows_by_name(&ctx.owner, &name, LIST_PAGE_SIZE)
        .await
        .context("failed to list workflows")?
        .into_iter()
        .map(|w| w.workflow_id)
        .collect();
    if ids.is_empty() {
        return Err(not_found(&name, &ctx.owner));
    }

    println!("Pausing {} workflow version(s) of {name}", ids.len());
    let out = ctx
        .registry
        .batch_pause_workflows(&ids)
        .await
        .context("failed to pause workflows")?;
    print_tx_output(&ctx.env, &out, "Workflow pause");
    Ok(out)
}

fn print_version(w: &WorkflowMetadata) {
    let status = w
        .status()
        .map_or_else(|| format!("UNKNOWN({})", w.status), |s| s.to_string());
    println!("   Workflow ID: {}", w.workflow_id);
    println!("      Owner:       {}", w.owner);
    println!("      DON Family:  {}", w.don_family);
    println!("      Tag:         {}", w.tag);
    println!("      Binary URL:  {}", w.binary_url);
    println!("      Status:      {status}");
}

/// Deletes every version of a workflow. Returns the outputs of the deletes
/// that went through.
pub async fn delete(ctx: &CommandContext, args: &TargetArgs) -> anyhow::Result<Vec<TxOutput>> {
    let name = ctx.workflow_name(args.name.as_deref())?;
    debug!(key = %hash_key(&ctx.owner, &name), "registry key");
    let versions = ctx
        .registry
        .list_workflows_by_name(&ctx.owner, &name, LIST_PAGE_SIZE)
        .await
        .context("failed to list workflows")?;
    if versions.is_empty() {
        warn!(name = %name, "no workflows found");
        println!("No workflows found for name: {name}");
        return Ok(Vec::new());
    }

    println!("Found {} workflow(s) to delete for name: {name}", versions.len());
    for w in &versions {
        print_version(w);
    }

    if !ctx.skip_confirmation {
        let typed = ctx
            .prompter
            .input(&format!("Are you sure you want to delete the workflow '{name}'? Type the workflow name to confirm"))
            .context("confirmation prompt failed")?;
        if typed.trim() != name {
            println!("Deletion cancelled");
            return Ok(Vec::new());
        }
    }

    let mut outputs = Vec::new();
    let mut failures = Vec::new();
    for w in &versions {
        match ctx.registry.delete_workflow(&w.workflow_id).await {
            Ok(out) => {
                print_tx_output(&ctx.env, &out, &format!("Deletion of {}", w.workflow_id));
                outputs.push(out);
            }
            Err(e) => {
                warn!(workflow_id = %w.workflow_id, error = %e, "delete failed");
                failures.push(format!("{}: {e}", w.workflow_id));
            }
        }
    }
    if !failures.is_empty() {
        bail!("failed to delete some workflows: {}", failures.join("; "));
    }
    if matches!(ctx.registry.strategy(), TxStrategy::SignSend) {
        println!("Workflows deleted successfully");
    }
    Ok(outputs)
}

/// Computes the ID `deploy` would register, building first unless told not to.
pub async fn generate_id(
    driver: &BuildDriver,
    settings: &ProjectSettings,
    owner: &OwnerAddress,
    args: &GenerateIdArgs,
) -> anyhow::Result<WorkflowId> {
    let plan = BuildPlan::resolve(&args.build, settings)?;
    let framed = plan.framed_binary(driver, args.skip_build).await?;
    let artifact = plan.artifact(owner, &framed)?;
    debug!(key = %hash_key(owner, &plan.name), "registry key");
    Ok(artifact.workflow_id)
}
