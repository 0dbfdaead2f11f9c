//! `account link-key | unlink-key | list-key`.

use anyhow::{bail, Context as _};
use chrono::Utc;
use tracing::info;

use wfctl_registry::TxOutput;
use wfctl_service::{LinkedOwner, LinkingClient, PreUnlinkAction};

use crate::context::CommandContext;
use crate::link::{check_contract, check_request, LinkMachine, LinkOutcome};
use crate::output::print_tx_output;

/// Links the owner address, prompting for a label when none was given.
pub async fn link_key(ctx: &CommandContext, owner_label: Option<String>) -> anyhow::Result<LinkOutcome> {
    let label = match owner_label {
        Some(label) => label,
        None if ctx.skip_confirmation => String::new(),
        None => ctx
            .prompter
            .input("Provide a label for your owner address")
            .context("label prompt failed")?,
    };

    let outcome = LinkMachine::new(&ctx.registry, &ctx.linking, ctx.owner, ctx.owner_type)
        .with_label(label)
        .with_poll(ctx.poll)
        .with_work_dir(&ctx.work_dir)
        .ensure_linked()
        .await
        .context("failed to link owner")?;
    if outcome == LinkOutcome::AlreadyLinked {
        println!("Owner {} is already linked", ctx.owner);
    }
    Ok(outcome)
}

fn choose_action(ctx: &CommandContext, action_id: Option<u32>) -> anyhow::Result<PreUnlinkAction> {
    if let Some(id) = action_id {
        return PreUnlinkAction::from_id(id)
            .with_context(|| format!("invalid action id {id}; expected 1, 2 or 3"));
    }
    if ctx.skip_confirmation {
        return Ok(PreUnlinkAction::None);
    }
    let items: Vec<&str> = PreUnlinkAction::ALL.iter().map(|a| a.description()).collect();
    let idx = ctx
        .prompter
        .select("What should happen to this owner's workflows?", &items)
        .context("action prompt failed")?;
    PreUnlinkAction::ALL
        .get(idx)
        .copied()
        .with_context(|| format!("invalid selection {idx}"))
}

/// Unlinks the owner address. `None` when the user backs out.
pub async fn unlink_key(ctx: &CommandContext, action_id: Option<u32>) -> anyhow::Result<Option<TxOutput>> {
    if !ctx
        .registry
        .is_owner_linked(&ctx.owner)
        .await
        .context("failed to check owner link")?
    {
        bail!("owner {} is not linked", ctx.owner);
    }

    let action = choose_action(ctx, action_id)?;
    if !ctx.confirm(&format!(
        "Unlink owner {}? ({})",
        ctx.owner,
        action.description()
    ))? {
        println!("Unlink cancelled");
        return Ok(None);
    }

    let resp = ctx
        .linking
        .initiate_unlinking(&ctx.owner.to_string(), action)
        .await
        .context("failed to initiate unlinking")?;
    check_contract(&ctx.registry, &resp)?;
    let checked = check_request(&resp, Utc::now(), false)?;
    let on_chain_action = resp.unlink_action()?;
    info!(action = ?action, on_chain_action, "unlink request accepted by service");

    ctx.registry
        .can_unlink_owner(&ctx.owner, checked.valid_until, &checked.signature, on_chain_action)
        .await
        .context("unlink would be rejected by the registry")?;
    let out = ctx
        .registry
        .unlink_owner(&ctx.owner, checked.valid_until, &checked.signature, on_chain_action)
        .await
        .context("failed to unlink owner")?;
    print_tx_output(&ctx.env, &out, "Unlink");
    Ok(Some(out))
}

/// Prints the owners linked to the caller's organization.
pub async fn list_key(linking: &LinkingClient) -> anyhow::Result<Vec<LinkedOwner>> {
    let owners = linking
        .list_workflow_owners()
        .await
        .context("failed to list linked owners")?;
    if owners.is_empty() {
        println!("No linked owners found");
    } else {
        println!("Linked owners:");
        for o in &owners {
            println!("   {}  {}", o.workflow_owner_address, o.verification_status);
        }
    }
    Ok(owners)
}
