#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use chrono::{Duration, Utc};
use wfctl::cli::{GenerateIdArgs, GlobalArgs};
use wfctl::commands::workflow::generate_id;
use wfctl::context::CommandContext;
use wfctl::deploy::{deploy, DeployOutcome};
use wfctl_build::BuildDriver;
use wfctl_core::framing;
use wfctl_core::model::{OwnerType, TxStrategy, WorkflowStatus};
use wfctl_registry::memory::MEMORY_REGISTRY_ADDRESS;
use wfctl_registry::TxOutput;

use common::*;

#[tokio::test]
async fn happy_eoa_deploy_registers_active_workflow() {
    let h = Harness::eoa().await;
    h.linked_and_verified().await;
    mount_storage(&h.server, false).await;

    let outcome = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap();
    let DeployOutcome::Registered {
        workflow_id,
        binary_url,
        config_url,
        output,
    } = outcome
    else {
        panic!("expected registration, got {outcome:?}");
    };

    assert!(matches!(output, TxOutput::Regular { .. }));
    assert_eq!(binary_url, "https://blob.example/binary");
    assert_eq!(config_url, "https://blob.example/config");
    assert_eq!(workflow_id.to_hex().len(), 64);
    assert_eq!(h.chain.sent_functions(), vec!["upsertWorkflow"]);
    assert_eq!(h.requests_to("/upload").await, 2);

    let framed = std::fs::read(h.output_path()).unwrap();
    assert!(framing::is_wasm(&framing::unframe(&framed).unwrap()));

    let stored = h.chain.workflows();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].workflowId.0, workflow_id.0);
    assert_eq!(stored[0].status, WorkflowStatus::Active.as_u8());
    assert_eq!(stored[0].tag, NAME);
    assert_eq!(stored[0].donFamily, DON);
}

#[tokio::test]
async fn deployed_id_matches_generate_id() {
    let h = Harness::eoa().await;
    h.linked_and_verified().await;
    mount_storage(&h.server, false).await;

    let DeployOutcome::Registered { workflow_id, .. } = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap() else {
        panic!("expected registration");
    };
    let args = GenerateIdArgs {
        build: h.deploy_args(NAME).build,
        skip_build: true,
    };
    let generated = generate_id(&h.ctx.driver, &h.ctx.settings, &h.ctx.owner, &args)
        .await
        .unwrap();
    assert_eq!(generated, workflow_id);
}

#[tokio::test]
async fn unlinked_eoa_is_linked_before_registering() {
    let h = Harness::eoa().await;
    mount_initiate_linking(&h.server, Utc::now() + Duration::hours(1), &MEMORY_REGISTRY_ADDRESS.to_string()).await;
    mount_owner_list(&h.server, &[(OWNER, true)]).await;
    mount_storage(&h.server, false).await;

    let outcome = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap();
    assert!(matches!(outcome, DeployOutcome::Registered { .. }));
    assert_eq!(h.chain.sent_functions(), vec!["linkOwner", "upsertWorkflow"]);
    assert!(h.chain.is_linked(owner_address()));
}

#[tokio::test]
async fn msig_owner_halts_with_calldata_and_saved_request() {
    let h = Harness::new(OwnerType::Msig, TxStrategy::RawCalldata).await;
    mount_initiate_linking(&h.server, Utc::now() + Duration::hours(1), &MEMORY_REGISTRY_ADDRESS.to_string()).await;

    let outcome = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap();
    assert!(matches!(outcome, DeployOutcome::Halted { .. }));
    assert!(h.chain.sent().is_empty());
    assert!(h.chain.workflows().is_empty());
    assert_eq!(h.requests_to("/upload").await, 0);

    let saved: Vec<_> = std::fs::read_dir(h.dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(&format!("linking_{OWNER}_"))
        })
        .collect();
    assert_eq!(saved.len(), 1);
    let mode = std::fs::metadata(&saved[0]).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[tokio::test]
async fn redeploy_is_idempotent() {
    let mut h = Harness::eoa().await;
    h.linked_and_verified().await;
    mount_storage(&h.server, false).await;
    let DeployOutcome::Registered { workflow_id: first, .. } = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap() else {
        panic!("expected registration");
    };

    h.server.reset().await;
    h.linked_and_verified().await;
    mount_storage(&h.server, true).await;
    h.ctx.poll = wfctl::link::PollPolicy::immediate(1);

    let DeployOutcome::Registered { workflow_id: second, .. } = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap() else {
        panic!("expected registration");
    };
    assert_eq!(first, second);
    assert_eq!(h.requests_to("/upload").await, 0);
    assert_eq!(h.chain.sent_functions(), vec!["upsertWorkflow", "upsertWorkflow"]);
    assert_eq!(h.chain.workflows().len(), 1);
}

#[tokio::test]
async fn declining_an_update_cancels_without_uploading() {
    let mut h = Harness::eoa().await;
    h.linked_and_verified().await;
    mount_storage(&h.server, false).await;
    deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap();
    let uploads = h.requests_to("/upload").await;

    let prompter = Arc::new(ScriptedPrompter::confirming(&[false]));
    h.ctx.prompter = prompter.clone();
    h.ctx.skip_confirmation = false;

    let outcome = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap();
    assert!(matches!(outcome, DeployOutcome::Cancelled { .. }));
    assert_eq!(h.chain.sent().len(), 1);
    assert_eq!(h.requests_to("/upload").await, uploads);
    assert_eq!(prompter.asked.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn expired_link_request_stops_before_any_transaction() {
    let h = Harness::eoa().await;
    mount_initiate_linking(&h.server, Utc::now() - Duration::minutes(1), &MEMORY_REGISTRY_ADDRESS.to_string()).await;

    let err = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("deploy step 'link' failed"), "{msg}");
    assert!(msg.contains("the request has expired"), "{msg}");
    assert!(h.chain.sent().is_empty());
}

#[tokio::test]
async fn compile_failure_makes_no_network_calls() {
    let h = Harness::eoa().await;
    fake_tool(h.bin.path(), "go", "echo 'undefined: fetchPrice' >&2\nexit 1");

    let err = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("deploy step 'build' failed"), "{msg}");
    assert!(msg.contains("failed to compile workflow"), "{msg}");
    assert!(msg.contains("undefined: fetchPrice"), "{msg}");
    assert!(h.server.received_requests().await.unwrap_or_default().is_empty());
    assert!(h.chain.sent().is_empty());
}

#[tokio::test]
async fn connected_context_makes_no_rpc_call_before_the_build() {
    let h = Harness::eoa().await;
    fake_tool(h.bin.path(), "go", "echo 'undefined: fetchPrice' >&2\nexit 1");
    let rpc = wiremock::MockServer::start().await;

    let settings = h.dir.path().join("project.yaml");
    std::fs::write(
        &settings,
        format!(
            "workflow_owner_address: \"{OWNER}\"\nrpcs:\n  - chain_selector: {CHAIN_SELECTOR}\n    url: {}\n",
            rpc.uri()
        ),
    )
    .unwrap();
    let global = GlobalArgs {
        project_settings: settings,
        environment: Some("local".into()),
        log: "info".into(),
        verbose: false,
        owner: None,
        owner_type: None,
        unsigned: false,
        ledger: false,
        ledger_derivation_path: "m/44'/60'/0'/0/0".into(),
        skip_confirmation: true,
    };

    let mut ctx = CommandContext::connect(&global).await.unwrap();
    ctx.driver = BuildDriver::with_search_path(h.bin.path());

    let err = deploy(&ctx, &h.deploy_args(NAME)).await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("deploy step 'build' failed"), "{msg}");
    assert!(rpc.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn don_limit_blocks_a_new_workflow() {
    let h = Harness::eoa().await;
    h.linked_and_verified().await;
    mount_storage(&h.server, false).await;
    h.chain.set_max_workflows_per_don(1);
    h.register(9, "other_workflow", "other_workflow", WorkflowStatus::Active).await;

    let err = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("deploy step 'check' failed"), "{msg}");
    assert!(
        msg.contains("workflow limit reached for DON test-family: 1/1 active workflows"),
        "{msg}"
    );
    assert_eq!(h.chain.sent().len(), 1);
    assert_eq!(h.requests_to("/upload").await, 0);
}

#[tokio::test]
async fn unsigned_deploy_returns_calldata() {
    let h = Harness::new(OwnerType::Eoa, TxStrategy::RawCalldata).await;
    h.linked_and_verified().await;
    mount_storage(&h.server, false).await;

    let outcome = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap();
    let DeployOutcome::Registered { output, .. } = outcome else {
        panic!("expected registration");
    };
    let TxOutput::Raw { to, calldata } = output else {
        panic!("expected raw calldata");
    };
    assert_eq!(to, MEMORY_REGISTRY_ADDRESS);
    assert!(!calldata.is_empty());
    assert!(h.chain.sent().is_empty());
    assert!(h.chain.workflows().is_empty());
}

#[tokio::test]
async fn invalid_name_fails_validation() {
    let h = Harness::eoa().await;
    let err = deploy(&h.ctx, &h.deploy_args(&"x".repeat(65))).await.unwrap_err();
    assert!(format!("{err:#}").contains("deploy step 'validate' failed"));
    assert!(h.server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn hardware_wallet_is_refused_up_front() {
    let h = Harness::new(
        OwnerType::Eoa,
        TxStrategy::HwWallet {
            derivation_path: "m/44'/60'/0'/0/0".into(),
        },
    )
    .await;
    let err = deploy(&h.ctx, &h.deploy_args(NAME)).await.unwrap_err();
    assert!(format!("{err:#}").contains("hardware wallet signing is not supported"));
}
