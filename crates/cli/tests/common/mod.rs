#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wfctl::cli::{BuildArgs, DeployArgs, TargetArgs};
use wfctl::context::CommandContext;
use wfctl::link::PollPolicy;
use wfctl::prompt::Prompter;
use wfctl_build::BuildDriver;
use wfctl_core::model::{OwnerAddress, OwnerType, RegisterWorkflowParams, TxStrategy, WorkflowId, WorkflowStatus};
use wfctl_core::secret::Secret;
use wfctl_core::settings::{Credentials, EnvironmentSet, ProjectSettings};
use wfctl_registry::memory::{MemoryRegistry, MEMORY_REGISTRY_ADDRESS};
use wfctl_registry::RegistryClient;
use wfctl_service::{GraphQlClient, LinkingClient, RetryPolicy};

pub const OWNER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
pub const CHAIN_SELECTOR: u64 = 7759470850252068959;
pub const DON: &str = "test-family";
pub const NAME: &str = "test_workflow";

pub fn owner() -> OwnerAddress {
    OWNER.parse().unwrap()
}

pub fn owner_address() -> Address {
    Address::from(owner().0)
}

/// Answers prompts from queues; an unexpected prompt is an error.
#[derive(Default)]
pub struct ScriptedPrompter {
    confirms: Mutex<VecDeque<bool>>,
    inputs: Mutex<VecDeque<String>>,
    selects: Mutex<VecDeque<usize>>,
    pub asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn confirming(answers: &[bool]) -> Self {
        let p = Self::default();
        p.confirms.lock().unwrap().extend(answers);
        p
    }

    pub fn typing(answers: &[&str]) -> Self {
        let p = Self::default();
        p.inputs
            .lock()
            .unwrap()
            .extend(answers.iter().map(|s| s.to_string()));
        p
    }

    fn unexpected(prompt: &str) -> io::Error {
        io::Error::other(format!("unexpected prompt: {prompt}"))
    }
}

impl Prompter for ScriptedPrompter {
    fn confirm(&self, prompt: &str) -> io::Result<bool> {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.confirms
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Self::unexpected(prompt))
    }

    fn input(&self, prompt: &str) -> io::Result<String> {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.inputs
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Self::unexpected(prompt))
    }

    fn select(&self, prompt: &str, _items: &[&str]) -> io::Result<usize> {
        self.asked.lock().unwrap().push(prompt.to_string());
        self.selects
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Self::unexpected(prompt))
    }
}

/// A command context wired to an in-memory registry, a mock service and a fake
/// Go toolchain.
pub struct Harness {
    pub server: MockServer,
    pub chain: Arc<MemoryRegistry>,
    pub ctx: CommandContext,
    pub dir: TempDir,
    pub bin: TempDir,
}

pub const EMIT_WASM: &str = r"printf '\000asm\001\000\000\000' >";

pub fn fake_tool(bin: &Path, name: &str, body: &str) {
    let path = bin.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

impl Harness {
    pub async fn new(owner_type: OwnerType, strategy: TxStrategy) -> Self {
        let server = MockServer::start().await;
        let chain = Arc::new(MemoryRegistry::new(owner_address()));
        let registry =
            RegistryClient::new(chain.clone(), MEMORY_REGISTRY_ADDRESS, strategy).with_chain_name("memory");

        let gql = GraphQlClient::new(
            format!("{}/graphql", server.uri()),
            Some(Credentials::ApiKey(Secret::new("test-key".into()))),
            Duration::from_secs(5),
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let wf = dir.path().join("wf");
        std::fs::create_dir_all(&wf).unwrap();
        std::fs::write(wf.join("main.go"), "package main\n").unwrap();
        std::fs::write(wf.join("config.yml"), "schedule: \"*/30 * * * * *\"\n").unwrap();

        let bin = tempfile::tempdir().unwrap();
        // go build -o <tmp> ...: the output path is the third argument.
        fake_tool(bin.path(), "go", &format!("{EMIT_WASM} \"$3\""));

        let env = EnvironmentSet {
            name: "test".into(),
            graphql_url: format!("{}/graphql", server.uri()),
            workflow_registry_address: MEMORY_REGISTRY_ADDRESS.to_string(),
            workflow_registry_chain_selector: CHAIN_SELECTOR,
            workflow_registry_chain_name: "memory".into(),
            explorer_url: "https://explorer.example".into(),
            default_don_family: DON.into(),
        };

        let ctx = CommandContext {
            env,
            settings: ProjectSettings::default(),
            owner: owner(),
            owner_type,
            registry,
            linking: LinkingClient::new(gql.clone()),
            gql,
            prompter: Arc::new(ScriptedPrompter::default()),
            skip_confirmation: true,
            poll: PollPolicy::immediate(3),
            upload_retry: RetryPolicy::immediate(1),
            driver: BuildDriver::with_search_path(bin.path()),
            work_dir: dir.path().to_path_buf(),
        };

        Self {
            server,
            chain,
            ctx,
            dir,
            bin,
        }
    }

    pub async fn eoa() -> Self {
        Self::new(OwnerType::Eoa, TxStrategy::SignSend).await
    }

    pub fn output_path(&self) -> PathBuf {
        self.dir.path().join("binary.wasm.br.b64")
    }

    pub fn build_args(&self, name: &str) -> BuildArgs {
        BuildArgs {
            name: Some(name.into()),
            workflow_path: Some(self.dir.path().join("wf/main.go")),
            include_config: false,
            config_path: Some(self.dir.path().join("wf/config.yml")),
            output: self.output_path(),
            secrets_url: None,
        }
    }

    pub fn deploy_args(&self, name: &str) -> DeployArgs {
        DeployArgs {
            build: self.build_args(name),
            tag: String::new(),
            don_family: None,
            auto_start: true,
            keep_alive: false,
            confidential: false,
            vault_don_secrets: Vec::new(),
            owner_label: None,
        }
    }

    pub fn target(&self, name: &str) -> TargetArgs {
        TargetArgs {
            name: Some(name.into()),
            don_family: None,
        }
    }

    /// Links the owner on chain and has the service report it verified.
    pub async fn linked_and_verified(&self) {
        self.chain.link(owner_address());
        mount_owner_list(&self.server, &[(OWNER, true)]).await;
    }

    /// Registers a workflow straight through the registry client.
    pub async fn register(&self, id_byte: u8, name: &str, tag: &str, status: WorkflowStatus) -> WorkflowId {
        let mut id = [id_byte; 32];
        id[0] = 0;
        let params = RegisterWorkflowParams {
            name: name.into(),
            tag: tag.into(),
            workflow_id: WorkflowId(id),
            status,
            don_family: DON.into(),
            binary_url: format!("https://blob.example/{name}/{tag}"),
            config_url: String::new(),
            attributes: Vec::new(),
            keep_alive: true,
        };
        self.ctx.registry.upsert_workflow(&params).await.unwrap();
        WorkflowId(id)
    }

    pub async fn requests_to(&self, path_suffix: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path().ends_with(path_suffix))
            .count()
    }
}

pub async fn mount_owner_list(server: &MockServer, owners: &[(&str, bool)]) {
    let linked: Vec<_> = owners
        .iter()
        .map(|(addr, verified)| {
            json!({
                "workflowOwnerAddress": addr,
                "verificationStatus": if *verified {
                    "VERIFICATION_STATUS_SUCCESSFULL"
                } else {
                    "VERIFICATION_STATUS_PENDING"
                },
            })
        })
        .collect();
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("listWorkflowOwners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"listWorkflowOwners": {"linkedOwners": linked}}
        })))
        .mount(server)
        .await;
}

pub fn linking_response(valid_until: DateTime<Utc>, contract: &str) -> serde_json::Value {
    json!({
        "ownershipProofHash": format!("0x{}", "11".repeat(32)),
        "workflowOwnerAddress": OWNER,
        "validUntil": valid_until.to_rfc3339(),
        "signature": format!("0x{}", "22".repeat(65)),
        "chainSelector": CHAIN_SELECTOR.to_string(),
        "contractAddress": contract,
        "transactionData": "",
        "functionSignature": "",
        "functionArgs": [],
    })
}

pub async fn mount_initiate_linking(server: &MockServer, valid_until: DateTime<Utc>, contract: &str) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("initiateLinking"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"initiateLinking": linking_response(valid_until, contract)}
        })))
        .mount(server)
        .await;
}

/// Presign, upload and resolve for both artifact types. With `existing`,
/// the service reports the content as already stored.
pub async fn mount_storage(server: &MockServer, existing: bool) {
    for kind in ["BINARY", "CONFIG"] {
        let presign = if existing {
            ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "artifact already exists"}]
            }))
        } else {
            ResponseTemplate::new(200).set_body_json(json!({
                "data": {
                    "generatePresignedPostUrlForArtifact": {
                        "presignedPostUrl": format!("{}/upload", server.uri()),
                        "presignedPostFields": [{"key": "key", "value": format!("artifacts/{kind}")}]
                    }
                }
            }))
        };
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("generatePresignedPostUrlForArtifact"))
            .and(body_string_contains(format!(r#""artifactType":"{kind}""#)))
            .respond_with(presign)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("generateUnsignedGetUrlForArtifact"))
            .and(body_string_contains(format!(r#""artifactType":"{kind}""#)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"generateUnsignedGetUrlForArtifact": {
                    "unsignedGetUrl": format!("https://blob.example/{}", kind.to_lowercase())
                }}
            })))
            .mount(server)
            .await;
    }
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
}
