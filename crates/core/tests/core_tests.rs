//! Integration tests for the core crate.

use std::path::PathBuf;

use wfctl_core::artifact::{build_artifact, verify_artifact, ArtifactError, ArtifactInput};
use wfctl_core::framing::{self, FRAMED_SUFFIX};
use wfctl_core::hashing::workflow_id;
use wfctl_core::model::{
    OwnerType, RegisterWorkflowParams, TxStrategy, WorkflowId, WorkflowStatus,
};

const OWNER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

fn fake_wasm() -> Vec<u8> {
    let mut wasm = b"\0asm\x01\0\0\0".to_vec();
    wasm.extend(std::iter::repeat(b"(func $main)".as_slice()).take(32).flatten());
    wasm
}

#[test]
fn test_tx_strategy_serde() {
    let s = serde_json::to_string(&TxStrategy::RawCalldata).unwrap();
    assert_eq!(s, r#"{"kind":"raw_calldata"}"#);

    let hw = TxStrategy::HwWallet {
        derivation_path: "m/44'/60'/0'/0/0".into(),
    };
    let s = serde_json::to_string(&hw).unwrap();
    let back: TxStrategy = serde_json::from_str(&s).unwrap();
    assert_eq!(back, hw);
}

#[test]
fn test_owner_type_serde() {
    assert_eq!(serde_json::to_string(&OwnerType::Msig).unwrap(), r#""msig""#);
    assert_eq!(OwnerType::Msig.request_process(), "MSIG");
    assert_eq!(OwnerType::default(), OwnerType::Eoa);
}

#[test]
fn test_register_params_serialize_id_as_hex() {
    let params = RegisterWorkflowParams {
        name: "wf".into(),
        tag: "wf".into(),
        workflow_id: WorkflowId([0xab; 32]),
        status: WorkflowStatus::Active,
        don_family: "zone-a".into(),
        binary_url: "https://blob/b".into(),
        config_url: String::new(),
        attributes: vec![],
        keep_alive: false,
    };
    let v = serde_json::to_value(&params).unwrap();
    assert_eq!(v["workflow_id"], "ab".repeat(32));
    assert_eq!(v["status"], "active");
    assert_eq!(v["attributes"], "0x");
}

#[test]
fn artifact_id_uses_decoded_binary_not_framed_file() {
    let dir = tempfile::tempdir().unwrap();
    let framed = framing::frame(&fake_wasm()).unwrap();
    let out = framing::write_framed(&dir.path().join("binary"), &framed).unwrap();
    let config = dir.path().join("config.yml");
    std::fs::write(&config, "schedule: \"*/30 * * * * *\"\n").unwrap();

    let input = ArtifactInput {
        owner: OWNER,
        name: "test_workflow",
        output_path: &out,
        config_path: Some(&config),
        secrets_url: None,
    };
    let artifact = build_artifact(&input).unwrap();

    let cfg = std::fs::read(&config).unwrap();
    let decoded = framing::decode_framed(&framed).unwrap();
    let expected = workflow_id(OWNER, "test_workflow", &decoded, &cfg, "").unwrap();
    let wrong = workflow_id(OWNER, "test_workflow", &framed, &cfg, "").unwrap();

    assert_eq!(artifact.workflow_id, expected);
    assert_ne!(artifact.workflow_id, wrong);
    assert_eq!(artifact.binary_framed, framed);
    assert_eq!(artifact.config.as_deref(), Some(cfg.as_slice()));
    verify_artifact(&input, &artifact).unwrap();
}

#[test]
fn artifact_verification_rejects_foreign_id() {
    let dir = tempfile::tempdir().unwrap();
    let out = framing::write_framed(&dir.path().join("b"), &framing::frame(&fake_wasm()).unwrap())
        .unwrap();
    let input = ArtifactInput {
        owner: OWNER,
        name: "wf",
        output_path: &out,
        config_path: None,
        secrets_url: None,
    };
    let mut artifact = build_artifact(&input).unwrap();
    artifact.workflow_id = WorkflowId([1; 32]);
    assert!(matches!(
        verify_artifact(&input, &artifact),
        Err(ArtifactError::IdMismatch { .. })
    ));
}

#[test]
fn artifact_requires_owner_and_name() {
    let path = PathBuf::from("unused");
    let input = ArtifactInput {
        owner: "",
        name: "wf",
        output_path: &path,
        config_path: None,
        secrets_url: None,
    };
    assert!(matches!(build_artifact(&input), Err(ArtifactError::MissingOwner)));
    let input = ArtifactInput {
        owner: OWNER,
        name: "",
        ..input
    };
    assert!(matches!(build_artifact(&input), Err(ArtifactError::MissingName)));
}

#[test]
fn framed_output_roundtrips_to_valid_wasm() {
    let dir = tempfile::tempdir().unwrap();
    let wasm = fake_wasm();
    let out = framing::write_framed(&dir.path().join("x.wasm"), &framing::frame(&wasm).unwrap())
        .unwrap();
    assert!(out.to_string_lossy().ends_with(FRAMED_SUFFIX));

    let on_disk = std::fs::read(&out).unwrap();
    let wasm_back = framing::unframe(&on_disk).unwrap();
    assert!(framing::is_wasm(&wasm_back));
    assert_eq!(wasm_back, wasm);
}
