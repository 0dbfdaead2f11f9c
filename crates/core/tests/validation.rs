use std::path::PathBuf;

use wfctl_core::model::{DeployInputs, OwnerType, TxStrategy};
use wfctl_core::validation::{
    normalize_private_key, parse_bytes32, validate_deploy_inputs, validate_workflow_name,
    ValidationError,
};

fn inputs(dir: &std::path::Path) -> DeployInputs {
    let main = dir.join("main.go");
    std::fs::write(&main, "package main\n").unwrap();
    DeployInputs {
        workflow_name: "test_workflow".into(),
        workflow_owner: "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266".into(),
        workflow_tag: String::new(),
        don_family: "test-family".into(),
        workflow_path: main,
        config_path: None,
        output_path: PathBuf::from("./binary.wasm.br.b64"),
        secrets_url: None,
        auto_start: true,
        keep_alive: false,
        tx_strategy: TxStrategy::SignSend,
        owner_type: OwnerType::Eoa,
        owner_label: None,
        skip_confirmation: true,
        confidential: false,
        vault_don_secrets: vec![],
    }
}

#[test]
fn workflow_name_boundary() {
    assert!(validate_workflow_name(&"a".repeat(64)).is_ok());
    assert!(matches!(
        validate_workflow_name(&"a".repeat(65)),
        Err(ValidationError::TooLong { max: 64, len: 65, .. })
    ));
    assert!(matches!(validate_workflow_name(""), Err(ValidationError::Empty { .. })));
    assert!(matches!(
        validate_workflow_name("has space"),
        Err(ValidationError::InvalidCharacters { .. })
    ));
    assert!(validate_workflow_name("ok_name-1").is_ok());
}

#[test]
fn valid_inputs_pass() {
    let dir = tempfile::tempdir().unwrap();
    validate_deploy_inputs(&inputs(dir.path())).unwrap();
}

#[test]
fn collects_every_violation() {
    let dir = tempfile::tempdir().unwrap();
    let mut bad = inputs(dir.path());
    bad.workflow_owner = "f39fd6e51aad88f6f4ce6ab8827279cfffb92266".into();
    bad.don_family = String::new();
    bad.workflow_tag = "t".repeat(33);
    bad.output_path = PathBuf::from(format!("./{}", "o".repeat(100)));
    bad.config_path = Some(dir.path().join("missing.yml"));

    let errs = validate_deploy_inputs(&bad).unwrap_err();
    assert_eq!(errs.0.len(), 5, "{errs}");
    assert!(errs.to_string().starts_with("validation error\n"));
}

#[test]
fn non_ascii_path_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut bad = inputs(dir.path());
    bad.output_path = PathBuf::from("./bïnary");
    let errs = validate_deploy_inputs(&bad).unwrap_err();
    assert!(matches!(errs.0[0], ValidationError::NonAscii { .. }));
}

#[test]
fn private_key_shape() {
    let key = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    assert_eq!(normalize_private_key(key).unwrap(), key);
    assert_eq!(normalize_private_key(&format!("0x{key}")).unwrap(), key);
    assert!(normalize_private_key(&key[..63]).is_err());
    assert!(normalize_private_key(&"0".repeat(64)).is_err());
    assert!(normalize_private_key(&"z".repeat(64)).is_err());
}

#[test]
fn bytes32_length_is_enforced() {
    assert!(parse_bytes32("proof", &"11".repeat(32)).is_ok());
    assert!(matches!(
        parse_bytes32("proof", &"11".repeat(31)),
        Err(ValidationError::WrongLength { actual: 31, .. })
    ));
    assert!(matches!(
        parse_bytes32("proof", &format!("0x{}", "11".repeat(33))),
        Err(ValidationError::WrongLength { actual: 33, .. })
    ));
}
