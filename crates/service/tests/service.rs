use std::time::Duration;

use serde_json::json;
use wfctl_core::model::OwnerType;
use wfctl_core::secret::Secret;
use wfctl_core::settings::Credentials;
use wfctl_service::{
    ArtifactType, GraphQlClient, LinkingClient, RetryPolicy, ServiceError, StorageClient,
    UploadError,
};
use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OWNER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
const REGISTRY: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
const WORKFLOW_ID: &str = "00aa000000000000000000000000000000000000000000000000000000000000";

fn gql(server: &MockServer) -> GraphQlClient {
    GraphQlClient::new(
        format!("{}/graphql", server.uri()),
        Some(Credentials::ApiKey(Secret::new("test-key".into()))),
        Duration::from_secs(5),
    )
    .unwrap()
}

fn storage(server: &MockServer) -> StorageClient {
    StorageClient::new(gql(server), REGISTRY, OWNER, 7759470850252068959, Duration::from_secs(5))
        .unwrap()
        .with_retry(RetryPolicy::immediate(3))
}

fn presign_ok(server: &MockServer) -> serde_json::Value {
    json!({
        "data": {
            "generatePresignedPostUrlForArtifact": {
                "presignedPostUrl": format!("{}/upload", server.uri()),
                "presignedPostFields": [
                    {"key": "key", "value": "artifacts/binary"},
                    {"key": "policy", "value": "cG9saWN5"}
                ]
            }
        }
    })
}

async fn mount_get_url(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generateUnsignedGetUrlForArtifact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"generateUnsignedGetUrlForArtifact": {"unsignedGetUrl": "https://blob.example/binary"}}
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn upload_presigns_posts_and_resolves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generatePresignedPostUrlForArtifact"))
        .and(body_string_contains(r#""artifactType":"BINARY""#))
        .and(body_string_contains(r#""chainSelector":"7759470850252068959""#))
        .and(header("Authorization", "Apikey test-key"))
        .and(header("User-Agent", "wfctl"))
        .respond_with(ResponseTemplate::new(200).set_body_json(presign_ok(&server)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    mount_get_url(&server).await;

    let outcome = storage(&server)
        .upload_artifact(WORKFLOW_ID, ArtifactType::Binary, b"Z3ppcA==", "application/octet-stream")
        .await
        .unwrap();
    assert!(outcome.uploaded);
    assert_eq!(outcome.url, "https://blob.example/binary");

    let requests = server.received_requests().await.unwrap();
    let upload = requests.iter().find(|r| r.url.path() == "/upload").unwrap();
    let body = String::from_utf8_lossy(&upload.body);
    let positions: Vec<usize> = [
        r#"name="key""#,
        r#"name="policy""#,
        r#"name="Content-Type""#,
        r#"name="Content-MD5""#,
        r#"name="file"; filename="artifact""#,
    ]
    .iter()
    .map(|needle| body.find(needle).unwrap_or_else(|| panic!("missing {needle}")))
    .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
}

#[tokio::test]
async fn already_exists_skips_upload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generatePresignedPostUrlForArtifact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"message": "artifact already exists"}],
            "data": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    mount_get_url(&server).await;

    let outcome = storage(&server)
        .upload_artifact(WORKFLOW_ID, ArtifactType::Binary, b"abc", "application/octet-stream")
        .await
        .unwrap();
    assert!(!outcome.uploaded);
    assert_eq!(outcome.url, "https://blob.example/binary");
}

#[tokio::test]
async fn origin_rejection_retried_then_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generatePresignedPostUrlForArtifact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(presign_ok(&server)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(403).set_body_string("AccessDenied"))
        .expect(3)
        .mount(&server)
        .await;

    let err = storage(&server)
        .upload_artifact(WORKFLOW_ID, ArtifactType::Config, b"cfg", "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::OriginStatus { status: 403, .. }));
    assert_eq!(
        err.to_string(),
        "upload to origin: expected status 204 or 201, got 403: AccessDenied"
    );
}

#[tokio::test]
async fn origin_rejection_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generatePresignedPostUrlForArtifact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(presign_ok(&server)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_string("X".repeat(100_000)))
        .mount(&server)
        .await;

    let err = storage(&server)
        .with_retry(RetryPolicy::immediate(1))
        .upload_artifact(WORKFLOW_ID, ArtifactType::Binary, b"abc", "application/octet-stream")
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::OriginStatus { status: 200, .. }));
    let msg = err.to_string();
    assert!(msg.contains("got 200"), "{msg}");
    assert!(msg.ends_with("..."));
    assert!(msg.len() < 2048, "message is {} bytes", msg.len());
}

#[tokio::test]
async fn rejected_credentials_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generatePresignedPostUrlForArtifact"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&server)
        .await;

    let err = storage(&server)
        .upload_artifact(WORKFLOW_ID, ArtifactType::Binary, b"abc", "application/octet-stream")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UploadError::Presign(ServiceError::Status { status: 401, .. })
    ));
}

#[tokio::test]
async fn flaky_presign_recovers_within_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generatePresignedPostUrlForArtifact"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("generatePresignedPostUrlForArtifact"))
        .respond_with(ResponseTemplate::new(200).set_body_json(presign_ok(&server)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    mount_get_url(&server).await;

    let outcome = storage(&server)
        .upload_artifact(WORKFLOW_ID, ArtifactType::Binary, b"abc", "application/octet-stream")
        .await
        .unwrap();
    assert!(outcome.uploaded);
}

#[tokio::test]
async fn rejects_empty_inputs_without_network() {
    let server = MockServer::start().await;
    let client = storage(&server);

    let err = client
        .upload_artifact("", ArtifactType::Binary, b"abc", "application/octet-stream")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "workflowID is empty");

    let err = client
        .upload_artifact(WORKFLOW_ID, ArtifactType::Config, b"", "text/plain")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "content is empty for artifactType CONFIG");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_credentials_fail_fast() {
    let server = MockServer::start().await;
    let client = GraphQlClient::new(server.uri(), None, Duration::from_secs(1)).unwrap();
    let err = LinkingClient::new(client).list_workflow_owners().await.unwrap_err();
    assert!(matches!(err, ServiceError::NotLoggedIn));
}

#[tokio::test]
async fn initiate_linking_sends_idempotency_key_and_process() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("initiateLinking"))
        .and(body_string_contains(r#""requestProcess":"MSIG""#))
        .and(body_string_contains(r#""environment":"PRODUCTION_TESTNET""#))
        .and(header_exists("Idempotency-Key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"initiateLinking": {
                "ownershipProofHash": format!("0x{}", "11".repeat(32)),
                "workflowOwnerAddress": OWNER,
                "validUntil": "2030-01-01T00:00:00Z",
                "signature": "0xdead",
                "chainSelector": "7759470850252068959",
                "contractAddress": REGISTRY,
                "transactionData": "0x",
                "functionSignature": "linkOwner(uint256,bytes32,bytes)",
                "functionArgs": []
            }}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = LinkingClient::new(gql(&server))
        .initiate_linking(OWNER, "ci", OwnerType::Msig)
        .await
        .unwrap();
    assert_eq!(resp.contract_address, REGISTRY);
    assert_eq!(resp.chain_selector_u64().unwrap(), 7759470850252068959);
}

#[tokio::test]
async fn owner_verification_is_case_insensitive() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("listWorkflowOwners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"listWorkflowOwners": {"linkedOwners": [
                {"workflowOwnerAddress": "0xF39FD6E51AAD88F6F4CE6AB8827279CFFFB92266",
                 "verificationStatus": "VERIFICATION_STATUS_SUCCESSFULL"},
                {"workflowOwnerAddress": "0x70997970c51812dc3a010c7d01b50e0d17dc79c8",
                 "verificationStatus": "VERIFICATION_STATUS_PENDING"}
            ]}}
        })))
        .mount(&server)
        .await;

    let linking = LinkingClient::new(gql(&server));
    assert!(linking.is_owner_verified(OWNER).await.unwrap());
    assert!(!linking
        .is_owner_verified("0x70997970c51812dc3a010c7d01b50e0d17dc79c8")
        .await
        .unwrap());
    assert!(!linking
        .is_owner_verified("0x3c44cdddb6a900fa2b585dd299e03d12fa4293bc")
        .await
        .unwrap());
}
