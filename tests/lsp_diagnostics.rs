mod common;

use common::lsp_client::{TestClient, file_uri};

fn doc_uri(dir: &tempfile::TempDir, name: &str) -> String {
    file_uri(&dir.path().join(name).display().to_string())
}

/// Parse errors surface as ERROR diagnostics with the `Parse` code.
#[tokio::test]
async fn parse_errors_are_published() {
    let dir = tempfile::tempdir().unwrap();
    let uri = doc_uri(&dir, "broken.smithy");

    let mut client = TestClient::new();
    client.initialize().await;
    client
        .did_open(&uri, 1, "namespace com.x\nstring string string\n")
        .await;

    let msg = client.recv_diagnostics_for(&uri).await;
    let diagnostics = msg["params"]["diagnostics"].as_array().unwrap();
    assert!(!diagnostics.is_empty());
    assert_eq!(diagnostics[0]["severity"], 1, "parse errors are ERROR");
    assert_eq!(diagnostics[0]["code"], "Parse");

    client.shutdown().await;
}

/// An unknown trait is a WARNING; visible by default, filtered out when
/// `diagnostics.minimumSeverity` is raised to DANGER.
#[tokio::test]
async fn minimum_severity_filters_warnings() {
    let dir = tempfile::tempdir().unwrap();
    let uri = doc_uri(&dir, "warned.smithy");
    let text = "$version: \"2\"\nnamespace com.x\n@mystery\nstring X\n";

    // Default minimum severity (WARNING): the diagnostic is visible.
    let mut client = TestClient::new();
    client.initialize().await;
    client.did_open(&uri, 1, text).await;
    let msg = client.recv_diagnostics_for(&uri).await;
    let diagnostics = msg["params"]["diagnostics"].as_array().unwrap();
    assert!(
        diagnostics.iter().any(|d| d["code"] == "UnknownTrait"),
        "expected UnknownTrait warning, got {diagnostics:?}"
    );
    client.shutdown().await;

    // Raised to DANGER: the warning is filtered.
    let mut client = TestClient::new();
    client
        .initialize_with(
            serde_json::json!({}),
            serde_json::json!({"diagnostics": {"minimumSeverity": "DANGER"}}),
            &[],
        )
        .await;
    client.did_open(&uri, 1, text).await;
    let msg = client.recv_diagnostics_for(&uri).await;
    let diagnostics = msg["params"]["diagnostics"].as_array().unwrap();
    assert!(
        diagnostics.iter().all(|d| d["code"] != "UnknownTrait"),
        "warning should be filtered at DANGER, got {diagnostics:?}"
    );
    client.shutdown().await;
}

/// An `apply` whose target exists only in another file produces an
/// unresolved-shape error while detached.
#[tokio::test]
async fn unresolved_apply_target_reported_on_detached_file() {
    let dir = tempfile::tempdir().unwrap();
    let uri = doc_uri(&dir, "apply.smithy");

    let mut client = TestClient::new();
    client.initialize().await;
    client
        .did_open(&uri, 1, "namespace com.x\napply Ghost @length(min: 1)\n")
        .await;

    let msg = client.recv_diagnostics_for(&uri).await;
    let diagnostics = msg["params"]["diagnostics"].as_array().unwrap();
    assert!(
        diagnostics.iter().any(|d| d["code"] == "UnresolvedShape"),
        "expected UnresolvedShape, got {diagnostics:?}"
    );

    client.shutdown().await;
}
