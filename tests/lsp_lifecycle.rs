mod common;

use common::lsp_client::{TestClient, file_uri};

/// Server capabilities: incremental text sync, hover, definition, symbols.
#[tokio::test]
async fn initialize_advertises_expected_capabilities() {
    let mut client = TestClient::new();
    let result = client.initialize().await;

    assert_eq!(result["serverInfo"]["name"], "smithy-ls");
    let caps = &result["capabilities"];
    assert_eq!(caps["textDocumentSync"]["change"], 2, "incremental sync");
    assert_eq!(caps["textDocumentSync"]["openClose"], true);
    assert_eq!(caps["hoverProvider"], true);
    assert_eq!(caps["definitionProvider"], true);
    assert_eq!(caps["documentSymbolProvider"], true);

    client.shutdown().await;
}

/// UTF-8 position encoding is negotiated when the client offers it; UTF-16
/// is the default otherwise.
#[tokio::test]
async fn position_encoding_negotiation() {
    let mut client = TestClient::new();
    let result = client
        .initialize_with(
            serde_json::json!({"general": {"positionEncodings": ["utf-8", "utf-16"]}}),
            serde_json::Value::Null,
            &[],
        )
        .await;
    assert_eq!(result["capabilities"]["positionEncoding"], "utf-8");
    client.shutdown().await;

    let mut client = TestClient::new();
    let result = client.initialize().await;
    assert_eq!(result["capabilities"]["positionEncoding"], "utf-16");
    client.shutdown().await;
}

/// A file outside any project is served from a synthetic detached project:
/// diagnostics are produced on open and cleared on close.
#[tokio::test]
async fn open_and_close_detached_document() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lonely.smithy");
    let uri = file_uri(&path.display().to_string());

    let mut client = TestClient::new();
    client.initialize().await;

    // Broken text: diagnostics expected.
    client
        .did_open(&uri, 1, "namespace com.x\n???\nstring X\n")
        .await;
    let opened = client.recv_diagnostics_for(&uri).await;
    let diagnostics = opened["params"]["diagnostics"].as_array().unwrap();
    assert!(!diagnostics.is_empty(), "expected a parse diagnostic");
    assert_eq!(diagnostics[0]["source"], "smithy-ls");

    // Close clears diagnostics and drops the detached project.
    client.did_close(&uri).await;
    let closed = client.recv_diagnostics_for(&uri).await;
    assert_eq!(
        closed["params"]["diagnostics"].as_array().unwrap().len(),
        0,
        "expected diagnostics cleared on close"
    );

    client.shutdown().await;
}

/// Opening a document inside a workspace project serves it from that
/// project: cross-file references resolve without diagnostics.
#[tokio::test]
async fn open_document_in_workspace_project() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("smithy-build.json"),
        r#"{"version": "1.0", "sources": ["a.smithy", "b.smithy"]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("a.smithy"),
        "$version: \"2\"\nnamespace com.x\nstring Target\n",
    )
    .unwrap();
    let b = dir.path().join("b.smithy");
    std::fs::write(
        &b,
        "$version: \"2\"\nnamespace com.x\napply Target @length(min: 1)\n",
    )
    .unwrap();

    let mut client = TestClient::new();
    client
        .initialize_workspace(&dir.path().display().to_string())
        .await;

    let uri = file_uri(&b.display().to_string());
    client
        .did_open(&uri, 1, &std::fs::read_to_string(&b).unwrap())
        .await;
    let published = client.recv_diagnostics_for(&uri).await;
    assert_eq!(
        published["params"]["diagnostics"].as_array().unwrap().len(),
        0,
        "cross-file apply must resolve inside the project"
    );

    client.shutdown().await;
}
