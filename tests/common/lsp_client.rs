#![allow(dead_code)]

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tower_lsp_server::{LspService, Server};

use smithy_ls::lsp::Backend;

/// In-process LSP test client backed by `tokio::io::duplex`.
///
/// The server runs in a background task on the same tokio runtime. Time-control
/// tests (`#[tokio::test(start_paused = true)]`) work because all async tasks
/// share the same paused clock.
pub struct TestClient {
    write: tokio::io::DuplexStream,
    read: BufReader<tokio::io::DuplexStream>,
    _server: tokio::task::JoinHandle<()>,
    next_id: AtomicI64,
}

impl TestClient {
    pub fn new() -> Self {
        // Two duplex pairs: (client→server) and (server→client).
        let (client_write, server_read) = tokio::io::duplex(65536);
        let (server_write, client_read) = tokio::io::duplex(65536);

        let (service, socket) = LspService::new(Backend::new);
        let server_handle = tokio::spawn(async move {
            Server::new(server_read, server_write, socket)
                .serve(service)
                .await;
        });

        Self {
            write: client_write,
            read: BufReader::new(client_read),
            _server: server_handle,
            next_id: AtomicI64::new(1),
        }
    }

    /// Send a raw JSON-RPC message (request or notification) with LSP framing.
    pub async fn send(&mut self, msg: serde_json::Value) {
        let json = serde_json::to_string(&msg).unwrap();
        let header = format!("Content-Length: {}\r\n\r\n", json.len());
        self.write.write_all(header.as_bytes()).await.unwrap();
        self.write.write_all(json.as_bytes()).await.unwrap();
        self.write.flush().await.unwrap();
    }

    /// Receive the next LSP-framed JSON-RPC message.
    pub async fn recv(&mut self) -> serde_json::Value {
        let mut content_length: usize = 0;
        loop {
            let mut line = String::new();
            self.read.read_line(&mut line).await.unwrap();
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(len_str) = line.strip_prefix("Content-Length: ") {
                content_length = len_str.trim().parse().unwrap();
            }
        }
        let mut body = vec![0u8; content_length];
        self.read.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    /// Receive messages, discarding everything except the first message with the
    /// given `method` field. Returns the full message.
    pub async fn recv_notification(&mut self, method: &str) -> serde_json::Value {
        loop {
            let msg = self.recv().await;
            if msg["method"].as_str() == Some(method) {
                return msg;
            }
        }
    }

    /// Receive `textDocument/publishDiagnostics` notifications until one for
    /// the given URI arrives.
    pub async fn recv_diagnostics_for(&mut self, uri: &str) -> serde_json::Value {
        loop {
            let msg = self
                .recv_notification("textDocument/publishDiagnostics")
                .await;
            if msg["params"]["uri"].as_str() == Some(uri) {
                return msg;
            }
        }
    }

    /// Send a request and wait for the response with the matching id, skipping
    /// notifications and server-to-client requests (e.g. registerCapability).
    async fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params
        }))
        .await;

        let response = loop {
            let msg = self.recv().await;
            if msg.get("id") == Some(&serde_json::json!(id)) && msg.get("method").is_none() {
                break msg;
            }
        };
        response["result"].clone()
    }

    /// Send `initialize` + `initialized`; returns the InitializeResult.
    pub async fn initialize(&mut self) -> serde_json::Value {
        self.initialize_with(serde_json::json!({}), serde_json::Value::Null, &[])
            .await
    }

    /// Initialize with one workspace folder rooted at `root`.
    pub async fn initialize_workspace(&mut self, root: &str) -> serde_json::Value {
        self.initialize_with(serde_json::json!({}), serde_json::Value::Null, &[root])
            .await
    }

    /// Like `initialize` but with custom client capabilities, initialization
    /// options, and workspace folders.
    pub async fn initialize_with(
        &mut self,
        capabilities: serde_json::Value,
        initialization_options: serde_json::Value,
        roots: &[&str],
    ) -> serde_json::Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let folders: Vec<serde_json::Value> = roots
            .iter()
            .map(|root| {
                serde_json::json!({
                    "uri": file_uri(root),
                    "name": root.rsplit('/').next().unwrap_or("root"),
                })
            })
            .collect();
        let mut params = serde_json::json!({
            "capabilities": capabilities,
            "processId": null,
            "rootUri": null,
            "workspaceFolders": folders,
        });
        if !initialization_options.is_null() {
            params["initializationOptions"] = initialization_options;
        }
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": params
        }))
        .await;

        // Wait for the response (might receive log messages first, skip them).
        let response = loop {
            let msg = self.recv().await;
            if msg.get("id") == Some(&serde_json::json!(id)) && msg.get("method").is_none() {
                break msg;
            }
        };

        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "initialized",
            "params": {}
        }))
        .await;

        // Workspace projects load on a worker after `initialized`; the
        // watcher re-registration that follows installation is the signal
        // that loading finished. Wait for it so tests observe a fully
        // initialised workspace.
        self.wait_for_watcher_refresh().await;

        response["result"].clone()
    }

    /// Receive until the server starts a watcher re-registration
    /// (`client/unregisterCapability`), answering it so the follow-up
    /// registration can proceed.
    pub async fn wait_for_watcher_refresh(&mut self) {
        loop {
            let msg = self.recv().await;
            if msg["method"].as_str() == Some("client/unregisterCapability") {
                if let Some(id) = msg.get("id") {
                    self.send(serde_json::json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": null
                    }))
                    .await;
                }
                return;
            }
        }
    }

    /// Send `textDocument/didOpen` with language id `smithy`.
    pub async fn did_open(&mut self, uri: &str, version: i32, text: &str) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {
                "textDocument": {
                    "uri": uri,
                    "languageId": "smithy",
                    "version": version,
                    "text": text
                }
            }
        }))
        .await;
    }

    /// Send `textDocument/didChange` replacing the whole document.
    pub async fn did_change_full(&mut self, uri: &str, version: i32, text: &str) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didChange",
            "params": {
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{"text": text}]
            }
        }))
        .await;
    }

    /// Send an incremental `textDocument/didChange` for one range.
    pub async fn did_change_range(
        &mut self,
        uri: &str,
        version: i32,
        range: (u32, u32, u32, u32),
        text: &str,
    ) {
        let (start_line, start_char, end_line, end_char) = range;
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didChange",
            "params": {
                "textDocument": {"uri": uri, "version": version},
                "contentChanges": [{
                    "range": {
                        "start": {"line": start_line, "character": start_char},
                        "end": {"line": end_line, "character": end_char}
                    },
                    "text": text
                }]
            }
        }))
        .await;
    }

    /// Send `textDocument/didSave`.
    pub async fn did_save(&mut self, uri: &str) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didSave",
            "params": {
                "textDocument": {"uri": uri}
            }
        }))
        .await;
    }

    /// Send `textDocument/didClose`.
    pub async fn did_close(&mut self, uri: &str) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/didClose",
            "params": {
                "textDocument": {"uri": uri}
            }
        }))
        .await;
    }

    /// Send `workspace/didChangeWatchedFiles`. Change types: 1 = Created,
    /// 2 = Changed, 3 = Deleted.
    pub async fn did_change_watched_files(&mut self, changes: &[(&str, u32)]) {
        let changes: Vec<serde_json::Value> = changes
            .iter()
            .map(|(uri, kind)| serde_json::json!({"uri": uri, "type": kind}))
            .collect();
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "workspace/didChangeWatchedFiles",
            "params": { "changes": changes }
        }))
        .await;
    }

    /// Send `workspace/didChangeWorkspaceFolders`.
    pub async fn did_change_workspace_folders(&mut self, added: &[&str], removed: &[&str]) {
        let folder = |root: &&str| {
            serde_json::json!({
                "uri": file_uri(root),
                "name": root.rsplit('/').next().unwrap_or("root"),
            })
        };
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "workspace/didChangeWorkspaceFolders",
            "params": {
                "event": {
                    "added": added.iter().map(folder).collect::<Vec<_>>(),
                    "removed": removed.iter().map(folder).collect::<Vec<_>>(),
                }
            }
        }))
        .await;
    }

    /// Send `textDocument/hover` and return the result.
    pub async fn hover(&mut self, uri: &str, line: u32, character: u32) -> serde_json::Value {
        self.request(
            "textDocument/hover",
            serde_json::json!({
                "textDocument": { "uri": uri },
                "position": { "line": line, "character": character }
            }),
        )
        .await
    }

    /// Send `textDocument/definition` and return the result.
    pub async fn definition(&mut self, uri: &str, line: u32, character: u32) -> serde_json::Value {
        self.request(
            "textDocument/definition",
            serde_json::json!({
                "textDocument": { "uri": uri },
                "position": { "line": line, "character": character }
            }),
        )
        .await
    }

    /// Send `textDocument/documentSymbol` and return the result.
    pub async fn document_symbol(&mut self, uri: &str) -> serde_json::Value {
        self.request(
            "textDocument/documentSymbol",
            serde_json::json!({
                "textDocument": { "uri": uri }
            }),
        )
        .await
    }

    /// Send `shutdown` and drain the response.
    pub async fn shutdown(&mut self) {
        let _ = self.request("shutdown", serde_json::Value::Null).await;
    }
}

/// Convenience: build a `file://` URI from an absolute path string.
pub fn file_uri(path: &str) -> String {
    format!("file://{path}")
}
