use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_lsp_server::jsonrpc::Result;
use tower_lsp_server::ls_types::*;
use tower_lsp_server::{Client, LanguageServer, LspService, Server};

use crate::config::BuildFileKind;
use crate::document::DocumentId;
use crate::idl::ShapeType;
use crate::lifecycle::TaskHandle;
use crate::model::{Severity, ShapeId, ValidationEvent};
use crate::project::{Project, ProjectFile};
use crate::state::{LoadPlan, ServerState};
use crate::watch;

/// Debounce window for edit-triggered re-assembly.
const REBUILD_DEBOUNCE: Duration = Duration::from_millis(200);

/// Task-registry key for workspace discovery loads. URIs always carry a
/// scheme, so this cannot collide with a document key.
const WORKSPACE_TASK_KEY: &str = "workspace";

/// Negotiated position encoding for LSP positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NegotiatedEncoding {
    Utf8,
    Utf16,
}

/// Initialization options (closed set).
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct InitializationOptions {
    diagnostics: DiagnosticsOptions,
    /// When true, `didChange` does not schedule re-assembly; only save does.
    only_reload_on_save: bool,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DiagnosticsOptions {
    minimum_severity: Severity,
}

impl Default for DiagnosticsOptions {
    fn default() -> Self {
        Self {
            minimum_severity: Severity::Warning,
        }
    }
}

/// LSP server backend. All state mutations happen on the dispatch path
/// under the single state lock; background assembly operates on snapshots
/// and re-enters through `Project::apply_rebuild`, which discards stale
/// results.
pub struct Backend {
    client: Client,
    state: Arc<Mutex<ServerState>>,
    options: Arc<RwLock<InitializationOptions>>,
    encoding: Arc<RwLock<NegotiatedEncoding>>,
    /// Workspace roots stashed by `initialize` for `initialized` to load.
    pending_roots: Mutex<Vec<PathBuf>>,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").finish()
    }
}

/// Resolve a URI to the absolute path it addresses. `file` URIs resolve
/// through the filesystem mapping; read-only `smithyjar` URIs keep their
/// path component verbatim.
fn uri_path(uri: &Uri) -> Option<PathBuf> {
    if let Some(path) = uri.to_file_path() {
        return Some(Cow::into_owned(path));
    }
    if uri.scheme().as_str() == "smithyjar" {
        return Some(PathBuf::from(uri.path().as_str()));
    }
    None
}

fn path_uri(path: &Path) -> Option<Uri> {
    Uri::from_file_path(path)
}

fn lsp_severity(severity: Severity) -> DiagnosticSeverity {
    match severity {
        Severity::Note => DiagnosticSeverity::INFORMATION,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Danger | Severity::Error => DiagnosticSeverity::ERROR,
    }
}

/// Convert a byte column offset within a line to an LSP character offset.
fn byte_col_to_lsp(line: &str, byte_col: usize, enc: NegotiatedEncoding) -> u32 {
    let safe_col = byte_col.min(line.len());
    match enc {
        NegotiatedEncoding::Utf8 => safe_col as u32,
        NegotiatedEncoding::Utf16 => line[..safe_col].encode_utf16().count() as u32,
    }
}

/// Convert an LSP character offset within a line to a byte column.
fn lsp_col_to_byte(line: &str, character: u32, enc: NegotiatedEncoding) -> usize {
    match enc {
        NegotiatedEncoding::Utf8 => (character as usize).min(line.len()),
        NegotiatedEncoding::Utf16 => {
            let mut units = 0usize;
            for (idx, ch) in line.char_indices() {
                if units >= character as usize {
                    return idx;
                }
                units += ch.len_utf16();
            }
            line.len()
        }
    }
}

fn event_to_diagnostic(
    event: &ValidationEvent,
    line_text: &dyn Fn(usize) -> String,
    enc: NegotiatedEncoding,
) -> Diagnostic {
    let position = if event.location.line > 0 {
        let line_idx = (event.location.line - 1) as u32;
        let text = line_text(event.location.line - 1);
        let character = byte_col_to_lsp(&text, event.location.column.saturating_sub(1), enc);
        Position::new(line_idx, character)
    } else {
        Position::new(0, 0)
    };

    Diagnostic {
        range: Range::new(position, position),
        severity: Some(lsp_severity(event.severity)),
        code: Some(NumberOrString::String(event.id.clone())),
        source: Some("smithy-ls".to_string()),
        message: event.message.clone(),
        ..Default::default()
    }
}

/// Diagnostics for every managed URI of `state`, filtered to the configured
/// minimum severity.
fn diagnostics_for_state(
    state: &ServerState,
    minimum: Severity,
    enc: NegotiatedEncoding,
) -> Vec<(Uri, Vec<Diagnostic>)> {
    let mut out = Vec::new();
    for (uri, path) in state.managed_uris() {
        let Ok(parsed_uri) = uri.parse::<Uri>() else {
            continue;
        };
        let project = state
            .find_owner(uri, path)
            .and_then(|owner| state.project(&owner));
        let Some(project) = project else {
            out.push((parsed_uri, Vec::new()));
            continue;
        };
        let line_text = |line: usize| {
            project
                .file(path)
                .map(|f| f.document().line_text(line).to_string())
                .unwrap_or_default()
        };
        let diagnostics = project
            .events_for_file(path)
            .filter(|e| e.severity >= minimum)
            .map(|e| event_to_diagnostic(e, &line_text, enc))
            .collect();
        out.push((parsed_uri, diagnostics));
    }
    out
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            state: Arc::new(Mutex::new(ServerState::new())),
            options: Arc::new(RwLock::new(InitializationOptions::default())),
            encoding: Arc::new(RwLock::new(NegotiatedEncoding::Utf16)),
            pending_roots: Mutex::new(Vec::new()),
        }
    }

    fn minimum_severity(&self) -> Severity {
        self.options
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .diagnostics
            .minimum_severity
    }

    fn current_encoding(&self) -> NegotiatedEncoding {
        *self.encoding.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn publish_all_diagnostics(&self) {
        let minimum = self.minimum_severity();
        let enc = self.current_encoding();
        let updates = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            diagnostics_for_state(&state, minimum, enc)
        };
        for (uri, diagnostics) in updates {
            self.client.publish_diagnostics(uri, diagnostics, None).await;
        }
    }

    /// Re-register file watchers for the current project set. The previous
    /// bundle is always unregistered first; clients do not de-duplicate.
    /// Runs detached: the round-trips to the client must not stall the
    /// notification handlers that trigger a refresh.
    fn refresh_watchers(&self) {
        let registrations = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            watch::registrations(&state)
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            let _ = client.unregister_capability(watch::unregistrations()).await;
            if let Err(e) = client.register_capability(registrations).await {
                client
                    .log_message(
                        MessageType::WARNING,
                        format!(
                            "smithy-ls: failed to register file watchers ({e}); \
                             filesystem changes won't be tracked"
                        ),
                    )
                    .await;
            }
        });
    }

    /// Run a planned project load off the dispatch path: the blocking phase
    /// (discovery, config + Maven resolution, assembly) goes to a worker
    /// thread via `spawn_blocking`, the result installs under the state
    /// lock, and diagnostics and watchers refresh afterwards. Registered
    /// per key so a newer event for the same source cancels a stale load;
    /// the token is observed between roots and before install.
    fn spawn_load(&self, key: String, plan: LoadPlan) {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let client = self.client.clone();
        let state = Arc::clone(&self.state);
        let options = Arc::clone(&self.options);
        let encoding = Arc::clone(&self.encoding);

        let handle = tokio::spawn(async move {
            // 1. Blocking phase, off the dispatch path and lock-free.
            let blocking_token = task_token.clone();
            let loaded =
                match tokio::task::spawn_blocking(move || plan.execute(&blocking_token)).await {
                    Ok(Some(loaded)) => loaded,
                    Ok(None) => return, // cancelled between roots
                    Err(e) => {
                        client
                            .log_message(
                                MessageType::ERROR,
                                format!("smithy-ls: project load panicked: {e}"),
                            )
                            .await;
                        return;
                    }
                };

            if task_token.is_cancelled() {
                return;
            }

            // 2. Quick install phase under the lock.
            {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.apply_loads(loaded);
            }

            // 3. Publish diagnostics for every open document.
            let minimum = options
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .diagnostics
                .minimum_severity;
            let enc = *encoding.read().unwrap_or_else(|e| e.into_inner());
            let updates = {
                let state = state.lock().unwrap_or_else(|e| e.into_inner());
                diagnostics_for_state(&state, minimum, enc)
            };
            for (uri, diagnostics) in updates {
                client.publish_diagnostics(uri, diagnostics, None).await;
            }

            // 4. Watchers last: the client round-trips may be slow and must
            //    not delay diagnostics.
            let registrations = {
                let state = state.lock().unwrap_or_else(|e| e.into_inner());
                watch::registrations(&state)
            };
            let _ = client.unregister_capability(watch::unregistrations()).await;
            if let Err(e) = client.register_capability(registrations).await {
                client
                    .log_message(
                        MessageType::WARNING,
                        format!(
                            "smithy-ls: failed to register file watchers ({e}); \
                             filesystem changes won't be tracked"
                        ),
                    )
                    .await;
            }
        });

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.lifecycle.put(&key, TaskHandle::new(token, handle));
    }

    /// Schedule a background re-assembly for the project owning `uri`.
    ///
    /// The task debounces, snapshots a rebuild plan under the state lock,
    /// assembles on a blocking thread, and installs through the project's
    /// single mutation point. Registering it cancels any in-flight task for
    /// the same URI; the cancel token is observed at each checkpoint.
    fn spawn_rebuild(&self, uri: Uri, validate: bool) {
        let key = uri.as_str().to_string();
        let token = CancellationToken::new();
        let task_token = token.clone();

        let client = self.client.clone();
        let state = Arc::clone(&self.state);
        let options = Arc::clone(&self.options);
        let encoding = Arc::clone(&self.encoding);

        let handle = tokio::spawn(async move {
            // 1. Debounce: let a burst of keystrokes settle.
            tokio::select! {
                _ = tokio::time::sleep(REBUILD_DEBOUNCE) => {}
                _ = task_token.cancelled() => return,
            }

            // 2. Snapshot the rebuild plan.
            let Some(path) = uri_path(&uri) else { return };
            let planned = {
                let state = state.lock().unwrap_or_else(|e| e.into_inner());
                state.find_owner(uri.as_str(), &path).and_then(|owner| {
                    state.project(&owner).map(|project| {
                        let plan = if validate {
                            project.plan_full_rebuild(true)
                        } else {
                            project
                                .plan_incremental_rebuild(&path)
                                .unwrap_or_else(|| project.plan_full_rebuild(false))
                        };
                        (owner, plan)
                    })
                })
            };
            let Some((owner, plan)) = planned else { return };
            let epoch = plan.epoch;

            if task_token.is_cancelled() {
                return;
            }

            // 3. Assemble off the dispatch path.
            let result = match tokio::task::spawn_blocking(move || plan.execute()).await {
                Ok(result) => result,
                Err(e) => {
                    client
                        .log_message(
                            MessageType::ERROR,
                            format!("smithy-ls: assembly task panicked: {e}"),
                        )
                        .await;
                    return;
                }
            };

            if task_token.is_cancelled() {
                return;
            }

            // 4. Single mutation point; results stale against a newer edit
            //    are discarded here.
            let installed = {
                let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
                match state.project_mut(&owner) {
                    Some(project) => project.apply_rebuild(epoch, result),
                    None => false,
                }
            };
            if !installed {
                return;
            }

            // 5. Publish fresh diagnostics for every open document.
            let minimum = options
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .diagnostics
                .minimum_severity;
            let enc = *encoding.read().unwrap_or_else(|e| e.into_inner());
            let updates = {
                let state = state.lock().unwrap_or_else(|e| e.into_inner());
                diagnostics_for_state(&state, minimum, enc)
            };
            for (uri, diagnostics) in updates {
                client.publish_diagnostics(uri, diagnostics, None).await;
            }
        });

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.lifecycle.put(&key, TaskHandle::new(token, handle));
    }
}

impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        // Negotiate positionEncoding: prefer UTF-8 if the client offers it.
        let enc = params
            .capabilities
            .general
            .as_ref()
            .and_then(|g| g.position_encodings.as_ref())
            .and_then(|encs| {
                encs.iter()
                    .find(|e| e.as_str() == PositionEncodingKind::UTF8.as_str())
            })
            .map(|_| NegotiatedEncoding::Utf8)
            .unwrap_or(NegotiatedEncoding::Utf16);
        *self.encoding.write().unwrap_or_else(|e| e.into_inner()) = enc;

        if let Some(raw) = params.initialization_options {
            match serde_json::from_value::<InitializationOptions>(raw) {
                Ok(parsed) => {
                    *self.options.write().unwrap_or_else(|e| e.into_inner()) = parsed;
                }
                Err(e) => {
                    self.client
                        .log_message(
                            MessageType::WARNING,
                            format!("smithy-ls: invalid initialization options: {e}"),
                        )
                        .await;
                }
            }
        }

        // Stash workspace roots for `initialized`.
        let roots: Vec<PathBuf> = params
            .workspace_folders
            .unwrap_or_default()
            .iter()
            .filter_map(|folder| uri_path(&folder.uri))
            .collect();
        *self
            .pending_roots
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = roots;

        let position_encoding = match enc {
            NegotiatedEncoding::Utf8 => PositionEncodingKind::UTF8,
            NegotiatedEncoding::Utf16 => PositionEncodingKind::UTF16,
        };

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "smithy-ls".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            offset_encoding: None,
            capabilities: ServerCapabilities {
                position_encoding: Some(position_encoding),
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::INCREMENTAL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                document_symbol_provider: Some(OneOf::Left(true)),
                workspace: Some(WorkspaceServerCapabilities {
                    workspace_folders: Some(WorkspaceFoldersServerCapabilities {
                        supported: Some(true),
                        change_notifications: Some(OneOf::Left(true)),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        let roots = std::mem::take(
            &mut *self
                .pending_roots
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );
        let plan = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.initialize_workspace(roots)
        };
        match plan {
            Some(plan) => self.spawn_load(WORKSPACE_TASK_KEY.to_string(), plan),
            None => self.refresh_watchers(),
        }
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.lifecycle.cancel_all_tasks();
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(path) = uri_path(&uri) else {
            self.client
                .log_message(
                    MessageType::INFO,
                    format!("smithy-ls: skipping unsupported URI: {}", uri.as_str()),
                )
                .await;
            return;
        };

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.open(uri.as_str(), &path, &params.text_document.text);
        }
        self.publish_all_diagnostics().await;
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(path) = uri_path(&uri) else { return };
        let enc = self.current_encoding();

        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.is_managed(uri.as_str()) {
                return;
            }
            // Incremental sync: each change's range addresses the document
            // as left by the previous change.
            for change in &params.content_changes {
                let byte_range = change.range.map(|range| {
                    let doc = state
                        .find_owner(uri.as_str(), &path)
                        .and_then(|owner| state.project(&owner))
                        .and_then(|p| p.file(&path))
                        .map(ProjectFile::document);
                    match doc {
                        Some(doc) => {
                            let start_col = lsp_col_to_byte(
                                doc.line_text(range.start.line as usize),
                                range.start.character,
                                enc,
                            );
                            let end_col = lsp_col_to_byte(
                                doc.line_text(range.end.line as usize),
                                range.end.character,
                                enc,
                            );
                            let start = doc.index_of_position(range.start.line as usize, start_col);
                            let end = doc.index_of_position(range.end.line as usize, end_col);
                            start..end
                        }
                        None => 0..0,
                    }
                });
                state.apply_change(uri.as_str(), byte_range, &change.text);
            }
        }

        let only_on_save = self
            .options
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .only_reload_on_save;
        if !only_on_save {
            self.spawn_rebuild(uri, false);
        }
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let uri = params.text_document.uri;
        let Some(path) = uri_path(&uri) else { return };

        if BuildFileKind::of_path(&path).is_some() {
            // A saved build file is a config change: reload and migrate
            // documents between the attached and detached sets. The reload
            // itself runs off the dispatch path.
            let plan = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                state.build_file_changed(&path)
            };
            match plan {
                Some(plan) => self.spawn_load(uri.as_str().to_string(), plan),
                None => {
                    self.refresh_watchers();
                    self.publish_all_diagnostics().await;
                }
            }
            return;
        }

        // Full-validation re-assembly of the owning project.
        self.spawn_rebuild(uri, true);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let uri = params.text_document.uri;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.close(uri.as_str());
        }
        // Clear diagnostics for the closed document.
        self.client.publish_diagnostics(uri, vec![], None).await;
    }

    async fn did_change_watched_files(&self, params: DidChangeWatchedFilesParams) {
        // In-place transitions happen under the lock; anything that needs a
        // project (re)load comes back as a plan and runs on a worker.
        let mut plans: Vec<(String, LoadPlan)> = Vec::new();
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            for change in &params.changes {
                let Some(path) = uri_path(&change.uri) else {
                    continue;
                };
                let plan = match change.typ {
                    FileChangeType::CREATED => state.file_created(&path),
                    FileChangeType::DELETED => state.file_deleted(&path),
                    FileChangeType::CHANGED => {
                        if BuildFileKind::of_path(&path).is_some() {
                            state.build_file_changed(&path)
                        } else {
                            None
                        }
                    }
                    _ => None,
                };
                if let Some(plan) = plan {
                    plans.push((change.uri.as_str().to_string(), plan));
                }
            }
        }

        if plans.is_empty() {
            self.refresh_watchers();
            self.publish_all_diagnostics().await;
        } else {
            // The load tasks publish diagnostics and refresh watchers once
            // the new projects are installed.
            for (key, plan) in plans {
                self.spawn_load(key, plan);
            }
        }
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        // The settings payload mirrors the initialization options.
        if params.settings.is_null() {
            return;
        }
        match serde_json::from_value::<InitializationOptions>(params.settings) {
            Ok(parsed) => {
                *self.options.write().unwrap_or_else(|e| e.into_inner()) = parsed;
                self.publish_all_diagnostics().await;
            }
            Err(e) => {
                self.client
                    .log_message(
                        MessageType::WARNING,
                        format!("smithy-ls: invalid configuration: {e}"),
                    )
                    .await;
            }
        }
    }

    async fn did_change_workspace_folders(&self, params: DidChangeWorkspaceFoldersParams) {
        let added: Vec<PathBuf> = params
            .event
            .added
            .iter()
            .filter_map(|f| uri_path(&f.uri))
            .collect();
        let removed: Vec<PathBuf> = params
            .event
            .removed
            .iter()
            .filter_map(|f| uri_path(&f.uri))
            .collect();
        let plan = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.workspace_folders_changed(&added, &removed)
        };
        match plan {
            Some(plan) => self.spawn_load(WORKSPACE_TASK_KEY.to_string(), plan),
            None => {
                self.refresh_watchers();
                self.publish_all_diagnostics().await;
            }
        }
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(path) = uri_path(&uri) else {
            return Ok(None);
        };
        let enc = self.current_encoding();

        // Read the latest completed assembly; staleness is acceptable.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(owner) = state.find_owner(uri.as_str(), &path) else {
            return Ok(None);
        };
        let Some(project) = state.project_mut(&owner) else {
            return Ok(None);
        };
        let Some((document_id, resolved)) = resolve_at_position(project, &path, position, enc)
        else {
            return Ok(None);
        };
        let Some(shape) = project
            .model_result()
            .result()
            .and_then(|m| m.shape(&resolved))
        else {
            return Ok(None);
        };

        let mut sections = vec![format!("**{}** ({})", shape.id, shape.kind.type_name())];
        if let Some(docs) = shape
            .traits
            .get(&ShapeId::prelude("documentation"))
            .and_then(|n| n.as_str())
        {
            sections.push(docs.to_string());
        }
        let applied: Vec<String> = shape
            .traits
            .keys()
            .map(|id| format!("`@{}`", id.name()))
            .collect();
        if !applied.is_empty() {
            sections.push(applied.join(" "));
        }

        let range = project.file(&path).map(|f| {
            let doc = f.document();
            let start = doc.position_of_index(document_id.range.start);
            let end = doc.position_of_index(document_id.range.end);
            Range::new(
                Position::new(
                    start.line as u32,
                    byte_col_to_lsp(doc.line_text(start.line), start.column, enc),
                ),
                Position::new(
                    end.line as u32,
                    byte_col_to_lsp(doc.line_text(end.line), end.column, enc),
                ),
            )
        });

        Ok(Some(Hover {
            contents: HoverContents::Markup(MarkupContent {
                kind: MarkupKind::Markdown,
                value: sections.join("\n\n"),
            }),
            range,
        }))
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let Some(path) = uri_path(&uri) else {
            return Ok(None);
        };
        let enc = self.current_encoding();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(owner) = state.find_owner(uri.as_str(), &path) else {
            return Ok(None);
        };
        let Some(project) = state.project_mut(&owner) else {
            return Ok(None);
        };
        let Some((_, resolved)) = resolve_at_position(project, &path, position, enc) else {
            return Ok(None);
        };
        let source = match project
            .model_result()
            .result()
            .and_then(|m| m.shape(&resolved))
        {
            Some(shape) => shape.source.clone(),
            None => return Ok(None),
        };
        // Prelude and synthetic shapes have no source to jump to.
        let Some(file) = source.file else {
            return Ok(None);
        };

        let line = source.line.saturating_sub(1);
        let column = source.column.saturating_sub(1);
        let character = project
            .file(&file)
            .map(|f| byte_col_to_lsp(f.document().line_text(line), column, enc))
            .unwrap_or(column as u32);
        let target = Position::new(line as u32, character);
        let Some(target_uri) = path_uri(&file) else {
            return Ok(None);
        };

        Ok(Some(GotoDefinitionResponse::Scalar(Location {
            uri: target_uri,
            range: Range::new(target, target),
        })))
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let uri = params.text_document.uri;
        let Some(path) = uri_path(&uri) else {
            return Ok(None);
        };
        let enc = self.current_encoding();

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(owner) = state.find_owner(uri.as_str(), &path) else {
            return Ok(None);
        };
        let Some(project) = state.project_mut(&owner) else {
            return Ok(None);
        };
        let Some(ProjectFile::Idl(file)) = project.file_mut(&path) else {
            return Ok(None);
        };

        let declared: Vec<(String, std::ops::Range<usize>, ShapeType)> = file
            .parsed()
            .shapes
            .iter()
            .map(|s| (s.name.clone(), s.name_span.clone(), s.shape_type))
            .collect();
        let doc = file.document();

        #[allow(deprecated)]
        let symbols: Vec<DocumentSymbol> = declared
            .into_iter()
            .map(|(name, span, shape_type)| {
                let start = doc.position_of_index(span.start);
                let end = doc.position_of_index(span.end);
                let range = Range::new(
                    Position::new(
                        start.line as u32,
                        byte_col_to_lsp(doc.line_text(start.line), start.column, enc),
                    ),
                    Position::new(
                        end.line as u32,
                        byte_col_to_lsp(doc.line_text(end.line), end.column, enc),
                    ),
                );
                DocumentSymbol {
                    name,
                    detail: None,
                    kind: symbol_kind(shape_type),
                    tags: None,
                    deprecated: None,
                    range,
                    selection_range: range,
                    children: None,
                }
            })
            .collect();

        Ok(Some(DocumentSymbolResponse::Nested(symbols)))
    }
}

fn symbol_kind(shape_type: ShapeType) -> SymbolKind {
    match shape_type {
        ShapeType::Structure => SymbolKind::STRUCT,
        ShapeType::Union | ShapeType::Enum => SymbolKind::ENUM,
        ShapeType::List | ShapeType::Map => SymbolKind::ARRAY,
        ShapeType::Simple(_) => SymbolKind::VARIABLE,
    }
}

/// The shape id token under the cursor, resolved against the file's
/// namespace and use statements.
fn resolve_at_position(
    project: &mut Project,
    path: &Path,
    position: Position,
    enc: NegotiatedEncoding,
) -> Option<(DocumentId, ShapeId)> {
    let ProjectFile::Idl(file) = project.file_mut(path)? else {
        return None;
    };
    let line = position.line as usize;
    let byte_col = lsp_col_to_byte(file.document().line_text(line), position.character, enc);
    let offset = file.document().index_of_position(line, byte_col);
    let document_id = file.document().copy_document_id(offset)?;
    let resolved = file.parsed().resolve(&document_id.text)?;
    Some((document_id, resolved))
}

/// Start the LSP server over stdio.
pub async fn run_server() {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;
}
