use tower_lsp_server::ls_types::{
    DidChangeWatchedFilesRegistrationOptions, FileSystemWatcher, GlobPattern, Registration,
    Unregistration, WatchKind,
};

use crate::state::ServerState;

pub const WATCH_BUILD_FILES_ID: &str = "WatchSmithyBuildFiles";
pub const WATCH_SMITHY_FILES_ID: &str = "WatchSmithyFiles";
pub const WATCHED_FILES_METHOD: &str = "workspace/didChangeWatchedFiles";

/// Matches either build-file name anywhere under a workspace root.
pub const BUILD_FILES_PATTERN: &str = "**/{smithy-build,.smithy-project}.json";

/// The two registration bundles for the current project set: build files per
/// workspace root, and model files per attached project's sources/imports.
/// Watch kinds are Create|Delete; in-editor changes arrive through text
/// sync, and build-file rewrites through save.
pub fn registrations(state: &ServerState) -> Vec<Registration> {
    vec![
        Registration {
            id: WATCH_BUILD_FILES_ID.to_string(),
            method: WATCHED_FILES_METHOD.to_string(),
            register_options: Some(
                serde_json::to_value(DidChangeWatchedFilesRegistrationOptions {
                    watchers: build_file_watchers(state),
                })
                .unwrap(),
            ),
        },
        Registration {
            id: WATCH_SMITHY_FILES_ID.to_string(),
            method: WATCHED_FILES_METHOD.to_string(),
            register_options: Some(
                serde_json::to_value(DidChangeWatchedFilesRegistrationOptions {
                    watchers: smithy_file_watchers(state),
                })
                .unwrap(),
            ),
        },
    ]
}

/// Clients do not de-duplicate watchers, so the previous bundle is always
/// unregistered before a new one is registered.
pub fn unregistrations() -> Vec<Unregistration> {
    vec![
        Unregistration {
            id: WATCH_BUILD_FILES_ID.to_string(),
            method: WATCHED_FILES_METHOD.to_string(),
        },
        Unregistration {
            id: WATCH_SMITHY_FILES_ID.to_string(),
            method: WATCHED_FILES_METHOD.to_string(),
        },
    ]
}

fn watcher(pattern: String) -> FileSystemWatcher {
    FileSystemWatcher {
        glob_pattern: GlobPattern::String(pattern),
        kind: Some(WatchKind::Create | WatchKind::Delete),
    }
}

fn build_file_watchers(state: &ServerState) -> Vec<FileSystemWatcher> {
    state
        .workspace_roots()
        .iter()
        .map(|root| watcher(format!("{}/{}", root.display(), BUILD_FILES_PATTERN)))
        .collect()
}

fn smithy_file_watchers(state: &ServerState) -> Vec<FileSystemWatcher> {
    let mut patterns: Vec<String> = Vec::new();
    for project in state.attached_projects() {
        for declared in project.config().model_paths() {
            let pattern = if declared.extension().is_some() {
                declared.display().to_string()
            } else {
                format!("{}/**/*.{{smithy,json}}", declared.display())
            };
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
    }
    patterns.sort();
    patterns.into_iter().map(watcher).collect()
}
