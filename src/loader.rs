use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::config::{self, BuildFileKind};
use crate::document::Document;
use crate::maven::MavenResolver;
use crate::model::{SourceLocation, ValidationEvent};
use crate::project::{Project, ProjectType};

/// In-memory texts of managed documents, keyed by absolute path. The loader
/// adopts these over disk reads so reloads never lose unsaved edits.
pub type ManagedTexts = HashMap<PathBuf, String>;

/// Build a `Project` for a root directory: resolve its configuration,
/// resolve Maven dependencies, gather build and model files (adopting
/// managed documents), and run the initial assembly.
pub fn load_project(root: &Path, managed: &ManagedTexts) -> Project {
    let (config, mut events) = config::load_project_config(root);
    if config.is_empty() {
        return Project::empty(root);
    }

    if !config.maven_dependencies.is_empty() {
        let mut resolver = MavenResolver::new();
        for repo in &config.maven_repositories {
            resolver.add_repository(repo);
        }
        for dep in &config.maven_dependencies {
            resolver.add_dependency(dep);
        }
        let (_artifacts, errors) = resolver.resolve();
        let location = config
            .build_files
            .first()
            .map(|(_, p)| SourceLocation::new(p, 1, 1))
            .unwrap_or_else(SourceLocation::none);
        for error in errors {
            events.push(ValidationEvent::error(
                "Config",
                error.to_string(),
                location.clone(),
            ));
        }
    }

    let build_files: Vec<(BuildFileKind, PathBuf, String)> = config
        .build_files
        .iter()
        .map(|(kind, path)| {
            let text = managed
                .get(path)
                .cloned()
                .or_else(|| std::fs::read_to_string(path).ok())
                .unwrap_or_default();
            (*kind, path.clone(), text)
        })
        .collect();

    let mut model_files = config::resolve_model_files(&config);
    // Managed documents covered by the config but not (yet) on disk still
    // belong to the project.
    let mut extras: Vec<&PathBuf> = managed
        .keys()
        .filter(|p| config.covers(p) && !model_files.contains(p))
        .collect();
    extras.sort();
    model_files.extend(extras.into_iter().cloned());

    let mut project = Project::new(root, ProjectType::Normal, config, events);
    for (kind, path, text) in build_files {
        project.insert_build_file(path, kind, Document::new(text));
    }
    for path in model_files {
        let text = match managed.get(&path) {
            Some(text) => text.clone(),
            // A file that vanished between discovery and read is dropped
            // from the project rather than failing the whole load.
            None => match std::fs::read_to_string(&path) {
                Ok(text) => text,
                Err(_) => continue,
            },
        };
        project.insert_idl_file(path, Document::new(text));
    }

    project.rebuild_now(true);
    project
}

/// Find every project root under a workspace root: directories that carry at
/// least one build file, searched recursively. Symlinks are followed with
/// the walker's loop detection.
pub fn discover_project_roots(workspace_root: &Path) -> Vec<PathBuf> {
    let mut roots: BTreeSet<PathBuf> = BTreeSet::new();
    let walker = WalkBuilder::new(workspace_root)
        .hidden(false)
        .follow_links(true)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .build();
    for entry in walker.flatten() {
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        if BuildFileKind::of_path(entry.path()).is_some()
            && let Some(parent) = entry.path().parent()
        {
            roots.insert(parent.to_path_buf());
        }
    }
    roots.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SMITHY_BUILD;

    #[test]
    fn load_without_build_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let project = load_project(dir.path(), &ManagedTexts::new());
        assert_eq!(project.project_type(), ProjectType::Empty);
        assert!(!project.has_build_files());
    }

    #[test]
    fn load_assembles_declared_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SMITHY_BUILD),
            r#"{"version": "1.0", "sources": ["model"]}"#,
        )
        .unwrap();
        let model_dir = dir.path().join("model");
        std::fs::create_dir_all(&model_dir).unwrap();
        std::fs::write(
            model_dir.join("main.smithy"),
            "$version: \"2\"\nnamespace com.example\nstring Name\n",
        )
        .unwrap();

        let project = load_project(dir.path(), &ManagedTexts::new());
        assert_eq!(project.project_type(), ProjectType::Normal);
        assert_eq!(project.idl_paths().len(), 1);
        let model = project.model_result().result().unwrap();
        assert!(
            model
                .shape(&crate::model::ShapeId::parse("com.example#Name").unwrap())
                .is_some()
        );
    }

    #[test]
    fn load_adopts_managed_documents_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SMITHY_BUILD),
            r#"{"sources": ["main.smithy"]}"#,
        )
        .unwrap();
        let main = dir.path().join("main.smithy");
        std::fs::write(&main, "namespace com.example\nstring OnDisk\n").unwrap();

        let mut managed = ManagedTexts::new();
        managed.insert(
            main.clone(),
            "namespace com.example\nstring InMemory\n".to_string(),
        );

        let project = load_project(dir.path(), &managed);
        let model = project.model_result().result().unwrap();
        assert!(
            model
                .shape(&crate::model::ShapeId::parse("com.example#InMemory").unwrap())
                .is_some()
        );
        assert!(
            model
                .shape(&crate::model::ShapeId::parse("com.example#OnDisk").unwrap())
                .is_none()
        );
    }

    #[test]
    fn discover_finds_nested_projects() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        std::fs::write(dir.path().join("a").join(SMITHY_BUILD), "{}").unwrap();
        std::fs::write(
            dir.path().join("b/nested").join(".smithy-project.json"),
            "{}",
        )
        .unwrap();

        let roots = discover_project_roots(dir.path());
        assert_eq!(roots.len(), 2);
        assert!(roots.contains(&dir.path().join("a")));
        assert!(roots.contains(&dir.path().join("b/nested")));
    }
}
