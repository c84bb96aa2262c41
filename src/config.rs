use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use ignore::WalkBuilder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{SourceLocation, ValidationEvent};

pub const SMITHY_BUILD: &str = "smithy-build.json";
pub const SMITHY_PROJECT: &str = ".smithy-project.json";

/// The two build-file flavours a project root may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildFileKind {
    SmithyBuild,
    SmithyProject,
}

impl BuildFileKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::SmithyBuild => SMITHY_BUILD,
            Self::SmithyProject => SMITHY_PROJECT,
        }
    }

    /// Classify a path by its file name.
    pub fn of_path(path: &Path) -> Option<Self> {
        match path.file_name()?.to_str()? {
            SMITHY_BUILD => Some(Self::SmithyBuild),
            SMITHY_PROJECT => Some(Self::SmithyProject),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    Parse { path: String, message: String },
}

/// `smithy-build.json`, as written. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
#[schemars(rename = "smithy-build configuration")]
pub struct SmithyBuildJson {
    /// Build file format version.
    pub version: Option<String>,

    /// Model source paths: files or directories, relative to the build file.
    pub sources: Vec<String>,

    /// Additional model paths assembled but not treated as sources.
    pub imports: Vec<String>,

    /// Maven dependency configuration.
    pub maven: Option<MavenSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MavenSection {
    /// Dependency coordinates, `group:artifact:version`.
    pub dependencies: Vec<String>,

    /// Repositories to resolve against, in order.
    pub repositories: Vec<MavenRepository>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct MavenRepository {
    /// Repository root URL.
    pub url: String,
}

/// `.smithy-project.json`, as written. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SmithyProjectJson {
    pub sources: Vec<String>,
}

/// The effective configuration of one project: the merge of whichever build
/// files exist under the root. `build_files` empty means the root has no
/// configuration at all (an EMPTY project), which is distinct from a missing
/// root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectConfig {
    pub version: Option<String>,
    /// Declared source paths, absolute and lexically normalised.
    pub sources: Vec<PathBuf>,
    /// Declared import paths, absolute and lexically normalised.
    pub imports: Vec<PathBuf>,
    pub maven_dependencies: Vec<String>,
    pub maven_repositories: Vec<String>,
    pub build_files: Vec<(BuildFileKind, PathBuf)>,
}

impl ProjectConfig {
    pub fn is_empty(&self) -> bool {
        self.build_files.is_empty()
    }

    /// Declared sources and imports in merge order.
    pub fn model_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.sources.iter().chain(self.imports.iter())
    }

    /// Whether `path` is equal to or under any declared source/import.
    pub fn covers(&self, path: &Path) -> bool {
        self.model_paths().any(|p| path == p || path.starts_with(p))
    }
}

/// Resolve the effective config for `root`. Errors never abort the load;
/// they accumulate as events located on the offending build file.
pub fn load_project_config(root: &Path) -> (ProjectConfig, Vec<ValidationEvent>) {
    let mut config = ProjectConfig::default();
    let mut events = Vec::new();

    let build_path = root.join(SMITHY_BUILD);
    if build_path.exists() {
        match read_json_file(&build_path) {
            Ok(value) => {
                events.extend(validate_smithy_build(&value, &build_path));
                match serde_json::from_value::<SmithyBuildJson>(value) {
                    Ok(parsed) => {
                        config.version = parsed.version;
                        config
                            .sources
                            .extend(parsed.sources.iter().map(|s| normalize_path(root, s)));
                        config
                            .imports
                            .extend(parsed.imports.iter().map(|s| normalize_path(root, s)));
                        if let Some(maven) = parsed.maven {
                            config.maven_dependencies = maven.dependencies;
                            config.maven_repositories =
                                maven.repositories.into_iter().map(|r| r.url).collect();
                        }
                    }
                    Err(e) => events.push(config_event(&build_path, e.to_string())),
                }
                config
                    .build_files
                    .push((BuildFileKind::SmithyBuild, build_path));
            }
            Err(e) => {
                events.push(config_event(&build_path, e.to_string()));
                config
                    .build_files
                    .push((BuildFileKind::SmithyBuild, build_path));
            }
        }
    }

    let project_path = root.join(SMITHY_PROJECT);
    if project_path.exists() {
        match read_json_file(&project_path).and_then(|value| {
            serde_json::from_value::<SmithyProjectJson>(value).map_err(|e| ConfigError::Parse {
                path: project_path.display().to_string(),
                message: e.to_string(),
            })
        }) {
            Ok(parsed) => {
                config
                    .sources
                    .extend(parsed.sources.iter().map(|s| normalize_path(root, s)));
            }
            Err(e) => events.push(config_event(&project_path, e.to_string())),
        }
        config
            .build_files
            .push((BuildFileKind::SmithyProject, project_path));
    }

    dedupe_paths(&mut config.sources);
    dedupe_paths(&mut config.imports);

    (config, events)
}

fn config_event(path: &Path, message: String) -> ValidationEvent {
    ValidationEvent::error("Config", message, SourceLocation::new(path, 1, 1))
}

/// Read and parse a build file leniently (comments and trailing commas are
/// tolerated, the way editors leave them).
fn read_json_file(path: &Path) -> Result<serde_json::Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        source: e,
    })?;

    let parsed = jsonc_parser::parse_to_serde_value(
        &content,
        &jsonc_parser::ParseOptions {
            allow_comments: true,
            allow_trailing_commas: true,
            ..Default::default()
        },
    )
    .map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    parsed.ok_or_else(|| ConfigError::Parse {
        path: path.display().to_string(),
        message: "empty config file".to_string(),
    })
}

static BUILD_SCHEMA: OnceLock<Option<jsonschema::Validator>> = OnceLock::new();

/// Structural validation of smithy-build.json against its generated schema.
/// Violations are warnings; serde stays lenient regardless.
fn validate_smithy_build(value: &serde_json::Value, path: &Path) -> Vec<ValidationEvent> {
    let validator = BUILD_SCHEMA.get_or_init(|| {
        let schema = schemars::schema_for!(SmithyBuildJson);
        let schema_value = serde_json::to_value(&schema).ok()?;
        jsonschema::validator_for(&schema_value).ok()
    });
    let Some(validator) = validator else {
        return Vec::new();
    };
    validator
        .iter_errors(value)
        .map(|err| {
            ValidationEvent::warning(
                "Config",
                format!("{} (at {})", err, err.instance_path()),
                SourceLocation::new(path, 1, 1),
            )
        })
        .collect()
}

/// Lexical normalisation: resolve against `root` when relative, drop `.`
/// components, fold `..` without touching the filesystem.
pub fn normalize_path(root: &Path, raw: &str) -> PathBuf {
    let candidate = Path::new(raw);
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn dedupe_paths(paths: &mut Vec<PathBuf>) {
    let mut seen = HashSet::new();
    paths.retain(|p| seen.insert(p.clone()));
}

/// Expand the declared source/import paths to the concrete model files that
/// exist on disk: directories recurse to `.smithy` and `.json` files, files
/// pass through, missing entries are skipped without error.
pub fn resolve_model_files(config: &ProjectConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut seen = HashSet::new();

    for declared in config.model_paths() {
        if declared.is_dir() {
            let walker = WalkBuilder::new(declared)
                .hidden(false)
                .git_ignore(true)
                .git_global(true)
                .git_exclude(true)
                .sort_by_file_path(|a, b| a.cmp(b))
                .build();
            for entry in walker.flatten() {
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    continue;
                }
                let path = entry.path();
                let is_model = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("smithy") | Some("json")
                );
                if is_model && BuildFileKind::of_path(path).is_none() && seen.insert(path.to_path_buf())
                {
                    files.push(path.to_path_buf());
                }
            }
        } else if declared.is_file() && seen.insert(declared.clone()) {
            files.push(declared.clone());
        }
    }

    files
}
