use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default repository consulted when a build file declares dependencies but
/// no repositories.
pub const MAVEN_CENTRAL: &str = "https://repo.maven.apache.org/maven2";

/// Re-check interval for cached artifacts.
const CACHE_TTL_SECS: i64 = 24 * 60 * 60;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Error)]
pub enum ResolverError {
    #[error("Invalid Maven coordinate '{0}': expected group:artifact:version")]
    InvalidCoordinate(String),
    #[error("Failed to fetch '{url}': {reason}")]
    Fetch { url: String, reason: String },
    #[error("Dependency '{coord}' not found in any configured repository")]
    NotFound { coord: String },
    #[error("Failed to write artifact cache: {0}")]
    Cache(String),
}

/// A `group:artifact:version` coordinate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MavenCoord {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl MavenCoord {
    pub fn parse(s: &str) -> Result<Self, ResolverError> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(group), Some(artifact), Some(version), None)
                if !group.is_empty() && !artifact.is_empty() && !version.is_empty() =>
            {
                Ok(Self {
                    group: group.to_string(),
                    artifact: artifact.to_string(),
                    version: version.to_string(),
                })
            }
            _ => Err(ResolverError::InvalidCoordinate(s.to_string())),
        }
    }

    /// Jar URL under a Maven-layout repository root.
    pub fn jar_url(&self, repository: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}-{}.jar",
            repository.trim_end_matches('/'),
            self.group.replace('.', "/"),
            self.artifact,
            self.version,
            self.artifact,
            self.version,
        )
    }
}

impl std::fmt::Display for MavenCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)
    }
}

/// A dependency resolved to a local jar path.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub coord: MavenCoord,
    pub path: PathBuf,
}

/// Cache directory for fetched artifacts.
pub fn cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("smithy-ls").join("m2"))
}

fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct CacheMeta {
    url: String,
    fetched_at: String,
}

static HTTP_CLIENT: OnceLock<reqwest::blocking::Client> = OnceLock::new();

fn get_http_client() -> &'static reqwest::blocking::Client {
    HTTP_CLIENT.get_or_init(|| {
        reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("failed to build HTTP client")
    })
}

/// Process-wide memo of already-resolved jar URLs. Immutable per entry after
/// first resolution; tests and repeat loads skip the network entirely.
static RESOLVED: OnceLock<Mutex<HashMap<String, PathBuf>>> = OnceLock::new();

fn resolved_memo() -> &'static Mutex<HashMap<String, PathBuf>> {
    RESOLVED.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Maven dependency resolver: collect repositories and coordinates, then
/// `resolve` them all. Failures are per-dependency and collected, never
/// thrown — a project with one bad dependency still loads.
#[derive(Debug, Default)]
pub struct MavenResolver {
    repositories: Vec<String>,
    dependencies: Vec<MavenCoord>,
    invalid: Vec<ResolverError>,
}

impl MavenResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repository(&mut self, url: impl Into<String>) {
        self.repositories.push(url.into());
    }

    pub fn add_dependency(&mut self, coordinate: &str) {
        match MavenCoord::parse(coordinate) {
            Ok(coord) => self.dependencies.push(coord),
            Err(e) => self.invalid.push(e),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.invalid.is_empty()
    }

    /// Resolve every dependency against the configured repositories (Maven
    /// Central when none are configured).
    pub fn resolve(&self) -> (Vec<ResolvedArtifact>, Vec<ResolverError>) {
        let mut artifacts = Vec::new();
        let mut errors = self.invalid.clone();

        let repositories: Vec<&str> = if self.repositories.is_empty() {
            vec![MAVEN_CENTRAL]
        } else {
            self.repositories.iter().map(String::as_str).collect()
        };

        for coord in &self.dependencies {
            let mut found = None;
            for repo in &repositories {
                match fetch_artifact(coord, repo) {
                    Ok(path) => {
                        found = Some(path);
                        break;
                    }
                    Err(_) => continue,
                }
            }
            match found {
                Some(path) => artifacts.push(ResolvedArtifact {
                    coord: coord.clone(),
                    path,
                }),
                None => errors.push(ResolverError::NotFound {
                    coord: coord.to_string(),
                }),
            }
        }

        (artifacts, errors)
    }
}

/// Fetch one artifact, preferring the in-memory memo, then the disk cache,
/// then the network.
fn fetch_artifact(coord: &MavenCoord, repository: &str) -> Result<PathBuf, ResolverError> {
    let url = coord.jar_url(repository);

    if let Some(path) = resolved_memo()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(&url)
        .cloned()
    {
        return Ok(path);
    }

    let base = cache_dir().ok_or_else(|| ResolverError::Cache(
        "cannot determine cache directory".to_string(),
    ))?;
    let hash = url_hash(&url);
    let jar_path = base.join(format!("{hash}.jar"));
    let meta_path = base.join(format!("{hash}.meta"));

    if jar_path.exists() && is_within_ttl(&meta_path) {
        remember(&url, &jar_path);
        return Ok(jar_path);
    }

    let bytes = fetch_url(&url)?;
    write_cache(&base, &jar_path, &meta_path, &url, &bytes)
        .map_err(|e| ResolverError::Cache(e.to_string()))?;
    remember(&url, &jar_path);
    Ok(jar_path)
}

fn remember(url: &str, path: &Path) {
    resolved_memo()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(url.to_string(), path.to_path_buf());
}

fn is_within_ttl(meta_path: &Path) -> bool {
    let meta = fs::read_to_string(meta_path)
        .ok()
        .and_then(|s| serde_json::from_str::<CacheMeta>(&s).ok());
    let fetched_at = meta.and_then(|m| m.fetched_at.parse::<jiff::Timestamp>().ok());
    match fetched_at {
        Some(ts) => ts.duration_until(jiff::Timestamp::now()).as_secs() < CACHE_TTL_SECS,
        None => false,
    }
}

fn fetch_url(url: &str) -> Result<Vec<u8>, ResolverError> {
    let client = get_http_client();
    let resp = client.get(url).send().map_err(|e| ResolverError::Fetch {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !resp.status().is_success() {
        return Err(ResolverError::Fetch {
            url: url.to_string(),
            reason: format!("HTTP {}", resp.status()),
        });
    }
    resp.bytes()
        .map(|b| b.to_vec())
        .map_err(|e| ResolverError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

fn write_cache(
    base: &Path,
    jar_path: &Path,
    meta_path: &Path,
    url: &str,
    bytes: &[u8],
) -> Result<(), std::io::Error> {
    fs::create_dir_all(base)?;
    fs::write(jar_path, bytes)?;
    let meta = CacheMeta {
        url: url.to_string(),
        fetched_at: jiff::Timestamp::now().to_string(),
    };
    fs::write(meta_path, serde_json::to_string_pretty(&meta)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_coordinates() {
        let coord = MavenCoord::parse("software.amazon.smithy:smithy-aws-traits:1.50.0").unwrap();
        assert_eq!(coord.group, "software.amazon.smithy");
        assert_eq!(coord.artifact, "smithy-aws-traits");
        assert_eq!(coord.version, "1.50.0");
        assert!(MavenCoord::parse("missing-parts").is_err());
        assert!(MavenCoord::parse("a:b:c:d").is_err());
        assert!(MavenCoord::parse("a::c").is_err());
    }

    #[test]
    fn jar_url_follows_maven_layout() {
        let coord = MavenCoord::parse("com.example:widget:2.1").unwrap();
        assert_eq!(
            coord.jar_url("https://repo.example.com/maven2/"),
            "https://repo.example.com/maven2/com/example/widget/2.1/widget-2.1.jar"
        );
    }

    #[test]
    fn invalid_coordinates_surface_as_errors_not_panics() {
        let mut resolver = MavenResolver::new();
        resolver.add_dependency("not-a-coordinate");
        let (artifacts, errors) = resolver.resolve();
        assert!(artifacts.is_empty());
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ResolverError::InvalidCoordinate(_)));
    }
}
