use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use crate::config::BuildFileKind;
use crate::document::Document;
use crate::lifecycle::DocumentLifecycleManager;
use crate::loader::{self, ManagedTexts};
use crate::model::Severity;
use crate::project::{Project, ProjectType};

/// Which project serves a URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    /// Keyed by project root.
    Attached(PathBuf),
    /// Keyed by URI.
    Detached(String),
}

/// The lifecycle event a deferred load was planned for; decides how the
/// loaded projects land in the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadCause {
    /// Workspace discovery: install only roots not yet attached.
    Discovery,
    /// Watched `Created`: install, replacing any prior project at the root.
    Created,
    /// A build file was deleted: install unless no build files remain, in
    /// which case the project is dropped.
    BuildFileDeleted,
    /// A build file changed: a broken reload keeps the previous project,
    /// an empty one drops it, anything else replaces it.
    BuildFileChanged,
}

/// A project load decided by a lifecycle transition but executed off the
/// dispatch path. Planned under the state lock (capturing the in-memory
/// document texts to adopt), executed on a blocking thread with
/// [`LoadPlan::execute`], and installed back with
/// [`ServerState::apply_loads`]. Config resolution, Maven resolution, and
/// assembly all happen in the execute phase, without the state lock.
#[derive(Debug)]
pub struct LoadPlan {
    cause: LoadCause,
    /// Project roots to load; workspace roots when `discover` is set.
    roots: Vec<PathBuf>,
    discover: bool,
    texts: ManagedTexts,
}

impl LoadPlan {
    /// Run the blocking phase: discovery, config and dependency resolution,
    /// and the initial assembly of each root. Observes `cancel` between
    /// roots; returns `None` when cancelled, leaving no partial mutation
    /// (installation happens only in `apply_loads`).
    pub fn execute(self, cancel: &CancellationToken) -> Option<LoadedProjects> {
        let roots: Vec<PathBuf> = if self.discover {
            self.roots
                .iter()
                .flat_map(|root| loader::discover_project_roots(root))
                .collect()
        } else {
            self.roots
        };

        let mut loads = Vec::new();
        for root in roots {
            if cancel.is_cancelled() {
                return None;
            }
            let project = loader::load_project(&root, &self.texts);
            loads.push((root, project));
        }
        Some(LoadedProjects {
            cause: self.cause,
            loads,
        })
    }
}

/// The outcome of a [`LoadPlan`], ready to be installed.
#[derive(Debug)]
pub struct LoadedProjects {
    cause: LoadCause,
    loads: Vec<(PathBuf, Project)>,
}

/// The top-level aggregate: workspace roots, attached and detached projects,
/// the managed (open) URIs, and the background-task registry. Every
/// lifecycle transition the server supports is a method here; all of them
/// run on the single request-dispatching path, so there is no interior
/// locking. Transitions that need disk or network do their blocking work
/// through a [`LoadPlan`]: the method plans under the lock, the plan
/// executes on a worker thread, and `apply_loads` installs the result back
/// under the lock.
#[derive(Debug, Default)]
pub struct ServerState {
    workspace_roots: Vec<PathBuf>,
    attached: HashMap<PathBuf, Project>,
    detached: HashMap<String, Project>,
    /// URI → absolute path for every open document.
    managed: HashMap<String, PathBuf>,
    pub lifecycle: DocumentLifecycleManager,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workspace_roots(&self) -> &[PathBuf] {
        &self.workspace_roots
    }

    pub fn is_managed(&self, uri: &str) -> bool {
        self.managed.contains_key(uri)
    }

    pub fn managed_uris(&self) -> impl Iterator<Item = (&String, &PathBuf)> {
        self.managed.iter()
    }

    pub fn path_of(&self, uri: &str) -> Option<&PathBuf> {
        self.managed.get(uri)
    }

    pub fn attached_projects(&self) -> impl Iterator<Item = &Project> {
        self.attached.values()
    }

    pub fn detached_projects(&self) -> impl Iterator<Item = &Project> {
        self.detached.values()
    }

    /// The project serving `uri`. Attached projects win over any detached
    /// leftover for the same URI.
    pub fn find_owner(&self, uri: &str, path: &Path) -> Option<Owner> {
        if let Some(root) = self.attached_root_containing(path) {
            return Some(Owner::Attached(root));
        }
        if self.detached.contains_key(uri) {
            return Some(Owner::Detached(uri.to_string()));
        }
        None
    }

    pub fn project(&self, owner: &Owner) -> Option<&Project> {
        match owner {
            Owner::Attached(root) => self.attached.get(root),
            Owner::Detached(uri) => self.detached.get(uri),
        }
    }

    pub fn project_mut(&mut self, owner: &Owner) -> Option<&mut Project> {
        match owner {
            Owner::Attached(root) => self.attached.get_mut(root),
            Owner::Detached(uri) => self.detached.get_mut(uri),
        }
    }

    fn attached_root_containing(&self, path: &Path) -> Option<PathBuf> {
        self.attached
            .iter()
            .find(|(_, p)| p.contains_file(path))
            .map(|(root, _)| root.clone())
    }

    fn attached_root_covering(&self, path: &Path) -> Option<PathBuf> {
        self.attached
            .iter()
            .find(|(_, p)| p.config().covers(path))
            .map(|(root, _)| root.clone())
    }

    /// Current in-memory text of every managed document, for loaders to
    /// adopt instead of reading disk.
    pub fn managed_texts(&self) -> ManagedTexts {
        let mut texts = ManagedTexts::new();
        for (uri, path) in &self.managed {
            let project = self
                .find_owner(uri, path)
                .and_then(|owner| self.project(&owner));
            if let Some(file) = project.and_then(|p| p.file(path)) {
                texts.insert(path.clone(), file.document().copy_text());
            }
        }
        texts
    }

    /// Record the given workspace roots and plan the discovery and load of
    /// every project under them.
    pub fn initialize_workspace(&mut self, roots: Vec<PathBuf>) -> Option<LoadPlan> {
        for root in &roots {
            if !self.workspace_roots.contains(root) {
                self.workspace_roots.push(root.clone());
            }
        }
        if roots.is_empty() {
            return None;
        }
        Some(LoadPlan {
            cause: LoadCause::Discovery,
            roots,
            discover: true,
            texts: self.managed_texts(),
        })
    }

    fn plan_root_load(&self, cause: LoadCause, root: PathBuf) -> LoadPlan {
        LoadPlan {
            cause,
            roots: vec![root],
            discover: false,
            texts: self.managed_texts(),
        }
    }

    /// Execute and install a planned load in place. Convenience for callers
    /// without a worker pool; the server runs plans on a blocking thread
    /// instead.
    pub fn apply_plan(&mut self, plan: Option<LoadPlan>) {
        if let Some(plan) = plan
            && let Some(loaded) = plan.execute(&CancellationToken::new())
        {
            self.apply_loads(loaded);
        }
    }

    /// The quick install phase of a deferred load, run back under the state
    /// lock: land each loaded project per the event that planned it and
    /// migrate documents between the attached and detached sets.
    pub fn apply_loads(&mut self, loaded: LoadedProjects) {
        let LoadedProjects { cause, loads } = loaded;
        for (root, project) in loads {
            match cause {
                LoadCause::Discovery => {
                    if !self.attached.contains_key(&root) {
                        self.install_project(root, project);
                    }
                }
                LoadCause::Created => self.install_project(root, project),
                LoadCause::BuildFileDeleted => {
                    if project.has_build_files() {
                        self.install_project(root, project);
                    } else {
                        self.remove_attached(&root);
                    }
                }
                LoadCause::BuildFileChanged => {
                    let reload_failed = project
                        .config_events()
                        .iter()
                        .any(|e| e.severity == Severity::Error);
                    if reload_failed {
                        // Keep the previous project, open-document state
                        // intact.
                        continue;
                    }
                    if !project.has_build_files() {
                        self.remove_attached(&root);
                        continue;
                    }
                    self.install_project(root, project);
                }
            }
        }
    }

    /// `textDocument/didOpen`.
    pub fn open(&mut self, uri: &str, path: &Path, text: &str) -> Owner {
        self.managed.insert(uri.to_string(), path.to_path_buf());

        // Already part of an attached project: adopt the editor's text in
        // place, and drop any stale detached project for the URI.
        if let Some(root) = self.attached_root_containing(path) {
            if let Some(project) = self.attached.get_mut(&root) {
                project.edit_file(path, None, text);
            }
            self.detached.remove(uri);
            return Owner::Attached(root);
        }

        // Covered by an attached project's config but not yet a file of it
        // (opened before the watcher reported its creation).
        if let Some(root) = self.attached_root_covering(path) {
            if let Some(project) = self.attached.get_mut(&root) {
                project.insert_idl_file(path.to_path_buf(), Document::new(text));
                project.rebuild_now(true);
            }
            self.detached.remove(uri);
            return Owner::Attached(root);
        }

        // A build file opened before its root was recognised.
        if let Some(kind) = BuildFileKind::of_path(path) {
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| path.to_path_buf());
            if let Some(existing) = self.attached.get_mut(&root) {
                if existing.contains_file(path) {
                    existing.edit_file(path, None, text);
                } else {
                    existing.insert_build_file(path.to_path_buf(), kind, Document::new(text));
                }
            } else {
                self.attached
                    .insert(root.clone(), Project::unresolved(path, kind, text));
            }
            return Owner::Attached(root);
        }

        // No known project: synthesise a detached one.
        self.detached
            .insert(uri.to_string(), Project::detached(path, text));
        Owner::Detached(uri.to_string())
    }

    /// `textDocument/didClose`. Returns true when a detached project was
    /// dropped with the URI.
    pub fn close(&mut self, uri: &str) -> bool {
        self.managed.remove(uri);
        if self.detached.remove(uri).is_some() {
            self.lifecycle.cancel_task(uri);
            true
        } else {
            false
        }
    }

    /// `textDocument/didChange`: apply one edit to the owning document.
    pub fn apply_change(
        &mut self,
        uri: &str,
        range: Option<Range<usize>>,
        text: &str,
    ) -> Option<Owner> {
        let path = self.managed.get(uri)?.clone();
        let owner = self.find_owner(uri, &path)?;
        self.project_mut(&owner)?.edit_file(&path, range, text);
        Some(owner)
    }

    /// Watched `Created` event. Returns the deferred load to run, if any.
    pub fn file_created(&mut self, path: &Path) -> Option<LoadPlan> {
        if BuildFileKind::of_path(path).is_some() {
            // (Re)initialise the project at the nearest ancestor root; an
            // UNRESOLVED project for a build file opened early is promoted
            // here, and previously-detached URIs that now belong to the
            // project are attached by the install step.
            let owner = self.attached_root_containing(path);
            let already_resolved = owner.as_ref().is_some_and(|root| {
                self.attached
                    .get(root)
                    .is_some_and(|p| p.project_type() != ProjectType::Unresolved)
            });
            if already_resolved {
                return None;
            }
            let root = path.parent()?.to_path_buf();
            return Some(self.plan_root_load(LoadCause::Created, root));
        }

        if self.attached_root_containing(path).is_some() {
            return None; // already owned
        }

        // An IDL file: reload whichever project's config covers it.
        let root = self.attached_root_covering(path)?;
        Some(self.plan_root_load(LoadCause::Created, root))
    }

    /// Watched `Deleted` event. A deleted build file plans a config reload;
    /// a deleted model file is dropped from its project in place.
    pub fn file_deleted(&mut self, path: &Path) -> Option<LoadPlan> {
        if BuildFileKind::of_path(path).is_some() {
            let root = path.parent()?.to_path_buf();
            if !self.attached.contains_key(&root) {
                return None;
            }
            return Some(self.plan_root_load(LoadCause::BuildFileDeleted, root));
        }

        let root = self.attached_root_containing(path)?;
        let project = self.attached.get_mut(&root)?;
        let removed = project.remove_file(path);

        // A managed URI that just lost its project gets a detached project
        // seeded with the in-memory text.
        if let Some(file) = removed.filter(|f| f.is_idl()) {
            let managed_uri = self
                .managed
                .iter()
                .find(|(_, p)| p.as_path() == path)
                .map(|(uri, _)| uri.clone());
            if let Some(uri) = managed_uri {
                let text = file.document().copy_text();
                self.detached.insert(uri, Project::detached(path, &text));
            }
        }
        None
    }

    /// Watched `Changed` event for a build file: plan a config reload whose
    /// install migrates URIs between the attached and detached sets. A
    /// broken reload leaves the previous project untouched.
    pub fn build_file_changed(&mut self, path: &Path) -> Option<LoadPlan> {
        let root = path.parent()?.to_path_buf();
        if !self.attached.contains_key(&root) {
            // Unknown root: treat like a creation.
            return self.file_created(path);
        }
        Some(self.plan_root_load(LoadCause::BuildFileChanged, root))
    }

    /// `workspace/didChangeWorkspaceFolders`. Removal happens in place;
    /// added roots return a discovery plan.
    pub fn workspace_folders_changed(
        &mut self,
        added: &[PathBuf],
        removed: &[PathBuf],
    ) -> Option<LoadPlan> {
        for root in removed {
            self.workspace_roots.retain(|r| r != root);
            let orphaned: Vec<PathBuf> = self
                .attached
                .keys()
                .filter(|project_root| {
                    project_root.starts_with(root)
                        && !self
                            .workspace_roots
                            .iter()
                            .any(|kept| project_root.starts_with(kept))
                })
                .cloned()
                .collect();
            for project_root in orphaned {
                self.remove_attached(&project_root);
            }
        }
        self.initialize_workspace(added.to_vec())
    }

    /// Replace (or add) the project at `root`, migrating documents:
    /// managed URIs whose files vanished from the project become detached
    /// with their in-memory text; detached URIs whose files appeared are
    /// attached (their text was adopted by the loader).
    fn install_project(&mut self, root: PathBuf, project: Project) {
        if let Some(previous) = self.attached.remove(&root) {
            let lost: Vec<(String, PathBuf)> = self
                .managed
                .iter()
                .filter(|(_, path)| {
                    previous
                        .file(path)
                        .is_some_and(crate::project::ProjectFile::is_idl)
                        && !project.contains_file(path)
                })
                .map(|(uri, path)| (uri.clone(), path.clone()))
                .collect();
            for (uri, path) in lost {
                if let Some(file) = previous.file(&path) {
                    let text = file.document().copy_text();
                    self.detached.insert(uri, Project::detached(&path, &text));
                }
            }
        }
        self.attached.insert(root, project);
        self.reconcile_detached();
    }

    /// Drop the project at `root`; managed URIs it served become detached.
    fn remove_attached(&mut self, root: &Path) {
        let Some(previous) = self.attached.remove(root) else {
            return;
        };
        let lost: Vec<(String, PathBuf)> = self
            .managed
            .iter()
            .filter(|(_, path)| {
                previous
                    .file(path)
                    .is_some_and(crate::project::ProjectFile::is_idl)
            })
            .map(|(uri, path)| (uri.clone(), path.clone()))
            .collect();
        for (uri, path) in lost {
            if let Some(file) = previous.file(&path) {
                let text = file.document().copy_text();
                self.detached.insert(uri, Project::detached(&path, &text));
            }
        }
        self.reconcile_detached();
    }

    /// Enforce the cross-project invariant: a URI served by an attached
    /// project never also has a detached project.
    fn reconcile_detached(&mut self) {
        let attached = &self.attached;
        let managed = &self.managed;
        self.detached.retain(|uri, _| {
            let Some(path) = managed.get(uri) else {
                return false; // a detached project exists only for an open file
            };
            !attached.values().any(|p| p.contains_file(path))
        });
    }
}
