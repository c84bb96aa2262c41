use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::assemble::{Assembler, strip_file_contributions};
use crate::config::{BuildFileKind, ProjectConfig};
use crate::document::Document;
use crate::idl::{self, ParsedIdl};
use crate::model::{Model, NodeValue, ShapeId, SourceLocation, ValidatedResult, ValidationEvent};

/// An IDL file in a project: the document plus a lazily-built parse tree and
/// the shape ids it defines. Both caches invalidate together on any edit.
#[derive(Debug, Clone)]
pub struct IdlFile {
    path: PathBuf,
    document: Document,
    parsed: Option<ParsedIdl>,
}

impl IdlFile {
    pub fn new(path: impl Into<PathBuf>, document: Document) -> Self {
        Self {
            path: path.into(),
            document,
            parsed: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Parse tree, built on first request after an edit. Idempotent until
    /// the next edit.
    pub fn parsed(&mut self) -> &ParsedIdl {
        let document = &self.document;
        self.parsed
            .get_or_insert_with(|| idl::parse(document.text()))
    }

    pub fn defined_shapes(&mut self) -> Vec<ShapeId> {
        self.parsed().defined_shape_ids()
    }
}

/// A build file in a project: the document, its kind, and a lazily-parsed
/// lenient JSON value.
#[derive(Debug, Clone)]
pub struct BuildFile {
    path: PathBuf,
    kind: BuildFileKind,
    document: Document,
    parsed: Option<serde_json::Value>,
}

impl BuildFile {
    pub fn new(path: impl Into<PathBuf>, kind: BuildFileKind, document: Document) -> Self {
        Self {
            path: path.into(),
            kind,
            document,
            parsed: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> BuildFileKind {
        self.kind
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn value(&mut self) -> Option<&serde_json::Value> {
        if self.parsed.is_none() {
            self.parsed = jsonc_parser::parse_to_serde_value(
                self.document.text(),
                &jsonc_parser::ParseOptions {
                    allow_comments: true,
                    allow_trailing_commas: true,
                    ..Default::default()
                },
            )
            .ok()
            .flatten();
        }
        self.parsed.as_ref()
    }
}

/// A file belonging to a project: either an IDL model file or a build file.
#[derive(Debug, Clone)]
pub enum ProjectFile {
    Idl(IdlFile),
    Build(BuildFile),
}

impl ProjectFile {
    pub fn path(&self) -> &Path {
        match self {
            Self::Idl(f) => f.path(),
            Self::Build(f) => f.path(),
        }
    }

    pub fn document(&self) -> &Document {
        match self {
            Self::Idl(f) => f.document(),
            Self::Build(f) => f.document(),
        }
    }

    pub fn is_idl(&self) -> bool {
        matches!(self, Self::Idl(_))
    }

    /// Apply an edit, invalidating any cached parse.
    pub fn apply_edit(&mut self, range: Option<Range<usize>>, text: &str) {
        match self {
            Self::Idl(f) => {
                f.document.apply_edit(range, text);
                f.parsed = None;
            }
            Self::Build(f) => {
                f.document.apply_edit(range, text);
                f.parsed = None;
            }
        }
    }
}

/// How a project came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectType {
    /// Driven by build files under its root.
    Normal,
    /// Synthetic single-file project for an open file outside any project.
    Detached,
    /// A recognised root with no configuration.
    Empty,
    /// A build file opened before its root was recognised.
    Unresolved,
}

/// Indices over the assembled model that make incremental rebuilds cheap:
/// which files define which shapes, which files apply traits where, the
/// co-dependency edges between files, and which files feed which
/// array-valued metadata keys.
#[derive(Debug, Clone, Default)]
pub struct RebuildIndex {
    defines: HashMap<PathBuf, HashSet<ShapeId>>,
    applies: HashMap<ShapeId, HashSet<PathBuf>>,
    depends: HashMap<PathBuf, HashSet<PathBuf>>,
    metadata_keys: HashMap<PathBuf, HashSet<String>>,
}

impl RebuildIndex {
    pub fn from_model(model: &Model) -> Self {
        let mut index = Self::default();

        for shape in model.shapes.values() {
            let Some(shape_file) = shape.source.file.clone() else {
                continue;
            };
            index
                .defines
                .entry(shape_file.clone())
                .or_default()
                .insert(shape.id.clone());

            let mut trait_nodes: Vec<&crate::model::Node> = shape.traits.values().collect();
            for (_, member) in shape.kind.members() {
                trait_nodes.extend(member.traits.values());
            }
            for node in trait_nodes {
                let mut sources: Vec<&SourceLocation> = vec![&node.source];
                if let NodeValue::Array(elements) = &node.value {
                    sources.extend(elements.iter().map(|e| &e.source));
                }
                for source in sources {
                    let Some(trait_file) = &source.file else { continue };
                    if *trait_file != shape_file {
                        index
                            .applies
                            .entry(shape.id.clone())
                            .or_default()
                            .insert(trait_file.clone());
                        index.add_edge(trait_file, &shape_file);
                    }
                }
            }
        }

        for (key, node) in &model.metadata {
            let NodeValue::Array(elements) = &node.value else {
                continue;
            };
            let contributors: HashSet<&Path> = elements
                .iter()
                .filter_map(|e| e.source.file.as_deref())
                .collect();
            for file in &contributors {
                index
                    .metadata_keys
                    .entry(file.to_path_buf())
                    .or_default()
                    .insert(key.clone());
            }
            for a in &contributors {
                for b in &contributors {
                    index.add_edge(a, b);
                }
            }
        }

        index
    }

    fn add_edge(&mut self, a: &Path, b: &Path) {
        if a != b {
            self.depends
                .entry(a.to_path_buf())
                .or_default()
                .insert(b.to_path_buf());
            self.depends
                .entry(b.to_path_buf())
                .or_default()
                .insert(a.to_path_buf());
        }
    }

    /// Shape ids defined in `path`.
    pub fn defined_in(&self, path: &Path) -> Option<&HashSet<ShapeId>> {
        self.defines.get(path)
    }

    /// Files that carry an apply-style contribution to `id`.
    pub fn files_applying_to(&self, id: &ShapeId) -> Option<&HashSet<PathBuf>> {
        self.applies.get(id)
    }

    /// Array-valued metadata keys `path` contributes to.
    pub fn metadata_keys_of(&self, path: &Path) -> Option<&HashSet<String>> {
        self.metadata_keys.get(path)
    }

    /// The co-dependent closure of `start`: every file entangled with it
    /// through apply chains or shared metadata arrays, transitively. Always
    /// contains `start`.
    pub fn closure(&self, start: &Path) -> HashSet<PathBuf> {
        let mut visited: HashSet<PathBuf> = HashSet::new();
        let mut worklist = vec![start.to_path_buf()];
        while let Some(current) = worklist.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(neighbours) = self.depends.get(&current) {
                worklist.extend(neighbours.iter().filter(|n| !visited.contains(*n)).cloned());
            }
        }
        visited
    }
}

/// A deferred rebuild: the immutable snapshot a background task needs, plus
/// the epoch that decides whether its result is still current on install.
#[derive(Debug)]
pub struct RebuildPlan {
    pub epoch: u64,
    pub validate: bool,
    entries: Vec<(PathBuf, String)>,
    carry_over: Option<Model>,
    canonical_order: Vec<PathBuf>,
}

impl RebuildPlan {
    /// Run the assembly. Pure with respect to server state; safe on any
    /// worker thread.
    pub fn execute(self) -> ValidatedResult<Model> {
        let mut assembler = Assembler::new().canonical_order(self.canonical_order);
        if let Some(carry) = self.carry_over {
            assembler = assembler.carry_over(carry);
        }
        for (path, text) in self.entries {
            assembler.add_entry(path, text);
        }
        assembler.assemble(self.validate)
    }
}

/// The unit of model coherence: a root directory, its files, the latest
/// assembled model, and the indices to rebuild it incrementally.
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    project_type: ProjectType,
    config: ProjectConfig,
    files: HashMap<PathBuf, ProjectFile>,
    /// Model file paths in discovery order; decides array merge order.
    file_order: Vec<PathBuf>,
    model_result: ValidatedResult<Model>,
    rebuild_index: RebuildIndex,
    /// Events from config loading and dependency resolution, surfaced as
    /// diagnostics on build files.
    config_events: Vec<ValidationEvent>,
    /// Bumped on every mutation; stale background results are discarded.
    epoch: u64,
}

impl Project {
    pub fn new(
        root: impl Into<PathBuf>,
        project_type: ProjectType,
        config: ProjectConfig,
        config_events: Vec<ValidationEvent>,
    ) -> Self {
        Self {
            root: root.into(),
            project_type,
            config,
            files: HashMap::new(),
            file_order: Vec::new(),
            model_result: ValidatedResult::default(),
            rebuild_index: RebuildIndex::default(),
            config_events,
            epoch: 0,
        }
    }

    /// A recognised root with no build files.
    pub fn empty(root: impl Into<PathBuf>) -> Self {
        Self::new(root, ProjectType::Empty, ProjectConfig::default(), Vec::new())
    }

    /// A synthetic project for one open IDL file.
    pub fn detached(path: impl Into<PathBuf>, text: &str) -> Self {
        let path = path.into();
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.clone());
        let mut project = Self::new(root, ProjectType::Detached, ProjectConfig::default(), Vec::new());
        project.insert_idl_file(path, Document::new(text));
        project.rebuild_now(true);
        project
    }

    /// A project holding only a build file that was opened before its root
    /// was recognised.
    pub fn unresolved(path: impl Into<PathBuf>, kind: BuildFileKind, text: &str) -> Self {
        let path = path.into();
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.clone());
        let mut project = Self::new(
            root.clone(),
            ProjectType::Unresolved,
            ProjectConfig::default(),
            Vec::new(),
        );
        project.files.insert(
            path.clone(),
            ProjectFile::Build(BuildFile::new(path, kind, Document::new(text))),
        );
        project
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn project_type(&self) -> ProjectType {
        self.project_type
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn model_result(&self) -> &ValidatedResult<Model> {
        &self.model_result
    }

    pub fn rebuild_index(&self) -> &RebuildIndex {
        &self.rebuild_index
    }

    pub fn config_events(&self) -> &[ValidationEvent] {
        &self.config_events
    }

    pub fn files(&self) -> impl Iterator<Item = &ProjectFile> {
        self.files.values()
    }

    pub fn file(&self, path: &Path) -> Option<&ProjectFile> {
        self.files.get(path)
    }

    pub fn file_mut(&mut self, path: &Path) -> Option<&mut ProjectFile> {
        self.files.get_mut(path)
    }

    pub fn contains_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Paths of the IDL (model) files, in discovery order.
    pub fn idl_paths(&self) -> &[PathBuf] {
        &self.file_order
    }

    pub fn has_build_files(&self) -> bool {
        self.files.values().any(|f| !f.is_idl())
    }

    /// Register a model file. Order of insertion is discovery order.
    pub fn insert_idl_file(&mut self, path: PathBuf, document: Document) {
        if !self.files.contains_key(&path) {
            self.file_order.push(path.clone());
        }
        self.files
            .insert(path.clone(), ProjectFile::Idl(IdlFile::new(path, document)));
        self.epoch += 1;
    }

    pub fn insert_build_file(&mut self, path: PathBuf, kind: BuildFileKind, document: Document) {
        self.files.insert(
            path.clone(),
            ProjectFile::Build(BuildFile::new(path, kind, document)),
        );
        self.epoch += 1;
    }

    /// Apply an edit to a file's document, invalidating its parse caches.
    pub fn edit_file(&mut self, path: &Path, range: Option<Range<usize>>, text: &str) -> bool {
        match self.files.get_mut(path) {
            Some(file) => {
                file.apply_edit(range, text);
                self.epoch += 1;
                true
            }
            None => false,
        }
    }

    /// Snapshot a full (re)assembly of every model file.
    pub fn plan_full_rebuild(&self, validate: bool) -> RebuildPlan {
        let entries = self
            .file_order
            .iter()
            .filter_map(|p| {
                self.files
                    .get(p)
                    .map(|f| (p.clone(), f.document().copy_text()))
            })
            .collect();
        RebuildPlan {
            epoch: self.epoch,
            validate,
            entries,
            carry_over: None,
            canonical_order: self.file_order.clone(),
        }
    }

    /// Snapshot an incremental, non-validating rebuild for an edit to one
    /// file: the co-dependent closure is re-fed over the previous model with
    /// that closure's contributions stripped. Falls back to a full rebuild
    /// when there is no previous model to carry from. Returns `None` when
    /// the path is not a model file of this project.
    pub fn plan_incremental_rebuild(&self, path: &Path) -> Option<RebuildPlan> {
        if !self.files.get(path).is_some_and(ProjectFile::is_idl) {
            return None;
        }
        let Some(previous) = self.model_result.result() else {
            return Some(self.plan_full_rebuild(false));
        };

        let dependents = self.rebuild_index.closure(path);
        let carry = strip_file_contributions(previous, &dependents);
        let entries = self
            .file_order
            .iter()
            .filter(|p| dependents.contains(p.as_path()))
            .filter_map(|p| {
                self.files
                    .get(p)
                    .map(|f| (p.clone(), f.document().copy_text()))
            })
            .collect();

        Some(RebuildPlan {
            epoch: self.epoch,
            validate: false,
            entries,
            carry_over: Some(carry),
            canonical_order: self.file_order.clone(),
        })
    }

    /// The single mutation point for assembly results. Installs the result
    /// and refreshes the rebuild index — unless a newer mutation made the
    /// plan stale, in which case the result is discarded.
    pub fn apply_rebuild(&mut self, plan_epoch: u64, result: ValidatedResult<Model>) -> bool {
        if plan_epoch != self.epoch {
            return false;
        }
        self.rebuild_index = match result.result() {
            Some(model) => RebuildIndex::from_model(model),
            None => RebuildIndex::default(),
        };
        self.model_result = result;
        true
    }

    /// Synchronous rebuild: plan, execute, install.
    pub fn rebuild_now(&mut self, validate: bool) {
        let plan = self.plan_full_rebuild(validate);
        let epoch = plan.epoch;
        let result = plan.execute();
        self.apply_rebuild(epoch, result);
    }

    /// Synchronous incremental update after an in-place edit (the
    /// "update model without validating" path).
    pub fn update_model_without_validating(&mut self, path: &Path) {
        if let Some(plan) = self.plan_incremental_rebuild(path) {
            let epoch = plan.epoch;
            let result = plan.execute();
            self.apply_rebuild(epoch, result);
        }
    }

    /// Remove a model file (watch Deleted) and incrementally rebuild over
    /// the dependent set it leaves behind. Returns the removed file.
    pub fn remove_file(&mut self, path: &Path) -> Option<ProjectFile> {
        let removed = self.files.remove(path)?;
        self.file_order.retain(|p| p != path);
        self.epoch += 1;

        if let Some(previous) = self.model_result.result() {
            let mut affected = self.rebuild_index.closure(path);
            let carry = strip_file_contributions(previous, &affected);
            affected.remove(path);

            let mut assembler = Assembler::new()
                .carry_over(carry)
                .canonical_order(self.file_order.clone());
            for p in &self.file_order {
                if affected.contains(p.as_path())
                    && let Some(f) = self.files.get(p)
                {
                    assembler.add_entry(p.clone(), f.document().copy_text());
                }
            }
            let result = assembler.assemble(false);
            self.rebuild_index = match result.result() {
                Some(model) => RebuildIndex::from_model(model),
                None => RebuildIndex::default(),
            };
            self.model_result = result;
        } else {
            self.rebuild_now(false);
        }

        Some(removed)
    }

    /// Diagnostics for one file: assembly events plus config events.
    pub fn events_for_file<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a ValidationEvent> {
        self.model_result
            .events_for_file(path)
            .chain(self.config_events.iter().filter(move |e| e.location.is_in_file(path)))
    }
}
