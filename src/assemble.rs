use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::idl::{self, LinePositions, NodeExpr, NodeExprValue, ParsedIdl, ShapeType};
use crate::model::{
    Member, Model, Node, NodeValue, Shape, ShapeId, ShapeKind, SimpleKind, SourceLocation,
    ValidatedResult, ValidationEvent,
};

/// Prelude trait names resolved into `smithy.api` when written relatively.
const PRELUDE_TRAITS: &[&str] = &[
    "default",
    "deprecated",
    "documentation",
    "enumValue",
    "error",
    "externalDocumentation",
    "http",
    "httpHeader",
    "httpLabel",
    "httpPayload",
    "httpQuery",
    "idempotent",
    "input",
    "internal",
    "jsonName",
    "length",
    "mediaType",
    "mixin",
    "output",
    "paginated",
    "pattern",
    "private",
    "range",
    "readonly",
    "required",
    "sensitive",
    "since",
    "sparse",
    "streaming",
    "suppress",
    "tags",
    "timestampFormat",
    "title",
    "trait",
    "uniqueItems",
    "xmlName",
];

const PRELUDE_SIMPLE: &[(&str, SimpleKind)] = &[
    ("Blob", SimpleKind::Blob),
    ("Boolean", SimpleKind::Boolean),
    ("String", SimpleKind::String),
    ("Byte", SimpleKind::Byte),
    ("Short", SimpleKind::Short),
    ("Integer", SimpleKind::Integer),
    ("Long", SimpleKind::Long),
    ("Float", SimpleKind::Float),
    ("Double", SimpleKind::Double),
    ("BigInteger", SimpleKind::BigInteger),
    ("BigDecimal", SimpleKind::BigDecimal),
    ("Timestamp", SimpleKind::Timestamp),
    ("Document", SimpleKind::Document),
];

/// The prelude shapes every fresh model starts from. All carry
/// `SourceLocation::none()`, so incremental rebuilds never strip them.
pub fn prelude_model() -> Model {
    let mut model = Model::default();
    for &(name, kind) in PRELUDE_SIMPLE {
        let id = ShapeId::prelude(name);
        model
            .shapes
            .insert(id.clone(), Shape::simple(id, kind, SourceLocation::none()));
    }
    let unit = ShapeId::prelude("Unit");
    model.shapes.insert(
        unit.clone(),
        Shape {
            id: unit,
            kind: ShapeKind::Structure {
                members: BTreeMap::new(),
            },
            source: SourceLocation::none(),
            traits: BTreeMap::new(),
        },
    );
    model
}

fn sourced_in(location: &SourceLocation, files: &HashSet<PathBuf>) -> bool {
    location
        .file
        .as_ref()
        .is_some_and(|f| files.contains(f.as_path()))
}

/// A copy of `model` with every contribution from `removed` stripped out:
/// shapes defined there, traits applied from there (including single array
/// elements), and metadata entries or array elements contributed from there.
/// Values with `SourceLocation::none()` are always preserved.
pub fn strip_file_contributions(model: &Model, removed: &HashSet<PathBuf>) -> Model {
    let mut out = Model::default();

    for shape in model.shapes.values() {
        if sourced_in(&shape.source, removed) {
            continue;
        }
        let mut kept = shape.clone();
        strip_traits(&mut kept.traits, removed);
        match &mut kept.kind {
            ShapeKind::Structure { members } | ShapeKind::Union { members } | ShapeKind::Enum { members } => {
                for member in members.values_mut() {
                    strip_traits(&mut member.traits, removed);
                }
            }
            ShapeKind::List { member } => strip_traits(&mut member.traits, removed),
            ShapeKind::Map { key, value } => {
                strip_traits(&mut key.traits, removed);
                strip_traits(&mut value.traits, removed);
            }
            ShapeKind::Simple(_) => {}
        }
        out.shapes.insert(kept.id.clone(), kept);
    }

    for (key, node) in &model.metadata {
        if let Some(kept) = strip_node(node, removed) {
            out.metadata.insert(key.clone(), kept);
        }
    }

    out
}

fn strip_traits(traits: &mut BTreeMap<ShapeId, Node>, removed: &HashSet<PathBuf>) {
    traits.retain(|_, node| match strip_node(node, removed) {
        Some(kept) => {
            *node = kept;
            true
        }
        None => false,
    });
}

/// Strip `removed`-sourced array elements from a node; drop the node when it
/// (and everything in it) came from `removed`. `None`-source values survive.
fn strip_node(node: &Node, removed: &HashSet<PathBuf>) -> Option<Node> {
    if let NodeValue::Array(elements) = &node.value {
        let kept: Vec<Node> = elements
            .iter()
            .filter(|e| !sourced_in(&e.source, removed))
            .cloned()
            .collect();
        if kept.is_empty() && sourced_in(&node.source, removed) {
            return None;
        }
        let source = if sourced_in(&node.source, removed) {
            kept.first()
                .map(|e| e.source.clone())
                .unwrap_or_else(SourceLocation::none)
        } else {
            node.source.clone()
        };
        return Some(Node::new(NodeValue::Array(kept), source));
    }
    if sourced_in(&node.source, removed) {
        None
    } else {
        Some(node.clone())
    }
}

struct PendingApply {
    target: Option<ShapeId>,
    written: String,
    trait_id: ShapeId,
    value: Node,
    location: SourceLocation,
}

/// Assembles a `Model` from a set of (path, text) entries, optionally seeded
/// with a carry-over model from a previous assembly for incremental
/// rebuilds. Entry order is the file-discovery order and decides how
/// array-valued traits and metadata merge.
#[derive(Default)]
pub struct Assembler {
    entries: Vec<(PathBuf, String)>,
    carry_over: Option<Model>,
    canonical_order: Vec<PathBuf>,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed assembly with a previous model instead of the bare prelude.
    pub fn carry_over(mut self, model: Model) -> Self {
        self.carry_over = Some(model);
        self
    }

    /// The full project file order, used to keep merged arrays in
    /// full-reassembly order when only a subset of files is re-fed.
    pub fn canonical_order(mut self, order: Vec<PathBuf>) -> Self {
        self.canonical_order = order;
        self
    }

    pub fn add_entry(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.entries.push((path.into(), text.into()));
    }

    /// Run assembly. With `validate` false only parse and shape-construction
    /// events are produced; resolution checks (unresolved targets, unknown
    /// traits) run only in the validating mode.
    pub fn assemble(self, validate: bool) -> ValidatedResult<Model> {
        let mut events: Vec<ValidationEvent> = Vec::new();
        let mut model = self.carry_over.unwrap_or_else(prelude_model);

        let (idl_entries, json_entries): (Vec<(&Path, &str)>, Vec<(&Path, &str)>) = self
            .entries
            .iter()
            .map(|(p, t)| (p.as_path(), t.as_str()))
            .partition(|(p, _)| p.extension().and_then(|e| e.to_str()) != Some("json"));

        let parsed: Vec<(&Path, ParsedIdl, LinePositions)> = idl_entries
            .par_iter()
            .map(|&(path, text)| (path, idl::parse(text), LinePositions::new(text)))
            .collect();

        let mut applies: Vec<PendingApply> = Vec::new();

        for (path, file, lines) in &parsed {
            for err in &file.errors {
                events.push(ValidationEvent::error(
                    "Parse",
                    &err.message,
                    lines.location(path, err.span.start),
                ));
            }

            if file.namespace.is_none() && !file.shapes.is_empty() {
                events.push(ValidationEvent::error(
                    "Parse",
                    "shapes defined before a namespace statement",
                    lines.location(path, file.shapes[0].name_span.start),
                ));
                continue;
            }

            for decl in &file.shapes {
                let Some(ns) = &file.namespace else { continue };
                let id = ShapeId::new(ns, &decl.name);
                let source = lines.location(path, decl.name_span.start);
                let mut shape = Shape {
                    id: id.clone(),
                    kind: build_kind(decl, file, path, lines, &mut events),
                    source,
                    traits: BTreeMap::new(),
                };
                for t in &decl.traits {
                    let trait_id = resolve_trait_id(file, &t.name);
                    let value = node_from_expr(&t.value, path, lines);
                    merge_trait(&mut shape.traits, trait_id, value, &mut events);
                }
                match model.shapes.entry(id.clone()) {
                    std::collections::btree_map::Entry::Vacant(slot) => {
                        slot.insert(shape);
                    }
                    std::collections::btree_map::Entry::Occupied(existing) => {
                        events.push(ValidationEvent::error(
                            "DuplicateShape",
                            format!(
                                "shape `{id}` is already defined at {:?}",
                                existing.get().source
                            ),
                            shape.source,
                        ));
                    }
                }
            }

            for m in &file.metadata {
                let value = node_from_expr(&m.value, path, lines);
                merge_metadata(
                    &mut model.metadata,
                    &m.key,
                    value,
                    lines.location(path, m.key_span.start),
                    &mut events,
                );
            }

            for apply in &file.applies {
                let trait_id = resolve_trait_id(file, &apply.applied.name);
                applies.push(PendingApply {
                    target: file.resolve(&apply.target),
                    written: apply.target.clone(),
                    trait_id,
                    value: node_from_expr(&apply.applied.value, path, lines),
                    location: lines.location(path, apply.target_span.start),
                });
            }
        }

        for (path, text) in &json_entries {
            merge_json_model(&mut model, path, text, &mut events);
        }

        // Second phase: apply statements, now that every definition from
        // every file is in place (forward and cross-file references work).
        for apply in applies {
            let base = apply.target.as_ref().map(|id| match id.member() {
                Some(_) => ShapeId::new(id.namespace(), id.name()),
                None => id.clone(),
            });
            let member = apply
                .target
                .as_ref()
                .and_then(|id| id.member())
                .map(str::to_string);

            let traits = base.as_ref().and_then(|b| model.shapes.get_mut(b)).and_then(
                |shape| match &member {
                    None => Some(&mut shape.traits),
                    Some(name) => member_traits(&mut shape.kind, name),
                },
            );

            match traits {
                Some(traits) => merge_trait(traits, apply.trait_id, apply.value, &mut events),
                None if validate => events.push(ValidationEvent::error(
                    "UnresolvedShape",
                    format!("`apply` target `{}` cannot be resolved", apply.written),
                    apply.location,
                )),
                None => {}
            }
        }

        sort_merged_arrays(&mut model, &self.canonical_order, &self.entries);

        if validate {
            validate_model(&model, &mut events);
        }

        events.sort_by(|a, b| {
            (&a.location.file, a.location.line, a.location.column)
                .cmp(&(&b.location.file, b.location.line, b.location.column))
        });

        ValidatedResult::new(Some(model), events)
    }
}

fn member_traits<'a>(kind: &'a mut ShapeKind, name: &str) -> Option<&'a mut BTreeMap<ShapeId, Node>> {
    match kind {
        ShapeKind::Structure { members } | ShapeKind::Union { members } | ShapeKind::Enum { members } => {
            members.get_mut(name).map(|m| &mut m.traits)
        }
        ShapeKind::List { member } if name == "member" => Some(&mut member.traits),
        ShapeKind::Map { key, .. } if name == "key" => Some(&mut key.traits),
        ShapeKind::Map { value, .. } if name == "value" => Some(&mut value.traits),
        _ => None,
    }
}

fn build_kind(
    decl: &idl::ShapeDecl,
    file: &ParsedIdl,
    path: &Path,
    lines: &LinePositions,
    events: &mut Vec<ValidationEvent>,
) -> ShapeKind {
    let build_member = |m: &idl::MemberDecl, events: &mut Vec<ValidationEvent>| -> Member {
        let source = lines.location(path, m.name_span.start);
        let target = m
            .target
            .as_deref()
            .and_then(|written| file.resolve(written))
            .unwrap_or_else(|| ShapeId::prelude("Unit"));
        let mut traits = BTreeMap::new();
        for t in &m.traits {
            let trait_id = resolve_trait_id(file, &t.name);
            let value = node_from_expr(&t.value, path, lines);
            merge_trait(&mut traits, trait_id, value, events);
        }
        Member {
            target,
            traits,
            source,
        }
    };

    let mut members: BTreeMap<String, Member> = BTreeMap::new();
    for m in &decl.members {
        members.insert(m.name.clone(), build_member(m, events));
    }

    match decl.shape_type {
        ShapeType::Simple(kind) => ShapeKind::Simple(kind),
        ShapeType::Structure => ShapeKind::Structure { members },
        ShapeType::Union => ShapeKind::Union { members },
        ShapeType::Enum => ShapeKind::Enum { members },
        ShapeType::List => {
            let member = members.remove("member").unwrap_or_else(|| {
                events.push(ValidationEvent::error(
                    "Parse",
                    format!("list `{}` requires a `member`", decl.name),
                    lines.location(path, decl.name_span.start),
                ));
                unit_member(lines.location(path, decl.name_span.start))
            });
            ShapeKind::List {
                member: Box::new(member),
            }
        }
        ShapeType::Map => {
            let location = lines.location(path, decl.name_span.start);
            let mut take = |name: &str| {
                members.remove(name).unwrap_or_else(|| {
                    events.push(ValidationEvent::error(
                        "Parse",
                        format!("map `{}` requires a `{name}`", decl.name),
                        location.clone(),
                    ));
                    unit_member(location.clone())
                })
            };
            ShapeKind::Map {
                key: Box::new(take("key")),
                value: Box::new(take("value")),
            }
        }
    }
}

fn unit_member(source: SourceLocation) -> Member {
    Member {
        target: ShapeId::prelude("Unit"),
        traits: BTreeMap::new(),
        source,
    }
}

/// Relative trait names resolve through `use` statements, then the prelude
/// trait list, then the file's namespace.
fn resolve_trait_id(file: &ParsedIdl, written: &str) -> ShapeId {
    if written.contains('#') {
        if let Some(id) = ShapeId::parse(written) {
            return id;
        }
    }
    if let Some(u) = file.uses.iter().find(|u| u.target.name() == written) {
        return u.target.clone();
    }
    if PRELUDE_TRAITS.contains(&written) {
        return ShapeId::prelude(written);
    }
    match &file.namespace {
        Some(ns) => ShapeId::new(ns, written),
        None => ShapeId::prelude(written),
    }
}

fn node_from_expr(expr: &NodeExpr, path: &Path, lines: &LinePositions) -> Node {
    let source = lines.location(path, expr.span.start);
    let value = match &expr.value {
        NodeExprValue::Null => NodeValue::Null,
        NodeExprValue::Bool(b) => NodeValue::Bool(*b),
        NodeExprValue::Number(n) => NodeValue::Number(*n),
        NodeExprValue::String(s) => NodeValue::String(s.clone()),
        NodeExprValue::Array(items) => NodeValue::Array(
            items
                .iter()
                .map(|e| node_from_expr(e, path, lines))
                .collect(),
        ),
        NodeExprValue::Object(entries) => NodeValue::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), node_from_expr(v, path, lines)))
                .collect(),
        ),
    };
    Node::new(value, source)
}

/// Array-valued traits concatenate; anything else conflicting is an event
/// and the first value wins.
fn merge_trait(
    traits: &mut BTreeMap<ShapeId, Node>,
    trait_id: ShapeId,
    value: Node,
    events: &mut Vec<ValidationEvent>,
) {
    match traits.entry(trait_id) {
        std::collections::btree_map::Entry::Vacant(slot) => {
            slot.insert(value);
        }
        std::collections::btree_map::Entry::Occupied(mut existing) => {
            let trait_id = existing.key().clone();
            match (&mut existing.get_mut().value, value.value) {
                (NodeValue::Array(current), NodeValue::Array(incoming)) => {
                    current.extend(incoming);
                }
                _ => events.push(ValidationEvent::error(
                    "TraitConflict",
                    format!("conflicting values for trait `{trait_id}`"),
                    value.source,
                )),
            }
        }
    }
}

fn merge_metadata(
    metadata: &mut BTreeMap<String, Node>,
    key: &str,
    value: Node,
    location: SourceLocation,
    events: &mut Vec<ValidationEvent>,
) {
    match metadata.get_mut(key) {
        None => {
            metadata.insert(key.to_string(), value);
        }
        Some(existing) => {
            if let (NodeValue::Array(current), NodeValue::Array(incoming)) =
                (&mut existing.value, &value.value)
            {
                current.extend(incoming.iter().cloned());
            } else if !existing.value_eq(&value) {
                events.push(ValidationEvent::error(
                    "Metadata",
                    format!("conflicting values for metadata key `{key}`"),
                    location,
                ));
            }
        }
    }
}

/// Stable-sort merged arrays by contributing file so incremental carry-over
/// assembly keeps the ordering a full reassembly would produce. Elements
/// with no source sort first; elements from unknown files keep their
/// relative position at the end.
fn sort_merged_arrays(model: &mut Model, canonical: &[PathBuf], entries: &[(PathBuf, String)]) {
    let order: Vec<&Path> = if canonical.is_empty() {
        entries.iter().map(|(p, _)| p.as_path()).collect()
    } else {
        canonical.iter().map(PathBuf::as_path).collect()
    };
    let rank: HashMap<&Path, usize> = order.iter().enumerate().map(|(i, p)| (*p, i + 1)).collect();

    let rank_of = |node: &Node| -> usize {
        match &node.source.file {
            None => 0,
            Some(f) => rank.get(f.as_path()).copied().unwrap_or(usize::MAX),
        }
    };

    let sort_node = |node: &mut Node| {
        if let NodeValue::Array(elements) = &mut node.value {
            elements.sort_by_key(rank_of);
            // Pin the array's own location to its first element so a
            // carry-over rebuild and a full reassembly agree exactly.
            if let Some(first) = elements.first() {
                node.source = first.source.clone();
            }
        }
    };

    for shape in model.shapes.values_mut() {
        for node in shape.traits.values_mut() {
            sort_node(node);
        }
    }
    for node in model.metadata.values_mut() {
        sort_node(node);
    }
}

/// Minimal ingestion of Smithy AST JSON model files.
fn merge_json_model(model: &mut Model, path: &Path, text: &str, events: &mut Vec<ValidationEvent>) {
    let location = SourceLocation::new(path, 1, 1);
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            events.push(ValidationEvent::error(
                "Parse",
                format!("invalid JSON model: {e}"),
                location,
            ));
            return;
        }
    };

    if let Some(shapes) = value.get("shapes").and_then(|s| s.as_object()) {
        for (id_str, body) in shapes {
            let Some(id) = ShapeId::parse(id_str) else {
                events.push(ValidationEvent::error(
                    "Parse",
                    format!("invalid shape id `{id_str}` in JSON model"),
                    location.clone(),
                ));
                continue;
            };
            let kind = match body.get("type").and_then(|t| t.as_str()) {
                Some("structure") => ShapeKind::Structure {
                    members: json_members(body, path),
                },
                Some("union") => ShapeKind::Union {
                    members: json_members(body, path),
                },
                Some(other) => match simple_kind_for(other) {
                    Some(kind) => ShapeKind::Simple(kind),
                    None => {
                        events.push(ValidationEvent::warning(
                            "Parse",
                            format!("unsupported shape type `{other}` in JSON model"),
                            location.clone(),
                        ));
                        continue;
                    }
                },
                None => continue,
            };
            let mut shape = Shape {
                id: id.clone(),
                kind,
                source: location.clone(),
                traits: BTreeMap::new(),
            };
            if let Some(traits) = body.get("traits").and_then(|t| t.as_object()) {
                for (trait_id, trait_value) in traits {
                    if let Some(tid) = ShapeId::parse(trait_id) {
                        shape
                            .traits
                            .insert(tid, json_node(trait_value, &location));
                    }
                }
            }
            if model.shapes.contains_key(&id) {
                events.push(ValidationEvent::error(
                    "DuplicateShape",
                    format!("shape `{id}` is already defined"),
                    location.clone(),
                ));
            } else {
                model.shapes.insert(id, shape);
            }
        }
    }

    if let Some(metadata) = value.get("metadata").and_then(|m| m.as_object()) {
        for (key, v) in metadata {
            merge_metadata(
                &mut model.metadata,
                key,
                json_node(v, &location),
                location.clone(),
                events,
            );
        }
    }
}

fn simple_kind_for(name: &str) -> Option<SimpleKind> {
    PRELUDE_SIMPLE
        .iter()
        .find(|(kw, _)| kw.eq_ignore_ascii_case(name))
        .map(|&(_, kind)| kind)
}

fn json_members(body: &serde_json::Value, path: &Path) -> BTreeMap<String, Member> {
    let mut members = BTreeMap::new();
    if let Some(map) = body.get("members").and_then(|m| m.as_object()) {
        for (name, m) in map {
            let target = m
                .get("target")
                .and_then(|t| t.as_str())
                .and_then(ShapeId::parse)
                .unwrap_or_else(|| ShapeId::prelude("Unit"));
            members.insert(
                name.clone(),
                Member {
                    target,
                    traits: BTreeMap::new(),
                    source: SourceLocation::new(path, 1, 1),
                },
            );
        }
    }
    members
}

fn json_node(value: &serde_json::Value, location: &SourceLocation) -> Node {
    let node_value = match value {
        serde_json::Value::Null => NodeValue::Null,
        serde_json::Value::Bool(b) => NodeValue::Bool(*b),
        serde_json::Value::Number(n) => NodeValue::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => NodeValue::String(s.clone()),
        serde_json::Value::Array(items) => {
            NodeValue::Array(items.iter().map(|v| json_node(v, location)).collect())
        }
        serde_json::Value::Object(map) => NodeValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), json_node(v, location)))
                .collect(),
        ),
    };
    Node::new(node_value, location.clone())
}

fn validate_model(model: &Model, events: &mut Vec<ValidationEvent>) {
    for shape in model.shapes.values() {
        for (name, member) in shape.kind.members() {
            if !model.shapes.contains_key(&member.target) {
                events.push(ValidationEvent::danger(
                    "UnresolvedShape",
                    format!(
                        "member `{}${name}` targets undefined shape `{}`",
                        shape.id, member.target
                    ),
                    member.source.clone(),
                ));
            }
        }
        for (trait_id, node) in &shape.traits {
            let known = trait_id.namespace() == "smithy.api"
                || model.shapes.contains_key(trait_id);
            if !known {
                events.push(ValidationEvent::warning(
                    "UnknownTrait",
                    format!("trait `{trait_id}` is not defined"),
                    node.source.clone(),
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assemble(files: &[(&str, &str)], validate: bool) -> ValidatedResult<Model> {
        let mut assembler = Assembler::new();
        for (path, text) in files {
            assembler.add_entry(*path, *text);
        }
        assembler.assemble(validate)
    }

    fn shape_id(s: &str) -> ShapeId {
        ShapeId::parse(s).unwrap()
    }

    #[test]
    fn apply_attaches_trait_across_files() {
        let result = assemble(
            &[
                (
                    "/p/m0.smithy",
                    "$version: \"2\"\nnamespace com.foo\nstring Foo\napply Bar @length(min: 1)\n",
                ),
                ("/p/m1.smithy", "$version: \"2\"\nnamespace com.foo\nstring Bar\n"),
            ],
            true,
        );
        let model = result.result().unwrap();
        let bar = model.shape(&shape_id("com.foo#Bar")).unwrap();
        let length = bar.traits.get(&ShapeId::prelude("length")).unwrap();
        assert_eq!(length.get("min").unwrap().as_f64(), Some(1.0));
        // The trait's source is the applying file, not the defining one.
        assert!(length.source.is_in_file(Path::new("/p/m0.smithy")));
        assert!(!result.is_broken(), "{:?}", result.events());
    }

    #[test]
    fn array_traits_merge_in_file_order() {
        let result = assemble(
            &[
                (
                    "/p/a.smithy",
                    "namespace com.foo\nstring Foo\napply Foo @tags([\"foo\"])\n",
                ),
                ("/p/b.smithy", "namespace com.foo\napply Foo @tags([\"bar\"])\n"),
            ],
            true,
        );
        let model = result.result().unwrap();
        let tags = model
            .shape(&shape_id("com.foo#Foo"))
            .unwrap()
            .traits
            .get(&ShapeId::prelude("tags"))
            .unwrap();
        let values: Vec<&str> = tags
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Node::as_str)
            .collect();
        assert_eq!(values, ["foo", "bar"]);
    }

    #[test]
    fn metadata_arrays_concatenate() {
        let result = assemble(
            &[
                ("/p/a.smithy", "metadata checks = [\"a\"]\nnamespace com.a\n"),
                ("/p/b.smithy", "metadata checks = [\"b\"]\nnamespace com.b\n"),
            ],
            true,
        );
        let model = result.result().unwrap();
        let checks = model.metadata.get("checks").unwrap().as_array().unwrap();
        let values: Vec<&str> = checks.iter().filter_map(Node::as_str).collect();
        assert_eq!(values, ["a", "b"]);
    }

    #[test]
    fn carry_over_rebuild_matches_full_reassembly() {
        // a defines Foo and tags it; b applies another tag to Foo; c is
        // unrelated but shares the `checks` metadata array with a. Rebuild
        // the co-dependent set {a, b} over the stripped model: the result
        // must match a full reassembly, including array ordering.
        let files = [
            (
                "/p/a.smithy",
                "metadata checks = [\"a\"]\nnamespace com.foo\nstring Foo\napply Foo @tags([\"foo\"])\n",
            ),
            ("/p/b.smithy", "namespace com.foo\napply Foo @tags([\"bar\"])\n"),
            (
                "/p/c.smithy",
                "metadata checks = [\"c\"]\nnamespace com.bar\nstring Bar\n",
            ),
        ];
        let full = assemble(&files, false);
        let full_model = full.result().unwrap();

        let removed: HashSet<PathBuf> =
            [PathBuf::from("/p/a.smithy"), PathBuf::from("/p/b.smithy")].into();
        let carried = strip_file_contributions(full_model, &removed);
        assert!(carried.shape(&shape_id("com.foo#Foo")).is_none());
        assert!(carried.shape(&shape_id("com.bar#Bar")).is_some());

        let mut second = Assembler::new().carry_over(carried).canonical_order(vec![
            "/p/a.smithy".into(),
            "/p/b.smithy".into(),
            "/p/c.smithy".into(),
        ]);
        second.add_entry("/p/a.smithy", files[0].1);
        second.add_entry("/p/b.smithy", files[1].1);
        let rebuilt = second.assemble(false);
        assert_eq!(rebuilt.result(), Some(full_model));

        // The metadata array kept full-reassembly order even though the
        // carried model contributed `c` first.
        let checks: Vec<&str> = rebuilt
            .result()
            .unwrap()
            .metadata
            .get("checks")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Node::as_str)
            .collect();
        assert_eq!(checks, ["a", "c"]);
    }

    #[test]
    fn stripping_removes_only_the_named_files_contributions() {
        let files = [
            (
                "/p/a.smithy",
                "metadata checks = [\"a\"]\nnamespace com.foo\nstring Foo\n",
            ),
            ("/p/b.smithy", "metadata checks = [\"b\"]\nnamespace com.bar\nstring Bar\n"),
        ];
        let full = assemble(&files, false);
        let removed: HashSet<PathBuf> = [PathBuf::from("/p/b.smithy")].into();
        let stripped = strip_file_contributions(full.result().unwrap(), &removed);

        assert!(stripped.shape(&shape_id("com.foo#Foo")).is_some());
        assert!(stripped.shape(&shape_id("com.bar#Bar")).is_none());
        let checks = stripped.metadata.get("checks").unwrap().as_array().unwrap();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].as_str(), Some("a"));
    }

    #[test]
    fn none_source_traits_survive_stripping() {
        let files = [("/p/a.smithy", "namespace com.foo\nstring Keep\n")];
        let full = assemble(&files, false);
        let mut model = full.result().unwrap().clone();

        // Synthetic trait with no source file, as assemblers produce.
        let keep = shape_id("com.foo#Keep");
        model.shape_mut(&keep).unwrap().traits.insert(
            ShapeId::prelude("sensitive"),
            Node::null(SourceLocation::none()),
        );

        let removed: HashSet<PathBuf> = [PathBuf::from("/p/other.smithy")].into();
        let stripped = strip_file_contributions(&model, &removed);
        assert!(
            stripped
                .shape(&keep)
                .unwrap()
                .traits
                .contains_key(&ShapeId::prelude("sensitive"))
        );
    }

    #[test]
    fn unresolved_apply_reported_only_when_validating() {
        let files = [("/p/a.smithy", "namespace com.foo\napply Ghost @length(min: 1)\n")];
        let silent = assemble(&files, false);
        assert!(silent.events().is_empty(), "{:?}", silent.events());

        let validated = assemble(&files, true);
        assert!(
            validated
                .events()
                .iter()
                .any(|e| e.id == "UnresolvedShape")
        );
    }

    #[test]
    fn duplicate_shapes_are_construction_events() {
        let files = [
            ("/p/a.smithy", "namespace com.foo\nstring Foo\n"),
            ("/p/b.smithy", "namespace com.foo\nstring Foo\n"),
        ];
        let result = assemble(&files, false);
        assert!(result.events().iter().any(|e| e.id == "DuplicateShape"));
        assert!(result.is_broken());
    }

    #[test]
    fn json_model_files_contribute_shapes() {
        let json = r#"{
            "smithy": "2.0",
            "shapes": {
                "com.foo#FromJson": {
                    "type": "string",
                    "traits": { "smithy.api#sensitive": {} }
                }
            },
            "metadata": { "origin": "json" }
        }"#;
        let result = assemble(&[("/p/model.json", json)], false);
        let model = result.result().unwrap();
        assert!(model.shape(&shape_id("com.foo#FromJson")).is_some());
        assert_eq!(
            model.metadata.get("origin").and_then(|n| n.as_str()),
            Some("json")
        );
    }

    #[test]
    fn prelude_shapes_are_present_and_sourceless() {
        let result = assemble(&[], false);
        let model = result.result().unwrap();
        let string = model.shape(&ShapeId::prelude("String")).unwrap();
        assert!(string.source.is_none());
    }
}
