use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// An absolute Smithy shape id: `namespace#name` with an optional `$member`
/// suffix. Stored as the joined string; accessors slice it.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShapeId(String);

impl ShapeId {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}#{name}"))
    }

    /// Parse an absolute shape id. Returns `None` when the string has no
    /// namespace separator.
    pub fn parse(s: &str) -> Option<Self> {
        let hash = s.find('#')?;
        if hash == 0 || hash == s.len() - 1 {
            return None;
        }
        Some(Self(s.to_string()))
    }

    pub fn namespace(&self) -> &str {
        &self.0[..self.0.find('#').unwrap_or(0)]
    }

    /// The shape name, without namespace or member.
    pub fn name(&self) -> &str {
        let start = self.0.find('#').map(|i| i + 1).unwrap_or(0);
        let end = self.0.find('$').unwrap_or(self.0.len());
        &self.0[start..end]
    }

    pub fn member(&self) -> Option<&str> {
        self.0.find('$').map(|i| &self.0[i + 1..])
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shorthand for prelude ids.
    pub fn prelude(name: &str) -> Self {
        Self::new("smithy.api", name)
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShapeId({})", self.0)
    }
}

/// Where a shape, trait, or node value came from. `file == None` is the
/// distinguished "no source" location (`SourceLocation::none()`): prelude
/// shapes and synthetic traits carry it, and incremental rebuilds must never
/// drop values on its account.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: Option<PathBuf>,
    /// 1-based; 0 when unknown.
    pub line: usize,
    /// 1-based; 0 when unknown.
    pub column: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self {
            file: Some(file.into()),
            line,
            column,
        }
    }

    pub fn none() -> Self {
        Self {
            file: None,
            line: 0,
            column: 0,
        }
    }

    pub fn is_none(&self) -> bool {
        self.file.is_none()
    }

    pub fn is_in_file(&self, path: &Path) -> bool {
        self.file.as_deref() == Some(path)
    }
}

impl fmt::Debug for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(p) => write!(f, "{}:{}:{}", p.display(), self.line, self.column),
            None => f.write_str("<none>"),
        }
    }
}

/// A node value with its source location. Array elements each carry their
/// own location so incremental rebuilds can remove per-file contributions.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub value: NodeValue,
    pub source: SourceLocation,
}

#[derive(Clone, Debug, PartialEq)]
pub enum NodeValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Node>),
    Object(Vec<(String, Node)>),
}

impl Node {
    pub fn new(value: NodeValue, source: SourceLocation) -> Self {
        Self { value, source }
    }

    pub fn null(source: SourceLocation) -> Self {
        Self::new(NodeValue::Null, source)
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            NodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &self.value {
            NodeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Node]> {
        match &self.value {
            NodeValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Node> {
        match &self.value {
            NodeValue::Object(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Structural equality, ignoring source locations.
    pub fn value_eq(&self, other: &Node) -> bool {
        match (&self.value, &other.value) {
            (NodeValue::Null, NodeValue::Null) => true,
            (NodeValue::Bool(a), NodeValue::Bool(b)) => a == b,
            (NodeValue::Number(a), NodeValue::Number(b)) => a == b,
            (NodeValue::String(a), NodeValue::String(b)) => a == b,
            (NodeValue::Array(a), NodeValue::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.value_eq(y))
            }
            (NodeValue::Object(a), NodeValue::Object(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.value_eq(vb))
            }
            _ => false,
        }
    }
}

/// A member of an aggregate shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Member {
    pub target: ShapeId,
    pub traits: BTreeMap<ShapeId, Node>,
    pub source: SourceLocation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimpleKind {
    Blob,
    Boolean,
    String,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    BigInteger,
    BigDecimal,
    Timestamp,
    Document,
}

impl SimpleKind {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Boolean => "boolean",
            Self::String => "string",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Integer => "integer",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::BigInteger => "bigInteger",
            Self::BigDecimal => "bigDecimal",
            Self::Timestamp => "timestamp",
            Self::Document => "document",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ShapeKind {
    Simple(SimpleKind),
    List {
        member: Box<Member>,
    },
    Map {
        key: Box<Member>,
        value: Box<Member>,
    },
    Structure {
        members: BTreeMap<String, Member>,
    },
    Union {
        members: BTreeMap<String, Member>,
    },
    Enum {
        members: BTreeMap<String, Member>,
    },
}

impl ShapeKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Simple(k) => k.keyword(),
            Self::List { .. } => "list",
            Self::Map { .. } => "map",
            Self::Structure { .. } => "structure",
            Self::Union { .. } => "union",
            Self::Enum { .. } => "enum",
        }
    }

    pub fn members(&self) -> Box<dyn Iterator<Item = (&str, &Member)> + '_> {
        match self {
            Self::Simple(_) => Box::new(std::iter::empty()),
            Self::List { member } => Box::new(std::iter::once(("member", member.as_ref()))),
            Self::Map { key, value } => Box::new(
                [("key", key.as_ref()), ("value", value.as_ref())].into_iter(),
            ),
            Self::Structure { members } | Self::Union { members } | Self::Enum { members } => {
                Box::new(members.iter().map(|(k, v)| (k.as_str(), v)))
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Shape {
    pub id: ShapeId,
    pub kind: ShapeKind,
    pub source: SourceLocation,
    /// Applied traits, keyed by trait shape id. Each value's `source` is the
    /// application site, which for `apply` statements may be a different
    /// file than the shape's own.
    pub traits: BTreeMap<ShapeId, Node>,
}

impl Shape {
    pub fn simple(id: ShapeId, kind: SimpleKind, source: SourceLocation) -> Self {
        Self {
            id,
            kind: ShapeKind::Simple(kind),
            source,
            traits: BTreeMap::new(),
        }
    }
}

/// An assembled semantic model.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Model {
    pub shapes: BTreeMap<ShapeId, Shape>,
    pub metadata: BTreeMap<String, Node>,
}

impl Model {
    pub fn shape(&self, id: &ShapeId) -> Option<&Shape> {
        self.shapes.get(id)
    }

    pub fn shape_mut(&mut self, id: &ShapeId) -> Option<&mut Shape> {
        self.shapes.get_mut(id)
    }

    /// Ids of shapes whose definition site lies in `path`.
    pub fn shapes_defined_in(&self, path: &Path) -> Vec<ShapeId> {
        self.shapes
            .values()
            .filter(|s| s.source.is_in_file(path))
            .map(|s| s.id.clone())
            .collect()
    }
}

/// Diagnostic severity, ordered least to most severe. The wire names match
/// the `diagnostics.minimumSeverity` initialization option.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Note,
    Warning,
    Danger,
    Error,
}

/// One event produced during parsing, assembly, or validation.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationEvent {
    pub severity: Severity,
    /// Stable event id, e.g. `Parse`, `DuplicateShape`, `UnresolvedShape`.
    pub id: String,
    pub message: String,
    pub location: SourceLocation,
}

impl ValidationEvent {
    pub fn error(id: &str, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            severity: Severity::Error,
            id: id.to_string(),
            message: message.into(),
            location,
        }
    }

    pub fn danger(id: &str, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            severity: Severity::Danger,
            id: id.to_string(),
            message: message.into(),
            location,
        }
    }

    pub fn warning(id: &str, message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            severity: Severity::Warning,
            id: id.to_string(),
            message: message.into(),
            location,
        }
    }
}

/// The outcome of an assembly: always an events list, optionally a model.
/// A present model with error events is "broken but present" and is still
/// served best-effort.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidatedResult<T> {
    result: Option<T>,
    events: Vec<ValidationEvent>,
}

impl<T> ValidatedResult<T> {
    pub fn new(result: Option<T>, events: Vec<ValidationEvent>) -> Self {
        Self { result, events }
    }

    pub fn ok(result: T) -> Self {
        Self {
            result: Some(result),
            events: Vec::new(),
        }
    }

    pub fn empty(events: Vec<ValidationEvent>) -> Self {
        Self {
            result: None,
            events,
        }
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    pub fn events(&self) -> &[ValidationEvent] {
        &self.events
    }

    pub fn is_broken(&self) -> bool {
        self.events.iter().any(|e| e.severity >= Severity::Danger)
    }

    pub fn into_parts(self) -> (Option<T>, Vec<ValidationEvent>) {
        (self.result, self.events)
    }

    /// Events whose location lies in `path`.
    pub fn events_for_file(&self, path: &Path) -> impl Iterator<Item = &ValidationEvent> {
        self.events.iter().filter(move |e| e.location.is_in_file(path))
    }
}
