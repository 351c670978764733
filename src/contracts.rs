// The provider contract: the single polymorphism point every back-end satisfies.
// A `Document` is an opaque JSON object keyed by string fields, with a reserved
// `id` field; `Provider` is the async trait concrete back-ends implement
// identically with respect to the query semantics in `crate::query`.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The reserved field every document carries its identifier under.
pub const ID_FIELD: &str = "id";

/// A self-describing key/value document. Internally a `serde_json::Map`, which
/// already models the source's dynamic-typing requirement (null | bool | number |
/// string | array | object) without a bespoke sum type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document(Map<String, Value>);

impl Document {
    /// Wrap a JSON object as a document. Returns `None` if `value` is not an
    /// object, since a document is always a mapping.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.0.insert(ID_FIELD.to_string(), Value::String(id.into()));
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// An independent copy: `serde_json::Value` is already owned/non-aliasing, so
    /// cloning the map is sufficient to satisfy the deep-clone invariant.
    pub fn deep_clone(&self) -> Self {
        self.clone()
    }

    /// Shallow-merge `partial` over `self`, preserving `id` regardless of what
    /// `partial` contains for that key.
    pub fn merge(&mut self, partial: &Document) {
        let preserved_id = self.id().map(str::to_string);
        for (key, value) in partial.0.iter() {
            self.0.insert(key.clone(), value.clone());
        }
        if let Some(id) = preserved_id {
            self.set_id(id);
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Comparison/membership operator for a filter entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Regex,
}

/// A single filter entry: `field op value`. Constructed either from a bare
/// equality value or an explicit `{operator, value}` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub operator: Operator,
    pub value: Value,
}

impl FilterCondition {
    pub fn eq(value: Value) -> Self {
        Self {
            operator: Operator::Eq,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortEntry {
    pub field: String,
    pub order: SortDirection,
}

/// The filter/sort/page surface shared by every provider's `query` operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub filters: indexmap::IndexMap<String, FilterCondition>,
    #[serde(default)]
    pub sort_by: Vec<SortEntry>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, field: impl Into<String>, condition: FilterCondition) -> Self {
        self.filters.insert(field.into(), condition);
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, order: SortDirection) -> Self {
        self.sort_by.push(SortEntry {
            field: field.into(),
            order,
        });
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Connection lifecycle state: `Disconnected -> Connected -> Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A schema definition passed to `ensure_schema`. Back-ends that infer schema
/// dynamically (memory, file, relational) may ignore most of this; back-ends that
/// require explicit declaration use it verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub fields: indexmap::IndexMap<String, String>,
}

/// An index definition passed to `ensure_index`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
}

/// The interface every back-end satisfies. Operations not meaningful for a given
/// medium raise `StoreError::Unsupported` rather than failing silently or
/// panicking; the default method bodies below provide that behaviour so concrete
/// providers opt in only to what they actually support.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    async fn is_connected(&self) -> bool;

    async fn create(&mut self, collection: &str, document: Document) -> Result<Document>;
    async fn read(&self, collection: &str, id: &str) -> Result<Option<Document>>;
    async fn update(
        &mut self,
        collection: &str,
        id: &str,
        partial: Document,
    ) -> Result<Option<Document>>;
    async fn delete(&mut self, collection: &str, id: &str) -> Result<bool>;
    async fn query(&self, collection: &str, options: QueryOptions) -> Result<Vec<Document>>;

    async fn begin_transaction(&mut self) -> Result<()> {
        Err(crate::error::StoreError::unsupported(
            "beginTransaction is not supported by this provider",
        ))
    }

    async fn commit(&mut self) -> Result<()> {
        Err(crate::error::StoreError::unsupported(
            "commit is not supported by this provider",
        ))
    }

    async fn rollback(&mut self) -> Result<()> {
        Err(crate::error::StoreError::unsupported(
            "rollback is not supported by this provider",
        ))
    }

    async fn ensure_schema(&mut self, _collection: &str, _def: Option<SchemaDefinition>) -> Result<()> {
        Err(crate::error::StoreError::unsupported(
            "ensureSchema is not supported by this provider",
        ))
    }

    async fn ensure_index(&mut self, _collection: &str, _def: IndexDefinition) -> Result<()> {
        Err(crate::error::StoreError::unsupported(
            "ensureIndex is not supported by this provider",
        ))
    }
}
