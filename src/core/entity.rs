//! The polymorphic entity record and its relationship field

use crate::core::identity::{EntityId, UserId, WorkspaceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single stored domain object
///
/// Contacts, deals, emails, calendar events and every other domain kind share
/// this shape. `entity_type` selects the payload schema of `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub id: EntityId,
    /// Owning tenant. Never changes after creation.
    pub workspace_id: WorkspaceId,
    /// Owning user; required for user-scoped types
    pub user_id: Option<UserId>,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub data: Value,
    #[serde(default)]
    pub relationships: Relationships,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl EntityRecord {
    /// Build a fresh record stamped with the current time
    pub fn new(
        workspace_id: WorkspaceId,
        user_id: Option<UserId>,
        entity_type: impl Into<String>,
        data: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: EntityId::new(),
            workspace_id,
            user_id,
            entity_type: entity_type.into(),
            data,
            relationships: Relationships::default(),
            metadata: empty_object(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Read a payload field by dotted path (`"from.email"`)
    pub fn data_field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.data, path)
    }

    /// Read a metadata field by dotted path
    pub fn metadata_field(&self, path: &str) -> Option<&Value> {
        lookup_path(&self.metadata, path)
    }

    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::of(&self.data)
    }

    pub fn is_archived(&self) -> bool {
        self.lifecycle() == Lifecycle::Archived
    }

    /// Mark the record archived in its payload and bump `updated_at`
    pub fn archive(&mut self) {
        set_flag(&mut self.data, ARCHIVED_FIELD, true);
        self.touch();
    }

    /// Clear both archive and disconnect flags
    pub fn restore(&mut self) {
        set_flag(&mut self.data, ARCHIVED_FIELD, false);
        if let Some(obj) = self.data.as_object_mut()
            && obj.contains_key(CONNECTED_FIELD)
        {
            obj.insert(CONNECTED_FIELD.to_string(), Value::Bool(true));
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Normalised key written by [`EntityService::upsert`](crate::core::service::EntityService::upsert)
    pub fn upsert_key(&self) -> Option<&str> {
        self.metadata.get(UPSERT_KEY_FIELD).and_then(Value::as_str)
    }

    /// Whether `other` occupies the same upsert slot as this record
    pub fn same_upsert_slot(&self, other: &EntityRecord) -> bool {
        self.upsert_key().is_some()
            && self.upsert_key() == other.upsert_key()
            && self.workspace_id == other.workspace_id
            && self.user_id == other.user_id
            && self.entity_type == other.entity_type
    }
}

pub(crate) fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(root, |node, segment| node.as_object()?.get(segment))
}

fn set_flag(data: &mut Value, field: &str, value: bool) {
    if !data.is_object() {
        *data = empty_object();
    }
    if let Some(obj) = data.as_object_mut() {
        obj.insert(field.to_string(), Value::Bool(value));
    }
}

/// Metadata field holding an upserted record's key
pub const UPSERT_KEY_FIELD: &str = "upsertKey";

const ARCHIVED_FIELD: &str = "archived";
const CONNECTED_FIELD: &str = "connected";

/// Two-state lifecycle encoded in the payload
///
/// There is no tombstone table: `archived: true` (or `connected: false` for
/// account records) is the only removal a caller performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Archived,
}

impl Lifecycle {
    pub fn of(data: &Value) -> Self {
        let archived = data.get(ARCHIVED_FIELD).and_then(Value::as_bool) == Some(true);
        let disconnected = data.get(CONNECTED_FIELD).and_then(Value::as_bool) == Some(false);
        if archived || disconnected {
            Lifecycle::Archived
        } else {
            Lifecycle::Active
        }
    }
}

// =============================================================================
// Relationships
// =============================================================================

/// One tagged edge from an entity to another entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(rename = "type")]
    pub relation: String,
    pub target_id: String,
}

impl Edge {
    pub fn new(relation: impl Into<String>, target_id: impl ToString) -> Self {
        Self {
            relation: relation.into(),
            target_id: target_id.to_string(),
        }
    }
}

/// The relationship field of an entity
///
/// Stored rows carry one of two shapes: a map of relation name to target id
/// (`{"contact": "…"}`) or a list of tagged edges
/// (`[{"type": "contact", "targetId": "…"}]`). Both deserialize here; read
/// through [`Relationships::edges`] rather than matching on the shape. New
/// writes are stored in the edge-list form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Relationships {
    Edges(Vec<Edge>),
    Keyed(Map<String, Value>),
}

impl Default for Relationships {
    fn default() -> Self {
        Relationships::Edges(Vec::new())
    }
}

impl Relationships {
    /// Parse a stored value, treating `null` as no relationships
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
    }

    /// Normalize either representation into one edge list
    ///
    /// In the keyed form, a list value fans out into one edge per element and
    /// non-string ids are rendered with their JSON text. Null values are skipped.
    pub fn edges(&self) -> Vec<Edge> {
        match self {
            Relationships::Edges(edges) => edges.clone(),
            Relationships::Keyed(map) => map
                .iter()
                .flat_map(|(relation, target)| match target {
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|item| target_string(item).map(|t| Edge::new(relation, t)))
                        .collect::<Vec<_>>(),
                    other => target_string(other)
                        .map(|t| vec![Edge::new(relation, t)])
                        .unwrap_or_default(),
                })
                .collect(),
        }
    }

    /// All targets of one relation name
    pub fn targets(&self, relation: &str) -> Vec<String> {
        self.edges()
            .into_iter()
            .filter(|e| e.relation == relation)
            .map(|e| e.target_id)
            .collect()
    }

    pub fn has_edge(&self, relation: &str, target_id: &str) -> bool {
        self.edges()
            .iter()
            .any(|e| e.relation == relation && e.target_id == target_id)
    }

    /// Rewrite into the edge-list form
    pub fn into_canonical(self) -> Self {
        match self {
            Relationships::Keyed(_) => Relationships::Edges(self.edges()),
            edges => edges,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.edges().is_empty()
    }
}

impl From<Vec<Edge>> for Relationships {
    fn from(edges: Vec<Edge>) -> Self {
        Relationships::Edges(edges)
    }
}

/// Scalar targets only; numbers and booleans by their JSON text
fn target_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}
