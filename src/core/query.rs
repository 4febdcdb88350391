//! Query conditions, ordering, and the scoped query handed to stores
//!
//! A [`ScopedQuery`] is the only thing an [`EntityStore`](crate::core::store::EntityStore)
//! accepts for reads. Its constructor is crate-private: outside this crate a
//! scoped query can only be obtained from a
//! [`SecureQuery`](crate::core::secure_query::SecureQuery) (user-scoped types,
//! always carrying an owner) or from the entity service's shared-type path.

use crate::core::entity::{EntityRecord, lookup_path};
use crate::core::identity::{EntityId, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Dedicated columns of the `entities` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Id,
    WorkspaceId,
    UserId,
    Type,
    CreatedAt,
    UpdatedAt,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::WorkspaceId => "workspace_id",
            Column::UserId => "user_id",
            Column::Type => "type",
            Column::CreatedAt => "created_at",
            Column::UpdatedAt => "updated_at",
        }
    }

    /// Columns fixed by the security context
    pub fn is_reserved(&self) -> bool {
        matches!(self, Column::WorkspaceId | Column::UserId | Column::Type)
    }

    fn value_of(&self, record: &EntityRecord) -> Value {
        match self {
            Column::Id => Value::String(record.id.to_string()),
            Column::WorkspaceId => Value::String(record.workspace_id.to_string()),
            Column::UserId => record
                .user_id
                .map(|u| Value::String(u.to_string()))
                .unwrap_or(Value::Null),
            Column::Type => Value::String(record.entity_type.clone()),
            Column::CreatedAt => Value::String(record.created_at.to_rfc3339()),
            Column::UpdatedAt => Value::String(record.updated_at.to_rfc3339()),
        }
    }
}

/// What a condition looks at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum Field {
    /// Dotted path into the `data` payload
    Data(String),
    /// Dotted path into `metadata`
    Metadata(String),
    /// A relation name; matches if any edge of that name points at the value
    Relationship(String),
    Column(Column),
}

impl Field {
    pub fn data(path: impl Into<String>) -> Self {
        Field::Data(path.into())
    }

    pub fn metadata(path: impl Into<String>) -> Self {
        Field::Metadata(path.into())
    }

    pub fn relationship(name: impl Into<String>) -> Self {
        Field::Relationship(name.into())
    }

    /// The reserved column this field names, if any
    pub fn reserved_column(&self) -> Option<Column> {
        match self {
            Field::Column(c) if c.is_reserved() => Some(*c),
            _ => None,
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Eq,
    /// Equality, ignoring ASCII case for strings
    EqIgnoreCase,
    Ne,
    /// Case-insensitive substring match on strings
    Contains,
    /// Field is present and not null; the value is ignored
    Exists,
}

/// A single caller-supplied filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: Field,
    pub op: Op,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: Field, op: Op, value: impl Into<Value>) -> Self {
        Self {
            field,
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: Field, value: impl Into<Value>) -> Self {
        Self::new(field, Op::Eq, value)
    }

    pub fn eq_ignore_case(field: Field, value: impl Into<Value>) -> Self {
        Self::new(field, Op::EqIgnoreCase, value)
    }

    pub fn ne(field: Field, value: impl Into<Value>) -> Self {
        Self::new(field, Op::Ne, value)
    }

    pub fn contains(field: Field, value: impl Into<String>) -> Self {
        Self::new(field, Op::Contains, Value::String(value.into()))
    }

    pub fn exists(field: Field) -> Self {
        Self::new(field, Op::Exists, Value::Null)
    }

    /// Evaluate this condition against a record
    pub fn matches(&self, record: &EntityRecord) -> bool {
        if let Field::Relationship(name) = &self.field {
            return self.matches_relationship(record, name);
        }

        let column_value;
        let actual = match &self.field {
            Field::Data(path) => lookup_path(&record.data, path),
            Field::Metadata(path) => lookup_path(&record.metadata, path),
            Field::Column(column) => {
                column_value = column.value_of(record);
                Some(&column_value)
            }
            Field::Relationship(_) => None,
        };
        let actual = actual.filter(|v| !v.is_null());

        match self.op {
            Op::Exists => actual.is_some(),
            Op::Eq => equals(actual, &self.value),
            Op::Ne => !equals(actual, &self.value),
            Op::EqIgnoreCase => match (actual, &self.value) {
                (Some(Value::String(a)), Value::String(b)) => a.to_lowercase() == b.to_lowercase(),
                (_, Value::String(_)) => false,
                (a, b) => equals(a, b),
            },
            Op::Contains => match (actual, &self.value) {
                (Some(Value::String(a)), Value::String(b)) => {
                    a.to_lowercase().contains(&b.to_lowercase())
                }
                _ => false,
            },
        }
    }

    fn matches_relationship(&self, record: &EntityRecord, name: &str) -> bool {
        let targets = record.relationships.targets(name);
        match (self.op, &self.value) {
            (Op::Exists, _) => !targets.is_empty(),
            (Op::Ne, Value::String(v)) => !targets.iter().any(|t| t == v),
            (_, Value::String(v)) => targets.iter().any(|t| t == v),
            _ => false,
        }
    }
}

/// Equality where a null expectation matches a missing or null field
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match expected {
        Value::Null => actual.is_none(),
        value => actual == Some(value),
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    #[default]
    Desc,
}

/// Sort key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    CreatedAt,
    UpdatedAt,
    Data(String),
}

/// Ordering of a query's results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub key: SortKey,
    pub direction: Direction,
}

impl Default for OrderBy {
    fn default() -> Self {
        Self {
            key: SortKey::CreatedAt,
            direction: Direction::Desc,
        }
    }
}

impl OrderBy {
    pub fn new(key: SortKey, direction: Direction) -> Self {
        Self { key, direction }
    }

    /// Compare two records under this ordering
    ///
    /// Payload values compare numbers numerically and everything else by
    /// string form; missing values sort last regardless of direction.
    pub fn compare(&self, a: &EntityRecord, b: &EntityRecord) -> Ordering {
        let ordering = match &self.key {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::Data(path) => {
                match (lookup_path(&a.data, path), lookup_path(&b.data, path)) {
                    (Some(x), Some(y)) => compare_values(x, y),
                    (Some(_), None) => return Ordering::Less,
                    (None, Some(_)) => return Ordering::Greater,
                    (None, None) => Ordering::Equal,
                }
            }
        };
        match self.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        }
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}

/// A read against the entity store with its mandatory scope attached
///
/// `workspace_id` and `entity_type` are always present. `owner` is present for
/// every user-scoped read; it may be absent only for shared types.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedQuery {
    workspace_id: WorkspaceId,
    entity_type: String,
    owner: Option<UserId>,
    conditions: Vec<Condition>,
    order: OrderBy,
    limit: Option<usize>,
    offset: usize,
}

impl ScopedQuery {
    pub(crate) fn new(
        workspace_id: WorkspaceId,
        entity_type: impl Into<String>,
        owner: Option<UserId>,
    ) -> Self {
        Self {
            workspace_id,
            entity_type: entity_type.into(),
            owner,
            conditions: Vec::new(),
            order: OrderBy::default(),
            limit: None,
            offset: 0,
        }
    }

    pub(crate) fn with_conditions(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    /// Caller-supplied conditions (the scope itself is not repeated here)
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn ordering(&self) -> &OrderBy {
        &self.order
    }

    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    pub fn skip(&self) -> usize {
        self.offset
    }

    /// True if the record is inside the mandatory scope
    pub fn in_scope(&self, record: &EntityRecord) -> bool {
        record.workspace_id == self.workspace_id
            && record.entity_type == self.entity_type
            && self.owner.is_none_or(|owner| record.user_id == Some(owner))
    }

    /// Scope and caller conditions together
    pub fn matches(&self, record: &EntityRecord) -> bool {
        self.in_scope(record) && self.conditions.iter().all(|c| c.matches(record))
    }

    /// Sort and page an already-filtered result set
    pub fn arrange(&self, mut records: Vec<EntityRecord>) -> Vec<EntityRecord> {
        records.sort_by(|a, b| self.order.compare(a, b));
        let iter = records.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        }
    }
}

/// The row an update is allowed to touch
///
/// Stores must apply the write only where id, workspace and (when present)
/// owner all match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteGuard {
    id: EntityId,
    workspace_id: WorkspaceId,
    owner: Option<UserId>,
}

impl WriteGuard {
    pub(crate) fn new(id: EntityId, workspace_id: WorkspaceId, owner: Option<UserId>) -> Self {
        Self {
            id,
            workspace_id,
            owner,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner
    }

    pub fn admits(&self, record: &EntityRecord) -> bool {
        record.id == self.id
            && record.workspace_id == self.workspace_id
            && self.owner.is_none_or(|owner| record.user_id == Some(owner))
    }
}
