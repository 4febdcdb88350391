//! Generic create/read/update/search over the entity store
//!
//! User-scoped types only ever reach the store through a [`SecureQuery`]; the
//! shared-type path is scoped by workspace alone. Which path a call takes is
//! decided by the [`TypeRegistry`], never by the caller.

use crate::core::entity::{EntityRecord, Relationships, UPSERT_KEY_FIELD};
use crate::core::error::{
    EvergreenResult, FieldValidationError, NotFoundError, StorageError, ValidationError,
};
use crate::core::identity::{EntityId, UserId, WorkspaceId};
use crate::core::query::{Condition, Direction, Field, OrderBy, ScopedQuery, SortKey, WriteGuard};
use crate::core::schema::TypeRegistry;
use crate::core::secure_query::{SecureQuery, SecurityContext};
use crate::core::store::{EntityStore, UPSERT_KEY_CONSTRAINT};
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Who is creating an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateContext {
    /// Owner; required for user-scoped types
    pub user_id: Option<UserId>,
    /// Recorded in `metadata.createdBy`
    pub created_by: Option<UserId>,
}

impl CreateContext {
    pub fn owned_by(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            created_by: Some(user_id),
        }
    }

    pub fn shared() -> Self {
        Self::default()
    }
}

/// Who is modifying an entity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateContext {
    /// Requesting user; required when the target is user-scoped
    pub user_id: Option<UserId>,
}

impl UpdateContext {
    pub fn as_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }
}

/// How new payload is applied
#[derive(Debug, Clone, PartialEq)]
pub enum DataPatch {
    /// Shallow merge: top-level keys of the patch overwrite existing keys
    Merge(Value),
    /// Replace the whole payload
    Replace(Value),
}

/// Changes to apply in [`EntityService::update`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityUpdate {
    pub data: Option<DataPatch>,
    /// Shallow-merged into `metadata`
    pub metadata: Option<Value>,
    /// Replaces the relationships (stored in edge-list form)
    pub relationships: Option<Relationships>,
}

impl EntityUpdate {
    pub fn merge(data: Value) -> Self {
        Self {
            data: Some(DataPatch::Merge(data)),
            ..Default::default()
        }
    }

    pub fn replace(data: Value) -> Self {
        Self {
            data: Some(DataPatch::Replace(data)),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_relationships(mut self, relationships: Relationships) -> Self {
        self.relationships = Some(relationships);
        self
    }
}

/// Parameters of [`EntityService::find`]
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    pub workspace_id: WorkspaceId,
    pub entity_type: String,
    pub user_id: Option<UserId>,
    pub conditions: Vec<Condition>,
    pub limit: Option<usize>,
    pub offset: usize,
    pub order_by: SortKey,
    pub direction: Direction,
    /// Include records whose payload marks them archived or disconnected
    pub include_archived: bool,
}

impl FindOptions {
    pub fn new(workspace_id: WorkspaceId, entity_type: impl Into<String>) -> Self {
        Self {
            workspace_id,
            entity_type: entity_type.into(),
            user_id: None,
            conditions: Vec::new(),
            limit: None,
            offset: 0,
            order_by: SortKey::CreatedAt,
            direction: Direction::Desc,
            include_archived: true,
        }
    }

    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
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

    pub fn order_by(mut self, key: SortKey, direction: Direction) -> Self {
        self.order_by = key;
        self.direction = direction;
        self
    }

    pub fn active_only(mut self) -> Self {
        self.include_archived = false;
        self
    }
}

/// Field-equality criteria over the `data` payload
///
/// String values match case-insensitively; other values exactly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchCriteria {
    fields: Vec<(String, Value)>,
}

impl MatchCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((path.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Order-independent key text; strings are lowercased as they match
    pub fn upsert_key(&self) -> String {
        let mut fields: Vec<(&String, Value)> = self
            .fields
            .iter()
            .map(|(path, value)| match value {
                Value::String(s) => (path, Value::String(s.to_lowercase())),
                other => (path, other.clone()),
            })
            .collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        Value::Array(
            fields
                .into_iter()
                .map(|(path, value)| Value::Array(vec![Value::String(path.clone()), value]))
                .collect(),
        )
        .to_string()
    }

    fn into_conditions(self) -> Vec<Condition> {
        self.fields
            .into_iter()
            .map(|(path, value)| match value {
                Value::String(_) => Condition::eq_ignore_case(Field::Data(path), value),
                other => Condition::eq(Field::Data(path), other),
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for MatchCriteria {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// A record fetched by id that has not been checked against an owner
///
/// Shared-type records can be released with [`Unverified::into_shared`];
/// user-scoped records only through [`Unverified::verify`].
#[derive(Debug, Clone)]
#[must_use = "an unverified record must be verified or released before use"]
pub struct Unverified {
    record: EntityRecord,
    user_scoped: bool,
}

impl Unverified {
    pub fn id(&self) -> EntityId {
        self.record.id
    }

    pub fn entity_type(&self) -> &str {
        &self.record.entity_type
    }

    pub fn is_user_scoped(&self) -> bool {
        self.user_scoped
    }

    /// Check ownership against a security context
    pub fn verify(self, query: &SecureQuery) -> EvergreenResult<EntityRecord> {
        query.verify_result(&self.record)?;
        Ok(self.record)
    }

    /// Release a shared-type record
    pub fn into_shared(self) -> EvergreenResult<EntityRecord> {
        if self.user_scoped {
            return Err(ValidationError::OwnerVerificationRequired {
                entity_type: self.record.entity_type,
            }
            .into());
        }
        Ok(self.record)
    }
}

/// Entity service over any [`EntityStore`]
pub struct EntityService<S> {
    store: Arc<S>,
    registry: Arc<TypeRegistry>,
}

impl<S> Clone for EntityService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: EntityStore> EntityService<S> {
    pub fn new(store: Arc<S>, registry: TypeRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
        }
    }

    /// Service with the built-in type registry
    pub fn with_builtin_types(store: Arc<S>) -> Self {
        Self::new(store, TypeRegistry::builtin())
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Secure query for a user-scoped type
    pub fn secure_query(
        &self,
        workspace_id: WorkspaceId,
        user_id: UserId,
        entity_type: &str,
    ) -> EvergreenResult<SecureQuery> {
        self.registry.definition(entity_type)?;
        Ok(SecureQuery::new(SecurityContext::new(
            workspace_id,
            user_id,
            entity_type,
        )))
    }

    /// Insert a new entity
    ///
    /// User-scoped types require `context.user_id`; without it nothing is
    /// stored.
    pub async fn create(
        &self,
        workspace_id: WorkspaceId,
        entity_type: &str,
        data: Value,
        relationships: Option<Relationships>,
        context: CreateContext,
    ) -> EvergreenResult<EntityRecord> {
        let definition = self.registry.definition(entity_type)?;
        if definition.is_user_scoped() && context.user_id.is_none() {
            return Err(ValidationError::MissingOwner {
                entity_type: entity_type.to_string(),
            }
            .into());
        }
        definition.validate(&data)?;

        let record = new_record(workspace_id, entity_type, data, relationships, context);
        let created = self.store.insert(record).await?;
        tracing::debug!(
            entity_id = %created.id,
            workspace_id = %workspace_id,
            entity_type = %entity_type,
            user_id = ?created.user_id,
            "Created entity"
        );
        Ok(created)
    }

    /// Build the store query for a find, choosing the owner-scoped path when
    /// a user id is known
    fn scoped_query(&self, options: FindOptions) -> EvergreenResult<(ScopedQuery, Option<SecureQuery>)> {
        let definition = self.registry.definition(&options.entity_type)?;

        let mut conditions = options.conditions;
        if !options.include_archived {
            conditions.push(Condition::ne(Field::data("archived"), true));
            conditions.push(Condition::ne(Field::data("connected"), false));
        }

        let (query, secure) = match options.user_id {
            Some(user_id) => {
                let secure = SecureQuery::new(SecurityContext::new(
                    options.workspace_id,
                    user_id,
                    options.entity_type.clone(),
                ));
                (secure.where_(conditions)?, Some(secure))
            }
            None if definition.is_user_scoped() => {
                return Err(ValidationError::MissingOwner {
                    entity_type: options.entity_type,
                }
                .into());
            }
            None => {
                if let Some(column) = conditions.iter().find_map(|c| c.field.reserved_column()) {
                    return Err(ValidationError::ReservedField {
                        field: column.name().to_string(),
                    }
                    .into());
                }
                (
                    ScopedQuery::new(options.workspace_id, options.entity_type, None)
                        .with_conditions(conditions),
                    None,
                )
            }
        };

        let mut query = query.order_by(OrderBy::new(options.order_by, options.direction));
        if let Some(limit) = options.limit {
            query = query.limit(limit);
        }
        Ok((query.offset(options.offset), secure))
    }

    /// Query entities of one type
    ///
    /// With a user id this is an owner-scoped query. For a user-scoped type
    /// the user id is mandatory.
    pub async fn find(&self, options: FindOptions) -> EvergreenResult<Vec<EntityRecord>> {
        let (query, secure) = self.scoped_query(options)?;
        let records = self.store.select(&query).await?;

        tracing::debug!(
            workspace_id = %query.workspace_id(),
            entity_type = %query.entity_type(),
            user_id = ?query.owner(),
            count = records.len(),
            "Found entities"
        );

        match secure {
            Some(secure) => Ok(secure.filter_results(records).records),
            None => Ok(self.filter_workspace(&query, records)),
        }
    }

    /// Shared-type fail-safe: drop anything outside the queried workspace
    fn filter_workspace(&self, query: &ScopedQuery, records: Vec<EntityRecord>) -> Vec<EntityRecord> {
        let total = records.len();
        let kept: Vec<EntityRecord> = records.into_iter().filter(|r| query.in_scope(r)).collect();
        if kept.len() != total {
            tracing::warn!(
                security_event = true,
                discarded = total - kept.len(),
                workspace_id = %query.workspace_id(),
                entity_type = %query.entity_type(),
                "Filtered records outside the workspace"
            );
        }
        kept
    }

    /// First match of a find, or not found
    pub async fn find_one(&self, options: FindOptions) -> EvergreenResult<EntityRecord> {
        let entity_type = options.entity_type.clone();
        self.find(options.limit(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| NotFoundError::NoMatch { entity_type }.into())
    }

    /// Number of entities a find would return, ignoring limit and offset
    pub async fn count(&self, options: FindOptions) -> EvergreenResult<usize> {
        let (query, _) = self.scoped_query(options)?;
        Ok(self.store.count(&query).await?)
    }

    /// Fetch by primary key inside a workspace
    ///
    /// The result must be verified (user-scoped types) or released as shared
    /// before it can be read.
    pub async fn find_by_id(&self, workspace_id: WorkspaceId, id: EntityId) -> EvergreenResult<Unverified> {
        let record = self
            .store
            .fetch(workspace_id, id)
            .await?
            .ok_or(NotFoundError::Entity { id })?;

        if record.workspace_id != workspace_id {
            tracing::error!(
                security_event = true,
                entity_id = %id,
                requested_workspace = %workspace_id,
                actual_workspace = %record.workspace_id,
                "Store returned a record from another workspace"
            );
            return Err(StorageError::Integrity {
                message: format!("fetch of '{}' crossed a workspace boundary", id),
            }
            .into());
        }

        let user_scoped = self.registry.is_user_scoped(&record.entity_type)?;
        Ok(Unverified {
            record,
            user_scoped,
        })
    }

    /// Apply an update to one entity
    ///
    /// For user-scoped types the fetched record is verified against
    /// `context.user_id` before anything is written, and the write itself is
    /// guarded by the same owner.
    pub async fn update(
        &self,
        workspace_id: WorkspaceId,
        id: EntityId,
        update: EntityUpdate,
        context: UpdateContext,
    ) -> EvergreenResult<EntityRecord> {
        let fetched = self.find_by_id(workspace_id, id).await?;

        let (mut record, guard) = if fetched.is_user_scoped() {
            let user_id = context.user_id.ok_or_else(|| ValidationError::MissingOwner {
                entity_type: fetched.entity_type().to_string(),
            })?;
            let secure = self.secure_query(workspace_id, user_id, fetched.entity_type())?;
            let record = fetched.verify(&secure)?;
            let guard = secure.write_guard(&record);
            (record, guard)
        } else {
            let record = fetched.into_shared()?;
            let guard = WriteGuard::new(record.id, workspace_id, None);
            (record, guard)
        };

        if let Some(patch) = update.data {
            record.data = match patch {
                DataPatch::Replace(data) => data,
                DataPatch::Merge(data) => merge_objects(record.data, data),
            };
            self.registry.validate(&record.entity_type, &record.data)?;
        }
        if let Some(metadata) = update.metadata {
            record.metadata = merge_objects(record.metadata, metadata);
        }
        if let Some(relationships) = update.relationships {
            record.relationships = relationships.into_canonical();
        }
        record.updated_at = Utc::now();

        let updated = self
            .store
            .update(&guard, record)
            .await?
            .ok_or(NotFoundError::Entity { id })?;

        tracing::debug!(
            entity_id = %id,
            workspace_id = %workspace_id,
            entity_type = %updated.entity_type,
            "Updated entity"
        );
        Ok(updated)
    }

    /// Payload-field search within a workspace
    ///
    /// Owner rules are the same as [`EntityService::find`].
    pub async fn search_entities(
        &self,
        workspace_id: WorkspaceId,
        entity_type: &str,
        criteria: MatchCriteria,
        user_id: Option<UserId>,
    ) -> EvergreenResult<Vec<EntityRecord>> {
        let mut options = FindOptions::new(workspace_id, entity_type);
        options.user_id = user_id;
        options.conditions = criteria.into_conditions();
        self.find(options).await
    }

    /// Update the record matching `key`, or create it
    ///
    /// Used by sync jobs that re-import the same provider objects. The new
    /// payload is merged into an existing match. A created record carries
    /// the normalised key in `metadata.upsertKey`, which the store keeps
    /// unique per workspace, type and owner; the loser of a concurrent
    /// create re-fetches the winner and merges into it.
    pub async fn upsert(
        &self,
        workspace_id: WorkspaceId,
        entity_type: &str,
        key: MatchCriteria,
        data: Value,
        context: CreateContext,
    ) -> EvergreenResult<EntityRecord> {
        if key.is_empty() {
            return Err(ValidationError::FieldErrors(vec![FieldValidationError {
                field: "key".to_string(),
                message: "upsert needs at least one match field".to_string(),
            }])
            .into());
        }

        let upsert_key = key.upsert_key();
        let existing = self
            .search_entities(workspace_id, entity_type, key, context.user_id)
            .await?;
        if let Some(found) = existing.into_iter().next() {
            return self.merge_into(workspace_id, found.id, data, context).await;
        }

        let definition = self.registry.definition(entity_type)?;
        definition.validate(&data)?;
        let mut record = new_record(workspace_id, entity_type, data.clone(), None, context);
        if let Some(meta) = record.metadata.as_object_mut() {
            meta.insert(UPSERT_KEY_FIELD.to_string(), Value::String(upsert_key.clone()));
        }

        match self.store.insert(record).await {
            Ok(created) => {
                tracing::debug!(
                    entity_id = %created.id,
                    workspace_id = %workspace_id,
                    entity_type = %entity_type,
                    "Upsert created entity"
                );
                Ok(created)
            }
            Err(StorageError::UniqueViolation { constraint }) if constraint == UPSERT_KEY_CONSTRAINT => {
                tracing::warn!(
                    workspace_id = %workspace_id,
                    entity_type = %entity_type,
                    upsert_key = %upsert_key,
                    "Concurrent upsert created the record first, merging into it"
                );
                let mut options = FindOptions::new(workspace_id, entity_type)
                    .filter(Condition::eq(Field::metadata(UPSERT_KEY_FIELD), upsert_key.as_str()));
                options.user_id = context.user_id;
                let winner = self.find(options).await?.into_iter().next().ok_or_else(|| {
                    StorageError::Integrity {
                        message: format!(
                            "upsert key {} of '{}' is taken but no record holds it",
                            upsert_key, entity_type
                        ),
                    }
                })?;
                self.merge_into(workspace_id, winner.id, data, context).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn merge_into(
        &self,
        workspace_id: WorkspaceId,
        id: EntityId,
        data: Value,
        context: CreateContext,
    ) -> EvergreenResult<EntityRecord> {
        self.update(
            workspace_id,
            id,
            EntityUpdate::merge(data),
            UpdateContext {
                user_id: context.user_id,
            },
        )
        .await
    }

    /// Soft-delete: flag the payload as archived
    pub async fn archive(
        &self,
        workspace_id: WorkspaceId,
        id: EntityId,
        context: UpdateContext,
    ) -> EvergreenResult<EntityRecord> {
        let mut flag = Map::new();
        flag.insert("archived".to_string(), Value::Bool(true));
        self.update(workspace_id, id, EntityUpdate::merge(Value::Object(flag)), context)
            .await
    }

    /// Undo [`EntityService::archive`] (and a disconnect)
    pub async fn restore(
        &self,
        workspace_id: WorkspaceId,
        id: EntityId,
        context: UpdateContext,
    ) -> EvergreenResult<EntityRecord> {
        let fetched = self.find_by_id(workspace_id, id).await?;
        let current = if fetched.is_user_scoped() {
            let user_id = context.user_id.ok_or_else(|| ValidationError::MissingOwner {
                entity_type: fetched.entity_type().to_string(),
            })?;
            let secure = self.secure_query(workspace_id, user_id, fetched.entity_type())?;
            fetched.verify(&secure)?
        } else {
            fetched.into_shared()?
        };

        let mut restored = current;
        restored.restore();
        self.update(workspace_id, id, EntityUpdate::replace(restored.data), context)
            .await
    }
}

fn new_record(
    workspace_id: WorkspaceId,
    entity_type: &str,
    data: Value,
    relationships: Option<Relationships>,
    context: CreateContext,
) -> EntityRecord {
    let mut record = EntityRecord::new(workspace_id, context.user_id, entity_type, data);
    record.relationships = relationships.unwrap_or_default().into_canonical();
    if let Some(creator) = context.created_by
        && let Some(meta) = record.metadata.as_object_mut()
    {
        meta.insert("createdBy".to_string(), Value::String(creator.to_string()));
    }
    record
}

/// Shallow merge of two JSON objects; non-object patches replace outright
fn merge_objects(base: Value, patch: Value) -> Value {
    match (base, patch) {
        (Value::Object(mut base), Value::Object(patch)) => {
            for (key, value) in patch {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, patch) => patch,
    }
}
