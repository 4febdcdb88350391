//! In-memory implementation of the identity and entity stores for testing and development

use crate::core::entity::EntityRecord;
use crate::core::error::StorageError;
use crate::core::identity::{EntityId, NewUser, Role, User, UserId, Workspace, WorkspaceId};
use crate::core::query::{ScopedQuery, WriteGuard};
use crate::core::store::{EntityStore, IdentityStore, StoreResult, UPSERT_KEY_CONSTRAINT};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    workspaces: HashMap<WorkspaceId, Workspace>,
    users: HashMap<UserId, User>,
    entities: HashMap<EntityId, EntityRecord>,
}

/// In-memory store
///
/// Enforces the same uniqueness constraints as the SQL schema
/// (`external_org_id`, `slug`, `external_user_id`, the entity upsert key).
/// Cloning shares state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|e| StorageError::Lock {
            message: format!("Failed to acquire read lock: {}", e),
        })
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|e| StorageError::Lock {
            message: format!("Failed to acquire write lock: {}", e),
        })
    }

    /// Total number of entity rows, across every workspace
    pub fn entity_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.entities.len())
    }
}

fn unique(constraint: &str) -> StorageError {
    StorageError::UniqueViolation {
        constraint: constraint.to_string(),
    }
}

fn missing(what: &str, id: impl std::fmt::Display) -> StorageError {
    StorageError::Integrity {
        message: format!("{} '{}' does not exist", what, id),
    }
}

#[async_trait]
impl IdentityStore for InMemoryStore {
    async fn find_workspace_by_external(
        &self,
        external_org_id: &str,
    ) -> StoreResult<Option<Workspace>> {
        Ok(self
            .read()?
            .workspaces
            .values()
            .find(|w| w.external_org_id == external_org_id)
            .cloned())
    }

    async fn get_workspace(&self, id: WorkspaceId) -> StoreResult<Option<Workspace>> {
        Ok(self.read()?.workspaces.get(&id).cloned())
    }

    async fn insert_workspace(&self, workspace: Workspace) -> StoreResult<Workspace> {
        let mut tables = self.write()?;

        for existing in tables.workspaces.values() {
            if existing.external_org_id == workspace.external_org_id {
                return Err(unique("workspaces_external_org_id_key"));
            }
            if existing.slug == workspace.slug {
                return Err(unique("workspaces_slug_key"));
            }
        }

        tables.workspaces.insert(workspace.id, workspace.clone());
        Ok(workspace)
    }

    async fn update_workspace_name(&self, id: WorkspaceId, name: &str) -> StoreResult<()> {
        let mut tables = self.write()?;
        let workspace = tables
            .workspaces
            .get_mut(&id)
            .ok_or_else(|| missing("workspace", id))?;
        workspace.name = name.to_string();
        workspace.updated_at = Utc::now();
        Ok(())
    }

    async fn count_workspaces(&self) -> StoreResult<usize> {
        Ok(self.read()?.workspaces.len())
    }

    async fn find_user_by_external(&self, external_user_id: &str) -> StoreResult<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.external_user_id == external_user_id)
            .cloned())
    }

    async fn insert_user(&self, user: User) -> StoreResult<User> {
        let mut tables = self.write()?;

        if tables
            .users
            .values()
            .any(|u| u.external_user_id == user.external_user_id)
        {
            return Err(unique("users_external_user_id_key"));
        }

        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user_profile(&self, id: UserId, profile: &NewUser) -> StoreResult<()> {
        let mut tables = self.write()?;
        let user = tables.users.get_mut(&id).ok_or_else(|| missing("user", id))?;
        user.email = profile.email.clone();
        user.first_name = profile.first_name.clone();
        user.last_name = profile.last_name.clone();
        user.image_url = profile.image_url.clone();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_user_workspace(
        &self,
        id: UserId,
        workspace_id: WorkspaceId,
        role: Role,
    ) -> StoreResult<()> {
        let mut tables = self.write()?;
        if !tables.workspaces.contains_key(&workspace_id) {
            return Err(missing("workspace", workspace_id));
        }
        let user = tables.users.get_mut(&id).ok_or_else(|| missing("user", id))?;
        user.workspace_id = Some(workspace_id);
        user.role = role;
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn insert(&self, record: EntityRecord) -> StoreResult<EntityRecord> {
        let mut tables = self.write()?;
        if tables.entities.contains_key(&record.id) {
            return Err(unique("entities_pkey"));
        }
        if tables.entities.values().any(|r| r.same_upsert_slot(&record)) {
            return Err(unique(UPSERT_KEY_CONSTRAINT));
        }
        tables.entities.insert(record.id, record.clone());
        Ok(record)
    }

    async fn fetch(
        &self,
        workspace_id: WorkspaceId,
        id: EntityId,
    ) -> StoreResult<Option<EntityRecord>> {
        Ok(self
            .read()?
            .entities
            .get(&id)
            .filter(|r| r.workspace_id == workspace_id)
            .cloned())
    }

    async fn select(&self, query: &ScopedQuery) -> StoreResult<Vec<EntityRecord>> {
        let matched: Vec<EntityRecord> = self
            .read()?
            .entities
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        Ok(query.arrange(matched))
    }

    async fn count(&self, query: &ScopedQuery) -> StoreResult<usize> {
        Ok(self
            .read()?
            .entities
            .values()
            .filter(|r| query.matches(r))
            .count())
    }

    async fn update(
        &self,
        guard: &WriteGuard,
        record: EntityRecord,
    ) -> StoreResult<Option<EntityRecord>> {
        let mut tables = self.write()?;
        let Some(existing) = tables.entities.get(&guard.id()) else {
            return Ok(None);
        };
        if !guard.admits(existing) {
            return Ok(None);
        }

        let mut candidate = existing.clone();
        candidate.metadata = record.metadata.clone();
        if tables
            .entities
            .values()
            .any(|r| r.id != candidate.id && r.same_upsert_slot(&candidate))
        {
            return Err(unique(UPSERT_KEY_CONSTRAINT));
        }

        let Some(existing) = tables.entities.get_mut(&guard.id()) else {
            return Ok(None);
        };

        // id, workspace, owner, type and created_at are never rewritten
        existing.data = record.data;
        existing.relationships = record.relationships;
        existing.metadata = record.metadata;
        existing.updated_at = record.updated_at;
        Ok(Some(existing.clone()))
    }
}
