//! Persistence traits
//!
//! Backends implement [`IdentityStore`] for workspaces and users and
//! [`EntityStore`] for entity rows. Both are agnostic to how rows are kept;
//! scoping decisions are made above them and arrive as [`ScopedQuery`] /
//! [`WriteGuard`] values.

use crate::core::entity::EntityRecord;
use crate::core::error::StorageError;
use crate::core::identity::{EntityId, NewUser, Role, User, UserId, Workspace, WorkspaceId};
use crate::core::query::{ScopedQuery, WriteGuard};
use async_trait::async_trait;

/// Result type for raw store calls
pub type StoreResult<T> = Result<T, StorageError>;

/// Storage of workspaces and users
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find a workspace by its external organization id
    async fn find_workspace_by_external(&self, external_org_id: &str)
    -> StoreResult<Option<Workspace>>;

    /// Find a workspace by internal id
    async fn get_workspace(&self, id: WorkspaceId) -> StoreResult<Option<Workspace>>;

    /// Insert a workspace
    ///
    /// Must fail with [`StorageError::UniqueViolation`] when the external id
    /// or the slug is already taken.
    async fn insert_workspace(&self, workspace: Workspace) -> StoreResult<Workspace>;

    /// Rename a workspace
    async fn update_workspace_name(&self, id: WorkspaceId, name: &str) -> StoreResult<()>;

    /// Number of workspaces
    async fn count_workspaces(&self) -> StoreResult<usize>;

    /// Find a user by its external user id
    async fn find_user_by_external(&self, external_user_id: &str) -> StoreResult<Option<User>>;

    /// Insert a user
    ///
    /// Must fail with [`StorageError::UniqueViolation`] when the external id
    /// is already taken.
    async fn insert_user(&self, user: User) -> StoreResult<User>;

    /// Overwrite profile fields of an existing user
    async fn update_user_profile(&self, id: UserId, profile: &NewUser) -> StoreResult<()>;

    /// Point a user at a workspace with the given role
    async fn set_user_workspace(
        &self,
        id: UserId,
        workspace_id: WorkspaceId,
        role: Role,
    ) -> StoreResult<()>;
}

/// Unique constraint over `(workspace, type, owner, metadata.upsertKey)`
pub const UPSERT_KEY_CONSTRAINT: &str = "entities_upsert_key_idx";

/// Storage of entity rows
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Insert a new entity
    ///
    /// Must fail with [`StorageError::UniqueViolation`] naming
    /// [`UPSERT_KEY_CONSTRAINT`] when a row of the same workspace, type and
    /// owner already carries the record's upsert key.
    async fn insert(&self, record: EntityRecord) -> StoreResult<EntityRecord>;

    /// Fetch by primary key inside one workspace
    async fn fetch(&self, workspace_id: WorkspaceId, id: EntityId)
    -> StoreResult<Option<EntityRecord>>;

    /// Run a scoped query
    ///
    /// Implementations must apply the scope (workspace, type and, when
    /// present, owner) in addition to the query's conditions.
    async fn select(&self, query: &ScopedQuery) -> StoreResult<Vec<EntityRecord>>;

    /// Count rows matching a scoped query, ignoring limit and offset
    async fn count(&self, query: &ScopedQuery) -> StoreResult<usize>;

    /// Replace the mutable columns of one row
    ///
    /// Only the row admitted by `guard` may change. Returns `None` if no such
    /// row exists.
    async fn update(
        &self,
        guard: &WriteGuard,
        record: EntityRecord,
    ) -> StoreResult<Option<EntityRecord>>;
}
