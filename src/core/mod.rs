//! Core types and services of the entity store

pub mod entity;
pub mod error;
pub mod identity;
pub mod identity_resolver;
pub mod query;
pub mod schema;
pub mod secure_query;
pub mod service;
pub mod store;

pub use entity::{Edge, EntityRecord, Lifecycle, Relationships};
pub use error::{EvergreenError, EvergreenResult};
pub use identity::{EntityId, RequestContext, Role, User, UserId, Workspace, WorkspaceId};
pub use identity_resolver::{IdentityEvent, IdentityResolver};
pub use query::{Condition, Direction, Field, OrderBy, ScopedQuery, SortKey, WriteGuard};
pub use schema::{Scope, TypeDefinition, TypeRegistry};
pub use secure_query::{Filtered, SecureQuery, SecurityContext};
pub use service::{EntityService, EntityUpdate, FindOptions, MatchCriteria, Unverified};
pub use store::{EntityStore, IdentityStore};
