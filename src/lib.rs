//! # Evergreen Store
//!
//! Multi-tenant entity store with per-user and per-workspace isolation.
//!
//! ## Features
//!
//! - **Polymorphic Entities**: Every domain object is an [`EntityRecord`](core::EntityRecord)
//!   tagged with a type and carrying a JSON payload
//! - **Workspace Isolation**: Every read and write is scoped to one workspace
//! - **User Isolation**: User-scoped types (email, calendar, messages) are only
//!   reachable through a [`SecureQuery`](core::SecureQuery) bound to the owner
//! - **Identity Resolution**: Identity-provider organizations and users map to
//!   internal workspaces and users, created on first sight
//! - **Pluggable Storage**: In-memory and PostgreSQL backends
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use evergreen::prelude::*;
//!
//! let store = Arc::new(InMemoryStore::new());
//! let resolver = IdentityResolver::new(store.clone());
//! let entities = EntityService::with_builtin_types(store);
//!
//! let workspace = resolver.resolve_workspace("org_123", "Acme").await?;
//! let user = resolver.link_user_to_workspace("user_1", workspace, Role::Member).await?;
//!
//! entities
//!     .create(workspace, "email", json!({ "subject": "Hi" }), None, CreateContext::owned_by(user))
//!     .await?;
//!
//! let inbox = entities
//!     .find(FindOptions::new(workspace, "email").for_user(user))
//!     .await?;
//! ```

pub mod config;
pub mod core;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core Types ===
    pub use crate::core::{
        entity::{Edge, EntityRecord, Lifecycle, Relationships},
        error::{EvergreenError, EvergreenResult},
        identity::{EntityId, RequestContext, Role, User, UserId, Workspace, WorkspaceId},
        query::{Condition, Direction, Field, OrderBy, SortKey},
        schema::{FieldKind, Scope, TypeDefinition, TypeRegistry},
        secure_query::{SecureQuery, SecurityContext},
    };

    // === Services ===
    pub use crate::core::{
        identity_resolver::{IdentityEvent, IdentityResolver},
        service::{
            CreateContext, DataPatch, EntityService, EntityUpdate, FindOptions, MatchCriteria,
            UpdateContext,
        },
        store::{EntityStore, IdentityStore},
    };

    // === Storage ===
    pub use crate::storage::InMemoryStore;
    #[cfg(feature = "postgres")]
    pub use crate::storage::PostgresStore;

    // === Config ===
    pub use crate::config::{Backend, EntityTypesConfig, StoreConfig};

    // === External dependencies ===
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
