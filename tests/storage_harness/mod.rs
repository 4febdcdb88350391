//! Shared test harness for storage backend testing
//!
//! Provides a tenant fixture (one workspace with two linked users) and the
//! `entity_store_tests!` macro that runs the isolation suite against any store.
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! #[macro_use]
//! mod storage_harness;
//! use storage_harness::*;
//! ```

#![allow(dead_code)]

#[macro_use]
mod entity_store_tests;

use evergreen::core::identity::{NewUser, Role, UserId, WorkspaceId};
use evergreen::core::identity_resolver::{IdentityEvent, IdentityResolver};
use evergreen::core::service::EntityService;
use evergreen::core::store::{EntityStore, IdentityStore};
use std::sync::Arc;

/// One workspace with two members
pub struct Tenant {
    pub workspace: WorkspaceId,
    pub alice: UserId,
    pub bob: UserId,
}

/// Resolver and entity service over the same store
pub struct Harness<S> {
    pub store: Arc<S>,
    pub resolver: IdentityResolver<S>,
    pub entities: EntityService<S>,
}

impl<S: EntityStore + IdentityStore> Harness<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            resolver: IdentityResolver::new(Arc::clone(&store)),
            entities: EntityService::with_builtin_types(Arc::clone(&store)),
            store,
        }
    }

    /// Workspace for `org_id` with users `<org_id>_alice` and `<org_id>_bob`
    pub async fn tenant(&self, org_id: &str) -> Tenant {
        let workspace = self
            .resolver
            .resolve_workspace(org_id, org_id)
            .await
            .expect("workspace");

        let mut members = Vec::new();
        for name in ["alice", "bob"] {
            let external = format!("{}_{}", org_id, name);
            let profile = NewUser {
                email: format!("{}@{}.test", name, org_id),
                ..NewUser::bare(&external)
            };
            self.resolver
                .handle_event(IdentityEvent::UserCreated(profile))
                .await
                .expect("user created");
            let id = self
                .resolver
                .link_user_to_workspace(&external, workspace, Role::Member)
                .await
                .expect("membership");
            members.push(id);
        }

        Tenant {
            workspace,
            alice: members[0],
            bob: members[1],
        }
    }
}

/// Org id unique to one test run, so backends shared across tests don't collide
pub fn unique_org(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

pub fn assert_count<T>(list: &[T], expected: usize) {
    assert_eq!(
        list.len(),
        expected,
        "Expected {} items, got {}",
        expected,
        list.len()
    );
}
