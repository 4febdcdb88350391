//! Maps identity-provider ids to internal workspaces and users
//!
//! Workspaces are created lazily the first time an organization id is seen.
//! Users are only created from identity events (or a membership link), never
//! from a plain lookup, so no user row is invented without profile data.

use crate::core::error::{EvergreenResult, NotFoundError, StorageError, ValidationError};
use crate::core::identity::{
    NewUser, RequestContext, Role, User, UserId, Workspace, WorkspaceId, slug_for,
};
use crate::core::store::IdentityStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An event from the identity provider's webhook feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IdentityEvent {
    #[serde(rename = "organization.created")]
    OrganizationCreated {
        id: String,
        name: String,
        #[serde(default)]
        slug: Option<String>,
    },

    #[serde(rename = "user.created")]
    UserCreated(NewUser),

    #[serde(rename = "user.updated")]
    UserUpdated(NewUser),

    #[serde(rename = "organizationMembership.created", rename_all = "camelCase")]
    MembershipCreated {
        organization_id: String,
        user_id: String,
        #[serde(default)]
        role: Option<String>,
    },
}

/// Resolver over an [`IdentityStore`]
pub struct IdentityResolver<S> {
    store: Arc<S>,
}

impl<S> Clone for IdentityResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: IdentityStore> IdentityResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Workspace id for an organization, creating the workspace if absent
    ///
    /// Concurrent first calls race on the insert; the loser sees a uniqueness
    /// violation and re-reads the winner's row.
    pub async fn resolve_workspace(
        &self,
        external_org_id: &str,
        fallback_name: &str,
    ) -> EvergreenResult<WorkspaceId> {
        if let Some(existing) = self.lookup_workspace(external_org_id).await? {
            return Ok(existing.id);
        }

        let name = if fallback_name.trim().is_empty() {
            external_org_id
        } else {
            fallback_name
        };
        self.insert_or_fetch_workspace(Workspace::new(external_org_id, name))
            .await
    }

    async fn insert_or_fetch_workspace(&self, workspace: Workspace) -> EvergreenResult<WorkspaceId> {
        let external_org_id = workspace.external_org_id.clone();
        let slug = workspace.slug.clone();
        match self.store.insert_workspace(workspace).await {
            Ok(created) => {
                tracing::info!(
                    workspace_id = %created.id,
                    external_org_id = %created.external_org_id,
                    slug = %created.slug,
                    "Created workspace"
                );
                Ok(created.id)
            }
            Err(e) if e.is_unique_violation() => {
                tracing::warn!(
                    external_org_id = %external_org_id,
                    error = %e,
                    "Workspace insert raced, re-fetching"
                );
                match self.lookup_workspace(&external_org_id).await? {
                    Some(existing) => Ok(existing.id),
                    None => Err(StorageError::Integrity {
                        message: format!("slug '{}' is taken by another organization", slug),
                    }
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Lookup that turns store failures into "not found"
    async fn lookup_workspace(&self, external_org_id: &str) -> EvergreenResult<Option<Workspace>> {
        match self.store.find_workspace_by_external(external_org_id).await {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::error!(external_org_id = %external_org_id, error = %e, "Workspace lookup failed");
                Err(NotFoundError::Workspace {
                    external_org_id: external_org_id.to_string(),
                }
                .into())
            }
        }
    }

    async fn lookup_user(&self, external_user_id: &str) -> EvergreenResult<Option<User>> {
        match self.store.find_user_by_external(external_user_id).await {
            Ok(found) => Ok(found),
            Err(e) => {
                tracing::error!(external_user_id = %external_user_id, error = %e, "User lookup failed");
                Err(NotFoundError::User {
                    external_user_id: external_user_id.to_string(),
                }
                .into())
            }
        }
    }

    /// Internal user id for an external user; never creates
    pub async fn resolve_user(&self, external_user_id: &str) -> EvergreenResult<UserId> {
        self.lookup_user(external_user_id)
            .await?
            .map(|u| u.id)
            .ok_or_else(|| {
                NotFoundError::User {
                    external_user_id: external_user_id.to_string(),
                }
                .into()
            })
    }

    /// The workspace a user is currently linked to
    pub async fn linked_workspace(&self, external_user_id: &str) -> EvergreenResult<WorkspaceId> {
        let user = self.lookup_user(external_user_id).await?.ok_or_else(|| {
            NotFoundError::User {
                external_user_id: external_user_id.to_string(),
            }
        })?;
        user.workspace_id.ok_or_else(|| {
            NotFoundError::Workspace {
                external_org_id: format!("<none linked to {}>", external_user_id),
            }
            .into()
        })
    }

    /// Resolve both ids of a request and check that they belong together
    ///
    /// The workspace must already exist and the user must be linked to it.
    pub async fn request_context(
        &self,
        external_org_id: &str,
        external_user_id: &str,
    ) -> EvergreenResult<RequestContext> {
        let workspace = self.lookup_workspace(external_org_id).await?.ok_or_else(|| {
            NotFoundError::Workspace {
                external_org_id: external_org_id.to_string(),
            }
        })?;
        let user = self.lookup_user(external_user_id).await?.ok_or_else(|| {
            NotFoundError::User {
                external_user_id: external_user_id.to_string(),
            }
        })?;

        if user.workspace_id != Some(workspace.id) {
            tracing::warn!(
                external_org_id = %external_org_id,
                external_user_id = %external_user_id,
                "User is not a member of the requested workspace"
            );
            return Err(NotFoundError::User {
                external_user_id: external_user_id.to_string(),
            }
            .into());
        }

        Ok(RequestContext {
            workspace_id: workspace.id,
            user_id: user.id,
        })
    }

    /// Point a user at a workspace, creating a minimal user if needed
    ///
    /// Idempotent: linking twice to the same workspace leaves one user row.
    pub async fn link_user_to_workspace(
        &self,
        external_user_id: &str,
        workspace_id: WorkspaceId,
        role: Role,
    ) -> EvergreenResult<UserId> {
        let user = self
            .ensure_user(NewUser::bare(external_user_id))
            .await?;

        if user.workspace_id == Some(workspace_id) && user.role == role {
            return Ok(user.id);
        }

        self.store
            .set_user_workspace(user.id, workspace_id, role)
            .await?;
        tracing::info!(
            user_id = %user.id,
            external_user_id = %external_user_id,
            workspace_id = %workspace_id,
            role = role.as_str(),
            "Linked user to workspace"
        );
        Ok(user.id)
    }

    /// Fetch a user, inserting it from `profile` when absent
    async fn ensure_user(&self, profile: NewUser) -> EvergreenResult<User> {
        if let Some(existing) = self.lookup_user(&profile.external_user_id).await? {
            return Ok(existing);
        }

        let external_user_id = profile.external_user_id.clone();
        match self.store.insert_user(User::new(profile)).await {
            Ok(created) => {
                tracing::info!(
                    user_id = %created.id,
                    external_user_id = %created.external_user_id,
                    "Created user"
                );
                Ok(created)
            }
            Err(e) if e.is_unique_violation() => {
                tracing::warn!(external_user_id = %external_user_id, "User insert raced, re-fetching");
                self.lookup_user(&external_user_id).await?.ok_or_else(|| {
                    StorageError::Integrity {
                        message: format!("user '{}' vanished after insert race", external_user_id),
                    }
                    .into()
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply one identity-provider event
    pub async fn handle_event(&self, event: IdentityEvent) -> EvergreenResult<()> {
        match event {
            IdentityEvent::OrganizationCreated { id, name, slug } => {
                if id.trim().is_empty() {
                    return Err(invalid("organization id is empty"));
                }
                match self.lookup_workspace(&id).await? {
                    Some(existing) if existing.name != name && !name.trim().is_empty() => {
                        self.store.update_workspace_name(existing.id, &name).await?;
                    }
                    Some(_) => {}
                    None => {
                        let mut workspace = Workspace::new(&id, name);
                        if let Some(slug) = slug.filter(|s| !s.trim().is_empty()) {
                            workspace.slug = slug_for(&slug);
                        }
                        self.insert_or_fetch_workspace(workspace).await?;
                    }
                }
            }
            IdentityEvent::UserCreated(profile) | IdentityEvent::UserUpdated(profile) => {
                if profile.external_user_id.trim().is_empty() {
                    return Err(invalid("user id is empty"));
                }
                let user = self.ensure_user(profile.clone()).await?;
                if user.email != profile.email
                    || user.first_name != profile.first_name
                    || user.last_name != profile.last_name
                    || user.image_url != profile.image_url
                {
                    self.store.update_user_profile(user.id, &profile).await?;
                }
            }
            IdentityEvent::MembershipCreated {
                organization_id,
                user_id,
                role,
            } => {
                if organization_id.trim().is_empty() || user_id.trim().is_empty() {
                    return Err(invalid("membership is missing an organization or user id"));
                }
                let workspace_id = self.resolve_workspace(&organization_id, &organization_id).await?;
                let role = role.as_deref().map(Role::from_provider).unwrap_or_default();
                self.link_user_to_workspace(&user_id, workspace_id, role)
                    .await?;
            }
        }
        Ok(())
    }
}

fn invalid(message: &str) -> crate::core::error::EvergreenError {
    ValidationError::InvalidEvent {
        message: message.to_string(),
    }
    .into()
}
