//! Tenant and user records, and the typed ids that key them

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

typed_id!(
    /// Internal primary key of a workspace (tenant)
    WorkspaceId
);
typed_id!(
    /// Internal primary key of a user
    UserId
);
typed_id!(
    /// Primary key of an entity row
    EntityId
);

/// Role of a user inside their workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Member,
}

impl Role {
    /// Parse an identity-provider role string
    ///
    /// Providers prefix roles (`org:admin`), so only the last segment counts.
    pub fn from_provider(role: &str) -> Self {
        let name = role.rsplit(':').next().unwrap_or(role);
        if name.eq_ignore_ascii_case("admin") {
            Role::Admin
        } else {
            Role::Member
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// A tenant: one organization's data partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workspace {
    pub id: WorkspaceId,
    pub external_org_id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    /// Build a new workspace for an external organization
    ///
    /// The slug is derived from the external id, so two workspaces can only
    /// collide on slug if their organization ids differ only by case or
    /// punctuation.
    pub fn new(external_org_id: impl Into<String>, name: impl Into<String>) -> Self {
        let external_org_id = external_org_id.into();
        let now = Utc::now();
        Self {
            id: WorkspaceId::new(),
            slug: slug_for(&external_org_id),
            external_org_id,
            name: name.into(),
            settings: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A person inside (at most) one workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub external_user_id: String,
    pub email: String,
    /// None until a membership event links the user to an organization
    pub workspace_id: Option<WorkspaceId>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub settings: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(profile: NewUser) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            external_user_id: profile.external_user_id,
            email: profile.email,
            workspace_id: None,
            first_name: profile.first_name,
            last_name: profile.last_name,
            image_url: profile.image_url,
            role: Role::Member,
            settings: Map::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// "First Last", falling back to the email address
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|p| !p.is_empty())
            .collect();
        if parts.is_empty() {
            self.email.clone()
        } else {
            parts.join(" ")
        }
    }
}

/// Profile fields known about a user when it is created or updated
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub external_user_id: String,
    #[serde(default)]
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub image_url: Option<String>,
}

impl NewUser {
    /// Minimal identity: only the external id is known
    pub fn bare(external_user_id: impl Into<String>) -> Self {
        Self {
            external_user_id: external_user_id.into(),
            ..Default::default()
        }
    }
}

/// Resolved internal ids for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub workspace_id: WorkspaceId,
    pub user_id: UserId,
}

static SLUG_REGEX: OnceLock<Regex> = OnceLock::new();

/// Derive a workspace slug from an external organization id
///
/// Lowercases and replaces every character outside `[a-z0-9]` with `-`.
pub fn slug_for(external_org_id: &str) -> String {
    let regex = SLUG_REGEX.get_or_init(|| Regex::new(r"[^a-z0-9]").expect("static slug regex"));
    regex
        .replace_all(&external_org_id.to_lowercase(), "-")
        .into_owned()
}
