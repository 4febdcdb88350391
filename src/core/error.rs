//! Typed error handling for the entity store
//!
//! Every fallible operation returns [`EvergreenResult`]. Errors are split into
//! categories so that call sites can tell a recoverable "no such row" apart
//! from a security defect:
//!
//! - [`NotFoundError`]: workspace, user or entity absent. The only category
//!   callers are expected to handle gracefully.
//! - [`ValidationError`]: the caller broke the contract (unknown type, missing
//!   owner, malformed payload).
//! - [`IsolationViolation`]: a record's owner does not match the requesting
//!   context. Always fatal.
//! - [`StorageError`]: the backend failed.
//! - [`ConfigError`]: configuration could not be loaded.
//!
//! # Example
//!
//! ```rust,ignore
//! match service.find_by_id(workspace_id, id).await {
//!     Ok(found) => { /* ... */ }
//!     Err(e) if e.is_not_found() => { /* render empty state */ }
//!     Err(e) => return Err(e),
//! }
//! ```

use crate::core::identity::{EntityId, UserId, WorkspaceId};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// The main error type for the entity store
#[derive(Debug, thiserror::Error)]
pub enum EvergreenError {
    /// A workspace, user or entity does not exist
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// The caller supplied invalid input
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A record does not belong to the requesting context
    #[error(transparent)]
    IsolationViolation(#[from] IsolationViolation),

    /// Storage backend errors
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Error response structure for HTTP responses
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EvergreenError {
    /// True for the recoverable "absent" category
    pub fn is_not_found(&self) -> bool {
        matches!(self, EvergreenError::NotFound(_))
    }

    /// True when a record crossed a workspace or user boundary
    pub fn is_isolation_violation(&self) -> bool {
        matches!(self, EvergreenError::IsolationViolation(_))
    }

    /// True for caller contract violations
    pub fn is_validation(&self) -> bool {
        matches!(self, EvergreenError::Validation(_))
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            EvergreenError::NotFound(_) => StatusCode::NOT_FOUND,
            EvergreenError::Validation(_) => StatusCode::BAD_REQUEST,
            EvergreenError::IsolationViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EvergreenError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EvergreenError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            EvergreenError::NotFound(e) => e.error_code(),
            EvergreenError::Validation(e) => e.error_code(),
            EvergreenError::IsolationViolation(_) => "ISOLATION_VIOLATION",
            EvergreenError::Storage(_) => "STORAGE_ERROR",
            EvergreenError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Convert to an error response
    ///
    /// Isolation violations and storage failures are reported generically;
    /// their details stay in the logs.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            EvergreenError::IsolationViolation(_) | EvergreenError::Storage(_) => {
                "Something went wrong".to_string()
            }
            other => other.to_string(),
        };

        ErrorResponse {
            code: self.error_code().to_string(),
            message,
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            EvergreenError::Validation(ValidationError::FieldErrors(errors)) => {
                Some(serde_json::json!({ "fields": errors }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for EvergreenError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

// =============================================================================
// Not Found
// =============================================================================

/// A keyed lookup found nothing
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NotFoundError {
    #[error("workspace for organization '{external_org_id}' not found")]
    Workspace { external_org_id: String },

    #[error("workspace '{id}' not found")]
    WorkspaceId { id: WorkspaceId },

    #[error("user '{external_user_id}' not found")]
    User { external_user_id: String },

    #[error("entity '{id}' not found")]
    Entity { id: EntityId },

    #[error("no {entity_type} matched the given criteria")]
    NoMatch { entity_type: String },
}

impl NotFoundError {
    pub fn error_code(&self) -> &'static str {
        match self {
            NotFoundError::Workspace { .. } | NotFoundError::WorkspaceId { .. } => {
                "WORKSPACE_NOT_FOUND"
            }
            NotFoundError::User { .. } => "USER_NOT_FOUND",
            NotFoundError::Entity { .. } | NotFoundError::NoMatch { .. } => "ENTITY_NOT_FOUND",
        }
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Errors related to caller input
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// The entity type is not registered
    #[error("unknown entity type '{entity_type}'")]
    UnknownType { entity_type: String },

    /// A user-scoped type was written or queried without an owning user
    #[error("entity type '{entity_type}' is user-scoped and requires a user id")]
    MissingOwner { entity_type: String },

    /// The payload of an entity must be a JSON object
    #[error("payload of '{entity_type}' must be a JSON object")]
    NotAnObject { entity_type: String },

    /// One or more payload fields failed validation
    #[error("validation errors: {}", format_field_errors(.0))]
    FieldErrors(Vec<FieldValidationError>),

    /// A query condition tried to constrain a field owned by the security context
    #[error("'{field}' is fixed by the security context and cannot be filtered on")]
    ReservedField { field: String },

    /// A user-scoped record was fetched by id and must be verified before use
    #[error("'{entity_type}' records must be verified against an owner before use")]
    OwnerVerificationRequired { entity_type: String },

    /// An identity event carried unusable data
    #[error("invalid identity event: {message}")]
    InvalidEvent { message: String },

    /// A record of one type was checked against a query for another
    #[error("expected a '{expected}' record, got '{actual}'")]
    TypeMismatch { expected: String, actual: String },
}

impl ValidationError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ValidationError::UnknownType { .. } => "UNKNOWN_ENTITY_TYPE",
            ValidationError::MissingOwner { .. } => "MISSING_OWNER",
            ValidationError::NotAnObject { .. } => "INVALID_PAYLOAD",
            ValidationError::FieldErrors(_) => "VALIDATION_ERROR",
            ValidationError::ReservedField { .. } => "RESERVED_FIELD",
            ValidationError::OwnerVerificationRequired { .. } => "OWNER_VERIFICATION_REQUIRED",
            ValidationError::InvalidEvent { .. } => "INVALID_EVENT",
            ValidationError::TypeMismatch { .. } => "TYPE_MISMATCH",
        }
    }
}

/// A single field validation error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

fn format_field_errors(errors: &[FieldValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

// =============================================================================
// Isolation
// =============================================================================

/// A record's workspace or owner does not match the requesting context
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "isolation violation on {entity_type} '{entity_id}': expected workspace {expected_workspace} / user {expected_user}, found workspace {actual_workspace} / user {}",
    .actual_user.map(|u| u.to_string()).unwrap_or_else(|| "<none>".to_string())
)]
pub struct IsolationViolation {
    pub entity_id: EntityId,
    pub entity_type: String,
    pub expected_workspace: WorkspaceId,
    pub actual_workspace: WorkspaceId,
    pub expected_user: UserId,
    pub actual_user: Option<UserId>,
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Errors related to storage backends
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// An insert hit a uniqueness constraint
    #[error("unique constraint '{constraint}' violated")]
    UniqueViolation { constraint: String },

    /// Query or connection failure
    #[error("{backend} error: {message}")]
    Backend { backend: String, message: String },

    /// Data integrity error
    #[error("data integrity error: {message}")]
    Integrity { message: String },

    /// Lock poisoning in the in-memory backend
    #[error("failed to acquire lock: {message}")]
    Lock { message: String },
}

impl StorageError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StorageError::UniqueViolation { .. })
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse config{}: {message}", .file.as_ref().map(|f| format!(" file '{}'", f)).unwrap_or_default())]
    ParseError {
        file: Option<String>,
        message: String,
    },

    #[error("invalid value '{value}' for '{field}': {message}")]
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    #[error("IO error: {message}")]
    IoError { message: String },
}

// =============================================================================
// Conversions from external errors
// =============================================================================

impl From<serde_yaml::Error> for EvergreenError {
    fn from(err: serde_yaml::Error) -> Self {
        EvergreenError::Config(ConfigError::ParseError {
            file: None,
            message: err.to_string(),
        })
    }
}

impl From<std::io::Error> for EvergreenError {
    fn from(err: std::io::Error) -> Self {
        EvergreenError::Config(ConfigError::IoError {
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Integrity {
            message: format!("stored JSON could not be decoded: {}", err),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err
            && db.is_unique_violation()
        {
            return StorageError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            };
        }
        StorageError::Backend {
            backend: "PostgreSQL".to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for EvergreenError {
    fn from(err: sqlx::Error) -> Self {
        EvergreenError::Storage(err.into())
    }
}

// =============================================================================
// Result type alias
// =============================================================================

/// A specialized Result type for entity store operations
pub type EvergreenResult<T> = Result<T, EvergreenError>;
