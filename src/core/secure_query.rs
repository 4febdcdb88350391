//! Owner-scoped queries for user-private entity types
//!
//! A [`SecureQuery`] is built from a fixed `(workspace, user, type)` triple and
//! is the only way to obtain a [`ScopedQuery`] that reads user-scoped records.
//! Every query it produces filters on all three values; extra conditions are
//! appended after them and may not name any of the three columns.
//!
//! `verify_result` and `filter_results` are the backstops for records that
//! reached the caller some other way (a fetch by id, a bulk job).

use crate::core::entity::EntityRecord;
use crate::core::error::{EvergreenResult, IsolationViolation, ValidationError};
use crate::core::identity::{UserId, WorkspaceId};
use crate::core::query::{Condition, ScopedQuery, WriteGuard};

/// The immutable `(workspace, user, type)` triple of a request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecurityContext {
    workspace_id: WorkspaceId,
    user_id: UserId,
    entity_type: String,
}

impl SecurityContext {
    pub fn new(workspace_id: WorkspaceId, user_id: UserId, entity_type: impl Into<String>) -> Self {
        Self {
            workspace_id,
            user_id,
            entity_type: entity_type.into(),
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        self.workspace_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }
}

/// Result of [`SecureQuery::filter_results`]
#[derive(Debug, Clone, PartialEq)]
pub struct Filtered {
    pub records: Vec<EntityRecord>,
    /// How many records were dropped for a foreign owner, workspace or type
    pub discarded: usize,
}

/// Query builder bound to one security context
#[derive(Debug, Clone)]
pub struct SecureQuery {
    context: SecurityContext,
}

impl SecureQuery {
    pub fn new(context: SecurityContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &SecurityContext {
        &self.context
    }

    /// All entities of the context's type owned by the context's user
    pub fn base_query(&self) -> ScopedQuery {
        ScopedQuery::new(
            self.context.workspace_id,
            self.context.entity_type.clone(),
            Some(self.context.user_id),
        )
    }

    /// The base query narrowed by extra conditions
    ///
    /// Conditions on `workspace_id`, `user_id` or `type` are rejected.
    pub fn where_(
        &self,
        conditions: impl IntoIterator<Item = Condition>,
    ) -> EvergreenResult<ScopedQuery> {
        let conditions: Vec<Condition> = conditions.into_iter().collect();
        if let Some(column) = conditions.iter().find_map(|c| c.field.reserved_column()) {
            return Err(ValidationError::ReservedField {
                field: column.name().to_string(),
            }
            .into());
        }
        Ok(self.base_query().with_conditions(conditions))
    }

    /// Guard for writing the given record under this context
    pub(crate) fn write_guard(&self, record: &EntityRecord) -> WriteGuard {
        WriteGuard::new(record.id, self.context.workspace_id, Some(self.context.user_id))
    }

    /// Confirm a single record belongs to this context
    ///
    /// Fails with an isolation violation iff the workspace or the owner
    /// differ; the failure is logged as a security event. An owned record of
    /// another type is a caller mistake and fails validation instead.
    pub fn verify_result(&self, record: &EntityRecord) -> EvergreenResult<()> {
        if !self.owns(record) {
            let violation = IsolationViolation {
                entity_id: record.id,
                entity_type: record.entity_type.clone(),
                expected_workspace: self.context.workspace_id,
                actual_workspace: record.workspace_id,
                expected_user: self.context.user_id,
                actual_user: record.user_id,
            };
            tracing::error!(
                security_event = true,
                entity_id = %record.id,
                entity_type = %record.entity_type,
                expected_workspace = %self.context.workspace_id,
                actual_workspace = %record.workspace_id,
                expected_user = %self.context.user_id,
                actual_user = ?record.user_id,
                "Isolation violation: record does not belong to the requesting context"
            );
            return Err(violation.into());
        }

        if record.entity_type != self.context.entity_type {
            return Err(ValidationError::TypeMismatch {
                expected: self.context.entity_type.clone(),
                actual: record.entity_type.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Drop every record that fails the ownership check
    pub fn filter_results(&self, records: Vec<EntityRecord>) -> Filtered {
        let total = records.len();
        let records: Vec<EntityRecord> = records
            .into_iter()
            .filter(|r| self.owns(r) && r.entity_type == self.context.entity_type)
            .collect();
        let discarded = total - records.len();

        if discarded > 0 {
            tracing::warn!(
                security_event = true,
                discarded,
                workspace_id = %self.context.workspace_id,
                user_id = %self.context.user_id,
                entity_type = %self.context.entity_type,
                "Filtered records outside the security context"
            );
        }

        Filtered { records, discarded }
    }

    fn owns(&self, record: &EntityRecord) -> bool {
        record.workspace_id == self.context.workspace_id
            && record.user_id == Some(self.context.user_id)
    }
}
