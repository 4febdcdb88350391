//! Entity type registry
//!
//! Each `type` string maps to a [`TypeDefinition`] that states who may see its
//! records ([`Scope`]) and which payload fields it requires. The registry is
//! closed: writing or querying an unregistered type is a validation error,
//! so an unknown user-scoped type can never slip through as shared data.

use crate::core::error::{FieldValidationError, ValidationError};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Visibility of an entity type inside its workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Private to the owning user (email, calendar events, accounts)
    User,
    /// Visible to every member of the workspace (deals, companies)
    Workspace,
}

/// Expected JSON kind of a payload field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Email,
    Number,
    Bool,
    Object,
    Array,
    Any,
}

impl FieldKind {
    fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match self {
            FieldKind::String => value.is_string(),
            FieldKind::Email => {
                return match value.as_str() {
                    Some(s) if is_valid_email(s) => Ok(()),
                    Some(_) => Err("invalid email address".to_string()),
                    None => Err("expected string".to_string()),
                };
            }
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Object => value.is_object(),
            FieldKind::Array => value.is_array(),
            FieldKind::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {}", self.name()))
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String | FieldKind::Email => "string",
            FieldKind::Number => "number",
            FieldKind::Bool => "boolean",
            FieldKind::Object => "object",
            FieldKind::Array => "array",
            FieldKind::Any => "any value",
        }
    }
}

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

fn is_valid_email(email: &str) -> bool {
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static email regex")
    });
    regex.is_match(email)
}

/// A required payload field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: FieldKind,
}

fn default_kind() -> FieldKind {
    FieldKind::Any
}

impl FieldRule {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Schema of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    pub scope: Scope,
    #[serde(default)]
    pub required: Vec<FieldRule>,
}

impl TypeDefinition {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Scope::User,
            required: Vec::new(),
        }
    }

    pub fn shared(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Scope::Workspace,
            required: Vec::new(),
        }
    }

    pub fn require(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.required.push(FieldRule::new(field, kind));
        self
    }

    pub fn is_user_scoped(&self) -> bool {
        self.scope == Scope::User
    }

    /// Check a payload against this definition, collecting every failure
    pub fn validate(&self, data: &Value) -> Result<(), ValidationError> {
        let Some(obj) = data.as_object() else {
            return Err(ValidationError::NotAnObject {
                entity_type: self.name.clone(),
            });
        };

        let errors: Vec<FieldValidationError> = self
            .required
            .iter()
            .filter_map(|rule| {
                let message = match obj.get(&rule.name) {
                    None | Some(Value::Null) => "is required".to_string(),
                    Some(value) => rule.kind.check(value).err()?,
                };
                Some(FieldValidationError {
                    field: rule.name.clone(),
                    message,
                })
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::FieldErrors(errors))
        }
    }
}

/// Registry of known entity types, in registration order
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: IndexMap<String, TypeDefinition>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The types used across the CRM, mail, calendar and chat modules
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for def in [
            TypeDefinition::user("email"),
            TypeDefinition::user("email_account").require("email", FieldKind::Email),
            TypeDefinition::user("calendar_event"),
            TypeDefinition::user("calendar_account").require("email", FieldKind::Email),
            TypeDefinition::user("calendar_settings"),
            TypeDefinition::user("conversation"),
            TypeDefinition::user("message"),
            TypeDefinition::shared("contact"),
            TypeDefinition::shared("deal"),
            TypeDefinition::shared("company"),
            TypeDefinition::shared("task"),
            TypeDefinition::shared("integration"),
            TypeDefinition::shared("invitation").require("email", FieldKind::Email),
        ] {
            registry.register(def);
        }
        registry
    }

    /// Add or replace a definition
    pub fn register(&mut self, definition: TypeDefinition) -> &mut Self {
        self.types.insert(definition.name.clone(), definition);
        self
    }

    pub fn get(&self, entity_type: &str) -> Option<&TypeDefinition> {
        self.types.get(entity_type)
    }

    /// Look up a type, failing for unregistered names
    pub fn definition(&self, entity_type: &str) -> Result<&TypeDefinition, ValidationError> {
        self.get(entity_type)
            .ok_or_else(|| ValidationError::UnknownType {
                entity_type: entity_type.to_string(),
            })
    }

    pub fn is_user_scoped(&self, entity_type: &str) -> Result<bool, ValidationError> {
        Ok(self.definition(entity_type)?.is_user_scoped())
    }

    pub fn validate(&self, entity_type: &str, data: &Value) -> Result<(), ValidationError> {
        self.definition(entity_type)?.validate(data)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
