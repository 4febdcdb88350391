//! Configuration loading and management

use crate::core::error::{ConfigError, EvergreenResult};
use crate::core::schema::{FieldRule, Scope, TypeDefinition, TypeRegistry};
use serde::{Deserialize, Serialize};

/// Configuration for one entity type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeConfig {
    /// Type tag stored in the `type` column (e.g., "email", "deal")
    pub name: String,

    /// Who can see records of this type
    pub scope: Scope,

    /// Required payload fields
    #[serde(default)]
    pub required: Vec<FieldRule>,
}

impl From<TypeConfig> for TypeDefinition {
    fn from(config: TypeConfig) -> Self {
        TypeDefinition {
            name: config.name,
            scope: config.scope,
            required: config.required,
        }
    }
}

/// Entity types declared on top of the built-in registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityTypesConfig {
    #[serde(default)]
    pub types: Vec<TypeConfig>,
}

impl EntityTypesConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> EvergreenResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                file: Some(path.to_string()),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> EvergreenResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Built-in types with these declarations applied on top
    ///
    /// A declared type with a built-in name replaces the built-in definition.
    pub fn into_registry(self) -> TypeRegistry {
        let mut registry = TypeRegistry::builtin();
        for config in self.types {
            registry.register(config.into());
        }
        registry
    }
}

/// Which storage backend to run against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    InMemory,
    Postgres,
}

/// Runtime configuration of the store and the identity webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,

    /// Connection URL, required for the postgres backend
    pub database_url: Option<String>,

    pub max_connections: u32,

    /// Address the identity webhook binds to
    pub bind_addr: String,

    /// Optional YAML file with extra entity types
    pub entity_types: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: Backend::InMemory,
            database_url: None,
            max_connections: 10,
            bind_addr: "127.0.0.1:3000".to_string(),
            entity_types: None,
        }
    }
}

pub const ENV_DATABASE_URL: &str = "EVERGREEN_DATABASE_URL";
pub const ENV_BIND_ADDR: &str = "EVERGREEN_BIND_ADDR";

impl StoreConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> EvergreenResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                file: Some(path.to_string()),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> EvergreenResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Override fields from the process environment
    ///
    /// A database URL in the environment selects the postgres backend.
    pub fn apply_env(self) -> Self {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.database_url = Some(url);
            self.backend = Backend::Postgres;
        }
        if let Some(addr) = lookup(ENV_BIND_ADDR) {
            self.bind_addr = addr;
        }
        self
    }

    /// Reject combinations that cannot start
    pub fn validate(&self) -> EvergreenResult<()> {
        if self.backend == Backend::Postgres && self.database_url.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "database_url".to_string(),
                value: String::new(),
                message: "required for the postgres backend".to_string(),
            }
            .into());
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                value: "0".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Build the type registry, loading `entity_types` when set
    pub fn type_registry(&self) -> EvergreenResult<TypeRegistry> {
        match &self.entity_types {
            Some(path) => Ok(EntityTypesConfig::from_yaml_file(path)?.into_registry()),
            None => Ok(TypeRegistry::builtin()),
        }
    }
}
