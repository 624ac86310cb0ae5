//! Error types for registry operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The kind of entity a lookup or uniqueness check failed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Service,
    List,
    Document,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Service => write!(f, "service"),
            EntityKind::List => write!(f, "list"),
            EntityKind::Document => write!(f, "document"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: EntityKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: EntityKind, name: String },

    #[error("'{id}' is already a member of list '{list}'")]
    AlreadyMember { list: String, id: String },

    #[error("'{id}' is not a member of list '{list}'")]
    NotAMember { list: String, id: String },

    #[error("listen port {port} is already bound by service '{service}'")]
    PortConflict { port: u16, service: String },

    #[error("invalid {field}: {value} (expected 1-65535)")]
    InvalidPort { field: &'static str, value: u32 },

    #[error("role violation: {0}")]
    RoleViolation(String),

    #[error("list '{list}' is still referenced by service '{service}'")]
    ListInUse { list: String, service: String },

    #[error("service '{service}' has no access list to restrict by; name one explicitly")]
    NoAccessList { service: String },

    #[error("{0} does not exist; run setup first")]
    NotInitialized(PathBuf),

    #[error("unable to access {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed document {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} was modified by another writer; re-run the command")]
    ConcurrentModification(PathBuf),

    #[error("{tool} failed: {detail}")]
    ExternalTool { tool: String, detail: String },
}

impl RegistryError {
    pub fn service_not_found(name: impl Into<String>) -> Self {
        RegistryError::NotFound {
            kind: EntityKind::Service,
            name: name.into(),
        }
    }

    pub fn list_not_found(name: impl Into<String>) -> Self {
        RegistryError::NotFound {
            kind: EntityKind::List,
            name: name.into(),
        }
    }

    /// Membership no-ops that tolerant callers log and move past.
    pub fn is_membership_noop(&self) -> bool {
        matches!(
            self,
            RegistryError::AlreadyMember { .. } | RegistryError::NotAMember { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
