//! The engine-wide error taxonomy.
//!
//! Every fallible operation returns [`Result`]. Only [`Error::Io`] during a
//! WAL write and [`Error::Recovery`] during startup are fatal; everything
//! else is transactional and recoverable by retrying or aborting.

use thiserror::Error;

/// Which constraint a [`Error::ConstraintViolation`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// An existence constraint (label requires property).
    Existence,
    /// A unique constraint (label + property set must be unique).
    Unique,
}

impl std::fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstraintKind::Existence => write!(f, "existence"),
            ConstraintKind::Unique => write!(f, "unique"),
        }
    }
}

/// All the ways a storage operation can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// A concurrent transaction modified the same object; the caller should
    /// retry the whole transaction.
    #[error("cannot serialize due to concurrent operations; retry the transaction")]
    Serialization,

    /// A constraint was violated at commit time.
    #[error("{kind} constraint violated on :{label}({})", properties.join(", "))]
    ConstraintViolation {
        /// Which constraint family failed.
        kind: ConstraintKind,
        /// The constrained label name.
        label: String,
        /// The constrained property names.
        properties: Vec<String>,
    },

    /// A plain delete was attempted on a vertex that still has edges.
    #[error("vertex has incident edges; use detach delete to remove it")]
    VertexHasEdges,

    /// A property value exceeds the configured size cap.
    #[error("property value too large")]
    PropertyValueTooLarge,

    /// The referenced object does not exist or is not visible.
    #[error("object not found")]
    NotFound,

    /// Edge property access with `properties_on_edges` disabled.
    #[error("edge properties are disabled in this storage")]
    PropertiesDisabled,

    /// The transaction already committed or aborted.
    #[error("transaction is not active")]
    TransactionNotActive,

    /// An I/O failure talking to the data directory.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Startup could not reconstruct a consistent state from disk.
    #[error("recovery failed: {0}")]
    Recovery(String),

    /// An invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An opaque replication failure surfaced through commit.
    #[error("replication error: {0}")]
    Replication(String),
}

impl Error {
    /// Stable machine-readable identifier for this error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Error::Serialization => "SERIALIZATION_ERROR",
            Error::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Error::VertexHasEdges => "VERTEX_HAS_EDGES",
            Error::PropertyValueTooLarge => "PROPERTY_VALUE_TOO_LARGE",
            Error::NotFound => "NOT_FOUND",
            Error::PropertiesDisabled => "PROPERTIES_DISABLED",
            Error::TransactionNotActive => "TRANSACTION_NOT_ACTIVE",
            Error::Io(_) => "IO_ERROR",
            Error::Recovery(_) => "RECOVERY_FAILURE",
            Error::Config(_) => "CONFIG_ERROR",
            Error::Replication(_) => "REPLICATION_ERROR",
        }
    }
}

/// Convenience alias used across all Quiver crates.
pub type Result<T> = std::result::Result<T, Error>;
