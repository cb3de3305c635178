//! Engine error types.

use listsync_client::ClientError;
use thiserror::Error;

use crate::types::EntityKind;

/// Error that can occur during a sync pass.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration is missing or unusable for the affected operation.
    ///
    /// Fatal to the affected kind or pass only; sibling kinds still run.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A remote list-service call failed.
    ///
    /// The wrapped error's text is preserved verbatim in the history record
    /// so operators see the service's own diagnosis.
    #[error("remote call failed: {0}")]
    RemoteCall(#[from] ClientError),

    /// An inward sync failed to persist locally.
    #[error("local write failed for {kind} {entity_id}: {message}")]
    LocalWrite {
        kind: EntityKind,
        entity_id: i64,
        message: String,
    },

    /// The history store rejected a read or append.
    #[error("history store error: {message}")]
    History {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A mapping names a local field the entity kind does not have.
    #[error("unknown field `{field}` for {kind}")]
    UnknownField { kind: EntityKind, field: String },

    /// A value could not be serialized or parsed.
    #[error("serialization error: {message}")]
    Serialization { message: String },
}

impl EngineError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        EngineError::Configuration {
            message: message.into(),
        }
    }

    /// Create a local write error.
    pub fn local_write(kind: EntityKind, entity_id: i64, message: impl Into<String>) -> Self {
        EngineError::LocalWrite {
            kind,
            entity_id,
            message: message.into(),
        }
    }

    /// Create a history store error.
    pub fn history(message: impl Into<String>) -> Self {
        EngineError::History {
            message: message.into(),
            source: None,
        }
    }

    /// Create a history store error with its underlying cause.
    pub fn history_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::History {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an unknown field error.
    pub fn unknown_field(kind: EntityKind, field: impl Into<String>) -> Self {
        EngineError::UnknownField {
            kind,
            field: field.into(),
        }
    }

    /// Check if a later scheduled run could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::RemoteCall(client) => client.is_transient(),
            EngineError::LocalWrite { .. } | EngineError::History { .. } => true,
            EngineError::Configuration { .. }
            | EngineError::UnknownField { .. }
            | EngineError::Serialization { .. } => false,
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::history_with_source("database query failed", err)
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
