//! Engine error types

use linewise_shared::LineError;
use thiserror::Error;

/// Why a mutation was refused because of the current state of other entities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The agent already holds a CALLED or IN_SERVICE ticket
    AgentAlreadyActive,
    /// The target queue belongs to another tenant
    CrossTenantTransfer,
    /// The target queue is the ticket's current queue
    SameQueueTransfer,
    /// The queue reached its configured capacity
    QueueFull,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentAlreadyActive => "agent_already_active",
            Self::CrossTenantTransfer => "cross_tenant_transfer",
            Self::SameQueueTransfer => "same_queue_transfer",
            Self::QueueFull => "queue_full",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::AgentAlreadyActive => "agent already holds an active ticket",
            Self::CrossTenantTransfer => "target queue belongs to another tenant",
            Self::SameQueueTransfer => "ticket is already in the target queue",
            Self::QueueFull => "queue is at maximum capacity",
        };
        f.write_str(message)
    }
}

/// Queue engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// HTTP status a collaborator should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Database(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(ConflictKind::AgentAlreadyActive) => "AGENT_ALREADY_ACTIVE",
            Self::Conflict(ConflictKind::CrossTenantTransfer) => "CROSS_TENANT_TRANSFER",
            Self::Conflict(ConflictKind::SameQueueTransfer) => "SAME_QUEUE_TRANSFER",
            Self::Conflict(ConflictKind::QueueFull) => "QUEUE_FULL",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_conflict(&self, kind: ConflictKind) -> bool {
        matches!(self, Self::Conflict(k) if *k == kind)
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // PostgreSQL unique violation on the one-active-ticket-per-agent index
                if db_err.code().as_deref() == Some("23505")
                    && db_err.constraint() == Some("idx_tickets_one_active_per_agent")
                {
                    return EngineError::Conflict(ConflictKind::AgentAlreadyActive);
                }
                EngineError::Database(db_err.to_string())
            }
            _ => EngineError::Database(err.to_string()),
        }
    }
}

impl From<LineError> for EngineError {
    fn from(err: LineError) -> Self {
        match err {
            LineError::Validation(msg) => EngineError::Validation(msg),
            LineError::Conflict(msg) | LineError::Internal(msg) => EngineError::Internal(msg),
            LineError::NotFound(msg) => EngineError::NotFound(msg),
        }
    }
}

impl From<EngineError> for LineError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => LineError::Validation(msg),
            EngineError::Conflict(kind) => LineError::Conflict(kind.to_string()),
            EngineError::NotFound(msg) => LineError::NotFound(msg),
            EngineError::Database(msg) | EngineError::Internal(msg) => LineError::Internal(msg),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
