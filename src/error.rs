//! Error types for the weighting engine.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// The fixed request-level timeout elapsed.
    #[error("persistence call timed out after {0}s")]
    Timeout(u64),

    #[error("persistence query failed: {0}")]
    Query(String),

    /// Opening, committing or rolling back a transactional scope failed.
    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl StoreError {
    /// Failures after which the open scope can no longer be trusted.
    pub fn is_structural(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Transaction(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::PoolTimedOut => StoreError::Timeout(0),
            other => StoreError::Query(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Machine-readable error category carried in response payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    LinkageConflict,
    NotFound,
    Persistence,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::LinkageConflict => "linkage_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Persistence => "persistence",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::Validation | ErrorKind::LinkageConflict => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Persistence => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("weight {candidate} exceeds the target by {excess}; remaining capacity is {remaining}")]
    CapacityExceeded {
        candidate: f64,
        excess: f64,
        remaining: f64,
    },

    #[error("batch would leave the weights at {hypothetical} instead of {target}")]
    SumMismatch { hypothetical: f64, target: f64 },

    #[error("component {component_id} has {} linked activities: {}", .names.len(), .names.join(", "))]
    LinkageConflict { component_id: Uuid, names: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_)
            | EngineError::CapacityExceeded { .. }
            | EngineError::SumMismatch { .. } => ErrorKind::Validation,
            EngineError::LinkageConflict { .. } => ErrorKind::LinkageConflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Persistence(StoreError::NotFound(_)) => ErrorKind::NotFound,
            EngineError::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    pub fn blocking_activities(&self) -> &[String] {
        match self {
            EngineError::LinkageConflict { names, .. } => names,
            _ => &[],
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
