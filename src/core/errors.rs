// src/core/errors.rs

//! Defines the primary error type for the entire server.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the control plane.
/// The rendered messages are part of the wire contract: RPC clients classify
/// errors by inspecting the message prefix, so the strings here must not change.
#[derive(Error, Debug)]
pub enum DroverError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Permission denied")]
    PermissionDenied,

    /// Diagnostic credential error, surfaced to callers as `PermissionDenied`.
    #[error("ACL token expired")]
    TokenExpired,

    /// Diagnostic credential error, surfaced to callers as `PermissionDenied`.
    #[error("ACL token is invalid: {0}")]
    TokenInvalid(String),

    /// Diagnostic credential error, surfaced to callers as `PermissionDenied`.
    #[error("ACL token not found")]
    TokenNotFound,

    #[error("No cluster leader")]
    NoLeader,

    #[error("not found")]
    NotFound,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A malformed or unevaluable filter expression in query options.
    #[error("Invalid filter expression: {0}")]
    InvalidFilter(String),

    /// A precondition failed, e.g. an occupied node pool or a uniqueness violation.
    #[error("{0}")]
    Conflict(String),

    /// A workload identity references an allocation that no longer exists.
    #[error("allocation does not exist")]
    AllocNotFound,

    /// A workload identity references an allocation that has stopped.
    #[error("allocation is terminal")]
    AllocTerminal,

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// An operation against a reserved object, e.g. the built-in node pools.
    /// The message ends in "not allowed"; clients match on that.
    #[error("{0}")]
    NotAllowed(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    /// Raft-layer failure; callers see it as a generic RPC error.
    #[error("rpc error: raft apply failed: {0}")]
    RaftApply(String),

    #[error("Snapshot Error: {0}")]
    Snapshot(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for DroverError {
    fn clone(&self) -> Self {
        match self {
            DroverError::Io(e) => DroverError::Io(Arc::clone(e)),
            DroverError::PermissionDenied => DroverError::PermissionDenied,
            DroverError::TokenExpired => DroverError::TokenExpired,
            DroverError::TokenInvalid(s) => DroverError::TokenInvalid(s.clone()),
            DroverError::TokenNotFound => DroverError::TokenNotFound,
            DroverError::NoLeader => DroverError::NoLeader,
            DroverError::NotFound => DroverError::NotFound,
            DroverError::InvalidRequest(s) => DroverError::InvalidRequest(s.clone()),
            DroverError::InvalidFilter(s) => DroverError::InvalidFilter(s.clone()),
            DroverError::Conflict(s) => DroverError::Conflict(s.clone()),
            DroverError::AllocNotFound => DroverError::AllocNotFound,
            DroverError::AllocTerminal => DroverError::AllocTerminal,
            DroverError::UnknownNode(s) => DroverError::UnknownNode(s.clone()),
            DroverError::NotAllowed(s) => DroverError::NotAllowed(s.clone()),
            DroverError::Rpc(s) => DroverError::Rpc(s.clone()),
            DroverError::RaftApply(s) => DroverError::RaftApply(s.clone()),
            DroverError::Snapshot(s) => DroverError::Snapshot(s.clone()),
            DroverError::Internal(s) => DroverError::Internal(s.clone()),
        }
    }
}

impl PartialEq for DroverError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DroverError::Io(e1), DroverError::Io(e2)) => e1.to_string() == e2.to_string(),
            (DroverError::TokenInvalid(s1), DroverError::TokenInvalid(s2)) => s1 == s2,
            (DroverError::InvalidRequest(s1), DroverError::InvalidRequest(s2)) => s1 == s2,
            (DroverError::InvalidFilter(s1), DroverError::InvalidFilter(s2)) => s1 == s2,
            (DroverError::Conflict(s1), DroverError::Conflict(s2)) => s1 == s2,
            (DroverError::UnknownNode(s1), DroverError::UnknownNode(s2)) => s1 == s2,
            (DroverError::NotAllowed(s1), DroverError::NotAllowed(s2)) => s1 == s2,
            (DroverError::Rpc(s1), DroverError::Rpc(s2)) => s1 == s2,
            (DroverError::RaftApply(s1), DroverError::RaftApply(s2)) => s1 == s2,
            (DroverError::Snapshot(s1), DroverError::Snapshot(s2)) => s1 == s2,
            (DroverError::Internal(s1), DroverError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

impl DroverError {
    /// Collapses credential diagnostics into the externally visible error.
    /// The diagnostic variant is preserved for logs and tests; everything that
    /// leaves the auth module becomes a plain permission denial.
    pub fn external(self) -> DroverError {
        match self {
            DroverError::TokenExpired
            | DroverError::TokenInvalid(_)
            | DroverError::TokenNotFound => DroverError::PermissionDenied,
            other => other,
        }
    }

    /// True for transient errors the caller should retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DroverError::NoLeader)
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for DroverError {
    fn from(e: std::io::Error) -> Self {
        DroverError::Io(Arc::new(e))
    }
}

impl From<uuid::Error> for DroverError {
    fn from(e: uuid::Error) -> Self {
        DroverError::TokenInvalid(e.to_string())
    }
}

impl From<serde_json::Error> for DroverError {
    fn from(e: serde_json::Error) -> Self {
        DroverError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}

impl From<bincode::error::EncodeError> for DroverError {
    fn from(e: bincode::error::EncodeError) -> Self {
        DroverError::Internal(format!("encode error: {e}"))
    }
}

impl From<bincode::error::DecodeError> for DroverError {
    fn from(e: bincode::error::DecodeError) -> Self {
        DroverError::Internal(format!("decode error: {e}"))
    }
}
