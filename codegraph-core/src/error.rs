//! Top-level error taxonomy for the engine.
//!
//! One variant per error kind from the error-handling design: invalid input,
//! transient backpressure, parse-level, storage-level, resource-degraded,
//! semantic-provider, invariant violation, and fatal startup. Subsystem
//! errors (`StorageError`, `SemanticError`, ...) convert into this via `From`
//! so callers at the RPC boundary only need to match one enum.

use std::time::Duration;

use crate::storage::StorageError;

/// Structured rejection reason for [`EngineError::Busy`], surfaced to callers
/// so they can decide whether and when to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyReason {
    NotIdle,
    QueueFull,
    MemoryLimit,
    UnsupportedTask,
}

impl BusyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BusyReason::NotIdle => "not_idle",
            BusyReason::QueueFull => "queue_full",
            BusyReason::MemoryLimit => "memory_limit",
            BusyReason::UnsupportedTask => "unsupported_task",
        }
    }
}

impl std::fmt::Display for BusyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-wide error type returned by agents, the Conductor, and the query
/// and semantic engines. Every external interface (spec.md §6) maps this
/// onto a structured JSON-RPC error.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Bad JSON-RPC, missing/invalid arguments, malformed glob, non-absolute path.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Transient backpressure: agent busy, queue full, memory high. Carries a
    /// retry hint so the caller can back off instead of hammering the engine.
    #[error("agent busy ({reason}): retry after {retry_after_ms}ms")]
    Busy {
        reason: BusyReason,
        retry_after_ms: u64,
    },

    /// Per-file parse failure; batches continue around these.
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    /// Storage-layer failure (unique-constraint collision, FK mismatch, I/O).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A subsystem is running in a degraded fallback mode (e.g. vector
    /// extension missing). Not fatal; callers should note reduced confidence.
    #[error("degraded: {0}")]
    Degraded(String),

    /// Outbound semantic-provider failure (timeout, rate limit). The circuit
    /// breaker decides whether this becomes a fallback response.
    #[error("semantic provider error: {0}")]
    Semantic(String),

    /// A mandatory invariant was violated (e.g. Conductor asked to execute
    /// work directly). Fatal for the offending task, not for the process.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Cannot open the database / find required config at startup. The only
    /// kind that should lead to process exit.
    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl EngineError {
    pub fn busy(reason: BusyReason, retry_after: Duration) -> Self {
        EngineError::Busy {
            reason,
            retry_after_ms: retry_after.as_millis() as u64,
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        EngineError::Invalid(msg.into())
    }

    pub fn semantic(msg: impl Into<String>) -> Self {
        EngineError::Semantic(msg.into())
    }

    /// Error kind as a stable string, used in structured logs and RPC error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Invalid(_) => "invalid_input",
            EngineError::Busy { .. } => "backpressure",
            EngineError::Parse { .. } => "parse_error",
            EngineError::Storage(_) => "storage_error",
            EngineError::Degraded(_) => "resource_degraded",
            EngineError::Semantic(_) => "semantic_provider",
            EngineError::Invariant(_) => "invariant_violation",
            EngineError::Fatal(_) => "fatal_startup",
        }
    }

    /// Retry hint in milliseconds, when the error kind carries one.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            EngineError::Busy { retry_after_ms, .. } => Some(*retry_after_ms),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_reason_str_round_trips_through_display() {
        for reason in [
            BusyReason::NotIdle,
            BusyReason::QueueFull,
            BusyReason::MemoryLimit,
            BusyReason::UnsupportedTask,
        ] {
            assert_eq!(reason.to_string(), reason.as_str());
        }
    }

    #[test]
    fn busy_error_carries_retry_hint() {
        let err = EngineError::busy(BusyReason::QueueFull, Duration::from_millis(250));
        assert_eq!(err.kind(), "backpressure");
        assert_eq!(err.retry_after_ms(), Some(250));
    }

    #[test]
    fn non_busy_errors_have_no_retry_hint() {
        assert_eq!(EngineError::invalid("bad").retry_after_ms(), None);
    }
}
