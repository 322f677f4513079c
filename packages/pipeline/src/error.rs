//! Typed errors for the pipeline core.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so every failure a
//! stage can hit maps to exactly one class with a known retry policy.
//! Workers classify at the boundary; nothing is swallowed unclassified.

use thiserror::Error;

/// Every failure class label, in declaration order. Circuit breakers
/// scan these when checking whether any breaker is open.
pub const ERROR_CLASSES: [&str; 7] = [
    "validation",
    "configuration",
    "resource",
    "network",
    "throttling",
    "data",
    "authentication",
];

/// Failure classes for stage execution.
///
/// The class decides retry behavior and is recorded verbatim on the
/// task audit row, so it doubles as the circuit-breaker scope key.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Bad input shape; retrying cannot help.
    #[error("validation error: {0}")]
    Validation(String),

    /// Missing credentials or broken wiring; fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Transient store/provider unavailability.
    #[error("resource error: {0}")]
    Resource(String),

    /// Timeouts, resets, connection failures.
    #[error("network error: {0}")]
    Network(String),

    /// Provider rate limit; retry with a longer backoff.
    #[error("throttled: {0}")]
    Throttling(String),

    /// Corrupt or unsupported document; routed to the failed terminal
    /// state for human review.
    #[error("data error: {0}")]
    Data(String),

    /// Rejected credentials; fatal.
    #[error("authentication error: {0}")]
    Authentication(String),
}

impl PipelineError {
    /// Whether this class should be requeued with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Resource(_) | PipelineError::Network(_) | PipelineError::Throttling(_)
        )
    }

    /// Throttling gets a longer backoff than other retryable classes.
    pub fn backoff_multiplier(&self) -> u32 {
        match self {
            PipelineError::Throttling(_) => 4,
            _ => 1,
        }
    }

    /// Stable class label recorded on audit rows and used to scope
    /// circuit breakers.
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Configuration(_) => "configuration",
            PipelineError::Resource(_) => "resource",
            PipelineError::Network(_) => "network",
            PipelineError::Throttling(_) => "throttling",
            PipelineError::Data(_) => "data",
            PipelineError::Authentication(_) => "authentication",
        }
    }
}

/// Classification of an error for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub class: &'static str,
    pub retryable: bool,
    pub backoff_multiplier: u32,
}

/// Classify an `anyhow::Error` raised by a stage handler.
///
/// Typed `PipelineError`s classify exactly. Anything else falls back to
/// string heuristics: provider SDK errors reach us as opaque messages,
/// and defaulting to retryable keeps transient blips from killing
/// documents.
pub fn classify(error: &anyhow::Error) -> Classified {
    if let Some(e) = error.downcast_ref::<PipelineError>() {
        return Classified {
            class: e.class(),
            retryable: e.is_retryable(),
            backoff_multiplier: e.backoff_multiplier(),
        };
    }

    if error.downcast_ref::<sqlx::Error>().is_some() {
        return Classified {
            class: "resource",
            retryable: true,
            backoff_multiplier: 1,
        };
    }

    let message = error.to_string().to_lowercase();

    if message.contains("not found")
        || message.contains("invalid")
        || message.contains("unsupported")
        || message.contains("parse")
        || message.contains("deserialize")
    {
        return Classified {
            class: "validation",
            retryable: false,
            backoff_multiplier: 1,
        };
    }

    if message.contains("unauthorized")
        || message.contains("forbidden")
        || message.contains("permission denied")
    {
        return Classified {
            class: "authentication",
            retryable: false,
            backoff_multiplier: 1,
        };
    }

    if message.contains("rate limit") || message.contains("too many requests") {
        return Classified {
            class: "throttling",
            retryable: true,
            backoff_multiplier: 4,
        };
    }

    // Everything else is assumed transient (network errors, timeouts, etc.)
    Classified {
        class: "network",
        retryable: true,
        backoff_multiplier: 1,
    }
}
