use std::time::Duration;

/// Errors returned by the rollout evaluator, the pod locator and the mutation helpers.
///
/// Every variant is terminal for the call that produced it. A rollout that is still in
/// progress is reported as a not-done [`crate::Progress`], never as an error.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    /// Kind outside the registry allow-list; retrying will not help.
    #[error("no {capability} has been implemented for {group_kind}")]
    NotImplemented { capability: &'static str, group_kind: String },

    /// Requested revision differs from the one currently rolling out.
    #[error("{kind} {name:?}: desired revision ({desired}) is different from the running revision ({running})")]
    RevisionMismatch { kind: &'static str, name: String, desired: i64, running: i64 },

    /// Strategy without a defined progress signal.
    #[error("{kind} {name:?}: rollout status is only available for {expected} strategy type (got {actual})")]
    UnsupportedStrategy { kind: &'static str, name: String, expected: &'static str, actual: String },

    /// Malformed or unexpected object shape.
    #[error("failed to convert object to {target}: {reason}")]
    TypeConversion { target: &'static str, reason: String },

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("invalid service {name:?}: Service is defined without a selector")]
    EmptyServiceSelector { name: String },

    #[error("invalid resource quantity {value:?} for {resource}")]
    InvalidQuantity { resource: String, value: String },

    #[error("timed out after {timeout:?} waiting for a pod matching {selector:?} in namespace {namespace:?}")]
    Timeout { namespace: String, selector: String, timeout: Duration },

    #[error("cancelled while waiting for a pod matching {selector:?} in namespace {namespace:?}")]
    Cancelled { namespace: String, selector: String },

    /// The pod change feed failed or closed before a pod showed up.
    #[error("watch for pods matching {selector:?} ended: {reason}")]
    Watch { selector: String, reason: String },

    /// The pod source could not list or watch.
    #[error("pod query failed: {0}")]
    Query(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl RolloutError {
    pub fn conversion(target: &'static str, reason: impl ToString) -> Self {
        RolloutError::TypeConversion { target, reason: reason.to_string() }
    }

    pub fn query(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        RolloutError::Query(err.into())
    }

    /// Whether the caller may retry with fresh input (new target revision or a new time bound).
    pub fn is_retryable(&self) -> bool {
        matches!(self, RolloutError::RevisionMismatch { .. } | RolloutError::Timeout { .. } | RolloutError::Query(_))
    }
}

pub type Result<T, E = RolloutError> = std::result::Result<T, E>;
