//! The execution core's typed error taxonomy.
//!
//! Every component boundary (Gateway, Router, Amendment FSM, Subscription
//! Manager, Session Coordinator, Fill Tracker) returns one of these variants
//! rather than propagating an opaque transport error. Failures inside the
//! Gateway's transport layer are wrapped into [`CoreError::BrokerUnavailable`];
//! failures in business invariants (duplicate orders, illegal amendments,
//! capacity exhaustion) are surfaced as distinct variants without a wrapped
//! cause, since they are not retriable by definition.

use std::fmt;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum CoreError {
    /// The broker transport is unreachable or returned something we cannot
    /// interpret. Retriable by the gateway's own retry policy.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// The broker rejected the operation with a semantic reason. Surfaced
    /// verbatim to the caller.
    #[error("broker rejected: {0}")]
    BrokerRejected(String),

    /// The current access token has expired; a single-flight re-auth has
    /// been kicked off, but this attempt still fails.
    #[error("session expired")]
    SessionExpired,

    /// Shed by the gateway's rate bucket before the call reached the broker.
    #[error("rate limited")]
    RateLimited,

    /// Router or amendment-machine rejection on a malformed request.
    #[error("validation failed on {field}: {reason}")]
    ValidationFailure { field: String, reason: String },

    /// Router reject: an identical request was already admitted inside the
    /// dedup window. Never retried automatically.
    #[error("duplicate order detected within deduplication window")]
    IdempotencyDuplicate,

    /// The Subscription Manager could not free enough room even after
    /// evicting every evictable entry.
    #[error("capacity exhausted: cannot subscribe {requested} more (active {active}, cap {cap})")]
    CapacityExhausted {
        requested: usize,
        active: usize,
        cap: usize,
    },

    /// A registered fill await was not satisfied before its expiry timer.
    #[error("fill timeout for correlation id {0}")]
    FillTimeout(String),

    /// A registered fill await observed a REJECTED order update instead of
    /// a fill.
    #[error("fill rejected for correlation id {0}: {1}")]
    FillRejected(String, String),

    /// Kill switch is active and this order's priority is not KILL_SWITCH.
    #[error("kill switch active")]
    KillSwitchActive,

    /// An illegal amendment-state transition was attempted.
    #[error("illegal amendment transition: {0}")]
    AmendmentTransition(String),
}

impl CoreError {
    /// True for errors the caller may sensibly retry (as opposed to
    /// business-invariant rejections which never change outcome on retry).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            CoreError::BrokerUnavailable(_) | CoreError::RateLimited
        )
    }
}

/// Amendment state machine transition error — kept distinct from
/// [`CoreError`] so the state machine's own tests can match on it precisely;
/// callers crossing the module boundary see it wrapped in
/// [`CoreError::AmendmentTransition`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmendmentError {
    #[error("order status {0:?} cannot accept an amendment request")]
    InvalidOrderStatus(crate::domain::OrderStatus),
    #[error("an amendment is already in flight ({0:?})")]
    AlreadyInFlight(crate::domain::AmendmentStatus),
    #[error("no fields provided to amend")]
    NoFieldsProvided,
    #[error("amended quantity {new} must exceed filled quantity {filled}")]
    QuantityBelowFilled {
        new: rust_decimal::Decimal,
        filled: rust_decimal::Decimal,
    },
    #[error("amended value must be positive, got {0}")]
    NonPositiveValue(rust_decimal::Decimal),
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: crate::domain::AmendmentStatus,
        to: crate::domain::AmendmentStatus,
    },
}

impl From<AmendmentError> for CoreError {
    fn from(e: AmendmentError) -> Self {
        CoreError::AmendmentTransition(e.to_string())
    }
}

/// Decision record emitted by the Router for every admission and rejection
/// (spec §4.2 step 6, §7 "every admission and rejection emits a decision
/// record with the correlation id").
#[derive(Debug, Clone)]
pub struct DecisionRecord {
    pub correlation_id: Option<String>,
    pub outcome: DecisionOutcome,
}

#[derive(Debug, Clone)]
pub enum DecisionOutcome {
    Accepted { order_id: String },
    Rejected { reason: String },
}

impl fmt::Display for DecisionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            DecisionOutcome::Accepted { order_id } => {
                write!(f, "accepted order_id={order_id}")
            }
            DecisionOutcome::Rejected { reason } => {
                write!(f, "rejected reason={reason}")
            }
        }?;
        if let Some(cid) = &self.correlation_id {
            write!(f, " correlation_id={cid}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_unavailable_is_retriable() {
        assert!(CoreError::BrokerUnavailable("timeout".into()).is_retriable());
        assert!(CoreError::RateLimited.is_retriable());
    }

    #[test]
    fn business_rejections_are_not_retriable() {
        assert!(!CoreError::IdempotencyDuplicate.is_retriable());
        assert!(!CoreError::KillSwitchActive.is_retriable());
        assert!(!CoreError::ValidationFailure {
            field: "quantity".into(),
            reason: "must be positive".into()
        }
        .is_retriable());
    }

    #[test]
    fn amendment_error_wraps_into_core_error() {
        let e = AmendmentError::NoFieldsProvided;
        let core: CoreError = e.into();
        matches!(core, CoreError::AmendmentTransition(_));
    }

    #[test]
    fn decision_record_display() {
        let d = DecisionRecord {
            correlation_id: Some("corr-1".into()),
            outcome: DecisionOutcome::Rejected {
                reason: "duplicate".into(),
            },
        };
        let s = d.to_string();
        assert!(s.contains("rejected"));
        assert!(s.contains("corr-1"));
    }
}
