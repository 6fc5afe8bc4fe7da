//! Brokerage Gateway (spec §4.1): the single seam between this core and the
//! one external options broker it talks to. Every outbound call passes
//! through a circuit breaker and one of two independent rate buckets
//! (order placement vs. reads) before reaching the underlying adapter.
//!
//! `Live` talks to the real broker; `Simulated` delegates to the in-process
//! virtual order/position books so strategies can be exercised without a
//! broker connection (spec §4.7, §9 "the simulator and the live broker
//! share a single trait so the rest of the system is mode-agnostic").

pub mod circuit_breaker;
pub mod live;
pub mod rate_limiter;
pub mod simulated;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::domain::{
    MarginSnapshot, Order, OrderAmendment, OrderRequest, PlacedOrderAck, Position,
};
use crate::errors::{CoreError, CoreResult};

use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use rate_limiter::{RateLimiter, RateLimiterConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Live,
    Simulated,
}

/// The operations every broker adapter (live or simulated) must support.
/// Kept deliberately narrow and synchronous: callers that need
/// non-blocking behaviour run the adapter on a worker thread, the same way
/// the Order Queue's consumer does (spec §4.3).
pub trait BrokerAdapter: Send + Sync {
    fn place_order(&self, request: &OrderRequest, client_request_id: &str) -> CoreResult<PlacedOrderAck>;
    fn modify_order(&self, broker_order_id: &str, amendment: &OrderAmendment) -> CoreResult<()>;
    fn cancel_order(&self, broker_order_id: &str) -> CoreResult<()>;
    fn get_orders(&self) -> CoreResult<Vec<Order>>;
    fn get_order_history(&self, broker_order_id: &str) -> CoreResult<Vec<Order>>;
    fn get_positions(&self) -> CoreResult<Vec<Position>>;
    fn get_margins(&self) -> CoreResult<MarginSnapshot>;
    fn get_order_margin(&self, request: &OrderRequest) -> CoreResult<MarginSnapshot>;
    fn get_basket_margin(&self, requests: &[OrderRequest]) -> CoreResult<MarginSnapshot>;
    /// Cancel every open order and flatten every position at the broker.
    /// Never shed by the rate limiter or short-circuited by the breaker.
    fn kill_switch(&self) -> CoreResult<()>;
}

enum CallKind {
    Write,
    Read,
}

/// Wraps a [`BrokerAdapter`] with the shared resilience policy: circuit
/// breaker trip/recovery and per-call-kind token buckets.
pub struct BrokerageGateway {
    mode: ExecutionMode,
    adapter: Arc<dyn BrokerAdapter>,
    orders_bucket: RateLimiter,
    reads_bucket: RateLimiter,
    breaker: CircuitBreaker,
}

impl BrokerageGateway {
    pub fn new(mode: ExecutionMode, adapter: Arc<dyn BrokerAdapter>) -> Self {
        Self {
            mode,
            adapter,
            orders_bucket: RateLimiter::new(RateLimiterConfig::order_placement()),
            reads_bucket: RateLimiter::new(RateLimiterConfig::reads()),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        }
    }

    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    fn guarded<T>(&self, kind: CallKind, f: impl FnOnce() -> CoreResult<T>) -> CoreResult<T> {
        if !self.breaker.is_call_permitted() {
            return Err(CoreError::BrokerUnavailable("circuit breaker open".into()));
        }
        let bucket = match kind {
            CallKind::Write => &self.orders_bucket,
            CallKind::Read => &self.reads_bucket,
        };
        if !bucket.allow() {
            return Err(CoreError::RateLimited);
        }
        match f() {
            Ok(v) => {
                self.breaker.record_success();
                Ok(v)
            }
            Err(e) => {
                if e.is_retriable() {
                    self.breaker.record_failure();
                }
                Err(e)
            }
        }
    }

    pub fn place_order(&self, request: &OrderRequest, client_request_id: &str) -> CoreResult<PlacedOrderAck> {
        self.guarded(CallKind::Write, || self.adapter.place_order(request, client_request_id))
    }

    pub fn modify_order(&self, broker_order_id: &str, amendment: &OrderAmendment) -> CoreResult<()> {
        self.guarded(CallKind::Write, || self.adapter.modify_order(broker_order_id, amendment))
    }

    pub fn cancel_order(&self, broker_order_id: &str) -> CoreResult<()> {
        self.guarded(CallKind::Write, || self.adapter.cancel_order(broker_order_id))
    }

    pub fn get_orders(&self) -> CoreResult<Vec<Order>> {
        self.guarded(CallKind::Read, || self.adapter.get_orders())
    }

    pub fn get_order_history(&self, broker_order_id: &str) -> CoreResult<Vec<Order>> {
        self.guarded(CallKind::Read, || self.adapter.get_order_history(broker_order_id))
    }

    pub fn get_positions(&self) -> CoreResult<Vec<Position>> {
        self.guarded(CallKind::Read, || self.adapter.get_positions())
    }

    pub fn get_margins(&self) -> CoreResult<MarginSnapshot> {
        self.guarded(CallKind::Read, || self.adapter.get_margins())
    }

    pub fn get_order_margin(&self, request: &OrderRequest) -> CoreResult<MarginSnapshot> {
        self.guarded(CallKind::Read, || self.adapter.get_order_margin(request))
    }

    pub fn get_basket_margin(&self, requests: &[OrderRequest]) -> CoreResult<MarginSnapshot> {
        self.guarded(CallKind::Read, || self.adapter.get_basket_margin(requests))
    }

    /// Bypasses both the breaker and the rate buckets: a kill switch call
    /// must reach the broker even while the circuit is open.
    pub fn kill_switch(&self) -> CoreResult<()> {
        match self.adapter.kill_switch() {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "kill switch call to broker failed");
                Err(e)
            }
        }
    }
}

#[allow(dead_code)]
fn default_timeout() -> Duration {
    Duration::from_secs(5)
}
