//! Margin Service (SPEC_FULL.md §4.12 supplement): a short-TTL cache in
//! front of `BrokerageGateway::get_margins()`, since every risk check that
//! wants a margin snapshot in the same few seconds shouldn't each spend a
//! read-bucket token on the broker. `MarginEstimator` wraps the per-order
//! and per-basket margin calls uncached, since those are keyed by the
//! specific order set being priced and a stale answer would be actively
//! wrong.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::{MarginSnapshot, OrderRequest};
use crate::errors::CoreResult;
use crate::gateway::BrokerageGateway;

pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

struct Cached {
    snapshot: MarginSnapshot,
    fetched_at: Instant,
}

/// Caches the account-level margin snapshot for `ttl`. Shares the
/// Gateway's read-rate bucket and circuit breaker for the underlying call.
pub struct MarginService {
    gateway: Arc<BrokerageGateway>,
    ttl: Duration,
    cached: Mutex<Option<Cached>>,
}

impl MarginService {
    pub fn new(gateway: Arc<BrokerageGateway>) -> Self {
        Self::with_ttl(gateway, DEFAULT_TTL)
    }

    pub fn with_ttl(gateway: Arc<BrokerageGateway>, ttl: Duration) -> Self {
        Self { gateway, ttl, cached: Mutex::new(None) }
    }

    /// Returns the cached snapshot if still fresh, otherwise fetches a new
    /// one from the gateway and caches it.
    pub fn get(&self) -> CoreResult<MarginSnapshot> {
        {
            let cached = self.cached.lock();
            if let Some(entry) = cached.as_ref() {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.snapshot);
                }
            }
        }

        let snapshot = self.gateway.get_margins()?;
        *self.cached.lock() = Some(Cached { snapshot, fetched_at: Instant::now() });
        Ok(snapshot)
    }

    /// Drops the cached value, forcing the next `get()` to hit the broker.
    pub fn invalidate(&self) {
        *self.cached.lock() = None;
    }
}

/// Prices a hypothetical order or basket against the broker's margin
/// engine. Never cached: callers ask this immediately before placing the
/// exact order they priced.
pub struct MarginEstimator {
    gateway: Arc<BrokerageGateway>,
}

impl MarginEstimator {
    pub fn new(gateway: Arc<BrokerageGateway>) -> Self {
        Self { gateway }
    }

    pub fn estimate_order(&self, request: &OrderRequest) -> CoreResult<MarginSnapshot> {
        self.gateway.get_order_margin(request)
    }

    pub fn estimate_basket(&self, requests: &[OrderRequest]) -> CoreResult<MarginSnapshot> {
        self.gateway.get_basket_margin(requests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ExecutionMode;
    use crate::gateway::simulated::{SimulatedBroker, SimulatedBrokerConfig};

    fn gateway() -> Arc<BrokerageGateway> {
        let broker = SimulatedBroker::new(SimulatedBrokerConfig::default());
        Arc::new(BrokerageGateway::new(ExecutionMode::Simulated, Arc::new(broker)))
    }

    #[test]
    fn caches_within_the_ttl_window() {
        let service = MarginService::with_ttl(gateway(), Duration::from_millis(50));
        let first = service.get().unwrap();
        let second = service.get().unwrap();
        assert_eq!(first.required, second.required);
    }

    #[test]
    fn invalidate_forces_a_refetch() {
        let service = MarginService::with_ttl(gateway(), Duration::from_secs(60));
        service.get().unwrap();
        service.invalidate();
        assert!(service.cached.lock().is_none());
    }

    #[test]
    fn estimator_prices_a_basket_uncached() {
        let estimator = MarginEstimator::new(gateway());
        let request = OrderRequest {
            instrument_token: 1,
            trading_symbol: "NIFTY24JUL24000CE".into(),
            exchange: "NFO".into(),
            side: crate::domain::Side::Buy,
            order_type: crate::domain::OrderType::Market,
            product: crate::domain::Product("MIS".into()),
            quantity: rust_decimal_macros::dec!(75),
            limit_price: None,
            trigger_price: None,
            strategy_id: None,
            correlation_id: None,
        };
        let snapshot = estimator.estimate_basket(std::slice::from_ref(&request)).unwrap();
        assert!(snapshot.required >= rust_decimal::Decimal::ZERO);
    }
}
