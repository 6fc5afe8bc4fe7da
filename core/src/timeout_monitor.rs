//! Timeout Monitor (spec §4.6): scans open orders every 5 seconds and
//! cancels anything that has outlived its order-type-specific deadline —
//! MARKET orders get 10 seconds to fill, LIMIT orders 30 seconds, and
//! SL/SL_M orders are allowed to rest until the market closes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::clock::Calendar;
use crate::domain::{Order, OrderType};
use crate::gateway::BrokerageGateway;

pub const SCAN_INTERVAL: Duration = Duration::from_secs(5);
pub const MARKET_ORDER_TIMEOUT: Duration = Duration::from_secs(10);
pub const LIMIT_ORDER_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TimeoutMonitor {
    calendar: Calendar,
}

impl TimeoutMonitor {
    pub fn new(calendar: Calendar) -> Self {
        Self { calendar }
    }

    /// Returns the broker order ids that should be cancelled at `now`.
    pub fn scan<'a>(&self, now: DateTime<Utc>, orders: impl IntoIterator<Item = &'a Order>) -> Vec<String> {
        orders
            .into_iter()
            .filter(|o| o.is_active())
            .filter_map(|o| {
                let broker_id = o.broker_order_id.as_ref()?;
                let placed_at = o.placed_at?;
                let age = now - placed_at;

                let timed_out = match o.request.order_type {
                    OrderType::Market => age.num_milliseconds() > MARKET_ORDER_TIMEOUT.as_millis() as i64,
                    OrderType::Limit => age.num_milliseconds() > LIMIT_ORDER_TIMEOUT.as_millis() as i64,
                    OrderType::Sl | OrderType::SlM => self.calendar.minutes_to_close(now) <= 0,
                };

                timed_out.then(|| broker_id.clone())
            })
            .collect()
    }

    /// Runs the 5-second scan loop until `shutdown` resolves. `active_orders`
    /// is polled fresh on every tick so the monitor never holds a stale
    /// snapshot of the order book.
    pub async fn run<F>(&self, gateway: Arc<BrokerageGateway>, active_orders: F, mut shutdown: tokio::sync::watch::Receiver<bool>)
    where
        F: Fn() -> Vec<Order>,
    {
        let mut ticker = tokio::time::interval(SCAN_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let orders = active_orders();
                    let stale = self.scan(Utc::now(), orders.iter());
                    for broker_order_id in stale {
                        match gateway.cancel_order(&broker_order_id) {
                            Ok(()) => info!(broker_order_id, "timeout monitor cancelled stale order"),
                            Err(e) => warn!(broker_order_id, error = %e, "timeout monitor failed to cancel order"),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("timeout monitor shutting down");
                        return;
                    }
                }
            }
        }
    }
}
