//! Order Store: the process-local canonical record of every order this
//! process has placed, keyed by the client request id assigned at
//! admission time (spec §3's `client_request_id`). Feeds the Timeout
//! Monitor's active-order scan (spec §4.6) and gives broker push updates
//! (spec §4.5) a record to apply against, independent of whether the
//! broker's own order list happens to be reachable or complete at that
//! moment.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::domain::{BrokerOrderUpdate, Order, OrderEvent};
use crate::update_handler::UpdateHandler;

pub struct OrderStore {
    orders: Mutex<HashMap<String, Order>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self { orders: Mutex::new(HashMap::new()) }
    }

    /// Inserts or replaces the record for `order.client_request_id`.
    pub fn upsert(&self, order: Order) {
        self.orders.lock().insert(order.client_request_id.clone(), order);
    }

    pub fn get(&self, client_request_id: &str) -> Option<Order> {
        self.orders.lock().get(client_request_id).cloned()
    }

    /// Every order not yet in a terminal state, for the Timeout Monitor's
    /// scan loop.
    pub fn active_orders(&self) -> Vec<Order> {
        self.orders.lock().values().filter(|o| o.is_active()).cloned().collect()
    }

    /// Applies a broker push `update` to whichever order carries a
    /// matching `broker_order_id`, via `handler`, persisting the mutated
    /// order back into the store. Returns the event `handler` produced, if
    /// any (no match and no-op updates both yield `None`).
    pub fn apply_update(&self, handler: &UpdateHandler, update: BrokerOrderUpdate) -> Option<OrderEvent> {
        let mut orders = self.orders.lock();
        let order = orders.values_mut().find(|o| o.broker_order_id.as_deref() == Some(update.broker_order_id.as_str()))?;
        handler.apply(order, update)
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}
