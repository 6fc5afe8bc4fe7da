//! Virtual Order Book (spec §4.7): matches resting simulated orders against
//! incoming ticks using the same order-type semantics the live broker would
//! apply, minus real exchange microstructure. MARKET and triggered SL_M
//! orders fill at the tick's last price, adjusted by a slippage allowance in
//! basis points; LIMIT and SL orders fill only once the tick price crosses
//! their limit favorably.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::{
    AmendmentStatus, Order, OrderAmendment, OrderId, OrderRequest, OrderStatus, OrderType, Side,
};
use crate::errors::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct SimulatedFill {
    pub broker_order_id: String,
    pub instrument_token: u64,
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone)]
struct RestingOrder {
    request: OrderRequest,
    status: OrderStatus,
    /// SL/SL_M orders sit as TRIGGER_PENDING until the trigger price is
    /// crossed, then behave like LIMIT/MARKET respectively.
    triggered: bool,
    filled_quantity: Decimal,
    avg_fill_price: Option<Decimal>,
}

pub struct VirtualOrderBook {
    slippage_bps: Decimal,
    next_id: AtomicU64,
    orders: Mutex<HashMap<String, RestingOrder>>,
    last_price: Mutex<HashMap<u64, Decimal>>,
}

impl VirtualOrderBook {
    pub fn new(slippage_bps: Decimal) -> Self {
        Self {
            slippage_bps,
            next_id: AtomicU64::new(1),
            orders: Mutex::new(HashMap::new()),
            last_price: Mutex::new(HashMap::new()),
        }
    }

    /// Places `request`. MARKET orders fill or reject synchronously against
    /// the last known tick price for their instrument (spec §4.7: a MARKET
    /// order is never left resting); every other order type rests until a
    /// matching tick arrives via [`Self::on_tick`]. Returns the resulting
    /// fill alongside the broker order id when one was produced at
    /// placement time.
    pub fn place(&self, request: &OrderRequest) -> CoreResult<(String, Option<SimulatedFill>)> {
        let id = format!("SIM-{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        if request.order_type == OrderType::Market {
            let last_price = self.last_price.lock().get(&request.instrument_token).copied();
            let last_price = last_price.ok_or_else(|| {
                CoreError::BrokerRejected(format!(
                    "no known price for instrument {}, cannot fill MARKET order",
                    request.instrument_token
                ))
            })?;
            let price = self.apply_slippage(request.side, last_price);
            self.orders.lock().insert(
                id.clone(),
                RestingOrder {
                    request: request.clone(),
                    status: OrderStatus::Complete,
                    triggered: false,
                    filled_quantity: request.quantity,
                    avg_fill_price: Some(price),
                },
            );
            let fill = SimulatedFill {
                broker_order_id: id.clone(),
                instrument_token: request.instrument_token,
                side: request.side,
                quantity: request.quantity,
                price,
            };
            return Ok((id, Some(fill)));
        }

        let status = if request.order_type.requires_trigger_price() {
            OrderStatus::TriggerPending
        } else {
            OrderStatus::Open
        };
        self.orders.lock().insert(
            id.clone(),
            RestingOrder {
                request: request.clone(),
                status,
                triggered: false,
                filled_quantity: Decimal::ZERO,
                avg_fill_price: None,
            },
        );
        Ok((id, None))
    }

    pub fn cancel(&self, broker_order_id: &str) -> CoreResult<()> {
        let mut orders = self.orders.lock();
        match orders.get_mut(broker_order_id) {
            Some(o) if !o.status.is_terminal() => {
                o.status = OrderStatus::Cancelled;
                Ok(())
            }
            Some(_) => Err(CoreError::BrokerRejected("order already terminal".into())),
            None => Err(CoreError::BrokerRejected(format!("unknown order {broker_order_id}"))),
        }
    }

    pub fn modify(&self, broker_order_id: &str, amendment: &OrderAmendment) -> CoreResult<()> {
        let mut orders = self.orders.lock();
        let o = orders
            .get_mut(broker_order_id)
            .ok_or_else(|| CoreError::BrokerRejected(format!("unknown order {broker_order_id}")))?;
        if o.status.is_terminal() {
            return Err(CoreError::BrokerRejected("cannot amend a terminal order".into()));
        }
        if let Some(qty) = amendment.quantity {
            o.request.quantity = qty;
        }
        if let Some(price) = amendment.limit_price {
            o.request.limit_price = Some(price);
        }
        if let Some(trigger) = amendment.trigger_price {
            o.request.trigger_price = Some(trigger);
        }
        Ok(())
    }

    /// Scans resting orders for `instrument_token` against the new tick
    /// price, returning every fill produced by this tick. Partial fills are
    /// not modeled for the simulator: a matched order fills in full (spec
    /// Non-goals: "partial-fill simulation is out of scope").
    pub fn on_tick(&self, instrument_token: u64, last_price: Decimal) -> Vec<SimulatedFill> {
        self.last_price.lock().insert(instrument_token, last_price);

        let mut fills = Vec::new();
        let mut orders = self.orders.lock();
        for (id, order) in orders.iter_mut() {
            if order.request.instrument_token != instrument_token {
                continue;
            }
            if order.status.is_terminal() {
                continue;
            }

            if order.status == OrderStatus::TriggerPending {
                let trigger = order.request.trigger_price.expect("SL/SL_M always carries a trigger price");
                let crossed = match order.request.side {
                    Side::Buy => last_price >= trigger,
                    Side::Sell => last_price <= trigger,
                };
                if !crossed {
                    continue;
                }
                order.triggered = true;
                order.status = OrderStatus::Open;
            }

            let fill_price = match order.request.order_type {
                // MARKET orders never rest: place() fills or rejects them
                // synchronously at placement time.
                OrderType::Market => None,
                OrderType::SlM => Some(self.apply_slippage(order.request.side, last_price)),
                OrderType::Limit | OrderType::Sl => {
                    let limit = order.request.limit_price.expect("LIMIT/SL always carries a limit price");
                    let crosses = match order.request.side {
                        Side::Buy => last_price <= limit,
                        Side::Sell => last_price >= limit,
                    };
                    crosses.then_some(limit)
                }
            };

            if let Some(price) = fill_price {
                order.status = OrderStatus::Complete;
                order.filled_quantity = order.request.quantity;
                order.avg_fill_price = Some(price);
                fills.push(SimulatedFill {
                    broker_order_id: id.clone(),
                    instrument_token,
                    side: order.request.side,
                    quantity: order.request.quantity,
                    price,
                });
            }
        }
        fills
    }

    fn apply_slippage(&self, side: Side, price: Decimal) -> Decimal {
        let adj = price * self.slippage_bps / Decimal::from(10_000);
        match side {
            Side::Buy => price + adj,
            Side::Sell => price - adj,
        }
    }

    pub fn get_orders(&self) -> Vec<Order> {
        self.orders
            .lock()
            .iter()
            .map(|(id, o)| resting_to_order(id, o))
            .collect()
    }

    pub fn get_order(&self, broker_order_id: &str) -> CoreResult<Order> {
        self.orders
            .lock()
            .get(broker_order_id)
            .map(|o| resting_to_order(broker_order_id, o))
            .ok_or_else(|| CoreError::BrokerRejected(format!("unknown order {broker_order_id}")))
    }

    pub fn cancel_all(&self) {
        let mut orders = self.orders.lock();
        for o in orders.values_mut() {
            if !o.status.is_terminal() {
                o.status = OrderStatus::Cancelled;
            }
        }
    }
}

fn resting_to_order(id: &str, o: &RestingOrder) -> Order {
    Order {
        id: OrderId::generate(),
        request: o.request.clone(),
        client_request_id: String::new(),
        broker_order_id: Some(id.to_string()),
        exchange_order_id: None,
        status: o.status,
        filled_quantity: o.filled_quantity,
        avg_fill_price: o.avg_fill_price,
        rejection_reason: None,
        amendment_status: AmendmentStatus::None,
        placed_at: None,
        updated_at: chrono::Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Product;
    use rust_decimal_macros::dec;

    fn market_buy(token: u64) -> OrderRequest {
        OrderRequest {
            instrument_token: token,
            trading_symbol: "NIFTY24JUL24000CE".into(),
            exchange: "NFO".into(),
            side: Side::Buy,
            order_type: OrderType::Market,
            product: Product("MIS".into()),
            quantity: dec!(75),
            limit_price: None,
            trigger_price: None,
            strategy_id: None,
            correlation_id: None,
        }
    }

    #[test]
    fn market_order_fills_synchronously_at_placement_with_slippage() {
        let book = VirtualOrderBook::new(dec!(10)); // 10 bps
        book.on_tick(1, dec!(100));
        let (id, fill) = book.place(&market_buy(1)).unwrap();
        let fill = fill.expect("market order should fill at placement once a price is known");
        assert_eq!(fill.broker_order_id, id);
        assert!(fill.price > dec!(100), "buy slippage should pay more than last price");
    }

    #[test]
    fn market_order_with_no_prior_tick_is_rejected() {
        let book = VirtualOrderBook::new(dec!(10));
        let result = book.place(&market_buy(1));
        assert!(result.is_err(), "no known price yet, MARKET order must be rejected, not left resting");
    }

    #[test]
    fn limit_order_waits_until_price_crosses() {
        let mut req = market_buy(1);
        req.order_type = OrderType::Limit;
        req.limit_price = Some(dec!(95));
        let book = VirtualOrderBook::new(dec!(0));
        book.place(&req).unwrap();

        assert!(book.on_tick(1, dec!(100)).is_empty(), "above limit, should not fill");
        let fills = book.on_tick(1, dec!(94));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(95));
    }

    #[test]
    fn sl_m_order_waits_for_trigger_then_fills_at_market() {
        let mut req = market_buy(1);
        req.order_type = OrderType::SlM;
        req.trigger_price = Some(dec!(105));
        let book = VirtualOrderBook::new(dec!(0));
        book.place(&req).unwrap();

        assert!(book.on_tick(1, dec!(100)).is_empty(), "below trigger, stays pending");
        let fills = book.on_tick(1, dec!(106));
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].price, dec!(106));
    }

    #[test]
    fn cancel_prevents_further_fills() {
        let mut req = market_buy(1);
        req.order_type = OrderType::Limit;
        req.limit_price = Some(dec!(95));
        let book = VirtualOrderBook::new(dec!(0));
        let (id, _) = book.place(&req).unwrap();
        book.cancel(&id).unwrap();
        assert!(book.on_tick(1, dec!(90)).is_empty());
    }

    #[test]
    fn cancel_all_terminates_every_open_order() {
        let mut req1 = market_buy(1);
        req1.order_type = OrderType::Limit;
        req1.limit_price = Some(dec!(95));
        let mut req2 = market_buy(2);
        req2.order_type = OrderType::Limit;
        req2.limit_price = Some(dec!(95));
        let book = VirtualOrderBook::new(dec!(0));
        book.place(&req1).unwrap();
        book.place(&req2).unwrap();
        book.cancel_all();
        assert!(book.on_tick(1, dec!(90)).is_empty());
        assert!(book.on_tick(2, dec!(90)).is_empty());
    }
}
