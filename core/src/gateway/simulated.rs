//! Simulated broker adapter: implements [`BrokerAdapter`] entirely against
//! the in-process [`VirtualOrderBook`]/[`VirtualPositionBook`], so the rest
//! of the core (Router, Queue, Update Handler, Timeout Monitor) runs
//! unmodified whether a strategy trades live or against the simulator.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{MarginSnapshot, Order, OrderAmendment, OrderRequest, PlacedOrderAck, Position};
use crate::errors::CoreResult;
use crate::simulator::{SimulatedFill, VirtualOrderBook, VirtualPositionBook};

use super::BrokerAdapter;

/// Flat margin model: each lot requires a fixed fraction of notional.
/// Good enough for exercising strategy logic without a real SPAN engine
/// (spec §4.12: the margin estimator's accuracy is explicitly a non-goal).
const MARGIN_FRACTION: Decimal = dec!(0.2);

pub struct SimulatedBrokerConfig {
    pub available_capital: Decimal,
    pub slippage_bps: Decimal,
}

impl Default for SimulatedBrokerConfig {
    fn default() -> Self {
        Self {
            available_capital: dec!(1_000_000),
            slippage_bps: dec!(5),
        }
    }
}

pub struct SimulatedBroker {
    order_book: VirtualOrderBook,
    position_book: VirtualPositionBook,
    available_capital: Decimal,
}

impl SimulatedBroker {
    pub fn new(config: SimulatedBrokerConfig) -> Self {
        Self {
            order_book: VirtualOrderBook::new(config.slippage_bps),
            position_book: VirtualPositionBook::new(),
            available_capital: config.available_capital,
        }
    }

    /// Feeds a tick into the order book, applying any resulting fills to
    /// the position book. Returns the fills produced so the update handler
    /// can translate them into [`crate::domain::OrderEvent`]s.
    pub fn on_tick(&self, instrument_token: u64, last_price: Decimal, symbol: &str) -> Vec<SimulatedFill> {
        let fills = self.order_book.on_tick(instrument_token, last_price);
        for fill in &fills {
            self.position_book.apply_fill(fill, symbol);
        }
        self.position_book.mark_to_market(instrument_token, last_price);
        fills
    }

    pub fn positions(&self) -> &VirtualPositionBook {
        &self.position_book
    }
}

impl BrokerAdapter for SimulatedBroker {
    fn place_order(&self, request: &OrderRequest, _client_request_id: &str) -> CoreResult<PlacedOrderAck> {
        request.validate()?;
        let (broker_order_id, fill) = self.order_book.place(request)?;
        if let Some(fill) = &fill {
            self.position_book.apply_fill(fill, &request.trading_symbol);
            self.position_book.mark_to_market(fill.instrument_token, fill.price);
        }
        Ok(PlacedOrderAck { broker_order_id })
    }

    fn modify_order(&self, broker_order_id: &str, amendment: &OrderAmendment) -> CoreResult<()> {
        self.order_book.modify(broker_order_id, amendment)
    }

    fn cancel_order(&self, broker_order_id: &str) -> CoreResult<()> {
        self.order_book.cancel(broker_order_id)
    }

    fn get_orders(&self) -> CoreResult<Vec<Order>> {
        Ok(self.order_book.get_orders())
    }

    fn get_order_history(&self, broker_order_id: &str) -> CoreResult<Vec<Order>> {
        Ok(vec![self.order_book.get_order(broker_order_id)?])
    }

    fn get_positions(&self) -> CoreResult<Vec<Position>> {
        Ok(self.position_book.all())
    }

    fn get_margins(&self) -> CoreResult<MarginSnapshot> {
        let exposure: Decimal = self
            .position_book
            .all()
            .iter()
            .map(|p| (p.quantity * p.avg_price).abs())
            .sum();
        let required = exposure * MARGIN_FRACTION;
        Ok(MarginSnapshot {
            required,
            available: self.available_capital - required,
            span: required,
            exposure,
        })
    }

    fn get_order_margin(&self, request: &OrderRequest) -> CoreResult<MarginSnapshot> {
        let price = request.limit_price.unwrap_or(Decimal::ZERO);
        let exposure = (request.quantity * price).abs();
        let required = exposure * MARGIN_FRACTION;
        Ok(MarginSnapshot {
            required,
            available: self.available_capital - required,
            span: required,
            exposure,
        })
    }

    fn get_basket_margin(&self, requests: &[OrderRequest]) -> CoreResult<MarginSnapshot> {
        let exposure: Decimal = requests
            .iter()
            .map(|r| (r.quantity * r.limit_price.unwrap_or(Decimal::ZERO)).abs())
            .sum();
        let required = exposure * MARGIN_FRACTION;
        Ok(MarginSnapshot {
            required,
            available: self.available_capital - required,
            span: required,
            exposure,
        })
    }

    fn kill_switch(&self) -> CoreResult<()> {
        self.order_book.cancel_all();
        let flattened = self.position_book.flatten_all(|token| {
            // Without a live tick we can only flatten at the last known
            // mark; positions never marked yet flatten at their own avg
            // price (zero realized P&L), which is the conservative choice.
            self.position_book.get(token).and_then(|p| p.last_price).or(Some(Decimal::ZERO))
        });
        let _ = flattened;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{OrderType, Product, Side};

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
    fn placing_a_market_order_fills_synchronously_and_produces_a_position() {
        let broker = SimulatedBroker::new(SimulatedBrokerConfig::default());
        broker.on_tick(1, dec!(100), "NIFTY24JUL24000CE");
        broker.place_order(&market_buy(1), "c1").unwrap();
        let positions = broker.get_positions().unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(75));
    }

    #[test]
    fn market_order_with_no_prior_tick_is_rejected() {
        let broker = SimulatedBroker::new(SimulatedBrokerConfig::default());
        assert!(broker.place_order(&market_buy(1), "c1").is_err());
    }

    #[test]
    fn kill_switch_cancels_resting_orders_and_flattens_positions() {
        let broker = SimulatedBroker::new(SimulatedBrokerConfig::default());
        broker.on_tick(1, dec!(100), "X");
        broker.place_order(&market_buy(1), "c1").unwrap();
        broker.kill_switch().unwrap();
        let positions = broker.get_positions().unwrap();
        assert!(positions.iter().all(|p| p.is_flat()));
    }

    #[test]
    fn margin_estimate_scales_with_exposure() {
        let broker = SimulatedBroker::new(SimulatedBrokerConfig::default());
        let mut req = market_buy(1);
        req.limit_price = Some(dec!(100));
        let margin = broker.get_order_margin(&req).unwrap();
        assert_eq!(margin.exposure, dec!(7500));
        assert_eq!(margin.required, dec!(1500));
    }
}
