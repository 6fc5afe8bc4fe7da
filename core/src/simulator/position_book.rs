//! Virtual Position Book (spec §4.7): applies simulated fills to maintain
//! VWAP-averaged positions and realizes P&L the moment a fill closes or
//! flips an existing position, the same accounting a real broker's
//! position ledger performs.

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::{Position, PositionLabel, Side};
use crate::simulator::order_book::SimulatedFill;

pub struct VirtualPositionBook {
    positions: Mutex<HashMap<(u64, PositionLabel), Position>>,
}

impl VirtualPositionBook {
    pub fn new() -> Self {
        Self {
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Applies a fill to the day position for its instrument. Returns the
    /// resulting position snapshot.
    pub fn apply_fill(&self, fill: &SimulatedFill, symbol: &str) -> Position {
        let mut positions = self.positions.lock();
        let key = (fill.instrument_token, PositionLabel::Day);
        let position = positions
            .entry(key)
            .or_insert_with(|| Position::flat(fill.instrument_token, symbol.to_string(), PositionLabel::Day));

        let signed_qty = match fill.side {
            Side::Buy => fill.quantity,
            Side::Sell => -fill.quantity,
        };

        apply_signed_fill(position, signed_qty, fill.price);
        position.clone()
    }

    pub fn mark_to_market(&self, instrument_token: u64, last_price: Decimal) {
        let mut positions = self.positions.lock();
        if let Some(p) = positions.get_mut(&(instrument_token, PositionLabel::Day)) {
            p.last_price = Some(last_price);
            p.unrealized_pnl = (last_price - p.avg_price) * p.quantity;
        }
    }

    pub fn get(&self, instrument_token: u64) -> Option<Position> {
        self.positions.lock().get(&(instrument_token, PositionLabel::Day)).cloned()
    }

    pub fn all(&self) -> Vec<Position> {
        self.positions.lock().values().cloned().collect()
    }

    /// Flattens every non-flat position at the supplied mark price,
    /// realizing whatever P&L remains. Used by the kill switch.
    pub fn flatten_all(&self, mark_price: impl Fn(u64) -> Option<Decimal>) -> Vec<Position> {
        let mut positions = self.positions.lock();
        let mut flattened = Vec::new();
        for p in positions.values_mut() {
            if p.is_flat() {
                continue;
            }
            if let Some(price) = mark_price(p.instrument_token) {
                let closing_qty = -p.quantity;
                apply_signed_fill(p, closing_qty, price);
            }
            flattened.push(p.clone());
        }
        flattened
    }
}

impl Default for VirtualPositionBook {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies a signed quantity fill at `price` to `position`, averaging into
/// the existing side and realizing P&L on whatever portion closes/flips.
fn apply_signed_fill(position: &mut Position, signed_qty: Decimal, price: Decimal) {
    let existing_qty = position.quantity;

    if existing_qty == Decimal::ZERO || existing_qty.signum() == signed_qty.signum() {
        // Adding to a flat or same-direction position: re-average.
        let new_qty = existing_qty + signed_qty;
        if new_qty != Decimal::ZERO {
            position.avg_price =
                (position.avg_price * existing_qty.abs() + price * signed_qty.abs()) / new_qty.abs();
        }
        position.quantity = new_qty;
        return;
    }

    // Opposite direction: this fill closes some or all of the existing
    // position (and may flip it to the other side).
    let closing_qty = signed_qty.abs().min(existing_qty.abs());
    let realized = (price - position.avg_price) * closing_qty * existing_qty.signum();
    position.realized_pnl += realized;

    let remaining = existing_qty + signed_qty;
    if remaining.signum() != existing_qty.signum() && remaining != Decimal::ZERO {
        // Flipped: the excess opens a fresh position at this fill's price.
        position.avg_price = price;
    }
    position.quantity = remaining;
    if position.quantity == Decimal::ZERO {
        position.avg_price = Decimal::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(token: u64, side: Side, qty: Decimal, price: Decimal) -> SimulatedFill {
        SimulatedFill {
            broker_order_id: "SIM-1".into(),
            instrument_token: token,
            side,
            quantity: qty,
            price,
        }
    }

    #[test]
    fn first_fill_opens_a_position_at_its_price() {
        let book = VirtualPositionBook::new();
        let p = book.apply_fill(&fill(1, Side::Buy, dec!(75), dec!(100)), "NIFTY24JULCE");
        assert_eq!(p.quantity, dec!(75));
        assert_eq!(p.avg_price, dec!(100));
    }

    #[test]
    fn adding_same_direction_reaverages() {
        let book = VirtualPositionBook::new();
        book.apply_fill(&fill(1, Side::Buy, dec!(75), dec!(100)), "X");
        let p = book.apply_fill(&fill(1, Side::Buy, dec!(75), dec!(120)), "X");
        assert_eq!(p.quantity, dec!(150));
        assert_eq!(p.avg_price, dec!(110));
    }

    #[test]
    fn closing_trade_realizes_pnl() {
        let book = VirtualPositionBook::new();
        book.apply_fill(&fill(1, Side::Buy, dec!(75), dec!(100)), "X");
        let p = book.apply_fill(&fill(1, Side::Sell, dec!(75), dec!(120)), "X");
        assert!(p.is_flat());
        assert_eq!(p.realized_pnl, dec!(1500)); // (120-100)*75
    }

    #[test]
    fn flip_opens_new_position_on_the_other_side_at_fill_price() {
        let book = VirtualPositionBook::new();
        book.apply_fill(&fill(1, Side::Buy, dec!(75), dec!(100)), "X");
        let p = book.apply_fill(&fill(1, Side::Sell, dec!(150), dec!(110)), "X");
        assert_eq!(p.quantity, dec!(-75));
        assert_eq!(p.avg_price, dec!(110));
        assert_eq!(p.realized_pnl, dec!(750)); // (110-100)*75 on the closed leg
    }

    #[test]
    fn mark_to_market_updates_unrealized_pnl() {
        let book = VirtualPositionBook::new();
        book.apply_fill(&fill(1, Side::Buy, dec!(75), dec!(100)), "X");
        book.mark_to_market(1, dec!(110));
        let p = book.get(1).unwrap();
        assert_eq!(p.unrealized_pnl, dec!(750));
    }

    #[test]
    fn flatten_all_closes_every_open_position() {
        let book = VirtualPositionBook::new();
        book.apply_fill(&fill(1, Side::Buy, dec!(75), dec!(100)), "X");
        book.apply_fill(&fill(2, Side::Sell, dec!(50), dec!(200)), "Y");
        let flattened = book.flatten_all(|_| Some(dec!(150)));
        assert_eq!(flattened.len(), 2);
        assert!(flattened.iter().all(|p| p.is_flat()));
    }
}
