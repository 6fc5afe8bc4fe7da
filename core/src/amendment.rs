//! Amendment State Machine (spec §4.4): governs modify-in-flight for a
//! single order. `AmendmentStatus` cycles
//! `None -> ModifyRequested -> ModifySent -> (ModifyConfirmed|ModifyRejected) -> None`.
//! Only one amendment may be in flight per order at a time, and every
//! broker acknowledgement is deduplicated by its event id so a replayed
//! push notification can never double-apply.

use std::collections::HashSet;

use rust_decimal::Decimal;

use crate::domain::{AmendmentStatus, OrderAmendment, OrderStatus};
use crate::errors::AmendmentError;

#[derive(Debug, Clone)]
pub enum AmendmentEvent {
    /// Caller requested a change to quantity/price/trigger.
    Requested(OrderAmendment),
    /// The amendment request was sent to the broker.
    Sent,
    /// The broker confirmed the amendment.
    Confirmed,
    /// The broker rejected the amendment.
    Rejected(String),
}

/// Tracks one order's amendment lifecycle, independent of its main order
/// state (which lives in [`crate::domain::Order`]).
#[derive(Debug, Clone)]
pub struct AmendmentMachine {
    status: AmendmentStatus,
    pending: Option<OrderAmendment>,
    last_rejection: Option<String>,
    applied: HashSet<String>,
}

impl AmendmentMachine {
    pub fn new() -> Self {
        Self {
            status: AmendmentStatus::None,
            pending: None,
            last_rejection: None,
            applied: HashSet::new(),
        }
    }

    pub fn status(&self) -> AmendmentStatus {
        self.status
    }

    pub fn pending(&self) -> Option<&OrderAmendment> {
        self.pending.as_ref()
    }

    pub fn last_rejection(&self) -> Option<&str> {
        self.last_rejection.as_deref()
    }

    /// Applies `event`, deduplicated by `event_id` when present. A replayed
    /// event id is a silent no-op, matching the idempotent-replay guarantee
    /// the rest of this core relies on for broker push notifications.
    pub fn apply(
        &mut self,
        event: AmendmentEvent,
        event_id: Option<&str>,
        order_status: OrderStatus,
        filled_quantity: Decimal,
    ) -> Result<(), AmendmentError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(());
            }
        }

        self.transition(event, order_status, filled_quantity)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }
        Ok(())
    }

    fn transition(
        &mut self,
        event: AmendmentEvent,
        order_status: OrderStatus,
        filled_quantity: Decimal,
    ) -> Result<(), AmendmentError> {
        use AmendmentEvent::*;
        use AmendmentStatus::*;

        match (self.status, event) {
            (None, Requested(amendment)) => {
                if order_status.is_terminal() {
                    return Err(AmendmentError::InvalidOrderStatus(order_status));
                }
                if amendment.is_empty() {
                    return Err(AmendmentError::NoFieldsProvided);
                }
                if let Some(new_qty) = amendment.quantity {
                    if new_qty <= filled_quantity {
                        return Err(AmendmentError::QuantityBelowFilled {
                            new: new_qty,
                            filled: filled_quantity,
                        });
                    }
                }
                if let Some(price) = amendment.limit_price {
                    if price <= Decimal::ZERO {
                        return Err(AmendmentError::NonPositiveValue(price));
                    }
                }
                if let Some(trigger) = amendment.trigger_price {
                    if trigger <= Decimal::ZERO {
                        return Err(AmendmentError::NonPositiveValue(trigger));
                    }
                }
                self.pending = Some(amendment);
                self.status = ModifyRequested;
                Ok(())
            }

            (ModifyRequested, Sent) => {
                self.status = ModifySent;
                Ok(())
            }

            (ModifySent, Confirmed) => {
                self.status = ModifyConfirmed;
                self.pending = None;
                Ok(())
            }

            (ModifySent, Rejected(reason)) => {
                self.last_rejection = Some(reason);
                self.status = ModifyRejected;
                self.pending = None;
                Ok(())
            }

            // A confirmed or rejected amendment resets back to None, ready
            // for the next request, once the caller has observed it.
            (ModifyConfirmed | ModifyRejected, Requested(amendment)) => {
                self.status = None;
                self.pending = None;
                self.transition(Requested(amendment), order_status, filled_quantity)
            }

            (other_status, Requested(_)) => Err(AmendmentError::AlreadyInFlight(other_status)),

            (from, event) => Err(AmendmentError::IllegalTransition {
                from,
                to: match event {
                    Sent => ModifySent,
                    Confirmed => ModifyConfirmed,
                    Rejected(_) => ModifyRejected,
                    Requested(_) => ModifyRequested,
                },
            }),
        }
    }
}

impl Default for AmendmentMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amendment(qty: Decimal) -> OrderAmendment {
        OrderAmendment {
            quantity: Some(qty),
            limit_price: None,
            trigger_price: None,
        }
    }

    #[test]
    fn full_lifecycle_confirmed() {
        let mut fsm = AmendmentMachine::new();
        fsm.apply(AmendmentEvent::Requested(amendment(dec!(100))), Some("e1"), OrderStatus::Open, dec!(0))
            .unwrap();
        assert_eq!(fsm.status(), AmendmentStatus::ModifyRequested);

        fsm.apply(AmendmentEvent::Sent, Some("e2"), OrderStatus::Open, dec!(0)).unwrap();
        assert_eq!(fsm.status(), AmendmentStatus::ModifySent);

        fsm.apply(AmendmentEvent::Confirmed, Some("e3"), OrderStatus::Open, dec!(0)).unwrap();
        assert_eq!(fsm.status(), AmendmentStatus::ModifyConfirmed);
        assert!(fsm.pending().is_none());
    }

    #[test]
    fn rejection_path_records_reason() {
        let mut fsm = AmendmentMachine::new();
        fsm.apply(AmendmentEvent::Requested(amendment(dec!(100))), Some("e1"), OrderStatus::Open, dec!(0))
            .unwrap();
        fsm.apply(AmendmentEvent::Sent, Some("e2"), OrderStatus::Open, dec!(0)).unwrap();
        fsm.apply(AmendmentEvent::Rejected("price band".into()), Some("e3"), OrderStatus::Open, dec!(0))
            .unwrap();
        assert_eq!(fsm.status(), AmendmentStatus::ModifyRejected);
        assert_eq!(fsm.last_rejection(), Some("price band"));
    }

    #[test]
    fn cannot_request_second_amendment_while_one_in_flight() {
        let mut fsm = AmendmentMachine::new();
        fsm.apply(AmendmentEvent::Requested(amendment(dec!(100))), Some("e1"), OrderStatus::Open, dec!(0))
            .unwrap();
        let err = fsm
            .apply(AmendmentEvent::Requested(amendment(dec!(200))), Some("e2"), OrderStatus::Open, dec!(0))
            .unwrap_err();
        assert!(matches!(err, AmendmentError::AlreadyInFlight(AmendmentStatus::ModifyRequested)));
    }

    #[test]
    fn rejects_quantity_at_or_below_filled() {
        let mut fsm = AmendmentMachine::new();
        let err = fsm
            .apply(AmendmentEvent::Requested(amendment(dec!(50))), Some("e1"), OrderStatus::Partial, dec!(50))
            .unwrap_err();
        assert!(matches!(err, AmendmentError::QuantityBelowFilled { .. }));
    }

    #[test]
    fn rejects_amendment_on_terminal_order() {
        let mut fsm = AmendmentMachine::new();
        let err = fsm
            .apply(AmendmentEvent::Requested(amendment(dec!(100))), Some("e1"), OrderStatus::Complete, dec!(100))
            .unwrap_err();
        assert!(matches!(err, AmendmentError::InvalidOrderStatus(OrderStatus::Complete)));
    }

    #[test]
    fn duplicate_event_id_is_a_silent_no_op() {
        let mut fsm = AmendmentMachine::new();
        fsm.apply(AmendmentEvent::Requested(amendment(dec!(100))), Some("e1"), OrderStatus::Open, dec!(0))
            .unwrap();
        fsm.apply(AmendmentEvent::Sent, Some("e2"), OrderStatus::Open, dec!(0)).unwrap();
        // Replaying e1 (the original Requested event) must not error even
        // though a Requested event is illegal from ModifySent.
        fsm.apply(AmendmentEvent::Requested(amendment(dec!(100))), Some("e1"), OrderStatus::Open, dec!(0))
            .unwrap();
        assert_eq!(fsm.status(), AmendmentStatus::ModifySent);
    }

    #[test]
    fn new_amendment_allowed_after_previous_one_resolved() {
        let mut fsm = AmendmentMachine::new();
        fsm.apply(AmendmentEvent::Requested(amendment(dec!(100))), Some("e1"), OrderStatus::Open, dec!(0))
            .unwrap();
        fsm.apply(AmendmentEvent::Sent, Some("e2"), OrderStatus::Open, dec!(0)).unwrap();
        fsm.apply(AmendmentEvent::Confirmed, Some("e3"), OrderStatus::Open, dec!(0)).unwrap();

        fsm.apply(AmendmentEvent::Requested(amendment(dec!(150))), Some("e4"), OrderStatus::Open, dec!(0))
            .unwrap();
        assert_eq!(fsm.status(), AmendmentStatus::ModifyRequested);
    }
}
