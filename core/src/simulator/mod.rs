//! In-process broker simulation (spec §4.7): a virtual order book that
//! matches resting orders against incoming ticks, and a virtual position
//! book that keeps VWAP-averaged positions and realizes P&L on closing
//! trades. Together they let [`crate::gateway::simulated`] implement the
//! same [`crate::gateway::BrokerAdapter`] trait the live broker does.

pub mod order_book;
pub mod position_book;

pub use order_book::{SimulatedFill, VirtualOrderBook};
pub use position_book::VirtualPositionBook;
