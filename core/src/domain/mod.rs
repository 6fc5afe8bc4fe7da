//! Shared data model: the entities every component in the execution core
//! reads or writes, plus the events the core emits to its collaborators.
//!
//! Ownership (spec §3): Orders are owned exclusively by the order
//! subsystem (`queue`/`update_handler`/`amendment`); other components hold
//! read-only snapshots. Positions are owned exclusively by the position
//! subsystem (`simulator::position_book` in simulated mode, the broker's
//! own position store in live mode via reconciliation). The Subscription
//! Manager exclusively owns the active-token set.

mod events;
mod types;

pub use events::*;
pub use types::*;
