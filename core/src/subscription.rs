//! Subscription Manager (spec §4.8): multiplexes every component's
//! instrument interest onto a single upstream feed subscription set, capped
//! at `max_instruments`. When the cap is reached, the lowest-priority
//! subscription (Condition, then Manual) is evicted to make room.
//! Strategy subscriptions are never evicted — if there is no room even
//! after evicting every evictable entry, subscription fails outright.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::domain::SubscriberPriority;
use crate::errors::{CoreError, CoreResult};

pub const DEFAULT_MAX_INSTRUMENTS: usize = 3_000;

#[derive(Debug, Clone)]
struct Subscriber {
    key: String,
    priority: SubscriberPriority,
}

pub struct SubscriptionManager {
    max_instruments: usize,
    // instrument_token -> subscribers holding it
    subscriptions: Mutex<HashMap<u64, Vec<Subscriber>>>,
}

impl SubscriptionManager {
    pub fn new(max_instruments: usize) -> Self {
        Self {
            max_instruments,
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn active_instrument_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Subscribes `subscriber_key` to every token in `tokens` at `priority`,
    /// atomically. Splits `tokens` into already-active (just adds this
    /// subscriber as another holder) and genuinely new ones; if admitting
    /// the new tokens would exceed `max_instruments`, attempts to evict
    /// enough entries held only at a priority strictly lower than
    /// `priority` (Strategy holders are never evicted). If eviction can't
    /// free enough room, the whole batch is rejected and no state changes.
    /// Returns the tokens that are new to the upstream feed.
    pub fn subscribe(&self, subscriber_key: &str, tokens: &[u64], priority: SubscriberPriority) -> CoreResult<Vec<u64>> {
        let mut subs = self.subscriptions.lock();

        let new_tokens: Vec<u64> = tokens.iter().copied().filter(|t| !subs.contains_key(t)).collect();
        let projected = subs.len() + new_tokens.len();

        if projected > self.max_instruments {
            let mut need_to_evict = projected - self.max_instruments;
            let mut working = subs.clone();
            let mut plan = Vec::new();
            while need_to_evict > 0 {
                match find_evictable(&working, priority) {
                    Some(token) => {
                        working.remove(&token);
                        plan.push(token);
                        need_to_evict -= 1;
                    }
                    None => {
                        return Err(CoreError::CapacityExhausted {
                            requested: new_tokens.len(),
                            active: subs.len(),
                            cap: self.max_instruments,
                        });
                    }
                }
            }
            for token in plan {
                warn!(instrument_token = token, "subscription cap reached, evicting");
                subs.remove(&token);
            }
        }

        for &token in tokens {
            let holders = subs.entry(token).or_default();
            if !holders.iter().any(|h| h.key == subscriber_key) {
                holders.push(Subscriber { key: subscriber_key.to_string(), priority });
            }
        }

        info!(subscriber_key, new = new_tokens.len(), "subscribed batch");
        Ok(new_tokens)
    }

    /// Removes `subscriber_key`'s hold on `instrument_token`. The
    /// instrument itself is unsubscribed upstream once no holder remains.
    pub fn unsubscribe(&self, subscriber_key: &str, instrument_token: u64) {
        let mut subs = self.subscriptions.lock();
        if let Some(holders) = subs.get_mut(&instrument_token) {
            holders.retain(|h| h.key != subscriber_key);
            if holders.is_empty() {
                subs.remove(&instrument_token);
                info!(instrument_token, "instrument fully unsubscribed");
            }
        }
    }

    /// Removes every hold `subscriber_key` has across all instruments.
    pub fn unsubscribe_all(&self, subscriber_key: &str) {
        let mut subs = self.subscriptions.lock();
        subs.retain(|_, holders| {
            holders.retain(|h| h.key != subscriber_key);
            !holders.is_empty()
        });
    }

    pub fn is_subscribed(&self, instrument_token: u64) -> bool {
        self.subscriptions.lock().contains_key(&instrument_token)
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INSTRUMENTS)
    }
}

/// Picks the instrument to evict in favor of `incoming_priority`: only
/// instruments whose highest holder priority is strictly lower than
/// `incoming_priority` are eligible (so two same-priority subscriptions
/// never evict one another), and among those the lowest-priority one wins.
/// Returns `None` when nothing qualifies, forcing a capacity-exhausted
/// reject.
fn find_evictable(subs: &HashMap<u64, Vec<Subscriber>>, incoming_priority: SubscriberPriority) -> Option<u64> {
    let highest_priority = |holders: &[Subscriber]| holders.iter().map(|h| h.priority).max();

    subs.iter()
        .filter(|(_, holders)| highest_priority(holders).map(|p| p < incoming_priority).unwrap_or(false))
        .min_by_key(|(_, holders)| highest_priority(holders))
        .map(|(token, _)| *token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribing_the_same_instrument_twice_does_not_duplicate() {
        let mgr = SubscriptionManager::new(10);
        mgr.subscribe("a", &[1], SubscriberPriority::Manual).unwrap();
        mgr.subscribe("b", &[1], SubscriberPriority::Manual).unwrap();
        assert_eq!(mgr.active_instrument_count(), 1);
    }

    #[test]
    fn batch_subscribe_returns_only_the_tokens_new_to_upstream() {
        let mgr = SubscriptionManager::new(10);
        mgr.subscribe("a", &[1, 2], SubscriberPriority::Manual).unwrap();
        let newly_added = mgr.subscribe("b", &[2, 3], SubscriberPriority::Manual).unwrap();
        assert_eq!(newly_added, vec![3]);
    }

    #[test]
    fn unsubscribe_only_removes_upstream_once_all_holders_gone() {
        let mgr = SubscriptionManager::new(10);
        mgr.subscribe("a", &[1], SubscriberPriority::Manual).unwrap();
        mgr.subscribe("b", &[1], SubscriberPriority::Manual).unwrap();
        mgr.unsubscribe("a", 1);
        assert!(mgr.is_subscribed(1));
        mgr.unsubscribe("b", 1);
        assert!(!mgr.is_subscribed(1));
    }

    #[test]
    fn eviction_prefers_condition_over_manual() {
        let mgr = SubscriptionManager::new(2);
        mgr.subscribe("cond", &[1], SubscriberPriority::Condition).unwrap();
        mgr.subscribe("manual", &[2], SubscriberPriority::Manual).unwrap();
        mgr.subscribe("manual2", &[3], SubscriberPriority::Manual).unwrap();
        assert!(!mgr.is_subscribed(1), "condition-held instrument should have been evicted");
        assert!(mgr.is_subscribed(2));
        assert!(mgr.is_subscribed(3));
    }

    #[test]
    fn strategy_subscriptions_are_never_evicted() {
        let mgr = SubscriptionManager::new(1);
        mgr.subscribe("strat", &[1], SubscriberPriority::Strategy).unwrap();
        let result = mgr.subscribe("manual", &[2], SubscriberPriority::Manual);
        assert!(result.is_err());
        assert!(mgr.is_subscribed(1));
    }

    #[test]
    fn same_priority_holders_are_not_evicted_by_an_equal_priority_newcomer() {
        // capacity=2, two existing CONDITION-priority subscriptions; a third
        // CONDITION-priority subscribe must fail, not evict a peer.
        let mgr = SubscriptionManager::new(2);
        mgr.subscribe("a", &[1], SubscriberPriority::Condition).unwrap();
        mgr.subscribe("b", &[2], SubscriberPriority::Condition).unwrap();
        let result = mgr.subscribe("c", &[3], SubscriberPriority::Condition);
        assert!(result.is_err());
        assert!(mgr.is_subscribed(1));
        assert!(mgr.is_subscribed(2));
        assert!(!mgr.is_subscribed(3));
    }

    #[test]
    fn capacity_rejection_leaves_state_unchanged() {
        let mgr = SubscriptionManager::new(1);
        mgr.subscribe("strat", &[1], SubscriberPriority::Strategy).unwrap();
        assert!(mgr.subscribe("manual", &[2, 3], SubscriberPriority::Manual).is_err());
        assert_eq!(mgr.active_instrument_count(), 1);
        assert!(!mgr.is_subscribed(2));
        assert!(!mgr.is_subscribed(3));
    }

    #[test]
    fn unsubscribe_all_clears_every_hold_for_a_subscriber() {
        let mgr = SubscriptionManager::new(10);
        mgr.subscribe("a", &[1], SubscriberPriority::Manual).unwrap();
        mgr.subscribe("a", &[2], SubscriberPriority::Manual).unwrap();
        mgr.unsubscribe_all("a");
        assert!(!mgr.is_subscribed(1));
        assert!(!mgr.is_subscribed(2));
    }
}
