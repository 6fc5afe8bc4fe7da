//! Condition Engine (spec §4.10): evaluates condition rules against tick or
//! interval-bar values and emits [`ConditionTriggered`] once a rule's
//! operator fires. Each rule is independently serialized behind its own
//! mutex so a tick evaluation and an interval-bar evaluation of the same
//! rule can never interleave and double-trigger it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::domain::{ConditionAction, ConditionOperator, ConditionRule, ConditionStatus, ConditionTriggered, EvaluationMode};
use crate::errors::{CoreError, CoreResult};

pub struct ConditionEngine {
    rules: Mutex<HashMap<String, std::sync::Arc<Mutex<ConditionRule>>>>,
}

impl ConditionEngine {
    pub fn new() -> Self {
        Self { rules: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, rule: ConditionRule) {
        self.rules.lock().insert(rule.id.clone(), std::sync::Arc::new(Mutex::new(rule)));
    }

    pub fn remove(&self, rule_id: &str) {
        self.rules.lock().remove(rule_id);
    }

    pub fn get(&self, rule_id: &str) -> Option<ConditionRule> {
        self.rules.lock().get(rule_id).map(|r| r.lock().clone())
    }

    /// Evaluates every rule on `instrument_token` whose evaluation mode
    /// matches `mode`, against `value` observed at `now`. Returns the
    /// rules that triggered.
    pub fn evaluate(
        &self,
        instrument_token: u64,
        mode: EvaluationMode,
        value: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<ConditionTriggered> {
        let handles: Vec<_> = self
            .rules
            .lock()
            .values()
            .filter(|r| {
                let rule = r.lock();
                rule.instrument_token == instrument_token && rule.evaluation_mode == mode
            })
            .cloned()
            .collect();

        let mut triggered = Vec::new();
        for handle in handles {
            let mut rule = handle.lock();
            if let Some(event) = evaluate_one(&mut rule, value, now) {
                triggered.push(event);
            }
        }
        triggered
    }

    pub fn acknowledge_action_dispatched(&self, rule_id: &str) -> CoreResult<()> {
        let handle = self
            .rules
            .lock()
            .get(rule_id)
            .cloned()
            .ok_or_else(|| CoreError::ValidationFailure { field: "rule_id".into(), reason: "unknown rule".into() })?;
        let rule = handle.lock();
        debug!(rule_id = %rule.id, action = ?rule.action, "condition action dispatched");
        Ok(())
    }
}

impl Default for ConditionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure evaluation of a single rule against one observed `value`, mutating
/// the rule's trigger bookkeeping and `previous_value` as needed. Exposed
/// free of `ConditionEngine` so it can be unit tested without the registry.
fn evaluate_one(rule: &mut ConditionRule, value: Decimal, now: DateTime<Utc>) -> Option<ConditionTriggered> {
    if rule.status != ConditionStatus::Active {
        return None;
    }
    if now < rule.valid_from || now > rule.valid_until {
        return None;
    }
    if rule.current_trigger_count >= rule.max_trigger_count {
        rule.status = ConditionStatus::Disabled;
        return None;
    }
    if let Some(last) = rule.last_triggered_at {
        if now - last < chrono::Duration::minutes(rule.cooldown_minutes) {
            let previous = rule.previous_value;
            update_previous_value(rule, value, previous);
            return None;
        }
    }

    let previous_value = rule.previous_value;
    let fired = operator_fires(rule.operator, value, rule.primary_threshold, rule.secondary_threshold, previous_value);
    update_previous_value(rule, value, previous_value);

    if !fired {
        return None;
    }

    rule.current_trigger_count += 1;
    rule.last_triggered_at = Some(now);
    if rule.current_trigger_count >= rule.max_trigger_count {
        rule.status = ConditionStatus::Disabled;
    } else {
        rule.status = ConditionStatus::Triggered;
    }

    info!(rule_id = %rule.id, action = ?rule.action, value = %value, "condition rule triggered");

    Some(ConditionTriggered {
        rule: rule.clone(),
        observed_value: value,
        triggered_at: now,
    })
}

fn update_previous_value(rule: &mut ConditionRule, value: Decimal, _previous: Option<Decimal>) {
    if rule.operator.needs_previous_value() {
        rule.previous_value = Some(value);
    }
}

fn operator_fires(
    operator: ConditionOperator,
    value: Decimal,
    primary: Decimal,
    secondary: Option<Decimal>,
    previous: Option<Decimal>,
) -> bool {
    use ConditionOperator::*;
    match operator {
        Gt => value > primary,
        Lt => value < primary,
        Gte => value >= primary,
        Lte => value <= primary,
        Between => {
            let upper = secondary.unwrap_or(primary);
            let (lo, hi) = if primary <= upper { (primary, upper) } else { (upper, primary) };
            value >= lo && value <= hi
        }
        Outside => {
            let upper = secondary.unwrap_or(primary);
            let (lo, hi) = if primary <= upper { (primary, upper) } else { (upper, primary) };
            value < lo || value > hi
        }
        CrossesAbove => match previous {
            Some(prev) => prev < primary && value >= primary,
            None => false,
        },
        CrossesBelow => match previous {
            Some(prev) => prev > primary && value <= primary,
            None => false,
        },
    }
}
