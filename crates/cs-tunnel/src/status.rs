//! Condition change tracking for status output

use std::collections::HashMap;

use cs_controlloop::{Condition, ConditionReport, ObjectKey};

/// Remembers the last reported conditions and surfaces only changes
#[derive(Debug, Default)]
pub struct StatusBoard {
    last: HashMap<(ObjectKey, String), Condition>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `report` and return the conditions whose status, reason or
    /// message differ from what was seen before
    pub fn apply(&mut self, report: &ConditionReport) -> Vec<Condition> {
        let mut changed = Vec::new();
        for condition in &report.conditions {
            let slot = (report.key.clone(), condition.type_.clone());
            let is_new = match self.last.get(&slot) {
                Some(prev) => {
                    prev.status != condition.status
                        || prev.reason != condition.reason
                        || prev.message != condition.message
                }
                None => true,
            };
            if is_new {
                self.last.insert(slot, condition.clone());
                changed.push(condition.clone());
            }
        }
        changed
    }

    /// Latest known condition of `type_` on `key`
    pub fn get(&self, key: &ObjectKey, type_: &str) -> Option<&Condition> {
        self.last.get(&(key.clone(), type_.to_string()))
    }
}

/// Log `condition` the way the agent reports status
pub fn log_condition(key: &ObjectKey, condition: &Condition) {
    if condition.is_true() {
        tracing::info!(resource = %key, "{} is up", condition.type_);
    } else {
        tracing::warn!(
            resource = %key,
            reason = %condition.reason,
            "{} is down: {}",
            condition.type_,
            condition.message
        );
    }
}
