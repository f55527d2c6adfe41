//! Reconciled resources and their status conditions

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use cs_core::time::{format_timestamp, now_rfc3339};
use cs_core::{ConditionStatus, ObjectKey};

/// A named status entry reporting progress on one aspect of a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type; unique within a resource
    #[serde(rename = "type")]
    pub type_: String,
    /// Whether the aspect currently holds
    pub status: ConditionStatus,
    /// Machine-readable reason, empty when `status` is `True`
    pub reason: String,
    /// Human-readable detail
    pub message: String,
    /// RFC 3339 time of the last status flip
    pub last_transition_time: String,
}

impl Condition {
    /// Whether the condition holds
    pub fn is_true(&self) -> bool {
        self.status.is_true()
    }
}

/// Versioned state shared by every reconciled resource
///
/// Domain resources embed a `Resource` and expose it through
/// [`ResourceObject`]. Cloning produces an independent copy, including the
/// condition list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    name: ObjectKey,
    generation: u64,
    conditions: Vec<Condition>,
    kill_timestamp: Option<String>,
    deletion_timestamp: Option<String>,
}

impl Resource {
    /// Create a resource with generation 0 and no conditions
    pub fn new(name: impl Into<ObjectKey>) -> Self {
        Self {
            name: name.into(),
            generation: 0,
            conditions: Vec::new(),
            kill_timestamp: None,
            deletion_timestamp: None,
        }
    }

    pub fn name(&self) -> &ObjectKey {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn inc_generation(&mut self) {
        self.generation += 1;
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn mark_true(&mut self, type_: &str) {
        self.set_condition(type_, ConditionStatus::True, "", "");
    }

    pub fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.set_condition(type_, ConditionStatus::False, reason, message);
    }

    /// Upsert a condition by type.
    ///
    /// The transition time only moves when the status flips.
    fn set_condition(&mut self, type_: &str, status: ConditionStatus, reason: &str, message: &str) {
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.last_transition_time = now_rfc3339();
            }
            existing.status = status;
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            return;
        }

        self.conditions.push(Condition {
            type_: type_.to_string(),
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: now_rfc3339(),
        });
    }

    pub fn kill_timestamp(&self) -> Option<&str> {
        self.kill_timestamp.as_deref()
    }

    /// Record the kill time; later calls keep the first value
    pub fn set_kill_timestamp(&mut self, at: DateTime<Local>) {
        if self.kill_timestamp.is_none() {
            self.kill_timestamp = Some(format_timestamp(at));
        }
    }

    pub fn deletion_timestamp(&self) -> Option<&str> {
        self.deletion_timestamp.as_deref()
    }

    /// Record the deletion time; later calls keep the first value
    pub fn set_deletion_timestamp(&mut self, at: DateTime<Local>) {
        if self.deletion_timestamp.is_none() {
            self.deletion_timestamp = Some(format_timestamp(at));
        }
    }
}

/// Capability set the control loop needs from a reconciled resource
///
/// Implementors only provide access to their embedded [`Resource`]; every
/// other method has a default that delegates to it.
pub trait ResourceObject: Clone + Send + Sync + 'static {
    /// Shared resource state
    fn resource(&self) -> &Resource;

    /// Mutable shared resource state
    fn resource_mut(&mut self) -> &mut Resource;

    fn name(&self) -> &ObjectKey {
        self.resource().name()
    }

    fn generation(&self) -> u64 {
        self.resource().generation()
    }

    fn inc_generation(&mut self) {
        self.resource_mut().inc_generation();
    }

    fn conditions(&self) -> &[Condition] {
        self.resource().conditions()
    }

    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.resource().condition(type_)
    }

    fn mark_true(&mut self, type_: &str) {
        self.resource_mut().mark_true(type_);
    }

    fn mark_false(&mut self, type_: &str, reason: &str, message: &str) {
        self.resource_mut().mark_false(type_, reason, message);
    }

    fn kill_timestamp(&self) -> Option<&str> {
        self.resource().kill_timestamp()
    }

    fn set_kill_timestamp(&mut self, at: DateTime<Local>) {
        self.resource_mut().set_kill_timestamp(at);
    }

    fn deletion_timestamp(&self) -> Option<&str> {
        self.resource().deletion_timestamp()
    }

    fn set_deletion_timestamp(&mut self, at: DateTime<Local>) {
        self.resource_mut().set_deletion_timestamp(at);
    }

    /// Independent copy for a worker to reconcile against
    fn deep_copy(&self) -> Self {
        self.clone()
    }
}

impl ResourceObject for Resource {
    fn resource(&self) -> &Resource {
        self
    }

    fn resource_mut(&mut self) -> &mut Resource {
        self
    }
}
