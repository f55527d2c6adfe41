//! Best-effort publication of condition snapshots
//!
//! After every reconcile the engine pushes the resource's full condition
//! list to an optional [`ConditionSink`] for a status display. Publishing
//! never waits: when the buffer is full the snapshot is dropped, and the
//! next reconcile publishes a fresher one anyway.

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};

use cs_core::ObjectKey;

use crate::resource::{Condition, ResourceObject};

/// Condition list of one resource after a reconcile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConditionReport {
    pub key: ObjectKey,
    pub generation: u64,
    pub conditions: Vec<Condition>,
}

impl ConditionReport {
    pub fn from_object<T: ResourceObject>(object: &T) -> Self {
        Self {
            key: object.name().clone(),
            generation: object.generation(),
            conditions: object.conditions().to_vec(),
        }
    }
}

/// Sending half of a bounded condition channel
#[derive(Debug, Clone)]
pub struct ConditionSink {
    tx: mpsc::Sender<ConditionReport>,
}

impl ConditionSink {
    pub fn new(tx: mpsc::Sender<ConditionReport>) -> Self {
        Self { tx }
    }

    /// Create a sink and its receiver with room for `capacity` reports
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ConditionReport>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Publish without waiting; returns whether the report was accepted
    pub fn publish(&self, report: ConditionReport) -> bool {
        match self.tx.try_send(report) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
        }
    }
}
