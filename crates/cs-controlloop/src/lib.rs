//! cs-controlloop: In-memory reconciliation control loop
//!
//! A caller registers resources in a [`Storage`]; every registration pushes
//! the resource's key onto a deduplicating [`WorkQueue`]. A pool of workers
//! owned by the [`ControlLoop`] pulls keys off the queue, hands an isolated
//! copy of the resource to a user-supplied [`Reconcile`] implementation,
//! commits the copy back under a generation check and reschedules the key
//! according to the returned [`ReconcileResult`].
//!
//! Shutdown is two-phase: [`ControlLoop::stop`] flags the loop as stopping
//! and re-delivers every tracked resource. The next delivery of each one sets
//! its kill timestamp, and the delivery after that lets the reconcile function
//! tear the resource down and return a terminal result.

pub mod control_loop;
pub mod logger;
pub mod options;
pub mod queue;
pub mod resource;
pub mod sink;
pub mod storage;

pub use control_loop::{ControlLoop, Reconcile, ReconcileContext, ReconcileResult};
pub use logger::{Logger, NoopLogger, TracingLogger};
pub use options::ControlLoopBuilder;
pub use queue::{ExponentialFailureRateLimiter, MaxOfRateLimiter, RateLimiter, WorkQueue};
pub use resource::{Condition, Resource, ResourceObject};
pub use sink::{ConditionReport, ConditionSink};
pub use storage::{Storage, Storages};

pub use cs_core::{ConditionStatus, ObjectKey, StorageError};
