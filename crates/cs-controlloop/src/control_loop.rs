//! The reconciliation engine
//!
//! A [`ControlLoop`] owns a fixed pool of workers. Each worker repeatedly
//! takes the next ready resource from the storage, reconciles an isolated
//! copy, commits it under a generation check and reschedules the key from
//! the returned [`ReconcileResult`].

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use futures::FutureExt;
use tokio::task::JoinHandle;

use cs_core::{ObjectKey, StorageError};

use crate::logger::Logger;
use crate::options::ControlLoopBuilder;
use crate::queue::WorkQueue;
use crate::resource::ResourceObject;
use crate::sink::{ConditionReport, ConditionSink};
use crate::storage::Storage;

/// Scheduling directive returned by a reconcile
///
/// A positive `requeue_after` wins over `requeue`. The default value is
/// terminal: the resource is finalized and never delivered again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    pub requeue_after: Duration,
    pub requeue: bool,
}

impl ReconcileResult {
    /// Terminal result
    pub fn done() -> Self {
        Self::default()
    }

    /// Deliver again as soon as a worker is free
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            ..Self::default()
        }
    }

    /// Deliver again after `delay`
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue_after: delay,
            ..Self::default()
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.requeue_after.is_zero() && !self.requeue
    }
}

/// Per-delivery information handed to the reconcile function
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext {
    /// Index of the worker running this reconcile
    pub worker_id: usize,

    /// Whether the loop has begun shutting down
    pub stopping: bool,
}

/// User-supplied reconcile function
///
/// `object` is a private copy; any mutation is committed back to storage
/// once the call returns. A panic is contained by the engine and handled
/// like a returned error.
///
/// When the object carries a kill timestamp the implementation should tear
/// down whatever it manages and return a terminal result. The engine only
/// stops once every resource has been finalized.
#[async_trait]
pub trait Reconcile<T: ResourceObject>: Send + Sync + 'static {
    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        object: &mut T,
    ) -> anyhow::Result<ReconcileResult>;
}

struct Shared<T: ResourceObject> {
    reconciler: Arc<dyn Reconcile<T>>,
    storage: Arc<Storage<T>>,
    logger: Arc<dyn Logger>,
    sink: Option<ConditionSink>,
    stopping: AtomicBool,
}

/// Engine driving reconciliation of every resource in one storage
pub struct ControlLoop<T: ResourceObject> {
    shared: Arc<Shared<T>>,
    concurrency: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: ResourceObject> ControlLoop<T> {
    /// Start configuring a loop around `reconciler`
    pub fn builder(reconciler: impl Reconcile<T>) -> ControlLoopBuilder<T> {
        ControlLoopBuilder::new(Arc::new(reconciler))
    }

    /// Loop with default options
    pub fn new(reconciler: impl Reconcile<T>) -> Self {
        Self::builder(reconciler).build()
    }

    pub(crate) fn from_parts(
        reconciler: Arc<dyn Reconcile<T>>,
        storage: Arc<Storage<T>>,
        logger: Arc<dyn Logger>,
        sink: Option<ConditionSink>,
        concurrency: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                reconciler,
                storage,
                logger,
                sink,
                stopping: AtomicBool::new(false),
            }),
            concurrency: concurrency.max(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Storage the loop reconciles; register resources here
    pub fn storage(&self) -> &Arc<Storage<T>> {
        &self.shared.storage
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Spawn the worker pool and return immediately
    ///
    /// Must be called from within a Tokio runtime. Calling it again while
    /// workers are running has no effect.
    pub fn run(&self) {
        let mut workers = self.workers();
        if !workers.is_empty() {
            self.shared.logger.info("Control loop is already running");
            return;
        }

        self.shared.logger.info(&format!(
            "Starting control loop with {} worker(s)",
            self.concurrency
        ));
        for worker_id in 0..self.concurrency {
            let shared = Arc::clone(&self.shared);
            workers.push(tokio::spawn(run_worker(shared, worker_id)));
        }
    }

    /// Shut down gracefully and wait for every worker to exit
    ///
    /// Each tracked resource is delivered again to get its kill timestamp,
    /// then once more so the reconcile function can tear it down. Returns
    /// once all resources are finalized and the workers have drained.
    pub async fn stop(&self) {
        let handles = std::mem::take(&mut *self.workers());
        let queue = self.shared.storage.queue();

        self.shared.stopping.store(true, Ordering::SeqCst);
        if handles.is_empty() {
            queue.shut_down();
            return;
        }

        let tracked = queue.tracked_keys();
        if tracked.is_empty() {
            queue.shut_down_with_drain();
        } else {
            self.shared.logger.info(&format!(
                "Stopping control loop, {} resource(s) to finalize",
                tracked.len()
            ));
            for key in &tracked {
                queue.enqueue(key);
            }
            self.shared.finish_if_drained();
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                self.shared
                    .logger
                    .error(&format!("Control loop worker failed: {}", e));
            }
        }
        self.shared.logger.info("Control loop stopped");
    }

    fn workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_worker<T: ResourceObject>(shared: Arc<Shared<T>>, worker_id: usize) {
    shared
        .logger
        .debug(&format!("Worker {} started", worker_id));

    while let Some(next) = shared.storage.next_ready().await {
        match next {
            Ok(object) => shared.process(worker_id, object).await,
            Err(e) => {
                shared.logger.debug(&format!("Skipping delivery: {}", e));
                shared.queue().done(e.key());
            }
        }
        shared.finish_if_drained();
    }

    shared
        .logger
        .debug(&format!("Worker {} exited", worker_id));
}

impl<T: ResourceObject> Shared<T> {
    fn queue(&self) -> &WorkQueue {
        self.storage.queue()
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    async fn process(&self, worker_id: usize, mut object: T) {
        let key = object.name().clone();

        // Stale timers can still deliver a finalized key.
        if !self.queue().is_tracked(&key) {
            self.logger
                .debug(&format!("Skipping finalized resource {}", key));
            self.queue().done(&key);
            return;
        }

        if self.is_stopping() && object.kill_timestamp().is_none() {
            object.set_kill_timestamp(Local::now());
            self.flag_for_kill(&key, object);
            self.queue().done(&key);
            return;
        }

        let ctx = ReconcileContext {
            worker_id,
            stopping: self.is_stopping(),
        };
        let result = self.reconcile(&ctx, &mut object).await;

        if let Some(sink) = &self.sink {
            if !sink.publish(ConditionReport::from_object(&object)) {
                self.logger
                    .debug(&format!("Dropped condition report for {}", key));
            }
        }

        match self.storage.commit(object) {
            Err(StorageError::KeyNotExist(_)) => {
                self.logger
                    .debug(&format!("Resource {} was deleted during reconcile", key));
                self.queue().finalize(&key);
            }
            Err(e @ StorageError::AlreadyUpdated { .. }) if result.is_ok() => {
                self.logger.debug(&format!("{}, reconciling again", e));
                self.queue().enqueue(&key);
            }
            Err(e) => {
                self.logger.debug(&e.to_string());
                self.schedule(&key, result);
            }
            Ok(_) => self.schedule(&key, result),
        }

        self.queue().done(&key);
    }

    /// Persist a kill timestamp; the commit re-adds the key so the
    /// teardown delivery follows once this one is done
    fn flag_for_kill(&self, key: &ObjectKey, object: T) {
        match self.storage.update(object) {
            Ok(generation) => self.logger.info(&format!(
                "Marked {} for termination (generation {})",
                key, generation
            )),
            Err(StorageError::AlreadyUpdated { .. }) => {
                self.logger.debug(&format!(
                    "Resource {} changed before it could be marked, retrying",
                    key
                ));
                self.queue().enqueue(key);
            }
            Err(StorageError::KeyNotExist(_)) => {
                self.logger
                    .debug(&format!("Resource {} was deleted before termination", key));
            }
        }
    }

    async fn reconcile(
        &self,
        ctx: &ReconcileContext,
        object: &mut T,
    ) -> anyhow::Result<ReconcileResult> {
        match AssertUnwindSafe(self.reconciler.reconcile(ctx, object))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "Recovered from panic: {}",
                panic_message(panic.as_ref())
            )),
        }
    }

    fn schedule(&self, key: &ObjectKey, result: anyhow::Result<ReconcileResult>) {
        let queue = self.queue();
        match result {
            Err(e) => {
                self.logger
                    .error(&format!("Reconcile of {} failed: {:#}", key, e));
                queue.add_rate_limited(key);
            }
            Ok(directive) => {
                queue.forget(key);
                if !directive.requeue_after.is_zero() {
                    queue.add_after(key, directive.requeue_after);
                } else if directive.requeue {
                    queue.add(key);
                } else {
                    self.logger.info(&format!("Resource {} finalized", key));
                    queue.finalize(key);
                }
            }
        }
    }

    /// Drain the queue once stopping and nothing is left to finalize
    fn finish_if_drained(&self) {
        let queue = self.queue();
        if self.is_stopping() && queue.tracked_len() == 0 && !queue.is_shutting_down() {
            self.logger.info("All resources finalized, draining queue");
            queue.shut_down_with_drain();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        assert!(ReconcileResult::done().is_terminal());
        assert!(!ReconcileResult::requeue().is_terminal());

        let later = ReconcileResult::requeue_after(Duration::from_secs(1));
        assert!(!later.is_terminal());
        assert!(!later.requeue);
        assert_eq!(later.requeue_after, Duration::from_secs(1));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
