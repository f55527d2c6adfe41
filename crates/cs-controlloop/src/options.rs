//! Control loop construction options

use std::marker::PhantomData;
use std::sync::Arc;

use cs_core::config::ControlLoopConfig;

use crate::control_loop::{ControlLoop, Reconcile};
use crate::logger::{Logger, TracingLogger};
use crate::queue::{ExponentialFailureRateLimiter, RateLimiter, WorkQueue};
use crate::resource::ResourceObject;
use crate::sink::ConditionSink;
use crate::storage::{Storage, Storages};

/// Builder for a [`ControlLoop`]
///
/// Every option has a default: a [`TracingLogger`], one worker, the
/// default exponential rate limiter, no condition sink and a private
/// storage registry.
pub struct ControlLoopBuilder<T: ResourceObject> {
    reconciler: Arc<dyn Reconcile<T>>,
    logger: Arc<dyn Logger>,
    concurrency: usize,
    rate_limiter: Option<Box<dyn RateLimiter>>,
    condition_sink: Option<ConditionSink>,
    storages: Option<Arc<Storages>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ResourceObject> ControlLoopBuilder<T> {
    pub(crate) fn new(reconciler: Arc<dyn Reconcile<T>>) -> Self {
        Self {
            reconciler,
            logger: Arc::new(TracingLogger),
            concurrency: 1,
            rate_limiter: None,
            condition_sink: None,
            storages: None,
            _marker: PhantomData,
        }
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Number of workers; zero is treated as one
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Backoff policy for failed reconciles
    ///
    /// Only applies when the loop creates its storage. A storage found in
    /// a shared registry keeps the queue it was built with.
    pub fn rate_limiter(mut self, rate_limiter: Box<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn condition_sink(mut self, sink: ConditionSink) -> Self {
        self.condition_sink = Some(sink);
        self
    }

    /// Share a storage registry with other loops
    pub fn storages(mut self, storages: Arc<Storages>) -> Self {
        self.storages = Some(storages);
        self
    }

    /// Apply worker count and backoff from configuration
    pub fn from_config(self, config: &ControlLoopConfig) -> Self {
        self.concurrency(config.effective_concurrency())
            .rate_limiter(Box::new(ExponentialFailureRateLimiter::from_config(
                &config.rate_limiter,
            )))
    }

    pub fn build(self) -> ControlLoop<T> {
        let storages = self.storages.unwrap_or_default();
        let storage = match storages.get::<T>() {
            Some(existing) => existing,
            None => {
                let rate_limiter = self
                    .rate_limiter
                    .unwrap_or_else(|| Box::new(ExponentialFailureRateLimiter::default()));
                let storage = Arc::new(Storage::new(WorkQueue::with_rate_limiter(rate_limiter)));
                storages.set(Arc::clone(&storage));
                storage
            }
        };

        ControlLoop::from_parts(
            self.reconciler,
            storage,
            self.logger,
            self.condition_sink,
            self.concurrency,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_loop::{ReconcileContext, ReconcileResult};
    use crate::resource::Resource;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Reconcile<Resource> for Noop {
        async fn reconcile(
            &self,
            _ctx: &ReconcileContext,
            _object: &mut Resource,
        ) -> anyhow::Result<ReconcileResult> {
            Ok(ReconcileResult::done())
        }
    }

    #[test]
    fn test_defaults() {
        let control_loop = ControlLoop::builder(Noop).build();
        assert_eq!(control_loop.concurrency(), 1);
        assert!(control_loop.storage().is_empty());
    }

    #[test]
    fn test_zero_concurrency_is_one() {
        let control_loop = ControlLoop::builder(Noop).concurrency(0).build();
        assert_eq!(control_loop.concurrency(), 1);
    }

    #[test]
    fn test_from_config() {
        let mut config = ControlLoopConfig::default();
        config.concurrency = 4;
        let control_loop = ControlLoop::builder(Noop).from_config(&config).build();
        assert_eq!(control_loop.concurrency(), 4);
    }

    #[test]
    fn test_shared_registry_reuses_storage() {
        let storages = Arc::new(Storages::new());
        let first = ControlLoop::builder(Noop)
            .storages(Arc::clone(&storages))
            .build();
        let second = ControlLoop::builder(Noop)
            .storages(Arc::clone(&storages))
            .build();

        assert!(Arc::ptr_eq(first.storage(), second.storage()));
        assert_eq!(storages.len(), 1);
    }
}
