//! Logger seam for the control loop
//!
//! The engine writes through an injected [`Logger`] instead of a
//! process-wide sink, so embedders decide where loop diagnostics go.

/// Destination for control loop diagnostics
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);

    fn info(&self, message: &str);

    fn error(&self, message: &str);
}

/// Forwards to `tracing` under the `control_loop` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(target: "control_loop", "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(target: "control_loop", "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(target: "control_loop", "{}", message);
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str) {}

    fn info(&self, _message: &str) {}

    fn error(&self, _message: &str) {}
}
