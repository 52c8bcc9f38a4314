//! Sinks for failures raised by user handler code.
//!
//! The run loop is infallible from the caller's perspective: every handler
//! failure is routed here and the processor keeps going. The processor still
//! advances its sequence past a failed event, so a poisoned slot can never
//! cause a replay storm.

use std::marker::PhantomData;

use crate::pipeline::PipelineError;

/// Receives failures from handler callbacks, isolating the run loop from
/// user code.
pub trait ExceptionHandler<T>: Send + Sync {
    /// A per-event handler returned an error for `sequence`.
    fn handle_event_exception(&self, error: PipelineError, sequence: i64, event: &T);

    /// A batch handler returned an error for the inclusive range
    /// `[start_sequence, end_sequence]`.
    fn handle_batch_exception(&self, error: PipelineError, start_sequence: i64, end_sequence: i64) {
        tracing::error!(
            start_sequence,
            end_sequence,
            %error,
            "batch handler failed"
        );
    }

    /// An `on_timeout` callback returned an error.
    fn handle_timeout_exception(&self, error: PipelineError, sequence: i64) {
        tracing::error!(sequence, %error, "timeout handler failed");
    }

    /// An `on_start` callback returned an error; the processor still enters
    /// its run loop.
    fn handle_start_exception(&self, error: PipelineError);

    /// An `on_shutdown` callback returned an error; the processor still
    /// transitions to idle.
    fn handle_shutdown_exception(&self, error: PipelineError);
}

/// Default policy: log through `tracing` and continue.
#[derive(Debug, Default)]
pub struct LoggingExceptionHandler<T> {
    _marker: PhantomData<T>,
}

impl<T> LoggingExceptionHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync> ExceptionHandler<T> for LoggingExceptionHandler<T> {
    fn handle_event_exception(&self, error: PipelineError, sequence: i64, _event: &T) {
        tracing::error!(sequence, %error, "event handler failed");
    }

    fn handle_start_exception(&self, error: PipelineError) {
        tracing::error!(%error, "handler failed during processor startup");
    }

    fn handle_shutdown_exception(&self, error: PipelineError) {
        tracing::error!(%error, "handler failed during processor shutdown");
    }
}

/// Swallows every failure. Mainly useful when measuring raw loop overhead.
#[derive(Debug, Default)]
pub struct IgnoreExceptionHandler<T> {
    _marker: PhantomData<T>,
}

impl<T> IgnoreExceptionHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync> ExceptionHandler<T> for IgnoreExceptionHandler<T> {
    fn handle_event_exception(&self, _error: PipelineError, _sequence: i64, _event: &T) {}

    fn handle_batch_exception(
        &self,
        _error: PipelineError,
        _start_sequence: i64,
        _end_sequence: i64,
    ) {
    }

    fn handle_timeout_exception(&self, _error: PipelineError, _sequence: i64) {}

    fn handle_start_exception(&self, _error: PipelineError) {}

    fn handle_shutdown_exception(&self, _error: PipelineError) {}
}

/// Fails fast: panics the processor thread on any handler error.
#[derive(Debug, Default)]
pub struct PanicExceptionHandler<T> {
    _marker: PhantomData<T>,
}

impl<T> PanicExceptionHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync> ExceptionHandler<T> for PanicExceptionHandler<T> {
    fn handle_event_exception(&self, error: PipelineError, sequence: i64, _event: &T) {
        panic!("event handler failed at sequence {sequence}: {error}");
    }

    fn handle_batch_exception(&self, error: PipelineError, start_sequence: i64, end_sequence: i64) {
        panic!("batch handler failed for [{start_sequence}, {end_sequence}]: {error}");
    }

    fn handle_timeout_exception(&self, error: PipelineError, sequence: i64) {
        panic!("timeout handler failed at sequence {sequence}: {error}");
    }

    fn handle_start_exception(&self, error: PipelineError) {
        panic!("handler failed during startup: {error}");
    }

    fn handle_shutdown_exception(&self, error: PipelineError) {
        panic!("handler failed during shutdown: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logging_handler_never_panics() {
        let handler = LoggingExceptionHandler::<i64>::new();
        handler.handle_event_exception(PipelineError::Handler("boom".into()), 1, &42);
        handler.handle_batch_exception(PipelineError::Handler("boom".into()), 0, 3);
        handler.handle_timeout_exception(PipelineError::Handler("boom".into()), -1);
        handler.handle_start_exception(PipelineError::Handler("boom".into()));
        handler.handle_shutdown_exception(PipelineError::Handler("boom".into()));
    }

    #[test]
    fn ignore_handler_swallows_everything() {
        let handler = IgnoreExceptionHandler::<i64>::new();
        handler.handle_event_exception(PipelineError::Handler("boom".into()), 1, &42);
        handler.handle_shutdown_exception(PipelineError::Handler("boom".into()));
    }

    #[test]
    #[should_panic(expected = "event handler failed at sequence 7")]
    fn panic_handler_fails_fast() {
        let handler = PanicExceptionHandler::<i64>::new();
        handler.handle_event_exception(PipelineError::Handler("boom".into()), 7, &42);
    }
}
