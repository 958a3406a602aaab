use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::orchestrator::WorkflowStatus;
use crate::report::BatchReport;
use crate::workflows::WorkflowId;

/// Shared stop flag. Workflow bodies poll it between files.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives progress from workflow workers.
///
/// Methods are called on the worker thread. Implementations that drive a single-threaded UI
/// must forward the events to their own loop. All methods default to no-ops.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, _id: WorkflowId, _percent: f32, _message: &str) {}
    fn on_finished(&self, _id: WorkflowId, _status: WorkflowStatus, _report: Option<&BatchReport>) {}
}

/// No-op sink for silent operation.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {}

/// What a workflow body gets to report progress and observe cancellation.
#[derive(Clone)]
pub struct Progress {
    id: WorkflowId,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelToken,
}

impl Progress {
    pub fn new(id: WorkflowId, sink: Arc<dyn ProgressSink>, cancel: CancelToken) -> Self {
        Self { id, sink, cancel }
    }

    /// A handle that reports nowhere and is never cancelled.
    pub fn silent(id: WorkflowId) -> Self {
        Self::new(id, Arc::new(SilentProgress), CancelToken::new())
    }

    pub fn report(&self, percent: f32, message: impl AsRef<str>) {
        self.sink.on_progress(self.id, percent.clamp(0.0, 100.0), message.as_ref());
    }

    /// Report step `done` of `total` mapped onto the `from..to` percent range.
    pub fn step(&self, from: f32, to: f32, done: usize, total: usize, message: impl AsRef<str>) {
        let fraction = if total == 0 { 1.0 } else { done as f32 / total as f32 };
        self.report(from + (to - from) * fraction, message);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(f32, String)>>);

    impl ProgressSink for Recorder {
        fn on_progress(&self, _id: WorkflowId, percent: f32, message: &str) {
            self.0.lock().unwrap().push((percent, message.to_string()));
        }
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn step_maps_onto_range() {
        let recorder = Arc::new(Recorder::default());
        let progress = Progress::new(WorkflowId::EncodingFix, recorder.clone(), CancelToken::new());

        progress.step(10.0, 90.0, 1, 4, "one");
        progress.step(10.0, 90.0, 0, 0, "none");
        progress.report(150.0, "over");

        let events = recorder.0.lock().unwrap();
        assert_eq!(events[0], (30.0, "one".to_string()));
        assert_eq!(events[1].0, 90.0);
        assert_eq!(events[2].0, 100.0);
    }
}
