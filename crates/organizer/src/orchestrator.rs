//! Owns the workflow catalogue, one run state per workflow, and the execution history.
//!
//! Each workflow id moves `Idle -> Running -> {Completed | Failed | Cancelled}` and stays in its
//! terminal state until [`Orchestrator::reset`]. Status and history live behind mutexes shared with
//! the worker threads; progress goes straight from the worker to the [`ProgressSink`].

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn, Span};

use crate::error::{ResetError, StartError, WorkflowError};
use crate::progress::{CancelToken, Progress, ProgressSink, SilentProgress};
use crate::report::BatchReport;
use crate::workflows::{Execute, Workflow, WorkflowContext, WorkflowId};

/// Default bound on how long [`Orchestrator::shutdown`] waits for workers.
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(5);

const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    Start,
    End,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub workflow: WorkflowId,
    pub event: HistoryEvent,
    pub success: Option<bool>,
    pub message: String,
    #[serde(default)]
    pub stats: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInfo {
    pub id: WorkflowId,
    pub name: &'static str,
    pub description: &'static str,
    pub status: WorkflowStatus,
    pub can_execute: bool,
    pub requires_library: bool,
}

/// Returned when an asynchronous start was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub id: WorkflowId,
    pub message: String,
}

#[derive(Default)]
struct RunState {
    status: WorkflowStatus,
    cancel: CancelToken,
    /// Set from claim until the body's outcome is stored, whether the body runs on a worker or
    /// on the caller's thread, and whether or not a stop was requested.
    active: bool,
    worker: Option<JoinHandle<()>>,
    last_report: Option<BatchReport>,
}

impl RunState {
    fn is_busy(&self) -> bool {
        self.active
    }
}

#[derive(Default)]
struct Shared {
    runs: Mutex<HashMap<WorkflowId, RunState>>,
    history: Mutex<Vec<HistoryEntry>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<MutexGuard<'_, T>>| {
        warn!("orchestrator lock was poisoned, recovering inner value");
        poisoned.into_inner()
    })
}

impl Shared {
    fn record(&self, workflow: WorkflowId, event: HistoryEvent, report: Option<&BatchReport>, message: String) {
        lock(&self.history).push(HistoryEntry {
            timestamp: Utc::now(),
            workflow,
            event,
            success: report.map(|r| r.success),
            message,
            stats: report.map(|r| r.stats.clone()).unwrap_or_default(),
        });
    }

    /// Store the outcome of a run. A stop request that arrived meanwhile keeps `Cancelled`.
    fn finish(&self, id: WorkflowId, report: &BatchReport) -> WorkflowStatus {
        let mut runs = lock(&self.runs);
        let state = runs.entry(id).or_default();
        state.status = match state.status {
            WorkflowStatus::Cancelled => WorkflowStatus::Cancelled,
            _ if report.cancelled => WorkflowStatus::Cancelled,
            _ if report.success => WorkflowStatus::Completed,
            _ => WorkflowStatus::Failed,
        };
        state.last_report = Some(report.clone());
        state.active = false;
        state.status
    }
}

/// One workflow body run, shared by the worker thread and the synchronous path.
struct Job {
    workflow: Workflow,
    ctx: WorkflowContext,
    progress: Progress,
    sink: Arc<dyn ProgressSink>,
    shared: Arc<Shared>,
}

impl Job {
    fn run(self) -> BatchReport {
        let id = self.workflow.id();
        self.shared
            .record(id, HistoryEvent::Start, None, format!("{} started", id.name()));
        info!(workflow = %id, "started");

        let report = match catch_unwind(AssertUnwindSafe(|| self.workflow.execute(&self.ctx, &self.progress))) {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => BatchReport::failed(e.to_string()),
            Err(payload) => BatchReport::failed(WorkflowError::Panicked(panic_message(&*payload)).to_string()),
        };

        let status = self.shared.finish(id, &report);
        let event = match status {
            WorkflowStatus::Failed => HistoryEvent::Error,
            _ => HistoryEvent::End,
        };
        self.shared.record(id, event, Some(&report), report.message.clone());

        match status {
            WorkflowStatus::Failed => warn!(workflow = %id, error = %report.message, "failed"),
            _ => info!(workflow = %id, %status, message = %report.message, "finished"),
        }
        self.sink.on_finished(id, status, Some(&report));
        report
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

pub struct Orchestrator {
    ctx: WorkflowContext,
    sink: Arc<dyn ProgressSink>,
    shared: Arc<Shared>,
    span: Span,
}

impl Orchestrator {
    pub fn new(ctx: WorkflowContext) -> Self {
        Self::with_sink(ctx, Arc::new(SilentProgress))
    }

    /// The span current at construction becomes the parent of every worker's span.
    pub fn with_sink(ctx: WorkflowContext, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            ctx,
            sink,
            shared: Arc::default(),
            span: Span::current(),
        }
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    fn check_library(&self, id: WorkflowId) -> Result<(), StartError> {
        let root = self.ctx.library_path();
        if id.requires_library() && !root.is_dir() {
            return Err(StartError::LibraryMissing(root.display().to_string()));
        }
        Ok(())
    }

    /// Mark a run state as running under a fresh stop flag.
    fn claim(state: &mut RunState) -> CancelToken {
        let cancel = CancelToken::new();
        state.status = WorkflowStatus::Running;
        state.active = true;
        state.cancel = cancel.clone();
        state.last_report = None;
        cancel
    }

    fn job(&self, workflow: Workflow, cancel: CancelToken) -> Job {
        Job {
            progress: Progress::new(workflow.id(), self.sink.clone(), cancel),
            workflow,
            ctx: self.ctx.clone(),
            sink: self.sink.clone(),
            shared: self.shared.clone(),
        }
    }

    /// Run `workflow` on a worker thread and return as soon as it is accepted.
    pub fn start(&self, workflow: Workflow) -> Result<Accepted, StartError> {
        let id = workflow.id();
        self.check_library(id)?;

        let mut runs = lock(&self.shared.runs);
        let state = runs.entry(id).or_default();
        if state.is_busy() {
            return Err(StartError::AlreadyRunning(id));
        }
        let previous = state.status;
        let job = self.job(workflow, Self::claim(state));
        let span = info_span!(parent: &self.span, "workflow", id = %id);

        let spawned = thread::Builder::new()
            .name(format!("workflow-{id}"))
            .spawn(move || {
                let _entered = span.enter();
                job.run();
            });

        match spawned {
            Ok(handle) => {
                state.worker = Some(handle);
                Ok(Accepted {
                    id,
                    message: format!("{} started", id.name()),
                })
            }
            Err(e) => {
                state.status = previous;
                state.active = false;
                warn!(workflow = %id, error = %e, "failed to spawn worker");
                Err(StartError::Spawn(e.to_string()))
            }
        }
    }

    /// Run `workflow` on the calling thread. Refused while any workflow is running.
    pub fn execute(&self, workflow: Workflow) -> Result<BatchReport, StartError> {
        let id = workflow.id();
        self.check_library(id)?;

        let cancel = {
            let mut runs = lock(&self.shared.runs);
            if let Some((&running, _)) = runs.iter().find(|(_, s)| s.is_busy()) {
                return Err(if running == id {
                    StartError::AlreadyRunning(id)
                } else {
                    StartError::OtherRunning { requested: id, running }
                });
            }
            Self::claim(runs.entry(id).or_default())
        };

        let _entered = info_span!(parent: &self.span, "workflow", id = %id).entered();
        Ok(self.job(workflow, cancel).run())
    }

    /// Ask a running workflow to stop. The id is marked `Cancelled` at once; the body stops at
    /// its next per-file check. Returns whether anything was running.
    pub fn stop(&self, id: WorkflowId) -> bool {
        let mut runs = lock(&self.shared.runs);
        let Some(state) = runs.get_mut(&id).filter(|s| s.status == WorkflowStatus::Running) else {
            return false;
        };
        state.cancel.cancel();
        state.status = WorkflowStatus::Cancelled;
        info!(workflow = %id, "stop requested");
        true
    }

    /// Return a finished workflow to `Idle`.
    pub fn reset(&self, id: WorkflowId) -> Result<(), ResetError> {
        let mut runs = lock(&self.shared.runs);
        let Some(state) = runs.get_mut(&id) else {
            return Ok(());
        };
        if state.is_busy() {
            return Err(ResetError::Running(id));
        }
        if !state.status.is_terminal() {
            return Ok(());
        }
        if let Some(worker) = state.worker.take() {
            let _ = worker.join();
        }
        state.status = WorkflowStatus::Idle;
        Ok(())
    }

    pub fn status(&self, id: WorkflowId) -> WorkflowStatus {
        lock(&self.shared.runs)
            .get(&id)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    /// The most recent `limit` history entries, oldest first. `None` returns everything.
    pub fn history(&self, limit: Option<usize>) -> Vec<HistoryEntry> {
        let history = lock(&self.shared.history);
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history[skip..].to_vec()
    }

    pub fn last_report(&self, id: WorkflowId) -> Option<BatchReport> {
        lock(&self.shared.runs).get(&id).and_then(|s| s.last_report.clone())
    }

    pub fn available_workflows(&self) -> Vec<WorkflowInfo> {
        let runs = lock(&self.shared.runs);
        WorkflowId::ALL
            .into_iter()
            .map(|id| {
                let state = runs.get(&id);
                let busy = state.is_some_and(RunState::is_busy);
                let ready = !id.requires_library() || self.ctx.library_path().is_dir();
                WorkflowInfo {
                    id,
                    name: id.name(),
                    description: id.description(),
                    status: state.map(|s| s.status).unwrap_or_default(),
                    can_execute: ready && !busy,
                    requires_library: id.requires_library(),
                }
            })
            .collect()
    }

    /// Block until the run of `id` returns or `timeout` elapses, then report the status.
    pub fn wait(&self, id: WorkflowId, timeout: Duration) -> WorkflowStatus {
        let deadline = Instant::now() + timeout;
        loop {
            let mut runs = lock(&self.shared.runs);
            let Some(state) = runs.get_mut(&id) else {
                return WorkflowStatus::Idle;
            };
            if !state.is_busy() {
                if let Some(worker) = state.worker.take() {
                    let _ = worker.join();
                }
                return state.status;
            }
            drop(runs);

            if Instant::now() >= deadline {
                return self.status(id);
            }
            thread::sleep(POLL);
        }
    }

    /// Stop every running workflow and wait up to `wait` for the workers.
    ///
    /// Workers still running at the deadline are detached and left to finish on their own; their
    /// ids stay busy until they do. Returns the ids that were abandoned.
    pub fn shutdown(&self, wait: Duration) -> Vec<WorkflowId> {
        for id in WorkflowId::ALL {
            self.stop(id);
        }

        let mut workers: Vec<(WorkflowId, JoinHandle<()>)> = lock(&self.shared.runs)
            .iter_mut()
            .filter_map(|(id, state)| state.worker.take().map(|w| (*id, w)))
            .collect();

        let deadline = Instant::now() + wait;
        while workers.iter().any(|(_, w)| !w.is_finished()) && Instant::now() < deadline {
            thread::sleep(POLL);
        }

        let mut abandoned = Vec::new();
        for (id, worker) in workers.drain(..) {
            if worker.is_finished() {
                let _ = worker.join();
            } else {
                warn!(workflow = %id, "worker did not stop in time; abandoning it");
                abandoned.push(id);
            }
        }
        info!(abandoned = abandoned.len(), "orchestrator shut down");
        abandoned
    }
}
