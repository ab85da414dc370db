use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::Scope;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::cancel;
use crate::core::RunControl;
use crate::telemetry::profile;
use crate::telemetry::tags;
use crate::telemetry::worker::{DefaultStageTelemetry, StageTelemetry};
use crate::{Result, SealError};

/// Bounded-parallelism transform stage between two queues.
///
/// Workers pull from the input queue, apply the transform and push to the
/// output queue. Completion order is not preserved. Once the input queue is
/// closed and drained every worker exits, dropping its output sender, so the
/// output queue closes as soon as the last worker is gone.
pub struct StageRunner {
    name: &'static str,
    workers: usize,
    telemetry: Arc<dyn StageTelemetry>,
}

impl StageRunner {
    pub fn new(name: &'static str, workers: usize) -> Self {
        Self::with_telemetry(name, workers, Arc::new(DefaultStageTelemetry))
    }

    pub fn with_telemetry(
        name: &'static str,
        workers: usize,
        telemetry: Arc<dyn StageTelemetry>,
    ) -> Self {
        Self {
            name,
            workers: workers.max(1),
            telemetry,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn num_workers(&self) -> usize {
        self.workers
    }

    /// Spawns the stage workers inside `scope`.
    ///
    /// A transform error is recorded on `control`, which cancels the run. A
    /// panicking transform is reported as [`SealError::WorkerPanic`].
    pub fn spawn<'scope, 'env, I, O, F>(
        &self,
        scope: &'scope Scope<'scope, 'env>,
        input: Receiver<I>,
        output: Sender<O>,
        control: &'scope RunControl,
        transform: F,
    ) -> StageHandle
    where
        I: Send + 'scope,
        O: Send + 'scope,
        F: Fn(usize, I) -> Result<O> + Send + Sync + 'scope,
    {
        let state = Arc::new(StageState::new(self.name, self.workers));
        let transform = Arc::new(transform);

        tracing::debug!(
            target: tags::LOG_STAGE,
            stage = self.name,
            workers = self.workers,
            "spawning stage workers"
        );

        for worker_id in 0..self.workers {
            let worker = Worker {
                id: worker_id,
                state: Arc::clone(&state),
                telemetry: Arc::clone(&self.telemetry),
                input: input.clone(),
                output: output.clone(),
                control,
                transform: Arc::clone(&transform),
            };
            scope.spawn(move || worker.run());
        }

        StageHandle { state }
    }
}

struct StageState {
    name: &'static str,
    started_at: Instant,
    completed: AtomicUsize,
    failed: AtomicUsize,
    task_counts: Vec<AtomicUsize>,
    worker_started_offsets_us: Vec<AtomicU64>,
    worker_stopped_offsets_us: Vec<AtomicU64>,
    worker_busy_us: Vec<AtomicU64>,
}

impl StageState {
    fn new(name: &'static str, workers: usize) -> Self {
        let counters = || (0..workers).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        Self {
            name,
            started_at: Instant::now(),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            task_counts: (0..workers).map(|_| AtomicUsize::new(0)).collect(),
            worker_started_offsets_us: counters(),
            worker_stopped_offsets_us: counters(),
            worker_busy_us: counters(),
        }
    }

    // Offsets are stored +1 so zero means "not yet".
    fn mark_offset(&self, slots: &[AtomicU64], worker_id: usize) {
        let offset = profile::elapsed_us(self.started_at);
        slots[worker_id].store(offset.saturating_add(1), Ordering::Release);
    }
}

struct Worker<'scope, I, O, F> {
    id: usize,
    state: Arc<StageState>,
    telemetry: Arc<dyn StageTelemetry>,
    input: Receiver<I>,
    output: Sender<O>,
    control: &'scope RunControl,
    transform: Arc<F>,
}

impl<I, O, F> Worker<'_, I, O, F>
where
    F: Fn(usize, I) -> Result<O>,
{
    fn run(self) {
        let stage = self.state.name;
        self.state
            .mark_offset(&self.state.worker_started_offsets_us, self.id);

        loop {
            let item = match cancel::recv(&self.input, self.control.token()) {
                Ok(Some(item)) => item,
                Ok(None) | Err(_) => break,
            };

            self.telemetry.on_task_started(stage, self.id);
            let started_at = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| (self.transform)(self.id, item)))
                .unwrap_or_else(|_| Err(SealError::WorkerPanic { stage }));
            let elapsed = started_at.elapsed();
            self.state.worker_busy_us[self.id]
                .fetch_add(profile::duration_us(elapsed), Ordering::AcqRel);

            match result {
                Ok(produced) => {
                    self.telemetry.on_task_finished(stage, self.id, elapsed);
                    self.state.completed.fetch_add(1, Ordering::AcqRel);
                    self.state.task_counts[self.id].fetch_add(1, Ordering::AcqRel);
                    if cancel::send(&self.output, produced, self.control.token()).is_err() {
                        break;
                    }
                }
                Err(error) => {
                    self.telemetry.on_task_failed(stage, self.id, elapsed);
                    self.state.failed.fetch_add(1, Ordering::AcqRel);
                    if !error.is_cancelled() {
                        tracing::debug!(
                            target: tags::LOG_STAGE,
                            stage,
                            worker_id = self.id,
                            %error,
                            "stage transform failed"
                        );
                    }
                    self.control.fail(error);
                    break;
                }
            }
        }

        self.state
            .mark_offset(&self.state.worker_stopped_offsets_us, self.id);
    }
}

/// Per-worker runtime metrics captured by a stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRuntimeSnapshot {
    pub worker_id: usize,
    pub tasks_completed: usize,
    pub uptime: Duration,
    pub busy: Duration,
    pub idle: Duration,
    pub utilization: f64,
}

/// Runtime metrics for one stage and each of its workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRuntimeSnapshot {
    pub stage: String,
    pub elapsed: Duration,
    pub completed: usize,
    pub failed: usize,
    pub workers: Vec<WorkerRuntimeSnapshot>,
}

/// Observer for a spawned stage. Workers are joined by the enclosing scope.
#[derive(Clone)]
pub struct StageHandle {
    state: Arc<StageState>,
}

impl StageHandle {
    pub fn completed_count(&self) -> usize {
        self.state.completed.load(Ordering::Acquire)
    }

    /// Per-worker processed task counts.
    pub fn worker_task_counts(&self) -> Vec<usize> {
        self.state
            .task_counts
            .iter()
            .map(|counter| counter.load(Ordering::Acquire))
            .collect()
    }

    pub fn runtime_snapshot(&self) -> StageRuntimeSnapshot {
        let elapsed = self.state.started_at.elapsed();
        let elapsed_us = profile::duration_us(elapsed);

        let workers = (0..self.state.task_counts.len())
            .map(|worker_id| {
                let started_raw =
                    self.state.worker_started_offsets_us[worker_id].load(Ordering::Acquire);
                let stopped_raw =
                    self.state.worker_stopped_offsets_us[worker_id].load(Ordering::Acquire);
                let busy_raw = self.state.worker_busy_us[worker_id].load(Ordering::Acquire);

                let start_us = started_raw.saturating_sub(1);
                let stop_us = if stopped_raw == 0 {
                    elapsed_us
                } else {
                    stopped_raw.saturating_sub(1)
                };
                let uptime_us = if started_raw == 0 {
                    0
                } else {
                    stop_us.saturating_sub(start_us)
                };
                let busy_us = busy_raw.min(uptime_us);
                let utilization = if uptime_us == 0 {
                    0.0
                } else {
                    busy_us as f64 / uptime_us as f64
                };

                WorkerRuntimeSnapshot {
                    worker_id,
                    tasks_completed: self.state.task_counts[worker_id].load(Ordering::Acquire),
                    uptime: Duration::from_micros(uptime_us),
                    busy: Duration::from_micros(busy_us),
                    idle: Duration::from_micros(uptime_us - busy_us),
                    utilization,
                }
            })
            .collect();

        StageRuntimeSnapshot {
            stage: self.state.name.to_string(),
            elapsed,
            completed: self.completed_count(),
            failed: self.state.failed.load(Ordering::Acquire),
            workers,
        }
    }
}
