//! Extraction supervisor: a self-healing pool of worker processes
//!
//! Every worker lives in a slot addressed by a stable [`WorkerId`]. A slot's
//! process can be replaced at any time (timeout, crash, broken pipe); the
//! replacement gets a new generation so late output from the old process is
//! ignored. Each task reaches exactly one terminal state per call.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::deadline::{DeadlinePolicy, PageScaledDeadline};
use super::protocol::{decode_event, encode_line, ExtractionOutcome, TaskId, WorkerEvent, WorkerRequest};
use crate::config::{ExtractionConfig, ReaderConfig};
use crate::error::{Error, Result};

/// Error recorded for paths that do not exist
pub const INVALID_PATH_ERROR: &str = "Path skipped or invalid";

/// Error recorded when the whole pool is gone
pub const NO_WORKER_ERROR: &str = "no extraction worker available";

const PROGRESS_EVERY: usize = 10;

/// Stable slot address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the command that starts one worker process
pub trait LaunchWorker: Send + Sync {
    fn command(&self, worker: WorkerId) -> Command;
}

/// Launches `<program> worker --worker-id N --reader-config <json>`
#[derive(Debug, Clone)]
pub struct WorkerBinary {
    program: PathBuf,
    reader_config: String,
}

impl WorkerBinary {
    pub fn new(program: impl Into<PathBuf>, reader: &ReaderConfig) -> Result<Self> {
        Ok(Self {
            program: program.into(),
            reader_config: serde_json::to_string(reader)?,
        })
    }

    /// Re-launch the running executable in worker mode
    pub fn current_exe(reader: &ReaderConfig) -> Result<Self> {
        Self::new(std::env::current_exe()?, reader)
    }
}

impl LaunchWorker for WorkerBinary {
    fn command(&self, worker: WorkerId) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg("worker")
            .arg("--worker-id")
            .arg(worker.to_string())
            .arg("--reader-config")
            .arg(&self.reader_config);
        command
    }
}

/// Result of extracting one path
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionResult {
    pub path: PathBuf,
    pub outcome: ExtractionOutcome,
    pub page_count: u32,
    pub duration: Duration,
}

impl ExtractionResult {
    fn failed(path: &Path, error: impl Into<String>, page_count: u32, duration: Duration) -> Self {
        Self {
            path: path.to_path_buf(),
            outcome: ExtractionOutcome::failed(error),
            page_count,
            duration,
        }
    }
}

/// One line (or end of stream) from a worker's stdout
#[derive(Debug)]
struct SlotMessage {
    worker: WorkerId,
    generation: u64,
    line: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Assignment {
    task_id: TaskId,
    task_index: usize,
    dispatched_at: Instant,
    started: Option<(Instant, u32)>,
}

struct WorkerSlot {
    generation: u64,
    child: Child,
    stdin: ChildStdin,
    stdout_task: JoinHandle<()>,
    assignment: Option<Assignment>,
}

/// Per-call bookkeeping
struct Batch {
    paths: Vec<PathBuf>,
    results: Vec<Option<ExtractionResult>>,
    queue: VecDeque<usize>,
    outstanding: usize,
    completed: usize,
}

impl Batch {
    fn new(paths: &[PathBuf]) -> Self {
        let mut seen = HashSet::new();
        let paths: Vec<PathBuf> = paths
            .iter()
            .filter(|p| seen.insert((*p).clone()))
            .cloned()
            .collect();
        let results = vec![None; paths.len()];
        Self {
            paths,
            results,
            queue: VecDeque::new(),
            outstanding: 0,
            completed: 0,
        }
    }

    fn record(&mut self, index: usize, result: ExtractionResult) {
        if self.results[index].is_some() {
            return;
        }
        self.results[index] = Some(result);
        self.outstanding -= 1;
        self.completed += 1;
        if self.completed % PROGRESS_EVERY == 0 || self.outstanding == 0 {
            tracing::info!("Extracted {}/{} files", self.completed, self.paths.len());
        }
    }

    fn fail(&mut self, index: usize, error: impl Into<String>, page_count: u32, duration: Duration) {
        let result = ExtractionResult::failed(&self.paths[index], error, page_count, duration);
        self.record(index, result);
    }
}

/// Supervisor owning the worker pool
pub struct ExtractionSupervisor {
    config: ExtractionConfig,
    launcher: Arc<dyn LaunchWorker>,
    policy: Arc<dyn DeadlinePolicy>,
    slots: Vec<Option<WorkerSlot>>,
    next_generation: u64,
    next_task_id: TaskId,
    events_tx: mpsc::UnboundedSender<SlotMessage>,
    events_rx: mpsc::UnboundedReceiver<SlotMessage>,
}

impl ExtractionSupervisor {
    /// Spawn the configured number of workers
    ///
    /// Must be called from within a Tokio runtime. Fails if any worker
    /// cannot be spawned.
    pub fn start(config: ExtractionConfig, launcher: Arc<dyn LaunchWorker>) -> Result<Self> {
        let policy = Arc::new(PageScaledDeadline::new(config.base_timeout()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pool_size = config.pool_size();

        let mut supervisor = Self {
            config,
            launcher,
            policy,
            slots: Vec::with_capacity(pool_size),
            next_generation: 0,
            next_task_id: 0,
            events_tx,
            events_rx,
        };
        for index in 0..pool_size {
            let slot = supervisor.spawn_slot(WorkerId(index))?;
            supervisor.slots.push(Some(slot));
        }

        tracing::info!(
            "Extraction supervisor started: {} workers, {}s base timeout",
            pool_size,
            supervisor.config.base_timeout_secs
        );
        Ok(supervisor)
    }

    /// Replace the deadline policy
    pub fn with_policy(mut self, policy: Arc<dyn DeadlinePolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Configured pool size
    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots whose worker process is currently alive
    pub fn live_workers(&mut self) -> usize {
        self.slots
            .iter_mut()
            .flatten()
            .map(|slot| matches!(slot.child.try_wait(), Ok(None)))
            .filter(|alive| *alive)
            .count()
    }

    /// Extract every path, returning one result per distinct path in submission order
    pub async fn extract(&mut self, paths: &[PathBuf]) -> Vec<ExtractionResult> {
        let mut batch = Batch::new(paths);
        batch.outstanding = batch.paths.len();
        tracing::info!("Extracting {} files with {} workers", batch.paths.len(), self.pool_size());

        for index in 0..batch.paths.len() {
            if batch.paths[index].is_file() {
                batch.queue.push_back(index);
            } else {
                tracing::warn!("Path skipped or invalid: {:?}", batch.paths[index]);
                batch.fail(index, INVALID_PATH_ERROR, 0, Duration::ZERO);
            }
        }

        self.refill_slots();

        while batch.outstanding > 0 {
            self.dispatch(&mut batch).await;

            if !self.has_live_slot() {
                while let Some(index) = batch.queue.pop_front() {
                    batch.fail(index, NO_WORKER_ERROR, 0, Duration::ZERO);
                }
                break;
            }

            if let Ok(Some(message)) =
                tokio::time::timeout(self.config.poll_interval(), self.events_rx.recv()).await
            {
                self.handle(message, &mut batch).await;
                while let Ok(message) = self.events_rx.try_recv() {
                    self.handle(message, &mut batch).await;
                }
            }

            self.check_deadlines(&mut batch).await;
        }

        batch
            .results
            .into_iter()
            .zip(batch.paths)
            .map(|(result, path)| {
                result.unwrap_or_else(|| {
                    ExtractionResult::failed(&path, NO_WORKER_ERROR, 0, Duration::ZERO)
                })
            })
            .collect()
    }

    /// Send the stop sentinel, wait out the grace period, then kill stragglers
    pub async fn shutdown(mut self) {
        let grace = self.config.shutdown_grace();
        let stop = encode_line(&WorkerRequest::Stop).unwrap_or_default();

        let mut stopping = Vec::new();
        for (index, slot) in self.slots.drain(..).enumerate() {
            let Some(mut slot) = slot else { continue };
            if slot.stdin.write_all(stop.as_bytes()).await.is_ok() {
                let _ = slot.stdin.flush().await;
            }
            // Closing stdin lets a worker that missed the sentinel see end of input
            drop(slot.stdin);
            stopping.push((index, slot.child, slot.stdout_task));
        }

        let exits = stopping.into_iter().map(|(index, mut child, stdout_task)| async move {
            if tokio::time::timeout(grace, child.wait()).await.is_err() {
                tracing::warn!("Worker {} ignored stop, killing", index);
                let _ = child.kill().await;
            }
            stdout_task.abort();
        });
        join_all(exits).await;
        tracing::info!("Extraction supervisor stopped");
    }

    fn spawn_slot(&mut self, id: WorkerId) -> Result<WorkerSlot> {
        let mut command = self.launcher.command(id);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| Error::WorkerSpawn {
            worker: id.0,
            message: e.to_string(),
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::internal("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("worker stdout was not captured"))?;

        self.next_generation += 1;
        let generation = self.next_generation;
        let tx = self.events_tx.clone();
        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = lines.next_line().await.ok().flatten();
                let eof = line.is_none();
                if tx.send(SlotMessage { worker: id, generation, line }).is_err() || eof {
                    break;
                }
            }
        });

        tracing::debug!("Spawned worker {} (generation {})", id, generation);
        Ok(WorkerSlot {
            generation,
            child,
            stdin,
            stdout_task,
            assignment: None,
        })
    }

    /// Kill the worker in a slot and put a fresh one in its place
    async fn replace(&mut self, id: WorkerId) {
        if let Some(mut old) = self.slots[id.0].take() {
            old.stdout_task.abort();
            if let Err(e) = old.child.kill().await {
                tracing::debug!("Worker {} already gone: {}", id, e);
            }
        }
        match self.spawn_slot(id) {
            Ok(slot) => self.slots[id.0] = Some(slot),
            Err(e) => tracing::error!("Could not respawn worker {}: {}", id, e),
        }
    }

    /// Retry slots left empty by a failed respawn
    fn refill_slots(&mut self) {
        for index in 0..self.slots.len() {
            if self.slots[index].is_none() {
                match self.spawn_slot(WorkerId(index)) {
                    Ok(slot) => self.slots[index] = Some(slot),
                    Err(e) => tracing::error!("Could not respawn worker {}: {}", index, e),
                }
            }
        }
    }

    fn has_live_slot(&self) -> bool {
        self.slots.iter().any(Option::is_some)
    }

    /// Hand queued tasks to idle workers
    async fn dispatch(&mut self, batch: &mut Batch) {
        for index in 0..self.slots.len() {
            let idle = matches!(&self.slots[index], Some(slot) if slot.assignment.is_none());
            if !idle {
                continue;
            }
            let Some(task_index) = batch.queue.pop_front() else {
                return;
            };

            self.next_task_id += 1;
            let task_id = self.next_task_id;
            let request = WorkerRequest::Task {
                task_id,
                path: batch.paths[task_index].clone(),
            };

            let sent = match (encode_line(&request), self.slots[index].as_mut()) {
                (Ok(line), Some(slot)) => match slot.stdin.write_all(line.as_bytes()).await {
                    Ok(()) => slot.stdin.flush().await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                },
                (Err(e), _) => Err(e.to_string()),
                (_, None) => Err(NO_WORKER_ERROR.to_string()),
            };

            match sent {
                Ok(()) => {
                    if let Some(slot) = self.slots[index].as_mut() {
                        slot.assignment = Some(Assignment {
                            task_id,
                            task_index,
                            dispatched_at: Instant::now(),
                            started: None,
                        });
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to send task to worker {}: {}", index, e);
                    batch.fail(task_index, format!("Worker write failed: {}", e), 0, Duration::ZERO);
                    self.replace(WorkerId(index)).await;
                }
            }
        }
    }

    async fn handle(&mut self, message: SlotMessage, batch: &mut Batch) {
        let id = message.worker;
        let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) else {
            return;
        };
        if slot.generation != message.generation {
            tracing::debug!("Ignoring stale output from worker {}", id);
            return;
        }

        let Some(line) = message.line else {
            // Worker exited
            let assignment = slot.assignment.take();
            if let Some(assignment) = assignment {
                let elapsed = assignment.dispatched_at.elapsed();
                match assignment.started {
                    None => {
                        tracing::error!("Worker {} exited before starting task {}", id, assignment.task_id);
                        batch.fail(
                            assignment.task_index,
                            format!("Timeout before start after {}s", secs(elapsed)),
                            0,
                            elapsed,
                        );
                    }
                    Some((_, pages)) => {
                        tracing::error!("Worker {} crashed during task {}", id, assignment.task_id);
                        batch.fail(
                            assignment.task_index,
                            format!("Worker crashed after {}s", secs(elapsed)),
                            pages,
                            elapsed,
                        );
                    }
                }
            } else {
                tracing::warn!("Worker {} exited while idle", id);
            }
            self.replace(id).await;
            return;
        };

        let event = match decode_event(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Worker {} sent malformed output: {}", id, e);
                return;
            }
        };

        match event {
            WorkerEvent::Started { task_id, page_count } => match slot.assignment.as_mut() {
                Some(assignment) if assignment.task_id == task_id => {
                    assignment.started = Some((Instant::now(), page_count));
                }
                _ => tracing::debug!("Worker {} started unknown task {}", id, task_id),
            },
            WorkerEvent::Finished {
                task_id,
                outcome,
                duration,
            } => match slot.assignment.filter(|a| a.task_id == task_id) {
                Some(assignment) => {
                    slot.assignment = None;
                    let page_count = assignment.started.map_or(0, |(_, pages)| pages);
                    let path = batch.paths[assignment.task_index].clone();
                    batch.record(
                        assignment.task_index,
                        ExtractionResult {
                            path,
                            outcome,
                            page_count,
                            duration,
                        },
                    );
                }
                None => tracing::debug!("Worker {} finished unknown task {}", id, task_id),
            },
        }
    }

    /// Kill and replace every worker whose task is past its deadline
    async fn check_deadlines(&mut self, batch: &mut Batch) {
        let now = Instant::now();
        let mut expired = Vec::new();

        for (index, slot) in self.slots.iter().enumerate() {
            let Some(assignment) = slot.as_ref().and_then(|s| s.assignment) else {
                continue;
            };
            let error = match assignment.started {
                Some((started_at, pages)) => {
                    let limit = self.policy.deadline(pages);
                    (now.duration_since(started_at) > limit)
                        .then(|| (format!("Timeout after {}s", secs(limit)), pages))
                }
                None => {
                    let limit = self.policy.start_deadline();
                    (now.duration_since(assignment.dispatched_at) > limit)
                        .then(|| (format!("Timeout before start after {}s", secs(limit)), 0))
                }
            };
            if let Some((error, pages)) = error {
                expired.push((index, assignment, error, pages));
            }
        }

        for (index, assignment, error, pages) in expired {
            tracing::error!(
                "Task {} on worker {} for {:?}: {}, replacing worker",
                assignment.task_id,
                index,
                batch.paths[assignment.task_index],
                error
            );
            batch.fail(
                assignment.task_index,
                error,
                pages,
                now.duration_since(assignment.dispatched_at),
            );
            self.replace(WorkerId(index)).await;
        }
    }
}

/// Seconds rounded to a tenth, without a trailing `.0`
fn secs(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 10.0).round() / 10.0
}
