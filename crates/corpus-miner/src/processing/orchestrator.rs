//! One processing run: cache delta, extraction, mining, persistence, topic model
//!
//! The orchestrator owns the single-flight guard. Its state moves
//! `idle -> running -> completed | failed | cancelled` and back to `running`
//! on the next run; a second concurrent run is rejected with
//! [`Error::AlreadyRunning`]. A run whose future is dropped before it
//! finishes ends as `cancelled`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::deadline::{DeadlinePolicy, PageScaledDeadline};
use super::supervisor::{ExtractionResult, ExtractionSupervisor, LaunchWorker, WorkerBinary};
use super::transform::apply_extraction;
use crate::config::MinerConfig;
use crate::error::{Error, Result};
use crate::mining::{MiningPipeline, MiningSummary};
use crate::storage::IncrementalCache;
use crate::topics::TopicModelTrainer;
use crate::types::{DocumentIdentity, DocumentInput, DocumentRecord, TopicModelOutput};

/// Run state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            4 => Self::Cancelled,
            _ => Self::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }
}

/// Holds the `running` state; dropping it unsettled marks the run cancelled
struct RunGuard<'a> {
    state: &'a AtomicU8,
    settled: bool,
}

impl RunGuard<'_> {
    fn settle(mut self, outcome: RunState) {
        self.state.store(outcome.as_u8(), Ordering::SeqCst);
        self.settled = true;
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.state.store(RunState::Cancelled.as_u8(), Ordering::SeqCst);
            tracing::warn!("Run abandoned before completion");
        }
    }
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Distinct documents submitted
    pub submitted: usize,
    /// Documents extracted and mined in this run
    pub extracted: usize,
    /// Documents served from the cache
    pub reused: usize,
    pub mining: MiningSummary,
    /// One record per distinct submitted document, in submission order
    pub records: Vec<DocumentRecord>,
    /// Model fitted over the whole accumulated cache
    pub topics: TopicModelOutput,
}

impl RunReport {
    pub fn failed(&self) -> impl Iterator<Item = &DocumentRecord> {
        self.records.iter().filter(|r| !r.is_ok())
    }
}

/// Drives processing runs against one cache
pub struct Orchestrator {
    config: MinerConfig,
    cache: IncrementalCache,
    launcher: Arc<dyn LaunchWorker>,
    policy: Arc<dyn DeadlinePolicy>,
    mining: MiningPipeline,
    trainer: TopicModelTrainer,
    state: AtomicU8,
    last_run_time: Mutex<Option<DateTime<Utc>>>,
}

impl Orchestrator {
    pub fn new(
        config: MinerConfig,
        cache: IncrementalCache,
        launcher: Arc<dyn LaunchWorker>,
    ) -> Result<Self> {
        let mining = MiningPipeline::new(config.mining.clone())?;
        let trainer = TopicModelTrainer::new(config.topics.clone());
        let policy = Arc::new(PageScaledDeadline::new(config.extraction.base_timeout()));
        Ok(Self {
            config,
            cache,
            launcher,
            policy,
            mining,
            trainer,
            state: AtomicU8::new(RunState::Idle.as_u8()),
            last_run_time: Mutex::new(None),
        })
    }

    /// Validate the configuration, open the configured cache and launch
    /// workers from the running executable
    pub fn from_config(config: MinerConfig) -> Result<Self> {
        config.validate()?;
        let cache = IncrementalCache::open(&config.cache.path)?;
        let launcher = Arc::new(WorkerBinary::current_exe(&config.reader)?);
        Self::new(config, cache, launcher)
    }

    /// Replace the default page-scaled extraction deadline
    pub fn with_deadline_policy(mut self, policy: Arc<dyn DeadlinePolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn status(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Start time of the most recent run attempt
    pub fn last_run_time(&self) -> Option<DateTime<Utc>> {
        *self.last_run_time.lock()
    }

    pub fn cache(&self) -> &IncrementalCache {
        &self.cache
    }

    /// Process a batch of documents
    pub async fn run(&self, inputs: &[DocumentInput]) -> Result<RunReport> {
        let guard = self.begin()?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        *self.last_run_time.lock() = Some(started_at);
        tracing::info!("Run {} started with {} documents", run_id, inputs.len());

        let result = self.execute(run_id, started_at, inputs).await;
        match &result {
            Ok(report) => {
                guard.settle(RunState::Completed);
                tracing::info!(
                    "Run {} completed: {} extracted, {} reused, {} topics",
                    run_id,
                    report.extracted,
                    report.reused,
                    report.topics.topics.len()
                );
            }
            Err(e) => {
                guard.settle(RunState::Failed);
                tracing::error!("Run {} failed: {}", run_id, e);
            }
        }
        result
    }

    fn begin(&self) -> Result<RunGuard<'_>> {
        let mut current = self.state.load(Ordering::SeqCst);
        loop {
            if current == RunState::Running.as_u8() {
                return Err(Error::AlreadyRunning);
            }
            match self.state.compare_exchange(
                current,
                RunState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    return Ok(RunGuard {
                        state: &self.state,
                        settled: false,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        started_at: DateTime<Utc>,
        inputs: &[DocumentInput],
    ) -> Result<RunReport> {
        if inputs.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut seen = HashSet::new();
        let inputs: Vec<&DocumentInput> = inputs
            .iter()
            .filter(|input| seen.insert(input.identity()))
            .collect();

        let mut cached = self.cache.load_all()?;
        let delta: Vec<&DocumentInput> = inputs
            .iter()
            .copied()
            .filter(|input| {
                cached
                    .get(&input.identity())
                    .map_or(true, |record| !record.matches_fingerprint(input))
            })
            .collect();
        tracing::info!(
            "Run {}: {} cached, {} of {} submitted documents need extraction",
            run_id,
            cached.len(),
            delta.len(),
            inputs.len()
        );

        let mut fresh: Vec<DocumentRecord> = delta.iter().map(|input| DocumentRecord::new(input)).collect();
        let mut mining = MiningSummary::default();
        if !fresh.is_empty() {
            let mut results = self.extract(&delta).await?;
            for record in fresh.iter_mut() {
                if let Some(result) = results.remove(&record.file_path) {
                    apply_extraction(record, result);
                }
            }
            mining = self.mining.mine(&mut fresh);
            self.cache.persist(&fresh)?;
        }

        let extracted = fresh.len();
        for record in fresh {
            cached.insert(record.identity.clone(), record);
        }

        let records: Vec<DocumentRecord> = inputs
            .iter()
            .filter_map(|input| cached.get(&input.identity()).cloned())
            .collect();

        let mut corpus: Vec<&DocumentRecord> = cached.values().collect();
        corpus.sort_by(|a, b| a.identity.cmp(&b.identity));
        let corpus: Vec<DocumentRecord> = corpus.into_iter().cloned().collect();
        let topics = self.trainer.train(&corpus)?;

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            submitted: inputs.len(),
            extracted,
            reused: inputs.len() - extracted,
            mining,
            records,
            topics,
        })
    }

    async fn extract(&self, delta: &[&DocumentInput]) -> Result<HashMap<PathBuf, ExtractionResult>> {
        let paths: Vec<PathBuf> = delta.iter().map(|input| input.file_path.clone()).collect();

        let mut supervisor =
            ExtractionSupervisor::start(self.config.extraction.clone(), self.launcher.clone())?
                .with_policy(self.policy.clone());
        let results = supervisor.extract(&paths).await;
        supervisor.shutdown().await;

        Ok(results
            .into_iter()
            .map(|result| (result.path.clone(), result))
            .collect())
    }
}

/// Remove documents from a cache so the next run extracts them again
pub fn evict_documents(cache: &IncrementalCache, paths: &[PathBuf]) -> Result<usize> {
    let identities: Vec<DocumentIdentity> =
        paths.iter().map(|p| DocumentIdentity::from_path(p)).collect();
    let removed = cache.evict_many(&identities)?;
    tracing::info!("Evicted {} of {} documents from the cache", removed, paths.len());
    Ok(removed)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::{ExtractionConfig, ReaderConfig};
    use crate::processing::WorkerId;
    use std::time::Duration;
    use tokio::process::Command;

    struct Silent;

    impl LaunchWorker for Silent {
        fn command(&self, _worker: WorkerId) -> Command {
            let mut command = Command::new("sh");
            command.arg("-c").arg("cat > /dev/null");
            command
        }
    }

    fn config() -> MinerConfig {
        MinerConfig {
            extraction: ExtractionConfig {
                workers: Some(1),
                base_timeout_secs: 0.2,
                poll_interval_ms: 20,
                shutdown_grace_secs: 1,
            },
            reader: ReaderConfig::without_tools(),
            ..MinerConfig::default()
        }
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(config(), IncrementalCache::in_memory().unwrap(), Arc::new(Silent)).unwrap()
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let orchestrator = orchestrator();
        assert_eq!(orchestrator.status(), RunState::Idle);

        let err = orchestrator.run(&[]).await.unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
        assert_eq!(orchestrator.status(), RunState::Failed);
        assert!(orchestrator.last_run_time().is_some());
    }

    #[tokio::test]
    async fn test_all_failures_is_empty_corpus_but_cached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hung.txt");
        std::fs::write(&path, "never read").unwrap();
        let inputs = vec![
            DocumentInput::from_file(&path).unwrap(),
            DocumentInput::new(dir.path().join("missing.txt"), Utc::now(), 0),
        ];

        let orchestrator = orchestrator();
        let err = orchestrator.run(&inputs).await.unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus));
        assert_eq!(orchestrator.status(), RunState::Failed);

        // failed documents are still cached so they are not retried
        let cached = orchestrator.cache().load_all().unwrap();
        assert_eq!(cached.len(), 2);
        let hung = &cached[&DocumentIdentity::from_path(&path)];
        assert_eq!(hung.error.as_deref(), Some("Timeout before start after 0.2s"));

        let removed = evict_documents(orchestrator.cache(), &[path]).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(orchestrator.cache().len().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_custom_deadline_policy_reaches_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hung.txt");
        std::fs::write(&path, "never read").unwrap();

        let orchestrator =
            orchestrator().with_deadline_policy(Arc::new(|_pages: u32| Duration::from_millis(100)));
        let err = orchestrator
            .run(&[DocumentInput::from_file(&path).unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus));

        let cached = orchestrator.cache().load_all().unwrap();
        let hung = &cached[&DocumentIdentity::from_path(&path)];
        assert_eq!(hung.error.as_deref(), Some("Timeout before start after 0.1s"));
    }

    #[test]
    fn test_single_flight_guard() {
        let orchestrator = orchestrator();
        let guard = orchestrator.begin().unwrap();
        assert_eq!(orchestrator.status(), RunState::Running);
        assert!(matches!(orchestrator.begin(), Err(Error::AlreadyRunning)));

        guard.settle(RunState::Completed);
        assert_eq!(orchestrator.status(), RunState::Completed);
        assert!(orchestrator.begin().is_ok());
        assert_eq!(orchestrator.status(), RunState::Cancelled);
    }

    #[tokio::test]
    async fn test_abandoned_run_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hung.txt");
        std::fs::write(&path, "never read").unwrap();
        let inputs = vec![DocumentInput::from_file(&path).unwrap()];

        let orchestrator = orchestrator();
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), orchestrator.run(&inputs)).await;
        assert!(abandoned.is_err());
        assert_eq!(orchestrator.status(), RunState::Cancelled);

        let err = orchestrator.run(&inputs).await.unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus));
        assert_eq!(orchestrator.status(), RunState::Failed);
    }
}
