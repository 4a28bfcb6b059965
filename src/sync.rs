//! Sync Engine - runs configured source/destination pairs
//!
//! Pairs are processed one after another over a single connection. Each pair
//! first reconciles the server's copy queue (retry failed tasks, refresh the
//! pending list), checks the source exists, walks the tree and, in move mode,
//! prunes source directories left empty. A failed pair never stops the next
//! one, and the connection is closed once every pair has run.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::client::{AlistClient, RemoteFs};
use crate::config::Config;
use crate::error::SyncError;
use crate::events::{CountingObserver, OperationCounts, SyncEvent, SyncObserver, TracingObserver};
use crate::policy::SyncPolicy;
use crate::walker::TreeWalker;

/// One source directory mirrored into one destination directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPair {
    pub source_dir: String,
    pub dest_dir: String,
}

impl SyncPair {
    pub fn new(source_dir: impl Into<String>, dest_dir: impl Into<String>) -> Self {
        Self {
            source_dir: source_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }
}

impl fmt::Display for SyncPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_dir, self.dest_dir)
    }
}

impl FromStr for SyncPair {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, dest) = s
            .split_once(':')
            .ok_or_else(|| SyncError::InvalidConfig(format!("pair {:?} has no ':'", s)))?;
        let (source, dest) = (source.trim(), dest.trim());
        if source.is_empty() || dest.is_empty() || dest.contains(':') {
            return Err(SyncError::InvalidConfig(format!(
                "pair {:?} must look like source:destination",
                s
            )));
        }
        Ok(Self::new(source, dest))
    }
}

/// Result of syncing one pair
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub source_dir: String,
    pub dest_dir: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration: Duration,
}

/// Results from a complete sync run
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_pairs: usize,
    pub successful_pairs: usize,
    pub failed_pairs: usize,
    pub duration: Duration,
    pub operations: OperationCounts,
    pub outcomes: Vec<PairOutcome>,
}

impl SyncSummary {
    fn compile(outcomes: Vec<PairOutcome>, operations: OperationCounts, duration: Duration) -> Self {
        let successful_pairs = outcomes.iter().filter(|o| o.success).count();
        Self {
            total_pairs: outcomes.len(),
            successful_pairs,
            failed_pairs: outcomes.len() - successful_pairs,
            duration,
            operations,
            outcomes,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_pairs == 0
    }
}

/// The main sync engine that drives pairs against one remote
#[derive(Clone)]
pub struct SyncEngine {
    remote: Arc<dyn RemoteFs>,
    policy: Arc<SyncPolicy>,
    observer: Arc<dyn SyncObserver>,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteFs>,
        policy: SyncPolicy,
        observer: Arc<dyn SyncObserver>,
    ) -> Self {
        Self {
            remote,
            policy: Arc::new(policy),
            observer,
        }
    }

    /// Build an engine talking to the server named in `config`
    pub fn from_config(config: &Config, observer: Arc<dyn SyncObserver>) -> Result<Self, SyncError> {
        config.validate()?;
        let client = AlistClient::new(&config.credentials())?;
        Ok(Self::new(Arc::new(client), config.policy(), observer))
    }

    /// Authenticate, run every pair in order, then close the connection.
    ///
    /// Only an authentication failure is returned as an error; pair failures
    /// are reported in the summary.
    pub async fn run(&self, pairs: &[SyncPair]) -> Result<SyncSummary, SyncError> {
        let start_time = Instant::now();

        if let Err(e) = self.remote.authenticate().await {
            error!("Token or username/password rejected: {}", e);
            self.remote.close().await;
            return Err(e);
        }

        info!(
            "Starting sync of {} pairs (delete action: {}, move files: {})",
            pairs.len(),
            self.policy.delete_action,
            self.policy.move_file
        );
        for (i, pair) in pairs.iter().enumerate() {
            info!("No.{:02} [{}]", i + 1, pair);
        }

        let counter = CountingObserver::new(self.observer.as_ref());
        let mut outcomes = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            info!(
                "Pair [{:02}] [{}] ----> [{}]",
                i + 1,
                pair.source_dir,
                pair.dest_dir
            );
            outcomes.push(self.sync_pair(pair, &counter).await);
        }

        self.remote.close().await;

        let summary = SyncSummary::compile(outcomes, counter.counts(), start_time.elapsed());
        info!(
            "Sync completed in {:.2}s: {} succeeded, {} failed",
            summary.duration.as_secs_f64(),
            summary.successful_pairs,
            summary.failed_pairs
        );
        Ok(summary)
    }

    async fn sync_pair(&self, pair: &SyncPair, observer: &dyn SyncObserver) -> PairOutcome {
        let start_time = Instant::now();
        observer.record(&SyncEvent::PairStarted {
            source_dir: pair.source_dir.clone(),
            dest_dir: pair.dest_dir.clone(),
        });

        let result = self.sync_pair_inner(pair, observer).await;
        let success = result.is_ok();
        observer.record(&SyncEvent::PairFinished {
            source_dir: pair.source_dir.clone(),
            dest_dir: pair.dest_dir.clone(),
            success,
        });

        PairOutcome {
            source_dir: pair.source_dir.clone(),
            dest_dir: pair.dest_dir.clone(),
            success,
            error: result.err().map(|e| e.to_string()),
            duration: start_time.elapsed(),
        }
    }

    async fn sync_pair_inner(
        &self,
        pair: &SyncPair,
        observer: &dyn SyncObserver,
    ) -> Result<(), SyncError> {
        if !self.remote.retry_failed_copy_tasks().await {
            debug!("Retrying failed copy tasks did not succeed, continuing");
        }
        let pending = self.remote.list_pending_copy_tasks().await;
        if !pending.is_empty() {
            info!("{} copy tasks still in flight on the server", pending.len());
        }

        if !self.remote.exists(&pair.source_dir).await {
            observer.record(&SyncEvent::SourceMissing {
                source_dir: pair.source_dir.clone(),
            });
            return Err(SyncError::item(&pair.source_dir, "source directory does not exist"));
        }

        let walker = TreeWalker::new(self.remote.as_ref(), &self.policy, observer, &pending);
        let result = walker.walk(&pair.source_dir, &pair.dest_dir).await;
        if let Err(e) = &result {
            warn!("Walk of [{}] aborted: {}", pair, e);
        }

        if self.policy.move_file {
            walker.prune_empty_dirs(&pair.source_dir).await;
        }

        result
    }
}

/// Helper to create an engine reporting through `tracing`
pub fn create_sync_engine_from_config(config: &Config) -> Result<SyncEngine, SyncError> {
    SyncEngine::from_config(config, Arc::new(TracingObserver))
}
