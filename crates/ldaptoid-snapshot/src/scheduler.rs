//! The refresh loop: periodic builds, bounded exponential backoff, atomic
//! publication, and the health flags the HTTP probes read.

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, instrument, warn};

use ldaptoid_idp::{AdapterOutput, IdpClient, IdpError};

use crate::alloc::IdAllocator;
use crate::builder::{build_snapshot, BuildConfig};
use crate::error::SnapshotError;
use crate::model::Snapshot;
use crate::store::{MappingRecord, MappingStore};

/// Where adapter output comes from. The production implementation is
/// [`IdpClient`]; tests substitute scripted sources.
#[async_trait]
pub trait DirectorySource: Send + Sync {
    async fn fetch(&self) -> Result<AdapterOutput, IdpError>;
}

#[async_trait]
impl DirectorySource for IdpClient {
    async fn fetch(&self) -> Result<AdapterOutput, IdpError> {
        self.fetch_users_and_groups().await
    }
}

/// Scheduler timing knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Cadence between successful builds.
    pub refresh_interval: Duration,
    /// Upper bound on the failure backoff delay.
    pub max_backoff: Duration,
    /// Multiplier applied to the delay after each consecutive failure.
    pub backoff_multiplier: f64,
    /// Consecutive failures after which the scheduler halts.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            max_backoff: Duration::from_secs(3600),
            backoff_multiplier: 2.0,
            max_retries: 10,
        }
    }
}

/// Process health, shared with the HTTP probe handlers. Readiness fails
/// until the first snapshot lands; liveness fails only when the scheduler
/// has halted; degraded marks lost persistence.
#[derive(Debug, Default)]
pub struct Health {
    ready: AtomicBool,
    halted: AtomicBool,
    degraded: AtomicBool,
}

impl Health {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Relaxed);
    }
}

/// Allocator and sequence state, mutated only under the build lock.
struct BuildState {
    uid_alloc: IdAllocator,
    gid_alloc: IdAllocator,
    sequence: u64,
}

/// Drives repeated snapshot builds and owns the published pointer.
pub struct RefreshScheduler {
    source: Arc<dyn DirectorySource>,
    store: Option<Arc<dyn MappingStore>>,
    build_config: BuildConfig,
    config: SchedulerConfig,
    state: Mutex<BuildState>,
    current: ArcSwapOption<Snapshot>,
    health: Arc<Health>,
}

impl RefreshScheduler {
    pub fn new(
        source: Arc<dyn DirectorySource>,
        store: Option<Arc<dyn MappingStore>>,
        uid_alloc: IdAllocator,
        gid_alloc: IdAllocator,
        build_config: BuildConfig,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            store,
            build_config,
            config,
            state: Mutex::new(BuildState {
                uid_alloc,
                gid_alloc,
                sequence: 0,
            }),
            current: ArcSwapOption::const_empty(),
            health: Arc::new(Health::default()),
        }
    }

    /// The latest published snapshot. Readers keep the returned `Arc` for
    /// their whole response so a concurrent swap never tears a result.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.current.load_full()
    }

    pub fn health(&self) -> Arc<Health> {
        Arc::clone(&self.health)
    }

    /// Runs one build immediately, regardless of the backoff clock. The
    /// build lock still applies: at most one build runs at a time.
    pub async fn force_refresh(&self) -> Result<Arc<Snapshot>, SnapshotError> {
        self.refresh_once().await
    }

    /// The refresh loop. Returns when `shutdown` fires or the retry budget
    /// is exhausted.
    #[instrument(skip_all)]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_failures = 0u32;
        let mut delay = self.config.refresh_interval;

        loop {
            match self.refresh_once().await {
                Ok(snapshot) => {
                    consecutive_failures = 0;
                    delay = self.config.refresh_interval;
                    info!(
                        sequence = snapshot.sequence,
                        users = snapshot.users().len(),
                        groups = snapshot.groups().len(),
                        "snapshot published"
                    );
                }
                Err(err) => {
                    consecutive_failures += 1;
                    counter!("ldaptoid_refresh_failures_total").increment(1);
                    if consecutive_failures >= self.config.max_retries {
                        self.health.halted.store(true, Ordering::Relaxed);
                        error!(
                            failures = consecutive_failures,
                            %err,
                            "refresh retry budget exhausted, scheduler halting; last snapshot keeps serving"
                        );
                        return;
                    }
                    delay = if consecutive_failures == 1 {
                        self.config.refresh_interval.min(self.config.max_backoff)
                    } else {
                        self.config
                            .max_backoff
                            .min(delay.mul_f64(self.config.backoff_multiplier))
                    };
                    warn!(
                        failures = consecutive_failures,
                        next_attempt_in = ?delay,
                        %err,
                        "refresh failed, backing off"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("refresh scheduler stopping");
                    return;
                }
            }
        }
    }

    /// One fetch + build + persist + publish cycle under the build lock.
    async fn refresh_once(&self) -> Result<Arc<Snapshot>, SnapshotError> {
        if self.health.is_halted() {
            return Err(SnapshotError::Halted {
                failures: self.config.max_retries,
            });
        }
        let output = self.source.fetch().await?;

        let mut state = self.state.lock().await;
        counter!("ldaptoid_refresh_total").increment(1);
        let sequence = state.sequence + 1;
        let BuildState {
            ref mut uid_alloc,
            ref mut gid_alloc,
            ..
        } = *state;
        let (snapshot, new_mappings) =
            build_snapshot(&output, uid_alloc, gid_alloc, &self.build_config, sequence);
        state.sequence = sequence;

        gauge!("ldaptoid_id_map_size", "space" => "uid").set(state.uid_alloc.len() as f64);
        gauge!("ldaptoid_id_map_size", "space" => "gid").set(state.gid_alloc.len() as f64);
        drop(state);

        self.persist(&new_mappings).await;

        let snapshot = Arc::new(snapshot);
        self.current.store(Some(Arc::clone(&snapshot)));
        self.health.ready.store(true, Ordering::Relaxed);
        gauge!("ldaptoid_snapshot_sequence").set(snapshot.sequence as f64);
        gauge!("ldaptoid_snapshot_users").set(snapshot.users().len() as f64);
        gauge!("ldaptoid_snapshot_groups").set(snapshot.groups().len() as f64);
        Ok(snapshot)
    }

    /// Writes fresh allocations to the mapping store. Failures degrade
    /// persistence, they never fail the build.
    async fn persist(&self, new_mappings: &[crate::builder::NewMapping]) {
        let Some(store) = &self.store else { return };
        let mut failed = false;
        for mapping in new_mappings {
            let record = MappingRecord::from(mapping);
            if let Err(err) = store.put(&mapping.key, &record).await {
                counter!("ldaptoid_mapping_store_errors_total").increment(1);
                warn!(key = %mapping.key, %err, "failed to persist id mapping");
                failed = true;
            }
        }
        if failed {
            self.health.set_degraded(true);
        } else if !new_mappings.is_empty() {
            self.health.set_degraded(false);
        }
    }
}
