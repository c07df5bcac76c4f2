//! Support bundle lifecycle: creation jobs, reads, removal, cleanup, usage stats.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bundle::archive::{self, BundleManifest};
use crate::bundle::{
    Bundle, BundleError, BundleOutcome, BundleResult, BundleState, CollectorFailure, Principal,
};
use crate::config::SupportBundlesConfig;
use crate::registry::{panic_message, CollectorOutput, CollectorRegistry};
use crate::scheduler;
use crate::storage::BundleStore;

/// Usage metric carrying the number of stored bundles.
pub const STAT_BUNDLE_COUNT: &str = "stats.bundles.count";

/// What one cleanup sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    /// Pending bundles whose job outlived its deadline, moved to `Error`.
    pub abandoned: usize,
    pub skipped_pending: usize,
    pub failed: usize,
}

/// The lifecycle manager. Cheap to clone; clones share the store and registry.
#[derive(Clone)]
pub struct SupportBundleService {
    store: BundleStore,
    registry: Arc<CollectorRegistry>,
    settings: SupportBundlesConfig,
    creation_timeout: Duration,
}

impl SupportBundleService {
    pub fn new(
        store: BundleStore,
        registry: Arc<CollectorRegistry>,
        settings: SupportBundlesConfig,
    ) -> Self {
        let creation_timeout = settings.creation_timeout();
        Self {
            store,
            registry,
            settings,
            creation_timeout,
        }
    }

    /// Override the creation deadline taken from the settings.
    pub fn with_creation_timeout(mut self, timeout: Duration) -> Self {
        self.creation_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &SupportBundlesConfig {
        &self.settings
    }

    pub fn store(&self) -> &BundleStore {
        &self.store
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Allocate a pending bundle and start collecting it in the background.
    ///
    /// Returns as soon as the pending record exists; the collection job runs
    /// detached from the caller and owns its own deadline.
    pub async fn create(
        &self,
        collectors: Vec<String>,
        principal: &Principal,
    ) -> BundleResult<Bundle> {
        let bundle = self.store.create(principal, &collectors).map_err(|e| {
            error!(creator = %principal.login, error = %e, "Failed to allocate support bundle");
            e
        })?;

        info!(
            uid = %bundle.uid,
            creator = %bundle.creator,
            collectors = ?bundle.collectors,
            "Support bundle requested"
        );
        self.spawn_collection(bundle.uid.clone(), collectors);

        Ok(bundle)
    }

    pub async fn get(&self, uid: &str) -> BundleResult<Bundle> {
        self.store.get(uid)
    }

    pub async fn list(&self) -> BundleResult<Vec<Bundle>> {
        self.store.list()
    }

    /// Remove a finished bundle. Pending bundles cannot be removed.
    pub async fn remove(&self, uid: &str) -> BundleResult<()> {
        let bundle = self.store.get(uid)?;
        if bundle.state == BundleState::Pending {
            return Err(BundleError::InvalidState {
                uid: uid.to_string(),
                state: bundle.state,
            });
        }

        self.store.remove(uid)?;
        info!(%uid, "Support bundle removed");
        Ok(())
    }

    /// Remove every expired bundle that is no longer pending.
    ///
    /// Pending bundles older than the creation deadline belong to a job that
    /// died with its process; they are failed first so they can be reaped.
    pub async fn cleanup(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let mut bundles = match self.list().await {
            Ok(bundles) => bundles,
            Err(e) => {
                error!(error = %e, "Failed to list bundles to clean up");
                return report;
            }
        };

        let now = Utc::now();
        for bundle in bundles.iter_mut().filter(|b| self.is_abandoned(b, now)) {
            let outcome = BundleOutcome::failed(
                collection_fault(format!(
                    "abandoned: still pending after {:?}",
                    self.creation_timeout
                )),
                Vec::new(),
            );
            match self.store.update(&bundle.uid, &outcome) {
                Ok(()) => {
                    warn!(uid = %bundle.uid, created_at = %bundle.created_at, "Failed abandoned support bundle");
                    bundle.state = BundleState::Error;
                    report.abandoned += 1;
                }
                // Finished or removed since we listed.
                Err(BundleError::NotFound { .. } | BundleError::InvalidState { .. }) => {}
                Err(e) => {
                    error!(uid = %bundle.uid, error = %e, "Failed to fail abandoned bundle");
                    report.failed += 1;
                }
            }
        }

        for bundle in bundles.iter().filter(|b| b.is_expired(now)) {
            if bundle.state == BundleState::Pending {
                debug!(uid = %bundle.uid, "Expired bundle still pending, skipping");
                report.skipped_pending += 1;
                continue;
            }

            match self.remove(&bundle.uid).await {
                Ok(()) => report.removed += 1,
                // Removed by someone else since we listed.
                Err(BundleError::NotFound { .. }) => {}
                Err(e) => {
                    error!(uid = %bundle.uid, error = %e, "Failed to clean up bundle");
                    report.failed += 1;
                }
            }
        }

        info!(
            removed = report.removed,
            abandoned = report.abandoned,
            skipped_pending = report.skipped_pending,
            failed = report.failed,
            "Support bundle cleanup finished"
        );
        report
    }

    /// Usage metrics for the host's stats reporter. Never fails.
    pub async fn usage_stats(&self) -> BTreeMap<String, i64> {
        let count = match self.store.stats_count() {
            Ok(count) => count.max(0),
            Err(e) => {
                warn!(error = %e, "Unable to get support bundle counter");
                0
            }
        };

        let mut stats = BTreeMap::new();
        stats.insert(STAT_BUNDLE_COUNT.to_string(), count);
        stats
    }

    /// Drive periodic cleanup until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        if !self.settings.enabled {
            info!("Support bundles disabled, cleanup loop not started");
            return Ok(());
        }

        scheduler::run_cleanup_loop(self.clone(), self.settings.cleanup_interval(), shutdown).await;
        Ok(())
    }

    /// Pending past the creation deadline, plus a second for `created_at`
    /// being truncated to whole seconds.
    fn is_abandoned(&self, bundle: &Bundle, now: chrono::DateTime<Utc>) -> bool {
        bundle.state == BundleState::Pending
            && chrono::Duration::from_std(self.creation_timeout)
                .ok()
                .and_then(|timeout| bundle.created_at.checked_add_signed(timeout))
                .and_then(|deadline| deadline.checked_add_signed(chrono::Duration::seconds(1)))
                .is_some_and(|deadline| deadline < now)
    }

    fn spawn_collection(&self, uid: String, collectors: Vec<String>) {
        let service = self.clone();
        let timeout = self.creation_timeout;

        tokio::spawn(async move {
            let work = AssertUnwindSafe(service.collect(&uid, &collectors)).catch_unwind();

            // Deadline first: a result that arrives late is still a timeout.
            let outcome = tokio::select! {
                biased;
                _ = tokio::time::sleep(timeout) => {
                    error!(%uid, timeout_secs = timeout.as_secs_f64(), "Support bundle collection timed out");
                    BundleOutcome::failed(
                        collection_fault(format!("timed out after {:?}", timeout)),
                        Vec::new(),
                    )
                }
                result = work => match result {
                    Ok(outcome) => outcome,
                    Err(panic) => {
                        let msg = panic_message(panic.as_ref());
                        error!(%uid, panic = %msg, "Support bundle collection panicked");
                        BundleOutcome::failed(collection_fault(format!("panicked: {}", msg)), Vec::new())
                    }
                },
            };

            service.finish(&uid, outcome);
        });
    }

    async fn collect(&self, uid: &str, collectors: &[String]) -> BundleOutcome {
        let outputs = self.registry.run_all(collectors).await;
        assemble(uid, outputs)
    }

    fn finish(&self, uid: &str, outcome: BundleOutcome) {
        let state = outcome.state;
        match self.store.update(uid, &outcome) {
            Ok(()) => info!(
                %uid,
                %state,
                failed_collectors = outcome.collector_errors.len(),
                "Support bundle finished"
            ),
            Err(BundleError::NotFound { .. }) => {
                warn!(%uid, "Support bundle disappeared before collection finished")
            }
            Err(e) => error!(%uid, error = %e, "Failed to record support bundle outcome"),
        }
    }
}

/// Fold collector outputs into the bundle's final outcome.
///
/// Any successful collector makes the bundle complete; failures are recorded
/// alongside. No successful collector at all is an error.
fn assemble(uid: &str, outputs: Vec<CollectorOutput>) -> BundleOutcome {
    let mut items = Vec::new();
    let mut failures = Vec::new();

    for output in outputs {
        match output.result {
            Ok(item) => items.push((output.uid, item)),
            Err(error) => failures.push(CollectorFailure {
                collector: output.uid,
                error,
            }),
        }
    }

    if items.is_empty() {
        return BundleOutcome::failed(collection_fault("no collector produced any output"), failures);
    }

    let manifest = BundleManifest {
        uid: uid.to_string(),
        created_at: Utc::now(),
        generator: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        collectors: items.iter().map(|(collector, _)| collector.clone()).collect(),
        failures: failures.clone(),
    };

    match archive::write_archive(&manifest, &items) {
        Ok(bytes) => BundleOutcome::complete(bytes, failures),
        Err(e) => BundleOutcome::failed(
            collection_fault(format!("failed to write bundle archive: {}", e)),
            failures,
        ),
    }
}

/// Error detail recorded on a bundle whose collection failed.
fn collection_fault(detail: impl Into<String>) -> String {
    BundleError::CollectionFault(detail.into()).to_string()
}
