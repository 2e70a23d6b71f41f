use std::sync::Arc;

use reqwest::Client;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tracing::{debug, error, warn};

use super::clock::{Clock, SystemClock};
use super::errors::CrlResult;
use super::fetcher::fetch_crls_parallel;
use super::store::RefreshingCrlStore;

/// Configuration for the CRL refresh scheduler
#[derive(Debug, Clone)]
pub struct CrlSchedulerConfig {
    /// How often to refresh CRLs (in seconds)
    pub check_interval_secs: u64,
    /// CRL distribution point URLs
    pub distribution_points: Vec<String>,
    /// HTTP timeout for fetching CRLs
    pub timeout_secs: u64,
}

impl Default for CrlSchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 3600, // 1 hour
            distribution_points: Vec::new(),
            timeout_secs: 30,
        }
    }
}

/// Periodically downloads the configured CRLs into a [`RefreshingCrlStore`].
///
/// A failed download keeps the previously stored CRL of that URL.
pub struct CrlRefreshScheduler {
    config: CrlSchedulerConfig,
    client: Client,
    store: Arc<RefreshingCrlStore>,
    clock: Arc<dyn Clock>,
}

impl CrlRefreshScheduler {
    pub fn new(config: CrlSchedulerConfig, store: Arc<RefreshingCrlStore>) -> CrlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            config,
            client,
            store,
            clock: Arc::new(SystemClock),
        })
    }

    /// Judges the expiry of fetched CRLs against `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<RefreshingCrlStore> {
        &self.store
    }

    /// Refreshes every configured URL once.
    ///
    /// Returns the number of CRLs stored.
    pub async fn trigger_immediate_update(&self) -> usize {
        debug!("Performing immediate CRL refresh");

        if self.config.distribution_points.is_empty() {
            warn!("No CRL distribution points configured");
            return 0;
        }

        let results = fetch_crls_parallel(
            &self.client,
            &self.config.distribution_points,
            Duration::from_secs(self.config.timeout_secs),
            self.clock.now(),
        )
        .await;

        let mut updated = 0;
        for (url, result) in results {
            match result {
                Ok(crl) => {
                    self.store.replace(&url, crl.into_view());
                    updated += 1;
                }
                Err(e) => warn!("Failed to refresh CRL from {url}: {e}"),
            }
        }
        updated
    }

    /// Start the scheduler (spawns background task)
    ///
    /// Returns `None` when no distribution point is configured.
    pub fn start(self) -> Option<JoinHandle<()>> {
        if self.config.distribution_points.is_empty() {
            debug!("No CRL distribution points configured, scheduler not started");
            return None;
        }

        let check_interval = Duration::from_secs(self.config.check_interval_secs);
        debug!(
            "Starting CRL scheduler with interval of {} seconds",
            self.config.check_interval_secs
        );

        let scheduler = Arc::new(self);

        Some(tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.tick().await; // First tick completes immediately

            loop {
                ticker.tick().await;
                debug!("Running scheduled CRL refresh");

                let updated = scheduler.trigger_immediate_update().await;
                if updated == 0 {
                    error!("Scheduled CRL refresh could not update any CRL");
                } else {
                    debug!("Scheduled CRL refresh updated {} CRLs", updated);
                }
            }
        }))
    }
}
