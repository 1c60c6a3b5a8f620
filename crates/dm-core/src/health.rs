//! Dependency health checks.
//!
//! Each enabled dependency gets a [`DependencyProbe`]; disabled ones are
//! registered as skipped so the report always lists the same check names.
//! Probes run concurrently, each under its own timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dm_storage::ObjectStore;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;

use crate::provisioning::ProvisioningStore;

/// Default upper bound for a single probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// State of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Error,
    Skipped,
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    pub detail: Option<String>,
}

impl CheckResult {
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: CheckStatus::Ok,
            detail: None,
        }
    }

    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            status: CheckStatus::Skipped,
            detail: None,
        }
    }

    #[must_use]
    pub fn error(detail: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregate of every check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checks: BTreeMap<&'static str, CheckResult>,
}

impl HealthReport {
    /// Healthy iff no check is in error. Skipped checks never count.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.checks.values().all(|c| c.status != CheckStatus::Error)
    }

    /// One line per failed check, `"<name>: <detail>"`.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.checks
            .iter()
            .filter(|(_, c)| c.status == CheckStatus::Error)
            .map(|(name, c)| format!("{name}: {}", c.detail.as_deref().unwrap_or("failed")))
            .collect()
    }
}

/// A check against one dependency.
#[async_trait::async_trait]
pub trait DependencyProbe: Send + Sync + 'static {
    /// Name under which the result is reported.
    fn name(&self) -> &'static str;

    /// Returns a client-safe failure reason on error. Implementations log
    /// the full error themselves.
    async fn probe(&self) -> Result<(), String>;
}

/// Probes an object store (local directory write test, S3 bucket head).
pub struct StoreProbe {
    name: &'static str,
    store: Arc<dyn ObjectStore>,
}

impl StoreProbe {
    #[must_use]
    pub fn new(name: &'static str, store: Arc<dyn ObjectStore>) -> Self {
        Self { name, store }
    }
}

#[async_trait::async_trait]
impl DependencyProbe for StoreProbe {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn probe(&self) -> Result<(), String> {
        self.store.probe().await.map_err(|e| {
            warn!(check = self.name, backend = self.store.name(), error = %e, "health probe failed");
            e.public_reason().to_owned()
        })
    }
}

/// Probes the provisioning database.
pub struct ProvisioningProbe {
    store: Arc<dyn ProvisioningStore>,
}

impl ProvisioningProbe {
    #[must_use]
    pub fn new(store: Arc<dyn ProvisioningStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl DependencyProbe for ProvisioningProbe {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn probe(&self) -> Result<(), String> {
        self.store.ping().await.map_err(|e| {
            warn!(check = "db", backend = self.store.name(), error = %e, "health probe failed");
            "database unreachable".to_owned()
        })
    }
}

/// Runs every registered probe and builds a [`HealthReport`].
#[derive(Clone)]
pub struct HealthReporter {
    probes: Vec<Arc<dyn DependencyProbe>>,
    skipped: Vec<&'static str>,
    timeout: Duration,
}

impl Default for HealthReporter {
    fn default() -> Self {
        Self {
            probes: Vec::new(),
            skipped: Vec::new(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl HealthReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn DependencyProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Report `name` as skipped.
    #[must_use]
    pub fn with_skipped(mut self, name: &'static str) -> Self {
        self.skipped.push(name);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run every probe concurrently.
    pub async fn check(&self) -> HealthReport {
        let mut report = HealthReport::default();
        for name in &self.skipped {
            report.checks.insert(*name, CheckResult::skipped());
        }

        let mut tasks = JoinSet::new();
        for probe in &self.probes {
            let probe = Arc::clone(probe);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, probe.probe()).await {
                    Ok(Ok(())) => CheckResult::ok(),
                    Ok(Err(reason)) => CheckResult::error(reason),
                    Err(_) => {
                        warn!(
                            check = probe.name(),
                            timeout_secs = timeout.as_secs(),
                            "health probe timed out"
                        );
                        CheckResult::error("timed out")
                    }
                };
                (probe.name(), result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    report.checks.insert(name, result);
                }
                Err(e) => warn!(error = %e, "health probe task failed"),
            }
        }

        // A probe whose task died must still surface as an error.
        for probe in &self.probes {
            report
                .checks
                .entry(probe.name())
                .or_insert_with(|| CheckResult::error("probe failed"));
        }
        report
    }
}

impl std::fmt::Debug for HealthReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.probes.iter().map(|p| p.name()).collect();
        f.debug_struct("HealthReporter")
            .field("probes", &names)
            .field("skipped", &self.skipped)
            .field("timeout", &self.timeout)
            .finish()
    }
}
