use async_trait::async_trait;
use log::{info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::context::ScanContext;
use crate::core::error::{RunAllError, TesterError};
use crate::core::result::TestResult;
use crate::core::VulnerabilityType;
use crate::http::ProbeExecutor;
use crate::modules;
use crate::{BurstPolicy, TargetConfig};

/// A probe module responsible for one vulnerability category.
///
/// `test` returns `Err` only when the tester cannot run at all. Finding nothing
/// is an `Ok` result with no findings.
#[async_trait]
pub trait VulnerabilityTester: Send + Sync {
    async fn test(&self, ctx: &ScanContext, target: &TargetConfig) -> Result<TestResult, TesterError>;

    fn vuln_type(&self) -> VulnerabilityType;

    fn name(&self) -> &str;

    fn description(&self) -> &str;
}

pub type TesterRef = Arc<dyn VulnerabilityTester>;

/// One tester per category; registering a second one for the same category
/// replaces the first.
#[derive(Default, Clone)]
pub struct TesterRegistry {
    testers: BTreeMap<VulnerabilityType, TesterRef>,
}

impl TesterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in tester catalog, all sharing `executor`.
    pub fn with_default_testers(executor: Arc<dyn ProbeExecutor>, policy: BurstPolicy) -> Self {
        let mut registry = Self::new();
        modules::register_defaults(&mut registry, executor, policy);
        registry
    }

    /// Returns the tester previously registered for the same category, if any.
    pub fn register(&mut self, tester: TesterRef) -> Option<TesterRef> {
        self.testers.insert(tester.vuln_type(), tester)
    }

    pub fn get(&self, vuln_type: VulnerabilityType) -> Option<TesterRef> {
        self.testers.get(&vuln_type).cloned()
    }

    /// Snapshot of the registered testers. Callers must not depend on the order.
    pub fn all(&self) -> Vec<TesterRef> {
        self.testers.values().cloned().collect()
    }

    pub fn categories(&self) -> Vec<VulnerabilityType> {
        self.testers.keys().copied().collect()
    }

    /// Keeps only the categories for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(VulnerabilityType) -> bool) {
        self.testers.retain(|k, _| keep(*k));
    }

    pub fn len(&self) -> usize {
        self.testers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.testers.is_empty()
    }

    /// Runs every tester once, stopping at the first one that fails.
    ///
    /// Callers that need every tester to run regardless should iterate
    /// [`TesterRegistry::all`] themselves.
    pub async fn run_all(
        &self,
        ctx: &ScanContext,
        target: &TargetConfig,
    ) -> Result<Vec<TestResult>, RunAllError> {
        let mut completed = Vec::with_capacity(self.testers.len());

        for tester in self.testers.values() {
            info!("[{}] {}", tester.name(), tester.description());
            match tester.test(ctx, target).await {
                Ok(result) => completed.push(result),
                Err(source) => {
                    warn!("[{}] aborted: {}", tester.name(), source);
                    return Err(RunAllError {
                        completed,
                        tester: tester.name().to_string(),
                        source,
                    });
                }
            }
        }

        Ok(completed)
    }
}
