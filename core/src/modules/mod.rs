pub mod authentication;
pub mod data_exposure;
pub mod injection;
pub mod misconfiguration;
pub mod rate_limit;

use log::debug;
use std::sync::Arc;

pub use authentication::AuthenticationTester;
pub use data_exposure::DataExposureTester;
pub use injection::InjectionTester;
pub use misconfiguration::MisconfigurationTester;
pub use rate_limit::RateLimitTester;

use crate::core::context::ScanContext;
use crate::core::registry::TesterRegistry;
use crate::http::{ProbeExecutor, ProbeRequest, ProbeResponse};
use crate::utils::payloads::PayloadCatalog;
use crate::BurstPolicy;

/// Registers the built-in testers. Order does not matter: each lands under its
/// own category.
pub fn register_defaults(
    registry: &mut TesterRegistry,
    executor: Arc<dyn ProbeExecutor>,
    policy: BurstPolicy,
) {
    registry.register(Arc::new(RateLimitTester::new(Arc::clone(&executor), policy)));
    registry.register(Arc::new(InjectionTester::new(
        Arc::clone(&executor),
        PayloadCatalog::builtin(),
    )));
    registry.register(Arc::new(MisconfigurationTester::new(Arc::clone(&executor))));
    registry.register(Arc::new(DataExposureTester::new(Arc::clone(&executor))));
    registry.register(Arc::new(AuthenticationTester::new(executor)));
}

/// Sends a single probe. `None` on transport failure or cancellation.
pub(crate) async fn send_probe(
    ctx: &ScanContext,
    executor: &Arc<dyn ProbeExecutor>,
    request: &ProbeRequest,
) -> Option<ProbeResponse> {
    let outcome = tokio::select! {
        biased;
        _ = ctx.cancelled() => return None,
        outcome = executor.execute(request) => outcome,
    };
    match outcome {
        Ok(response) => Some(response),
        Err(e) => {
            debug!("probe to {} dropped: {}", request.url, e);
            None
        }
    }
}
