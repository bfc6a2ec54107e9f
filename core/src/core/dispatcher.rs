use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::debug;
use rand::Rng;
use tokio::sync::{mpsc, Semaphore};

use crate::core::context::ScanContext;
use crate::core::mutator::ProbeMutation;
use crate::http::{ProbeExecutor, ProbeRequest, ProbeResponse};

/// Header stamped on every burst probe so individual requests can be traced
/// in target logs.
pub const PROBE_ID_HEADER: &str = "X-Probe-Id";

/// Builds the overrides for probe `i` of a burst.
pub type Customizer = Arc<dyn Fn(usize) -> ProbeMutation + Send + Sync>;

/// Shape of one burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BurstPlan {
    pub count: usize,
    pub concurrency: usize,
    /// Delay a worker observes after its response arrives, before its slot is
    /// released.
    pub pacing: Option<Duration>,
}

impl BurstPlan {
    pub fn new(count: usize, concurrency: usize) -> Self {
        Self {
            count,
            concurrency,
            pacing: None,
        }
    }

    pub fn with_pacing(mut self, pacing: Option<Duration>) -> Self {
        self.pacing = pacing;
        self
    }

    /// Concurrency actually used: at least 1, never more than `count`.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.max(1).min(self.count.max(1))
    }
}

/// Responses gathered from one burst. Order carries no meaning.
#[derive(Debug, Clone, Default)]
pub struct BurstResult {
    pub responses: Vec<ProbeResponse>,
    /// Number of probes the burst was asked to send.
    pub attempted: usize,
    /// Set when cancellation stopped admission or abandoned an in-flight request.
    pub cancelled: bool,
}

impl BurstResult {
    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn success_count(&self) -> usize {
        self.responses.iter().filter(|r| r.is_success()).count()
    }

    pub fn status_count(&self, status: u16) -> usize {
        self.responses.iter().filter(|r| r.status == status).count()
    }

    /// Successes over *attempted* probes; 0.0 for an empty plan.
    pub fn success_ratio(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.success_count() as f64 / self.attempted as f64
    }

    /// True when a verdict drawn from this burst is meaningful.
    pub fn is_conclusive(&self) -> bool {
        !self.cancelled && !self.responses.is_empty()
    }
}

/// Fires bursts of probes at one target under a concurrency ceiling.
#[derive(Clone)]
pub struct BurstDispatcher {
    executor: Arc<dyn ProbeExecutor>,
}

impl BurstDispatcher {
    pub fn new(executor: Arc<dyn ProbeExecutor>) -> Self {
        Self { executor }
    }

    /// Sends `plan.count` probes derived from `base` and waits for all of them.
    ///
    /// Probes failing at the transport layer are dropped. Cancellation stops
    /// admission, abandons in-flight probes and returns what was collected.
    pub async fn dispatch(
        &self,
        ctx: &ScanContext,
        base: &ProbeRequest,
        plan: BurstPlan,
        customizer: Option<Customizer>,
    ) -> BurstResult {
        if plan.count == 0 {
            return BurstResult::default();
        }

        let width = plan.effective_concurrency();
        let semaphore = Arc::new(Semaphore::new(width));
        let (tx, rx) = mpsc::channel::<ProbeResponse>(width);
        let collector = tokio::spawn(collect(rx, plan.count));
        let burst_id = format!("{:08x}", rand::rng().random::<u32>());

        debug!(
            "burst {}: {} probe(s) at {} concurrency against {}",
            burst_id, plan.count, width, base.url
        );

        let mut tasks = Vec::with_capacity(plan.count);
        // Set only when cancellation cut admission or an in-flight request short.
        let interrupted = Arc::new(AtomicBool::new(false));

        for i in 0..plan.count {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    interrupted.store(true, Ordering::SeqCst);
                    break;
                }
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let mut request = match &customizer {
                Some(customize) => base.mutated(&customize(i)),
                None => base.clone(),
            };
            request.set_header(PROBE_ID_HEADER, &format!("{}-{}", burst_id, i));

            let executor = Arc::clone(&self.executor);
            let tx = tx.clone();
            let ctx = ctx.clone();
            let pacing = plan.pacing;
            let interrupted = Arc::clone(&interrupted);

            tasks.push(tokio::spawn(async move {
                let _permit = permit;

                let outcome = tokio::select! {
                    biased;
                    _ = ctx.cancelled() => {
                        interrupted.store(true, Ordering::SeqCst);
                        return;
                    }
                    outcome = executor.execute(&request) => outcome,
                };

                match outcome {
                    Ok(response) => {
                        let _ = tx.send(response).await;
                    }
                    Err(e) => {
                        debug!("probe {} dropped: {}", i, e);
                    }
                }

                if let Some(delay) = pacing {
                    tokio::select! {
                        _ = ctx.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }));
        }

        drop(tx);

        join_all(tasks).await;

        let responses = collector.await.unwrap_or_default();
        let cancelled = interrupted.load(Ordering::SeqCst);

        BurstResult {
            responses,
            attempted: plan.count,
            cancelled,
        }
    }
}

/// Sole owner of the burst's response collection.
async fn collect(mut rx: mpsc::Receiver<ProbeResponse>, capacity: usize) -> Vec<ProbeResponse> {
    let mut responses = Vec::with_capacity(capacity);
    while let Some(response) = rx.recv().await {
        responses.push(response);
    }
    responses
}
