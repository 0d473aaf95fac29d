use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use engine_logging::{engine_debug, engine_error};
use spotter_core::{BackendKind, MatchResult, MatchStage};
use tokio::sync::mpsc;

use super::{BackendError, MatchBackend, ResultSink};
use crate::matcher::MatchEngine;
use crate::prober::ProbedCandidate;

/// Scores candidates on a dedicated CPU pool, narrower than the I/O pools.
pub struct LocalBackend {
    engine: MatchEngine,
    pool: Arc<rayon::ThreadPool>,
}

impl LocalBackend {
    pub fn new(engine: MatchEngine, workers: usize) -> Result<Self, BackendError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("match-{index}"))
            .build()?;
        engine_debug!("local match pool with {} workers", workers.max(1));
        Ok(Self {
            engine,
            pool: Arc::new(pool),
        })
    }
}

#[async_trait::async_trait]
impl MatchBackend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn run(&self, candidates: Vec<ProbedCandidate>, sink: &dyn ResultSink) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for candidate in candidates {
            let tx = tx.clone();
            let engine = self.engine.clone();
            self.pool.spawn(move || {
                let _ = tx.send(score_guarded(&engine, &candidate));
            });
        }
        drop(tx);
        while let Some(result) = rx.recv().await {
            sink.record(result);
        }
    }
}

/// A panic while scoring one candidate becomes that candidate's failure result.
fn score_guarded(engine: &MatchEngine, candidate: &ProbedCandidate) -> MatchResult {
    let Some(bytes) = &candidate.bytes else {
        return MatchResult::failed(candidate.url.clone(), MatchStage::DownloadFailed);
    };
    catch_unwind(AssertUnwindSafe(|| {
        engine.score_bytes(&candidate.url, bytes)
    }))
    .unwrap_or_else(|_| {
        engine_error!("match worker panicked on {}", candidate.url);
        MatchResult::failed(candidate.url.clone(), MatchStage::WorkerFailed)
    })
}
