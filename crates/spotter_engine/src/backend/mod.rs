//! Where the expensive match stage runs: in-process or on a remote worker.
mod local;
mod remote;

pub use local::LocalBackend;
pub use remote::{parse_execute_response, RemoteBackend, RemoteEntry, RemoteError, REMOTE_PROGRAM};

use spotter_core::{BackendKind, MatchResult};

use crate::prober::ProbedCandidate;

/// Receives match results as they complete, in completion order.
pub trait ResultSink: Send + Sync {
    fn record(&self, result: MatchResult);
}

/// Runs the match stage over probe survivors. Every submitted candidate
/// yields exactly one result in the sink; per-candidate failures arrive as
/// failure-sentinel results, never as errors.
#[async_trait::async_trait]
pub trait MatchBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    async fn run(&self, candidates: Vec<ProbedCandidate>, sink: &dyn ResultSink);
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("could not start match workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}
