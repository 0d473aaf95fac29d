use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use engine_logging::{engine_info, engine_warn};
use spotter_core::{
    rank_candidates, BackendKind, BestMatch, ExecutionTarget, MatchResult, RunSummary,
    SearchConfig,
};
use url::Url;

use crate::backend::{BackendError, LocalBackend, MatchBackend, RemoteBackend, ResultSink};
use crate::crawler::Crawler;
use crate::fetch::{FetchSettings, ReqwestFetcher};
use crate::imaging::{Template, TemplateError};
use crate::matcher::MatchEngine;
use crate::prober::{ProbeReport, Prober};
use crate::sync::lock;
use crate::FetchError;

/// One search: where to crawl, what to look for, where to match.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub start_url: Url,
    pub template_path: PathBuf,
    pub target: ExecutionTarget,
}

/// Errors that abort a run. Everything per-candidate is absorbed into results.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("http client: {0}")]
    Client(#[from] FetchError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// The run-scoped mutable state: the best match so far and the processed count.
pub struct RunState {
    best: Mutex<BestMatch>,
    processed: Mutex<usize>,
    expected: usize,
    progress_every: usize,
}

impl RunState {
    pub fn new(expected: usize, progress_every: usize) -> Self {
        Self {
            best: Mutex::new(BestMatch::new()),
            processed: Mutex::new(0),
            expected,
            progress_every: progress_every.max(1),
        }
    }

    pub fn best(&self) -> BestMatch {
        lock(&self.best).clone()
    }

    pub fn processed(&self) -> usize {
        *lock(&self.processed)
    }
}

impl ResultSink for RunState {
    fn record(&self, result: MatchResult) {
        let processed = {
            let mut processed = lock(&self.processed);
            *processed += 1;
            *processed
        };
        if processed % self.progress_every == 0 {
            engine_info!("matched {}/{} candidates", processed, self.expected);
        }
        if lock(&self.best).offer(&result) {
            engine_info!(
                "new best {:.3} at scale {:.3} ({}): {}",
                result.score,
                result.scale,
                result.stage,
                result.url
            );
        }
    }
}

/// Wires crawl, prefilter, probe and match into one run.
pub struct Orchestrator {
    config: SearchConfig,
    fetch: FetchSettings,
}

impl Orchestrator {
    pub fn new(config: SearchConfig, fetch: FetchSettings) -> Self {
        Self { config, fetch }
    }

    /// Runs a full search. Only a template that cannot be loaded (or an HTTP
    /// client that cannot be built) fails the run; an empty site produces a
    /// normal summary without a best match.
    pub async fn run(&self, request: &SearchRequest) -> Result<RunSummary, RunError> {
        let started = Instant::now();
        let template = Arc::new(Template::load(&request.template_path)?);
        engine_info!(
            "template {} is {}x{}",
            request.template_path.display(),
            template.width(),
            template.height()
        );
        let fetcher = Arc::new(ReqwestFetcher::new(self.fetch.clone())?);

        let mut summary = RunSummary::empty(request.target.kind());

        let crawl = Crawler::new(fetcher.clone(), self.config.crawl.clone())
            .crawl(&request.start_url)
            .await;
        summary.pages_crawled = crawl.pages_crawled;
        summary.total_images_found = crawl.registry.len();

        let ranked = rank_candidates(
            &crawl.registry,
            template.width(),
            template.height(),
            &self.config.rank,
        );
        summary.candidates_after_prefilter = ranked.len();
        engine_info!(
            "prefilter kept {} of {} images",
            ranked.len(),
            crawl.registry.len()
        );

        // Survivors carry their bytes only for in-process matching.
        let backend = if ranked.is_empty() {
            None
        } else {
            Some(self.backend(&request.target, &fetcher, &template).await?)
        };
        let probe = match &backend {
            Some(backend) => {
                Prober::new(fetcher.clone(), template.clone(), self.config.probe.clone())
                    .keep_bytes(backend.kind() == BackendKind::Local)
                    .probe(&ranked)
                    .await
            }
            None => ProbeReport::default(),
        };
        summary.candidates_after_probe = probe.survivors.len();

        if let Some(backend) = backend.filter(|_| !probe.survivors.is_empty()) {
            summary.backend = backend.kind();
            let state = RunState::new(
                probe.survivors.len(),
                self.config.matching.progress_every,
            );
            let matching_started = Instant::now();
            backend.run(probe.survivors, &state).await;
            engine_info!(
                "matching took {:.1}s",
                matching_started.elapsed().as_secs_f64()
            );
            summary.images_processed = state.processed();
            summary.apply_best(&state.best());
        }

        summary.time_seconds = started.elapsed().as_secs_f64();
        Ok(summary)
    }

    /// Picks the backend for the target. A remote target whose template upload
    /// fails falls back to local matching.
    async fn backend(
        &self,
        target: &ExecutionTarget,
        fetcher: &ReqwestFetcher,
        template: &Arc<Template>,
    ) -> Result<Box<dyn MatchBackend>, BackendError> {
        if let ExecutionTarget::Remote { base } = target {
            match RemoteBackend::connect(
                fetcher.client().clone(),
                base.clone(),
                template,
                self.config.execution.clone(),
                self.config.matching.clone(),
            )
            .await
            {
                Ok(remote) => return Ok(Box::new(remote)),
                Err(err) => engine_warn!("remote upload failed ({err}); matching locally"),
            }
        }
        let workers = self.config.matching.resolved_local_workers(
            std::thread::available_parallelism().map_or(1, |n| n.get()),
        );
        let engine = MatchEngine::new(template.clone(), self.config.matching.clone());
        Ok(Box::new(LocalBackend::new(engine, workers)?))
    }
}
