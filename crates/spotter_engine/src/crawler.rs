use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use engine_logging::{engine_error, engine_info, engine_trace};
use spotter_core::{
    estimate_dimensions, is_navigable, normalize_page_url, raster_extension, CandidateRegistry,
    CrawlConfig, CrawlFrontier, CrawlScope, ImageCandidate,
};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use url::Url;

use crate::fetch::Fetcher;
use crate::links::{LinkExtractor, PageLinks};
use crate::sync::lock;

/// What one crawl produced.
#[derive(Debug, Default)]
pub struct CrawlReport {
    /// Pages fetched and parsed successfully.
    pub pages_crawled: usize,
    pub registry: CandidateRegistry,
    pub elapsed: Duration,
}

/// Domain-scoped crawler running a fixed pool of fetch workers over one frontier.
pub struct Crawler {
    fetcher: Arc<dyn Fetcher>,
    config: CrawlConfig,
    extractor: LinkExtractor,
}

impl Crawler {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: CrawlConfig) -> Self {
        Self {
            fetcher,
            config,
            extractor: LinkExtractor::new(),
        }
    }

    /// Crawls from `start` until the frontier drains or the page budget is
    /// spent. A start URL without a host yields an empty report.
    pub async fn crawl(&self, start: &Url) -> CrawlReport {
        let started = Instant::now();
        let Some(scope) = CrawlScope::from_start_url(start) else {
            engine_error!("start url {} has no host; nothing to crawl", start);
            return CrawlReport::default();
        };
        if !is_navigable(start) {
            engine_error!("start url {} is not http(s); nothing to crawl", start);
            return CrawlReport::default();
        }

        let run = Arc::new(CrawlRun {
            fetcher: self.fetcher.clone(),
            extractor: self.extractor.clone(),
            scope,
            config: self.config.clone(),
            state: CrawlState::seeded(normalize_page_url(start).as_str()),
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..self.config.workers.max(1) {
            let run = run.clone();
            workers.spawn(async move { run.work(worker_id).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                engine_error!("crawl worker ended abnormally: {}", err);
            }
        }

        let pages_crawled = run.state.pages_crawled();
        let registry = run.state.take_registry();
        let elapsed = started.elapsed();
        engine_info!(
            "crawl finished: {} pages, {} images in {:.1}s",
            pages_crawled,
            registry.len(),
            elapsed.as_secs_f64()
        );
        CrawlReport {
            pages_crawled,
            registry,
            elapsed,
        }
    }
}

/// Everything a crawl worker shares with its siblings.
struct CrawlRun {
    fetcher: Arc<dyn Fetcher>,
    extractor: LinkExtractor,
    scope: CrawlScope,
    config: CrawlConfig,
    state: CrawlState,
}

impl CrawlRun {
    async fn work(&self, worker_id: usize) {
        loop {
            // Registered before taking work so a completion between the check
            // and the wait still wakes this worker.
            let notified = self.state.work_available.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();

            match self.state.take() {
                Take::Page(url) => {
                    let links = if self.state.claim_page(self.config.max_pages) {
                        self.visit(&url).await
                    } else {
                        engine_trace!("worker {worker_id}: budget spent, dropping {url}");
                        PageLinks::default()
                    };
                    self.state.complete(links.anchors.iter().filter_map(|link| {
                        self.scope.admit_page(link).map(String::from)
                    }));
                }
                Take::Wait => {
                    let _ = tokio::time::timeout(self.config.idle_wait(), notified).await;
                }
                Take::Drained => {
                    engine_trace!("worker {worker_id}: frontier drained");
                    return;
                }
            }
        }
    }

    async fn visit(&self, url: &str) -> PageLinks {
        let Some(page) = self.fetcher.fetch_page(url).await else {
            return PageLinks::default();
        };
        let links = self.extractor.extract(&page.html, &page.final_url);

        let registered = self.register_images(&links, &page.final_url);
        let crawled = self.state.record_page();
        engine_trace!("{url}: {} links, {registered} new images", links.anchors.len());
        if crawled == 1 || crawled % self.config.progress_every.max(1) == 0 {
            engine_info!(
                "crawled {} pages, {} images so far",
                crawled,
                self.state.image_count()
            );
        }
        links
    }

    fn register_images(&self, links: &PageLinks, source_page: &str) -> usize {
        let candidates: Vec<ImageCandidate> = links
            .images
            .iter()
            .filter(|image| is_navigable(&image.url))
            .filter_map(|image| {
                let extension = raster_extension(image.url.path())?;
                let (width, height) = estimate_dimensions(
                    image.width.as_deref(),
                    image.height.as_deref(),
                    image.url.as_str(),
                );
                Some(ImageCandidate::new(
                    image.url.as_str(),
                    width,
                    height,
                    extension,
                    source_page,
                ))
            })
            .collect();
        let mut registry = lock(&self.state.registry);
        candidates
            .into_iter()
            .filter(|candidate| registry.insert_if_absent(candidate.clone()))
            .count()
    }
}

enum Take {
    Page(String),
    /// Nothing queued, but pages in flight may still add work.
    Wait,
    /// Nothing queued and nothing in flight.
    Drained,
}

/// The frontier plus the number of pages taken but not yet completed. They
/// live under one lock so "empty and idle" is observed atomically.
struct WorkQueue {
    frontier: CrawlFrontier,
    in_flight: usize,
}

#[derive(Default)]
struct PageCounters {
    claimed: usize,
    crawled: usize,
}

struct CrawlState {
    queue: Mutex<WorkQueue>,
    registry: Mutex<CandidateRegistry>,
    pages: Mutex<PageCounters>,
    work_available: Notify,
}

impl CrawlState {
    fn seeded(start: &str) -> Self {
        Self {
            queue: Mutex::new(WorkQueue {
                frontier: CrawlFrontier::seeded(start),
                in_flight: 0,
            }),
            registry: Mutex::new(CandidateRegistry::new()),
            pages: Mutex::new(PageCounters::default()),
            work_available: Notify::new(),
        }
    }

    fn take(&self) -> Take {
        let mut queue = lock(&self.queue);
        match queue.frontier.pop() {
            Some(url) => {
                queue.in_flight += 1;
                Take::Page(url)
            }
            None if queue.in_flight == 0 => Take::Drained,
            None => Take::Wait,
        }
    }

    /// Queues newly discovered pages and retires one in-flight page.
    fn complete(&self, discovered: impl Iterator<Item = String>) {
        {
            let mut queue = lock(&self.queue);
            for url in discovered {
                queue.frontier.push_if_absent(url);
            }
            queue.in_flight = queue.in_flight.saturating_sub(1);
        }
        self.work_available.notify_waiters();
    }

    /// Reserves one page of the budget. `false` once the budget is spent.
    fn claim_page(&self, max_pages: usize) -> bool {
        let mut pages = lock(&self.pages);
        if pages.claimed >= max_pages {
            return false;
        }
        pages.claimed += 1;
        true
    }

    fn record_page(&self) -> usize {
        let mut pages = lock(&self.pages);
        pages.crawled += 1;
        pages.crawled
    }

    fn pages_crawled(&self) -> usize {
        lock(&self.pages).crawled
    }

    fn image_count(&self) -> usize {
        lock(&self.registry).len()
    }

    fn take_registry(&self) -> CandidateRegistry {
        std::mem::take(&mut *lock(&self.registry))
    }
}
