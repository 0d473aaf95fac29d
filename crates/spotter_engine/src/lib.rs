//! Spotter engine: network, image and compute pipeline around the core logic.
mod backend;
mod crawler;
mod decode;
mod fetch;
mod imaging;
mod links;
mod matcher;
mod ncc;
mod orchestrator;
mod prober;
mod retry;
mod sync;
mod types;

pub use backend::{
    parse_execute_response, BackendError, LocalBackend, MatchBackend, RemoteBackend, RemoteEntry,
    RemoteError, ResultSink, REMOTE_PROGRAM,
};
pub use crawler::{CrawlReport, Crawler};
pub use decode::{decode_html, DecodedHtml};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use imaging::{
    decode_gray, edge_pixel_count, histogram, histogram_correlation, laplacian_variance,
    reduced_rendition, sobel_magnitude, strip_png_exif, FloatImage, ImageError, Template,
    TemplateError, EDGE_THRESHOLD,
};
pub use links::{ImageRef, LinkExtractor, PageLinks};
pub use matcher::MatchEngine;
pub use ncc::{NccSearcher, Plane};
pub use orchestrator::{Orchestrator, RunError, RunState, SearchRequest};
pub use prober::{measure_signals, ProbeReport, ProbedCandidate, Prober};
pub use retry::{retry_with_backoff, RetryDecision, RetryPolicy};
pub use types::{FailureKind, FetchError, FetchMetadata, FetchOutput, FetchedPage};
