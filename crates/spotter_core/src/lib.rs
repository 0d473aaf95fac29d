//! Spotter core: pure domain logic of the image search pipeline.
//!
//! Nothing in this crate performs I/O. The engine crate feeds it crawl
//! discoveries and image measurements and gets back decisions.
mod candidate;
mod config;
mod frontier;
mod outcome;
mod probe;
mod ranker;
mod scales;
mod scope;
mod target;

pub use candidate::{
    estimate_dimensions, parse_dimension_attr, raster_extension, ExtensionClass, ImageCandidate,
    RASTER_EXTENSIONS,
};
pub use config::{
    CrawlConfig, ExecutionConfig, MatchConfig, ProbeConfig, RankConfig, SearchConfig,
};
pub use frontier::{CandidateRegistry, CrawlFrontier};
pub use outcome::{
    BackendKind, BestMatch, MatchResult, MatchStage, RunSummary, DEFAULT_SCALE, FAILURE_SCORE,
};
pub use probe::{
    evaluate as evaluate_probe, top_accepted, widened_tolerance, ProbeResult, ProbeSignals,
    ProbeVerdict, RejectReason,
};
pub use ranker::{dissimilarity, rank_candidates, RankedCandidate};
pub use scales::{is_feasible, scale_sequence, scaled_size};
pub use scope::{is_navigable, normalize_page_url, CrawlScope, IGNORED_EXTENSIONS};
pub use target::{ExecutionTarget, InvalidTarget, LOCAL_TOKEN};
