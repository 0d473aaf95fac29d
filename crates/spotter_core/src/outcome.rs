use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Score assigned to candidates that could not be matched at all.
pub const FAILURE_SCORE: f64 = -1.0;
pub const DEFAULT_SCALE: f64 = 1.0;

/// How far a candidate got through the match cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchStage {
    /// Stage A ran and the edge score stayed under the gate.
    #[serde(rename = "edges_low")]
    EdgeGate,
    /// Both stages ran; the edge-domain score was the higher one.
    #[serde(rename = "edges_done")]
    EdgeBest,
    /// Both stages ran; the intensity-domain score was the higher one.
    #[serde(rename = "int_done")]
    IntensityBest,
    #[serde(rename = "download_fail")]
    DownloadFailed,
    #[serde(rename = "decode_fail")]
    DecodeFailed,
    #[serde(rename = "no_feasible_scale")]
    NoFeasibleScale,
    /// The remote service failed or answered with something unusable.
    #[serde(rename = "remote_fail")]
    RemoteFailed,
    /// The worker scoring this candidate crashed.
    #[serde(rename = "worker_fail")]
    WorkerFailed,
    #[serde(other, rename = "unknown")]
    Unknown,
}

impl MatchStage {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            MatchStage::DownloadFailed
                | MatchStage::DecodeFailed
                | MatchStage::NoFeasibleScale
                | MatchStage::RemoteFailed
                | MatchStage::WorkerFailed
                | MatchStage::Unknown
        )
    }
}

impl fmt::Display for MatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MatchStage::EdgeGate => "edges_low",
            MatchStage::EdgeBest => "edges_done",
            MatchStage::IntensityBest => "int_done",
            MatchStage::DownloadFailed => "download_fail",
            MatchStage::DecodeFailed => "decode_fail",
            MatchStage::NoFeasibleScale => "no_feasible_scale",
            MatchStage::RemoteFailed => "remote_fail",
            MatchStage::WorkerFailed => "worker_fail",
            MatchStage::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub url: String,
    pub score: f64,
    pub scale: f64,
    pub stage: MatchStage,
}

impl MatchResult {
    pub fn new(url: impl Into<String>, score: f64, scale: f64, stage: MatchStage) -> Self {
        Self {
            url: url.into(),
            score,
            scale,
            stage,
        }
    }

    /// The sentinel result for a candidate that could not be scored.
    pub fn failed(url: impl Into<String>, stage: MatchStage) -> Self {
        Self::new(url, FAILURE_SCORE, DEFAULT_SCALE, stage)
    }
}

/// Running "best so far" reduction over match results.
///
/// A result replaces the current best only with a strictly greater score; an
/// exactly equal score goes to the lexicographically smaller URL so the
/// outcome does not depend on completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    url: Option<String>,
    score: f64,
    scale: f64,
}

impl Default for BestMatch {
    fn default() -> Self {
        Self {
            url: None,
            score: FAILURE_SCORE,
            scale: DEFAULT_SCALE,
        }
    }
}

impl BestMatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one result in. Returns `true` when it became the new best.
    pub fn offer(&mut self, result: &MatchResult) -> bool {
        if !result.score.is_finite() {
            return false;
        }
        let better = result.score > self.score;
        let tie_wins = result.score == self.score
            && self
                .url
                .as_deref()
                .is_some_and(|current| result.url.as_str() < current);
        if better || tie_wins {
            self.url = Some(result.url.clone());
            self.score = result.score;
            self.scale = result.scale;
            true
        } else {
            false
        }
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

/// The single structured record a run emits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub best_url: Option<String>,
    #[serde(serialize_with = "round3")]
    pub score: f64,
    #[serde(serialize_with = "round3")]
    pub scale: f64,
    pub images_processed: usize,
    pub total_images_found: usize,
    pub candidates_after_prefilter: usize,
    pub candidates_after_probe: usize,
    pub pages_crawled: usize,
    pub backend: BackendKind,
    #[serde(serialize_with = "round2")]
    pub time_seconds: f64,
}

impl RunSummary {
    /// A well-formed summary with no best match.
    pub fn empty(backend: BackendKind) -> Self {
        Self {
            best_url: None,
            score: FAILURE_SCORE,
            scale: DEFAULT_SCALE,
            images_processed: 0,
            total_images_found: 0,
            candidates_after_prefilter: 0,
            candidates_after_probe: 0,
            pages_crawled: 0,
            backend,
            time_seconds: 0.0,
        }
    }

    pub fn apply_best(&mut self, best: &BestMatch) {
        self.best_url = best.url().map(str::to_string);
        self.score = best.score();
        self.scale = best.scale();
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn round3<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_to(*value, 3))
}

fn round2<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_to(*value, 2))
}
