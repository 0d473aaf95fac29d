//! Two-stage multiscale template matching.
//!
//! Stage A correlates gradient-magnitude maps and gates out most non-matches
//! cheaply; stage B repeats the sweep on raw intensities for survivors.

use std::sync::Arc;

use engine_logging::engine_trace;
use image::GrayImage;
use spotter_core::{scale_sequence, scaled_size, MatchConfig, MatchResult, MatchStage};

use crate::imaging::{decode_gray, resize_gray, sobel_magnitude, Template};
use crate::ncc::{NccSearcher, Plane};

/// Best score of one sweep and the scale it was found at.
#[derive(Debug, Clone, Copy, PartialEq)]
struct SweepBest {
    score: f64,
    scale: f64,
}

/// Scores candidates against one template. Cheap to clone; the template is shared.
#[derive(Debug, Clone)]
pub struct MatchEngine {
    template: Arc<Template>,
    config: MatchConfig,
}

impl MatchEngine {
    pub fn new(template: Arc<Template>, config: MatchConfig) -> Self {
        Self { template, config }
    }

    /// Decodes and scores a downloaded candidate. Undecodable bytes score the
    /// failure sentinel.
    pub fn score_bytes(&self, url: &str, bytes: &[u8]) -> MatchResult {
        match decode_gray(bytes) {
            Ok(candidate) => self.score_image(url, &candidate),
            Err(err) => {
                engine_trace!("{url}: {err}");
                MatchResult::failed(url, MatchStage::DecodeFailed)
            }
        }
    }

    pub fn score_image(&self, url: &str, candidate: &GrayImage) -> MatchResult {
        let scales = scale_sequence(
            self.template.dimensions(),
            candidate.dimensions(),
            &self.config,
        );
        if scales.is_empty() {
            return MatchResult::failed(url, MatchStage::NoFeasibleScale);
        }

        let Some(coarse) = self.edge_sweep(&scales, candidate) else {
            return MatchResult::failed(url, MatchStage::EdgeGate);
        };
        engine_trace!("{url}: edges {:.3} at {:.3}", coarse.score, coarse.scale);
        if coarse.score < self.config.edge_gate {
            return MatchResult::new(url, coarse.score, coarse.scale, MatchStage::EdgeGate);
        }

        match self.intensity_sweep(&scales, candidate) {
            Some(fine) if fine.score >= coarse.score => {
                MatchResult::new(url, fine.score, fine.scale, MatchStage::IntensityBest)
            }
            _ => MatchResult::new(url, coarse.score, coarse.scale, MatchStage::EdgeBest),
        }
    }

    fn edge_sweep(&self, scales: &[f64], candidate: &GrayImage) -> Option<SweepBest> {
        let searcher = NccSearcher::new(&Plane::from(&sobel_magnitude(candidate)));
        let render = |width: u32, height: u32| Plane::from(&*self.template.edges_at(width, height));
        self.sweep(scales, render, &searcher)
    }

    fn intensity_sweep(&self, scales: &[f64], candidate: &GrayImage) -> Option<SweepBest> {
        let searcher = NccSearcher::new(&Plane::from(candidate));
        let render = |width: u32, height: u32| {
            Plane::from(&resize_gray(self.template.gray(), width, height))
        };
        self.sweep(scales, render, &searcher)
    }

    /// Tries each scale in order, stopping once the early-stop score is reached.
    fn sweep(
        &self,
        scales: &[f64],
        render: impl Fn(u32, u32) -> Plane,
        searcher: &NccSearcher,
    ) -> Option<SweepBest> {
        let mut best: Option<SweepBest> = None;
        for &scale in scales {
            let (width, height) = scaled_size(self.template.dimensions(), scale);
            let Some(score) = searcher.best(&render(width, height)) else {
                continue;
            };
            if best.is_none_or(|b| score > b.score) {
                best = Some(SweepBest { score, scale });
            }
            if score >= self.config.early_stop {
                break;
            }
        }
        best
    }
}
