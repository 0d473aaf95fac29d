//! Acceptance policy for the reduced-resolution probe.
//!
//! The prober computes [`ProbeSignals`] for each download; everything here is
//! the pure decision over those signals.

use std::cmp::Ordering;
use std::fmt;

use serde::Serialize;

use crate::config::ProbeConfig;

/// Cheap similarity and texture measurements on a reduced rendition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbeSignals {
    pub reduced_width: u32,
    pub reduced_height: u32,
    /// Correlation of grayscale histograms, roughly in [-1, 1].
    pub hist_similarity: f64,
    pub edge_pixels: usize,
    pub laplacian_variance: f64,
    /// Candidate aspect ratio divided by the template's.
    pub aspect_ratio: f64,
}

impl ProbeSignals {
    pub fn is_textured(&self, config: &ProbeConfig) -> bool {
        self.edge_pixels >= config.edge_pixel_floor
            || self.laplacian_variance >= config.laplacian_floor
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    DownloadFailed,
    DecodeFailed,
    TooSmall { width: u32, height: u32 },
    Aspect { ratio: f64, tolerance: f64 },
    Flat,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DownloadFailed => write!(f, "download failed"),
            RejectReason::DecodeFailed => write!(f, "reduced decode failed"),
            RejectReason::TooSmall { width, height } => {
                write!(f, "reduced rendition too small ({width}x{height})")
            }
            RejectReason::Aspect { ratio, tolerance } => {
                write!(f, "aspect ratio {ratio:.2} outside ±{:.0}%", tolerance * 100.0)
            }
            RejectReason::Flat => write!(f, "flat or low histogram similarity"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ProbeVerdict {
    /// `preference` ranks accepted candidates; lower is better.
    Accepted { preference: f64 },
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub url: String,
    pub verdict: ProbeVerdict,
    pub signals: Option<ProbeSignals>,
}

impl ProbeResult {
    pub fn rejected(url: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            url: url.into(),
            verdict: ProbeVerdict::Rejected(reason),
            signals: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.verdict, ProbeVerdict::Accepted { .. })
    }

    pub fn preference(&self) -> Option<f64> {
        match self.verdict {
            ProbeVerdict::Accepted { preference } => Some(preference),
            ProbeVerdict::Rejected(_) => None,
        }
    }

    pub fn is_aspect_rejection(&self) -> bool {
        matches!(
            self.verdict,
            ProbeVerdict::Rejected(RejectReason::Aspect { .. })
        )
    }
}

/// Applies the acceptance policy at the given aspect tolerance.
///
/// A histogram similarity at or above `hist_skip_aspect` accepts regardless of
/// aspect (crops and letterboxing change the frame but keep the tones).
pub fn evaluate(signals: &ProbeSignals, tolerance: f64, config: &ProbeConfig) -> ProbeVerdict {
    let within_tolerance =
        (1.0 - tolerance..=1.0 + tolerance).contains(&signals.aspect_ratio);
    let aspect_ok = within_tolerance || signals.hist_similarity >= config.hist_skip_aspect;
    if !aspect_ok {
        return ProbeVerdict::Rejected(RejectReason::Aspect {
            ratio: signals.aspect_ratio,
            tolerance,
        });
    }

    let textured = signals.is_textured(config);
    if signals.hist_similarity < config.hist_low && !textured {
        return ProbeVerdict::Rejected(RejectReason::Flat);
    }

    ProbeVerdict::Accepted {
        preference: preference(signals, textured, config),
    }
}

fn preference(signals: &ProbeSignals, textured: bool, config: &ProbeConfig) -> f64 {
    let aspect_term = (signals.aspect_ratio - 1.0).abs();
    let hist_term = 1.0 - signals.hist_similarity.clamp(0.0, 1.0);
    let texture_term = if textured { 0.0 } else { config.texture_penalty };
    aspect_term * config.aspect_weight + hist_term * config.hist_weight + texture_term
}

/// Returns the widened tolerance when too few candidates survived and most
/// rejections were aspect-based; `None` when no retry is warranted.
pub fn widened_tolerance(
    probed: usize,
    accepted: usize,
    aspect_rejected: usize,
    tolerance: f64,
    config: &ProbeConfig,
) -> Option<f64> {
    if probed == 0 || tolerance >= config.aspect_tolerance_max {
        return None;
    }
    let kept_fraction = accepted as f64 / probed as f64;
    let aspect_heavy = aspect_rejected as f64 > config.widen_when_aspect_rejects_above * probed as f64;
    if kept_fraction < config.widen_when_kept_below && aspect_heavy {
        Some((tolerance * config.widen_factor).min(config.aspect_tolerance_max))
    } else {
        None
    }
}

/// Accepted results by ascending preference (URL breaks ties), at most `top_m`.
pub fn top_accepted(results: &[ProbeResult], top_m: usize) -> Vec<&ProbeResult> {
    let mut accepted: Vec<&ProbeResult> = results.iter().filter(|r| r.is_accepted()).collect();
    accepted.sort_by(|a, b| {
        a.preference()
            .partial_cmp(&b.preference())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.url.cmp(&b.url))
    });
    accepted.truncate(top_m);
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(aspect_ratio: f64, hist: f64, edges: usize, lap: f64) -> ProbeSignals {
        ProbeSignals {
            reduced_width: 100,
            reduced_height: 100,
            hist_similarity: hist,
            edge_pixels: edges,
            laplacian_variance: lap,
            aspect_ratio,
        }
    }

    #[test]
    fn aspect_inside_tolerance_is_accepted() {
        let config = ProbeConfig::default();
        let verdict = evaluate(&signals(1.2, 0.0, 500, 10.0), 0.35, &config);
        assert!(matches!(verdict, ProbeVerdict::Accepted { .. }));
    }

    #[test]
    fn aspect_outside_tolerance_is_rejected() {
        let config = ProbeConfig::default();
        let verdict = evaluate(&signals(2.0, 0.1, 500, 10.0), 0.35, &config);
        assert!(matches!(
            verdict,
            ProbeVerdict::Rejected(RejectReason::Aspect { .. })
        ));
    }

    #[test]
    fn flat_low_histogram_is_rejected_but_strong_histogram_saves_it() {
        let config = ProbeConfig::default();
        let flat = evaluate(&signals(1.0, 0.05, 0, 0.5), 0.35, &config);
        assert_eq!(flat, ProbeVerdict::Rejected(RejectReason::Flat));
        let toned = evaluate(&signals(1.0, 0.5, 0, 0.5), 0.35, &config);
        assert!(matches!(toned, ProbeVerdict::Accepted { .. }));
    }

    #[test]
    fn a_couple_of_edge_pixels_count_as_texture() {
        let config = ProbeConfig::default();
        let sparse = evaluate(&signals(1.0, 0.05, 2, 0.0), 0.35, &config);
        assert!(matches!(sparse, ProbeVerdict::Accepted { .. }));
        let bare = evaluate(&signals(1.0, 0.05, 1, 0.0), 0.35, &config);
        assert_eq!(bare, ProbeVerdict::Rejected(RejectReason::Flat));
    }

    #[test]
    fn untextured_acceptance_carries_penalty() {
        let config = ProbeConfig::default();
        let textured = evaluate(&signals(1.0, 0.5, 100, 10.0), 0.35, &config);
        let plain = evaluate(&signals(1.0, 0.5, 0, 0.0), 0.35, &config);
        match (textured, plain) {
            (
                ProbeVerdict::Accepted { preference: a },
                ProbeVerdict::Accepted { preference: b },
            ) => assert!((b - a - config.texture_penalty).abs() < 1e-9),
            other => panic!("unexpected verdicts {other:?}"),
        }
    }

    #[test]
    fn widening_requires_few_kept_and_aspect_majority() {
        let config = ProbeConfig::default();
        let widened = widened_tolerance(100, 10, 80, 0.35, &config).unwrap();
        assert!((widened - 0.6125).abs() < 1e-9);
        assert_eq!(widened_tolerance(100, 30, 60, 0.35, &config), None);
        assert_eq!(widened_tolerance(100, 10, 40, 0.35, &config), None);
        assert_eq!(widened_tolerance(100, 10, 80, 0.70, &config), None);
        assert_eq!(widened_tolerance(100, 10, 80, 0.5, &config), Some(0.70));
        assert_eq!(widened_tolerance(0, 0, 0, 0.35, &config), None);
    }

    #[test]
    fn top_accepted_sorts_and_truncates() {
        let results = vec![
            ProbeResult {
                url: "b".into(),
                verdict: ProbeVerdict::Accepted { preference: 0.3 },
                signals: None,
            },
            ProbeResult::rejected("x", RejectReason::Flat),
            ProbeResult {
                url: "a".into(),
                verdict: ProbeVerdict::Accepted { preference: 0.1 },
                signals: None,
            },
            ProbeResult {
                url: "c".into(),
                verdict: ProbeVerdict::Accepted { preference: 0.9 },
                signals: None,
            },
        ];
        let top: Vec<&str> = top_accepted(&results, 2).iter().map(|r| r.url.as_str()).collect();
        assert_eq!(top, vec!["a", "b"]);
    }
}
