//! Download-free prefilter over the candidate registry.
//!
//! Sites can expose thousands of images; this orders them by how plausible a
//! match looks from metadata alone and keeps the best `top_k`.

use std::cmp::Ordering;

use crate::candidate::{ExtensionClass, ImageCandidate};
use crate::config::RankConfig;
use crate::frontier::CandidateRegistry;

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    pub candidate: ImageCandidate,
    /// Lower is more promising.
    pub dissimilarity: f64,
}

/// Dissimilarity of one candidate against a template aspect ratio.
pub fn dissimilarity(candidate: &ImageCandidate, template_aspect: f64, config: &RankConfig) -> f64 {
    let (aspect_term, tiny_term) = match candidate.dimensions() {
        Some((w, h)) => {
            let aspect = f64::from(w) / f64::from(h.max(1));
            let floor = u64::from(config.min_area_side) * u64::from(config.min_area_side);
            let tiny = if u64::from(w) * u64::from(h) < floor {
                config.tiny_penalty
            } else {
                0.0
            };
            ((aspect - template_aspect).abs(), tiny)
        }
        None => (config.unknown_aspect_penalty, 0.0),
    };
    let ext_term = match ExtensionClass::of(&candidate.extension) {
        ExtensionClass::Preferred => config.preferred_ext_weight,
        ExtensionClass::Legacy => config.legacy_ext_weight,
        ExtensionClass::Other => config.other_ext_weight,
    };
    aspect_term + tiny_term + ext_term
}

/// Scores every registered candidate, sorts ascending and keeps the top K.
///
/// Equal scores are ordered by URL so the cut does not depend on discovery order.
pub fn rank_candidates(
    registry: &CandidateRegistry,
    template_width: u32,
    template_height: u32,
    config: &RankConfig,
) -> Vec<RankedCandidate> {
    let template_aspect = f64::from(template_width) / f64::from(template_height.max(1));
    let mut ranked: Vec<RankedCandidate> = registry
        .iter()
        .map(|candidate| RankedCandidate {
            dissimilarity: dissimilarity(candidate, template_aspect, config),
            candidate: candidate.clone(),
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.dissimilarity
            .partial_cmp(&b.dissimilarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate.url.cmp(&b.candidate.url))
    });
    ranked.truncate(config.top_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(url: &str, dims: Option<(u32, u32)>, ext: &str) -> ImageCandidate {
        ImageCandidate::new(
            url,
            dims.map(|d| d.0),
            dims.map(|d| d.1),
            ext,
            "https://site.test/",
        )
    }

    #[test]
    fn matching_aspect_beats_unknown_beats_tiny() {
        let config = RankConfig::default();
        let exact = candidate("a", Some((400, 300)), "jpg");
        let unknown = candidate("b", None, "jpg");
        let tiny = candidate("c", Some((40, 30)), "jpg");
        let aspect = 4.0 / 3.0;
        let d_exact = dissimilarity(&exact, aspect, &config);
        let d_unknown = dissimilarity(&unknown, aspect, &config);
        let d_tiny = dissimilarity(&tiny, aspect, &config);
        assert!(d_exact < 1e-9);
        assert!((d_unknown - 0.35).abs() < 1e-9);
        assert!((d_tiny - 0.8).abs() < 1e-9);
    }

    #[test]
    fn extension_weights_apply() {
        let config = RankConfig::default();
        let gif = candidate("a", Some((400, 300)), "gif");
        let other = candidate("b", Some((400, 300)), "tif");
        assert!((dissimilarity(&gif, 4.0 / 3.0, &config) - 0.2).abs() < 1e-9);
        assert!((dissimilarity(&other, 4.0 / 3.0, &config) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn ties_are_broken_by_url() {
        let registry: CandidateRegistry = [
            candidate("https://s/z.jpg", None, "jpg"),
            candidate("https://s/a.jpg", None, "jpg"),
        ]
        .into_iter()
        .collect();
        let ranked = rank_candidates(&registry, 100, 100, &RankConfig::default());
        assert_eq!(ranked[0].candidate.url, "https://s/a.jpg");
    }
}
