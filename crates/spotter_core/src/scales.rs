//! Scale sequence for multiscale template matching.

use crate::config::MatchConfig;

/// Resize factors to try for a template of `template` size inside a
/// `candidate` image, ordered nearest-to-expected first.
///
/// The expected scale is the largest factor at which the template still fits.
/// The search window is `[window_low, window_high]` times that value, clipped
/// to the global envelope and to the largest fitting scale; if the clipped
/// window is empty it falls back to `[scale_min, min(scale_max, expected)]`.
/// Every returned scale yields a resized template of at least
/// `min_template_side` pixels that fits inside the candidate.
pub fn scale_sequence(
    template: (u32, u32),
    candidate: (u32, u32),
    config: &MatchConfig,
) -> Vec<f64> {
    let (tw, th) = (template.0.max(1) as f64, template.1.max(1) as f64);
    let (cw, ch) = (candidate.0 as f64, candidate.1 as f64);
    let expected = (cw / tw).min(ch / th);
    if !expected.is_finite() || expected <= 0.0 {
        return Vec::new();
    }

    let mut lo = config.scale_min.max(config.window_low * expected);
    let mut hi = config.scale_max.min(config.window_high * expected).min(expected);
    if hi < lo {
        lo = config.scale_min;
        hi = config.scale_max.min(expected);
    }
    if hi < lo {
        return Vec::new();
    }

    let mut scales = geometric_samples(lo, hi, config.scale_steps);
    if (lo..=hi).contains(&1.0) {
        snap_nearest(&mut scales, 1.0);
    }

    let target = expected.clamp(lo, hi);
    scales.retain(|&s| is_feasible(s, template, candidate, config.min_template_side));
    scales.sort_by(|a, b| {
        let da = (a / target).ln().abs();
        let db = (b / target).ln().abs();
        da.total_cmp(&db)
    });
    scales.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
    scales
}

/// Template size after scaling, truncated like a pixel resize.
pub fn scaled_size(template: (u32, u32), scale: f64) -> (u32, u32) {
    (
        (f64::from(template.0) * scale) as u32,
        (f64::from(template.1) * scale) as u32,
    )
}

pub fn is_feasible(scale: f64, template: (u32, u32), candidate: (u32, u32), min_side: u32) -> bool {
    let (sw, sh) = scaled_size(template, scale);
    sw >= min_side && sh >= min_side && sw <= candidate.0 && sh <= candidate.1
}

fn geometric_samples(lo: f64, hi: f64, steps: usize) -> Vec<f64> {
    let steps = steps.max(1);
    if steps == 1 || (hi - lo).abs() < f64::EPSILON {
        return vec![hi];
    }
    let ratio = (hi / lo).powf(1.0 / (steps - 1) as f64);
    let mut samples: Vec<f64> = (0..steps).map(|i| lo * ratio.powi(i as i32)).collect();
    // Pin the endpoints against accumulated rounding.
    samples[0] = lo;
    samples[steps - 1] = hi;
    samples
}

fn snap_nearest(scales: &mut [f64], value: f64) {
    if let Some(nearest) = scales
        .iter_mut()
        .min_by(|a, b| (**a - value).abs().total_cmp(&(**b - value).abs()))
    {
        *nearest = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sizes_try_unity_first() {
        let scales = scale_sequence((200, 100), (200, 100), &MatchConfig::default());
        assert_eq!(scales.first().copied(), Some(1.0));
        assert!(scales.iter().all(|&s| s <= 1.0));
    }

    #[test]
    fn window_tracks_expected_scale() {
        let config = MatchConfig::default();
        let scales = scale_sequence((100, 100), (50, 80), &config);
        assert!(!scales.is_empty());
        assert_eq!(scales[0], 0.5);
        for s in &scales {
            assert!(*s >= 0.35 - 1e-9 && *s <= 0.5 + 1e-9, "scale {s} outside window");
        }
    }

    #[test]
    fn large_candidates_fall_back_to_envelope() {
        let config = MatchConfig::default();
        let scales = scale_sequence((100, 100), (1000, 1000), &config);
        assert_eq!(scales.len(), config.scale_steps);
        assert!(scales.contains(&1.0));
        assert_eq!(scales[0], 1.5);
        assert!(scales.iter().all(|s| (0.25..=1.5).contains(s)));
    }

    #[test]
    fn template_that_never_fits_has_no_scales() {
        let scales = scale_sequence((1000, 1000), (100, 100), &MatchConfig::default());
        assert!(scales.is_empty());
    }

    #[test]
    fn tiny_candidates_respect_pixel_floor() {
        let config = MatchConfig::default();
        let scales = scale_sequence((40, 40), (12, 12), &config);
        for s in &scales {
            let (w, h) = scaled_size((40, 40), *s);
            assert!(w >= 8 && h >= 8 && w <= 12 && h <= 12);
        }
        assert!(scale_sequence((40, 40), (7, 7), &config).is_empty());
    }
}
