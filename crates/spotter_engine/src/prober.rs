use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use engine_logging::{engine_debug, engine_info, engine_trace};
use futures_util::stream::{self, StreamExt};
use spotter_core::{
    evaluate_probe, top_accepted, widened_tolerance, ProbeConfig, ProbeResult, ProbeSignals,
    ProbeVerdict, RankedCandidate, RejectReason,
};

use crate::fetch::Fetcher;
use crate::imaging::{
    decode_gray, edge_pixel_count, histogram, histogram_correlation, laplacian_variance,
    reduced_rendition, resize_gray, Template,
};

/// A probe survivor. Carries its downloaded bytes when the match stage runs
/// locally, so the full-resolution rendition is decoded without fetching again.
#[derive(Debug, Clone)]
pub struct ProbedCandidate {
    pub url: String,
    pub preference: f64,
    pub bytes: Option<Bytes>,
}

#[derive(Debug, Default)]
pub struct ProbeReport {
    /// Best `top_m` accepted candidates, most promising first.
    pub survivors: Vec<ProbedCandidate>,
    /// Every probe outcome after any widening pass.
    pub results: Vec<ProbeResult>,
    /// The tolerance of the widening pass, when one ran.
    pub widened_to: Option<f64>,
}

impl ProbeReport {
    pub fn accepted(&self) -> usize {
        self.results.iter().filter(|r| r.is_accepted()).count()
    }
}

/// Downloads reduced renditions of ranked candidates and keeps the plausible ones.
pub struct Prober {
    fetcher: Arc<dyn Fetcher>,
    template: Arc<Template>,
    config: ProbeConfig,
    keep_bytes: bool,
}

/// Measurement of one candidate, independent of the aspect tolerance.
struct Measured {
    url: String,
    outcome: Result<ProbeSignals, RejectReason>,
    /// Held only while the candidate can still survive.
    bytes: Option<Bytes>,
}

impl Prober {
    pub fn new(fetcher: Arc<dyn Fetcher>, template: Arc<Template>, config: ProbeConfig) -> Self {
        Self {
            fetcher,
            template,
            config,
            keep_bytes: true,
        }
    }

    /// Whether survivors carry their downloaded bytes. A remote backend
    /// fetches by URL and has no use for them.
    pub fn keep_bytes(mut self, keep: bool) -> Self {
        self.keep_bytes = keep;
        self
    }

    pub async fn probe(&self, ranked: &[RankedCandidate]) -> ProbeReport {
        let total = ranked.len();
        let tolerance = self.config.initial_tolerance();
        let mut measured = Vec::with_capacity(total);
        let mut results = Vec::with_capacity(total);
        let mut downloads = stream::iter(ranked)
            .map(|entry| self.measure(entry.candidate.url.clone()))
            .buffer_unordered(self.config.concurrency.max(1));
        while let Some(mut item) = downloads.next().await {
            let result = self.judge(&item, tolerance);
            // Aspect rejections may come back through widening.
            if !result.is_accepted() && !result.is_aspect_rejection() {
                item.bytes = None;
            }
            measured.push(item);
            results.push(result);
            if results.len() % self.config.progress_every.max(1) == 0 {
                engine_info!("probed {}/{total} candidates", results.len());
            }
        }

        let accepted = results.iter().filter(|r| r.is_accepted()).count();
        let aspect_rejected = results.iter().filter(|r| r.is_aspect_rejection()).count();
        let widened_to =
            widened_tolerance(results.len(), accepted, aspect_rejected, tolerance, &self.config);
        if let Some(wider) = widened_to {
            engine_info!(
                "only {accepted}/{} kept, {aspect_rejected} on aspect; retrying those at ±{:.0}%",
                results.len(),
                wider * 100.0
            );
            for (result, m) in results.iter_mut().zip(&measured) {
                if result.is_aspect_rejection() {
                    *result = self.judge(m, wider);
                }
            }
        }

        let mut bytes: HashMap<String, Bytes> = measured
            .into_iter()
            .zip(&results)
            .filter(|(_, result)| result.is_accepted())
            .filter_map(|(m, _)| Some((m.url, m.bytes?)))
            .collect();
        let survivors: Vec<ProbedCandidate> = top_accepted(&results, self.config.top_m)
            .into_iter()
            .filter_map(|result| {
                Some(ProbedCandidate {
                    url: result.url.clone(),
                    preference: result.preference()?,
                    bytes: bytes.remove(&result.url),
                })
            })
            .collect();

        let report = ProbeReport {
            survivors,
            results,
            widened_to,
        };
        engine_info!(
            "probe kept {} of {} candidates ({} accepted)",
            report.survivors.len(),
            report.results.len(),
            report.accepted()
        );
        report
    }

    async fn measure(&self, url: String) -> Measured {
        let Some(bytes) = self.fetcher.download_bytes(&url).await else {
            return Measured {
                url,
                outcome: Err(RejectReason::DownloadFailed),
                bytes: None,
            };
        };
        let template = self.template.clone();
        let config = self.config.clone();
        let data = bytes.clone();
        let outcome =
            tokio::task::spawn_blocking(move || measure_signals(&template, &data, &config))
                .await
                .unwrap_or_else(|err| {
                    engine_debug!("probe worker for {url} failed: {err}");
                    Err(RejectReason::DecodeFailed)
                });
        let bytes = (self.keep_bytes && outcome.is_ok()).then_some(bytes);
        Measured { url, outcome, bytes }
    }

    fn judge(&self, measured: &Measured, tolerance: f64) -> ProbeResult {
        match &measured.outcome {
            Ok(signals) => {
                let verdict = evaluate_probe(signals, tolerance, &self.config);
                if let ProbeVerdict::Rejected(reason) = &verdict {
                    engine_trace!("{}: {}", measured.url, reason);
                }
                ProbeResult {
                    url: measured.url.clone(),
                    verdict,
                    signals: Some(*signals),
                }
            }
            Err(reason) => ProbeResult::rejected(measured.url.clone(), reason.clone()),
        }
    }
}

/// Computes the probe signals of one downloaded candidate.
pub fn measure_signals(
    template: &Template,
    bytes: &[u8],
    config: &ProbeConfig,
) -> Result<ProbeSignals, RejectReason> {
    let full = decode_gray(bytes).map_err(|_| RejectReason::DecodeFailed)?;
    let reduced = reduced_rendition(&full, config.reduction, config.min_reduced_side).ok_or(
        RejectReason::TooSmall {
            width: full.width() / config.reduction.max(1),
            height: full.height() / config.reduction.max(1),
        },
    )?;
    let (width, height) = reduced.dimensions();

    let template_view = resize_gray(template.gray(), width, height);
    let hist_similarity = histogram_correlation(
        &histogram(&template_view, config.hist_bins),
        &histogram(&reduced, config.hist_bins),
    );
    let candidate_aspect = f64::from(full.width()) / f64::from(full.height());

    Ok(ProbeSignals {
        reduced_width: width,
        reduced_height: height,
        hist_similarity,
        edge_pixels: edge_pixel_count(&reduced),
        laplacian_variance: laplacian_variance(&reduced),
        aspect_ratio: candidate_aspect / template.aspect(),
    })
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;

    fn stripes(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x / 16 + y / 16) % 2 * 200 + 20) as u8]))
    }

    fn encode(image: &GrayImage) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut out, image::ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn signals_of_matching_candidate() {
        let template = Template::from_gray(stripes(100, 50));
        let bytes = encode(&stripes(200, 100));
        let signals = measure_signals(&template, &bytes, &ProbeConfig::default()).expect("signals");
        assert_eq!((signals.reduced_width, signals.reduced_height), (50, 25));
        assert!((signals.aspect_ratio - 1.0).abs() < 1e-9);
        assert!(signals.hist_similarity > 0.5);
        assert!(signals.edge_pixels > 8);
    }

    #[test]
    fn small_and_broken_downloads_are_rejected() {
        let template = Template::from_gray(stripes(100, 50));
        let config = ProbeConfig::default();
        assert_eq!(
            measure_signals(&template, &encode(&stripes(40, 40)), &config),
            Err(RejectReason::TooSmall {
                width: 10,
                height: 10
            })
        );
        assert_eq!(
            measure_signals(&template, b"garbage", &config),
            Err(RejectReason::DecodeFailed)
        );
    }
}
