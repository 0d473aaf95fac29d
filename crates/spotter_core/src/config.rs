use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for one search run. Every field has a default, so a partial
/// configuration file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SearchConfig {
    pub crawl: CrawlConfig,
    pub rank: RankConfig,
    pub probe: ProbeConfig,
    pub matching: MatchConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    pub workers: usize,
    pub max_pages: usize,
    /// How long an idle worker waits for new work before re-checking for drain.
    pub idle_wait_ms: u64,
    pub progress_every: usize,
}

impl CrawlConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            workers: 10,
            max_pages: 500,
            idle_wait_ms: 3_000,
            progress_every: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    pub top_k: usize,
    pub unknown_aspect_penalty: f64,
    pub min_area_side: u32,
    pub tiny_penalty: f64,
    pub preferred_ext_weight: f64,
    pub legacy_ext_weight: f64,
    pub other_ext_weight: f64,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            top_k: 240,
            unknown_aspect_penalty: 0.35,
            min_area_side: 120,
            tiny_penalty: 0.8,
            preferred_ext_weight: 0.0,
            legacy_ext_weight: 0.2,
            other_ext_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub concurrency: usize,
    pub top_m: usize,
    pub reduction: u32,
    pub min_reduced_side: u32,
    pub aspect_tolerance: f64,
    pub aspect_tolerance_floor: f64,
    pub aspect_tolerance_max: f64,
    pub widen_factor: f64,
    /// Histogram similarity at or above which aspect mismatch is forgiven.
    pub hist_skip_aspect: f64,
    /// Histogram similarity below which a textureless candidate is dropped.
    pub hist_low: f64,
    /// Edge pixels (Sobel magnitude at or above the edge threshold) that make
    /// a reduced rendition count as textured.
    pub edge_pixel_floor: usize,
    pub laplacian_floor: f64,
    pub hist_bins: usize,
    pub aspect_weight: f64,
    pub hist_weight: f64,
    pub texture_penalty: f64,
    pub widen_when_kept_below: f64,
    pub widen_when_aspect_rejects_above: f64,
    pub progress_every: usize,
}

impl ProbeConfig {
    /// The tolerance used for the first probing pass.
    pub fn initial_tolerance(&self) -> f64 {
        self.aspect_tolerance.max(self.aspect_tolerance_floor)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 32,
            top_m: 80,
            reduction: 4,
            min_reduced_side: 16,
            aspect_tolerance: 0.35,
            aspect_tolerance_floor: 0.20,
            aspect_tolerance_max: 0.70,
            widen_factor: 1.75,
            hist_skip_aspect: 0.25,
            hist_low: 0.12,
            edge_pixel_floor: 2,
            laplacian_floor: 3.5,
            hist_bins: 32,
            aspect_weight: 0.7,
            hist_weight: 0.5,
            texture_penalty: 0.15,
            widen_when_kept_below: 0.25,
            widen_when_aspect_rejects_above: 0.5,
            progress_every: 40,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub scale_min: f64,
    pub scale_max: f64,
    pub window_low: f64,
    pub window_high: f64,
    pub scale_steps: usize,
    pub min_template_side: u32,
    pub early_stop: f64,
    pub edge_gate: f64,
    /// Worker threads for local matching; `0` picks from available parallelism.
    pub local_workers: usize,
    pub progress_every: usize,
}

impl MatchConfig {
    pub const MAX_AUTO_WORKERS: usize = 8;

    pub fn resolved_local_workers(&self, available: usize) -> usize {
        if self.local_workers > 0 {
            self.local_workers
        } else {
            available.clamp(1, Self::MAX_AUTO_WORKERS)
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            scale_min: 0.25,
            scale_max: 1.50,
            window_low: 0.7,
            window_high: 1.3,
            scale_steps: 6,
            min_template_side: 8,
            early_stop: 0.92,
            edge_gate: 0.60,
            local_workers: 0,
            progress_every: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub batch_size: usize,
    pub concurrent_batches: usize,
    pub upload_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    pub attempts: u32,
    pub retry_delay_ms: u64,
}

impl ExecutionConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn execute_timeout(&self) -> Duration {
        Duration::from_millis(self.execute_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            batch_size: 24,
            concurrent_batches: 8,
            upload_timeout_ms: 60_000,
            execute_timeout_ms: 1_200_000,
            attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config: SearchConfig =
            serde_json::from_str(r#"{"probe": {"top_m": 5}, "crawl": {"max_pages": 3}}"#)
                .unwrap();
        assert_eq!(config.probe.top_m, 5);
        assert_eq!(config.crawl.max_pages, 3);
        assert_eq!(config.crawl.workers, CrawlConfig::default().workers);
        assert_eq!(config.matching, MatchConfig::default());
    }

    #[test]
    fn auto_workers_are_capped() {
        let config = MatchConfig::default();
        assert_eq!(config.resolved_local_workers(64), MatchConfig::MAX_AUTO_WORKERS);
        assert_eq!(config.resolved_local_workers(0), 1);
        let fixed = MatchConfig {
            local_workers: 3,
            ..MatchConfig::default()
        };
        assert_eq!(fixed.resolved_local_workers(64), 3);
    }

    #[test]
    fn initial_tolerance_respects_floor() {
        let config = ProbeConfig {
            aspect_tolerance: 0.05,
            ..ProbeConfig::default()
        };
        assert_eq!(config.initial_tolerance(), 0.20);
    }
}
