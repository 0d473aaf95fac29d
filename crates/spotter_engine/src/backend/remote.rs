//! Remote batch executor speaking the versioned match-batch RPC.
//!
//! The template is uploaded once and referenced by token; each batch of
//! candidate URLs is then submitted to the `execute` endpoint under a fixed
//! program identifier. No code is ever sent.

use std::collections::HashMap;
use std::time::Duration;

use engine_logging::{engine_info, engine_warn};
use futures_util::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::{json, Value};
use spotter_core::{
    BackendKind, ExecutionConfig, MatchConfig, MatchResult, MatchStage, DEFAULT_SCALE,
};
use url::Url;

use super::{MatchBackend, ResultSink};
use crate::imaging::Template;
use crate::prober::ProbedCandidate;
use crate::retry::{retry_with_backoff, RetryDecision, RetryPolicy};

/// Identifier of the matcher deployed on the remote side.
pub const REMOTE_PROGRAM: &str = "spotter.match-batch/v1";

/// Envelopes nest at most this deep before a payload counts as malformed.
const MAX_ENVELOPE_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("http status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("remote error: {0}")]
    Logical(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout(err.to_string())
        } else if err.is_decode() {
            RemoteError::Malformed(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

/// One per-URL record of an execute response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteEntry {
    pub url: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub stage: Option<MatchStage>,
}

impl RemoteEntry {
    fn into_result(self) -> MatchResult {
        match self.score.filter(|s| s.is_finite()) {
            Some(score) => MatchResult::new(
                self.url,
                score,
                self.scale.filter(|s| s.is_finite()).unwrap_or(DEFAULT_SCALE),
                self.stage.unwrap_or(MatchStage::Unknown),
            ),
            None => MatchResult::failed(self.url, self.stage.unwrap_or(MatchStage::RemoteFailed)),
        }
    }
}

pub struct RemoteBackend {
    client: reqwest::Client,
    base: Url,
    token: String,
    config: ExecutionConfig,
    matching: MatchConfig,
}

impl RemoteBackend {
    /// Uploads the template and keeps the returned reference token for every
    /// batch of the run.
    pub async fn connect(
        client: reqwest::Client,
        base: Url,
        template: &Template,
        config: ExecutionConfig,
        matching: MatchConfig,
    ) -> Result<Self, RemoteError> {
        let policy = retry_policy(&config);
        let upload_url = endpoint(&base, "upload");
        let token = retry_with_backoff(&policy, "template upload", classify, |_| {
            upload_once(&client, &upload_url, template, config.upload_timeout())
        })
        .await?;
        engine_info!("template uploaded; reference {}", token);
        Ok(Self {
            client,
            base,
            token,
            config,
            matching,
        })
    }

    /// Scores one batch. Never fails: a broken batch degrades to sentinels.
    async fn execute_batch(&self, urls: Vec<String>) -> Vec<MatchResult> {
        let policy = retry_policy(&self.config);
        let outcome = retry_with_backoff(&policy, "remote batch", classify, |_| {
            self.execute_once(&urls)
        })
        .await;
        match outcome {
            Ok(entries) => reconcile(&urls, entries),
            Err(err) => {
                engine_warn!("remote batch of {} failed: {}", urls.len(), err);
                urls.into_iter()
                    .map(|url| MatchResult::failed(url, MatchStage::RemoteFailed))
                    .collect()
            }
        }
    }

    async fn execute_once(&self, urls: &[String]) -> Result<Vec<RemoteEntry>, RemoteError> {
        let urls_param =
            serde_json::to_string(urls).map_err(|err| RemoteError::Malformed(err.to_string()))?;
        let matching_param = serde_json::to_string(&self.matching)
            .map_err(|err| RemoteError::Malformed(err.to_string()))?;
        let body = json!({
            "program": REMOTE_PROGRAM,
            "params": [self.token, urls_param, matching_param],
        });
        let response = self
            .client
            .post(endpoint(&self.base, "execute"))
            .timeout(self.config.execute_timeout())
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        let value: Value = response.json().await?;
        parse_execute_response(value)
    }
}

#[async_trait::async_trait]
impl MatchBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn run(&self, candidates: Vec<ProbedCandidate>, sink: &dyn ResultSink) {
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<Vec<String>> = candidates
            .chunks(batch_size)
            .map(|batch| batch.iter().map(|c| c.url.clone()).collect())
            .collect();
        engine_info!(
            "submitting {} candidates in {} remote batches",
            candidates.len(),
            batches.len()
        );
        let mut pending = stream::iter(batches)
            .map(|urls| self.execute_batch(urls))
            .buffer_unordered(self.config.concurrent_batches.max(1));
        while let Some(results) = pending.next().await {
            for result in results {
                sink.record(result);
            }
        }
    }
}

async fn upload_once(
    client: &reqwest::Client,
    url: &str,
    template: &Template,
    timeout: Duration,
) -> Result<String, RemoteError> {
    let part = Part::bytes(template.encoded().to_vec()).file_name("template.png");
    let response = client
        .post(url)
        .timeout(timeout)
        .multipart(Form::new().part("file", part))
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RemoteError::Status(status.as_u16()));
    }
    let value: Value = response.json().await?;
    ["file_path", "token", "reference"]
        .iter()
        .find_map(|key| value.get(key).and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| RemoteError::Malformed(format!("no reference token in {value}")))
}

/// Interprets an execute response: a direct array of entries, or an envelope
/// carrying it under `result`/`output` or as JSON text under `stdout`. An
/// envelope reporting `error` or a non-zero `exit_code` is a logical failure.
pub fn parse_execute_response(value: Value) -> Result<Vec<RemoteEntry>, RemoteError> {
    parse_at_depth(value, 0)
}

fn parse_at_depth(value: Value, depth: usize) -> Result<Vec<RemoteEntry>, RemoteError> {
    if depth > MAX_ENVELOPE_DEPTH {
        return Err(RemoteError::Malformed("envelope nested too deeply".to_string()));
    }
    match value {
        Value::Array(_) => serde_json::from_value(value)
            .map_err(|err| RemoteError::Malformed(err.to_string())),
        Value::String(text) => {
            let inner: Value = serde_json::from_str(text.trim())
                .map_err(|err| RemoteError::Malformed(err.to_string()))?;
            parse_at_depth(inner, depth + 1)
        }
        Value::Object(mut envelope) => {
            if let Some(error) = envelope.get("error").filter(|e| !e.is_null()) {
                let message = error.as_str().map_or_else(|| error.to_string(), str::to_string);
                return Err(RemoteError::Logical(message));
            }
            if let Some(code) = envelope.get("exit_code").and_then(Value::as_i64) {
                if code != 0 {
                    return Err(RemoteError::Logical(format!("exit code {code}")));
                }
            }
            for key in ["result", "output", "stdout"] {
                if let Some(inner) = envelope.remove(key).filter(|v| !v.is_null()) {
                    return parse_at_depth(inner, depth + 1);
                }
            }
            Err(RemoteError::Malformed("envelope without result".to_string()))
        }
        other => Err(RemoteError::Malformed(format!("unexpected payload {other}"))),
    }
}

/// One result per submitted URL, in submission order. Entries for URLs that
/// were not submitted are dropped; submitted URLs without an entry fail.
fn reconcile(urls: &[String], entries: Vec<RemoteEntry>) -> Vec<MatchResult> {
    let mut by_url: HashMap<String, RemoteEntry> = HashMap::with_capacity(entries.len());
    for entry in entries {
        by_url.entry(entry.url.clone()).or_insert(entry);
    }
    urls.iter()
        .map(|url| match by_url.remove(url) {
            Some(entry) => entry.into_result(),
            None => MatchResult::failed(url.clone(), MatchStage::RemoteFailed),
        })
        .collect()
}

fn classify(err: &RemoteError) -> RetryDecision {
    match err {
        RemoteError::Timeout(_) => RetryDecision::AfterTimeout,
        RemoteError::Transport(_) => RetryDecision::AfterError,
        RemoteError::Status(code) if *code == 429 || *code >= 500 => RetryDecision::AfterError,
        _ => RetryDecision::Stop,
    }
}

fn retry_policy(config: &ExecutionConfig) -> RetryPolicy {
    RetryPolicy::new(config.attempts, config.retry_delay(), config.retry_delay())
}

fn endpoint(base: &Url, path: &str) -> String {
    format!("{}/{path}", base.as_str().trim_end_matches('/'))
}
