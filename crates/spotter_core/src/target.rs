use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::outcome::BackendKind;

/// Literal that disables remote execution (compared case-insensitively).
pub const LOCAL_TOKEN: &str = "none";

/// Where the expensive matching stage runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionTarget {
    Local,
    Remote { base: Url },
}

impl ExecutionTarget {
    pub fn kind(&self) -> BackendKind {
        match self {
            ExecutionTarget::Local => BackendKind::Local,
            ExecutionTarget::Remote { .. } => BackendKind::Remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected an http(s) service URL or `{LOCAL_TOKEN}`, got `{0}`")]
pub struct InvalidTarget(pub String);

impl FromStr for ExecutionTarget {
    type Err = InvalidTarget;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case(LOCAL_TOKEN) {
            return Ok(ExecutionTarget::Local);
        }
        let base = Url::parse(trimmed.trim_end_matches('/'))
            .map_err(|_| InvalidTarget(raw.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(InvalidTarget(raw.to_string()));
        }
        Ok(ExecutionTarget::Remote { base })
    }
}

impl fmt::Display for ExecutionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionTarget::Local => f.write_str("local"),
            ExecutionTarget::Remote { base } => write!(f, "remote {base}"),
        }
    }
}
