use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::core::{assessor::LinterCatalog, domain::FeedbackMessages};

const DEFAULT_RUNNER_MANAGEMENT_URL: &str = "http://127.0.0.1:7200";
const DEFAULT_REGEX_BUDGET_MS: u64 = 2000;

/// Which runner pool backs execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerStrategy {
    Grpc,
    /// Sandboxing disabled: every acquisition fails.
    Null,
    /// In-process stub answering every command with exit code 0.
    Stub,
}

/// Application configuration.
/// Provides defaults with environment variable overrides.
#[derive(Clone, Debug)]
pub struct Config {
    pub runner_strategy: RunnerStrategy,
    pub runner_management_url: String,
    pub catalog_path: Option<PathBuf>,
    pub regex_budget: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let runner_strategy = match lookup("RUNNER_STRATEGY").as_deref().map(str::trim) {
            None | Some("null") => RunnerStrategy::Null,
            Some("grpc") => RunnerStrategy::Grpc,
            Some("stub") => RunnerStrategy::Stub,
            Some(other) => {
                tracing::warn!("Unknown RUNNER_STRATEGY {:?}, sandboxing stays disabled", other);
                RunnerStrategy::Null
            }
        };

        Self {
            runner_strategy,
            runner_management_url: lookup("RUNNER_MANAGEMENT_URL")
                .unwrap_or_else(|| DEFAULT_RUNNER_MANAGEMENT_URL.to_string()),
            catalog_path: lookup("GRADER_CATALOG").filter(|p| !p.is_empty()).map(PathBuf::from),
            regex_budget: Duration::from_millis(
                lookup("REGEX_BUDGET_MS")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_REGEX_BUDGET_MS),
            ),
        }
    }

    /// The configured catalog, or an empty one if none is configured.
    pub fn load_catalog(&self) -> Result<GradingCatalog, CatalogError> {
        match &self.catalog_path {
            Some(path) => GradingCatalog::load(path),
            None => Ok(GradingCatalog::default()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("could not read grading catalog {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid grading catalog {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

/// Linter translations and feedback texts, read from a JSON file.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct GradingCatalog {
    #[serde(default)]
    pub linter: LinterCatalog,
    #[serde(default)]
    pub feedback: FeedbackMessages,
}

impl GradingCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let display = path.display().to_string();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: display.clone(),
            source,
        })?;
        Self::parse(&raw).map_err(|source| CatalogError::Parse { path: display, source })
    }

    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
