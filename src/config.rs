//! Immutable application configuration.
//!
//! The data-root mode (production vs test) is decided once, when the config
//! value is constructed at startup, and every component receives the frozen
//! value by reference or clone. There is no mutable global and no mode
//! switching after initialization.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default HTTP timeout for API requests, in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

/// Default retry count for transient HTTP failures.
pub const DEFAULT_HTTP_MAX_RETRIES: u32 = 3;

/// Default per-stage concurrency bound.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Embedded database filename under `<root>/cache/`.
const DB_FILE_NAME: &str = "scholarpipe.db";

/// Configuration errors are fatal at the start of the stage that needs them.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A contact email is required for every outbound API request.
    #[error("contact email not configured; set SCHOLARPIPE_CONTACT_EMAIL")]
    MissingContactEmail,

    /// The filter stage needs an LLM endpoint.
    #[error("LLM endpoint not configured; set SCHOLARPIPE_LLM_BASE_URL")]
    MissingLlmEndpoint,

    /// The convert stage needs an external DOCX converter binary.
    #[error("DOCX converter not configured; set SCHOLARPIPE_DOCX_CONVERTER")]
    MissingDocxConverter,
}

/// Which data root the process operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    /// Persist under `data/`.
    Production,
    /// Persist under `test_data/`.
    Test,
}

impl DataMode {
    /// Returns the root directory name for this mode.
    #[must_use]
    pub fn root_dir(self) -> &'static str {
        match self {
            Self::Production => "data",
            Self::Test => "test_data",
        }
    }
}

/// LLM endpoint settings for the filter stage.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL of an OpenAI-compatible chat-completions endpoint.
    pub base_url: String,
    /// Bearer token, when the endpoint requires one.
    pub api_key: Option<String>,
    /// Output token cap per decision.
    pub max_output_tokens: u32,
}

/// Frozen application configuration, built once in `main` and injected into
/// every component constructor.
#[derive(Debug, Clone)]
pub struct AppConfig {
    mode: DataMode,
    data_root: PathBuf,
    /// Contact email embedded in User-Agents and required by Unpaywall.
    pub contact_email: Option<String>,
    /// Optional Semantic Scholar API key (higher rate limits).
    pub semantic_scholar_api_key: Option<String>,
    /// LLM endpoint, when configured.
    pub llm: Option<LlmSettings>,
    /// External DOCX→Markdown converter program, when configured.
    pub docx_converter: Option<String>,
    /// HTTP timeout applied to API requests.
    pub http_timeout_secs: u64,
    /// Retry budget for transient HTTP failures.
    pub http_max_retries: u32,
}

impl AppConfig {
    /// Builds a configuration rooted under the current directory for `mode`,
    /// reading optional settings from `SCHOLARPIPE_*` environment variables.
    #[must_use]
    pub fn from_env(mode: DataMode) -> Self {
        let llm = env_nonempty("SCHOLARPIPE_LLM_BASE_URL").map(|base_url| LlmSettings {
            base_url,
            api_key: env_nonempty("SCHOLARPIPE_LLM_API_KEY"),
            max_output_tokens: 512,
        });

        Self {
            mode,
            data_root: PathBuf::from(mode.root_dir()),
            contact_email: env_nonempty("SCHOLARPIPE_CONTACT_EMAIL"),
            semantic_scholar_api_key: env_nonempty("SCHOLARPIPE_S2_API_KEY"),
            llm,
            docx_converter: env_nonempty("SCHOLARPIPE_DOCX_CONVERTER"),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_max_retries: DEFAULT_HTTP_MAX_RETRIES,
        }
    }

    /// Builds a configuration with an explicit data root (tests use tempdirs).
    #[must_use]
    pub fn with_root(mode: DataMode, data_root: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            data_root: data_root.into(),
            contact_email: None,
            semantic_scholar_api_key: None,
            llm: None,
            docx_converter: None,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            http_max_retries: DEFAULT_HTTP_MAX_RETRIES,
        }
    }

    /// Returns the frozen data mode.
    #[must_use]
    pub fn mode(&self) -> DataMode {
        self.mode
    }

    /// Returns the data root directory.
    #[must_use]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Path of the embedded database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_root.join("cache").join(DB_FILE_NAME)
    }

    /// Directory for downloaded PDFs.
    #[must_use]
    pub fn pdfs_dir(&self) -> PathBuf {
        self.data_root.join("pdfs")
    }

    /// Directory searched for DOCX renditions.
    #[must_use]
    pub fn docx_dir(&self) -> PathBuf {
        self.data_root.join("docx")
    }

    /// Directory for converted Markdown.
    #[must_use]
    pub fn markdown_dir(&self) -> PathBuf {
        self.data_root.join("markdown")
    }

    /// Returns the contact email or the fatal configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingContactEmail`] when unset.
    pub fn require_contact_email(&self) -> Result<&str, ConfigError> {
        self.contact_email
            .as_deref()
            .ok_or(ConfigError::MissingContactEmail)
    }

    /// Returns the LLM settings or the fatal configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingLlmEndpoint`] when unset.
    pub fn require_llm(&self) -> Result<&LlmSettings, ConfigError> {
        self.llm.as_ref().ok_or(ConfigError::MissingLlmEndpoint)
    }

    /// Returns the DOCX converter program or the fatal configuration error.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDocxConverter`] when unset.
    pub fn require_docx_converter(&self) -> Result<&str, ConfigError> {
        self.docx_converter
            .as_deref()
            .ok_or(ConfigError::MissingDocxConverter)
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
