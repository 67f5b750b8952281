//! Pipeline configuration.
//!
//! Explicit builder values win; anything left unset falls back to a
//! `CHUNKFORGE_*` environment variable (a `.env` file is honored) and then
//! to the compiled default.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Hard ceiling on tokens per chunk; also the embedding-input guard.
    pub max_tokens: usize,
    /// Retryable re-attempts per stage-failure streak before the job is
    /// terminally failed.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
    /// Uniform jitter fraction applied to each delay (0.1 = ±10%).
    pub backoff_jitter: f64,
    /// Fixed media segment length for video/audio extraction.
    pub segment_duration: Duration,
    /// Timeout applied to every external service call.
    pub request_timeout: Duration,
    /// Token overlap seeded between consecutive chunks when the chunker has
    /// to fall back to naive splitting. Structural splits carry no overlap.
    pub chunk_overlap_tokens: usize,
    pub text_model: String,
    pub multimodal_model: String,
    pub text_dim: usize,
    pub multimodal_dim: usize,
    /// Embedding service endpoint, when the HTTP provider is used.
    pub embeddings_url: Option<String>,
    /// Transcription service endpoint, when the HTTP transcriber is used.
    pub transcribe_url: Option<String>,
    pub api_key: Option<String>,
    /// SQLite database file name when no explicit URL is given.
    pub sqlite_db_name: String,
}

impl PipelineConfig {
    pub const DEFAULT_MAX_TOKENS: usize = 2047;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);
    pub const DEFAULT_BACKOFF_JITTER: f64 = 0.1;
    pub const DEFAULT_SEGMENT_DURATION: Duration = Duration::from_secs(120);
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_CHUNK_OVERLAP: usize = 64;
    pub const DEFAULT_TEXT_DIM: usize = 768;
    pub const DEFAULT_MULTIMODAL_DIM: usize = 1408;

    /// Configuration resolved purely from environment and defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            max_tokens: env_parse("CHUNKFORGE_MAX_TOKENS").unwrap_or(Self::DEFAULT_MAX_TOKENS),
            max_retries: env_parse("CHUNKFORGE_MAX_RETRIES").unwrap_or(Self::DEFAULT_MAX_RETRIES),
            backoff_base: env_parse("CHUNKFORGE_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(Self::DEFAULT_BACKOFF_BASE),
            backoff_jitter: Self::DEFAULT_BACKOFF_JITTER,
            segment_duration: env_parse("CHUNKFORGE_SEGMENT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Self::DEFAULT_SEGMENT_DURATION),
            request_timeout: env_parse("CHUNKFORGE_REQUEST_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Self::DEFAULT_REQUEST_TIMEOUT),
            chunk_overlap_tokens: env_parse("CHUNKFORGE_CHUNK_OVERLAP")
                .unwrap_or(Self::DEFAULT_CHUNK_OVERLAP),
            text_model: std::env::var("CHUNKFORGE_TEXT_MODEL")
                .unwrap_or_else(|_| "text-embedding-004".to_string()),
            multimodal_model: std::env::var("CHUNKFORGE_MULTIMODAL_MODEL")
                .unwrap_or_else(|_| "multimodalembedding@001".to_string()),
            text_dim: env_parse("CHUNKFORGE_TEXT_DIM").unwrap_or(Self::DEFAULT_TEXT_DIM),
            multimodal_dim: env_parse("CHUNKFORGE_MULTIMODAL_DIM")
                .unwrap_or(Self::DEFAULT_MULTIMODAL_DIM),
            embeddings_url: std::env::var("CHUNKFORGE_EMBEDDINGS_URL").ok(),
            transcribe_url: std::env::var("CHUNKFORGE_TRANSCRIBE_URL").ok(),
            api_key: std::env::var("CHUNKFORGE_API_KEY").ok(),
            sqlite_db_name: std::env::var("CHUNKFORGE_DB")
                .unwrap_or_else(|_| "chunkforge.db".to_string()),
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_backoff(mut self, base: Duration, jitter: f64) -> Self {
        self.backoff_base = base;
        self.backoff_jitter = jitter;
        self
    }

    #[must_use]
    pub fn with_segment_duration(mut self, duration: Duration) -> Self {
        self.segment_duration = duration;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_chunk_overlap(mut self, tokens: usize) -> Self {
        self.chunk_overlap_tokens = tokens;
        self
    }

    #[must_use]
    pub fn with_text_model(mut self, model: impl Into<String>, dim: usize) -> Self {
        self.text_model = model.into();
        self.text_dim = dim;
        self
    }

    #[must_use]
    pub fn with_multimodal_model(mut self, model: impl Into<String>, dim: usize) -> Self {
        self.multimodal_model = model.into();
        self.multimodal_dim = dim;
        self
    }

    /// SQLite connection URL derived from the configured db name.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.sqlite_db_name)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
