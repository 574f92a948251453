// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the extraction client.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Provider selection or credentials are missing / invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every attempt failed; `source` is the error from the last one.
    #[error("extraction failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<ExtractError>,
    },

    /// The model answered, but not with a JSON object we can decode.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx answer from the chat completions endpoint.
    #[error("LLM API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from LLM")]
    EmptyResponse,
}

/// Batch-level failures. Anything here stops a run before the first file.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input directory not found: {0}")]
    MissingInputDir(PathBuf),

    #[error("invoice store not initialized at {0} (run `init-db` first)")]
    StoreNotInitialized(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unsupported LLM_PROVIDER: {0}")]
    UnknownProvider(String),
}
