//! Error types for the Maya core.
//!
//! Only [`TurnError`] crosses the orchestrator boundary. Probe failures never surface,
//! and tool failures are folded into tool-result text by the dispatcher.

use thiserror::Error;

/// Profile / history store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Profile key '{0}' may not be empty")]
    EmptyIdentity(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Inference binding failures (model unreachable, bad status, undecodable reply).
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Inference endpoint returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Inference response parse failed: {0}")]
    Decode(String),

    #[error("Inference binding unavailable: {0}")]
    Unavailable(String),
}

/// Tool execution failures. Converted to tool-result text, never propagated out of a turn.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing '{0}' argument")]
    MissingArgument(&'static str),

    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Search request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Search backend error: {0}")]
    Backend(String),
}

/// Pipeline stage a fatal turn error happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStage {
    Context,
    FirstInference,
    Tools,
    FinalInference,
    Persist,
}

impl std::fmt::Display for TurnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnStage::Context => "context",
            TurnStage::FirstInference => "first inference",
            TurnStage::Tools => "tool dispatch",
            TurnStage::FinalInference => "final inference",
            TurnStage::Persist => "persist",
        };
        f.write_str(s)
    }
}

/// The single caller-visible failure of a chat turn. No history is written when this is returned.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Maya brain error during {stage}: {source}")]
    Inference {
        stage: TurnStage,
        #[source]
        source: InferenceError,
    },

    #[error("Maya brain timed out during {stage} after {secs}s")]
    Timeout { stage: TurnStage, secs: u64 },

    #[error("Memory store error during {stage}: {source}")]
    Store {
        stage: TurnStage,
        #[source]
        source: StoreError,
    },
}

impl TurnError {
    /// HTTP-style status code for the caller-visible error body.
    pub fn status(&self) -> u16 {
        match self {
            TurnError::InvalidRequest(_) => 422,
            TurnError::Inference { .. } => 500,
            TurnError::Timeout { .. } => 504,
            TurnError::Store { .. } => 503,
        }
    }
}

/// Configuration load / validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config source error: {0}")]
    Source(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
