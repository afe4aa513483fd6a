use thiserror::Error;

/// Typed error hierarchy for the store, the lifecycle controller and the CLI.
///
/// Per-episode stage failures are never represented here: executors report
/// them as plain reason strings which end up in `last_error`. Everything in
/// this enum aborts the current command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate episode: {0}")]
    DuplicateEpisode(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Invalid transition for episode {episode_id}: {from} -> {to}")]
    InvalidTransition {
        episode_id: i64,
        from: String,
        to: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Io(String),

    #[error("{0}")]
    Json(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

// ── From impls ─────────────────────────────────────────────────────────────

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Json(e.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(e: serde_yaml::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

/// Allows `.map_err(|e| format!("…", e))?` and `ok_or_else(|| format!(…))?`
/// to coerce into AppError without changing the call sites.
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Other(s)
    }
}

/// Allows `.ok_or("literal string")?` to coerce into AppError.
impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Other(s.to_string())
    }
}
