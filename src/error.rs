use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComicSyncError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("ZIP compression error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Catalog API error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("Catalog range {start}..={end} of '{source_path}' could not be resolved: {reason}")]
    UnresolvedRange {
        source_path: String,
        start: u32,
        end: u32,
        reason: String,
    },

    #[error("Chapter {0} has no pages")]
    EmptyManifest(String),

    #[error("Source not tracked: {0}")]
    SourceNotTracked(String),

    #[error("Cursor state of '{source_name}' could not be {action}: {reason}")]
    CursorState {
        source_name: String,
        action: &'static str,
        reason: String,
    },

    #[error("Cursor for '{source_name}' cannot move from {current} to {requested}")]
    CursorRegression {
        source_name: String,
        current: u32,
        requested: u32,
    },
}

impl ComicSyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn api(code: i64, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    pub fn unresolved_range(
        source_path: impl Into<String>,
        start: u32,
        end: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvedRange {
            source_path: source_path.into(),
            start,
            end,
            reason: reason.into(),
        }
    }

    pub fn source_not_tracked(name: impl Into<String>) -> Self {
        Self::SourceNotTracked(name.into())
    }

    /// Wraps a cursor store failure so it aborts the run. Errors that are
    /// already fatal pass through unchanged.
    pub fn cursor_state(source_name: &str, action: &'static str, error: ComicSyncError) -> Self {
        if error.is_fatal() {
            return error;
        }
        Self::CursorState {
            source_name: source_name.to_string(),
            action,
            reason: error.to_string(),
        }
    }

    /// Errors that mean the persisted state itself cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigParse(_)
                | Self::ConfigWrite(_)
                | Self::SourceNotTracked(_)
                | Self::CursorState { .. }
                | Self::CursorRegression { .. }
                | Self::Database(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ComicSyncError>;
