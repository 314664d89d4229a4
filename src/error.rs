use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("API error: status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("{0}")]
    Batch(BatchError),
}

impl AppError {
    /// True when the remote rejected our credentials and a fresh login may help.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            AppError::Unauthorized => true,
            AppError::Batch(batch) => batch.errors.iter().any(AppError::is_unauthorized),
            _ => false,
        }
    }
}

/// Failures collected while processing a batch of independent items.
#[derive(Debug, Default)]
pub struct BatchError {
    errors: Vec<AppError>,
}

impl BatchError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: AppError) {
        self.errors.push(err);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Collapse into `Ok(())` when nothing failed.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Batch(self))
        }
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
