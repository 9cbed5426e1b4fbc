//! `cartctl`'s own error boundary, composed the way `kgctl` folds HTTP and
//! serialization errors into a single `CoreError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no node matched \"{0}\"")]
    NodeNotFound(String),

    #[error("no path found between the given nodes")]
    NoPath,

    #[error(transparent)]
    Cartography(#[from] cartography_core::errors::CartographyError),
}

pub type CliResult<T> = Result<T, CliError>;
