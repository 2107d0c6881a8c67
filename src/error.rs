use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model deserialization error: {0}")]
    Deserialization(#[from] bincode::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Could not load image {}: {message}", path.display())]
    ImageLoad { path: PathBuf, message: String },

    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    #[error("Model asset unavailable at {}: {reason}", path.display())]
    ModelAssetUnavailable { path: PathBuf, reason: String },

    #[error("Landmark inference exceeded {0:?}")]
    LandmarkTimeout(Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Download failed: {0}")]
    Download(String),
}

impl Error {
    /// Whether this error should stop every remaining image rather than just the current one.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ModelAssetUnavailable { .. } | Error::InvalidConfig(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
