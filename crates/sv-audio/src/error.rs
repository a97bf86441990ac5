use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Mixing service failed: {0}")]
    Service(String),
    #[error("Failed to download {reference}: {message}")]
    Download { reference: String, message: String },
    #[error("Failed to upload {path}: {message}")]
    Upload { path: PathBuf, message: String },
    #[error("Failed to measure {path}: {message}")]
    Duration { path: PathBuf, message: String },
    #[error("Mixed artifact {path} has no file name.")]
    ArtifactName { path: PathBuf },
    #[error("Mixdown called with no items.")]
    EmptyMix,
}
