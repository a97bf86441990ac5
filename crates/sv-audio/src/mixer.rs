use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::AudioError;

#[derive(Debug, Clone, PartialEq)]
pub enum MixSource {
    /// A local audio file, already downloaded into the working directory.
    File(PathBuf),
    /// Text the service renders with a synthesis voice.
    Speech {
        text: String,
        voice: Option<String>,
        engine: Option<String>,
        pitch: Option<String>,
        rate: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixTrack {
    pub source: MixSource,
    pub volume: f64,
    pub delay: f64,
    pub fade_in: Option<f64>,
    pub fade_out: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixMode {
    /// Tracks play one after another.
    Concatenate,
    /// Tracks play on top of each other.
    Layer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Trim {
    First,
    Longest,
    At(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MixSettings {
    pub mode: MixMode,
    pub trim: Trim,
    pub output_dir: PathBuf,
}

/// The external text-to-speech, mixing and storage backend.
#[async_trait]
pub trait MixingService: Send + Sync {
    /// Produces one artifact and returns its local path.
    async fn mix(&self, tracks: &[MixTrack], settings: &MixSettings) -> Result<PathBuf, AudioError>;

    async fn download(&self, reference: &str, dir: &Path) -> Result<PathBuf, AudioError>;

    async fn upload(&self, path: &Path, dir: &str) -> Result<(), AudioError>;

    fn url(&self, filename: &str) -> String;

    /// Length in seconds of a produced artifact.
    async fn duration(&self, path: &Path) -> Result<f64, AudioError>;
}
