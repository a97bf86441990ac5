use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::AudioError;
use crate::mixer::{MixSettings, MixTrack, MixingService};

/// Records every call and hands out predictable artifact names.
#[derive(Default)]
pub(crate) struct FakeMixer {
    counter: AtomicUsize,
    duration: Option<f64>,
    fail: bool,
    mixes: Mutex<Vec<(Vec<MixTrack>, MixSettings)>>,
    uploads: Mutex<Vec<PathBuf>>,
}

impl FakeMixer {
    pub(crate) fn with_duration(duration: f64) -> Self {
        Self {
            duration: Some(duration),
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn mix_calls(&self) -> Vec<(Vec<MixTrack>, MixSettings)> {
        self.mixes.lock().expect("mix log").clone()
    }

    pub(crate) fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.lock().expect("upload log").clone()
    }
}

#[async_trait]
impl MixingService for FakeMixer {
    async fn mix(&self, tracks: &[MixTrack], settings: &MixSettings) -> Result<PathBuf, AudioError> {
        if self.fail {
            return Err(AudioError::Service("offline".to_string()));
        }
        let index = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.mixes
            .lock()
            .expect("mix log")
            .push((tracks.to_vec(), settings.clone()));
        Ok(settings.output_dir.join(format!("mix-{}.mp3", index)))
    }

    async fn download(&self, reference: &str, dir: &Path) -> Result<PathBuf, AudioError> {
        let name = reference.rsplit('/').next().unwrap_or(reference);
        Ok(dir.join(name))
    }

    async fn upload(&self, path: &Path, _dir: &str) -> Result<(), AudioError> {
        self.uploads
            .lock()
            .expect("upload log")
            .push(path.to_path_buf());
        Ok(())
    }

    fn url(&self, filename: &str) -> String {
        format!("https://cdn.test/{}", filename)
    }

    async fn duration(&self, _path: &Path) -> Result<f64, AudioError> {
        Ok(self.duration.unwrap_or(2.0))
    }
}
