use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub const DEFAULT_COMBINE_THRESHOLD: usize = 5;

/// Options for rendering staged audio. Built once by the caller and passed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AudioConfig {
    /// When off, staged items are rendered to markup without touching the mixer.
    pub enabled: bool,
    /// Maximum number of `<audio>` tags left in one rendered response.
    pub combine_threshold: usize,
    pub working_dir: PathBuf,
    pub service_endpoint: Option<String>,
    pub upload_dir: String,
    /// Preview runs keep artifacts local.
    pub preview: bool,
    pub upload: bool,
    pub default_voice: Option<String>,
    pub fade_seconds: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            combine_threshold: DEFAULT_COMBINE_THRESHOLD,
            working_dir: std::env::temp_dir().join("storyvoice"),
            service_endpoint: None,
            upload_dir: "audio".to_string(),
            preview: false,
            upload: true,
            default_voice: None,
            fade_seconds: 1.0,
        }
    }
}

impl AudioConfig {
    pub fn uploads_enabled(&self) -> bool {
        self.upload && !self.preview
    }
}

#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: AudioConfig =
            serde_json::from_str(r#"{"enabled":true,"defaultVoice":"Matthew"}"#)
                .expect("config should parse");
        assert!(config.enabled);
        assert_eq!(config.default_voice.as_deref(), Some("Matthew"));
        assert_eq!(config.combine_threshold, DEFAULT_COMBINE_THRESHOLD);
        assert!(config.uploads_enabled());
    }

    #[test]
    fn preview_disables_uploads() {
        let config = AudioConfig {
            preview: true,
            ..AudioConfig::default()
        };
        assert!(!config.uploads_enabled());
    }
}
