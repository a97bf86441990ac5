use serde::{Deserialize, Serialize};

pub const DEFAULT_VOLUME: f64 = 1.0;
pub const DEFAULT_DELAY: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioItemKind {
    /// Text rendered by a synthesis voice.
    Speech,
    /// A recorded audio file referenced by URL or path.
    Audio,
    /// Plain text left to the voice platform's narrator.
    Text,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioItem {
    pub kind: AudioItemKind,
    pub content: String,
    #[serde(default = "default_volume")]
    pub volume: f64,
    #[serde(default)]
    pub delay: f64,
    #[serde(default)]
    pub options: AudioOptions,
}

fn default_volume() -> f64 {
    DEFAULT_VOLUME
}

impl AudioItem {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            kind: AudioItemKind::Text,
            content: content.into(),
            volume: DEFAULT_VOLUME,
            delay: DEFAULT_DELAY,
            options: AudioOptions::default(),
        }
    }

    pub fn speech(content: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            kind: AudioItemKind::Speech,
            content: content.into(),
            volume: DEFAULT_VOLUME,
            delay: DEFAULT_DELAY,
            options: AudioOptions {
                voice: Some(voice.into()),
                ..AudioOptions::default()
            },
        }
    }

    pub fn audio(source: impl Into<String>) -> Self {
        Self {
            kind: AudioItemKind::Audio,
            content: source.into(),
            volume: DEFAULT_VOLUME,
            delay: DEFAULT_DELAY,
            options: AudioOptions::default(),
        }
    }

    pub fn has_default_levels(&self) -> bool {
        (self.volume - DEFAULT_VOLUME).abs() < f64::EPSILON
            && (self.delay - DEFAULT_DELAY).abs() < f64::EPSILON
    }
}

/// Audio staged for one scene on one track.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneAudioItem {
    pub scene_id: String,
    #[serde(default)]
    pub foreground: Vec<AudioItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub background: Vec<AudioItem>,
}

impl SceneAudioItem {
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            scene_id: scene_id.into(),
            foreground: Vec::new(),
            background: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.foreground.is_empty() && self.background.is_empty()
    }
}

#[cfg(test)]
mod audio_tests {
    use super::*;

    #[test]
    fn audio_item_defaults_volume_when_missing() {
        let item: AudioItem =
            serde_json::from_str(r#"{"kind":"audio","content":"https://x/rain.mp3"}"#)
                .expect("item should deserialize");
        assert_eq!(item.volume, DEFAULT_VOLUME);
        assert!(item.has_default_levels());
    }

    #[test]
    fn non_default_delay_is_detected() {
        let mut item = AudioItem::speech("hi", "Joanna");
        item.delay = 0.5;
        assert!(!item.has_default_levels());
    }
}
