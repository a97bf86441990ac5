use std::path::{Path, PathBuf};
use std::sync::Mutex;

use futures::future::try_join_all;
use sv_core::{AudioItem, AudioItemKind, SceneAudioItem};
use tracing::{debug, instrument, warn};

use crate::config::AudioConfig;
use crate::error::AudioError;
use crate::markup::{flatten_scenes, plain_text, render_markup};
use crate::mixer::{MixMode, MixSettings, MixSource, MixTrack, MixingService, Trim};

/// Turns staged scene audio into a small number of mixed artifacts. One
/// processor lives for one render pass and remembers what it generated.
pub struct AudioProcessor<'a> {
    config: &'a AudioConfig,
    service: &'a dyn MixingService,
    generated: Mutex<Vec<PathBuf>>,
}

impl<'a> AudioProcessor<'a> {
    pub fn new(config: &'a AudioConfig, service: &'a dyn MixingService) -> Self {
        Self {
            config,
            service,
            generated: Mutex::new(Vec::new()),
        }
    }

    pub async fn process_scenes(
        &self,
        scenes: &[SceneAudioItem],
    ) -> Result<Vec<SceneAudioItem>, AudioError> {
        try_join_all(scenes.iter().map(|scene| self.process_scene(scene))).await
    }

    #[instrument(skip(self, scene), fields(scene_id = %scene.scene_id))]
    async fn process_scene(&self, scene: &SceneAudioItem) -> Result<SceneAudioItem, AudioError> {
        let Some(background) = scene.background.first() else {
            let foreground =
                try_join_all(scene.foreground.iter().map(|item| self.process_item(item))).await?;
            return Ok(SceneAudioItem {
                scene_id: scene.scene_id.clone(),
                foreground,
                background: Vec::new(),
            });
        };

        if scene.background.len() > 1 {
            debug!(
                ignored = scene.background.len() - 1,
                "only the primary background item is layered"
            );
        }

        if scene.foreground.is_empty() {
            return Ok(SceneAudioItem {
                scene_id: scene.scene_id.clone(),
                foreground: vec![self.process_item(background).await?],
                background: Vec::new(),
            });
        }

        let foreground_path = self
            .mix_to_file(&scene.foreground, MixMode::Concatenate, None)
            .await?;
        let duration = self
            .service
            .duration(&foreground_path)
            .await?;

        let mut background = background.clone();
        let mut shift = 0.0;
        if background.delay < 0.0 {
            shift = -background.delay;
            background.delay = 0.0;
        }

        let mut tracks = vec![MixTrack {
            source: MixSource::File(foreground_path),
            volume: 1.0,
            delay: shift,
            fade_in: None,
            fade_out: None,
        }];
        tracks.extend(self.tracks_for(std::slice::from_ref(&background)).await?);

        let layered = self
            .mix_tracks(&tracks, MixMode::Layer, Trim::At(duration + shift))
            .await?;
        Ok(SceneAudioItem {
            scene_id: scene.scene_id.clone(),
            foreground: vec![self.artifact_item(&layered)?],
            background: Vec::new(),
        })
    }

    async fn process_item(&self, item: &AudioItem) -> Result<AudioItem, AudioError> {
        if item.kind != AudioItemKind::Speech && item.has_default_levels() {
            return Ok(item.clone());
        }
        self.mixdown(std::slice::from_ref(item), MixMode::Concatenate, None)
            .await
    }

    /// Mixes `items` into one artifact and returns an audio item pointing at it.
    pub async fn mixdown(
        &self,
        items: &[AudioItem],
        mode: MixMode,
        trim_point: Option<f64>,
    ) -> Result<AudioItem, AudioError> {
        let path = self.mix_to_file(items, mode, trim_point).await?;
        self.artifact_item(&path)
    }

    async fn mix_to_file(
        &self,
        items: &[AudioItem],
        mode: MixMode,
        trim_point: Option<f64>,
    ) -> Result<PathBuf, AudioError> {
        if items.is_empty() {
            return Err(AudioError::EmptyMix);
        }
        let tracks = self.tracks_for(items).await?;
        let trim = match trim_point {
            Some(point) => Trim::At(point),
            None => batch_trim(items),
        };
        self.mix_tracks(&tracks, mode, trim).await
    }

    async fn mix_tracks(
        &self,
        tracks: &[MixTrack],
        mode: MixMode,
        trim: Trim,
    ) -> Result<PathBuf, AudioError> {
        let settings = MixSettings {
            mode,
            trim,
            output_dir: self.config.working_dir.clone(),
        };
        let path = self.service.mix(tracks, &settings).await?;
        debug!(path = %path.display(), tracks = tracks.len(), "mixed artifact");
        self.track_generated(path.clone());
        Ok(path)
    }

    async fn tracks_for(&self, items: &[AudioItem]) -> Result<Vec<MixTrack>, AudioError> {
        try_join_all(items.iter().map(|item| self.track_for(item))).await
    }

    async fn track_for(&self, item: &AudioItem) -> Result<MixTrack, AudioError> {
        let (source, fade_in, fade_out) = match item.kind {
            AudioItemKind::Audio => {
                let local = self
                    .service
                    .download(&item.content, &self.config.working_dir)
                    .await?;
                let (fade_in, fade_out) = fades(item, self.config.fade_seconds);
                (MixSource::File(local), fade_in, fade_out)
            }
            AudioItemKind::Speech | AudioItemKind::Text => (
                MixSource::Speech {
                    text: item.content.clone(),
                    voice: item
                        .options
                        .voice
                        .clone()
                        .or_else(|| self.config.default_voice.clone()),
                    engine: item.options.engine.clone(),
                    pitch: item.options.pitch.clone(),
                    rate: item.options.rate.clone(),
                },
                None,
                None,
            ),
        };
        Ok(MixTrack {
            source,
            volume: item.volume,
            delay: item.delay,
            fade_in,
            fade_out,
        })
    }

    fn artifact_item(&self, path: &Path) -> Result<AudioItem, AudioError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| AudioError::ArtifactName {
                path: path.to_path_buf(),
            })?;
        Ok(AudioItem::audio(self.service.url(file_name)))
    }

    /// Concatenates the earliest runs of adjacent audio items until at most
    /// `target_count` audio items remain or no run is left.
    pub async fn combine_consecutive(
        &self,
        mut items: Vec<AudioItem>,
        target_count: usize,
    ) -> Result<Vec<AudioItem>, AudioError> {
        loop {
            let count = items
                .iter()
                .filter(|item| item.kind == AudioItemKind::Audio)
                .count();
            if count <= target_count {
                return Ok(items);
            }
            let Some((start, end)) = earliest_audio_run(&items) else {
                warn!(count, target_count, "audio tag count stays above the limit");
                return Ok(items);
            };
            let take = (end - start).min(count - target_count + 1);
            let merged = self
                .mixdown(&items[start..start + take], MixMode::Concatenate, None)
                .await?;
            items.splice(start..start + take, [merged]);
        }
    }

    pub async fn render(&self, scenes: &[SceneAudioItem]) -> Result<String, AudioError> {
        let processed = self.process_scenes(scenes).await?;
        let combined = self
            .combine_consecutive(flatten_scenes(&processed), self.config.combine_threshold)
            .await?;
        Ok(render_markup(&combined))
    }

    pub async fn upload_generated(&self) -> Result<usize, AudioError> {
        let paths = self.generated_files();
        try_join_all(
            paths
                .iter()
                .map(|path| self.service.upload(path, &self.config.upload_dir)),
        )
        .await?;
        Ok(paths.len())
    }

    pub fn generated_files(&self) -> Vec<PathBuf> {
        match self.generated.lock() {
            Ok(generated) => generated.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn track_generated(&self, path: PathBuf) {
        match self.generated.lock() {
            Ok(mut generated) => generated.push(path),
            Err(poisoned) => poisoned.into_inner().push(path),
        }
    }
}

fn earliest_audio_run(items: &[AudioItem]) -> Option<(usize, usize)> {
    let mut index = 0usize;
    while index < items.len() {
        if items[index].kind != AudioItemKind::Audio {
            index += 1;
            continue;
        }
        let start = index;
        while index < items.len() && items[index].kind == AudioItemKind::Audio {
            index += 1;
        }
        if index - start >= 2 {
            return Some((start, index));
        }
    }
    None
}

fn blend_tokens(item: &AudioItem) -> Vec<String> {
    item.options
        .blend
        .as_deref()
        .unwrap_or_default()
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn fades(item: &AudioItem, seconds: f64) -> (Option<f64>, Option<f64>) {
    let tokens = blend_tokens(item);
    let has = |names: &[&str]| {
        tokens
            .iter()
            .any(|token| names.iter().any(|name| token.as_str() == *name))
    };
    (
        has(&["fade-in", "fadein", "fade"]).then_some(seconds),
        has(&["fade-out", "fadeout", "fade"]).then_some(seconds),
    )
}

fn batch_trim(items: &[AudioItem]) -> Trim {
    items
        .iter()
        .flat_map(blend_tokens)
        .find_map(|token| match token.as_str() {
            "first" => Some(Trim::First),
            "longest" => Some(Trim::Longest),
            _ => None,
        })
        .unwrap_or(Trim::Longest)
}

/// Final markup for one turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedAudio {
    pub speech: String,
    pub reprompt: String,
    pub preview: String,
    pub error_message: Option<String>,
}

/// Renders a turn's speech and reprompt tracks. Mixing failures never fail the
/// turn: the unmixed markup is returned together with the error text.
pub async fn render_turn_audio(
    config: &AudioConfig,
    service: Option<&dyn MixingService>,
    speech: &[SceneAudioItem],
    reprompt: &[SceneAudioItem],
) -> RenderedAudio {
    let preview = plain_text(speech);
    let unmixed = RenderedAudio {
        speech: render_markup(&flatten_scenes(speech)),
        reprompt: render_markup(&flatten_scenes(reprompt)),
        preview: preview.clone(),
        error_message: None,
    };

    let service = match service {
        Some(service) if config.enabled => service,
        _ => return unmixed,
    };

    let processor = AudioProcessor::new(config, service);
    let rendered = async {
        let (speech, reprompt) =
            futures::try_join!(processor.render(speech), processor.render(reprompt))?;
        if config.uploads_enabled() {
            let uploaded = processor.upload_generated().await?;
            debug!(uploaded, "uploaded generated audio");
        }
        Ok::<_, AudioError>((speech, reprompt))
    }
    .await;

    match rendered {
        Ok((speech, reprompt)) => RenderedAudio {
            speech,
            reprompt,
            preview,
            error_message: None,
        },
        Err(error) => {
            warn!(%error, "audio rendering failed; returning unmixed markup");
            RenderedAudio {
                error_message: Some(error.to_string()),
                ..unmixed
            }
        }
    }
}
