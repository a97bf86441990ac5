use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sv_audio::{AudioConfig, MixingService};
use sv_core::{SessionState, StoryError, UserInput, START_SCENE};
use sv_runtime::{
    CustomInstructionHandler, EngineConfig, InMemoryStory, StoryEngine, StoryEngineOptions,
    StoryGraph, TurnHook, TurnResult,
};
use tracing::debug;

/// Engine and audio settings read from one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub engine: EngineConfig,
    pub audio: AudioConfig,
}

#[derive(Clone)]
pub struct CreateEngineFromJsonOptions {
    pub story_json: String,
    pub config: RunConfig,
    pub mixer: Option<Arc<dyn MixingService>>,
    pub hooks: Vec<Arc<dyn TurnHook>>,
    pub custom_handlers: Vec<Arc<dyn CustomInstructionHandler>>,
}

impl CreateEngineFromJsonOptions {
    pub fn new(story_json: impl Into<String>) -> Self {
        Self {
            story_json: story_json.into(),
            config: RunConfig::default(),
            mixer: None,
            hooks: Vec::new(),
            custom_handlers: Vec::new(),
        }
    }
}

/// Reads a compiled story and checks that it can be launched.
pub fn load_story_from_json(raw: &str) -> Result<InMemoryStory, StoryError> {
    let story = InMemoryStory::from_json(raw)?;
    if story.is_empty() {
        return Err(StoryError::new(
            "API_STORY_EMPTY",
            "Compiled story has no scenes.",
        ));
    }
    if !story.has_scene(START_SCENE) {
        return Err(StoryError::new(
            "API_START_SCENE_NOT_FOUND",
            format!("Expected a scene with id=\"{}\" as the entry point.", START_SCENE),
        ));
    }
    Ok(story)
}

pub fn parse_run_config(raw: &str) -> Result<RunConfig, StoryError> {
    serde_json::from_str(raw).map_err(|error| {
        StoryError::new(
            "API_CONFIG_INVALID",
            format!("Run config is not valid JSON: {}", error),
        )
    })
}

/// Blank input is a fresh session.
pub fn parse_state_json(raw: &str) -> Result<SessionState, StoryError> {
    if raw.trim().is_empty() {
        return Ok(SessionState::default());
    }
    serde_json::from_str(raw).map_err(|error| {
        StoryError::new(
            "API_STATE_INVALID",
            format!("Session state is not valid JSON: {}", error),
        )
    })
}

pub fn serialize_state(state: &SessionState) -> Result<String, StoryError> {
    serde_json::to_string(state).map_err(|error| {
        StoryError::new(
            "API_STATE_SERIALIZE_FAILED",
            format!("Failed to serialize session state: {}", error),
        )
    })
}

pub fn create_engine_from_json(options: CreateEngineFromJsonOptions) -> Result<StoryEngine, StoryError> {
    let story = load_story_from_json(&options.story_json)?;
    debug!(scenes = story.len(), "loaded compiled story");

    StoryEngine::new(StoryEngineOptions {
        story: Arc::new(story),
        config: options.config.engine,
        audio: options.config.audio,
        mixer: options.mixer,
        hooks: options.hooks,
        custom_handlers: options.custom_handlers,
    })
}

/// Runs one turn from a serialized snapshot.
pub async fn run_turn_from_json(
    engine: &StoryEngine,
    input: UserInput,
    state_json: &str,
) -> Result<TurnResult, StoryError> {
    let state = parse_state_json(state_json)?;
    engine.advance_turn(input, &state).await
}
