use super::*;

pub const DEFAULT_HISTORY_SIZE: usize = 10;
pub const DEFAULT_MAX_SCENES_PER_TURN: usize = 1000;
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

/// Behavioral switches for a [`StoryEngine`]. Missing JSON fields fall back to
/// the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Bound on the origin stack, call stack and choice history.
    pub history_size: usize,
    pub max_scenes_per_turn: usize,
    /// Turns authoring warnings (bad conditions, missing scenes and handlers)
    /// into errors.
    pub debug: bool,
    /// Every die lands on its mean.
    pub deterministic_dice: bool,
    pub fuzzy_threshold: f64,
    /// Seed for sessions that carry no generator state yet.
    pub random_seed: Option<u32>,
    pub keep_scenes_separate: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            max_scenes_per_turn: DEFAULT_MAX_SCENES_PER_TURN,
            debug: false,
            deterministic_dice: false,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            random_seed: None,
            keep_scenes_separate: false,
        }
    }
}

#[derive(Clone)]
pub struct StoryEngineOptions {
    pub story: Arc<dyn StoryGraph>,
    pub config: EngineConfig,
    pub audio: AudioConfig,
    pub mixer: Option<Arc<dyn MixingService>>,
    pub hooks: Vec<Arc<dyn TurnHook>>,
    pub custom_handlers: Vec<Arc<dyn CustomInstructionHandler>>,
}

impl StoryEngineOptions {
    pub fn new(story: Arc<dyn StoryGraph>) -> Self {
        Self {
            story,
            config: EngineConfig::default(),
            audio: AudioConfig::default(),
            mixer: None,
            hooks: Vec::new(),
            custom_handlers: Vec::new(),
        }
    }
}

/// Stateless turn runner. Everything a session remembers lives in the
/// [`SessionState`] the caller passes in and gets back.
pub struct StoryEngine {
    pub(super) story: Arc<dyn StoryGraph>,
    pub(super) config: EngineConfig,
    pub(super) audio: AudioConfig,
    pub(super) mixer: Option<Arc<dyn MixingService>>,
    pub(super) hooks: Vec<Arc<dyn TurnHook>>,
    pub(super) custom_handlers: BTreeMap<String, Arc<dyn CustomInstructionHandler>>,
}

impl StoryEngine {
    pub fn new(options: StoryEngineOptions) -> Result<Self, StoryError> {
        let config = options.config;
        if config.history_size == 0 {
            return Err(StoryError::new(
                "ENGINE_CONFIG_INVALID",
                "historySize must be at least 1.",
            ));
        }
        if config.max_scenes_per_turn == 0 {
            return Err(StoryError::new(
                "ENGINE_CONFIG_INVALID",
                "maxScenesPerTurn must be at least 1.",
            ));
        }
        if !(0.0..=1.0).contains(&config.fuzzy_threshold) {
            return Err(StoryError::new(
                "ENGINE_CONFIG_INVALID",
                format!(
                    "fuzzyThreshold must be between 0 and 1, got {}.",
                    config.fuzzy_threshold
                ),
            ));
        }

        let mut custom_handlers = BTreeMap::new();
        for handler in options.custom_handlers {
            let name = handler.name().trim().to_string();
            if name.is_empty() {
                return Err(StoryError::new(
                    "ENGINE_CUSTOM_HANDLER_INVALID",
                    "Custom instruction handlers need a name.",
                ));
            }
            if custom_handlers.insert(name.clone(), handler).is_some() {
                return Err(StoryError::new(
                    "ENGINE_CUSTOM_HANDLER_DUPLICATE",
                    format!("Custom instruction handler \"{}\" is registered twice.", name),
                ));
            }
        }

        Ok(Self {
            story: options.story,
            config,
            audio: options.audio,
            mixer: options.mixer,
            hooks: options.hooks,
            custom_handlers,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn story(&self) -> &dyn StoryGraph {
        self.story.as_ref()
    }
}

/// Everything one turn produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub speech: String,
    pub reprompt: String,
    /// Speech without markup.
    pub preview: String,
    /// Set when audio mixing failed and unmixed markup was returned instead.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub visuals: Vec<VisualDirective>,
    pub visited_scenes: Vec<String>,
    pub ending_reached: bool,
    pub unhandled_choice: bool,
    pub state: SessionState,
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;
    use crate::engine::runtime_test_support::*;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl CustomInstructionHandler for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn invoke(&self, _instruction: &Instruction, _context: &mut TurnContext) -> Result<(), StoryError> {
            Ok(())
        }
    }

    #[test]
    fn config_json_uses_defaults_for_missing_fields() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"debug":true,"historySize":3}"#).expect("config should parse");
        assert!(config.debug);
        assert_eq!(config.history_size, 3);
        assert_eq!(config.max_scenes_per_turn, DEFAULT_MAX_SCENES_PER_TURN);
        assert_eq!(config.fuzzy_threshold, DEFAULT_FUZZY_THRESHOLD);
        assert_eq!(config.random_seed, None);
    }

    #[test]
    fn new_rejects_invalid_config() {
        let mut zero_history = options(Vec::new());
        zero_history.config.history_size = 0;
        assert_eq!(
            StoryEngine::new(zero_history).err().map(|error| error.code),
            Some("ENGINE_CONFIG_INVALID".to_string())
        );

        let mut threshold = options(Vec::new());
        threshold.config.fuzzy_threshold = 1.5;
        assert_eq!(
            StoryEngine::new(threshold).err().map(|error| error.code),
            Some("ENGINE_CONFIG_INVALID".to_string())
        );
    }

    #[test]
    fn new_rejects_duplicate_custom_handlers() {
        let mut duplicate = options(Vec::new());
        duplicate.custom_handlers = vec![Arc::new(Named("shop")), Arc::new(Named("shop"))];
        assert_eq!(
            StoryEngine::new(duplicate).err().map(|error| error.code),
            Some("ENGINE_CUSTOM_HANDLER_DUPLICATE".to_string())
        );

        let mut blank = options(Vec::new());
        blank.custom_handlers = vec![Arc::new(Named("  "))];
        assert_eq!(
            StoryEngine::new(blank).err().map(|error| error.code),
            Some("ENGINE_CUSTOM_HANDLER_INVALID".to_string())
        );
    }

    #[test]
    fn engine_exposes_story_and_config() {
        let engine = engine(vec![scene("start", "Hi.", Vec::new())]);
        assert!(engine.story().has_scene("START"));
        assert_eq!(engine.config().random_seed, Some(1));
    }
}
