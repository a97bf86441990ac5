use super::*;

const ALTERNATIVE_SEPARATOR: &str = "||";

impl<'e> TurnRun<'e> {
    /// Plays one visit of a scene: the first matching variation runs its
    /// instructions, then its narration lands on the speech track.
    pub(super) async fn process_scene(
        &mut self,
        scene_id: &str,
        property: Option<SceneProperty>,
    ) -> Result<(), StoryError> {
        let engine = self.engine;
        let Some(scene) = engine.story.scene(scene_id) else {
            debug!(scene = %scene_id, "scene is not in the story; nothing to play");
            return Ok(());
        };

        self.context.stage.start_new_scene(&scene.id);
        let Some((index, variation)) = self.pick_variation(scene)? else {
            debug!(scene = %scene.id, "no variation matched");
            self.context.stage.close_scene();
            return Ok(());
        };

        let narration = variation
            .narration
            .as_deref()
            .map(|text| self.pick_alternative(text));
        self.perform_instructions(Address::scene(&scene.id, index, 0))
            .await?;

        let default_voice = engine.audio.default_voice.as_deref();
        let mut items = narration
            .map(|text| parse_markup(&substitute(&text, &self.context.state), default_voice))
            .unwrap_or_default();
        match property {
            Some(SceneProperty::Reprompt) => {
                let staged = self.context.stage.open_foreground(Track::Reprompt);
                if !staged.is_empty() {
                    items = staged.to_vec();
                }
            }
            Some(SceneProperty::Recap) => {
                let staged = self.context.stage.open_foreground(Track::Recap);
                if !staged.is_empty() {
                    items = staged.to_vec();
                }
            }
            Some(SceneProperty::Then) => items.clear(),
            Some(SceneProperty::Narration) | None => {}
        }

        if !self.repeating {
            self.context.stage.append_foreground(Track::Speech, items);
        }
        self.context.stage.close_scene();
        Ok(())
    }

    fn pick_variation<'s>(
        &self,
        scene: &'s Scene,
    ) -> Result<Option<(usize, &'s Variation)>, StoryError> {
        for (index, variation) in scene.variations.iter().enumerate() {
            if variation.is_unconditioned() {
                return Ok(Some((index, variation)));
            }
            let condition = variation.condition.as_deref().unwrap_or_default();
            let source = substitute_condition(condition, &self.context.state);
            let location = InstructionLocation::new(&scene.id, index, None);
            if self.check_condition(&source, location)? {
                return Ok(Some((index, variation)));
            }
        }
        Ok(None)
    }

    /// Evaluates a condition whose placeholders are already filled. Broken
    /// expressions read as false unless the engine runs in debug mode.
    pub(super) fn check_condition(
        &self,
        condition: &str,
        location: InstructionLocation,
    ) -> Result<bool, StoryError> {
        match evaluate_condition(condition, &self.context.state) {
            Ok(value) => Ok(value),
            Err(error) if self.engine.config.debug => {
                Err(StoryError::at(error.code, error.message, location))
            }
            Err(error) => {
                warn!(
                    scene = %location.scene_id,
                    condition = %condition,
                    %error,
                    "condition did not evaluate; treating it as false"
                );
                Ok(false)
            }
        }
    }

    /// One of the `||`-separated alternatives, picked with the turn's generator.
    pub(super) fn pick_alternative(&mut self, text: &str) -> String {
        let alternatives = text
            .split(ALTERNATIVE_SEPARATOR)
            .map(str::trim)
            .filter(|alternative| !alternative.is_empty())
            .collect::<Vec<_>>();
        match alternatives.len() {
            0 => String::new(),
            1 => alternatives[0].to_string(),
            count => {
                let index = next_random_bounded(&mut self.rng, count as u32) as usize;
                alternatives[index].to_string()
            }
        }
    }
}

#[cfg(test)]
mod scene_tests {
    use super::*;
    use crate::engine::runtime_test_support::*;

    fn conditioned(condition: Option<&str>, narration: &str) -> Variation {
        Variation {
            condition: condition.map(str::to_string),
            narration: Some(narration.to_string()),
            instructions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn first_matching_variation_plays_once() {
        let engine = engine(vec![Scene {
            id: "start".to_string(),
            variations: vec![
                conditioned(Some("gold > 5"), "Rich."),
                conditioned(Some("{visited} == false"), "First time."),
                conditioned(Some("otherwise"), "Again."),
            ],
        }]);

        let first = launch(&engine).await;
        assert_eq!(first.speech, "First time.");

        let mut state = first.state.clone();
        state.previous_speech.clear();
        state.set_variable("visited", StateValue::Bool(true));
        let second = play(&engine, &state, UserInput::default()).await;
        assert_eq!(second.speech, "Again.");
        assert_eq!(second.visited_scenes, vec!["start".to_string()]);
    }

    #[tokio::test]
    async fn broken_condition_is_false_unless_debugging() {
        let scenes = vec![Scene {
            id: "start".to_string(),
            variations: vec![
                conditioned(Some("1 +"), "Broken."),
                conditioned(None, "Fallback."),
            ],
        }];
        assert_eq!(launch(&engine(scenes.clone())).await.speech, "Fallback.");

        let mut debug = options(scenes);
        debug.config.debug = true;
        let engine = StoryEngine::new(debug).expect("engine should build");
        let error = engine
            .advance_turn(UserInput::default(), &SessionState::default())
            .await
            .expect_err("debug mode should surface the condition");
        assert_eq!(error.code, "EXPR_SYNTAX");
        assert_eq!(error.location.map(|location| location.scene_id), Some("start".to_string()));
    }

    #[tokio::test]
    async fn narration_alternatives_follow_the_seed() {
        let engine = engine(vec![scene("start", "Hello.||Hi.||Hey.", Vec::new())]);
        let first = launch(&engine).await;
        let again = launch(&engine).await;
        assert_eq!(first.speech, again.speech);
        assert!(["Hello.", "Hi.", "Hey."].contains(&first.speech.as_str()));
        assert!(first.state.rng_state.is_some());
        assert_ne!(first.state.rng_state, Some(1));
    }

    #[tokio::test]
    async fn narration_sees_variables_set_by_the_scene() {
        let engine = engine(vec![scene(
            "start",
            "You have {gold} coins.",
            vec![op(
                InstructionKind::Set,
                &[("variableName", "gold"), ("variableValue", "12")],
            )],
        )]);
        assert_eq!(launch(&engine).await.speech, "You have 12 coins.");
    }

    #[tokio::test]
    async fn default_voice_wraps_narration() {
        let mut options = options(vec![scene("start", "Welcome.", Vec::new())]);
        options.audio.default_voice = Some("Joanna".to_string());
        let engine = StoryEngine::new(options).expect("engine should build");
        let result = launch(&engine).await;
        assert_eq!(result.speech, "<voice name=\"Joanna\">Welcome.</voice>");
        assert_eq!(result.preview, "Welcome.");
    }
}
