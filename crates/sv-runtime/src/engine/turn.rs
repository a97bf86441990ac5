use super::*;

/// Mutable scratch for one turn. Dropped when the turn returns, so the engine
/// itself never holds session data.
pub(super) struct TurnRun<'e> {
    pub(super) engine: &'e StoryEngine,
    pub(super) context: TurnContext,
    pub(super) queue: VecDeque<Origin>,
    pub(super) rng: u32,
    pub(super) pausing: bool,
    pub(super) repeating: bool,
    pub(super) unhandled_choice: bool,
}

impl StoryEngine {
    /// Runs one turn against a snapshot. The snapshot is not touched; the
    /// next state is returned in [`TurnResult::state`].
    #[instrument(skip_all, fields(bookmark = snapshot.bookmark.as_deref().unwrap_or("")))]
    pub async fn advance_turn(
        &self,
        input: UserInput,
        snapshot: &SessionState,
    ) -> Result<TurnResult, StoryError> {
        let mut state = snapshot.clone();
        if session::is_ending_reached(&state) {
            state.previous_speech.clear();
            state.previous_recap.clear();
            session::set_ending_reached(&mut state, false);
        }
        let rng = state
            .rng_state
            .or(self.config.random_seed)
            .unwrap_or_else(seed_from_clock);

        let mut run = TurnRun {
            engine: self,
            context: TurnContext {
                state,
                input,
                stage: PlayStage::new(),
            },
            queue: VecDeque::new(),
            rng,
            pausing: false,
            repeating: false,
            unhandled_choice: false,
        };

        for hook in &self.hooks {
            hook.pre(&mut run.context).await?;
        }

        if session::is_paused(&run.context.state) {
            debug!("session is paused; skipping choice resolution");
        } else {
            run.resolve_choice().await?;
        }

        if !run.repeating && run.queue.is_empty() {
            run.seed_queue();
        }
        if let Some(head) = run.queue.front().cloned() {
            session::push_origin(&mut run.context.state, head, self.config.history_size);
        }

        run.drain_queue().await?;
        if run.pausing {
            run.play_pause_scene().await?;
        }

        run.context.stage.close_scene();
        if !run.repeating {
            let state = &mut run.context.state;
            let stage = &run.context.stage;
            state.previous_speech = stage.groups(Track::Speech).to_vec();
            state.previous_reprompt = stage.groups(Track::Reprompt).to_vec();
            state.previous_recap = stage.groups(Track::Recap).to_vec();
        }

        for hook in &self.hooks {
            hook.post(&mut run.context).await?;
        }

        Ok(run.finish().await)
    }
}

impl<'e> TurnRun<'e> {
    pub(super) fn enqueue(&mut self, scene_id: &str, property: Option<SceneProperty>) {
        self.queue.push_back(Origin {
            scene_id: scene_id.to_string(),
            property,
        });
    }

    async fn resolve_choice(&mut self) -> Result<(), StoryError> {
        let input = self.context.input.clone();
        let threshold = self.engine.config.fuzzy_threshold;

        let Some(choice) = session::resolve_choice_by_input(&mut self.context.state, &input, threshold)
        else {
            if self.replay_previous(false) {
                info!("input matched no choice; repeating the last turn");
                self.repeating = true;
                self.unhandled_choice = true;
            }
            return Ok(());
        };

        let scene_id = self.context.state.bookmark.clone().unwrap_or_default();
        self.context.stage.start_new_scene(&scene_id);
        self.execute_choice(&choice).await?;
        self.context.stage.close_scene();

        if !self.repeating {
            let state = &mut self.context.state;
            session::reset_choices(state);
            session::clear_expected_slots(state);
            if choice.save_to_history {
                let utterance = input
                    .value
                    .or(input.intent)
                    .unwrap_or_else(|| session::WILDCARD_UTTERANCE.to_string());
                session::append_history(
                    state,
                    ChoiceRecord {
                        id: choice.id.clone(),
                        utterance,
                    },
                    self.engine.config.history_size,
                );
            }
        }
        Ok(())
    }

    async fn execute_choice(&mut self, choice: &Choice) -> Result<(), StoryError> {
        debug!(choice = %choice.id, "running choice");
        let address = match choice.address.as_deref() {
            Some(raw) => Address::decode(raw)?,
            None => {
                let key = format!("choice-{}", choice.id);
                self.context
                    .state
                    .instruction_memo
                    .insert(key.clone(), choice.instructions.clone());
                Address::legacy(&key)
            }
        };
        self.perform_instructions(address).await
    }

    /// Copies last turn's output into this turn. Returns `false` when there
    /// was nothing to replay.
    pub(super) fn replay_previous(&mut self, reprompt_only: bool) -> bool {
        let state = &self.context.state;
        let reprompt = state.previous_reprompt.clone();
        let speech = if reprompt_only {
            reprompt.clone()
        } else if state.previous_speech.iter().any(|group| !group.is_empty()) {
            state.previous_speech.clone()
        } else {
            state.previous_recap.clone()
        };
        if speech.iter().all(SceneAudioItem::is_empty) {
            return false;
        }
        self.context.stage.replay(Track::Speech, &speech);
        self.context.stage.replay(Track::Reprompt, &reprompt);
        true
    }

    fn seed_queue(&mut self) {
        let has_resume = self.engine.story.has_scene(RESUME_SCENE);
        let state = &mut self.context.state;
        if session::is_paused(state) {
            session::set_paused(state, false);
            if has_resume {
                session::reset_choices(state);
                session::capture_resume_state(state);
                self.unhandled_choice = true;
                self.enqueue(RESUME_SCENE, None);
                return;
            }
        }
        let target = self
            .context
            .state
            .bookmark
            .clone()
            .unwrap_or_else(|| START_SCENE.to_string());
        self.enqueue(&target, None);
    }

    async fn drain_queue(&mut self) -> Result<(), StoryError> {
        if self.repeating {
            self.queue.clear();
            return Ok(());
        }

        let limit = self.engine.config.max_scenes_per_turn;
        let mut processed = 0usize;
        let mut last_scene = String::new();
        while let Some(next) = self.queue.pop_front() {
            if processed >= limit {
                return Err(StoryError::new(
                    "ENGINE_SCENE_LIMIT",
                    format!(
                        "Turn stopped after {} scenes; the last one was \"{}\".",
                        processed, last_scene
                    ),
                ));
            }
            processed += 1;

            debug!(scene = %next.scene_id, property = ?next.property, "playing scene");
            self.context.stage.log_visit(&next.scene_id);
            self.context.state.bookmark = Some(next.scene_id.clone());
            self.process_scene(&next.scene_id, next.property).await?;
            last_scene = next.scene_id;

            if self.pausing || self.repeating || session::is_ending_reached(&self.context.state) {
                break;
            }
        }
        self.queue.clear();
        Ok(())
    }

    async fn play_pause_scene(&mut self) -> Result<(), StoryError> {
        session::capture_resume_state(&mut self.context.state);
        if self.engine.story.has_scene(PAUSE_SCENE) {
            self.context.stage.log_visit(PAUSE_SCENE);
            self.process_scene(PAUSE_SCENE, None).await?;
        }
        session::set_paused(&mut self.context.state, true);
        self.pausing = false;
        self.queue.clear();
        Ok(())
    }

    async fn finish(self) -> TurnResult {
        let engine = self.engine;
        let TurnContext {
            mut state,
            mut stage,
            ..
        } = self.context;
        state.rng_state = Some(self.rng);

        stage.close_scene();
        stage.condense(engine.config.keep_scenes_separate);
        let rendered = render_turn_audio(
            &engine.audio,
            engine.mixer.as_deref(),
            stage.groups(Track::Speech),
            stage.groups(Track::Reprompt),
        )
        .await;

        TurnResult {
            speech: rendered.speech,
            reprompt: rendered.reprompt,
            preview: rendered.preview,
            error_message: rendered.error_message,
            visuals: stage.visuals().to_vec(),
            visited_scenes: stage.visited_scenes().to_vec(),
            ending_reached: state.ending_reached,
            unhandled_choice: self.unhandled_choice,
            state,
        }
    }
}
