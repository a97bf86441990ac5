use super::variables::{apply_mutation, record_time};
use super::*;

/// Bound on address hops inside one instruction run.
const MAX_ADDRESS_HOPS: usize = 10_000;

/// What the interpreter does after one instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Continue,
    /// Stop the current instruction list.
    Terminate,
    /// Switch to another position, e.g. a conditional branch.
    Jump(Address),
    /// Switch to a return address popped from the call stack.
    CallReturn(Address),
}

impl<'e> TurnRun<'e> {
    /// Runs the instruction list at `address` and every position it hands off
    /// to.
    pub(super) async fn perform_instructions(&mut self, address: Address) -> Result<(), StoryError> {
        let mut current = address;
        for _ in 0..MAX_ADDRESS_HOPS {
            let instructions = current.resolve(self.engine.story.as_ref(), &self.context.state);
            let mut next = None;
            for (line, raw) in instructions.iter().enumerate() {
                let instruction = prepare(raw, &self.context.state);
                match self.execute(&current, line, &instruction).await? {
                    Flow::Continue => {}
                    Flow::Terminate => break,
                    Flow::Jump(target) => {
                        next = Some(target);
                        break;
                    }
                    Flow::CallReturn(target) => {
                        debug!(target = %target.encode(), "returning to caller");
                        next = Some(target);
                        break;
                    }
                }
            }

            self.retire_legacy_memo(&current, next.as_ref());
            match next {
                Some(target) => current = target,
                None => return Ok(()),
            }
        }
        Err(StoryError::new(
            "ENGINE_INSTRUCTION_LIMIT",
            format!(
                "Instructions handed off more than {} times in one run.",
                MAX_ADDRESS_HOPS
            ),
        ))
    }

    /// Drops the memo entry behind a finished legacy address once nothing can
    /// reach it again.
    fn retire_legacy_memo(&mut self, finished: &Address, next: Option<&Address>) {
        let Some(key) = finished.legacy_key() else {
            return;
        };
        if next.and_then(Address::legacy_key) == Some(key) {
            return;
        }
        let state = &mut self.context.state;
        let referenced = state.call_stack.iter().any(|raw| {
            Address::decode(raw)
                .ok()
                .is_some_and(|address| address.legacy_key() == Some(key))
        });
        if !referenced {
            state.instruction_memo.remove(key);
        }
    }

    fn location(&self, address: &Address, line: usize, instruction: &Instruction) -> InstructionLocation {
        let scene_id = match address.scene_id() {
            "" => self.context.state.bookmark.clone().unwrap_or_default(),
            scene_id => scene_id.to_string(),
        };
        InstructionLocation::new(scene_id, line, Some(instruction))
    }

    /// Logs an authoring problem, or fails the turn in debug mode.
    fn authoring_issue(
        &self,
        code: &str,
        message: String,
        address: &Address,
        line: usize,
        instruction: &Instruction,
    ) -> Result<(), StoryError> {
        if self.engine.config.debug {
            return Err(StoryError::at(
                code,
                message,
                self.location(address, line, instruction),
            ));
        }
        warn!(code, kind = instruction.kind.name(), "{}", message);
        Ok(())
    }

    async fn execute(
        &mut self,
        address: &Address,
        line: usize,
        instruction: &Instruction,
    ) -> Result<Flow, StoryError> {
        let history_size = self.engine.config.history_size;
        match &instruction.kind {
            InstructionKind::Choice => {
                self.register_choice(address, line, instruction);
                Ok(Flow::Continue)
            }
            InstructionKind::Condition => {
                let condition = instruction.param("condition").unwrap_or_default();
                let location = self.location(address, line, instruction);
                if self.check_condition(condition, location)? {
                    Ok(Flow::Jump(address.condition(line)))
                } else {
                    Ok(Flow::Continue)
                }
            }
            InstructionKind::GoTo => {
                if let Some(origin) = self.jump_target(address, line, instruction)? {
                    self.queue.push_back(origin);
                }
                Ok(Flow::Terminate)
            }
            InstructionKind::SaveAndGo => {
                if let Some(origin) = self.jump_target(address, line, instruction)? {
                    session::push_call(&mut self.context.state, &address.return_to(line), history_size);
                    self.queue.push_back(origin);
                }
                Ok(Flow::Terminate)
            }
            InstructionKind::Return => {
                if let Some(target) = session::pop_call(&mut self.context.state) {
                    if !target.scene_id().is_empty() {
                        self.context.state.bookmark = Some(target.scene_id().to_string());
                    }
                    return Ok(Flow::CallReturn(target));
                }
                match session::restore_resume_state(&mut self.context.state) {
                    Some(target) => self.enqueue(&target, None),
                    None => debug!("RETURN with an empty call stack and no resume target"),
                }
                Ok(Flow::Terminate)
            }
            InstructionKind::Back => {
                let count = instruction
                    .param("count")
                    .and_then(|raw| raw.trim().parse::<usize>().ok())
                    .unwrap_or(1);
                match session::pop_origins(&mut self.context.state, count.saturating_add(1)) {
                    Some(origin) => self.queue.push_back(origin),
                    None => debug!("BACK with an empty origin stack"),
                }
                Ok(Flow::Terminate)
            }
            InstructionKind::Restart => {
                session::reset_story_state(&mut self.context.state);
                self.queue.clear();
                self.enqueue(START_SCENE, None);
                Ok(Flow::Terminate)
            }
            InstructionKind::End => {
                session::reset_story_state(&mut self.context.state);
                session::set_ending_reached(&mut self.context.state, true);
                self.queue.clear();
                Ok(Flow::Terminate)
            }
            InstructionKind::Pause => {
                self.pausing = true;
                Ok(Flow::Continue)
            }
            InstructionKind::Repeat | InstructionKind::RepeatReprompt => {
                let reprompt_only = instruction.kind == InstructionKind::RepeatReprompt;
                if self.replay_previous(reprompt_only) {
                    self.repeating = true;
                    Ok(Flow::Terminate)
                } else {
                    debug!(kind = instruction.kind.name(), "nothing to repeat");
                    Ok(Flow::Continue)
                }
            }
            InstructionKind::Recap | InstructionKind::Reprompt => {
                let track = if instruction.kind == InstructionKind::Recap {
                    Track::Recap
                } else {
                    Track::Reprompt
                };
                let text = self.pick_alternative(instruction.param("narration").unwrap_or_default());
                let items = parse_markup(&text, self.engine.audio.default_voice.as_deref());
                self.context.stage.append_foreground(track, items);
                Ok(Flow::Continue)
            }
            InstructionKind::Bgm => {
                self.stage_background(address, line, instruction)?;
                Ok(Flow::Continue)
            }
            InstructionKind::Visuals => {
                self.context.stage.stage_visual(instruction.parameters.clone());
                Ok(Flow::Continue)
            }
            InstructionKind::Slot => {
                match instruction.param("slotName").map(str::trim).filter(|name| !name.is_empty()) {
                    Some(name) => session::expect_slot(&mut self.context.state, name),
                    None => self.authoring_issue(
                        "ENGINE_INSTRUCTION_INVALID",
                        "SLOT has no slotName.".to_string(),
                        address,
                        line,
                        instruction,
                    )?,
                }
                Ok(Flow::Continue)
            }
            InstructionKind::Bookmark => {
                let scene_id = self
                    .context
                    .stage
                    .current_scene()
                    .map(str::to_string)
                    .unwrap_or_else(|| address.scene_id().to_string());
                match instruction.param("name").map(str::trim).filter(|name| !name.is_empty()) {
                    Some(name) => {
                        if !self.context.state.set_variable(name, StateValue::String(scene_id)) {
                            warn!(name, "BOOKMARK cannot overwrite an engine key");
                        }
                    }
                    None => self.authoring_issue(
                        "ENGINE_INSTRUCTION_INVALID",
                        "BOOKMARK has no name.".to_string(),
                        address,
                        line,
                        instruction,
                    )?,
                }
                Ok(Flow::Continue)
            }
            InstructionKind::GetTime => {
                record_time(
                    &mut self.context.state,
                    instruction,
                    chrono::Utc::now().timestamp_millis(),
                );
                Ok(Flow::Continue)
            }
            InstructionKind::Roll => {
                self.roll(address, line, instruction)?;
                Ok(Flow::Continue)
            }
            InstructionKind::Custom => {
                self.invoke_custom(address, line, instruction).await?;
                Ok(Flow::Continue)
            }
            InstructionKind::Clear
            | InstructionKind::Flag
            | InstructionKind::Unflag
            | InstructionKind::Set
            | InstructionKind::Reduce
            | InstructionKind::Increase
            | InstructionKind::Multiply
            | InstructionKind::Divide
            | InstructionKind::Modulus
            | InstructionKind::AddToInventory
            | InstructionKind::AddItem
            | InstructionKind::RemoveItem
            | InstructionKind::RemoveFirst
            | InstructionKind::RemoveLast => {
                if let Err(message) = apply_mutation(&mut self.context.state, instruction) {
                    self.authoring_issue("ENGINE_VARIABLE_INVALID", message, address, line, instruction)?;
                }
                Ok(Flow::Continue)
            }
            InstructionKind::Unknown(raw) => Err(StoryError::at(
                "ENGINE_UNKNOWN_INSTRUCTION",
                format!("Unknown instruction kind \"{}\".", raw),
                self.location(address, line, instruction),
            )),
        }
    }

    fn register_choice(&mut self, address: &Address, line: usize, instruction: &Instruction) {
        let utterances = instruction
            .param("utterances")
            .unwrap_or_default()
            .split("||")
            .map(str::trim)
            .filter(|utterance| !utterance.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();
        if utterances.is_empty() {
            warn!(scene = %address.scene_id(), line, "CHOICE without utterances is ignored");
            return;
        }

        // Memo-backed positions may be gone next turn, so those choices carry
        // their own instructions.
        let (choice_address, instructions) = match address.legacy_key() {
            Some(_) => (None, instruction.instructions.clone()),
            None => (Some(address.choice(line).encode()), Vec::new()),
        };
        let save_to_history = instruction
            .param("saveToHistory")
            .is_some_and(|raw| StateValue::from_param(raw).is_truthy());
        session::enqueue_choice(
            &mut self.context.state,
            Choice {
                id: session::choice_id(&utterances),
                utterances,
                address: choice_address,
                instructions,
                save_to_history,
            },
        );
    }

    fn jump_target(
        &self,
        address: &Address,
        line: usize,
        instruction: &Instruction,
    ) -> Result<Option<Origin>, StoryError> {
        let target = instruction.param("target").map(str::trim).unwrap_or_default();
        if target.is_empty() || !self.engine.story.has_scene(target) {
            self.authoring_issue(
                "ENGINE_SCENE_NOT_FOUND",
                format!("{} target \"{}\" is not a scene.", instruction.kind.name(), target),
                address,
                line,
                instruction,
            )?;
            return Ok(None);
        }
        Ok(Some(Origin {
            scene_id: target.to_string(),
            property: SceneProperty::parse(instruction.param("property")),
        }))
    }

    fn stage_background(
        &mut self,
        address: &Address,
        line: usize,
        instruction: &Instruction,
    ) -> Result<(), StoryError> {
        let Some(source) = instruction.param("source").map(str::trim).filter(|src| !src.is_empty()) else {
            return self.authoring_issue(
                "ENGINE_INSTRUCTION_INVALID",
                "BGM has no source.".to_string(),
                address,
                line,
                instruction,
            );
        };
        let mut item = AudioItem::audio(source);
        if let Some(volume) = instruction.param("volume").and_then(parse_level) {
            item.volume = volume;
        }
        if let Some(delay) = instruction
            .param("delay")
            .and_then(|raw| raw.trim().trim_end_matches('s').parse::<f64>().ok())
        {
            item.delay = delay;
        }
        self.context.stage.append_background(Track::Speech, item);
        Ok(())
    }

    fn roll(&mut self, address: &Address, line: usize, instruction: &Instruction) -> Result<(), StoryError> {
        let expression = instruction.param("expression").unwrap_or_default();
        let rolled = if self.engine.config.deterministic_dice {
            roll_expression(expression, &mut MeanRoller)
        } else {
            roll_expression(expression, &mut SeededRoller { state: &mut self.rng })
        };
        match rolled {
            Ok(value) => {
                self.context
                    .state
                    .set_variable(ROLL_RESULT_VARIABLE, StateValue::Number(value));
                Ok(())
            }
            Err(error) => self.authoring_issue(&error.code, error.message, address, line, instruction),
        }
    }

    async fn invoke_custom(
        &mut self,
        address: &Address,
        line: usize,
        instruction: &Instruction,
    ) -> Result<(), StoryError> {
        let name = instruction.param("customName").map(str::trim).unwrap_or_default();
        let Some(handler) = self.engine.custom_handlers.get(name).cloned() else {
            return self.authoring_issue(
                "ENGINE_CUSTOM_HANDLER_MISSING",
                format!("No handler for custom instruction \"{}\".", name),
                address,
                line,
                instruction,
            );
        };
        handler.invoke(instruction, &mut self.context).await
    }
}

/// Fills `{variable}` placeholders in every parameter. Choice utterances keep
/// their slot templates; conditions get evaluator-safe literals.
fn prepare(raw: &Instruction, state: &SessionState) -> Instruction {
    let mut instruction = raw.clone();
    for (name, value) in instruction.parameters.iter_mut() {
        if raw.kind == InstructionKind::Choice && name == "utterances" {
            continue;
        }
        *value = if name == "condition" {
            substitute_condition(value, state)
        } else {
            substitute(value, state)
        };
    }
    instruction
}

/// `0.5` and `50%` both mean half volume.
fn parse_level(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let value = match trimmed.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f64>().ok()? / 100.0,
        None => trimmed.parse::<f64>().ok()?,
    };
    (value.is_finite() && value >= 0.0).then_some(value)
}

#[cfg(test)]
mod instructions_tests {
    use super::*;

    #[test]
    fn prepare_substitutes_everything_but_utterances() {
        let mut state = SessionState::default();
        state.set_variable("place", StateValue::from("cave"));
        state.set_variable("gold", StateValue::Number(3.0));

        let go = prepare(
            &Instruction::new(InstructionKind::GoTo).with_param("target", "{place}"),
            &state,
        );
        assert_eq!(go.param("target"), Some("cave"));

        let choice = prepare(
            &Instruction::new(InstructionKind::Choice).with_param("utterances", "go to {place}"),
            &state,
        );
        assert_eq!(choice.param("utterances"), Some("go to {place}"));

        let condition = prepare(
            &Instruction::new(InstructionKind::Condition).with_param("condition", "{place} == {missing}"),
            &state,
        );
        assert_eq!(condition.param("condition"), Some("\"cave\" == false"));
    }

    #[test]
    fn levels_accept_percentages() {
        assert_eq!(parse_level("50%"), Some(0.5));
        assert_eq!(parse_level("0.25"), Some(0.25));
        assert_eq!(parse_level("-1"), None);
        assert_eq!(parse_level("loud"), None);
    }
}
