#![allow(unused_imports)]

mod rng;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use rng::{next_random_bounded, seed_from_clock, SeededRoller};
use serde::{Deserialize, Serialize};
use sv_audio::{parse_markup, render_turn_audio, AudioConfig, MixingService};
use sv_core::{
    AudioItem, Choice, ChoiceRecord, Instruction, InstructionKind, InstructionLocation, Origin,
    Scene, SceneAudioItem, SceneProperty, SessionState, StateValue, StoryError, UserInput,
    Variation, VisualDirective, PAUSE_SCENE, RESUME_SCENE, START_SCENE,
};
use tracing::{debug, info, instrument, warn};

use crate::address::Address;
use crate::dice::{roll_expression, DieRoller, MeanRoller, ROLL_RESULT_VARIABLE};
use crate::expr::evaluate_condition;
use crate::hooks::{CustomInstructionHandler, TurnContext, TurnHook};
use crate::stage::{PlayStage, Track};
use crate::state as session;
use crate::story::StoryGraph;
use crate::template::{substitute, substitute_condition};

mod instructions;
mod lifecycle;
mod scene;
mod turn;
mod variables;

pub use instructions::Flow;
pub use lifecycle::{
    EngineConfig, StoryEngine, StoryEngineOptions, TurnResult, DEFAULT_FUZZY_THRESHOLD,
    DEFAULT_HISTORY_SIZE, DEFAULT_MAX_SCENES_PER_TURN,
};
use turn::TurnRun;

#[cfg(test)]
pub(super) mod runtime_test_support {
    use super::*;
    pub(super) use crate::story::InMemoryStory;

    pub(super) fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    pub(super) fn op(kind: InstructionKind, params: &[(&str, &str)]) -> Instruction {
        Instruction {
            kind,
            parameters: map(params),
            instructions: Vec::new(),
        }
    }

    pub(super) fn choice(utterances: &str, body: Vec<Instruction>) -> Instruction {
        op(InstructionKind::Choice, &[("utterances", utterances)]).with_body(body)
    }

    pub(super) fn go_to(target: &str) -> Instruction {
        op(InstructionKind::GoTo, &[("target", target)])
    }

    pub(super) fn scene(id: &str, narration: &str, instructions: Vec<Instruction>) -> Scene {
        Scene {
            id: id.to_string(),
            variations: vec![Variation {
                condition: None,
                narration: (!narration.is_empty()).then(|| narration.to_string()),
                instructions,
            }],
        }
    }

    fn seeded(story: InMemoryStory) -> StoryEngineOptions {
        let mut options = StoryEngineOptions::new(Arc::new(story));
        options.config.random_seed = Some(1);
        options.config.deterministic_dice = true;
        options
    }

    pub(super) fn options(scenes: Vec<Scene>) -> StoryEngineOptions {
        seeded(InMemoryStory::new(scenes))
    }

    pub(super) fn engine_from_json(raw: &str) -> StoryEngine {
        let story = InMemoryStory::from_json(raw).expect("story json should parse");
        StoryEngine::new(seeded(story)).expect("engine should build")
    }

    pub(super) fn engine(scenes: Vec<Scene>) -> StoryEngine {
        StoryEngine::new(options(scenes)).expect("engine should build")
    }

    pub(super) async fn play(engine: &StoryEngine, state: &SessionState, input: UserInput) -> TurnResult {
        engine
            .advance_turn(input, state)
            .await
            .expect("turn should pass")
    }

    pub(super) async fn launch(engine: &StoryEngine) -> TurnResult {
        play(engine, &SessionState::default(), UserInput::default()).await
    }

    pub(super) fn say(text: &str) -> UserInput {
        UserInput::from_utterance(text)
    }
}
