use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::audio::SceneAudioItem;
use crate::types::{Choice, ChoiceRecord, Instruction, Origin};
use crate::value::StateValue;

/// Keys owned by the engine. Author variables with these names would collide
/// with the flattened wire form, so writes to them are refused.
pub const RESERVED_STATE_KEYS: &[&str] = &[
    "bookmark",
    "choices",
    "utteranceIndex",
    "expectedSlots",
    "choiceHistory",
    "callStack",
    "originStack",
    "previousSpeech",
    "previousReprompt",
    "previousRecap",
    "paused",
    "endingReached",
    "instructionMemo",
    "rngState",
];

/// Caller-persisted session snapshot. Serializes as one flat JSON object with
/// author variables alongside the engine's own keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
    #[serde(default)]
    pub choices: BTreeMap<String, Choice>,
    #[serde(default)]
    pub utterance_index: BTreeMap<String, String>,
    #[serde(default)]
    pub expected_slots: Vec<String>,
    #[serde(default)]
    pub choice_history: Vec<ChoiceRecord>,
    #[serde(default)]
    pub call_stack: Vec<String>,
    #[serde(default)]
    pub origin_stack: Vec<Origin>,
    #[serde(default)]
    pub previous_speech: Vec<SceneAudioItem>,
    #[serde(default)]
    pub previous_reprompt: Vec<SceneAudioItem>,
    #[serde(default)]
    pub previous_recap: Vec<SceneAudioItem>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub ending_reached: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub instruction_memo: BTreeMap<String, Vec<Instruction>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng_state: Option<u32>,
    #[serde(flatten)]
    pub variables: BTreeMap<String, StateValue>,
}

impl SessionState {
    pub fn is_reserved_key(name: &str) -> bool {
        RESERVED_STATE_KEYS.contains(&name)
    }

    pub fn variable(&self, name: &str) -> Option<&StateValue> {
        self.variables.get(name)
    }

    /// Returns `false` when `name` is an engine key and nothing was written.
    pub fn set_variable(&mut self, name: &str, value: StateValue) -> bool {
        if Self::is_reserved_key(name) {
            return false;
        }
        self.variables.insert(name.to_string(), value);
        true
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<StateValue> {
        self.variables.remove(name)
    }
}
