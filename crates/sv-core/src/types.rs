use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const START_SCENE: &str = "start";
pub const RESUME_SCENE: &str = "resume";
pub const PAUSE_SCENE: &str = "pause";

/// Condition text that marks the fallback variation of a scene.
pub const OTHERWISE_CONDITION: &str = "otherwise";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    #[serde(default)]
    pub variations: Vec<Variation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<String>,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl Variation {
    pub fn is_unconditioned(&self) -> bool {
        match &self.condition {
            None => true,
            Some(condition) => {
                let trimmed = condition.trim();
                trimmed.is_empty() || trimmed.eq_ignore_ascii_case(OTHERWISE_CONDITION)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstructionKind {
    Custom,
    Slot,
    Bookmark,
    Choice,
    Condition,
    GoTo,
    SaveAndGo,
    Return,
    Restart,
    Repeat,
    RepeatReprompt,
    Back,
    Recap,
    Reprompt,
    End,
    Pause,
    Bgm,
    Clear,
    Flag,
    Unflag,
    Set,
    Reduce,
    Increase,
    Multiply,
    Divide,
    Modulus,
    AddToInventory,
    AddItem,
    RemoveItem,
    RemoveFirst,
    RemoveLast,
    GetTime,
    Roll,
    Visuals,
    /// Anything the compiler emitted that this engine does not know.
    Unknown(String),
}

const KIND_NAMES: &[(&str, InstructionKind)] = &[
    ("CUSTOM", InstructionKind::Custom),
    ("SLOT", InstructionKind::Slot),
    ("BOOKMARK", InstructionKind::Bookmark),
    ("CHOICE", InstructionKind::Choice),
    ("CONDITION", InstructionKind::Condition),
    ("GO_TO", InstructionKind::GoTo),
    ("SAVE_AND_GO", InstructionKind::SaveAndGo),
    ("RETURN", InstructionKind::Return),
    ("RESTART", InstructionKind::Restart),
    ("REPEAT", InstructionKind::Repeat),
    ("REPEAT_REPROMPT", InstructionKind::RepeatReprompt),
    ("BACK", InstructionKind::Back),
    ("RECAP", InstructionKind::Recap),
    ("REPROMPT", InstructionKind::Reprompt),
    ("END", InstructionKind::End),
    ("PAUSE", InstructionKind::Pause),
    ("BGM", InstructionKind::Bgm),
    ("CLEAR", InstructionKind::Clear),
    ("FLAG", InstructionKind::Flag),
    ("UNFLAG", InstructionKind::Unflag),
    ("SET", InstructionKind::Set),
    ("REDUCE", InstructionKind::Reduce),
    ("INCREASE", InstructionKind::Increase),
    ("MULTIPLY", InstructionKind::Multiply),
    ("DIVIDE", InstructionKind::Divide),
    ("MODULUS", InstructionKind::Modulus),
    ("ADD_TO_INVENTORY", InstructionKind::AddToInventory),
    ("ADD_ITEM", InstructionKind::AddItem),
    ("REMOVE_ITEM", InstructionKind::RemoveItem),
    ("REMOVE_FIRST", InstructionKind::RemoveFirst),
    ("REMOVE_LAST", InstructionKind::RemoveLast),
    ("GET_TIME", InstructionKind::GetTime),
    ("ROLL", InstructionKind::Roll),
    ("VISUALS", InstructionKind::Visuals),
];

impl InstructionKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Unknown(raw) => raw.as_str(),
            known => KIND_NAMES
                .iter()
                .find(|(_, kind)| kind == known)
                .map(|(name, _)| *name)
                .unwrap_or("UNKNOWN"),
        }
    }
}

impl From<String> for InstructionKind {
    fn from(raw: String) -> Self {
        let normalized = raw.trim().to_ascii_uppercase();
        KIND_NAMES
            .iter()
            .find(|(name, _)| *name == normalized)
            .map(|(_, kind)| kind.clone())
            .unwrap_or(Self::Unknown(raw))
    }
}

impl From<InstructionKind> for String {
    fn from(kind: InstructionKind) -> Self {
        kind.name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub kind: InstructionKind,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<Instruction>,
}

impl Instruction {
    pub fn new(kind: InstructionKind) -> Self {
        Self {
            kind,
            parameters: BTreeMap::new(),
            instructions: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// Which part of a scene a jump asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneProperty {
    Narration,
    Reprompt,
    Recap,
    Then,
}

impl SceneProperty {
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("narration") | Some("say") => Some(Self::Narration),
            Some("reprompt") => Some(Self::Reprompt),
            Some("recap") => Some(Self::Recap),
            Some("then") => Some(Self::Then),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    pub scene_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property: Option<SceneProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub id: String,
    pub utterances: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Pre-address sessions stored the choice body inline.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub save_to_history: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChoiceRecord {
    pub id: String,
    pub utterance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<InputSlot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl UserInput {
    pub fn from_utterance(value: impl Into<String>) -> Self {
        Self {
            intent: None,
            slots: Vec::new(),
            value: Some(value.into()),
        }
    }

    pub fn from_intent(intent: impl Into<String>) -> Self {
        Self {
            intent: Some(intent.into()),
            slots: Vec::new(),
            value: None,
        }
    }

    pub fn with_slot(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.slots.push(InputSlot {
            name: name.into(),
            value: Some(value.into()),
        });
        self
    }

    pub fn slot_value(&self, name: &str) -> Option<&str> {
        self.slots
            .iter()
            .find(|slot| slot.name.eq_ignore_ascii_case(name))
            .and_then(|slot| slot.value.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_id: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[cfg(test)]
mod types_tests {
    use super::*;

    #[test]
    fn instruction_kind_roundtrips_through_wire_names() {
        let parsed: Instruction = serde_json::from_str(
            r#"{"kind":"save_and_go","parameters":{"target":"cave"}}"#,
        )
        .expect("instruction should deserialize");
        assert_eq!(parsed.kind, InstructionKind::SaveAndGo);
        let raw = serde_json::to_string(&parsed).expect("serialize");
        assert!(raw.contains("\"SAVE_AND_GO\""));
    }

    #[test]
    fn unknown_kind_is_kept_for_the_interpreter_to_reject() {
        let parsed: Instruction =
            serde_json::from_str(r#"{"kind":"TELEPORT"}"#).expect("instruction should parse");
        assert_eq!(parsed.kind, InstructionKind::Unknown("TELEPORT".to_string()));
        assert_eq!(parsed.kind.name(), "TELEPORT");
    }

    #[test]
    fn otherwise_variation_counts_as_unconditioned() {
        let variation = Variation {
            condition: Some(" Otherwise ".to_string()),
            ..Variation::default()
        };
        assert!(variation.is_unconditioned());
        let guarded = Variation {
            condition: Some("gold > 2".to_string()),
            ..Variation::default()
        };
        assert!(!guarded.is_unconditioned());
    }

    #[test]
    fn scene_property_parse_accepts_known_words() {
        assert_eq!(SceneProperty::parse(Some("Reprompt")), Some(SceneProperty::Reprompt));
        assert_eq!(SceneProperty::parse(Some("then")), Some(SceneProperty::Then));
        assert_eq!(SceneProperty::parse(Some("elsewhere")), None);
        assert_eq!(SceneProperty::parse(None), None);
    }

    #[test]
    fn slot_lookup_is_case_insensitive() {
        let input = UserInput::from_intent("CountIntent").with_slot("Bottles", "3");
        assert_eq!(input.slot_value("bottles"), Some("3"));
        assert_eq!(input.slot_value("cans"), None);
    }
}
