use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Instruction;

/// Where an authoring defect was hit while walking the instruction graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionLocation {
    pub scene_id: String,
    pub line: usize,
    pub instruction: Option<String>,
}

impl InstructionLocation {
    pub fn new(scene_id: impl Into<String>, line: usize, instruction: Option<&Instruction>) -> Self {
        Self {
            scene_id: scene_id.into(),
            line,
            instruction: instruction.and_then(|value| serde_json::to_string(value).ok()),
        }
    }
}

#[derive(Debug, Error, Clone)]
#[error("{code}: {message}")]
pub struct StoryError {
    pub code: String,
    pub message: String,
    pub location: Option<InstructionLocation>,
}

impl StoryError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn at(
        code: impl Into<String>,
        message: impl Into<String>,
        location: InstructionLocation,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            location: Some(location),
        }
    }
}
