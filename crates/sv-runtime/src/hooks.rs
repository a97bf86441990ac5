use async_trait::async_trait;
use sv_core::{Instruction, SessionState, StoryError, UserInput};

use crate::stage::PlayStage;

/// What extensions see of a turn in progress.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub state: SessionState,
    pub input: UserInput,
    pub stage: PlayStage,
}

/// Runs before choice resolution and after the scene queue drains. Errors
/// abort the turn unchanged.
#[async_trait]
pub trait TurnHook: Send + Sync {
    async fn pre(&self, _context: &mut TurnContext) -> Result<(), StoryError> {
        Ok(())
    }

    async fn post(&self, _context: &mut TurnContext) -> Result<(), StoryError> {
        Ok(())
    }
}

/// Handles `CUSTOM` instructions whose `customName` equals [`name`](Self::name).
#[async_trait]
pub trait CustomInstructionHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn invoke(
        &self,
        instruction: &Instruction,
        context: &mut TurnContext,
    ) -> Result<(), StoryError>;
}
