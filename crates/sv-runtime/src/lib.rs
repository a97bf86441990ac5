pub mod address;
pub mod dice;
mod engine;
pub mod expr;
pub mod fuzzy;
pub mod hooks;
pub mod stage;
pub mod state;
pub mod story;
pub mod template;

pub use address::Address;
pub use engine::{
    EngineConfig, Flow, StoryEngine, StoryEngineOptions, TurnResult, DEFAULT_FUZZY_THRESHOLD,
    DEFAULT_HISTORY_SIZE, DEFAULT_MAX_SCENES_PER_TURN,
};
pub use hooks::{CustomInstructionHandler, TurnContext, TurnHook};
pub use stage::{PlayStage, Track};
pub use story::{InMemoryStory, StoryGraph};
