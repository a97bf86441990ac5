pub mod audio;
pub mod error;
pub mod state;
pub mod types;
pub mod value;

pub use audio::*;
pub use error::{InstructionLocation, StoryError};
pub use state::*;
pub use types::*;
pub use value::*;
