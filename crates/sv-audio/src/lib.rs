mod config;
mod error;
mod markup;
mod mixer;
mod processor;
#[cfg(test)]
mod test_support;

pub use config::{AudioConfig, DEFAULT_COMBINE_THRESHOLD};
pub use error::AudioError;
pub use markup::{escape_attr, escape_text, flatten_scenes, parse_markup, plain_text, render_markup};
pub use mixer::{MixMode, MixSettings, MixSource, MixTrack, MixingService, Trim};
pub use processor::{render_turn_audio, AudioProcessor, RenderedAudio};
