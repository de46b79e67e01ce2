//! Fairytale Studio generation library
//!
//! Vendor clients and the story pipeline:
//! - DeepSeek story text
//! - Seedream / Jimeng chapter illustrations (Jimeng requests HMAC-signed)
//! - CosyVoice narration over WebSocket
//! - JSON snapshots of each run

pub mod errors;
pub mod image;
pub mod pipeline;
pub mod snapshot;
pub mod speech;
pub mod text;

pub use errors::GenerationError;
pub use image::{create_image_generator, ImageGenerator};
pub use pipeline::{PipelineSettings, PipelineVendors, StoryPipeline};
pub use speech::{CosyVoiceClient, SpeechSynthesizer};
pub use text::{DeepSeekClient, GeneratedChapter, GeneratedStory, StoryWriter};
