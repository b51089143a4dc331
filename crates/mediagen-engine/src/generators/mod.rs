pub mod gemini;
pub mod gemini3;
pub mod imagen;
pub mod veo;

use mediagen_contracts::media::{GenerationResult, MediaAttachment};
use mediagen_contracts::GenerationError;

pub use gemini::{GeminiGenerator, GeminiOptions};
pub use gemini3::{Gemini3Generator, Gemini3Options};
pub use imagen::{ImagenGenerator, ImagenOptions};
pub use veo::{Clock, SystemClock, VeoGenerator, VeoMedia, VeoOptions, VideoJobState};

/// One model family's prompt-to-media call. Request shaping is fixed at
/// construction; `generate` may be called once per retry attempt.
pub trait Generator: Send {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// Media handed to the prompt enhancer when it is asked to see them.
    fn attachments(&self) -> &[MediaAttachment];

    fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationError>;
}
