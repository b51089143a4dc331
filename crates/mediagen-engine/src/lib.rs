pub mod api;
pub mod enhance;
pub mod extract;
pub mod generators;
pub mod runner;

#[cfg(test)]
mod testing;

pub use api::{GenAiApi, HttpGenAi};
pub use enhance::{EnhanceOptions, PromptEnhancer};
pub use generators::Generator;
pub use runner::{JobFailure, JobRunner};
