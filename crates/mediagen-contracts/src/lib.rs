pub mod config;
pub mod error;
pub mod history;
pub mod media;
pub mod models;
pub mod naming;

pub use error::GenerationError;
