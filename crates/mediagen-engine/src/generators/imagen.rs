use std::sync::Arc;

use mediagen_contracts::media::{GenerationResult, MediaAttachment, MediaKind};
use mediagen_contracts::GenerationError;
use serde_json::{json, Map, Value};

use super::Generator;
use crate::api::GenAiApi;
use crate::extract::{batch_items, BatchItem};

pub const DEFAULT_IMAGEN_MODEL: &str = "imagen-4.0-generate-001";
pub const IMAGEN_ASPECT_RATIOS: &[&str] = &["1:1", "16:9", "9:16", "4:3", "3:4"];
pub const IMAGEN_PERSON_GENERATION: &[&str] = &["dont_allow", "allow_adult", "allow_all"];
pub const MAX_IMAGEN_BATCH: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagenOptions {
    pub batch: u32,
    pub aspect_ratio: String,
    pub person_generation: Option<String>,
}

impl Default for ImagenOptions {
    fn default() -> Self {
        Self {
            batch: MAX_IMAGEN_BATCH,
            aspect_ratio: "1:1".to_string(),
            person_generation: None,
        }
    }
}

/// Text-to-image in one request for the whole batch. Images the server
/// filtered are skipped; an all-filtered batch is an empty result.
pub struct ImagenGenerator {
    api: Arc<dyn GenAiApi>,
    model: String,
    options: ImagenOptions,
}

impl ImagenGenerator {
    pub fn new(api: Arc<dyn GenAiApi>, model: impl Into<String>, options: ImagenOptions) -> Self {
        let mut options = options;
        let batch = options.batch.clamp(1, MAX_IMAGEN_BATCH);
        if batch != options.batch {
            tracing::warn!(
                requested = options.batch,
                batch,
                "batch size out of range; clamped"
            );
            options.batch = batch;
        }
        Self {
            api,
            model: model.into(),
            options,
        }
    }

    pub fn batch(&self) -> u32 {
        self.options.batch
    }

    fn build_payload(&self, prompt: &str) -> Value {
        let mut parameters = Map::new();
        parameters.insert("sampleCount".to_string(), json!(self.options.batch));
        parameters.insert("aspectRatio".to_string(), json!(self.options.aspect_ratio));
        parameters.insert("includeRaiReason".to_string(), Value::Bool(true));
        if let Some(person) = &self.options.person_generation {
            parameters.insert("personGeneration".to_string(), json!(person));
        }
        json!({
            "instances": [{ "prompt": prompt }],
            "parameters": Value::Object(parameters),
        })
    }
}

impl Generator for ImagenGenerator {
    fn name(&self) -> &str {
        "imagen"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn attachments(&self) -> &[MediaAttachment] {
        &[]
    }

    fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationError> {
        let response = self.api.predict(&self.model, &self.build_payload(prompt))?;

        let mut result = GenerationResult::default();
        let items = batch_items(&response);
        if items.is_empty() {
            result.push_warning("No images were generated.".to_string());
            return Ok(result);
        }
        for (idx, item) in items.into_iter().enumerate() {
            match item {
                BatchItem::Media(payload) => {
                    result.outputs.push(payload.into_media(MediaKind::Png));
                }
                BatchItem::Filtered(reason) => {
                    result.push_warning(format!("image {} filtered: {reason}", idx + 1));
                }
            }
        }
        Ok(result)
    }
}
