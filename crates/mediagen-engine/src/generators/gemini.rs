use std::sync::Arc;

use mediagen_contracts::media::{GenerationResult, MediaAttachment, MediaKind};
use mediagen_contracts::GenerationError;
use serde_json::{json, Map, Value};

use super::Generator;
use crate::api::GenAiApi;
use crate::enhance::inline_part;
use crate::extract::extract;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash-image";
pub const GEMINI_ASPECT_RATIOS: &[&str] =
    &["1:1", "2:3", "3:2", "3:4", "4:3", "9:16", "16:9", "21:9"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiOptions {
    pub aspect_ratio: String,
    /// Present the attachments as an earlier model turn.
    pub bypass: bool,
}

impl Default for GeminiOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: "3:4".to_string(),
            bypass: false,
        }
    }
}

pub struct GeminiGenerator {
    api: Arc<dyn GenAiApi>,
    model: String,
    images: Vec<MediaAttachment>,
    options: GeminiOptions,
}

impl GeminiGenerator {
    pub fn new(
        api: Arc<dyn GenAiApi>,
        model: impl Into<String>,
        images: Vec<MediaAttachment>,
        options: GeminiOptions,
    ) -> Self {
        Self {
            api,
            model: model.into(),
            images,
            options,
        }
    }

    fn build_contents(&self, prompt: &str) -> Vec<Value> {
        let image_parts: Vec<Value> = self.images.iter().map(inline_part).collect();
        if self.options.bypass && !image_parts.is_empty() {
            return vec![
                json!({ "role": "model", "parts": image_parts }),
                json!({ "role": "user", "parts": [{ "text": prompt }] }),
            ];
        }
        let mut parts = vec![json!({ "text": prompt })];
        parts.extend(image_parts);
        vec![json!({ "role": "user", "parts": parts })]
    }

    fn build_payload(&self, prompt: &str) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            Value::Array(self.build_contents(prompt)),
        );
        payload.insert(
            "generationConfig".to_string(),
            json!({
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": self.options.aspect_ratio },
            }),
        );
        Value::Object(payload)
    }
}

impl Generator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn attachments(&self) -> &[MediaAttachment] {
        &self.images
    }

    fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationError> {
        let response = self
            .api
            .generate_content(&self.model, &self.build_payload(prompt))?;
        let media = extract(&response)?.into_media(MediaKind::Png);
        Ok(GenerationResult::single(media.bytes, media.kind))
    }
}
