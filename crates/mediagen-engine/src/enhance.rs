use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediagen_contracts::media::MediaAttachment;
use mediagen_contracts::GenerationError;
use serde_json::{json, Value};

use crate::api::GenAiApi;
use crate::extract::response_text;

pub const DEFAULT_ENHANCER_MODEL: &str = "gemini-2.5-flash";

const ENHANCER_INSTRUCTION: &str = "You are an expert content generation prompt writer. \
Please take the following prompt and enhance it to be more descriptive and suitable for a \
text-to-content model. Make it vivid and detailed, but keep it concise. \
Only return the enhanced prompt, without any preamble or explanation.";

const RELAXED_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

/// Sent as the user turn when the prompt travels in the system instruction
/// and there is no media to carry.
const ROUTED_USER_TEXT: &str = "Enhance the prompt.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnhanceOptions {
    /// Put the prompt in the system instruction instead of the user turn.
    pub route_via_system: bool,
    pub include_media: bool,
}

/// Rewrites prompts through a side text-generation call.
#[derive(Clone)]
pub struct PromptEnhancer {
    api: Arc<dyn GenAiApi>,
    model: String,
    options: EnhanceOptions,
}

impl PromptEnhancer {
    pub fn new(api: Arc<dyn GenAiApi>, options: EnhanceOptions) -> Self {
        Self {
            api,
            model: DEFAULT_ENHANCER_MODEL.to_string(),
            options,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn enhance(
        &self,
        prompt: &str,
        media: &[MediaAttachment],
    ) -> Result<String, GenerationError> {
        let body = self.request_body(prompt, media);
        let response = self.api.generate_content(&self.model, &body)?;
        response_text(&response)
    }

    fn request_body(&self, prompt: &str, media: &[MediaAttachment]) -> Value {
        let media_parts: Vec<Value> = if self.options.include_media {
            media.iter().map(inline_part).collect()
        } else {
            Vec::new()
        };

        let (instruction, mut user_parts) = if self.options.route_via_system {
            (format!("{ENHANCER_INSTRUCTION}\n\nPrompt: {prompt}"), Vec::new())
        } else {
            (ENHANCER_INSTRUCTION.to_string(), vec![json!({ "text": prompt })])
        };
        user_parts.extend(media_parts);
        if user_parts.is_empty() {
            user_parts.push(json!({ "text": ROUTED_USER_TEXT }));
        }

        let safety: Vec<Value> = RELAXED_CATEGORIES
            .iter()
            .map(|category| json!({ "category": category, "threshold": "BLOCK_NONE" }))
            .collect();

        json!({
            "systemInstruction": { "parts": [{ "text": instruction }] },
            "contents": [{ "role": "user", "parts": user_parts }],
            "safetySettings": safety,
        })
    }
}

pub(crate) fn inline_part(media: &MediaAttachment) -> Value {
    json!({
        "inlineData": {
            "mimeType": media.mime_type,
            "data": BASE64.encode(&media.bytes),
        }
    })
}
