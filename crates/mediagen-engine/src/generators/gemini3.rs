use std::sync::Arc;

use mediagen_contracts::media::{GeneratedMedia, GenerationResult, MediaAttachment, MediaKind};
use mediagen_contracts::GenerationError;
use serde_json::{json, Map, Value};

use super::Generator;
use crate::api::GenAiApi;
use crate::enhance::inline_part;
use crate::extract::{extract, missing_media, model_turn, split_parts, Payload};

pub const DEFAULT_GEMINI3_MODEL: &str = "gemini-3-pro-image-preview";
pub const GEMINI3_ASPECT_RATIOS: &[&str] = &[
    "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "9:16", "16:9", "21:9",
];
pub const GEMINI3_RESOLUTIONS: &[&str] = &["1K", "2K", "4K"];

const PRIMING_INSTRUCTION: &str = "Return this exact image without any changes.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gemini3Options {
    pub aspect_ratio: String,
    pub resolution: String,
    pub search: bool,
    /// Log thought text and keep thought images after the final ones.
    pub thoughts: bool,
    pub bypass: bool,
}

impl Default for Gemini3Options {
    fn default() -> Self {
        Self {
            aspect_ratio: "3:4".to_string(),
            resolution: "1K".to_string(),
            search: false,
            thoughts: false,
            bypass: false,
        }
    }
}

/// Image generation on the experimental model, with grounding and
/// thought output.
///
/// In bypass mode construction talks to the API: every attachment is sent
/// once with a neutral instruction and the model's reply is kept as a
/// conversation turn. The real request then replays those turns instead of
/// the raw images. A failure there aborts construction.
pub struct Gemini3Generator {
    api: Arc<dyn GenAiApi>,
    model: String,
    images: Vec<MediaAttachment>,
    primed_turns: Vec<Value>,
    options: Gemini3Options,
}

impl Gemini3Generator {
    pub fn new(
        api: Arc<dyn GenAiApi>,
        model: impl Into<String>,
        images: Vec<MediaAttachment>,
        options: Gemini3Options,
    ) -> Result<Self, GenerationError> {
        let mut generator = Self {
            api,
            model: model.into(),
            images,
            primed_turns: Vec::new(),
            options,
        };
        if generator.options.bypass {
            generator.primed_turns = generator.prime()?;
        }
        Ok(generator)
    }

    fn prime(&self) -> Result<Vec<Value>, GenerationError> {
        let mut turns = Vec::with_capacity(self.images.len());
        for (idx, image) in self.images.iter().enumerate() {
            let payload = json!({
                "contents": [{
                    "role": "user",
                    "parts": [{ "text": PRIMING_INSTRUCTION }, inline_part(image)],
                }],
                "generationConfig": { "responseModalities": ["IMAGE"] },
            });
            let fatal = |err: GenerationError| {
                GenerationError::precondition(format!(
                    "bypass priming failed for {}: {err}",
                    image.path.display()
                ))
            };
            let response = self
                .api
                .generate_content(&self.model, &payload)
                .map_err(fatal)?;
            extract(&response).map_err(fatal)?;
            let turn = model_turn(&response).ok_or_else(|| {
                fatal(GenerationError::no_media("priming reply had no content"))
            })?;
            tracing::debug!(image = idx + 1, "primed bypass turn");
            turns.push(turn);
        }
        Ok(turns)
    }

    fn build_contents(&self, prompt: &str) -> Vec<Value> {
        if self.options.bypass && !self.primed_turns.is_empty() {
            let mut contents = self.primed_turns.clone();
            contents.push(json!({ "role": "user", "parts": [{ "text": prompt }] }));
            return contents;
        }
        let mut parts = vec![json!({ "text": prompt })];
        parts.extend(self.images.iter().map(inline_part));
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
                "imageConfig": {
                    "aspectRatio": self.options.aspect_ratio,
                    "imageSize": self.options.resolution,
                },
                "thinkingConfig": { "includeThoughts": true },
            }),
        );
        if self.options.search {
            payload.insert("tools".to_string(), json!([{ "google_search": {} }]));
        }
        Value::Object(payload)
    }
}

impl Generator for Gemini3Generator {
    fn name(&self) -> &str {
        "gemini3"
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
        let parts = split_parts(&response);

        if self.options.thoughts {
            for thought in &parts.thought_text {
                tracing::info!(model = %self.model, "thought: {}", thought.trim());
            }
        }

        let to_media = |payload: Payload| payload.into_media(MediaKind::Png);
        let mut outputs: Vec<GeneratedMedia> = parts.media.into_iter().map(to_media).collect();
        if outputs.is_empty() || self.options.thoughts {
            outputs.extend(parts.thought_media.into_iter().map(to_media));
        }
        if outputs.is_empty() {
            return Err(match parts.undecodable.into_iter().next() {
                Some(reason) => GenerationError::no_media(reason),
                None => missing_media(&response),
            });
        }
        let warnings = parts
            .undecodable
            .into_iter()
            .map(|reason| format!("skipped part: {reason}"))
            .collect();
        Ok(GenerationResult { outputs, warnings })
    }
}

#[cfg(test)]
mod tests {
    use mediagen_contracts::media::MediaAttachment;
    use mediagen_contracts::GenerationError;
    use serde_json::json;

    use super::{Gemini3Generator, Gemini3Options, DEFAULT_GEMINI3_MODEL};
    use crate::generators::Generator;
    use crate::testing::{b64, inline_image_response, text_response, Call, StubApi};

    fn image(name: &str) -> MediaAttachment {
        MediaAttachment::from_bytes(name, "image/png", name.as_bytes().to_vec())
    }

    fn thoughtful_response() -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "sketching layout", "thought": true},
                    {"inlineData": {"data": b64(b"DRAFT")}, "thought": true},
                    {"inlineData": {"mimeType": "image/png", "data": b64(b"FINAL")}}
                ]}
            }]
        })
    }

    #[test]
    fn request_carries_size_search_and_thinking() -> anyhow::Result<()> {
        let api = StubApi::new();
        api.on_generate(Ok(inline_image_response(b"PNGDATA")));
        let generator = Gemini3Generator::new(
            api.clone(),
            DEFAULT_GEMINI3_MODEL,
            vec![image("a.png")],
            Gemini3Options {
                resolution: "2K".to_string(),
                search: true,
                ..Gemini3Options::default()
            },
        )?;

        generator.generate("a red fox")?;

        let body = &api.generate_bodies()[0];
        assert_eq!(body["generationConfig"]["imageConfig"]["imageSize"], json!("2K"));
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["includeThoughts"],
            json!(true)
        );
        assert_eq!(body["tools"], json!([{ "google_search": {} }]));
        assert_eq!(body["contents"][0]["parts"].as_array().map(Vec::len), Some(2));
        Ok(())
    }

    #[test]
    fn thought_images_are_kept_only_when_asked() -> anyhow::Result<()> {
        let api = StubApi::new();
        api.on_generate(Ok(thoughtful_response()));
        api.on_generate(Ok(thoughtful_response()));

        let quiet = Gemini3Generator::new(
            api.clone(),
            DEFAULT_GEMINI3_MODEL,
            Vec::new(),
            Gemini3Options::default(),
        )?;
        let result = quiet.generate("a red fox")?;
        assert_eq!(result.len(), 1);
        assert_eq!(result.outputs[0].bytes, b"FINAL".to_vec());

        let verbose = Gemini3Generator::new(
            api.clone(),
            DEFAULT_GEMINI3_MODEL,
            Vec::new(),
            Gemini3Options {
                thoughts: true,
                ..Gemini3Options::default()
            },
        )?;
        let result = verbose.generate("a red fox")?;
        assert_eq!(result.len(), 2);
        assert_eq!(result.outputs[0].bytes, b"FINAL".to_vec());
        assert_eq!(result.outputs[1].bytes, b"DRAFT".to_vec());
        Ok(())
    }

    #[test]
    fn corrupt_thought_image_is_skipped_with_a_warning() -> anyhow::Result<()> {
        let api = StubApi::new();
        api.on_generate(Ok(json!({
            "candidates": [{
                "content": {"parts": [
                    {"inlineData": {"data": b64(b"FINAL")}},
                    {"inlineData": {"data": "***"}, "thought": true}
                ]}
            }]
        })));
        let generator = Gemini3Generator::new(
            api,
            DEFAULT_GEMINI3_MODEL,
            Vec::new(),
            Gemini3Options {
                thoughts: true,
                ..Gemini3Options::default()
            },
        )?;

        let result = generator.generate("a red fox")?;
        assert_eq!(result.len(), 1);
        assert_eq!(result.outputs[0].bytes, b"FINAL".to_vec());
        assert_eq!(result.warnings.len(), 1);
        Ok(())
    }

    #[test]
    fn no_images_is_retryable() {
        let api = StubApi::new();
        api.on_generate(Ok(text_response("thinking only")));
        let generator = Gemini3Generator::new(
            api,
            DEFAULT_GEMINI3_MODEL,
            Vec::new(),
            Gemini3Options::default(),
        );
        let err = generator.and_then(|g| g.generate("a red fox")).err();
        assert!(matches!(err, Some(GenerationError::NoMediaFound(_))));
    }

    #[test]
    fn bypass_primes_one_turn_per_image_and_replays_them() -> anyhow::Result<()> {
        let api = StubApi::new();
        api.on_generate(Ok(inline_image_response(b"ECHO-A")));
        api.on_generate(Ok(inline_image_response(b"ECHO-B")));
        api.on_generate(Ok(inline_image_response(b"FINAL")));

        let generator = Gemini3Generator::new(
            api.clone(),
            DEFAULT_GEMINI3_MODEL,
            vec![image("a.png"), image("b.png")],
            Gemini3Options {
                bypass: true,
                ..Gemini3Options::default()
            },
        )?;
        assert_eq!(api.count(|call| matches!(call, Call::GenerateContent { .. })), 2);

        let result = generator.generate("add a hat")?;
        assert_eq!(result.outputs[0].bytes, b"FINAL".to_vec());

        let bodies = api.generate_bodies();
        let contents = bodies[2]["contents"].as_array().cloned().unwrap_or_default();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], json!("model"));
        assert_eq!(contents[1]["role"], json!("model"));
        assert_eq!(contents[2], json!({ "role": "user", "parts": [{ "text": "add a hat" }] }));
        Ok(())
    }

    #[test]
    fn priming_failure_aborts_construction() {
        let api = StubApi::new();
        api.on_generate(Err(GenerationError::remote("500")));
        let built = Gemini3Generator::new(
            api.clone(),
            DEFAULT_GEMINI3_MODEL,
            vec![image("a.png"), image("b.png")],
            Gemini3Options {
                bypass: true,
                ..Gemini3Options::default()
            },
        );
        assert!(built.err().map(|err| err.is_precondition()).unwrap_or(false));
        assert_eq!(api.calls().len(), 1);
    }
}
