//! Locating media bytes inside the different response shapes the API returns.
//!
//! Two families are handled: flat lists of generated media (`predictions`,
//! `generatedImages`) and the `candidates[].content.parts[]` tree, where a
//! part may be text, inline data, or either of those flagged as a thought.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediagen_contracts::media::{GeneratedMedia, MediaKind};
use mediagen_contracts::GenerationError;
use serde_json::{Map, Value};

const SAFETY_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "IMAGE_SAFETY",
    "IMAGE_PROHIBITED_CONTENT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl Payload {
    pub fn into_media(self, default: MediaKind) -> GeneratedMedia {
        let kind = MediaKind::from_mime_or(self.mime_type.as_deref(), default);
        GeneratedMedia::new(self.bytes, kind)
    }
}

/// One entry of a flat batch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItem {
    Media(Payload),
    Filtered(String),
}

/// The parts tree split by role, each list in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartsExtraction {
    pub media: Vec<Payload>,
    pub thought_media: Vec<Payload>,
    pub text: Vec<String>,
    pub thought_text: Vec<String>,
    /// Decode errors of inline parts that were skipped.
    pub undecodable: Vec<String>,
}

impl PartsExtraction {
    /// Final-answer media wins over thought media regardless of position.
    pub fn first_payload(self) -> Option<Payload> {
        self.media
            .into_iter()
            .next()
            .or_else(|| self.thought_media.into_iter().next())
    }
}

/// Returns the first binary payload in the response.
pub fn extract(response: &Value) -> Result<Payload, GenerationError> {
    if let Some(rows) = batch_rows(response) {
        for row in rows {
            if let Some(BatchItem::Media(payload)) = batch_item(row) {
                return Ok(payload);
            }
        }
        return Err(GenerationError::no_media("response listed no generated media"));
    }

    let mut parts = split_parts(response);
    let undecodable = std::mem::take(&mut parts.undecodable);
    match parts.first_payload() {
        Some(payload) => Ok(payload),
        None => match undecodable.into_iter().next() {
            Some(reason) => Err(GenerationError::no_media(reason)),
            None => Err(missing_media(response)),
        },
    }
}

/// Walks candidates then parts in order. Inline parts that fail to decode
/// are skipped and their errors kept in `undecodable`.
pub fn split_parts(response: &Value) -> PartsExtraction {
    let mut out = PartsExtraction::default();
    for candidate in candidates(response) {
        for part in candidate_parts(candidate) {
            let thought = part.get("thought").and_then(Value::as_bool).unwrap_or(false);
            match inline_payload(part) {
                Ok(Some(payload)) if thought => {
                    out.thought_media.push(payload);
                    continue;
                }
                Ok(Some(payload)) => {
                    out.media.push(payload);
                    continue;
                }
                Ok(None) => {}
                Err(reason) => {
                    out.undecodable.push(reason);
                    continue;
                }
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if thought {
                    out.thought_text.push(text.to_string());
                } else {
                    out.text.push(text.to_string());
                }
            }
        }
    }
    out
}

/// Non-thought text of the response, joined and trimmed.
pub fn response_text(response: &Value) -> Result<String, GenerationError> {
    let text = split_parts(response).text.join("").trim().to_string();
    if !text.is_empty() {
        return Ok(text);
    }
    let reasons = blocked_reasons(response);
    if reasons.is_empty() {
        return Err(GenerationError::no_media("response contained no text"));
    }
    Err(GenerationError::ContentFiltered { reasons })
}

/// Items of a `predictions` / `generatedImages` response, filtered entries
/// included with their reason. An entry whose bytes do not decode is
/// reported as filtered so the rest of the batch survives.
pub fn batch_items(response: &Value) -> Vec<BatchItem> {
    batch_rows(response)
        .into_iter()
        .flatten()
        .filter_map(batch_item)
        .collect()
}

/// The first candidate's content, tagged as a model turn, for replaying as
/// conversation history.
pub fn model_turn(response: &Value) -> Option<Value> {
    let content = candidates(response)
        .next()?
        .get("content")
        .and_then(Value::as_object)?;
    let mut turn = content.clone();
    turn.insert("role".to_string(), Value::String("model".to_string()));
    Some(Value::Object(turn))
}

/// Policy reasons the server gave for returning nothing.
pub fn blocked_reasons(response: &Value) -> Vec<String> {
    let mut reasons = Vec::new();
    if let Some(feedback) = response
        .get("promptFeedback")
        .and_then(Value::as_object)
    {
        if let Some(reason) = feedback.get("blockReason").and_then(Value::as_str) {
            let detail = feedback
                .get("blockReasonMessage")
                .and_then(Value::as_str)
                .map(|message| format!("{reason}: {message}"))
                .unwrap_or_else(|| reason.to_string());
            reasons.push(detail);
        }
    }
    for candidate in candidates(response) {
        let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) else {
            continue;
        };
        if !SAFETY_FINISH_REASONS.contains(&reason) {
            continue;
        }
        let detail = candidate
            .get("finishMessage")
            .and_then(Value::as_str)
            .map(|message| format!("{reason}: {message}"))
            .unwrap_or_else(|| reason.to_string());
        if !reasons.contains(&detail) {
            reasons.push(detail);
        }
    }
    reasons
}

pub(crate) fn missing_media(response: &Value) -> GenerationError {
    let reasons = blocked_reasons(response);
    if reasons.is_empty() {
        return GenerationError::no_media("no inline data in any candidate part");
    }
    GenerationError::ContentFiltered { reasons }
}

fn candidates(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn candidate_parts(candidate: &Value) -> impl Iterator<Item = &Value> {
    candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn inline_payload(part: &Value) -> Result<Option<Payload>, String> {
    let Some(inline) = part
        .get("inlineData")
        .or_else(|| part.get("inline_data"))
        .and_then(Value::as_object)
    else {
        return Ok(None);
    };
    let data = inline.get("data").and_then(Value::as_str).unwrap_or_default();
    if data.is_empty() {
        return Ok(None);
    }
    Ok(Some(Payload {
        bytes: decode(data, "inline data")?,
        mime_type: mime_of(inline),
    }))
}

fn batch_rows(response: &Value) -> Option<&Vec<Value>> {
    response
        .get("predictions")
        .or_else(|| response.get("generatedImages"))
        .or_else(|| response.get("generated_images"))
        .and_then(Value::as_array)
}

fn batch_item(row: &Value) -> Option<BatchItem> {
    let obj = row.as_object()?;
    if let Some(encoded) = obj
        .get("bytesBase64Encoded")
        .or_else(|| obj.get("bytes_base64_encoded"))
        .and_then(Value::as_str)
        .filter(|encoded| !encoded.is_empty())
    {
        return Some(media_item(encoded, "prediction", obj));
    }

    if let Some(image) = obj.get("image").and_then(Value::as_object) {
        if let Some(encoded) = image
            .get("imageBytes")
            .or_else(|| image.get("bytesBase64Encoded"))
            .and_then(Value::as_str)
            .filter(|encoded| !encoded.is_empty())
        {
            return Some(media_item(encoded, "generated image", image));
        }
    }

    let reason = obj
        .get("raiFilteredReason")
        .or_else(|| obj.get("rai_filtered_reason"))
        .and_then(Value::as_str)
        .unwrap_or("no image data and no filter reason given");
    Some(BatchItem::Filtered(reason.to_string()))
}

fn media_item(encoded: &str, what: &str, obj: &Map<String, Value>) -> BatchItem {
    match decode(encoded, what) {
        Ok(bytes) => BatchItem::Media(Payload {
            bytes,
            mime_type: mime_of(obj),
        }),
        Err(reason) => BatchItem::Filtered(format!("undecodable image data: {reason}")),
    }
}

fn mime_of(obj: &Map<String, Value>) -> Option<String> {
    obj.get("mimeType")
        .or_else(|| obj.get("mime_type"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn decode(data: &str, what: &str) -> Result<Vec<u8>, String> {
    BASE64
        .decode(data.as_bytes())
        .map_err(|err| format!("{what} is not valid base64: {err}"))
}
