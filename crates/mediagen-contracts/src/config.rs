use indexmap::IndexMap;
use serde_json::Value;

use crate::error::GenerationError;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_WORKERS: usize = 5;

pub type HeaderSet = IndexMap<String, String>;

/// Raw configuration inputs as gathered by the caller (flags and environment).
/// Nothing in here touches the process environment itself.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub api_key_flag: Option<String>,
    pub api_key_env: Option<String>,
    pub api_base_env: Option<String>,
    pub headers_env: Option<String>,
    pub header_flags: Vec<String>,
    pub workers_env: Option<String>,
}

/// Immutable client settings threaded into every generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_base: String,
    pub headers: HeaderSet,
    pub workers: usize,
}

impl ClientConfig {
    pub fn resolve(sources: ConfigSources) -> Result<Self, GenerationError> {
        let api_key = non_empty(sources.api_key_flag)
            .or_else(|| non_empty(sources.api_key_env))
            .ok_or_else(|| {
                GenerationError::precondition(
                    "GEMINI_API_KEY environment variable not set and --api-key not provided",
                )
            })?;
        let api_base = non_empty(sources.api_base_env)
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let mut headers = match non_empty(sources.headers_env) {
            Some(raw) => parse_headers_json(&raw)?,
            None => HeaderSet::new(),
        };
        for flag in &sources.header_flags {
            let (key, value) = parse_header_flag(flag)?;
            insert_header(&mut headers, key, value);
        }

        let workers = match non_empty(sources.workers_env) {
            Some(raw) => raw.parse::<usize>().map_err(|_| {
                GenerationError::precondition(format!("THREAD_COUNT must be a number, got '{raw}'"))
            })?,
            None => DEFAULT_WORKERS,
        }
        .max(1);

        Ok(Self {
            api_key,
            api_base,
            headers,
            workers,
        })
    }
}

pub fn parse_header_flag(raw: &str) -> Result<(String, String), GenerationError> {
    let Some((key, value)) = raw.split_once(':') else {
        return Err(GenerationError::precondition(format!(
            "header '{raw}' must be in KEY:VALUE format"
        )));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(GenerationError::precondition(format!(
            "header '{raw}' has an empty name"
        )));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

pub fn parse_headers_json(raw: &str) -> Result<HeaderSet, GenerationError> {
    let parsed: Value = serde_json::from_str(raw).map_err(|err| {
        GenerationError::precondition(format!("GEMINI_HEADERS is not valid JSON: {err}"))
    })?;
    let Some(object) = parsed.as_object() else {
        return Err(GenerationError::precondition(
            "GEMINI_HEADERS must be a JSON object",
        ));
    };

    let mut headers = HeaderSet::new();
    for (key, value) in object {
        let text = match value {
            Value::String(text) => text.clone(),
            Value::Number(number) => number.to_string(),
            Value::Bool(flag) => flag.to_string(),
            _ => {
                return Err(GenerationError::precondition(format!(
                    "GEMINI_HEADERS value for '{key}' must be a string"
                )))
            }
        };
        if key.trim().is_empty() {
            return Err(GenerationError::precondition(
                "GEMINI_HEADERS contains an empty header name",
            ));
        }
        insert_header(&mut headers, key.trim().to_string(), text);
    }
    Ok(headers)
}

/// Header names compare case-insensitively; a later insert replaces an
/// earlier one.
fn insert_header(headers: &mut HeaderSet, key: String, value: String) {
    headers.retain(|existing, _| !existing.eq_ignore_ascii_case(&key));
    headers.insert(key, value);
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
}
