use std::str::FromStr;
use std::time::Duration;

use mediagen_contracts::config::ClientConfig;
use mediagen_contracts::GenerationError;
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const ERROR_BODY_MAX_CHARS: usize = 512;

/// The remote generative API as the core sees it. Every call blocks.
pub trait GenAiApi: Send + Sync {
    fn generate_content(&self, model: &str, body: &Value) -> Result<Value, GenerationError>;

    fn predict(&self, model: &str, body: &Value) -> Result<Value, GenerationError>;

    /// Starts a long-running video job and returns the operation object.
    fn submit_video(&self, model: &str, body: &Value) -> Result<Value, GenerationError>;

    fn get_operation(&self, name: &str) -> Result<Value, GenerationError>;

    fn download(&self, uri: &str) -> Result<Vec<u8>, GenerationError>;

    /// `name` is a resource id such as `files/abc123`.
    fn delete_file(&self, name: &str) -> Result<(), GenerationError>;
}

/// REST transport for the Gemini API family.
pub struct HttpGenAi {
    api_base: String,
    headers: HeaderMap,
    http: HttpClient,
}

impl HttpGenAi {
    pub fn new(config: &ClientConfig) -> Result<Self, GenerationError> {
        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_str(key).map_err(|err| {
                GenerationError::precondition(format!("invalid header name '{key}': {err}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|err| {
                GenerationError::precondition(format!("invalid value for header '{key}': {err}"))
            })?;
            headers.insert(name, value);
        }
        let mut key = HeaderValue::from_str(&config.api_key).map_err(|_| {
            GenerationError::precondition("API key contains characters not allowed in a header")
        })?;
        key.set_sensitive(true);
        headers.insert("x-goog-api-key", key);

        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| {
                GenerationError::remote(format!("failed to build HTTP client: {err}"))
            })?;

        Ok(Self {
            api_base: config.api_base.clone(),
            headers,
            http,
        })
    }

    fn model_endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}", self.api_base, name.trim().trim_start_matches('/'))
    }

    fn send(&self, label: &str, request: RequestBuilder) -> Result<HttpResponse, GenerationError> {
        let response = request
            .headers(self.headers.clone())
            .send()
            .map_err(|err| GenerationError::remote(format!("{label} request failed: {err}")))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(GenerationError::remote(format!(
            "{label} request failed ({}): {}",
            status.as_u16(),
            truncate_text(&body, ERROR_BODY_MAX_CHARS)
        )))
    }

    fn send_json(&self, label: &str, request: RequestBuilder) -> Result<Value, GenerationError> {
        let body = self
            .send(label, request)?
            .text()
            .map_err(|err| {
                GenerationError::remote(format!("{label} response body read failed: {err}"))
            })?;
        serde_json::from_str(&body).map_err(|err| {
            GenerationError::remote(format!("{label} returned invalid JSON: {err}"))
        })
    }
}

impl GenAiApi for HttpGenAi {
    fn generate_content(&self, model: &str, body: &Value) -> Result<Value, GenerationError> {
        let endpoint = self.model_endpoint(model, "generateContent");
        self.send_json("generateContent", self.http.post(endpoint).json(body))
    }

    fn predict(&self, model: &str, body: &Value) -> Result<Value, GenerationError> {
        let endpoint = self.model_endpoint(model, "predict");
        self.send_json("predict", self.http.post(endpoint).json(body))
    }

    fn submit_video(&self, model: &str, body: &Value) -> Result<Value, GenerationError> {
        let endpoint = self.model_endpoint(model, "predictLongRunning");
        self.send_json("predictLongRunning", self.http.post(endpoint).json(body))
    }

    fn get_operation(&self, name: &str) -> Result<Value, GenerationError> {
        self.send_json("operation status", self.http.get(self.resource_url(name)))
    }

    fn download(&self, uri: &str) -> Result<Vec<u8>, GenerationError> {
        let bytes = self
            .send("download", self.http.get(uri))?
            .bytes()
            .map_err(|err| {
                GenerationError::remote(format!("download body read failed: {err}"))
            })?;
        Ok(bytes.to_vec())
    }

    fn delete_file(&self, name: &str) -> Result<(), GenerationError> {
        self.send("file delete", self.http.delete(self.resource_url(name)))?;
        Ok(())
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
