use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediagen_contracts::GenerationError;
use serde_json::{json, Value};

use crate::api::GenAiApi;
use crate::generators::veo::Clock;

pub(crate) fn b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// A `generateContent` response holding one inline PNG part.
pub(crate) fn inline_image_response(bytes: &[u8]) -> Value {
    json!({
        "candidates": [{
            "content": {
                "role": "model",
                "parts": [{"inlineData": {"mimeType": "image/png", "data": b64(bytes)}}]
            }
        }]
    })
}

pub(crate) fn text_response(text: &str) -> Value {
    json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]
    })
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    GenerateContent { model: String, body: Value },
    Predict { model: String, body: Value },
    SubmitVideo { model: String, body: Value },
    GetOperation(String),
    Download(String),
    DeleteFile(String),
}

/// Scripted stand-in for the remote API. Each endpoint pops its own queue;
/// an empty queue is a remote failure, except for deletes which succeed.
#[derive(Default)]
pub(crate) struct StubApi {
    state: Mutex<StubState>,
}

#[derive(Default)]
struct StubState {
    generate: VecDeque<Result<Value, GenerationError>>,
    predict: VecDeque<Result<Value, GenerationError>>,
    submit: VecDeque<Result<Value, GenerationError>>,
    operations: VecDeque<Result<Value, GenerationError>>,
    downloads: VecDeque<Result<Vec<u8>, GenerationError>>,
    deletes: VecDeque<Result<(), GenerationError>>,
    calls: Vec<Call>,
}

impl StubApi {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut StubState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub(crate) fn on_generate(&self, response: Result<Value, GenerationError>) -> &Self {
        self.with_state(|state| state.generate.push_back(response));
        self
    }

    pub(crate) fn on_predict(&self, response: Result<Value, GenerationError>) -> &Self {
        self.with_state(|state| state.predict.push_back(response));
        self
    }

    pub(crate) fn on_submit(&self, response: Result<Value, GenerationError>) -> &Self {
        self.with_state(|state| state.submit.push_back(response));
        self
    }

    pub(crate) fn on_operation(&self, response: Result<Value, GenerationError>) -> &Self {
        self.with_state(|state| state.operations.push_back(response));
        self
    }

    pub(crate) fn on_download(&self, response: Result<Vec<u8>, GenerationError>) -> &Self {
        self.with_state(|state| state.downloads.push_back(response));
        self
    }

    pub(crate) fn on_delete(&self, response: Result<(), GenerationError>) -> &Self {
        self.with_state(|state| state.deletes.push_back(response));
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.with_state(|state| state.calls.clone())
    }

    pub(crate) fn generate_bodies(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::GenerateContent { body, .. } => Some(body),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }
}

fn unscripted<T>(endpoint: &str) -> Result<T, GenerationError> {
    Err(GenerationError::remote(format!("no scripted {endpoint} response")))
}

impl GenAiApi for StubApi {
    fn generate_content(&self, model: &str, body: &Value) -> Result<Value, GenerationError> {
        self.with_state(|state| {
            state.calls.push(Call::GenerateContent {
                model: model.to_string(),
                body: body.clone(),
            });
            state
                .generate
                .pop_front()
                .unwrap_or_else(|| unscripted("generateContent"))
        })
    }

    fn predict(&self, model: &str, body: &Value) -> Result<Value, GenerationError> {
        self.with_state(|state| {
            state.calls.push(Call::Predict {
                model: model.to_string(),
                body: body.clone(),
            });
            state
                .predict
                .pop_front()
                .unwrap_or_else(|| unscripted("predict"))
        })
    }

    fn submit_video(&self, model: &str, body: &Value) -> Result<Value, GenerationError> {
        self.with_state(|state| {
            state.calls.push(Call::SubmitVideo {
                model: model.to_string(),
                body: body.clone(),
            });
            state
                .submit
                .pop_front()
                .unwrap_or_else(|| unscripted("predictLongRunning"))
        })
    }

    fn get_operation(&self, name: &str) -> Result<Value, GenerationError> {
        self.with_state(|state| {
            state.calls.push(Call::GetOperation(name.to_string()));
            state
                .operations
                .pop_front()
                .unwrap_or_else(|| unscripted("operation"))
        })
    }

    fn download(&self, uri: &str) -> Result<Vec<u8>, GenerationError> {
        self.with_state(|state| {
            state.calls.push(Call::Download(uri.to_string()));
            state
                .downloads
                .pop_front()
                .unwrap_or_else(|| unscripted("download"))
        })
    }

    fn delete_file(&self, name: &str) -> Result<(), GenerationError> {
        self.with_state(|state| {
            state.calls.push(Call::DeleteFile(name.to_string()));
            state.deletes.pop_front().unwrap_or(Ok(()))
        })
    }
}

/// Clock that records requested sleeps instead of sleeping. It can raise a
/// cancel flag once a given number of sleeps has happened.
#[derive(Default)]
pub(crate) struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
}

impl RecordingClock {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn cancelling_after(sleeps: usize, flag: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            sleeps: Mutex::new(Vec::new()),
            cancel_after: Some((sleeps, flag)),
        })
    }

    pub(crate) fn sleeps(&self) -> Vec<Duration> {
        match self.sleeps.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Clock for RecordingClock {
    fn sleep(&self, duration: Duration) {
        let count = {
            let mut guard = match self.sleeps.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.push(duration);
            guard.len()
        };
        if let Some((after, flag)) = &self.cancel_after {
            if count >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }
}
