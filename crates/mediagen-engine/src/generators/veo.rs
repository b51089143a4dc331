use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use mediagen_contracts::media::{GenerationResult, MediaAttachment, MediaKind};
use mediagen_contracts::GenerationError;
use serde_json::{json, Map, Value};

use super::Generator;
use crate::api::GenAiApi;

pub const DEFAULT_VEO_MODEL: &str = "veo-3.1-generate-preview";
pub const VEO_ASPECT_RATIOS: &[&str] = &["16:9", "9:16"];
pub const VEO_RESOLUTIONS: &[&str] = &["720p", "1080p"];
pub const MAX_REFERENCE_ASSETS: usize = 3;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Media roles a video request can carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VeoMedia {
    pub source: Option<MediaAttachment>,
    pub last_frame: Option<MediaAttachment>,
    pub assets: Vec<MediaAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VeoOptions {
    pub aspect_ratio: String,
    pub resolution: Option<String>,
    pub poll_interval: Duration,
}

impl Default for VeoOptions {
    fn default() -> Self {
        Self {
            aspect_ratio: "16:9".to_string(),
            resolution: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug)]
pub enum VideoJobState {
    Building,
    Submitted { operation: Value },
    Polling { name: String, polls: u32 },
    Succeeded { video_uri: String },
    Filtered { reasons: Vec<String> },
    Failed(GenerationError),
}

impl VideoJobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded { .. } | Self::Filtered { .. } | Self::Failed(_)
        )
    }
}

/// Long-running video generation. Each `generate` call walks a fresh job
/// from `Building` to a terminal state, then downloads the video and
/// deletes the remote file.
pub struct VeoGenerator {
    api: Arc<dyn GenAiApi>,
    model: String,
    media: VeoMedia,
    attachments: Vec<MediaAttachment>,
    options: VeoOptions,
    clock: Arc<dyn Clock>,
    cancel: Arc<AtomicBool>,
}

impl VeoGenerator {
    pub fn new(
        api: Arc<dyn GenAiApi>,
        model: impl Into<String>,
        media: VeoMedia,
        options: VeoOptions,
    ) -> Result<Self, GenerationError> {
        if media.assets.len() > MAX_REFERENCE_ASSETS {
            return Err(GenerationError::precondition(format!(
                "at most {MAX_REFERENCE_ASSETS} reference assets are allowed, got {}",
                media.assets.len()
            )));
        }
        let attachments = media
            .source
            .iter()
            .chain(media.last_frame.iter())
            .chain(media.assets.iter())
            .cloned()
            .collect();
        Ok(Self {
            api,
            model: model.into(),
            media,
            attachments,
            options,
            clock: Arc::new(SystemClock),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn build_payload(&self, prompt: &str) -> Value {
        let mut instance = Map::new();
        instance.insert("prompt".to_string(), json!(prompt));
        if let Some(source) = &self.media.source {
            instance.insert("image".to_string(), image_object(source));
        }
        if let Some(last) = &self.media.last_frame {
            instance.insert("lastFrame".to_string(), image_object(last));
        }
        if !self.media.assets.is_empty() {
            let references: Vec<Value> = self
                .media
                .assets
                .iter()
                .map(|asset| json!({ "image": image_object(asset), "referenceType": "asset" }))
                .collect();
            instance.insert("referenceImages".to_string(), Value::Array(references));
        }

        let mut parameters = Map::new();
        parameters.insert("aspectRatio".to_string(), json!(self.options.aspect_ratio));
        if let Some(resolution) = &self.options.resolution {
            parameters.insert("resolution".to_string(), json!(resolution));
        }
        json!({
            "instances": [Value::Object(instance)],
            "parameters": Value::Object(parameters),
        })
    }

    /// Runs the job until it reaches a terminal state.
    pub fn drive(&self, prompt: &str) -> VideoJobState {
        let mut state = VideoJobState::Building;
        while !state.is_terminal() {
            state = self.step(prompt, state);
        }
        state
    }

    fn step(&self, prompt: &str, state: VideoJobState) -> VideoJobState {
        match state {
            VideoJobState::Building => {
                match self.api.submit_video(&self.model, &self.build_payload(prompt)) {
                    Ok(operation) => VideoJobState::Submitted { operation },
                    Err(err) => VideoJobState::Failed(err),
                }
            }
            VideoJobState::Submitted { operation } => {
                if is_done(&operation) {
                    return completion_state(&operation);
                }
                match operation.get("name").and_then(Value::as_str) {
                    Some(name) => {
                        tracing::info!(operation = name, "waiting for video generation");
                        VideoJobState::Polling {
                            name: name.to_string(),
                            polls: 0,
                        }
                    }
                    None => VideoJobState::Failed(GenerationError::remote(
                        "video submission returned no operation name",
                    )),
                }
            }
            VideoJobState::Polling { name, polls } => {
                if self.cancel.load(Ordering::SeqCst) {
                    return self.cancelled(&name);
                }
                self.clock.sleep(self.options.poll_interval);
                if self.cancel.load(Ordering::SeqCst) {
                    return self.cancelled(&name);
                }
                match self.api.get_operation(&name) {
                    Ok(operation) if is_done(&operation) => completion_state(&operation),
                    Ok(_) => {
                        tracing::debug!(operation = %name, polls = polls + 1, "video not ready");
                        VideoJobState::Polling {
                            name,
                            polls: polls + 1,
                        }
                    }
                    Err(err) => VideoJobState::Failed(err),
                }
            }
            terminal => terminal,
        }
    }

    fn cancelled(&self, name: &str) -> VideoJobState {
        tracing::warn!(operation = name, "video job cancelled while polling");
        VideoJobState::Failed(GenerationError::Cancelled(format!(
            "stopped polling {name}; the remote job may still finish"
        )))
    }

    /// Downloads the finished video, then deletes its remote file whether or
    /// not the download worked.
    fn collect(&self, video_uri: &str) -> Result<GenerationResult, GenerationError> {
        let downloaded = self.api.download(video_uri);

        let mut warnings = Vec::new();
        match remote_file_id(video_uri) {
            Some(file_id) => {
                if let Err(err) = self.api.delete_file(&file_id) {
                    warnings.push(format!("failed to delete remote file {file_id}: {err}"));
                }
            }
            None => {
                warnings.push(format!("could not find a remote file id in {video_uri}"));
            }
        }

        let mut result = GenerationResult::single(downloaded?, MediaKind::Mp4);
        for warning in warnings {
            result.push_warning(warning);
        }
        Ok(result)
    }
}

impl Generator for VeoGenerator {
    fn name(&self) -> &str {
        "veo"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn attachments(&self) -> &[MediaAttachment] {
        &self.attachments
    }

    fn generate(&self, prompt: &str) -> Result<GenerationResult, GenerationError> {
        match self.drive(prompt) {
            VideoJobState::Succeeded { video_uri } => self.collect(&video_uri),
            VideoJobState::Filtered { reasons } => {
                Err(GenerationError::ContentFiltered { reasons })
            }
            VideoJobState::Failed(err) => Err(err),
            state => Err(GenerationError::remote(format!(
                "video job stopped in non-terminal state {state:?}"
            ))),
        }
    }
}

fn image_object(media: &MediaAttachment) -> Value {
    json!({
        "bytesBase64Encoded": BASE64.encode(&media.bytes),
        "mimeType": media.mime_type,
    })
}

fn is_done(operation: &Value) -> bool {
    operation.get("done").and_then(Value::as_bool).unwrap_or(false)
}

fn completion_state(operation: &Value) -> VideoJobState {
    if let Some(error) = operation.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or_default();
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return VideoJobState::Failed(GenerationError::remote(format!(
            "video job failed ({code}): {message}"
        )));
    }

    let response = operation
        .get("response")
        .and_then(|response| response.get("generateVideoResponse"))
        .or_else(|| operation.get("response"));
    let Some(response) = response else {
        return VideoJobState::Failed(GenerationError::no_media(
            "video job finished without a response",
        ));
    };

    let first_uri = response
        .get("generatedSamples")
        .or_else(|| response.get("generatedVideos"))
        .and_then(Value::as_array)
        .and_then(|samples| {
            samples.iter().find_map(|sample| {
                sample
                    .get("video")
                    .and_then(|video| video.get("uri"))
                    .and_then(Value::as_str)
            })
        });
    if let Some(uri) = first_uri {
        return VideoJobState::Succeeded {
            video_uri: uri.to_string(),
        };
    }

    let reasons: Vec<String> = response
        .get("raiMediaFilteredReasons")
        .and_then(Value::as_array)
        .map(|reasons| {
            reasons
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if reasons.is_empty() {
        return VideoJobState::Failed(GenerationError::no_media(
            "video job finished with no videos and no filter reason",
        ));
    }
    VideoJobState::Filtered { reasons }
}

/// `.../files/abc123:download?alt=media` -> `files/abc123`.
fn remote_file_id(uri: &str) -> Option<String> {
    let start = uri.find("files/")?;
    let id: String = uri[start..]
        .chars()
        .take_while(|c| *c != ':' && *c != '?')
        .collect();
    if id.len() <= "files/".len() {
        return None;
    }
    Some(id)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::time::Duration;

    use mediagen_contracts::media::{MediaAttachment, MediaKind};
    use mediagen_contracts::GenerationError;
    use serde_json::{json, Value};

    use super::{remote_file_id, VeoGenerator, VeoMedia, VeoOptions, DEFAULT_VEO_MODEL};
    use crate::generators::Generator;
    use crate::testing::{Call, RecordingClock, StubApi};

    const VIDEO_URI: &str =
        "https://generativelanguage.googleapis.com/v1beta/files/abc123:download?alt=media";

    fn pending() -> Value {
        json!({ "name": "models/veo/operations/op-1", "done": false })
    }

    fn finished() -> Value {
        json!({
            "name": "models/veo/operations/op-1",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "generatedSamples": [{ "video": { "uri": VIDEO_URI } }]
                }
            }
        })
    }

    fn asset(name: &str) -> MediaAttachment {
        MediaAttachment::from_bytes(name, "image/png", b"IMG".to_vec())
    }

    fn generator(api: Arc<StubApi>, media: VeoMedia, clock: Arc<RecordingClock>) -> VeoGenerator {
        VeoGenerator::new(api, DEFAULT_VEO_MODEL, media, VeoOptions::default())
            .map(|generator| generator.with_clock(clock))
            .unwrap()
    }

    #[test]
    fn polls_until_done_then_downloads_and_deletes_once() -> anyhow::Result<()> {
        let api = StubApi::new();
        api.on_submit(Ok(pending()))
            .on_operation(Ok(pending()))
            .on_operation(Ok(pending()))
            .on_operation(Ok(finished()))
            .on_download(Ok(b"MP4DATA".to_vec()));
        let clock = RecordingClock::new();

        let result = generator(api.clone(), VeoMedia::default(), clock.clone()).generate("waves")?;

        assert_eq!(result.len(), 1);
        assert_eq!(result.outputs[0].bytes, b"MP4DATA".to_vec());
        assert_eq!(result.outputs[0].kind, MediaKind::Mp4);
        assert!(result.warnings.is_empty());

        assert_eq!(api.count(|call| matches!(call, Call::GetOperation(_))), 3);
        assert_eq!(api.count(|call| matches!(call, Call::Download(_))), 1);
        let deletes: Vec<Call> = api
            .calls()
            .into_iter()
            .filter(|call| matches!(call, Call::DeleteFile(_)))
            .collect();
        assert_eq!(deletes, vec![Call::DeleteFile("files/abc123".to_string())]);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3); 3]);
        Ok(())
    }

    #[test]
    fn filtered_completion_is_retryable_content_filter() {
        let api = StubApi::new();
        api.on_submit(Ok(json!({
            "name": "op-2",
            "done": true,
            "response": {
                "generateVideoResponse": {
                    "raiMediaFilteredCount": 1,
                    "raiMediaFilteredReasons": ["Audio contained unsafe content."]
                }
            }
        })));
        let err = generator(api.clone(), VeoMedia::default(), RecordingClock::new())
            .generate("storm")
            .err();
        match err {
            Some(GenerationError::ContentFiltered { reasons }) => {
                assert_eq!(reasons, vec!["Audio contained unsafe content.".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(api.count(|call| matches!(call, Call::Download(_))), 0);
    }

    #[test]
    fn cleanup_failure_is_a_warning_not_an_error() -> anyhow::Result<()> {
        let api = StubApi::new();
        api.on_submit(Ok(finished()))
            .on_download(Ok(b"MP4DATA".to_vec()))
            .on_delete(Err(GenerationError::remote("file delete request failed (403)")));

        let result =
            generator(api.clone(), VeoMedia::default(), RecordingClock::new()).generate("dunes")?;
        assert_eq!(result.outputs[0].bytes, b"MP4DATA".to_vec());
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("files/abc123"));
        Ok(())
    }

    #[test]
    fn delete_runs_even_when_download_fails() {
        let api = StubApi::new();
        api.on_submit(Ok(finished()))
            .on_download(Err(GenerationError::remote("download request failed (500)")));

        let err = generator(api.clone(), VeoMedia::default(), RecordingClock::new())
            .generate("dunes")
            .err();
        assert!(err.map(|err| err.is_retryable()).unwrap_or(false));
        assert_eq!(api.count(|call| matches!(call, Call::DeleteFile(_))), 1);
    }

    #[test]
    fn too_many_assets_fail_before_any_call() {
        let api = StubApi::new();
        let media = VeoMedia {
            assets: vec![asset("a"), asset("b"), asset("c"), asset("d")],
            ..VeoMedia::default()
        };
        let built = VeoGenerator::new(api.clone(), DEFAULT_VEO_MODEL, media, VeoOptions::default());
        assert!(built.err().map(|err| err.is_precondition()).unwrap_or(false));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn request_places_media_by_role() -> anyhow::Result<()> {
        let api = StubApi::new();
        api.on_submit(Ok(finished())).on_download(Ok(b"V".to_vec()));
        let media = VeoMedia {
            source: Some(asset("first.png")),
            last_frame: Some(asset("last.png")),
            assets: vec![asset("hat.png")],
        };
        let veo = VeoGenerator::new(
            api.clone(),
            DEFAULT_VEO_MODEL,
            media,
            VeoOptions {
                resolution: Some("1080p".to_string()),
                ..VeoOptions::default()
            },
        )?;
        assert_eq!(veo.attachments().len(), 3);
        veo.generate("a hat spinning")?;

        let calls = api.calls();
        let Call::SubmitVideo { body, .. } = &calls[0] else {
            panic!("expected a video submission");
        };
        let instance = &body["instances"][0];
        assert_eq!(instance["prompt"], json!("a hat spinning"));
        assert_eq!(instance["image"]["mimeType"], json!("image/png"));
        assert!(instance["lastFrame"]["bytesBase64Encoded"].is_string());
        assert_eq!(instance["referenceImages"][0]["referenceType"], json!("asset"));
        assert_eq!(body["parameters"]["aspectRatio"], json!("16:9"));
        assert_eq!(body["parameters"]["resolution"], json!("1080p"));
        Ok(())
    }

    #[test]
    fn cancellation_stops_polling() {
        let api = StubApi::new();
        api.on_submit(Ok(pending()))
            .on_operation(Ok(pending()))
            .on_operation(Ok(pending()));
        let cancel = Arc::new(AtomicBool::new(false));
        let clock = RecordingClock::cancelling_after(2, cancel.clone());

        let veo = VeoGenerator::new(
            api.clone(),
            DEFAULT_VEO_MODEL,
            VeoMedia::default(),
            VeoOptions::default(),
        )
        .map(|veo| veo.with_clock(clock).with_cancel(cancel));
        let err = veo.and_then(|veo| veo.generate("slow")).err();

        assert!(matches!(err, Some(GenerationError::Cancelled(_))));
        assert_eq!(api.count(|call| matches!(call, Call::GetOperation(_))), 1);
        assert_eq!(api.count(|call| matches!(call, Call::DeleteFile(_))), 0);
    }

    #[test]
    fn operation_error_is_remote_failure() {
        let api = StubApi::new();
        api.on_submit(Ok(json!({
            "name": "op-3",
            "done": true,
            "error": { "code": 13, "message": "internal" }
        })));
        let err = generator(api, VeoMedia::default(), RecordingClock::new())
            .generate("x")
            .err();
        assert!(matches!(
            err,
            Some(GenerationError::RemoteCall(message)) if message.contains("13")
        ));
    }

    #[test]
    fn file_id_stops_at_method_suffix() {
        assert_eq!(remote_file_id(VIDEO_URI).as_deref(), Some("files/abc123"));
        assert_eq!(
            remote_file_id("https://host/v1beta/files/xyz?alt=media").as_deref(),
            Some("files/xyz")
        );
        assert_eq!(remote_file_id("https://host/v1beta/videos/xyz"), None);
    }
}
