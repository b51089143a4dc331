use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use mediagen_contracts::history::{HistoryRecord, HistoryRecorder};
use mediagen_contracts::media::{GenerationResult, MediaKind};
use mediagen_contracts::naming::{output_name, output_names, NamedOutput, OutputNames};
use mediagen_contracts::GenerationError;

use crate::enhance::PromptEnhancer;
use crate::generators::Generator;

pub const DEFAULT_RETRIES: u32 = 3;

/// A job stopped by a fatal error, with the outputs it had already saved.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct JobFailure {
    pub error: GenerationError,
    pub saved: Vec<NamedOutput>,
}

impl From<GenerationError> for JobFailure {
    fn from(error: GenerationError) -> Self {
        Self {
            error,
            saved: Vec::new(),
        }
    }
}

/// Drives one prompt through enhance, generate (with retries), name, write
/// and record.
///
/// The runner is shared by every worker; it holds no per-job state.
#[derive(Clone)]
pub struct JobRunner {
    output_prefix: PathBuf,
    max_retries: u32,
    enhancer: Option<PromptEnhancer>,
    history: Option<HistoryRecorder>,
    invocation_args: Vec<String>,
}

impl JobRunner {
    pub fn new(output_prefix: impl Into<PathBuf>, max_retries: u32) -> Self {
        Self {
            output_prefix: output_prefix.into(),
            max_retries,
            enhancer: None,
            history: None,
            invocation_args: Vec::new(),
        }
    }

    pub fn with_enhancer(mut self, enhancer: PromptEnhancer) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn with_history(mut self, history: HistoryRecorder, invocation_args: Vec<String>) -> Self {
        self.history = Some(history);
        self.invocation_args = invocation_args;
        self
    }

    /// Returns the saved outputs, or an empty list when every attempt failed
    /// in a retryable way. Fatal errors escape immediately; a write failure
    /// partway through a batch still reports the files written before it.
    pub fn run(
        &self,
        generator: &dyn Generator,
        prompt: &str,
    ) -> Result<Vec<NamedOutput>, JobFailure> {
        for attempt in 1..=self.max_retries {
            match self.attempt(generator, prompt) {
                Ok((used_prompt, result)) => {
                    return self.persist(generator, &used_prompt, result);
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(
                        generator = generator.name(),
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "generation attempt failed"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::warn!(
            generator = generator.name(),
            attempts = self.max_retries,
            "all attempts failed; nothing produced"
        );
        Ok(Vec::new())
    }

    /// Enhancement always starts from the caller's prompt.
    fn attempt(
        &self,
        generator: &dyn Generator,
        prompt: &str,
    ) -> Result<(String, GenerationResult), GenerationError> {
        let used_prompt = match &self.enhancer {
            Some(enhancer) => {
                let enhanced = enhancer.enhance(prompt, generator.attachments())?;
                tracing::debug!(prompt = %enhanced, "enhanced prompt");
                enhanced
            }
            None => prompt.to_string(),
        };
        let result = generator.generate(&used_prompt)?;
        Ok((used_prompt, result))
    }

    fn persist(
        &self,
        generator: &dyn Generator,
        prompt: &str,
        result: GenerationResult,
    ) -> Result<Vec<NamedOutput>, JobFailure> {
        self.persist_with(generator, prompt, result, |path, bytes| fs::write(path, bytes))
    }

    fn persist_with<W>(
        &self,
        generator: &dyn Generator,
        prompt: &str,
        result: GenerationResult,
        write: W,
    ) -> Result<Vec<NamedOutput>, JobFailure>
    where
        W: Fn(&Path, &[u8]) -> io::Result<()>,
    {
        for warning in &result.warnings {
            tracing::warn!(generator = generator.name(), "{warning}");
        }

        let batched = result.len() > 1;
        let mut sequences: BTreeMap<MediaKind, OutputNames> = BTreeMap::new();
        let mut saved = Vec::with_capacity(result.len());
        for media in result.outputs {
            let named = if batched {
                self.next_batch_name(&mut sequences, media.kind)
            } else {
                output_name(&self.output_prefix, media.kind)
            };
            let written = named.and_then(|path| match write(&path, &media.bytes) {
                Ok(()) => Ok(path),
                Err(source) => Err(GenerationError::OutputWrite {
                    path: path.display().to_string(),
                    source,
                }),
            });
            let path = match written {
                Ok(path) => path,
                Err(error) => return Err(JobFailure { error, saved }),
            };

            let absolute = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
            println!("Prompt for {}: {prompt}", path.display());
            println!("Saved {} to {}", media.kind.label(), absolute.display());
            tracing::info!(path = %absolute.display(), bytes = media.bytes.len(), "saved output");

            self.record(&path, prompt);
            saved.push(NamedOutput {
                path,
                prompt: prompt.to_string(),
            });
        }
        Ok(saved)
    }

    fn next_batch_name(
        &self,
        sequences: &mut BTreeMap<MediaKind, OutputNames>,
        kind: MediaKind,
    ) -> Result<PathBuf, GenerationError> {
        if !sequences.contains_key(&kind) {
            sequences.insert(kind, output_names(&self.output_prefix, kind)?);
        }
        sequences
            .get_mut(&kind)
            .and_then(Iterator::next)
            .ok_or_else(|| GenerationError::precondition("output name sequence ended"))
    }

    fn record(&self, path: &Path, prompt: &str) {
        let Some(history) = &self.history else {
            return;
        };
        let record = HistoryRecord::new(path, prompt, &self.invocation_args);
        if let Err(err) = history.record(&record) {
            tracing::warn!(
                history = %history.path().display(),
                error = %err,
                "failed to append prompt history"
            );
        }
    }
}
