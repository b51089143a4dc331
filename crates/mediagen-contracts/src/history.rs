use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

pub const HISTORY_FILE_NAME: &str = ".prompt_history";

/// One line of the prompt history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub filename: String,
    pub prompt: String,
    pub args: Vec<String>,
}

impl HistoryRecord {
    pub fn new(path: &Path, prompt: impl Into<String>, args: &[String]) -> Self {
        Self {
            filename: path.to_string_lossy().to_string(),
            prompt: prompt.into(),
            args: args.to_vec(),
        }
    }
}

/// Append-only writer for the prompt history log.
///
/// Clones share one lock, so worker threads can record concurrently; each
/// record is a single compact JSON line written in append mode. The file is
/// never read back or rewritten.
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    inner: Arc<HistoryRecorderInner>,
}

#[derive(Debug)]
struct HistoryRecorderInner {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(HistoryRecorderInner {
                path: path.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    /// History lives beside the outputs: in the directory that the absolute
    /// output prefix points into.
    pub fn for_output_prefix(prefix: &Path) -> anyhow::Result<Self> {
        let absolute = if prefix.is_absolute() {
            prefix.to_path_buf()
        } else {
            std::env::current_dir()?.join(prefix)
        };
        let dir = absolute
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(absolute);
        Ok(Self::new(dir.join(HISTORY_FILE_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn record(&self, record: &HistoryRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("history writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::thread;

    use serde_json::Value;

    use super::*;

    #[test]
    fn record_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = HistoryRecorder::new(temp.path().join(HISTORY_FILE_NAME));
        let args = vec!["mediagen".to_string(), "gemini".to_string()];

        recorder.record(&HistoryRecord::new(
            Path::new("/tmp/fox-1.png"),
            "a red fox",
            &args,
        ))?;

        let content = fs::read_to_string(recorder.path())?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;
        assert_eq!(parsed["filename"], Value::String("/tmp/fox-1.png".to_string()));
        assert_eq!(parsed["prompt"], Value::String("a red fox".to_string()));
        assert_eq!(parsed["args"][1], Value::String("gemini".to_string()));
        assert!(!line.contains("\n"));
        Ok(())
    }

    #[test]
    fn record_appends_without_rewriting() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join(HISTORY_FILE_NAME);
        fs::write(&path, "{\"filename\":\"old\",\"prompt\":\"old\",\"args\":[]}\n")?;
        let recorder = HistoryRecorder::new(&path);

        recorder.record(&HistoryRecord::new(Path::new("new.png"), "new", &[]))?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: HistoryRecord = serde_json::from_str(lines[0])?;
        let second: HistoryRecord = serde_json::from_str(lines[1])?;
        assert_eq!(first.filename, "old");
        assert_eq!(second.prompt, "new");
        Ok(())
    }

    #[test]
    fn concurrent_records_never_interleave() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = HistoryRecorder::new(temp.path().join(HISTORY_FILE_NAME));
        let long_prompt = "fox ".repeat(2048);

        thread::scope(|scope| {
            for worker in 0..8 {
                let recorder = recorder.clone();
                let prompt = long_prompt.clone();
                scope.spawn(move || {
                    for idx in 0..25 {
                        let name = format!("out-{worker}-{idx}.png");
                        recorder
                            .record(&HistoryRecord::new(Path::new(&name), prompt.as_str(), &[]))
                            .unwrap();
                    }
                });
            }
        });

        let content = fs::read_to_string(recorder.path())?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 200);
        for line in lines {
            let parsed: HistoryRecord = serde_json::from_str(line)?;
            assert_eq!(parsed.prompt, long_prompt);
        }
        Ok(())
    }

    #[test]
    fn history_path_sits_beside_output_prefix() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let recorder = HistoryRecorder::for_output_prefix(&temp.path().join("renders").join("fox"))?;
        assert_eq!(
            recorder.path(),
            temp.path().join("renders").join(HISTORY_FILE_NAME)
        );
        Ok(())
    }
}
