use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Local;

use crate::error::GenerationError;
use crate::media::MediaKind;

const DEFAULT_STEM: &str = "file";
const TOKEN_BYTES: usize = 2;
const WIDE_TOKEN_BYTES: usize = 4;
const NARROW_TOKEN_ATTEMPTS: usize = 16;

/// A written output and the prompt that actually produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedOutput {
    pub path: PathBuf,
    pub prompt: String,
}

/// Returns a fresh `<stem>-<timestamp>-<token>.<ext>` path next to `prefix`,
/// creating the directory if needed.
pub fn output_name(prefix: &Path, kind: MediaKind) -> Result<PathBuf, GenerationError> {
    let parts = PrefixParts::resolve(prefix, kind)?;
    let file_name = |uid: &str| format!("{}-{uid}.{}", parts.stem, parts.ext);
    let uid = parts.reserve_uid(|uid| parts.dir.join(file_name(uid)));
    Ok(parts.dir.join(file_name(&uid)))
}

/// Lazy `<stem>-<timestamp>-<token>-<i>.<ext>` sequence for requests that
/// yield several outputs. One token is drawn per sequence.
pub fn output_names(prefix: &Path, kind: MediaKind) -> Result<OutputNames, GenerationError> {
    let parts = PrefixParts::resolve(prefix, kind)?;
    let uid = parts.reserve_uid(|uid| {
        parts
            .dir
            .join(format!("{}-{uid}-1.{}", parts.stem, parts.ext))
    });
    Ok(OutputNames {
        dir: parts.dir,
        stem: parts.stem,
        uid,
        ext: parts.ext,
        index: 0,
    })
}

#[derive(Debug, Clone)]
pub struct OutputNames {
    dir: PathBuf,
    stem: String,
    uid: String,
    ext: String,
    index: u64,
}

impl Iterator for OutputNames {
    type Item = PathBuf;

    fn next(&mut self) -> Option<Self::Item> {
        self.index += 1;
        Some(self.dir.join(format!(
            "{}-{}-{}.{}",
            self.stem, self.uid, self.index, self.ext
        )))
    }
}

struct PrefixParts {
    dir: PathBuf,
    stem: String,
    ext: String,
}

impl PrefixParts {
    fn resolve(prefix: &Path, kind: MediaKind) -> Result<Self, GenerationError> {
        let dir = prefix
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = prefix
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::trim)
            .filter(|stem| !stem.is_empty())
            .unwrap_or(DEFAULT_STEM)
            .to_string();
        let ext = prefix
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| MediaKind::from_extension(ext) == Some(kind))
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| kind.extension().to_string());

        fs::create_dir_all(&dir).map_err(|source| GenerationError::OutputWrite {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir, stem, ext })
    }

    /// Draws timestamp+token uids until one is both unissued in this process
    /// and free on disk.
    fn reserve_uid(&self, candidate_path: impl Fn(&str) -> PathBuf) -> String {
        let mut attempt = 0;
        loop {
            let width = if attempt < NARROW_TOKEN_ATTEMPTS {
                TOKEN_BYTES
            } else {
                WIDE_TOKEN_BYTES
            };
            let uid = format!(
                "{}-{}",
                Local::now().format("%Y%m%d%H%M%S"),
                random_token(width)
            );
            let path = candidate_path(&uid);
            if !path.exists() && issue(&path) {
                return uid;
            }
            attempt += 1;
        }
    }
}

fn random_token(width: usize) -> String {
    let id = uuid::Uuid::new_v4();
    hex::encode(&id.as_bytes()[..width])
}

fn issue(path: &Path) -> bool {
    static ISSUED: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    let issued = ISSUED.get_or_init(|| Mutex::new(HashSet::new()));
    match issued.lock() {
        Ok(mut guard) => guard.insert(path.to_path_buf()),
        Err(poisoned) => poisoned.into_inner().insert(path.to_path_buf()),
    }
}
