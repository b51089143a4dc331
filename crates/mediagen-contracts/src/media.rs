use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;

use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Png,
    Jpeg,
    Webp,
    Mp4,
    Binary,
}

impl MediaKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Mp4 => "mp4",
            Self::Binary => "bin",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Mp4 => "video/mp4",
            Self::Binary => "application/octet-stream",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Png | Self::Jpeg | Self::Webp => "image",
            Self::Mp4 => "video",
            Self::Binary => "file",
        }
    }

    pub fn from_extension(raw: &str) -> Option<Self> {
        match raw.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "webp" => Some(Self::Webp),
            "mp4" => Some(Self::Mp4),
            "bin" => Some(Self::Binary),
            _ => None,
        }
    }

    /// Maps a response mime type onto a kind, falling back to `default` when
    /// the server sent nothing recognisable.
    pub fn from_mime_or(mime: Option<&str>, default: MediaKind) -> Self {
        let Some(mime) = mime else {
            return default;
        };
        let lowered = mime.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return Self::Jpeg;
        }
        if lowered.contains("webp") {
            return Self::Webp;
        }
        if lowered.contains("png") {
            return Self::Png;
        }
        if lowered.contains("mp4") {
            return Self::Mp4;
        }
        default
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A local file attached to a request, read once at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub path: PathBuf,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl MediaAttachment {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GenerationError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|err| {
            GenerationError::precondition(format!("failed reading {}: {err}", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            mime_type: mime_for_path(path).to_string(),
            bytes,
        })
    }

    pub fn from_bytes(path: impl Into<PathBuf>, mime_type: &str, bytes: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mime_type: mime_type.to_string(),
            bytes,
        }
    }
}

pub fn load_attachments(paths: &[PathBuf]) -> Result<Vec<MediaAttachment>, GenerationError> {
    paths.iter().map(MediaAttachment::load).collect()
}

fn mime_for_path(path: &Path) -> &'static str {
    if let Ok(format) = ImageFormat::from_path(path) {
        return format.to_mime_type();
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(MediaKind::from_extension)
        .map(MediaKind::mime_type)
        .unwrap_or("image/png")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMedia {
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
}

impl GeneratedMedia {
    pub fn new(bytes: Vec<u8>, kind: MediaKind) -> Self {
        Self { bytes, kind }
    }
}

/// Ordered outputs of one successful generation call. An empty result is a
/// soft failure, not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationResult {
    pub outputs: Vec<GeneratedMedia>,
    pub warnings: Vec<String>,
}

impl GenerationResult {
    pub fn single(bytes: Vec<u8>, kind: MediaKind) -> Self {
        Self {
            outputs: vec![GeneratedMedia::new(bytes, kind)],
            warnings: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn push_warning(&mut self, message: String) {
        if message.trim().is_empty() || self.warnings.contains(&message) {
            return;
        }
        self.warnings.push(message);
    }
}
