//! Input artifacts: named byte blobs handed to a task by the page fetcher.
//!
//! Content is held behind an `Arc` so the same bytes can be materialized into
//! several working directories (one per execution attempt) without copying.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SandboxError;

/// Number of lines kept in a derived preview.
const PREVIEW_LINES: usize = 10;
/// Upper bound on preview length in characters.
const PREVIEW_MAX_CHARS: usize = 2_000;

/// Coarse classification of an artifact, used for routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Tabular,
    Document,
    Image,
    Unknown,
}

impl ArtifactKind {
    /// Infer the kind from a media type, falling back to the file extension.
    pub fn infer(name: &str, media_type: Option<&str>) -> Self {
        if let Some(kind) = media_type.and_then(Self::from_media_type) {
            return kind;
        }
        Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| Self::from_extension(&ext.to_ascii_lowercase()))
            .unwrap_or(Self::Unknown)
    }

    fn from_media_type(media_type: &str) -> Option<Self> {
        let mt = media_type.to_ascii_lowercase();
        if mt.starts_with("image/") {
            Some(Self::Image)
        } else if mt.contains("csv")
            || mt.contains("json")
            || mt.contains("spreadsheet")
            || mt.contains("excel")
            || mt.contains("parquet")
            || mt.contains("tab-separated")
        {
            Some(Self::Tabular)
        } else if mt.contains("pdf")
            || mt.starts_with("text/")
            || mt.contains("xml")
            || mt.contains("html")
        {
            Some(Self::Document)
        } else {
            None
        }
    }

    fn from_extension(ext: &str) -> Self {
        match ext {
            "csv" | "tsv" | "xlsx" | "xls" | "json" | "parquet" => Self::Tabular,
            "pdf" | "txt" | "md" | "xml" | "html" | "htm" => Self::Document,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "svg" | "webp" => Self::Image,
            _ => Self::Unknown,
        }
    }

    /// Whether a program is usually needed to analyse this kind of input.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Tabular | Self::Document)
    }

    /// File extension used when no name can be derived.
    fn default_extension(self, media_type: Option<&str>) -> &'static str {
        let mt = media_type.unwrap_or_default().to_ascii_lowercase();
        match self {
            Self::Tabular if mt.contains("json") => "json",
            Self::Tabular if mt.contains("sheet") || mt.contains("excel") => "xlsx",
            Self::Tabular => "csv",
            Self::Document if mt.contains("pdf") => "pdf",
            Self::Document => "txt",
            Self::Image => "png",
            Self::Unknown => "dat",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tabular => write!(f, "tabular"),
            Self::Document => write!(f, "document"),
            Self::Image => write!(f, "image"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A named input file.
#[derive(Debug, Clone)]
pub struct InputArtifact {
    name: String,
    content: Arc<[u8]>,
    media_type: Option<String>,
    kind: ArtifactKind,
    preview: Option<String>,
}

impl InputArtifact {
    /// Build an artifact; the kind is inferred from the media type and name.
    pub fn new(
        name: impl Into<String>,
        content: impl Into<Arc<[u8]>>,
        media_type: Option<String>,
    ) -> Self {
        let name = name.into();
        let kind = ArtifactKind::infer(&name, media_type.as_deref());
        Self {
            name,
            content: content.into(),
            media_type,
            kind,
            preview: None,
        }
    }

    /// Build an artifact named after the last segment of its source URL.
    ///
    /// Keys of the form `image_N` (inline page images) become `image_N.png`.
    /// URLs without a usable file name fall back to `data.<ext>` by kind.
    pub fn from_url(url: &str, content: impl Into<Arc<[u8]>>, media_type: Option<String>) -> Self {
        let name = file_name_for_source(url, media_type.as_deref());
        Self::new(name, content, media_type)
    }

    /// Rename so the materialized file name differs from every one in
    /// `existing`: `data.csv` becomes `data_2.csv`, then `data_3.csv`.
    ///
    /// Names that cannot be sanitized are left alone for
    /// [`validate_names`] to reject.
    pub fn unique_among(mut self, existing: &[InputArtifact]) -> Self {
        let Ok(file_name) = sanitized_file_name(&self.name) else {
            return self;
        };
        let taken: HashSet<String> = existing
            .iter()
            .filter_map(|a| sanitized_file_name(a.name()).ok())
            .collect();
        if !taken.contains(&file_name) {
            return self;
        }

        let path = Path::new(&file_name);
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(file_name.as_str());
        let ext = path.extension().and_then(|e| e.to_str());
        let renamed = (2..=taken.len() + 1)
            .map(|n| match ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            })
            .find(|candidate| !taken.contains(candidate));
        if let Some(renamed) = renamed {
            self.name = renamed;
        }
        self
    }

    /// Attach a caller-supplied textual preview (e.g. the head of a table).
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Textual preview: the caller-supplied one, or the first lines of
    /// UTF-8 tabular/document content.
    pub fn preview(&self) -> Option<String> {
        if let Some(preview) = &self.preview {
            return Some(preview.clone());
        }
        if !self.kind.is_data() {
            return None;
        }
        let text = std::str::from_utf8(&self.content).ok()?;
        let head: String = text
            .lines()
            .take(PREVIEW_LINES)
            .collect::<Vec<_>>()
            .join("\n")
            .chars()
            .take(PREVIEW_MAX_CHARS)
            .collect();
        (!head.trim().is_empty()).then_some(head)
    }

    pub fn manifest_entry(&self) -> ManifestEntry {
        ManifestEntry {
            name: self.name.clone(),
            kind: self.kind,
            size_bytes: self.content.len() as u64,
        }
    }
}

/// `(name, kind)` view of an artifact, as shown to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
}

/// Reduce an artifact name to the plain file name it is materialized under.
pub fn sanitized_file_name(name: &str) -> Result<String, SandboxError> {
    let file_name = Path::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| SandboxError::invalid_artifact(name, "no file name component"))?;
    if file_name.is_empty() || file_name == "." || file_name == ".." {
        return Err(SandboxError::invalid_artifact(name, "empty file name"));
    }
    Ok(file_name)
}

/// Check a set of artifacts can be materialized side by side with the program.
pub fn validate_names(
    artifacts: &[InputArtifact],
    script_name: &str,
) -> Result<Vec<String>, SandboxError> {
    let mut seen = HashSet::new();
    let mut names = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let file_name = sanitized_file_name(artifact.name())?;
        if file_name == script_name {
            return Err(SandboxError::invalid_artifact(
                artifact.name(),
                "collides with the program file",
            ));
        }
        if !seen.insert(file_name.clone()) {
            return Err(SandboxError::invalid_artifact(artifact.name(), "duplicate file name"));
        }
        names.push(file_name);
    }
    Ok(names)
}

fn file_name_for_source(source: &str, media_type: Option<&str>) -> String {
    if let Some(index) = source.strip_prefix("image_") {
        if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) {
            return format!("image_{index}.png");
        }
    }

    let last_segment = url::Url::parse(source)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
        })
        .or_else(|| source.rsplit('/').next().map(str::to_string))
        .filter(|seg| seg.contains('.') && !seg.starts_with('.'));

    match last_segment {
        Some(segment) => segment,
        None => {
            let kind = ArtifactKind::infer("", media_type);
            format!("data.{}", kind.default_extension(media_type))
        }
    }
}
