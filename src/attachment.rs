// Attachment resolution - turns files on disk into base64 log payloads

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Binary payload attached to a remote log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    /// Base64-encoded file content.
    pub content: String,
}

impl Attachment {
    /// Read and encode a file with an explicit content type.
    pub fn from_file(path: &Path, content_type: &str) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let content = encode_file(path)?;
        Ok(Self {
            name,
            content_type: content_type.to_string(),
            content,
        })
    }
}

/// Base64-encode a file's content.
pub fn encode_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read attachment file: {}", path.display()))?;
    Ok(STANDARD.encode(bytes))
}

/// Load a screenshot file as a png attachment. `None` if unreadable.
pub fn screenshot(path: &Path) -> Option<Attachment> {
    Attachment::from_file(path, "image/png").ok()
}

/// Find the recording for one spec file under the videos folder.
///
/// The runner names recordings after the spec file basename with an `.mp4`
/// suffix; the suffix is appended here unless already present. Returns the
/// first match in traversal order, or `None` if nothing matches.
pub fn find_video(videos_folder: Option<&Path>, spec_file_name: &str) -> Option<Attachment> {
    let file_name = if spec_file_name.to_lowercase().ends_with(".mp4") {
        spec_file_name.to_string()
    } else {
        format!("{spec_file_name}.mp4")
    };

    let root: PathBuf = videos_folder
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let found = walkdir::WalkDir::new(&root)
        .into_iter()
        .flatten()
        .find(|entry| {
            entry.file_type().is_file() && entry.file_name().to_string_lossy() == file_name
        })?;

    Attachment::from_file(found.path(), "video/mp4").ok().map(|mut attachment| {
        attachment.name = file_name;
        attachment
    })
}
