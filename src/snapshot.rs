//! Snapshot exporter
//!
//! Writes a rendered frame to a caller-supplied path. The filename may
//! reference the camera entity (`{{ entity_id }}`, `{{ entity_id.object_id }}`).
//! Files are written to a temporary sibling and renamed into place, so a
//! failed export never leaves a partial image behind.

use crate::encoders::{encode_frame, EncodeError, ImageFormat};
use crate::render::Frame;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// Snapshot export errors
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("Cannot write snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid filename template: {0}")]
    Template(String),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Expand entity placeholders in a filename template
pub fn expand_filename(template: &str, entity_id: &str) -> Result<String, ExportError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| ExportError::Template(format!("unclosed placeholder in {}", template)))?;
        let value = match after[..end].trim() {
            "entity_id" => entity_id,
            "entity_id.object_id" => entity_id.split_once('.').map_or(entity_id, |(_, object)| object),
            other => {
                return Err(ExportError::Template(format!("unknown placeholder {}", other)));
            }
        };
        out.push_str(value);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Export a frame, returning the written path
///
/// The image format follows the file extension (PNG when absent or unknown).
pub fn export(frame: &Frame, filename: &str, entity_id: &str) -> Result<PathBuf, ExportError> {
    let path = PathBuf::from(expand_filename(filename, entity_id)?);
    let format = ImageFormat::from_path(&path).unwrap_or_default();
    let encoded = encode_frame(frame, format)?;

    write_atomic(&path, &encoded.image_data).map_err(|source| ExportError::Io {
        path: path.clone(),
        source,
    })?;

    info!(
        "Snapshot {}x{} written to {}",
        frame.width(),
        frame.height(),
        path.display()
    );
    Ok(path)
}

/// Write through a temporary file in the target directory, then rename
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
