// Payload validation - size bounds, HTML detection, image magic bytes
//
// The advertised content type is never consulted: only the bytes on disk.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::courier::config::AcquisitionConfig;
use crate::courier::errors::ValidationFailure;
use crate::courier::models::MediaKind;

const HEAD_BYTES: usize = 8 * 1024;

const IMAGE_MIMES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    pub min_image_bytes: u64,
    pub min_video_bytes: u64,
    pub max_bytes: u64,
}

impl From<&AcquisitionConfig> for ValidationRules {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            min_image_bytes: config.min_image_bytes,
            min_video_bytes: config.min_video_bytes,
            max_bytes: config.max_file_bytes(),
        }
    }
}

impl ValidationRules {
    fn min_for(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Image => self.min_image_bytes,
            MediaKind::Video => self.min_video_bytes,
        }
    }
}

/// Markup where binary content was expected
pub fn looks_like_html(head: &[u8]) -> bool {
    let text = String::from_utf8_lossy(&head[..head.len().min(512)]).to_ascii_lowercase();
    let text = text.trim_start_matches('\u{feff}').trim_start();
    text.starts_with("<!doctype html") || text.starts_with("<html") || text.starts_with("<head") || text.starts_with("<body")
}

/// Validate a payload from its first bytes and total size
pub fn validate_payload(kind: MediaKind, head: &[u8], size: u64, rules: &ValidationRules) -> Result<(), ValidationFailure> {
    if size > rules.max_bytes {
        return Err(ValidationFailure::TooLarge {
            size,
            max: rules.max_bytes,
        });
    }
    if looks_like_html(head) {
        return Err(ValidationFailure::HtmlPayload);
    }
    let min = rules.min_for(kind);
    if size < min {
        return Err(ValidationFailure::TooSmall { size, min });
    }
    if kind == MediaKind::Image {
        match infer::get(head) {
            Some(t) if IMAGE_MIMES.contains(&t.mime_type()) => {}
            Some(t) => return Err(ValidationFailure::BadSignature(t.mime_type().to_string())),
            None => return Err(ValidationFailure::BadSignature("unknown".to_string())),
        }
    }
    Ok(())
}

/// Validate a stored file; returns its size
pub async fn validate_file(path: &Path, kind: MediaKind, rules: &ValidationRules) -> Result<u64, ValidationFailure> {
    let unreadable = |e: std::io::Error| ValidationFailure::BadSignature(format!("unreadable: {}", e));

    let size = tokio::fs::metadata(path).await.map_err(unreadable)?.len();
    let mut file = tokio::fs::File::open(path).await.map_err(unreadable)?;
    let mut head = vec![0u8; HEAD_BYTES.min(size as usize)];
    file.read_exact(&mut head).await.map_err(unreadable)?;

    validate_payload(kind, &head, size, rules)?;
    Ok(size)
}
