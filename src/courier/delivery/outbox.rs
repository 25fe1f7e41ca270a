// Outbox destination - "sends" messages by writing them into a directory tree
//
// Layout: <root>/<channel>[/<topic>]/NNNN-<kind>[-<file>] plus a NNNN-<kind>.json
// sidecar describing each message.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::courier::errors::DestinationError;
use crate::courier::models::{DeliveryTarget, VideoAttributes};
use crate::courier::traits::Destination;
use crate::courier::utils::sanitize_file_stem;

#[derive(Debug, Serialize)]
struct Sidecar<'a> {
    index: usize,
    kind: &'a str,
    channel_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attributes: Option<&'a VideoAttributes>,
    sent_at: String,
}

pub struct OutboxDestination {
    root: PathBuf,
}

impl OutboxDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn dir_for(&self, target: &DeliveryTarget) -> PathBuf {
        let mut dir = self.root.join(sanitize_file_stem(&target.channel_id));
        if let Some(topic) = &target.topic_id {
            dir = dir.join(sanitize_file_stem(topic));
        }
        dir
    }

    async fn write(
        &self,
        target: &DeliveryTarget,
        kind: &str,
        text: Option<&str>,
        media: Option<&Path>,
        attributes: Option<&VideoAttributes>,
    ) -> Result<(), DestinationError> {
        let dir = self.dir_for(target);
        tokio::fs::create_dir_all(&dir).await?;
        let index = next_index(&dir).await?;

        let file = match media {
            Some(source) => {
                let name = source
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "media".to_string());
                let stored = format!("{:04}-{}-{}", index, kind, name);
                match tokio::fs::copy(source, dir.join(&stored)).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(DestinationError::Rejected(format!("{} is missing", source.display())));
                    }
                    Err(e) => return Err(e.into()),
                }
                Some(stored)
            }
            None => None,
        };

        let sidecar = Sidecar {
            index,
            kind,
            channel_id: &target.channel_id,
            topic_id: target.topic_id.as_deref(),
            text,
            file,
            attributes,
            sent_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        let json = serde_json::to_vec_pretty(&sidecar).map_err(|e| DestinationError::Rejected(e.to_string()))?;
        let sidecar_path = dir.join(format!("{:04}-{}.json", index, kind));
        tokio::fs::write(&sidecar_path, json).await?;

        debug!("[Delivery] Outbox wrote {}", sidecar_path.display());
        Ok(())
    }
}

/// One sidecar per message, so the next index is the sidecar count plus one
async fn next_index(dir: &Path) -> std::io::Result<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().map_or(false, |e| e == "json") {
            count += 1;
        }
    }
    Ok(count + 1)
}

#[async_trait]
impl Destination for OutboxDestination {
    fn name(&self) -> &'static str {
        "outbox"
    }

    async fn send_text(&self, target: &DeliveryTarget, text: &str) -> Result<(), DestinationError> {
        self.write(target, "text", Some(text), None, None).await
    }

    async fn send_photo(&self, target: &DeliveryTarget, path: &Path) -> Result<(), DestinationError> {
        self.write(target, "photo", None, Some(path), None).await
    }

    async fn send_video(
        &self,
        target: &DeliveryTarget,
        path: &Path,
        attributes: &VideoAttributes,
    ) -> Result<(), DestinationError> {
        self.write(target, "video", None, Some(path), Some(attributes)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(topic: Option<&str>) -> DeliveryTarget {
        DeliveryTarget {
            channel_id: "-100123".to_string(),
            topic_id: topic.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_messages_numbered_in_send_order() {
        let root = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let photo = media.path().join("a.jpg");
        let video = media.path().join("b.mp4");
        tokio::fs::write(&photo, b"jpeg").await.unwrap();
        tokio::fs::write(&video, b"mp4").await.unwrap();

        let outbox = OutboxDestination::new(root.path());
        let t = target(Some("7"));
        outbox.send_text(&t, "Beach Day").await.unwrap();
        outbox.send_photo(&t, &photo).await.unwrap();
        outbox.send_video(&t, &video, &VideoAttributes::default()).await.unwrap();

        let dir = outbox.dir_for(&t);
        assert!(dir.ends_with("7"));
        assert_eq!(tokio::fs::read(dir.join("0002-photo-a.jpg")).await.unwrap(), b"jpeg");
        assert!(dir.join("0003-video-b.mp4").exists());

        let raw = tokio::fs::read_to_string(dir.join("0001-text.json")).await.unwrap();
        let text: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(text["text"], "Beach Day");
        assert_eq!(text["topic_id"], "7");

        let raw = tokio::fs::read_to_string(dir.join("0003-video.json")).await.unwrap();
        let video: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(video["attributes"]["width"], 1920);
        assert_eq!(video["attributes"]["supports_streaming"], true);
    }

    #[tokio::test]
    async fn test_missing_file_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let outbox = OutboxDestination::new(root.path());
        let err = outbox
            .send_photo(&target(None), Path::new("/nonexistent/x.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, DestinationError::Rejected(_)));
    }
}
