// Delivery batcher - paced, batch-retried uploads to the destination
//
// Title first, then images, then videos. Batches go out one at a time
// under the destination's upload lock; a retryable error resends the
// batch's undelivered items after backing off.

mod outbox;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::courier::config::DeliveryConfig;
use crate::courier::errors::{CourierError, DestinationError};
use crate::courier::models::{
    BatchReport, BatchStatus, DeliveryBatch, DeliveryReport, DeliveryTarget, MediaArtifact, MediaKind, VideoAttributes,
};
use crate::courier::traits::Destination;
use crate::courier::utils::backoff_delay;

pub use outbox::OutboxDestination;

/// Split `artifacts` into consecutive batches of at most `batch_size`
pub fn partition(artifacts: Vec<MediaArtifact>, batch_size: usize) -> Vec<DeliveryBatch> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(artifacts.len().div_ceil(size));
    let mut iter = artifacts.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(DeliveryBatch {
            batch_index: batches.len() + 1,
            artifacts: iter.by_ref().take(size).collect(),
            attempt_count: 0,
        });
    }
    batches
}

pub struct DeliveryBatcher {
    destination: Arc<dyn Destination>,
    target: DeliveryTarget,
    config: DeliveryConfig,
    upload_lock: Arc<Mutex<()>>,
}

impl DeliveryBatcher {
    /// `upload_lock` must be shared by every batcher posting to the same destination
    pub fn new(
        destination: Arc<dyn Destination>,
        target: DeliveryTarget,
        config: DeliveryConfig,
        upload_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            destination,
            target,
            config,
            upload_lock,
        }
    }

    pub async fn deliver(
        &self,
        title: Option<&str>,
        images: Vec<MediaArtifact>,
        videos: Vec<MediaArtifact>,
    ) -> DeliveryReport {
        let mut report = DeliveryReport {
            images_total: images.len(),
            videos_total: videos.len(),
            ..Default::default()
        };

        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            let _guard = self.upload_lock.lock().await;
            match self.destination.send_text(&self.target, title).await {
                Ok(()) => report.title_sent = true,
                Err(e) => warn!("[Delivery] ✗ Title not sent: {}", e),
            }
        }

        let artifacts: Vec<MediaArtifact> = images.into_iter().chain(videos).collect();
        let batches = partition(artifacts, self.config.batch_size);
        let count = batches.len();
        info!(
            "[Delivery] {} artifacts in {} batches via {}",
            report.total(),
            count,
            self.destination.name()
        );

        for (i, batch) in batches.into_iter().enumerate() {
            let (batch_report, delivered) = self.deliver_batch(batch).await;
            for kind in delivered {
                match kind {
                    MediaKind::Image => report.images_delivered += 1,
                    MediaKind::Video => report.videos_delivered += 1,
                }
            }
            report.batches.push(batch_report);

            if i + 1 < count && self.config.pacing_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.pacing_ms)).await;
            }
        }

        info!("[Delivery] {}", report.summary());
        report
    }

    /// Upload one batch; returns its report and the kinds that went through
    async fn deliver_batch(&self, mut batch: DeliveryBatch) -> (BatchReport, Vec<MediaKind>) {
        let _guard = self.upload_lock.lock().await;
        let size = batch.artifacts.len();
        let max_attempts = self.config.max_attempts.max(1);
        let mut pending = std::mem::take(&mut batch.artifacts);
        let mut delivered = Vec::new();
        let mut failed = 0;

        loop {
            batch.attempt_count += 1;
            let mut throttled = None;
            let mut sent = 0;

            while sent < pending.len() {
                let artifact = &pending[sent];
                match self.send(artifact).await {
                    Ok(()) => {
                        delivered.push(artifact.kind());
                        discard(artifact).await;
                    }
                    Err(e) if e.is_retryable() => {
                        throttled = Some(e);
                        break;
                    }
                    Err(e) => {
                        warn!("[Delivery] ✗ {} rejected: {}", artifact.path.display(), e);
                        failed += 1;
                        discard(artifact).await;
                    }
                }
                sent += 1;
            }
            pending.drain(..sent);

            let Some(error) = throttled else {
                debug!(
                    "[Delivery] ✓ Batch {} done after {} attempt(s)",
                    batch.batch_index, batch.attempt_count
                );
                let report = BatchReport {
                    batch_index: batch.batch_index,
                    size,
                    attempt_count: batch.attempt_count,
                    delivered: delivered.len(),
                    failed,
                    status: BatchStatus::Delivered,
                };
                return (report, delivered);
            };

            if batch.attempt_count >= max_attempts {
                let abandoned = CourierError::DeliveryAbandoned {
                    batch_index: batch.batch_index,
                    attempts: batch.attempt_count,
                    reason: error.to_string(),
                };
                warn!("[Delivery] ✗ {}", abandoned);
                for artifact in &pending {
                    discard(artifact).await;
                }
                failed += pending.len();
                let report = BatchReport {
                    batch_index: batch.batch_index,
                    size,
                    attempt_count: batch.attempt_count,
                    delivered: delivered.len(),
                    failed,
                    status: BatchStatus::Abandoned {
                        reason: error.to_string(),
                    },
                };
                return (report, delivered);
            }

            let delay = self.retry_delay(&error, batch.attempt_count);
            warn!(
                "[Delivery] Batch {} attempt {}/{} failed ({}), retrying {} items in {:?}",
                batch.batch_index,
                batch.attempt_count,
                max_attempts,
                error,
                pending.len(),
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Exponential backoff, stretched to the destination's retry-after hint
    fn retry_delay(&self, error: &DestinationError, attempt: u32) -> Duration {
        let backoff = backoff_delay(attempt - 1, self.config.base_backoff_ms, self.config.max_backoff_ms);
        let hint = match error {
            DestinationError::RateLimited { retry_after } => retry_after.unwrap_or_default(),
            _ => Duration::ZERO,
        };
        backoff
            .max(hint)
            .min(Duration::from_millis(self.config.max_backoff_ms))
    }

    async fn send(&self, artifact: &MediaArtifact) -> Result<(), DestinationError> {
        match artifact.kind() {
            MediaKind::Image => self.destination.send_photo(&self.target, &artifact.path).await,
            MediaKind::Video => {
                self.destination
                    .send_video(&self.target, &artifact.path, &VideoAttributes::default())
                    .await
            }
        }
    }
}

async fn discard(artifact: &MediaArtifact) {
    if let Err(e) = artifact.discard().await {
        warn!("[Delivery] Could not remove {}: {}", artifact.path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::models::{DiscoveredVia, MediaCandidate, SignatureStatus};
    use crate::courier::testing::{url, RecordingDestination, Sent};
    use std::path::Path;

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            batch_size: 5,
            pacing_ms: 1,
            max_attempts: 4,
            base_backoff_ms: 1,
            max_backoff_ms: 50,
        }
    }

    fn artifacts(dir: &Path, kind: MediaKind, n: usize) -> Vec<MediaArtifact> {
        (0..n)
            .map(|i| {
                let name = match kind {
                    MediaKind::Image => format!("img-{:02}.jpg", i),
                    MediaKind::Video => format!("vid-{:02}.mp4", i),
                };
                let path = dir.join(&name);
                std::fs::write(&path, b"payload").unwrap();
                MediaArtifact {
                    origin: MediaCandidate {
                        url: url(&format!("https://media.test/{}", name)),
                        source_host_tag: "generic".to_string(),
                        kind,
                        discovered_via: DiscoveredVia::Link,
                    },
                    path,
                    byte_size: 7,
                    content_signature: SignatureStatus::Validated,
                    referrer_used: None,
                }
            })
            .collect()
    }

    fn batcher(destination: Arc<RecordingDestination>, config: DeliveryConfig) -> DeliveryBatcher {
        DeliveryBatcher::new(
            destination,
            DeliveryTarget {
                channel_id: "chan".to_string(),
                topic_id: None,
            },
            config,
            Arc::new(Mutex::new(())),
        )
    }

    #[test]
    fn test_partition_is_ceiling_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        for (n, b, expected) in [(0, 5, 0), (1, 5, 1), (5, 5, 1), (6, 5, 2), (15, 5, 3), (7, 3, 3)] {
            let batches = partition(artifacts(dir.path(), MediaKind::Image, n), b);
            assert_eq!(batches.len(), expected);
            assert!(batches.iter().all(|batch| batch.artifacts.len() <= b));
            let total: usize = batches.iter().map(|batch| batch.artifacts.len()).sum();
            assert_eq!(total, n);
            let indices: Vec<_> = batches.iter().map(|batch| batch.batch_index).collect();
            assert_eq!(indices, (1..=expected).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_rate_limited_batch_retried() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(RecordingDestination::new());
        // Sixth media call is the first upload of batch 2
        destination.fail_call(5, DestinationError::RateLimited { retry_after: None });
        let batcher = batcher(destination.clone(), config());

        let report = batcher
            .deliver(Some("Beach Day"), artifacts(dir.path(), MediaKind::Image, 15), Vec::new())
            .await;

        let attempts: Vec<u32> = report.batches.iter().map(|b| b.attempt_count).collect();
        assert_eq!(attempts, vec![1, 2, 1]);
        assert!(report.batches.iter().all(|b| b.status == BatchStatus::Delivered));
        assert!(report.is_complete());
        assert_eq!(report.summary(), "15/15 images delivered");

        let sent = destination.sent();
        assert_eq!(sent[0], Sent::Text("Beach Day".to_string()));
        assert_eq!(sent.len(), 16);
        let photos: Vec<_> = sent[1..]
            .iter()
            .map(|s| match s {
                Sent::Photo(name) => name.clone(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        let expected: Vec<_> = (0..15).map(|i| format!("img-{:02}.jpg", i)).collect();
        assert_eq!(photos, expected);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_retry_resends_only_undelivered_items() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(RecordingDestination::new());
        destination.fail_call(2, DestinationError::Transport("connection reset".to_string()));
        let batcher = batcher(destination.clone(), config());

        let report = batcher
            .deliver(None, artifacts(dir.path(), MediaKind::Image, 4), Vec::new())
            .await;

        assert!(!report.title_sent);
        assert_eq!(report.batches[0].attempt_count, 2);
        assert_eq!(report.batches[0].delivered, 4);
        assert_eq!(destination.sent().len(), 4);
    }

    #[tokio::test]
    async fn test_batch_abandoned_after_ceiling() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(RecordingDestination::new());
        // Batch 1 (2 items) goes through; every attempt on batch 2 is throttled
        for call in 2..6 {
            destination.fail_call(call, DestinationError::RateLimited { retry_after: None });
        }
        let mut cfg = config();
        cfg.batch_size = 2;
        let batcher = batcher(destination.clone(), cfg);

        let report = batcher
            .deliver(None, artifacts(dir.path(), MediaKind::Image, 3), artifacts(dir.path(), MediaKind::Video, 1))
            .await;

        assert_eq!(report.batches.len(), 2);
        assert_eq!(report.batches[0].status, BatchStatus::Delivered);
        assert_eq!(report.batches[1].attempt_count, 4);
        assert!(matches!(report.batches[1].status, BatchStatus::Abandoned { .. }));
        assert_eq!(report.batches[1].failed, 2);
        assert_eq!(report.images_delivered, 2);
        assert_eq!(report.videos_delivered, 0);
        assert_eq!(report.summary(), "2/3 images delivered, 0/1 videos delivered");
        // Abandoned artifacts do not outlive their batch
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_item_fails_alone() {
        let dir = tempfile::tempdir().unwrap();
        let destination = Arc::new(RecordingDestination::new());
        destination.fail_call(1, DestinationError::Rejected("file too large".to_string()));
        let batcher = batcher(destination.clone(), config());

        let report = batcher
            .deliver(None, Vec::new(), artifacts(dir.path(), MediaKind::Video, 3))
            .await;

        assert_eq!(report.batches[0].attempt_count, 1);
        assert_eq!(report.batches[0].failed, 1);
        assert_eq!(report.videos_delivered, 2);
        assert_eq!(
            destination.sent(),
            vec![Sent::Video("vid-00.mp4".to_string()), Sent::Video("vid-02.mp4".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_honored() {
        let destination = Arc::new(RecordingDestination::new());
        destination.fail_call(
            0,
            DestinationError::RateLimited {
                retry_after: Some(Duration::from_secs(20)),
            },
        );
        let mut cfg = config();
        cfg.max_backoff_ms = 60_000;
        let batcher = batcher(destination.clone(), cfg);
        let missing = MediaArtifact {
            origin: MediaCandidate {
                url: url("https://media.test/a.jpg"),
                source_host_tag: "generic".to_string(),
                kind: MediaKind::Image,
                discovered_via: DiscoveredVia::Link,
            },
            path: std::path::PathBuf::from("/nonexistent/a.jpg"),
            byte_size: 1,
            content_signature: SignatureStatus::Validated,
            referrer_used: None,
        };

        let start = tokio::time::Instant::now();
        let report = batcher.deliver(None, vec![missing], Vec::new()).await;
        assert!(start.elapsed() >= Duration::from_secs(20));
        assert_eq!(report.batches[0].attempt_count, 2);
    }
}
