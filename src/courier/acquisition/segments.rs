// HLS segment download - sequential concatenation into one transport stream

use std::path::Path;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::courier::errors::{CourierError, ValidationFailure};
use crate::courier::models::HttpRequest;
use crate::courier::resolver::hls::segment_urls;
use crate::courier::traits::Transport;

/// Knobs for one HLS download
#[derive(Debug, Clone, Copy)]
pub struct SegmentPolicy {
    pub max_failed: usize,
    /// Download at most this many segments; None fetches the whole stream
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentReport {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub bytes: u64,
    pub truncated: bool,
}

/// Fetch the index playlist, then every segment in order, appending to `dest`.
/// `template` supplies headers and timeout; only its URL is replaced.
pub async fn download_segments(
    transport: &dyn Transport,
    index_url: &Url,
    template: &HttpRequest,
    dest: &Path,
    policy: SegmentPolicy,
) -> Result<SegmentReport, CourierError> {
    let mut request = template.clone();
    request.url = index_url.clone();
    let response = transport.get(&request).await?;
    if !response.is_success() {
        return Err(CourierError::HttpStatus {
            url: index_url.to_string(),
            status: response.status,
        });
    }

    let mut segments = segment_urls(&response.final_url, &response.text());
    if segments.is_empty() {
        return Err(ValidationFailure::EmptyManifest.into());
    }
    let total = segments.len();
    let truncated = match policy.limit {
        Some(limit) if limit < total => {
            warn!("[Acquire] Segment cap {} applied to {} segments; output will be truncated", limit, total);
            segments.truncate(limit);
            true
        }
        _ => false,
    };
    info!("[Acquire] Downloading {} HLS segments from {}", segments.len(), index_url);

    let mut file = tokio::fs::File::create(dest).await?;
    let mut report = SegmentReport {
        total: segments.len(),
        downloaded: 0,
        failed: 0,
        bytes: 0,
        truncated,
    };

    for (i, segment) in segments.iter().enumerate() {
        request.url = segment.clone();
        match transport.get(&request).await {
            Ok(r) if r.is_success() && !r.body.is_empty() => {
                file.write_all(&r.body).await?;
                report.downloaded += 1;
                report.bytes += r.body.len() as u64;
            }
            Ok(r) => {
                debug!("[Acquire] Segment {} returned HTTP {}", i + 1, r.status);
                report.failed += 1;
            }
            Err(e) => {
                debug!("[Acquire] Segment {} failed: {}", i + 1, e);
                report.failed += 1;
            }
        }

        if report.failed > policy.max_failed {
            warn!("[Acquire] ✗ {} of {} segments failed, giving up", report.failed, report.total);
            return Err(ValidationFailure::SegmentsFailed {
                failed: report.failed,
                total: report.total,
            }
            .into());
        }
        if (i + 1) % 25 == 0 {
            debug!("[Acquire] {}/{} segments", i + 1, report.total);
        }
    }
    file.flush().await?;

    if report.downloaded == 0 {
        return Err(ValidationFailure::SegmentsFailed {
            failed: report.failed,
            total: report.total,
        }
        .into());
    }
    if report.failed > 0 {
        warn!("[Acquire] {} of {} segments skipped", report.failed, report.total);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courier::testing::{url, ScriptedTransport};
    use std::time::Duration;

    const INDEX: &str = "#EXTM3U\n#EXTINF:6,\ns1.ts\n#EXTINF:6,\ns2.ts\n#EXTINF:6,\ns3.ts\n#EXT-X-ENDLIST\n";

    fn transport() -> ScriptedTransport {
        let t = ScriptedTransport::new();
        t.respond("https://cdn.test/hls/index.m3u8", 200, "application/vnd.apple.mpegurl", INDEX);
        t.respond_bytes("https://cdn.test/hls/s1.ts", 200, "video/mp2t", vec![1; 10]);
        t.respond_bytes("https://cdn.test/hls/s3.ts", 200, "video/mp2t", vec![3; 10]);
        t
    }

    fn template() -> HttpRequest {
        HttpRequest::new(url("https://cdn.test/hls/index.m3u8"), Duration::from_secs(5))
            .with_headers([("Referer", "https://luluvid.com/")])
    }

    #[tokio::test]
    async fn test_tolerates_failed_segments() {
        let t = transport();
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.ts");
        let policy = SegmentPolicy { max_failed: 5, limit: None };

        let report = download_segments(&t, &url("https://cdn.test/hls/index.m3u8"), &template(), &dest, policy)
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.downloaded, 2);
        assert_eq!(report.failed, 1);
        let bytes = tokio::fs::read(&dest).await.unwrap();
        assert_eq!(bytes, [vec![1u8; 10], vec![3u8; 10]].concat());
        assert!(t
            .requests()
            .iter()
            .all(|r| r.header("Referer") == Some("https://luluvid.com/")));
    }

    #[tokio::test]
    async fn test_too_many_failures_fail_artifact() {
        let t = transport();
        let dir = tempfile::tempdir().unwrap();
        let policy = SegmentPolicy { max_failed: 0, limit: None };

        let err = download_segments(&t, &url("https://cdn.test/hls/index.m3u8"), &template(), &dir.path().join("o.ts"), policy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CourierError::ValidationFailed(ValidationFailure::SegmentsFailed { failed: 1, total: 3 })
        ));
    }

    #[tokio::test]
    async fn test_segment_cap_is_reported() {
        let t = transport();
        let dir = tempfile::tempdir().unwrap();
        let policy = SegmentPolicy { max_failed: 5, limit: Some(1) };

        let report = download_segments(&t, &url("https://cdn.test/hls/index.m3u8"), &template(), &dir.path().join("o.ts"), policy)
            .await
            .unwrap();
        assert!(report.truncated);
        assert_eq!(report.total, 1);
        assert_eq!(t.request_count("https://cdn.test/hls/s2.ts"), 0);
    }

    #[tokio::test]
    async fn test_empty_manifest() {
        let t = ScriptedTransport::new();
        t.respond("https://cdn.test/hls/index.m3u8", 200, "application/vnd.apple.mpegurl", "#EXTM3U\n");
        let dir = tempfile::tempdir().unwrap();
        let policy = SegmentPolicy { max_failed: 5, limit: None };

        let err = download_segments(&t, &url("https://cdn.test/hls/index.m3u8"), &template(), &dir.path().join("o.ts"), policy)
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ValidationFailed(ValidationFailure::EmptyManifest)));
    }
}
