// External stream downloader - yt-dlp resolves and downloads in one step

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::courier::bypass::diagnose_error;
use crate::courier::config::ExternalToolConfig;
use crate::courier::errors::ResolutionFailure;
use crate::courier::tools::{remux_faststart, ToolManager, ToolType};
use crate::courier::traits::{StreamDownloader, StreamJob};
use crate::courier::utils::{get_proxy_args, run_tool_detached};

pub struct YtDlpDownloader {
    binary: Option<String>,
    ffmpeg: Option<String>,
    config: ExternalToolConfig,
    proxy: Option<String>,
}

impl YtDlpDownloader {
    /// Locate yt-dlp and ffmpeg (configured paths first, then the usual places)
    pub fn detect(config: &ExternalToolConfig, proxy: Option<String>) -> Self {
        let tools = ToolManager::new();
        let ytdlp = tools.get_tool_info(ToolType::YtDlp, config.ytdlp_path.as_deref());
        let ffmpeg = tools.get_tool_info(ToolType::Ffmpeg, config.ffmpeg_path.as_deref());
        info!(
            "[Resolver] yt-dlp: {} ({}), ffmpeg: {}",
            ytdlp.path.as_deref().unwrap_or("not found"),
            ytdlp.version.as_deref().unwrap_or("unknown version"),
            ffmpeg.path.as_deref().unwrap_or("not found"),
        );
        Self::with_paths(ytdlp.path, ffmpeg.path, config.clone(), proxy)
    }

    pub fn with_paths(
        binary: Option<String>,
        ffmpeg: Option<String>,
        config: ExternalToolConfig,
        proxy: Option<String>,
    ) -> Self {
        Self {
            binary,
            ffmpeg,
            config,
            proxy,
        }
    }

    pub fn ffmpeg(&self) -> Option<&str> {
        self.ffmpeg.as_deref()
    }

    /// mp4 at or below the height cap, then anything at or below it, then anything
    pub fn format_selector(max_height: u32) -> String {
        format!(
            "best[height<={h}][ext=mp4]/best[height<={h}]/best",
            h = max_height
        )
    }

    pub fn build_args(&self, job: &StreamJob) -> Vec<String> {
        let template = job.output_dir.join(format!("{}.%(ext)s", job.stem));
        let mut args = vec![
            "--user-agent".to_string(),
            job.user_agent.clone(),
        ];
        if let Some(referer) = &job.referer {
            args.push("--referer".to_string());
            args.push(referer.clone());
        }
        args.extend([
            "--output".to_string(),
            template.to_string_lossy().into_owned(),
            "--concurrent-fragments".to_string(),
            self.config.concurrent_fragments.to_string(),
            "--fragment-retries".to_string(),
            self.config.fragment_retries.to_string(),
            "--retries".to_string(),
            self.config.retries.to_string(),
            "--socket-timeout".to_string(),
            self.config.socket_timeout_secs.to_string(),
            "--no-warnings".to_string(),
            "--no-playlist".to_string(),
            "--format".to_string(),
            Self::format_selector(self.config.max_height),
            "--print".to_string(),
            "after_move:filepath".to_string(),
        ]);
        if let Some(ffmpeg) = &self.ffmpeg {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.clone());
        }
        args.extend(get_proxy_args(self.proxy.as_deref()));
        args.push(job.url.to_string());
        args
    }

    async fn faststart(&self, path: PathBuf) -> PathBuf {
        let Some(ffmpeg) = self.ffmpeg.as_deref().filter(|_| self.config.remux) else {
            return path;
        };
        let output = path.with_file_name(format!(
            "{}-faststart.mp4",
            path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
        ));
        let limit = Duration::from_secs(self.config.timeout_secs);
        match remux_faststart(ffmpeg, &path, &output, limit).await {
            Ok(()) => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!("[Resolver] Could not remove {}: {}", path.display(), e);
                }
                output
            }
            Err(e) => {
                warn!("[Resolver] Remux failed, keeping original: {}", e);
                let _ = tokio::fs::remove_file(&output).await;
                path
            }
        }
    }
}

/// Path yt-dlp printed, else the first file in `dir` named after `stem`
async fn locate_output(stdout: &str, dir: &Path, stem: &str) -> Option<PathBuf> {
    let printed = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(PathBuf::from)
        .filter(|p| p.is_file());
    if printed.is_some() {
        return printed;
    }

    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(stem) && !name.ends_with(".part") {
            return Some(entry.path());
        }
    }
    None
}

#[async_trait]
impl StreamDownloader for YtDlpDownloader {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    fn is_available(&self) -> bool {
        self.binary.is_some()
    }

    async fn download(&self, job: &StreamJob) -> Result<PathBuf, ResolutionFailure> {
        let binary = self
            .binary
            .clone()
            .ok_or(ResolutionFailure::ExternalToolUnavailable)?;

        let args = self.build_args(job);
        debug!("[Resolver] {} {}", binary, args.join(" "));
        info!("[Resolver] Handing {} to yt-dlp", job.url);

        let output = run_tool_detached(binary, args, Duration::from_secs(self.config.timeout_secs))
            .await
            .map_err(ResolutionFailure::from)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("[Resolver] ✗ yt-dlp failed for {}", job.url);
            return Err(failure_from_stderr(stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let path = locate_output(&stdout, &job.output_dir, &job.stem)
            .await
            .ok_or_else(|| ResolutionFailure::ExternalToolFailed("yt-dlp reported no output file".to_string()))?;

        info!("[Resolver] ✓ yt-dlp wrote {}", path.display());
        Ok(self.faststart(path).await)
    }
}

/// Classify a failed run. The tool started, so "not found" wording is
/// about the content rather than the binary.
fn failure_from_stderr(stderr: String) -> ResolutionFailure {
    let Some(reason) = diagnose_error(&stderr) else {
        return ResolutionFailure::from(stderr);
    };
    debug!("[Resolver] yt-dlp diagnosis: {}", reason.description());
    if reason.is_permanent() {
        ResolutionFailure::NoStreamFound(stderr)
    } else {
        ResolutionFailure::from(stderr)
    }
}
