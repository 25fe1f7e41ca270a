// External tool detection (yt-dlp, ffmpeg)

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::utils::run_tool_detached;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
        }
    }

    fn version_arg(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "--version",
            ToolType::Ffmpeg => "-version",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub tool_type: ToolType,
    pub version: Option<String>,
    pub path: Option<String>,
    pub is_available: bool,
}

pub struct ToolManager;

impl ToolManager {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a tool, honouring an explicitly configured path first
    pub fn get_tool_info(&self, tool_type: ToolType, configured: Option<&str>) -> ToolInfo {
        let path = match configured {
            Some(p) if Path::new(p).exists() => Some(p.to_string()),
            _ => self.detect_tool(tool_type),
        };
        let version = path.as_deref().and_then(|p| self.get_version(p, tool_type));

        debug!(
            "[Tools] {} -> {}",
            tool_type.as_str(),
            path.as_deref().unwrap_or("not found")
        );

        ToolInfo {
            name: tool_type.as_str().to_string(),
            tool_type,
            version,
            is_available: path.is_some(),
            path,
        }
    }

    fn detect_tool(&self, tool_type: ToolType) -> Option<String> {
        let binary_name = tool_type.as_str();

        // 1. Try common paths first
        let common_paths = [
            format!("/opt/homebrew/bin/{}", binary_name),
            format!("/usr/local/bin/{}", binary_name),
            format!("/usr/bin/{}", binary_name),
        ];

        for path in common_paths {
            if Path::new(&path).exists() {
                return Some(path);
            }
        }

        // 2. Try PATH
        if let Ok(output) = Command::new("which").arg(binary_name).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(path);
                }
            }
        }

        None
    }

    fn get_version(&self, path: &str, tool_type: ToolType) -> Option<String> {
        match Command::new(path).arg(tool_type.version_arg()).output() {
            Ok(output) if output.status.success() => {
                // ffmpeg prints a banner; the first line carries the version
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .next()
                    .map(|l| l.trim().to_string())
            }
            _ => None,
        }
    }
}

impl Default for ToolManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy streams into an mp4 container with the index up front
pub async fn remux_faststart(
    ffmpeg: &str,
    input: &Path,
    output: &Path,
    limit: Duration,
) -> Result<(), String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-c".into(),
        "copy".into(),
    ];
    // MPEG-TS carries ADTS audio, which mp4 cannot hold as-is
    if input.extension().map_or(false, |e| e.eq_ignore_ascii_case("ts")) {
        args.push("-bsf:a".into());
        args.push("aac_adtstoasc".into());
    }
    args.extend([
        "-movflags".to_string(),
        "+faststart".to_string(),
        output.to_string_lossy().into_owned(),
    ]);

    debug!("[Tools] ffmpeg remux {} -> {}", input.display(), output.display());
    let out = run_tool_detached(ffmpeg.to_string(), args, limit).await?;
    if !out.status.success() {
        return Err(String::from_utf8_lossy(&out.stderr).trim().to_string());
    }
    Ok(())
}
