// Helper functions shared by the pipeline stages

use std::process::Stdio;
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use tokio::io::AsyncReadExt;
use tokio::process::Command as TokioCommand;
use tokio::time::timeout;
use url::Url;

lazy_static! {
    // Loose inbound pattern: explicit scheme, or a bare domain with a path
    static ref SCHEME_URL: Regex = Regex::new(r#"https?://[^\s<>"'`]+"#).unwrap();
    static ref BARE_URL: Regex = Regex::new(
        r#"(?i)\b(?P<www>www\.)?(?:[a-z0-9-]+\.)+(?P<tld>[a-z]{2,24})\b(?:/[^\s<>"'`]*)?"#
    )
    .unwrap();
}

/// Suffixes that make `name.ext` a file name rather than a domain
const FILE_SUFFIXES: &[&str] = &[
    "html", "htm", "php", "asp", "aspx", "jsp", "jpg", "jpeg", "png", "gif", "webp", "bmp", "svg", "mp4", "m3u8",
    "mkv", "avi", "mov", "webm", "mp3", "wav", "txt", "pdf", "doc", "docx", "xls", "xlsx", "zip", "rar", "exe",
    "js", "css", "json", "xml", "csv", "log", "rs", "py", "sh",
];

/// Run command with timeout, capturing stdout and stderr
pub async fn run_output_with_timeout(
    program: &str,
    args: &[String],
    limit: Duration,
) -> Result<std::process::Output, String> {
    let mut child = TokioCommand::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to start {}: {}", program, e))?;

    let mut stdout_pipe = child
        .stdout
        .take()
        .ok_or_else(|| format!("Failed to capture stdout from {}", program))?;
    let mut stderr_pipe = child
        .stderr
        .take()
        .ok_or_else(|| format!("Failed to capture stderr from {}", program))?;

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stdout_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stdout: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        stderr_pipe
            .read_to_end(&mut buf)
            .await
            .map_err(|e| format!("Failed to read stderr: {}", e))?;
        Ok::<Vec<u8>, String>(buf)
    });

    match timeout(limit, child.wait()).await {
        Ok(status_res) => {
            let status = status_res.map_err(|e| format!("Failed to wait for {}: {}", program, e))?;
            let stdout = stdout_task
                .await
                .map_err(|e| format!("stdout task failed: {}", e))??;
            let stderr = stderr_task
                .await
                .map_err(|e| format!("stderr task failed: {}", e))??;
            Ok(std::process::Output { status, stdout, stderr })
        }
        Err(_) => {
            let _ = child.kill().await;
            stdout_task.abort();
            stderr_task.abort();
            Err(format!("{} timed out after {}s", program, limit.as_secs()))
        }
    }
}

/// Run an external tool on its own task and join it back with a single await
pub async fn run_tool_detached(
    program: String,
    args: Vec<String>,
    limit: Duration,
) -> Result<std::process::Output, String> {
    let handle = tokio::spawn(async move { run_output_with_timeout(&program, &args, limit).await });
    handle
        .await
        .map_err(|e| format!("tool task failed: {}", e))?
}

/// Exponential backoff: `base_ms * 2^attempt`, capped at `max_ms`
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 2u64.saturating_pow(attempt);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// Parse a Retry-After header given in seconds
pub fn parse_retry_after(header_value: Option<&str>, cap: Duration) -> Option<Duration> {
    let secs = header_value?.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs).min(cap))
}

/// Random delay within `[min_ms, max_ms]`
pub fn jitter(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(fastrand::u64(min_ms..=max_ms))
}

/// Resolve a raw attribute value against the page URL.
///
/// Drops fragments, non-http(s) schemes, `data:`/`javascript:` URIs and empty values.
pub fn normalize_url(raw: &str, base: &Url) -> Option<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("data:")
        || lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with('#')
    {
        return None;
    }

    let mut joined = base.join(raw).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined)
}

/// Join a manifest entry against the manifest's own directory
pub fn manifest_join(manifest_url: &Url, entry: &str) -> Option<Url> {
    let entry = entry.trim();
    if entry.starts_with("http://") || entry.starts_with("https://") {
        return Url::parse(entry).ok();
    }
    manifest_url.join(entry).ok()
}

/// All URLs in a free-form message, with `https://` added where missing
pub fn find_urls(text: &str) -> Vec<Url> {
    let mut found: Vec<Url> = Vec::new();
    let mut push = |raw: &str| {
        let raw = raw.trim_end_matches(['.', ',', ')', ';', '!', '?']);
        if let Ok(url) = Url::parse(raw) {
            if url.host_str().is_some() && !found.contains(&url) {
                found.push(url);
            }
        }
    };

    let with_scheme: Vec<_> = SCHEME_URL.find_iter(text).collect();
    for m in &with_scheme {
        push(m.as_str());
    }

    // Bare domains outside the explicit matches; `file.html` is not one
    for caps in BARE_URL.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        let inside = with_scheme
            .iter()
            .any(|s| m.start() >= s.start() && m.end() <= s.end());
        if inside || text[..m.start()].ends_with('@') {
            continue;
        }
        let file_like = caps
            .name("tld")
            .map_or(false, |tld| FILE_SUFFIXES.contains(&tld.as_str().to_ascii_lowercase().as_str()));
        if file_like && caps.name("www").is_none() {
            continue;
        }
        push(&format!("https://{}", m.as_str()));
    }

    found
}

/// File-system safe stem from arbitrary text
pub fn sanitize_file_stem(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.trim().chars() {
        if ch.is_ascii_alphanumeric() || ch == '.' || ch == '_' || ch == '-' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches(|ch| ch == '.' || ch == '_');
    let mut stem: String = trimmed.chars().take(80).collect();
    if stem.is_empty() {
        stem.push_str("media");
    }
    stem
}

/// Last path segment of a URL, if any
pub fn url_basename(url: &Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Build proxy arguments for yt-dlp
pub fn get_proxy_args(proxy: Option<&str>) -> Vec<String> {
    match proxy {
        Some(p) => vec!["--proxy".to_string(), p.to_string()],
        None => Vec::new(),
    }
}
