// HLS manifest parsing - master to index, index to segments

use url::Url;

use crate::courier::errors::ResolutionFailure;
use crate::courier::utils::manifest_join;

pub const MANIFEST_ACCEPT: &str = "application/vnd.apple.mpegurl,application/x-mpegURL,*/*";

/// Non-blank lines that are not `#` directives, in order
fn uri_lines(manifest: &str) -> impl Iterator<Item = &str> {
    manifest
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// The one non-comment line of a master playlist that names an index
pub fn index_entry(manifest: &str) -> Option<&str> {
    uri_lines(manifest).find(|line| line.contains(".m3u8"))
}

/// Whether the playlist already lists media segments
pub fn is_media_playlist(manifest: &str) -> bool {
    manifest.lines().any(|line| line.trim_start().starts_with("#EXTINF"))
}

/// Resolve a master playlist to its index URL. Relative entries join
/// against the manifest's own directory, never the embedding page.
pub fn locate_index(master_url: &Url, manifest: &str) -> Result<Url, ResolutionFailure> {
    if let Some(entry) = index_entry(manifest) {
        return manifest_join(master_url, entry).ok_or_else(|| {
            ResolutionFailure::NoStreamFound(format!("unparseable index entry {:?} in {}", entry, master_url))
        });
    }
    // Some hosts serve the media playlist directly under the master name
    if is_media_playlist(manifest) {
        return Ok(master_url.clone());
    }
    Err(ResolutionFailure::NoStreamFound(format!(
        "no index playlist in {}",
        master_url
    )))
}

/// Segment URLs of an index playlist, joined against the index URL
pub fn segment_urls(index_url: &Url, manifest: &str) -> Vec<Url> {
    uri_lines(manifest)
        .filter_map(|line| manifest_join(index_url, line))
        .collect()
}
