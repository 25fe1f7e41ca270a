// Per-run temporary storage
//
// One directory per request, removed when the run is dropped (success,
// error or selection timeout alike).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tempfile::TempDir;

use crate::courier::models::MediaKind;
use crate::courier::utils::sanitize_file_stem;

pub struct RunStorage {
    dir: TempDir,
    counter: AtomicUsize,
}

impl RunStorage {
    pub fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("media-courier-").tempdir()?;
        Ok(Self {
            dir,
            counter: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Fresh, unique path for one artifact, e.g. `003-image-photo.jpg`
    pub fn allocate(&self, kind: MediaKind, hint: Option<&str>, default_ext: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let (stem, ext) = split_hint(hint, default_ext);
        let kind = match kind {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        };
        self.dir
            .path()
            .join(format!("{:03}-{}-{}.{}", n, kind, stem, ext))
    }

    /// Files currently held by this run
    pub fn file_count(&self) -> usize {
        std::fs::read_dir(self.dir.path())
            .map(|entries| entries.filter_map(Result::ok).count())
            .unwrap_or(0)
    }
}

fn split_hint(hint: Option<&str>, default_ext: &str) -> (String, String) {
    let Some(name) = hint else {
        return ("media".to_string(), default_ext.to_string());
    };
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            (sanitize_file_stem(stem), ext.to_ascii_lowercase())
        }
        _ => (sanitize_file_stem(name), default_ext.to_string()),
    }
}
