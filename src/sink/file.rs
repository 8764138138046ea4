//! File-backed body storage for [`ResponseSink`](super::ResponseSink).
//!
//! Body bytes are buffered in memory and written out on every `flush()`. The
//! file is created lazily on the first flush that has data and is never
//! overwritten: if `name` exists, `name.1`, `name.2`, ... are tried.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::url::Url;

/// Name used when the URL path has no usable last segment.
pub const DEFAULT_FILE_NAME: &str = "index.html";

/// Upper bound on numeric suffixes tried before giving up on uniqueness.
const MAX_SUFFIX: usize = 10_000;

/// Body storage that streams to a file in `dir`.
#[derive(Debug)]
pub struct FileBody {
    dir: PathBuf,
    file_name: String,
    pending: Vec<u8>,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl FileBody {
    pub(crate) fn new(dir: impl Into<PathBuf>, url: &str) -> Self {
        Self {
            dir: dir.into(),
            file_name: file_name_from_url(url),
            pending: Vec::new(),
            file: None,
            path: None,
        }
    }

    /// Retargets the body at a new URL; any open file is closed.
    pub(crate) fn retarget(&mut self, url: &str) {
        self.close();
        self.file_name = file_name_from_url(url);
        self.path = None;
        trace!(file_name = %self.file_name, "file name set");
    }

    pub(crate) fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Path of the file currently (or last) written, once opened.
    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bytes buffered but not yet flushed.
    pub(crate) fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub(crate) fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub(crate) fn push(&mut self, byte: u8) {
        self.pending.push(byte);
    }

    /// Writes buffered bytes to the file, opening it on first use.
    ///
    /// On failure the buffered bytes are kept; the error names the target path.
    pub(crate) fn flush(&mut self) -> Result<(), (PathBuf, io::Error)> {
        if self.pending.is_empty() {
            return Ok(());
        }
        if self.file.is_none() {
            let path = resolve_unique_path(&self.dir, &self.file_name);
            debug!(path = %path.display(), "opening body file");
            let file = File::create(&path).map_err(|e| (path.clone(), e))?;
            self.path = Some(path);
            self.file = Some(file);
        }
        let path = self
            .path
            .clone()
            .unwrap_or_else(|| self.dir.join(&self.file_name));
        if let Some(file) = self.file.as_mut() {
            file.write_all(&self.pending)
                .and_then(|()| file.flush())
                .map_err(|e| (path, e))?;
        }
        self.pending.clear();
        Ok(())
    }

    /// Closes the file; buffered bytes that were never flushed are discarded.
    pub(crate) fn close(&mut self) {
        if let Some(mut file) = self.file.take()
            && let Err(error) = file.flush()
        {
            warn!(%error, "error closing body file");
        }
    }

    /// Drops buffered bytes and closes the file, keeping the target name.
    pub(crate) fn reset(&mut self) {
        self.pending.clear();
        self.close();
        self.path = None;
    }
}

/// Derives a file name from the last path segment of `url`.
pub(crate) fn file_name_from_url(url: &str) -> String {
    let path = Url::parse(url).map_or_else(
        |_| url.split(['?', '#']).next().unwrap_or_default().to_string(),
        |parsed| parsed.path().to_string(),
    );
    let last = path.rsplit('/').next().unwrap_or_default();
    if last.is_empty() {
        return DEFAULT_FILE_NAME.to_string();
    }
    sanitize_file_name(last)
}

/// Replaces characters that are invalid on common filesystems.
pub(crate) fn sanitize_file_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let safe = !Path::new(&sanitized).components().any(|component| {
        matches!(
            component,
            Component::CurDir | Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if sanitized.is_empty() || sanitized.trim_matches('_').is_empty() || !safe {
        DEFAULT_FILE_NAME.to_string()
    } else {
        sanitized
    }
}

/// First of `name`, `name.1`, `name.2`, ... that does not exist in `dir`.
pub(crate) fn resolve_unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let base = dir.join(file_name);
    if !base.exists() {
        return base;
    }
    for i in 1..MAX_SUFFIX {
        let candidate = dir.join(format!("{file_name}.{i}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    dir.join(format!("{file_name}.{MAX_SUFFIX}"))
}
