use std::borrow::Cow;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::StoreError;

use super::{Store, StoreKey, StoreLine};

/// `Store` backed by a directory tree, one text file per key.
///
/// `<root>/<day>/<service>/<method>/<role>/<peer>/<role>.<metric>`
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`.
    pub fn path_of(&self, key: &StoreKey) -> PathBuf {
        let mut path = self.root.clone();
        for seg in key.segments() {
            path.push(component(&seg).as_ref());
        }
        path
    }

    fn dir_of(&self, prefix: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        for seg in prefix {
            path.push(component(seg).as_ref());
        }
        path
    }
}

/// Keeps a key segment a single, non-special path component.
fn component(seg: &str) -> Cow<'_, str> {
    match seg {
        "" => Cow::Borrowed("_"),
        "." | ".." => Cow::Owned(seg.replace('.', "_")),
        _ if seg.contains(['/', '\\']) => Cow::Owned(seg.replace(['/', '\\'], "_")),
        _ => Cow::Borrowed(seg),
    }
}

impl Store for FsStore {
    fn append(&self, key: &StoreKey, line: StoreLine) -> Result<(), StoreError> {
        let path = self.path_of(key);
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        let append_err = |source| StoreError::Append {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(append_err)?;
        // Single write so a concurrent reader sees either nothing or the full line.
        file.write_all(format!("{line}\n").as_bytes())
            .map_err(append_err)?;
        file.flush().map_err(append_err)?;
        Ok(())
    }

    fn read(&self, key: &StoreKey) -> Result<Vec<StoreLine>, StoreError> {
        let path = self.path_of(key);
        let read_err = |source| StoreError::Read {
            path: path.clone(),
            source,
        };
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(read_err(e)),
        };

        let mut reader = BufReader::new(file);
        let mut lines = Vec::new();
        let mut buf = Vec::with_capacity(32);
        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf).map_err(read_err)?;
            if n == 0 {
                break;
            }
            // No terminator: the writer is mid-append.
            if buf.last() != Some(&b'\n') {
                break;
            }
            let parsed = std::str::from_utf8(&buf).ok().and_then(StoreLine::parse);
            match parsed {
                Some(line) => lines.push(line),
                None => tracing::debug!(path = %path.display(), "skipping malformed line"),
            }
        }
        Ok(lines)
    }

    fn children(&self, prefix: &[&str]) -> Result<Vec<String>, StoreError> {
        let dir = self.dir_of(prefix);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::List { path: dir, source }),
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn modified(&self, key: &StoreKey) -> Option<SystemTime> {
        fs::metadata(self.path_of(key))
            .and_then(|m| m.modified())
            .ok()
    }
}
