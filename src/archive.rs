//! Canonical tar archive helpers.
//!
//! Every archive the lane writes is deterministic: entries sorted by path,
//! epoch timestamps, zeroed ownership, normalized modes. Merging copies
//! entry bytes verbatim — already-packed content is never re-encoded.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tar::{Archive, Builder, Header};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors from archive assembly and extraction
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("entry collision: {path:?} from {first} and {second}")]
    Collision {
        path: String,
        first: String,
        second: String,
    },

    #[error("path is not valid UTF-8: {0}")]
    NonUtf8Path(PathBuf),
}

/// In-memory archive under assembly.
///
/// Entries are keyed by archive path; the map keeps output order stable.
/// Adding the same path twice is tolerated only when the bytes are
/// identical; diverging content is a collision.
pub struct ArchiveWriter {
    entries: BTreeMap<String, (Vec<u8>, String)>,
}

impl Default for ArchiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Drop an entry; returns whether it was present
    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Add one entry. `origin` names the contributing source for collision
    /// diagnostics.
    pub fn add_bytes(
        &mut self,
        path: &str,
        bytes: Vec<u8>,
        origin: &str,
    ) -> Result<(), ArchiveError> {
        if let Some((existing, first)) = self.entries.get(path) {
            if existing == &bytes {
                return Ok(());
            }
            return Err(ArchiveError::Collision {
                path: path.to_string(),
                first: first.clone(),
                second: origin.to_string(),
            });
        }
        self.entries
            .insert(path.to_string(), (bytes, origin.to_string()));
        Ok(())
    }

    /// Add every file under `root`, keyed by its path relative to `root`
    pub fn add_dir_contents(&mut self, root: &Path, origin: &str) -> Result<(), ArchiveError> {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .expect("walked path is under root");
            let rel = rel
                .to_str()
                .ok_or_else(|| ArchiveError::NonUtf8Path(rel.to_path_buf()))?
                .to_string();
            let bytes = fs::read(entry.path())?;
            self.add_bytes(&rel, bytes, origin)?;
        }
        Ok(())
    }

    /// Unpack another archive into this one, entry bytes verbatim
    pub fn add_archive_contents(&mut self, path: &Path, origin: &str) -> Result<(), ArchiveError> {
        for (entry_path, bytes) in read_entries(path)? {
            self.add_bytes(&entry_path, bytes, origin)?;
        }
        Ok(())
    }

    /// Write the canonical archive. The file appears atomically: bytes go
    /// to a sibling temp file first, renamed only on success.
    pub fn write_to(&self, target: &Path) -> Result<(), ArchiveError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp = temp_sibling(target);
        let result = (|| -> Result<(), ArchiveError> {
            let file = File::create(&temp)?;
            let mut builder = Builder::new(file);

            for (path, (bytes, _)) in &self.entries {
                let mut header = Header::new_gnu();
                header.set_path(path)?;
                header.set_size(bytes.len() as u64);
                header.set_mtime(0);
                header.set_uid(0);
                header.set_gid(0);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append(&header, bytes.as_slice())?;
            }

            builder.into_inner()?.sync_all()?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                fs::rename(&temp, target)?;
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(&temp);
                Err(e)
            }
        }
    }
}

/// Read every regular entry of a tar archive into memory, in order
pub fn read_entries(path: &Path) -> Result<Vec<(String, Vec<u8>)>, ArchiveError> {
    let file = File::open(path)?;
    let mut archive = Archive::new(file);
    let mut out = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path()?;
        let entry_path = entry_path
            .to_str()
            .ok_or_else(|| ArchiveError::NonUtf8Path(entry_path.to_path_buf()))?
            .to_string();
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        out.push((entry_path, bytes));
    }

    Ok(out)
}

fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive");
    target.with_file_name(format!(".{name}.part"))
}
