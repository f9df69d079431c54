//! Directory of identity photos.
//!
//! Each identity owns exactly one file, `<root>/<name>_<user_id>.<ext>`.
//! The path is derived from the identity alone, so the directory needs no
//! index. Replacement photos go through a hidden staging file that is
//! renamed over the final path once the caller has updated its records.

use crate::db::StoreError;
use checkface_capture::frame::has_image_extension;
use checkface_capture::{Frame, IMAGE_EXTENSIONS};
use checkface_core::{CorpusEntry, IdentityKey};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const STAGING_PREFIX: &str = ".staging-";

pub struct FaceCorpus {
    root: PathBuf,
    extension: String,
}

impl FaceCorpus {
    /// Open the corpus at `root`, creating the directory if needed.
    ///
    /// `extension` must be one of [`IMAGE_EXTENSIONS`], the set
    /// [`FaceCorpus::entries`] lists. Staging files left behind by an
    /// interrupted update are removed.
    pub fn open(root: impl Into<PathBuf>, extension: &str) -> Result<Self, StoreError> {
        let root = root.into();
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if !IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            return Err(StoreError::UnsupportedExtension(extension));
        }

        std::fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;

        let corpus = Self { root, extension };
        let swept = corpus.sweep_staging()?;
        if swept > 0 {
            tracing::warn!(count = swept, root = %corpus.root.display(), "removed stale staging photos");
        }
        Ok(corpus)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic photo path for `key`.
    pub fn path_for(&self, key: &IdentityKey) -> PathBuf {
        self.root.join(format!("{}.{}", key.file_stem(), self.extension))
    }

    pub fn exists(&self, key: &IdentityKey) -> bool {
        self.path_for(key).is_file()
    }

    /// Write `frame` as the photo for `key`, replacing any existing one.
    pub fn write(&self, key: &IdentityKey, frame: &Frame) -> Result<PathBuf, StoreError> {
        self.stage(key, frame)?.commit()
    }

    /// Write `frame` to a staging file next to the photo for `key`.
    ///
    /// Nothing at the final path changes until [`StagedPhoto::commit`].
    /// Dropping the staged photo without committing deletes it.
    pub fn stage(&self, key: &IdentityKey, frame: &Frame) -> Result<StagedPhoto, StoreError> {
        let target = self.path_for(key);
        let staged = self.root.join(format!(
            "{STAGING_PREFIX}{}.{}",
            key.file_stem(),
            self.extension
        ));

        let photo = StagedPhoto {
            staged,
            target,
            done: false,
        };
        frame.save(&photo.staged)?;
        Ok(photo)
    }

    /// Move an existing photo to the path for `key`, replacing whatever
    /// file was there. Returns the new path.
    pub fn relocate(&self, from: &Path, key: &IdentityKey) -> Result<PathBuf, StoreError> {
        let target = self.path_for(key);
        std::fs::rename(from, &target).map_err(|e| StoreError::io(from, e))?;
        Ok(target)
    }

    /// Delete the photo for `key`. Returns false if there was none.
    pub fn remove(&self, key: &IdentityKey) -> Result<bool, StoreError> {
        remove_file_if_present(&self.path_for(key))
    }

    /// Delete a photo by its recorded path. Returns false if there was none.
    pub fn remove_path(&self, path: &Path) -> Result<bool, StoreError> {
        remove_file_if_present(path)
    }

    /// Every photo in the corpus, ordered by file name.
    ///
    /// Files whose name does not parse as `<name>_<user_id>` are skipped.
    pub fn entries(&self) -> Result<Vec<CorpusEntry>, StoreError> {
        let dir = std::fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;

        let mut entries = Vec::new();
        for item in dir {
            let path = item.map_err(|e| StoreError::io(&self.root, e))?.path();
            if !path.is_file() || !has_image_extension(&path) || is_hidden(&path) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match IdentityKey::from_file_stem(stem) {
                Some(key) => entries.push(CorpusEntry { key, path }),
                None => tracing::warn!(path = %path.display(), "corpus file name is not <name>_<id>; skipping"),
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn sweep_staging(&self) -> Result<usize, StoreError> {
        let dir = std::fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut swept = 0;
        for item in dir.flatten() {
            let path = item.path();
            let staged = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(STAGING_PREFIX))
                .unwrap_or(false);
            if staged && remove_file_if_present(&path)? {
                swept += 1;
            }
        }
        Ok(swept)
    }
}

/// A photo written to its staging name, not yet visible at its final path.
pub struct StagedPhoto {
    staged: PathBuf,
    target: PathBuf,
    done: bool,
}

impl StagedPhoto {
    /// Final path the photo will occupy once committed.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Atomically move the staged file over the final path.
    pub fn commit(mut self) -> Result<PathBuf, StoreError> {
        std::fs::rename(&self.staged, &self.target).map_err(|e| StoreError::io(&self.target, e))?;
        self.done = true;
        Ok(self.target.clone())
    }

    /// Throw the staged file away.
    pub fn discard(self) {}
}

impl Drop for StagedPhoto {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if let Err(e) = remove_file_if_present(&self.staged) {
            tracing::warn!(error = %e, "failed to remove staging photo");
        }
    }
}

fn remove_file_if_present(path: &Path) -> Result<bool, StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(false)
}
