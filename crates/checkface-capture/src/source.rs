//! Frame sources.
//!
//! A source either yields a usable frame or nothing. Failures are logged
//! and swallowed: a missing frame has no consequence beyond "try again".

use crate::frame::{has_image_extension, Frame};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Periodically polled producer of frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Option<Frame>;
}

/// Yields the same image file on every poll.
///
/// Used for one-shot captures such as an enrollment photo given on the
/// command line.
pub struct StillImageSource {
    path: PathBuf,
    sequence: u32,
}

impl StillImageSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sequence: 0,
        }
    }
}

impl FrameSource for StillImageSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.sequence = self.sequence.wrapping_add(1);
        load_usable(&self.path, self.sequence)
    }
}

/// Yields each new image dropped into a directory exactly once, in file
/// name order.
///
/// Consumed names are forgotten once their file leaves the inbox, so a
/// capture tool that clears or rotates the directory keeps the bookkeeping
/// bounded, and a name reused after removal counts as a new frame.
pub struct InboxSource {
    dir: PathBuf,
    seen: HashSet<PathBuf>,
    sequence: u32,
}

impl InboxSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            seen: HashSet::new(),
            sequence: 0,
        }
    }

    /// Mark every image currently in the inbox as consumed.
    ///
    /// Called on startup so frames left over from a previous run are not
    /// treated as fresh captures.
    pub fn skip_existing(&mut self) {
        self.seen = self.listing();
    }

    fn listing(&self) -> HashSet<PathBuf> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "cannot read inbox");
                return HashSet::new();
            }
        };

        entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && has_image_extension(p))
            .collect()
    }

    fn next_pending(&mut self) -> Option<PathBuf> {
        let listing = self.listing();
        self.seen.retain(|p| listing.contains(p));
        listing.into_iter().filter(|p| !self.seen.contains(p)).min()
    }
}

impl FrameSource for InboxSource {
    fn next_frame(&mut self) -> Option<Frame> {
        let path = self.next_pending()?;
        self.seen.insert(path.clone());
        self.sequence = self.sequence.wrapping_add(1);
        load_usable(&path, self.sequence)
    }
}

fn load_usable(path: &Path, sequence: u32) -> Option<Frame> {
    let frame = match Frame::load(path, sequence) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "frame unavailable");
            return None;
        }
    };

    if frame.is_dark {
        tracing::debug!(seq = sequence, path = %path.display(), "skipping dark frame");
        return None;
    }

    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn write_image(path: &Path, value: u8) {
        RgbImage::from_pixel(8, 8, Rgb([value, value, value]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn test_still_image_repeats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("me.png");
        write_image(&path, 180);

        let mut source = StillImageSource::new(&path);
        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert_eq!(a.sequence + 1, b.sequence);
    }

    #[test]
    fn test_still_image_missing() {
        let mut source = StillImageSource::new("/nonexistent/me.png");
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_dark_frame_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dark.png");
        write_image(&path, 2);

        let mut source = StillImageSource::new(&path);
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_inbox_yields_each_file_once() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("001.png"), 180);
        write_image(&dir.path().join("002.png"), 180);
        std::fs::write(dir.path().join("readme.txt"), b"ignored").unwrap();

        let mut source = InboxSource::new(dir.path());
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_none());

        write_image(&dir.path().join("003.png"), 180);
        assert!(source.next_frame().is_some());
    }

    #[test]
    fn test_inbox_skip_existing() {
        let dir = tempfile::tempdir().unwrap();
        write_image(&dir.path().join("old.png"), 180);

        let mut source = InboxSource::new(dir.path());
        source.skip_existing();
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_inbox_forgets_removed_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("001.png");
        write_image(&first, 180);
        write_image(&dir.path().join("002.png"), 180);

        let mut source = InboxSource::new(dir.path());
        assert_eq!(source.next_frame().unwrap().sequence, 1);
        std::fs::remove_file(&first).unwrap();

        assert!(source.next_frame().is_some());
        assert!(source.next_frame().is_none());
        assert_eq!(source.seen.len(), 1);

        std::fs::remove_file(dir.path().join("002.png")).unwrap();
        assert!(source.next_frame().is_none());
        assert!(source.seen.is_empty());

        // Same name dropped again after removal is a new frame.
        write_image(&first, 180);
        assert!(source.next_frame().is_some());
    }

    #[test]
    fn test_inbox_missing_dir() {
        let mut source = InboxSource::new("/nonexistent/inbox");
        assert!(source.next_frame().is_none());
    }
}
