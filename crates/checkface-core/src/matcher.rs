//! Face matcher contract.
//!
//! The matcher itself is an external capability (an embedding model, a
//! helper program, a remote service). The workflow only needs `verify` and
//! `find`; implementors that can only verify pairs get `find` for free.

use crate::types::IdentityKey;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatcherError {
    /// The probe image contains no detectable face.
    #[error("no face detected")]
    NoFaceDetected,
    #[error("matcher unavailable: {0}")]
    Unavailable(String),
    #[error("matcher failed: {0}")]
    Failed(String),
}

/// Outcome of comparing a probe against one candidate photo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    pub matched: bool,
    /// Confidence of the comparison. Higher = more similar.
    pub score: f32,
}

/// One photo of the corpus, as handed to the matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusEntry {
    pub key: IdentityKey,
    pub path: PathBuf,
}

/// A corpus entry the probe matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub key: IdentityKey,
    pub path: PathBuf,
    pub score: f32,
}

/// Strategy for matching a probe frame against enrolled photos.
pub trait Matcher: Send {
    /// Compare the probe against a single candidate photo.
    fn verify(&mut self, probe: &RgbImage, candidate: &Path) -> Result<Verification, MatcherError>;

    /// Search the corpus for the probe, best match first. An empty list
    /// means nobody matched.
    ///
    /// The default verifies every entry through [`search`].
    fn find(&mut self, probe: &RgbImage, corpus: &[CorpusEntry]) -> Result<Vec<Match>, MatcherError> {
        search(corpus, |candidate| self.verify(probe, candidate))
    }
}

/// Run `verify` over every corpus entry and rank the hits.
///
/// A missing face in the probe or an unavailable matcher aborts the
/// search; any other per-entry fault is logged and the entry skipped.
pub fn search(
    corpus: &[CorpusEntry],
    mut verify: impl FnMut(&Path) -> Result<Verification, MatcherError>,
) -> Result<Vec<Match>, MatcherError> {
    let mut matches = Vec::new();

    for entry in corpus {
        match verify(&entry.path) {
            Ok(v) if v.matched => matches.push(Match {
                key: entry.key.clone(),
                path: entry.path.clone(),
                score: v.score,
            }),
            Ok(_) => {}
            Err(e @ (MatcherError::NoFaceDetected | MatcherError::Unavailable(_))) => return Err(e),
            Err(e) => {
                tracing::warn!(
                    path = %entry.path.display(),
                    error = %e,
                    "verify failed; skipping corpus entry"
                );
            }
        }
    }

    rank(&mut matches);
    Ok(matches)
}

/// Sort matches by descending score.
pub fn rank(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
}
