//! Stand-ins for the external collaborators, shared by unit tests.

use checkface_capture::{Frame, FrameSource};
use checkface_core::{Clock, CorpusEntry, Match, Matcher, MatcherError, Verification};
use checkface_store::{Database, FaceCorpus};
use chrono::{NaiveDate, NaiveDateTime};
use image::{Rgb, RgbImage};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct FixedClock(pub Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn at(date: NaiveDate, hour: u32) -> Arc<Self> {
        Arc::new(Self(Mutex::new(date.and_hms_opt(hour, 0, 0).unwrap())))
    }

    pub fn set(&self, t: NaiveDateTime) {
        *self.0.lock().unwrap() = t;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

pub fn frame(value: u8) -> Frame {
    Frame::new(RgbImage::from_pixel(8, 8, Rgb([value, value, value])), 0)
}

/// Frame source that plays back a fixed script; `None` entries are
/// capture failures.
pub struct ScriptedSource(pub VecDeque<Option<Frame>>);

impl ScriptedSource {
    pub fn frames(n: usize) -> Self {
        Self((0..n).map(|_| Some(frame(180))).collect())
    }
}

impl FrameSource for ScriptedSource {
    fn next_frame(&mut self) -> Option<Frame> {
        self.0.pop_front().flatten()
    }
}

/// What the fake matcher answers to `find`.
#[derive(Clone)]
pub enum Verdict {
    /// Match every corpus entry whose key name equals this one.
    Name(&'static str),
    Nobody,
    NoFace,
    Broken,
}

pub struct FakeMatcher {
    pub verdict: Verdict,
    pub delay: std::time::Duration,
}

impl FakeMatcher {
    pub fn new(verdict: Verdict) -> Self {
        Self {
            verdict,
            delay: std::time::Duration::ZERO,
        }
    }
}

impl Matcher for FakeMatcher {
    fn verify(&mut self, _probe: &RgbImage, candidate: &Path) -> Result<Verification, MatcherError> {
        let stem = candidate.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        match &self.verdict {
            Verdict::Name(name) => Ok(Verification {
                matched: stem.starts_with(&format!("{name}_")),
                score: 0.9,
            }),
            Verdict::Nobody => Ok(Verification { matched: false, score: 0.1 }),
            Verdict::NoFace => Err(MatcherError::NoFaceDetected),
            Verdict::Broken => Err(MatcherError::Failed("model crashed".into())),
        }
    }

    fn find(&mut self, probe: &RgbImage, corpus: &[CorpusEntry]) -> Result<Vec<Match>, MatcherError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        match self.verdict {
            Verdict::NoFace => Err(MatcherError::NoFaceDetected),
            Verdict::Broken => Err(MatcherError::Failed("model crashed".into())),
            _ => {
                let mut out = Vec::new();
                for entry in corpus {
                    let v = self.verify(probe, &entry.path)?;
                    if v.matched {
                        out.push(Match {
                            key: entry.key.clone(),
                            path: entry.path.clone(),
                            score: v.score,
                        });
                    }
                }
                Ok(out)
            }
        }
    }
}

/// Temporary database + corpus pair.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub db: Database,
    pub corpus: Arc<FaceCorpus>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let corpus = Arc::new(FaceCorpus::open(dir.path().join("face_list"), "jpg").unwrap());
        Self { dir, db, corpus }
    }

    pub fn corpus_files(&self) -> usize {
        std::fs::read_dir(self.corpus.root()).unwrap().count()
    }
}
