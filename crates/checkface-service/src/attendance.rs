//! Attendance check-in.
//!
//! One check runs `Idle → Capturing → Matching` and then settles in one of
//! `Recording`, `NotMatched` or `DetectionFailed` before returning to
//! `Idle`. The steps are exposed separately ([`AttendanceService::capture`],
//! [`AttendanceService::begin_match`], [`AttendanceService::resolve`]) so
//! the matcher can run elsewhere; [`AttendanceService::check_in`] chains
//! them inline.

use crate::error::ServiceError;
use crate::policy::CheckInPolicy;
use checkface_capture::{Frame, FrameSource};
use checkface_core::{CheckInEvent, Clock, CorpusEntry, IdentityKey, Match, Matcher, MatcherError};
use checkface_store::{AttendanceLedger, FaceCorpus};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceState {
    Idle,
    Capturing,
    Matching,
    Recording,
    NotMatched,
    DetectionFailed,
}

/// Result of one check-in attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// The frame source had nothing to offer.
    NoFrame,
    CheckedIn { event: CheckInEvent, score: f32 },
    /// Matched, but the once-per-day policy suppressed the event.
    AlreadyCheckedIn { key: IdentityKey, score: f32 },
    NotMatched,
    NoFaceDetected,
}

pub struct AttendanceService {
    ledger: AttendanceLedger,
    corpus: Arc<FaceCorpus>,
    clock: Arc<dyn Clock>,
    policy: CheckInPolicy,
    state: AttendanceState,
}

impl AttendanceService {
    pub fn new(
        ledger: AttendanceLedger,
        corpus: Arc<FaceCorpus>,
        clock: Arc<dyn Clock>,
        policy: CheckInPolicy,
    ) -> Self {
        Self {
            ledger,
            corpus,
            clock,
            policy,
            state: AttendanceState::Idle,
        }
    }

    pub fn state(&self) -> AttendanceState {
        self.state
    }

    /// Capture, match and record in one go, running the matcher on the
    /// calling thread.
    pub fn check_in(
        &mut self,
        source: &mut dyn FrameSource,
        matcher: &mut dyn Matcher,
    ) -> Result<CheckOutcome, ServiceError> {
        let Some(frame) = self.capture(source) else {
            return Ok(CheckOutcome::NoFrame);
        };
        let corpus = self.begin_match()?;
        let result = matcher.find(&frame.image, &corpus);
        self.resolve(result)
    }

    /// Pull one frame. On `None` the service is back to `Idle`.
    pub fn capture(&mut self, source: &mut dyn FrameSource) -> Option<Frame> {
        self.transition(AttendanceState::Capturing);
        match source.next_frame() {
            Some(frame) => {
                tracing::debug!(seq = frame.sequence, "frame captured");
                Some(frame)
            }
            None => {
                self.transition(AttendanceState::Idle);
                None
            }
        }
    }

    /// Enter `Matching` and snapshot the corpus to search.
    pub fn begin_match(&mut self) -> Result<Vec<CorpusEntry>, ServiceError> {
        self.transition(AttendanceState::Matching);
        match self.corpus.entries() {
            Ok(entries) => {
                tracing::debug!(entries = entries.len(), "corpus snapshot");
                Ok(entries)
            }
            Err(e) => {
                self.transition(AttendanceState::Idle);
                Err(e.into())
            }
        }
    }

    /// Act on the matcher's verdict and return to `Idle`.
    pub fn resolve(
        &mut self,
        result: Result<Vec<Match>, MatcherError>,
    ) -> Result<CheckOutcome, ServiceError> {
        let outcome = match result {
            Err(MatcherError::NoFaceDetected) => {
                self.transition(AttendanceState::DetectionFailed);
                Ok(CheckOutcome::NoFaceDetected)
            }
            Err(e) => Err(ServiceError::Matcher(e.to_string())),
            Ok(matches) => match matches.into_iter().next() {
                None => {
                    self.transition(AttendanceState::NotMatched);
                    Ok(CheckOutcome::NotMatched)
                }
                Some(top) => {
                    self.transition(AttendanceState::Recording);
                    self.record(top)
                }
            },
        };
        self.transition(AttendanceState::Idle);
        outcome
    }

    fn record(&self, top: Match) -> Result<CheckOutcome, ServiceError> {
        let now = self.clock.now();
        let Match { key, score, .. } = top;

        if self.policy == CheckInPolicy::OncePerDay
            && self.ledger.has_checked_in_on(key.user_id, now.date())?
        {
            tracing::info!(user_id = key.user_id, name = %key.name, "already checked in today");
            return Ok(CheckOutcome::AlreadyCheckedIn { key, score });
        }

        let event = CheckInEvent {
            name: key.name,
            user_id: key.user_id,
            timestamp: now,
        };
        self.ledger.append(&event)?;
        tracing::info!(user_id = event.user_id, name = %event.name, score, "checked in");
        Ok(CheckOutcome::CheckedIn { event, score })
    }

    fn transition(&mut self, next: AttendanceState) {
        tracing::debug!(from = ?self.state, to = ?next, "attendance state");
        self.state = next;
    }
}
