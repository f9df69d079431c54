//! Periodic capture loop.
//!
//! Polls the frame source on a fixed interval. Each frame that arrives is
//! matched on the engine thread while polling continues; a frame that
//! arrives before the previous match finished supersedes it.

use crate::attendance::{AttendanceService, CheckOutcome};
use crate::engine::{EngineError, EngineHandle};
use crate::error::ServiceError;
use checkface_capture::FrameSource;
use checkface_core::{Match, MatcherError};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

type InFlight = Pin<Box<dyn Future<Output = Result<Vec<Match>, EngineError>> + Send>>;

/// Tally of one watch session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchSummary {
    pub frames: usize,
    pub checked_in: usize,
    pub already_checked_in: usize,
    pub not_matched: usize,
    pub no_face: usize,
    pub superseded: usize,
    pub failures: usize,
}

impl WatchSummary {
    fn record(&mut self, outcome: &CheckOutcome) {
        match outcome {
            CheckOutcome::NoFrame => {}
            CheckOutcome::CheckedIn { .. } => self.checked_in += 1,
            CheckOutcome::AlreadyCheckedIn { .. } => self.already_checked_in += 1,
            CheckOutcome::NotMatched => self.not_matched += 1,
            CheckOutcome::NoFaceDetected => self.no_face += 1,
        }
    }
}

/// Capture one frame and check it in, matching on the engine thread.
pub async fn check_once(
    service: &mut AttendanceService,
    source: &mut dyn FrameSource,
    engine: &EngineHandle,
) -> Result<CheckOutcome, ServiceError> {
    let Some(frame) = service.capture(source) else {
        return Ok(CheckOutcome::NoFrame);
    };
    let corpus = service.begin_match()?;
    let result = engine.find(frame.image, corpus).await;
    service.resolve(into_matcher_result(result))
}

/// Run the capture loop until `shutdown` resolves.
///
/// `on_outcome` sees every settled check. Per-check failures are logged
/// and counted; only loss of the engine thread ends the loop early.
pub async fn watch<S, F>(
    service: &mut AttendanceService,
    source: &mut S,
    engine: &EngineHandle,
    poll_interval: Duration,
    shutdown: impl Future<Output = ()>,
    mut on_outcome: F,
) -> Result<WatchSummary, ServiceError>
where
    S: FrameSource,
    F: FnMut(&CheckOutcome),
{
    let mut summary = WatchSummary::default();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut in_flight: Option<InFlight> = None;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,

            _ = ticker.tick() => {
                let Some(frame) = service.capture(source) else {
                    continue;
                };
                summary.frames += 1;

                let corpus = match service.begin_match() {
                    Ok(corpus) => corpus,
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot read corpus");
                        summary.failures += 1;
                        continue;
                    }
                };

                let pending = engine
                    .submit(frame.image, corpus)
                    .await
                    .map_err(|e| ServiceError::Matcher(e.to_string()))?;
                if in_flight.is_some() {
                    tracing::debug!(generation = pending.generation(), "superseding in-flight match");
                    summary.superseded += 1;
                }
                in_flight = Some(Box::pin(pending.wait()));
            }

            result = async {
                match in_flight.as_mut() {
                    Some(fut) => fut.await,
                    None => std::future::pending().await,
                }
            }, if in_flight.is_some() => {
                in_flight = None;
                if matches!(result, Err(EngineError::Stale)) {
                    continue;
                }
                match service.resolve(into_matcher_result(result)) {
                    Ok(outcome) => {
                        summary.record(&outcome);
                        on_outcome(&outcome);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "check-in failed");
                        summary.failures += 1;
                    }
                }
            }
        }
    }

    tracing::info!(?summary, "watch stopped");
    Ok(summary)
}

fn into_matcher_result(result: Result<Vec<Match>, EngineError>) -> Result<Vec<Match>, MatcherError> {
    result.map_err(|e| match e {
        EngineError::Matcher(inner) => inner,
        other => MatcherError::Unavailable(other.to_string()),
    })
}
