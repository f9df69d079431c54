//! Match worker.
//!
//! The matcher is the only slow, blocking step of a check-in, so it lives
//! on a dedicated OS thread and is driven over a channel. Every request is
//! numbered; submitting a new one makes all earlier ones stale. The worker
//! skips stale requests it has not started yet, as well as requests whose
//! caller already stopped waiting, and a stale reply is never handed back
//! to the caller. Waiting for a reply is bounded by a timeout.

use checkface_core::{CorpusEntry, Match, Matcher, MatcherError};
use image::RgbImage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Matcher(#[from] MatcherError),
    #[error("match timed out after {0:?}")]
    Timeout(Duration),
    #[error("superseded by a newer match request")]
    Stale,
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
}

/// Message sent from the orchestrator to the engine thread.
struct MatchRequest {
    generation: u64,
    probe: RgbImage,
    corpus: Vec<CorpusEntry>,
    reply: oneshot::Sender<Result<Vec<Match>, EngineError>>,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<MatchRequest>,
    latest: Arc<AtomicU64>,
    timeout: Duration,
}

impl EngineHandle {
    /// Queue a match of `probe` against `corpus`. Any request submitted
    /// earlier becomes stale.
    pub async fn submit(&self, probe: RgbImage, corpus: Vec<CorpusEntry>) -> Result<PendingMatch, EngineError> {
        let generation = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(MatchRequest {
                generation,
                probe,
                corpus,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;

        tracing::debug!(generation, "match submitted");
        Ok(PendingMatch {
            generation,
            reply: reply_rx,
            latest: self.latest.clone(),
            timeout: self.timeout,
        })
    }

    /// Submit and wait for the result.
    pub async fn find(&self, probe: RgbImage, corpus: Vec<CorpusEntry>) -> Result<Vec<Match>, EngineError> {
        self.submit(probe, corpus).await?.wait().await
    }
}

/// A submitted match awaiting its reply.
pub struct PendingMatch {
    generation: u64,
    reply: oneshot::Receiver<Result<Vec<Match>, EngineError>>,
    latest: Arc<AtomicU64>,
    timeout: Duration,
}

impl PendingMatch {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the reply, at most the configured timeout.
    ///
    /// Returns [`EngineError::Stale`] if the request was superseded while
    /// it was queued or running.
    pub async fn wait(self) -> Result<Vec<Match>, EngineError> {
        let reply = match tokio::time::timeout(self.timeout, self.reply).await {
            Err(_) => return Err(EngineError::Timeout(self.timeout)),
            Ok(Err(_)) => return Err(EngineError::ChannelClosed),
            Ok(Ok(reply)) => reply,
        };

        if self.latest.load(Ordering::SeqCst) != self.generation {
            tracing::debug!(generation = self.generation, "discarding stale match reply");
            return Err(EngineError::Stale);
        }
        reply
    }
}

/// Spawn the engine on a dedicated OS thread, taking ownership of the matcher.
pub fn spawn_engine(
    mut matcher: Box<dyn Matcher>,
    timeout: Duration,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<MatchRequest>(4);
    let latest = Arc::new(AtomicU64::new(0));
    let worker_latest = latest.clone();

    std::thread::Builder::new()
        .name("checkface-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                if req.generation < worker_latest.load(Ordering::SeqCst) {
                    tracing::debug!(generation = req.generation, "skipping stale match request");
                    let _ = req.reply.send(Err(EngineError::Stale));
                    continue;
                }
                if req.reply.is_closed() {
                    tracing::debug!(generation = req.generation, "requester gone before start; skipping");
                    continue;
                }

                let result = matcher
                    .find(&req.probe, &req.corpus)
                    .map_err(EngineError::from);
                if req.reply.send(result).is_err() {
                    tracing::debug!(generation = req.generation, "requester gone; match result dropped");
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        latest,
        timeout,
    })
}
