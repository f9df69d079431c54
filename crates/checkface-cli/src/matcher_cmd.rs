//! Matcher backed by an external program.
//!
//! The program is run once per corpus photo as
//! `<program> [args..] <probe> <candidate>` and must print one JSON object:
//! `{"verified": true, "score": 0.91}` or `{"error": "no_face"}`.
//!
//! The configured command line is split on whitespace with no quoting, so a
//! program path containing spaces has to be wrapped in a script.
//!
//! A whole search shares one deadline. A helper still running when it
//! passes is killed and the search ends as unavailable.

use checkface_core::{search, CorpusEntry, Match, Matcher, MatcherError, Verification};
use image::{ImageFormat, RgbImage};
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::runtime::Runtime;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Reply {
    Verdict { verified: bool, score: f32 },
    Error { error: String },
}

pub struct CommandMatcher {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    /// Built on first use, on the thread that drives the matcher.
    runtime: Option<Runtime>,
}

impl CommandMatcher {
    /// Split a configured command line into program and leading arguments.
    pub fn from_command_line(line: &str, timeout: Duration) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout,
            runtime: None,
        })
    }

    fn with_runtime<T>(&mut self, f: impl FnOnce(&Self, &Runtime) -> T) -> Result<T, MatcherError> {
        let rt = match self.runtime.take() {
            Some(rt) => rt,
            None => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| MatcherError::Unavailable(format!("cannot start process runtime: {e}")))?,
        };
        let out = f(self, &rt);
        self.runtime = Some(rt);
        Ok(out)
    }

    fn run(&self, rt: &Runtime, probe: &Path, candidate: &Path, deadline: Instant) -> Result<Verification, MatcherError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(self.timed_out());
        }

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).arg(probe).arg(candidate).kill_on_drop(true);

        // Dropping the output future on timeout kills the child.
        let output = match rt.block_on(async { tokio::time::timeout(remaining, cmd.output()).await }) {
            Err(_) => {
                tracing::warn!(program = %self.program, candidate = %candidate.display(), "matcher killed at deadline");
                return Err(self.timed_out());
            }
            Ok(spawned) => spawned.map_err(|e| MatcherError::Unavailable(format!("{}: {e}", self.program)))?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MatcherError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let verdict = parse_reply(&String::from_utf8_lossy(&output.stdout))?;
        tracing::debug!(
            candidate = %candidate.display(),
            matched = verdict.matched,
            score = verdict.score,
            "verified"
        );
        Ok(verdict)
    }

    fn timed_out(&self) -> MatcherError {
        MatcherError::Unavailable(format!("{} did not answer within {:?}", self.program, self.timeout))
    }
}

impl Matcher for CommandMatcher {
    fn verify(&mut self, probe: &RgbImage, candidate: &Path) -> Result<Verification, MatcherError> {
        let file = write_frame_png(probe)?;
        let deadline = Instant::now() + self.timeout;
        self.with_runtime(|m, rt| m.run(rt, file.path(), candidate, deadline))?
    }

    fn find(&mut self, probe: &RgbImage, corpus: &[CorpusEntry]) -> Result<Vec<Match>, MatcherError> {
        if corpus.is_empty() {
            return Ok(Vec::new());
        }
        let file = write_frame_png(probe)?;
        let deadline = Instant::now() + self.timeout;
        self.with_runtime(|m, rt| search(corpus, |candidate| m.run(rt, file.path(), candidate, deadline)))?
    }
}

fn write_frame_png(probe: &RgbImage) -> Result<NamedTempFile, MatcherError> {
    let file = tempfile::Builder::new()
        .prefix("checkface-frame-")
        .suffix(".png")
        .tempfile()
        .map_err(|e| MatcherError::Failed(format!("cannot create frame file: {e}")))?;
    probe
        .save_with_format(file.path(), ImageFormat::Png)
        .map_err(|e| MatcherError::Failed(format!("cannot write frame file: {e}")))?;
    Ok(file)
}

fn parse_reply(stdout: &str) -> Result<Verification, MatcherError> {
    let reply: Reply = serde_json::from_str(stdout.trim())
        .map_err(|e| MatcherError::Failed(format!("unreadable matcher output: {e}")))?;
    match reply {
        Reply::Verdict { verified, score } => Ok(Verification {
            matched: verified,
            score,
        }),
        Reply::Error { error } if error == "no_face" => Err(MatcherError::NoFaceDetected),
        Reply::Error { error } => Err(MatcherError::Failed(error)),
    }
}
