//! checkface-core — Domain types and capability contracts.
//!
//! Holds the records shared by every other crate (enrolled identities and
//! check-in events) plus the traits for the collaborators the workflow
//! consumes but does not implement: the face matcher, the admin gate and
//! the wall clock.

pub mod auth;
pub mod clock;
pub mod matcher;
pub mod types;

pub use auth::{AdminGate, DenyAll};
pub use clock::{Clock, SystemClock};
pub use matcher::{search, CorpusEntry, Match, Matcher, MatcherError, Verification};
pub use types::{CheckInEvent, DailyCount, FaceRecord, IdentityKey};
