//! checkface-service — The enrollment / check-in / reporting workflow.
//!
//! [`EnrollmentService`] keeps the identity table and the photo corpus in
//! step. [`AttendanceService`] turns a captured frame and a matcher verdict
//! into a ledger entry. [`ReportAggregator`] summarises the ledger. The
//! blocking matcher runs on the [`engine`] worker thread; [`watch`] drives
//! the periodic capture loop around it.

pub mod attendance;
pub mod auth;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod policy;
pub mod report;
pub mod watch;

#[cfg(test)]
pub(crate) mod testing;

pub use attendance::{AttendanceService, AttendanceState, CheckOutcome};
pub use auth::DigestGate;
pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle, PendingMatch};
pub use enrollment::{DeleteSummary, EnrollmentService};
pub use error::{ErrorKind, ServiceError};
pub use policy::{CheckInPolicy, DedupPolicy};
pub use report::ReportAggregator;
pub use watch::{check_once, watch, WatchSummary};
