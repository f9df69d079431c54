//! checkface-store — Durable state.
//!
//! Three stores, each the sole owner of its data:
//! - [`IdentityStore`]: the `face_list` table of enrolled identities.
//! - [`AttendanceLedger`]: the append-only `check_list` table.
//! - [`FaceCorpus`]: the directory of identity photos, addressed by
//!   `<name>_<user_id>.<ext>`.
//!
//! The two tables share one SQLite [`Database`] so a caller can compose
//! their mutations in a single transaction.

pub mod corpus;
pub mod db;
pub mod identity;
pub mod ledger;

pub use corpus::{FaceCorpus, StagedPhoto};
pub use db::{Database, StoreError};
pub use identity::IdentityStore;
pub use ledger::AttendanceLedger;
