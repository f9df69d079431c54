use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The `(name, user_id)` pair naming one enrolled person.
///
/// `user_id` is the durable unique key; the pair is what the photo corpus
/// is addressed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub name: String,
    pub user_id: i64,
}

impl IdentityKey {
    pub fn new(name: impl Into<String>, user_id: i64) -> Self {
        Self {
            name: name.into(),
            user_id,
        }
    }

    /// File stem used by the photo corpus: `<name>_<user_id>`.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.name, self.user_id)
    }

    /// Parse a corpus file stem back into a key.
    ///
    /// Splits at the last underscore so names that themselves contain
    /// underscores survive the round trip.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let (name, id) = stem.rsplit_once('_')?;
        if name.is_empty() {
            return None;
        }
        let user_id = id.parse().ok()?;
        Some(Self::new(name, user_id))
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.name, self.user_id)
    }
}

/// An enrolled identity. Row of `face_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRecord {
    pub name: String,
    pub user_id: i64,
    /// Corpus file backing this identity. Must exist while the record does.
    pub photo_path: PathBuf,
}

impl FaceRecord {
    pub fn key(&self) -> IdentityKey {
        IdentityKey::new(self.name.clone(), self.user_id)
    }
}

/// One recorded attendance event. Row of `check_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInEvent {
    pub name: String,
    pub user_id: i64,
    /// Local wall-clock time of the check-in.
    pub timestamp: NaiveDateTime,
}

impl CheckInEvent {
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Number of check-ins on one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u32,
}
