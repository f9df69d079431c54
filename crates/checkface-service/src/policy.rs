//! Enrollment and check-in policy switches.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What counts as "already enrolled" at enrollment time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DedupPolicy {
    /// Reject only an exact `(name, user_id)` repeat. A new name on a taken
    /// id passes this check and is then refused by the identity table.
    #[default]
    NameAndId,
    /// Reject any enrollment whose `user_id` is taken.
    UserIdOnly,
}

/// How many check-ins one identity may record per calendar day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckInPolicy {
    #[default]
    AllowMultiple,
    OncePerDay,
}

impl fmt::Display for DedupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NameAndId => "name-and-id",
            Self::UserIdOnly => "user-id-only",
        })
    }
}

impl fmt::Display for CheckInPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AllowMultiple => "allow-multiple",
            Self::OncePerDay => "once-per-day",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicy(pub String);

impl fmt::Display for UnknownPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown policy: {}", self.0)
    }
}

impl std::error::Error for UnknownPolicy {}

impl FromStr for DedupPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "name-and-id" => Ok(Self::NameAndId),
            "user-id-only" => Ok(Self::UserIdOnly),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl FromStr for CheckInPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "allow-multiple" => Ok(Self::AllowMultiple),
            "once-per-day" => Ok(Self::OncePerDay),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_round_trip() {
        for p in [DedupPolicy::NameAndId, DedupPolicy::UserIdOnly] {
            assert_eq!(p.to_string().parse(), Ok(p));
        }
        assert_eq!(CheckInPolicy::OncePerDay.to_string(), "once-per-day");
    }

    #[test]
    fn test_parse() {
        assert_eq!("user-id-only".parse(), Ok(DedupPolicy::UserIdOnly));
        assert_eq!(" once-per-day ".parse(), Ok(CheckInPolicy::OncePerDay));
        assert!("sometimes".parse::<CheckInPolicy>().is_err());
    }

    #[test]
    fn test_defaults() {
        assert_eq!(DedupPolicy::default(), DedupPolicy::NameAndId);
        assert_eq!(CheckInPolicy::default(), CheckInPolicy::AllowMultiple);
    }
}
