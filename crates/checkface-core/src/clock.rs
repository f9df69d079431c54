use chrono::{Local, NaiveDate, NaiveDateTime, Timelike};

/// Source of "now" for check-in timestamps and report anchors.
pub trait Clock: Send + Sync {
    /// Local wall-clock time, truncated to whole seconds.
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// The host's local clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        let now = Local::now().naive_local();
        // Stored as `YYYY-MM-DD HH:MM:SS`; drop sub-second precision up front.
        now.with_nanosecond(0).unwrap_or(now)
    }
}
