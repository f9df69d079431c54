use crate::error::ServiceError;
use checkface_core::DailyCount;
use checkface_store::AttendanceLedger;
use chrono::{Days, NaiveDate};
use std::collections::HashMap;

/// Daily check-in counts over a trailing window.
pub struct ReportAggregator {
    ledger: AttendanceLedger,
}

impl ReportAggregator {
    pub const DEFAULT_WINDOW: u32 = 3;

    pub fn new(ledger: AttendanceLedger) -> Self {
        Self { ledger }
    }

    /// Counts for the `window` days ending at `anchor` (inclusive), oldest
    /// first. Always exactly `window` entries; days without check-ins are 0.
    pub fn recent_counts(&self, window: u32, anchor: NaiveDate) -> Result<Vec<DailyCount>, ServiceError> {
        if window == 0 {
            return Ok(Vec::new());
        }

        let from = anchor
            .checked_sub_days(Days::new(u64::from(window - 1)))
            .ok_or_else(|| ServiceError::Validation(format!("window of {window} days is out of range")))?;

        let observed = self.ledger.counts_by_date(from, anchor)?;
        Ok(fill_series(from, window, &observed))
    }
}

/// Lay `observed` counts over a dense run of `window` dates starting at `from`.
pub fn fill_series(from: NaiveDate, window: u32, observed: &[(NaiveDate, u32)]) -> Vec<DailyCount> {
    let counts: HashMap<NaiveDate, u32> = observed.iter().copied().collect();
    from.iter_days()
        .take(window as usize)
        .map(|date| DailyCount {
            date,
            count: counts.get(&date).copied().unwrap_or(0),
        })
        .collect()
}
