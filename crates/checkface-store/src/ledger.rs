//! `check_list`: append-only attendance log.

use crate::db::{Database, StoreError};
use checkface_core::CheckInEvent;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};

/// Append-only log of check-in events, queryable by calendar date.
///
/// Rows are never updated. They are only removed when their identity is
/// deleted ([`AttendanceLedger::purge_user_on`]).
#[derive(Clone)]
pub struct AttendanceLedger {
    db: Database,
}

impl AttendanceLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn append(&self, event: &CheckInEvent) -> Result<(), StoreError> {
        self.db.with_conn(|c| {
            c.execute(
                "INSERT INTO check_list (name, user_id, time) VALUES (?1, ?2, ?3)",
                params![event.name, event.user_id, event.timestamp],
            )?;
            Ok(())
        })
    }

    /// Events newest first, optionally capped at `limit`.
    pub fn list(&self, limit: Option<usize>) -> Result<Vec<CheckInEvent>, StoreError> {
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        self.query(
            "SELECT name, user_id, time FROM check_list ORDER BY time DESC, rowid DESC LIMIT ?1",
            params![limit],
        )
    }

    /// Events whose local date lies in `[from, to]`, oldest first.
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<CheckInEvent>, StoreError> {
        self.query(
            "SELECT name, user_id, time FROM check_list \
             WHERE date(time) BETWEEN ?1 AND ?2 ORDER BY time, rowid",
            params![from, to],
        )
    }

    pub fn for_user(&self, user_id: i64) -> Result<Vec<CheckInEvent>, StoreError> {
        self.query(
            "SELECT name, user_id, time FROM check_list WHERE user_id = ?1 ORDER BY time, rowid",
            params![user_id],
        )
    }

    /// Number of events per date in `[from, to]`. Dates without events are absent.
    pub fn counts_by_date(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, u32)>, StoreError> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT date(time) AS day, COUNT(*) FROM check_list \
                 WHERE date(time) BETWEEN ?1 AND ?2 GROUP BY day ORDER BY day",
            )?;
            let rows = stmt.query_map(params![from, to], |r| {
                Ok((r.get::<_, NaiveDate>(0)?, r.get::<_, i64>(1)? as u32))
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    pub fn has_checked_in_on(&self, user_id: i64, date: NaiveDate) -> Result<bool, StoreError> {
        self.db.with_conn(|c| {
            let n: i64 = c.query_row(
                "SELECT COUNT(*) FROM check_list WHERE user_id = ?1 AND date(time) = ?2",
                params![user_id, date],
                |r| r.get(0),
            )?;
            Ok(n > 0)
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|c| {
            let n: i64 = c.query_row("SELECT COUNT(*) FROM check_list", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }

    pub fn purge_user(&self, user_id: i64) -> Result<usize, StoreError> {
        self.db.with_conn(|c| Self::purge_user_on(c, user_id))
    }

    /// Remove every event of `user_id`. Returns the number removed.
    pub fn purge_user_on(conn: &Connection, user_id: i64) -> Result<usize, StoreError> {
        Ok(conn.execute("DELETE FROM check_list WHERE user_id = ?1", params![user_id])?)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<CheckInEvent>, StoreError> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(sql)?;
            let rows = stmt.query_map(params, row_to_event)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<CheckInEvent> {
    Ok(CheckInEvent {
        name: row.get(0)?,
        user_id: row.get(1)?,
        timestamp: row.get(2)?,
    })
}
