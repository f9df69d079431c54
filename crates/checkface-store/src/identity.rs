//! `face_list`: one row per enrolled identity, keyed by `user_id`.

use crate::db::{map_conflict, Database, StoreError};
use checkface_core::FaceRecord;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

const SELECT_COLUMNS: &str = "SELECT name, user_id, photo_file FROM face_list";

/// Durable table of enrolled identities.
///
/// Methods taking `&Connection` run against a caller-provided connection
/// or transaction; the `&self` forms lock the shared database themselves.
#[derive(Clone)]
pub struct IdentityStore {
    db: Database,
}

impl IdentityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, record: &FaceRecord) -> Result<(), StoreError> {
        self.db.with_conn(|c| Self::insert_on(c, record))
    }

    /// Insert a record. A taken `user_id` yields [`StoreError::UserIdTaken`].
    pub fn insert_on(conn: &Connection, record: &FaceRecord) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO face_list (name, user_id, photo_file) VALUES (?1, ?2, ?3)",
            params![record.name, record.user_id, path_text(&record.photo_path)],
        )
        .map_err(|e| map_conflict(e, record.user_id))?;
        Ok(())
    }

    pub fn find_by_id(&self, user_id: i64) -> Result<Option<FaceRecord>, StoreError> {
        self.db.with_conn(|c| {
            let sql = format!("{SELECT_COLUMNS} WHERE user_id = ?1");
            Ok(c.query_row(&sql, params![user_id], row_to_record).optional()?)
        })
    }

    pub fn find_by_pair(&self, name: &str, user_id: i64) -> Result<Option<FaceRecord>, StoreError> {
        self.db.with_conn(|c| {
            let sql = format!("{SELECT_COLUMNS} WHERE name = ?1 AND user_id = ?2");
            Ok(c.query_row(&sql, params![name, user_id], row_to_record).optional()?)
        })
    }

    pub fn find_by_name(&self, name: &str) -> Result<Vec<FaceRecord>, StoreError> {
        self.query(&format!("{SELECT_COLUMNS} WHERE name = ?1 ORDER BY user_id"), params![name])
    }

    /// All records, ordered by `user_id`.
    pub fn list(&self) -> Result<Vec<FaceRecord>, StoreError> {
        self.query(&format!("{SELECT_COLUMNS} ORDER BY user_id"), [])
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|c| {
            let n: i64 = c.query_row("SELECT COUNT(*) FROM face_list", [], |r| r.get(0))?;
            Ok(n as usize)
        })
    }

    /// Set the `name` of the record with `user_id`. Returns false on a miss.
    pub fn update_name(&self, user_id: i64, name: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|c| {
            let n = c.execute(
                "UPDATE face_list SET name = ?1 WHERE user_id = ?2",
                params![name, user_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Re-key the record currently at `user_id` to `new_id`. Returns false on a miss.
    pub fn update_id_on(conn: &Connection, user_id: i64, new_id: i64) -> Result<bool, StoreError> {
        let n = conn
            .execute(
                "UPDATE face_list SET user_id = ?1 WHERE user_id = ?2",
                params![new_id, user_id],
            )
            .map_err(|e| map_conflict(e, new_id))?;
        Ok(n > 0)
    }

    pub fn update_photo_path(&self, user_id: i64, photo_path: &Path) -> Result<bool, StoreError> {
        self.db.with_conn(|c| Self::update_photo_path_on(c, user_id, photo_path))
    }

    pub fn update_photo_path_on(conn: &Connection, user_id: i64, photo_path: &Path) -> Result<bool, StoreError> {
        let n = conn.execute(
            "UPDATE face_list SET photo_file = ?1 WHERE user_id = ?2",
            params![path_text(photo_path), user_id],
        )?;
        Ok(n > 0)
    }

    /// Records whose photo is stored at `photo_path`.
    pub fn find_by_photo(&self, photo_path: &Path) -> Result<Vec<FaceRecord>, StoreError> {
        self.query(
            &format!("{SELECT_COLUMNS} WHERE photo_file = ?1 ORDER BY user_id"),
            params![path_text(photo_path)],
        )
    }

    pub fn delete(&self, user_id: i64) -> Result<bool, StoreError> {
        self.db.with_conn(|c| Self::delete_on(c, user_id))
    }

    pub fn delete_on(conn: &Connection, user_id: i64) -> Result<bool, StoreError> {
        let n = conn.execute("DELETE FROM face_list WHERE user_id = ?1", params![user_id])?;
        Ok(n > 0)
    }

    fn query<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<FaceRecord>, StoreError> {
        self.db.with_conn(|c| {
            let mut stmt = c.prepare(sql)?;
            let rows = stmt.query_map(params, row_to_record)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FaceRecord> {
    Ok(FaceRecord {
        name: row.get(0)?,
        user_id: row.get(1)?,
        photo_path: row.get::<_, String>(2)?.into(),
    })
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
