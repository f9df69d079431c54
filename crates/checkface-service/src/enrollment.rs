//! Enrollment: registering, editing and removing identities.
//!
//! Every mutation touches both the identity table and the photo corpus.
//! Photos are staged first and only committed over their final path after
//! the table agrees, so a failure part-way leaves at worst a stale staging
//! file (swept on the next corpus open) rather than a record without a
//! photo. Failures after the table has changed are compensated where
//! possible and otherwise reported as storage errors.

use crate::error::ServiceError;
use crate::policy::DedupPolicy;
use checkface_capture::Frame;
use checkface_core::{FaceRecord, IdentityKey};
use checkface_store::{AttendanceLedger, Database, FaceCorpus, IdentityStore, StoreError};
use std::path::Path;
use std::sync::Arc;

/// What a successful delete removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteSummary {
    pub record: FaceRecord,
    pub events_removed: usize,
    pub photo_removed: bool,
}

pub struct EnrollmentService {
    db: Database,
    identities: IdentityStore,
    corpus: Arc<FaceCorpus>,
    dedup: DedupPolicy,
}

impl EnrollmentService {
    pub fn new(db: Database, corpus: Arc<FaceCorpus>, dedup: DedupPolicy) -> Self {
        Self {
            identities: IdentityStore::new(db.clone()),
            db,
            corpus,
            dedup,
        }
    }

    /// Register a new identity with its photo.
    pub fn enroll(&self, name: &str, user_id: i64, photo: &Frame) -> Result<FaceRecord, ServiceError> {
        let name = validate_name(name)?;
        validate_id(user_id)?;

        if self.is_duplicate(&name, user_id)? {
            return Err(ServiceError::DuplicateIdentity { name, user_id });
        }

        let key = IdentityKey::new(name.clone(), user_id);
        let staged = self.corpus.stage(&key, photo)?;
        let record = FaceRecord {
            name,
            user_id,
            photo_path: staged.target().to_path_buf(),
        };

        match self.identities.insert(&record) {
            Ok(()) => {}
            Err(StoreError::UserIdTaken(_)) => {
                tracing::warn!(
                    user_id,
                    name = %record.name,
                    "user id already enrolled under another name"
                );
                staged.discard();
                return Err(ServiceError::DuplicateIdentity {
                    name: record.name,
                    user_id,
                });
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = staged.commit() {
            self.undo_insert(user_id);
            return Err(e.into());
        }

        tracing::info!(user_id, name = %record.name, path = %record.photo_path.display(), "enrolled");
        Ok(record)
    }

    /// Rename the identity with `user_id`. The photo file keeps its name.
    pub fn update_name(&self, user_id: i64, new_name: &str) -> Result<FaceRecord, ServiceError> {
        let new_name = validate_name(new_name)?;
        let mut record = self
            .identities
            .find_by_id(user_id)?
            .ok_or_else(|| not_found_id(user_id))?;

        if !self.identities.update_name(user_id, &new_name)? {
            return Err(not_found_id(user_id));
        }

        tracing::info!(user_id, old = %record.name, new = %new_name, "renamed identity");
        record.name = new_name;
        Ok(record)
    }

    /// Move the identity called `name` to `new_id`, renaming its photo to
    /// the path of the new key. Past check-ins keep the old id.
    pub fn update_id(&self, name: &str, new_id: i64) -> Result<FaceRecord, ServiceError> {
        let name = validate_name(name)?;
        validate_id(new_id)?;

        let mut found = self.identities.find_by_name(&name)?;
        let mut record = match found.len() {
            0 => return Err(ServiceError::RecordNotFound(format!("name {name}"))),
            1 => found.remove(0),
            n => {
                return Err(ServiceError::Validation(format!(
                    "{n} identities are named {name}; rename by user id instead"
                )))
            }
        };

        if record.user_id == new_id {
            return Ok(record);
        }

        let old_id = record.user_id;
        let new_key = IdentityKey::new(record.name.clone(), new_id);
        let target = self.corpus.path_for(&new_key);

        let rekeyed = self.db.with_tx(|tx| {
            let found = IdentityStore::update_id_on(tx, old_id, new_id)?;
            if found {
                IdentityStore::update_photo_path_on(tx, new_id, &target)?;
            }
            Ok(found)
        });
        match rekeyed {
            Ok(true) => {}
            Ok(false) => return Err(ServiceError::RecordNotFound(format!("name {name}"))),
            Err(StoreError::UserIdTaken(_)) => {
                return Err(ServiceError::DuplicateIdentity { name, user_id: new_id })
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.corpus.relocate(&record.photo_path, &new_key) {
            self.undo_rekey(old_id, new_id, &record.photo_path);
            return Err(e.into());
        }

        tracing::info!(name = %name, old = old_id, new = new_id, path = %target.display(), "re-keyed identity");
        record.user_id = new_id;
        record.photo_path = target;
        Ok(record)
    }

    /// Replace the photo of `(name, user_id)`.
    ///
    /// The new photo is staged, the record is pointed at the deterministic
    /// path, the staged file is committed over it, and finally a previous
    /// photo at a different path is removed.
    pub fn update_photo(&self, name: &str, user_id: i64, photo: &Frame) -> Result<FaceRecord, ServiceError> {
        let record = self
            .identities
            .find_by_pair(name, user_id)?
            .ok_or_else(|| not_found_pair(name, user_id))?;

        let staged = self.corpus.stage(&record.key(), photo)?;
        let target = staged.target().to_path_buf();
        let moved = record.photo_path != target;

        if moved {
            self.identities.update_photo_path(user_id, &target)?;
        }

        if let Err(e) = staged.commit() {
            if moved {
                if let Err(undo) = self.identities.update_photo_path(user_id, &record.photo_path) {
                    tracing::warn!(user_id, error = %undo, "could not restore previous photo path");
                }
            }
            return Err(e.into());
        }

        if moved {
            if let Err(e) = self.corpus.remove_path(&record.photo_path) {
                tracing::warn!(user_id, error = %e, "previous photo left behind");
            }
        }

        tracing::info!(user_id, path = %target.display(), "photo replaced");
        Ok(FaceRecord {
            photo_path: target,
            ..record
        })
    }

    /// Remove `(name, user_id)`: its record, every check-in for the id, and
    /// its photo.
    pub fn delete(&self, name: &str, user_id: i64) -> Result<DeleteSummary, ServiceError> {
        let record = self
            .identities
            .find_by_pair(name, user_id)?
            .ok_or_else(|| not_found_pair(name, user_id))?;

        let events_removed = self.db.with_tx(|tx| {
            IdentityStore::delete_on(tx, user_id)?;
            AttendanceLedger::purge_user_on(tx, user_id)
        })?;

        let mut photos = vec![record.photo_path.clone()];
        let derived = self.corpus.path_for(&record.key());
        if derived != record.photo_path {
            photos.push(derived);
        }

        let mut photo_removed = false;
        for path in photos {
            if !self.identities.find_by_photo(&path)?.is_empty() {
                tracing::warn!(user_id, path = %path.display(), "photo still belongs to another identity; kept");
                continue;
            }
            photo_removed |= self.corpus.remove_path(&path)?;
        }

        tracing::info!(user_id, name = %record.name, events_removed, photo_removed, "deleted identity");
        Ok(DeleteSummary {
            record,
            events_removed,
            photo_removed,
        })
    }

    /// Exact lookup by id. A miss is `Ok(None)`.
    pub fn find_by_id(&self, user_id: i64) -> Result<Option<FaceRecord>, ServiceError> {
        Ok(self.identities.find_by_id(user_id)?)
    }

    pub fn list(&self) -> Result<Vec<FaceRecord>, ServiceError> {
        Ok(self.identities.list()?)
    }

    fn is_duplicate(&self, name: &str, user_id: i64) -> Result<bool, ServiceError> {
        let existing = match self.dedup {
            DedupPolicy::NameAndId => self.identities.find_by_pair(name, user_id)?,
            DedupPolicy::UserIdOnly => self.identities.find_by_id(user_id)?,
        };
        Ok(existing.is_some())
    }

    fn undo_rekey(&self, old_id: i64, new_id: i64, old_path: &Path) {
        let undone = self.db.with_tx(|tx| {
            IdentityStore::update_id_on(tx, new_id, old_id)?;
            IdentityStore::update_photo_path_on(tx, old_id, old_path)
        });
        match undone {
            Ok(_) => tracing::warn!(old_id, new_id, "photo move failed; re-key rolled back"),
            Err(e) => tracing::warn!(old_id, new_id, error = %e, "photo move failed and rollback failed"),
        }
    }

    fn undo_insert(&self, user_id: i64) {
        match self.identities.delete(user_id) {
            Ok(_) => tracing::warn!(user_id, "photo commit failed; enrollment rolled back"),
            Err(e) => tracing::warn!(user_id, error = %e, "photo commit failed and rollback failed"),
        }
    }
}

/// Trim and check a display name. It becomes part of a file name, so path
/// separators are refused.
fn validate_name(name: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::Validation("name must not be empty".into()));
    }
    if name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(ServiceError::Validation(format!("name {name:?} is not usable as a file name")));
    }
    Ok(name.to_string())
}

fn validate_id(user_id: i64) -> Result<(), ServiceError> {
    if user_id <= 0 {
        return Err(ServiceError::Validation(format!("user id must be positive, got {user_id}")));
    }
    Ok(())
}

fn not_found_id(user_id: i64) -> ServiceError {
    ServiceError::RecordNotFound(format!("user id {user_id}"))
}

fn not_found_pair(name: &str, user_id: i64) -> ServiceError {
    ServiceError::RecordNotFound(format!("{name}_{user_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{frame, Fixture};
    use checkface_core::CheckInEvent;
    use chrono::NaiveDate;

    fn service(fx: &Fixture, dedup: DedupPolicy) -> EnrollmentService {
        EnrollmentService::new(fx.db.clone(), fx.corpus.clone(), dedup)
    }

    fn check_in(fx: &Fixture, name: &str, user_id: i64) {
        AttendanceLedger::new(fx.db.clone())
            .append(&CheckInEvent {
                name: name.into(),
                user_id,
                timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap(),
            })
            .unwrap();
    }

    #[test]
    fn test_enroll_writes_photo_and_record() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);

        let record = svc.enroll("Alice", 1001, &frame(180)).unwrap();
        assert_eq!(record.photo_path, fx.corpus.root().join("Alice_1001.jpg"));
        assert!(record.photo_path.is_file());
        assert_eq!(svc.find_by_id(1001).unwrap(), Some(record));
        assert_eq!(fx.corpus_files(), 1);
    }

    #[test]
    fn test_enroll_twice_is_duplicate() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);

        svc.enroll("Alice", 1001, &frame(180)).unwrap();
        let err = svc.enroll("Alice", 1001, &frame(90)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);

        assert_eq!(svc.list().unwrap().len(), 1);
        assert_eq!(fx.corpus_files(), 1);
    }

    #[test]
    fn test_name_and_id_policy_hits_store_constraint() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);

        svc.enroll("Alice", 1001, &frame(180)).unwrap();
        let err = svc.enroll("Bob", 1001, &frame(180)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);

        // The staged Bob photo must not survive.
        assert_eq!(fx.corpus_files(), 1);
        assert_eq!(svc.find_by_id(1001).unwrap().unwrap().name, "Alice");
    }

    #[test]
    fn test_user_id_only_policy() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::UserIdOnly);

        svc.enroll("Alice", 1001, &frame(180)).unwrap();
        let err = svc.enroll("Bob", 1001, &frame(180)).unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateIdentity { user_id: 1001, .. }));
        assert_eq!(fx.corpus_files(), 1);
    }

    #[test]
    fn test_enroll_commit_failure_removes_record() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        std::fs::create_dir(fx.corpus.root().join("Alice_1.jpg")).unwrap();

        let err = svc.enroll("Alice", 1, &frame(180)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageIoFailure);
        assert!(svc.find_by_id(1).unwrap().is_none());
        // Only the blocking directory; the staged photo is gone.
        assert_eq!(fx.corpus_files(), 1);
        assert!(fx.corpus.entries().unwrap().is_empty());
    }

    #[test]
    fn test_enroll_validation() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);

        for (name, id) in [("  ", 1), ("Alice", 0), ("../etc", 2), ("a/b", 3)] {
            let err = svc.enroll(name, id, &frame(180)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "{name:?} {id}");
        }
        assert_eq!(fx.corpus_files(), 0);
    }

    #[test]
    fn test_enroll_trims_name() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let record = svc.enroll("  Alice ", 5, &frame(180)).unwrap();
        assert_eq!(record.name, "Alice");
    }

    #[test]
    fn test_update_name() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let alice = svc.enroll("Alice", 1, &frame(180)).unwrap();
        let bob = svc.enroll("Bob", 2, &frame(180)).unwrap();

        let renamed = svc.update_name(1, "Alicia").unwrap();
        assert_eq!(renamed.name, "Alicia");
        // Photo path is left as it was.
        assert_eq!(renamed.photo_path, alice.photo_path);
        assert!(alice.photo_path.is_file());
        assert_eq!(svc.find_by_id(1).unwrap(), Some(renamed));
        assert_eq!(svc.find_by_id(2).unwrap(), Some(bob));

        let err = svc.update_name(99, "Nobody").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
    }

    #[test]
    fn test_update_id() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        svc.enroll("Alice", 1, &frame(180)).unwrap();
        let bob = svc.enroll("Bob", 2, &frame(180)).unwrap();

        let moved = svc.update_id("Alice", 10).unwrap();
        assert_eq!(moved.user_id, 10);
        assert_eq!(moved.photo_path, fx.corpus.root().join("Alice_10.jpg"));
        assert!(moved.photo_path.is_file());
        assert!(!fx.corpus.exists(&IdentityKey::new("Alice", 1)));
        assert!(svc.find_by_id(1).unwrap().is_none());
        assert_eq!(svc.find_by_id(10).unwrap(), Some(moved));
        assert_eq!(svc.find_by_id(2).unwrap(), Some(bob));
        assert_eq!(fx.corpus_files(), 2);

        let err = svc.update_id("Nobody", 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);

        let err = svc.update_id("Alice", 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateIdentity);
    }

    #[test]
    fn test_reenroll_freed_id_gets_its_own_photo() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        svc.enroll("Alice", 1, &frame(180)).unwrap();
        let moved = svc.update_id("Alice", 2).unwrap();

        let again = svc.enroll("Alice", 1, &frame(90)).unwrap();
        assert_ne!(again.photo_path, moved.photo_path);
        assert_eq!(fx.corpus_files(), 2);

        svc.delete("Alice", 1).unwrap();
        let survivor = svc.find_by_id(2).unwrap().unwrap();
        assert!(survivor.photo_path.is_file());
        assert_eq!(fx.corpus_files(), 1);
    }

    #[test]
    fn test_update_id_rolls_back_when_photo_cannot_move() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let alice = svc.enroll("Alice", 1, &frame(180)).unwrap();
        // A directory squatting on the new photo path makes the rename fail.
        std::fs::create_dir(fx.corpus.root().join("Alice_10.jpg")).unwrap();

        let err = svc.update_id("Alice", 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageIoFailure);
        assert_eq!(svc.find_by_id(1).unwrap(), Some(alice.clone()));
        assert!(svc.find_by_id(10).unwrap().is_none());
        assert!(alice.photo_path.is_file());
    }

    #[test]
    fn test_update_id_ambiguous_name() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        svc.enroll("Sam", 1, &frame(180)).unwrap();
        svc.enroll("Sam", 2, &frame(180)).unwrap();

        let err = svc.update_id("Sam", 3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(svc.find_by_id(3).unwrap().is_none());
    }

    #[test]
    fn test_update_photo_same_path() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let before = svc.enroll("Alice", 1, &frame(180)).unwrap();

        let after = svc.update_photo("Alice", 1, &frame(60)).unwrap();
        assert_eq!(after.photo_path, before.photo_path);
        assert_eq!(fx.corpus_files(), 1);

        let stored = image::open(&after.photo_path).unwrap().to_rgb8();
        assert!(stored.get_pixel(0, 0)[0] < 120);
    }

    #[test]
    fn test_update_photo_after_rename_moves_file() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let original = svc.enroll("Alice", 1, &frame(180)).unwrap();
        svc.update_name(1, "Alicia").unwrap();

        let updated = svc.update_photo("Alicia", 1, &frame(180)).unwrap();
        assert_eq!(updated.photo_path, fx.corpus.root().join("Alicia_1.jpg"));
        assert!(updated.photo_path.is_file());
        assert!(!original.photo_path.exists());
        assert_eq!(svc.find_by_id(1).unwrap(), Some(updated));
        assert_eq!(fx.corpus_files(), 1);
    }

    #[test]
    fn test_update_photo_commit_failure_restores_path() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let alice = svc.enroll("Alice", 1, &frame(180)).unwrap();
        svc.update_name(1, "Alicia").unwrap();
        std::fs::create_dir(fx.corpus.root().join("Alicia_1.jpg")).unwrap();

        let err = svc.update_photo("Alicia", 1, &frame(60)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StorageIoFailure);

        let stored = svc.find_by_id(1).unwrap().unwrap();
        assert_eq!(stored.photo_path, alice.photo_path);
        assert!(stored.photo_path.is_file());
        // Old photo and the blocking directory; no staging file left.
        assert_eq!(fx.corpus_files(), 2);
    }

    #[test]
    fn test_update_photo_unknown_pair() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        svc.enroll("Alice", 1, &frame(180)).unwrap();

        let err = svc.update_photo("Bob", 1, &frame(180)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
        assert_eq!(fx.corpus_files(), 1);
    }

    #[test]
    fn test_delete_cascades() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let alice = svc.enroll("Alice", 1001, &frame(180)).unwrap();
        svc.enroll("Bob", 1002, &frame(180)).unwrap();
        check_in(&fx, "Alice", 1001);
        check_in(&fx, "Alice", 1001);
        check_in(&fx, "Bob", 1002);

        let summary = svc.delete("Alice", 1001).unwrap();
        assert_eq!(summary.events_removed, 2);
        assert!(summary.photo_removed);

        assert!(svc.find_by_id(1001).unwrap().is_none());
        assert!(!alice.photo_path.exists());
        let ledger = AttendanceLedger::new(fx.db.clone());
        assert!(ledger.for_user(1001).unwrap().is_empty());
        assert_eq!(ledger.for_user(1002).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_after_rename_removes_original_file() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        svc.enroll("Alice", 1, &frame(180)).unwrap();
        svc.update_name(1, "Alicia").unwrap();

        let summary = svc.delete("Alicia", 1).unwrap();
        assert!(summary.photo_removed);
        assert_eq!(fx.corpus_files(), 0);
    }

    #[test]
    fn test_delete_keeps_photo_another_record_uses() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        let alice = svc.enroll("Alice", 1, &frame(180)).unwrap();
        let bob = svc.enroll("Bob", 2, &frame(180)).unwrap();
        // Two rows pointing at one file, as an older database may hold.
        IdentityStore::new(fx.db.clone())
            .update_photo_path(2, &alice.photo_path)
            .unwrap();

        let summary = svc.delete("Alice", 1).unwrap();
        assert!(!summary.photo_removed);
        assert!(alice.photo_path.is_file());
        assert_eq!(svc.find_by_id(2).unwrap().unwrap().photo_path, alice.photo_path);
        assert!(bob.photo_path.is_file());
    }

    #[test]
    fn test_delete_unknown_has_no_effect() {
        let fx = Fixture::new();
        let svc = service(&fx, DedupPolicy::NameAndId);
        svc.enroll("Alice", 1001, &frame(180)).unwrap();
        check_in(&fx, "Alice", 1001);

        let err = svc.delete("Alice", 1002).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
        let err = svc.delete("Bob", 1001).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);

        assert_eq!(svc.list().unwrap().len(), 1);
        assert_eq!(fx.corpus_files(), 1);
        assert_eq!(AttendanceLedger::new(fx.db.clone()).count().unwrap(), 1);
    }
}
