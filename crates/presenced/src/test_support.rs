//! Fakes shared by the daemon's unit tests.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use presence_core::{
    Attendance, AttendanceEntry, AttendanceFilter, AttendanceStore, Clock, FaceSource,
    FaceVerifier, NewAttendance, NewUser, Role, StoreError, User, UserFilter, UserId,
    VerifierError,
};
use presence_store::SqliteStore;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(date: NaiveDate, h: u32, m: u32, s: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::from_hms_opt(h, m, s).unwrap())
}

/// Clock pinned to a settable instant.
pub struct ManualClock(Mutex<NaiveDateTime>);

impl ManualClock {
    pub fn new(now: NaiveDateTime) -> Arc<Self> {
        Arc::new(Self(Mutex::new(now)))
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

#[derive(Clone, Copy)]
pub enum Verdict {
    Match,
    Mismatch,
    NoFace(FaceSource),
    Hang,
}

/// Verifier with a fixed verdict that records what it was shown.
pub struct ScriptedVerifier {
    verdict: Verdict,
    /// Whether each submitted path existed at verification time.
    pub seen: Mutex<Vec<(PathBuf, bool)>>,
    gate: Option<Arc<Barrier>>,
}

impl ScriptedVerifier {
    pub fn new(verdict: Verdict) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            seen: Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// Hold every verification until `parties` of them are in flight.
    pub fn gated(verdict: Verdict, parties: usize) -> Arc<Self> {
        Arc::new(Self {
            verdict,
            seen: Mutex::new(Vec::new()),
            gate: Some(Arc::new(Barrier::new(parties))),
        })
    }
}

#[async_trait]
impl FaceVerifier for ScriptedVerifier {
    async fn verify(&self, submitted: &Path, _reference: &Path) -> Result<bool, VerifierError> {
        self.seen
            .lock()
            .unwrap()
            .push((submitted.to_path_buf(), submitted.exists()));
        if let Some(gate) = &self.gate {
            gate.wait().await;
        }
        match self.verdict {
            Verdict::Match => Ok(true),
            Verdict::Mismatch => Ok(false),
            Verdict::NoFace(source) => Err(VerifierError::NoFace(source)),
            Verdict::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(true)
            }
        }
    }
}

/// SQLite store that reports `Unavailable` for the next N calls of selected operations.
pub struct FlakyStore {
    inner: SqliteStore,
    pub find_failures: AtomicUsize,
    pub exists_failures: AtomicUsize,
    pub bulk_failures: AtomicUsize,
    /// Next N `bulk_create` calls report a uniqueness conflict without writing.
    pub bulk_conflicts: AtomicUsize,
    /// User deleted just before the next `bulk_create` runs.
    pub remove_before_bulk: Mutex<Option<UserId>>,
    pub find_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: SqliteStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            find_failures: AtomicUsize::new(0),
            exists_failures: AtomicUsize::new(0),
            bulk_failures: AtomicUsize::new(0),
            bulk_conflicts: AtomicUsize::new(0),
            remove_before_bulk: Mutex::new(None),
            find_calls: AtomicUsize::new(0),
        })
    }

    fn trip(counter: &AtomicUsize) -> Result<(), StoreError> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            Err(StoreError::Unavailable("injected outage".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AttendanceStore for FlakyStore {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.inner.user(id).await
    }

    async fn users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        self.inner.users(filter).await
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.inner.insert_user(user).await
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        self.inner.delete_user(id).await
    }

    async fn set_face_image(&self, id: UserId, face_image: &Path) -> Result<bool, StoreError> {
        self.inner.set_face_image(id, face_image).await
    }

    async fn find(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<Attendance>, StoreError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Self::trip(&self.find_failures)?;
        self.inner.find(user_id, date).await
    }

    async fn create(&self, record: NewAttendance) -> Result<Attendance, StoreError> {
        self.inner.create(record).await
    }

    async fn save(&self, record: &Attendance) -> Result<(), StoreError> {
        self.inner.save(record).await
    }

    async fn bulk_create(&self, records: Vec<NewAttendance>) -> Result<usize, StoreError> {
        Self::trip(&self.bulk_failures)?;
        if Self::trip(&self.bulk_conflicts).is_err() {
            return Err(StoreError::Conflict);
        }
        let doomed = self.remove_before_bulk.lock().unwrap().take();
        if let Some(id) = doomed {
            self.inner.delete_user(id).await?;
        }
        self.inner.bulk_create(records).await
    }

    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError> {
        Self::trip(&self.exists_failures)?;
        self.inner.exists(date).await
    }

    async fn attendance(
        &self,
        filter: &AttendanceFilter,
    ) -> Result<Vec<AttendanceEntry>, StoreError> {
        self.inner.attendance(filter).await
    }
}

pub async fn enroll(store: &dyn AttendanceStore, name: &str, role: Role) -> User {
    store
        .insert_user(NewUser {
            username: name.into(),
            password_hash: "hash".into(),
            role,
            face_image: PathBuf::from(format!("faces/{name}.jpg")),
        })
        .await
        .unwrap()
}
