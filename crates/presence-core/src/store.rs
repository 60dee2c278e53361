//! Record store contract consumed by the attendance engine.

use crate::filter::{AttendanceFilter, UserFilter};
use crate::types::{Attendance, AttendanceEntry, NewAttendance, NewUser, User, UserId};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint was violated or a conditional update lost its race.
    #[error("write conflicts with stored state")]
    Conflict,
    /// The backing store could not be reached; the operation may succeed if retried.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence for users and their per-day attendance.
///
/// Implementations must enforce at most one attendance record per
/// (user, date) themselves; callers never pre-count.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError>;

    async fn users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError>;

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError>;

    /// Remove a user and, by cascade, all of its attendance. `false` if absent.
    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError>;

    /// Point a user at a new reference face image. `false` if absent.
    async fn set_face_image(&self, id: UserId, face_image: &Path) -> Result<bool, StoreError>;

    async fn find(&self, user_id: UserId, date: NaiveDate)
        -> Result<Option<Attendance>, StoreError>;

    /// Insert one record. [`StoreError::Conflict`] if (user, date) already exists.
    async fn create(&self, record: NewAttendance) -> Result<Attendance, StoreError>;

    /// Persist the terminal transition of `record`.
    ///
    /// Conditional on the stored row still having no check-in time; fails with
    /// [`StoreError::Conflict`] instead of overwriting a finalized row.
    async fn save(&self, record: &Attendance) -> Result<(), StoreError>;

    /// Insert all records or none. Returns the number inserted.
    async fn bulk_create(&self, records: Vec<NewAttendance>) -> Result<usize, StoreError>;

    /// Whether any record exists for `date`.
    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError>;

    async fn attendance(&self, filter: &AttendanceFilter)
        -> Result<Vec<AttendanceEntry>, StoreError>;
}
