use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub type UserId = i64;
pub type AttendanceId = i64;

/// A stored label (role or status) that does not map to a known variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} label: {value:?}")]
pub struct ParseLabelError {
    pub kind: &'static str,
    pub value: String,
}

/// Account role. Only `User` accounts take part in attendance tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(ParseLabelError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

/// Punctuality label of an attendance record.
///
/// `Pending` is the only non-terminal state; a record leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Pending,
    Early,
    OnTime,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Pending => "pending",
            AttendanceStatus::Early => "early",
            AttendanceStatus::OnTime => "on_time",
            AttendanceStatus::Late => "late",
        }
    }

    /// Whether this status ends the record's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttendanceStatus::Pending)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttendanceStatus::Pending),
            "early" => Ok(AttendanceStatus::Early),
            "on_time" => Ok(AttendanceStatus::OnTime),
            "late" => Ok(AttendanceStatus::Late),
            other => Err(ParseLabelError {
                kind: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// An enrolled account with its reference face image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    /// Path of the stored reference face image.
    pub face_image: PathBuf,
}

/// Fields required to insert a user; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub face_image: PathBuf,
}

/// One attendance record per (user, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendance {
    pub id: AttendanceId,
    pub user_id: UserId,
    pub date: NaiveDate,
    /// Check-in time; `None` while the record is pending.
    pub time: Option<NaiveTime>,
    pub status: AttendanceStatus,
}

impl Attendance {
    pub fn is_checked_in(&self) -> bool {
        self.time.is_some()
    }

    /// Copy of this record carrying a terminal check-in.
    pub fn finalized(&self, time: NaiveTime, status: AttendanceStatus) -> Attendance {
        Attendance {
            time: Some(time),
            status,
            ..self.clone()
        }
    }
}

/// Fields required to insert an attendance record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttendance {
    pub user_id: UserId,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub time: Option<NaiveTime>,
}

impl NewAttendance {
    /// Placeholder record awaiting a check-in.
    pub fn pending(user_id: UserId, date: NaiveDate) -> Self {
        Self {
            user_id,
            date,
            status: AttendanceStatus::Pending,
            time: None,
        }
    }
}

/// Attendance joined with the owning user's name, as returned by history queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    #[serde(flatten)]
    pub attendance: Attendance,
    pub username: String,
}
