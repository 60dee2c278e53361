//! Query options for history and user listings.
//!
//! Every field is optional; present fields are AND-ed together.

use crate::types::{AttendanceStatus, Role, UserId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Attendance history query.
///
/// `date` pins an exact day; `year`/`month`/`day` match calendar components
/// independently (e.g. every 15th of any month).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttendanceFilter {
    pub user_id: Option<UserId>,
    pub date: Option<NaiveDate>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub day: Option<u32>,
    pub status: Option<AttendanceStatus>,
}

impl AttendanceFilter {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn on_date(date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: AttendanceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// User listing query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserFilter {
    pub role: Option<Role>,
    /// Case-insensitive substring of the username.
    pub username_contains: Option<String>,
}

impl UserFilter {
    /// Accounts subject to attendance tracking.
    pub fn tracked() -> Self {
        Self {
            role: Some(Role::User),
            username_contains: None,
        }
    }
}
