//! presence-core — Attendance lifecycle domain.
//!
//! Types, punctuality classification, and the two capabilities the engine
//! consumes: face verification and record storage.

pub mod clock;
pub mod filter;
pub mod punctuality;
pub mod store;
pub mod types;
pub mod verifier;

pub use clock::{Clock, SystemClock};
pub use filter::{AttendanceFilter, UserFilter};
pub use punctuality::{BoundaryError, PunctualityClassifier};
pub use store::{AttendanceStore, StoreError};
pub use types::{
    Attendance, AttendanceEntry, AttendanceId, AttendanceStatus, NewAttendance, NewUser, Role,
    User, UserId,
};
pub use verifier::{CommandVerifier, FaceSource, FaceVerifier, VerifierError};
