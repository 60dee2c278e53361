//! presence-store — SQLite-backed record store.
//!
//! Implements [`presence_core::AttendanceStore`] over a single `rusqlite`
//! connection owned by a `tokio-rusqlite` worker thread. Every call is
//! serialized on that thread, and the (user, date) uniqueness and the
//! check-in compare-and-set are enforced by SQL constraints and conditional
//! updates rather than by callers.

mod schema;
pub mod sqlite;

pub use sqlite::SqliteStore;
