use crate::schema::SCHEMA;
use async_trait::async_trait;
use chrono::NaiveDate;
use presence_core::types::ParseLabelError;
use presence_core::{
    Attendance, AttendanceEntry, AttendanceFilter, AttendanceStore, NewAttendance, NewUser,
    StoreError, User, UserFilter, UserId,
};
use rusqlite::types::{Type, Value};
use rusqlite::{ffi, params, params_from_iter, ErrorCode, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio_rusqlite::Connection;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const USER_COLUMNS: &str = "id, username, password_hash, role, face_image";
const ATTENDANCE_COLUMNS: &str = "id, user_id, date, time, status";

/// SQLite record store.
///
/// Cloning is cheap and shares the underlying connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(&path).await.map_err(map_err)?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Self::init(conn).await
    }

    /// Private in-memory database, mostly for tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(map_err)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|c| {
            c.busy_timeout(BUSY_TIMEOUT)?;
            c.pragma_update(None, "foreign_keys", true)?;
            c.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(map_err)?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl AttendanceStore for SqliteStore {
    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        self.conn
            .call(move |c| {
                let user = c
                    .query_row(
                        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                        params![id],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await
            .map_err(map_err)
    }

    async fn users(&self, filter: &UserFilter) -> Result<Vec<User>, StoreError> {
        let mut conditions = Conditions::default();
        if let Some(role) = filter.role {
            conditions.push("role = ?", Value::Text(role.as_str().to_string()));
        }
        if let Some(fragment) = &filter.username_contains {
            conditions.push("instr(lower(username), lower(?)) > 0", Value::Text(fragment.clone()));
        }
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users{} ORDER BY id",
            conditions.where_clause()
        );

        self.conn
            .call(move |c| {
                let mut stmt = c.prepare(&sql)?;
                let users = stmt
                    .query_map(params_from_iter(conditions.values), user_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await
            .map_err(map_err)
    }

    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO users (username, password_hash, role, face_image)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        user.username,
                        user.password_hash,
                        user.role.as_str(),
                        user.face_image.to_string_lossy().into_owned(),
                    ],
                )?;
                Ok(User {
                    id: c.last_insert_rowid(),
                    username: user.username,
                    password_hash: user.password_hash,
                    role: user.role,
                    face_image: user.face_image,
                })
            })
            .await
            .map_err(map_err)
    }

    async fn delete_user(&self, id: UserId) -> Result<bool, StoreError> {
        let removed = self
            .conn
            .call(move |c| Ok(c.execute("DELETE FROM users WHERE id = ?1", params![id])?))
            .await
            .map_err(map_err)?;
        if removed > 0 {
            tracing::info!(user_id = id, "user deleted with its attendance");
        }
        Ok(removed > 0)
    }

    async fn set_face_image(&self, id: UserId, face_image: &Path) -> Result<bool, StoreError> {
        let path = face_image.to_string_lossy().into_owned();
        let updated = self
            .conn
            .call(move |c| {
                Ok(c.execute(
                    "UPDATE users SET face_image = ?1 WHERE id = ?2",
                    params![path, id],
                )?)
            })
            .await
            .map_err(map_err)?;
        if updated > 0 {
            tracing::info!(user_id = id, "reference face image updated");
        }
        Ok(updated > 0)
    }

    async fn find(
        &self,
        user_id: UserId,
        date: NaiveDate,
    ) -> Result<Option<Attendance>, StoreError> {
        self.conn
            .call(move |c| {
                let record = c
                    .query_row(
                        &format!(
                            "SELECT {ATTENDANCE_COLUMNS} FROM attendance
                             WHERE user_id = ?1 AND date = ?2"
                        ),
                        params![user_id, date],
                        attendance_from_row,
                    )
                    .optional()?;
                Ok(record)
            })
            .await
            .map_err(map_err)
    }

    async fn create(&self, record: NewAttendance) -> Result<Attendance, StoreError> {
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO attendance (user_id, date, time, status) VALUES (?1, ?2, ?3, ?4)",
                    params![record.user_id, record.date, record.time, record.status.as_str()],
                )?;
                Ok(Attendance {
                    id: c.last_insert_rowid(),
                    user_id: record.user_id,
                    date: record.date,
                    time: record.time,
                    status: record.status,
                })
            })
            .await
            .map_err(map_err)
    }

    async fn save(&self, record: &Attendance) -> Result<(), StoreError> {
        let (Some(time), true) = (record.time, record.status.is_terminal()) else {
            return Err(StoreError::Backend(format!(
                "attendance {} is not a finalized check-in",
                record.id
            )));
        };
        let id = record.id;
        let status = record.status.as_str();

        let updated = self
            .conn
            .call(move |c| {
                Ok(c.execute(
                    "UPDATE attendance SET time = ?1, status = ?2 WHERE id = ?3 AND time IS NULL",
                    params![time, status, id],
                )?)
            })
            .await
            .map_err(map_err)?;

        // Zero rows: already finalized by a concurrent check-in, or removed.
        if updated == 0 {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn bulk_create(&self, records: Vec<NewAttendance>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }
        self.conn
            .call(move |c| {
                let tx = c.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO attendance (user_id, date, time, status)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for r in &records {
                        stmt.execute(params![r.user_id, r.date, r.time, r.status.as_str()])?;
                    }
                }
                tx.commit()?;
                Ok(records.len())
            })
            .await
            .map_err(map_err)
    }

    async fn exists(&self, date: NaiveDate) -> Result<bool, StoreError> {
        self.conn
            .call(move |c| {
                Ok(c.query_row(
                    "SELECT EXISTS (SELECT 1 FROM attendance WHERE date = ?1)",
                    params![date],
                    |row| row.get::<_, bool>(0),
                )?)
            })
            .await
            .map_err(map_err)
    }

    async fn attendance(
        &self,
        filter: &AttendanceFilter,
    ) -> Result<Vec<AttendanceEntry>, StoreError> {
        let mut conditions = Conditions::default();
        if let Some(user_id) = filter.user_id {
            conditions.push("a.user_id = ?", Value::Integer(user_id));
        }
        if let Some(date) = filter.date {
            conditions.push("a.date = ?", Value::Text(date.format("%Y-%m-%d").to_string()));
        }
        if let Some(year) = filter.year {
            conditions.push(
                "CAST(strftime('%Y', a.date) AS INTEGER) = ?",
                Value::Integer(year.into()),
            );
        }
        if let Some(month) = filter.month {
            conditions.push(
                "CAST(strftime('%m', a.date) AS INTEGER) = ?",
                Value::Integer(month.into()),
            );
        }
        if let Some(day) = filter.day {
            conditions.push(
                "CAST(strftime('%d', a.date) AS INTEGER) = ?",
                Value::Integer(day.into()),
            );
        }
        if let Some(status) = filter.status {
            conditions.push("a.status = ?", Value::Text(status.as_str().to_string()));
        }
        let sql = format!(
            "SELECT a.id, a.user_id, a.date, a.time, a.status, u.username
             FROM attendance a JOIN users u ON u.id = a.user_id{}
             ORDER BY a.date DESC, a.user_id ASC",
            conditions.where_clause()
        );

        self.conn
            .call(move |c| {
                let mut stmt = c.prepare(&sql)?;
                let entries = stmt
                    .query_map(params_from_iter(conditions.values), |row| {
                        Ok(AttendanceEntry {
                            attendance: attendance_from_row(row)?,
                            username: row.get("username")?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
            .map_err(map_err)
    }
}

/// AND-ed `WHERE` fragments with positional parameters.
#[derive(Default)]
struct Conditions {
    clauses: Vec<&'static str>,
    values: Vec<Value>,
}

impl Conditions {
    fn push(&mut self, clause: &'static str, value: Value) {
        self.clauses.push(clause);
        self.values.push(value);
    }

    fn where_clause(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        password_hash: row.get("password_hash")?,
        role: label(row, "role")?,
        face_image: PathBuf::from(row.get::<_, String>("face_image")?),
    })
}

fn attendance_from_row(row: &Row<'_>) -> rusqlite::Result<Attendance> {
    Ok(Attendance {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        date: row.get("date")?,
        time: row.get("time")?,
        status: label(row, "status")?,
    })
}

fn label<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseLabelError>,
{
    let raw: String = row.get(column)?;
    raw.parse().map_err(|e: ParseLabelError| {
        let idx = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

fn map_err(err: tokio_rusqlite::Error) -> StoreError {
    match err {
        tokio_rusqlite::Error::Rusqlite(e) => map_sqlite_err(e),
        tokio_rusqlite::Error::ConnectionClosed => {
            StoreError::Unavailable("database connection closed".into())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

/// Only uniqueness collisions are conflicts; foreign-key and check failures
/// mean the write itself is invalid.
fn map_sqlite_err(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            return match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    StoreError::Conflict
                }
                _ => StoreError::Backend(err.to_string()),
            };
        }
    }
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
            StoreError::Unavailable(err.to_string())
        }
        _ => StoreError::Backend(err.to_string()),
    }
}
