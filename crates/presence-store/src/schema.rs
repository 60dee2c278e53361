/// Idempotent schema. Dates are `YYYY-MM-DD`, times `HH:MM:SS[.fff]` text.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('user', 'admin')),
    face_image    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    date    TEXT NOT NULL,
    time    TEXT,
    status  TEXT NOT NULL CHECK (status IN ('pending', 'early', 'on_time', 'late')),
    UNIQUE (user_id, date)
);

CREATE INDEX IF NOT EXISTS idx_attendance_date ON attendance(date);
";
