use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use tokio_rusqlite::Connection;

use rollcall_core::store::{RecordStore, StoreError};
use rollcall_core::types::{
    AttendanceRecord, AttendanceStatus, ClassConfig, EnrollmentListing, ShiftConfigMap,
    StoredStudent, StudentRecord,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    uid  TEXT PRIMARY KEY,
    doc  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS classes (
    key  TEXT PRIMARY KEY,
    doc  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id           TEXT PRIMARY KEY,
    student_id   TEXT NOT NULL,
    auth_uid     TEXT NOT NULL,
    student_name TEXT NOT NULL,
    class        TEXT,
    shift        TEXT,
    status       TEXT NOT NULL,
    date         TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    recorded_by  TEXT NOT NULL,
    UNIQUE (auth_uid, date)
);
";

/// Attendance row as stored, before chrono/status parsing.
struct RawAttendance {
    id: String,
    student_id: String,
    auth_uid: String,
    student_name: String,
    class: Option<String>,
    shift: Option<String>,
    status: String,
    date: String,
    created_at: String,
    recorded_by: String,
}

impl RawAttendance {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            auth_uid: row.get(2)?,
            student_name: row.get(3)?,
            class: row.get(4)?,
            shift: row.get(5)?,
            status: row.get(6)?,
            date: row.get(7)?,
            created_at: row.get(8)?,
            recorded_by: row.get(9)?,
        })
    }

    fn into_record(self) -> Result<AttendanceRecord, StoreError> {
        let date: NaiveDate = self.date.parse().map_err(|e| StoreError::Malformed {
            doc: format!("attendance/{}", self.id),
            message: format!("bad date: {e}"),
        })?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| StoreError::Malformed {
                doc: format!("attendance/{}", self.id),
                message: format!("bad created_at: {e}"),
            })?
            .with_timezone(&Utc);
        Ok(AttendanceRecord {
            id: self.id,
            student_id: self.student_id,
            auth_uid: self.auth_uid,
            student_name: self.student_name,
            class: self.class,
            shift: self.shift,
            status: AttendanceStatus::parse(&self.status),
            date,
            created_at,
            recorded_by: self.recorded_by,
        })
    }
}

const ATTENDANCE_COLUMNS: &str =
    "id, student_id, auth_uid, student_name, class, shift, status, date, created_at, recorded_by";

/// SQLite-backed [`RecordStore`].
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path.to_path_buf())
            .await
            .map_err(unavailable)?;
        Self::init(conn).await
    }

    /// In-memory database, used by tests and local experiments.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await.map_err(unavailable)?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(unavailable)?;
        Ok(Self { conn })
    }

    /// Insert or replace a student document.
    pub async fn upsert_student(
        &self,
        uid: &str,
        record: &StudentRecord,
    ) -> Result<(), StoreError> {
        let uid = uid.to_string();
        let doc = serde_json::to_string(record).map_err(|e| StoreError::Malformed {
            doc: format!("students/{uid}"),
            message: e.to_string(),
        })?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO students (uid, doc) VALUES (?1, ?2)
                     ON CONFLICT (uid) DO UPDATE SET doc = excluded.doc",
                    params![uid, doc],
                )?;
                Ok(())
            })
            .await
            .map_err(unavailable)
    }

    /// Insert or replace a class configuration document.
    pub async fn upsert_class(&self, key: &str, config: &ClassConfig) -> Result<(), StoreError> {
        let key = key.to_string();
        let doc = serde_json::to_string(config).map_err(|e| StoreError::Malformed {
            doc: format!("classes/{key}"),
            message: e.to_string(),
        })?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO classes (key, doc) VALUES (?1, ?2)
                     ON CONFLICT (key) DO UPDATE SET doc = excluded.doc",
                    params![key, doc],
                )?;
                Ok(())
            })
            .await
            .map_err(unavailable)
    }
}

fn unavailable(e: tokio_rusqlite::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn parse_student(uid: &str, doc: &str) -> Result<StudentRecord, StoreError> {
    serde_json::from_str(doc).map_err(|e| StoreError::Malformed {
        doc: format!("students/{uid}"),
        message: e.to_string(),
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn list_enrollments(&self) -> Result<Vec<EnrollmentListing>, StoreError> {
        let rows: Vec<(String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT uid, doc FROM students ORDER BY uid")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(unavailable)?;

        // One bad document must not take down the whole listing.
        let mut listings = Vec::new();
        for (uid, doc) in rows {
            let record = match parse_student(&uid, &doc) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(student = %uid, error = %e, "skipping malformed student document");
                    continue;
                }
            };
            if record.facial_embeddings.is_empty() {
                continue;
            }
            listings.push(EnrollmentListing {
                doc_id: uid,
                auth_uid: record.auth_uid.clone(),
                embeddings: record
                    .facial_embeddings
                    .into_iter()
                    .map(|e| e.embedding)
                    .collect(),
            });
        }
        Ok(listings)
    }

    async fn find_student(&self, auth_uid: &str) -> Result<Option<StoredStudent>, StoreError> {
        let auth_uid = auth_uid.to_string();
        let row: Option<(String, String)> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT uid, doc FROM students
                         WHERE json_extract(doc, '$.authUid') = ?1 LIMIT 1",
                        params![auth_uid],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(unavailable)?;

        match row {
            None => Ok(None),
            Some((uid, doc)) => {
                let record = parse_student(&uid, &doc)?;
                Ok(Some(StoredStudent {
                    doc_id: uid,
                    record,
                }))
            }
        }
    }

    async fn find_attendance(
        &self,
        auth_uid: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError> {
        let auth_uid = auth_uid.to_string();
        let date = date.to_string();
        let raw: Option<RawAttendance> = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT {ATTENDANCE_COLUMNS} FROM attendance
                             WHERE auth_uid = ?1 AND date = ?2"
                        ),
                        params![auth_uid, date],
                        RawAttendance::from_row,
                    )
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(unavailable)?;

        raw.map(RawAttendance::into_record).transpose()
    }

    async fn list_shift_configs(&self) -> Result<ShiftConfigMap, StoreError> {
        let rows: Vec<(String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT key, doc FROM classes")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(unavailable)?;

        let mut configs = HashMap::new();
        for (key, doc) in rows {
            match serde_json::from_str::<ClassConfig>(&doc) {
                Ok(config) => {
                    configs.insert(key, config);
                }
                Err(e) => {
                    tracing::warn!(class = %key, error = %e, "skipping malformed class document");
                }
            }
        }
        Ok(configs)
    }

    async fn create_attendance_if_absent(
        &self,
        record: AttendanceRecord,
    ) -> Result<AttendanceRecord, StoreError> {
        let auth_uid = record.auth_uid.clone();
        let date = record.date.to_string();
        let raw = self
            .conn
            .call(move |conn| {
                // INSERT OR IGNORE + read-back: the UNIQUE (auth_uid, date)
                // constraint makes the first writer win; everyone reads the
                // stored row afterwards.
                conn.execute(
                    &format!(
                        "INSERT OR IGNORE INTO attendance ({ATTENDANCE_COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                    ),
                    params![
                        record.id,
                        record.student_id,
                        record.auth_uid,
                        record.student_name,
                        record.class,
                        record.shift,
                        record.status.as_str(),
                        date,
                        record.created_at.to_rfc3339(),
                        record.recorded_by,
                    ],
                )?;
                let row = conn.query_row(
                    &format!(
                        "SELECT {ATTENDANCE_COLUMNS} FROM attendance
                         WHERE auth_uid = ?1 AND date = ?2"
                    ),
                    params![auth_uid, date],
                    RawAttendance::from_row,
                )?;
                Ok(row)
            })
            .await
            .map_err(unavailable)?;

        raw.into_record()
    }
}
