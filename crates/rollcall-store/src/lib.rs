//! rollcall-store — SQLite binding of the external record-store contract.
//!
//! Students and class configs are document-style rows (JSON `doc`
//! columns), so field quirks in upstream documents — aliased grace
//! fields, numeric strings — survive verbatim. Attendance is relational
//! with a `UNIQUE (auth_uid, date)` constraint backing the conditional
//! insert.

mod sqlite;

pub use sqlite::SqliteRecordStore;
