//! Seams to the external collaborators: the durable record store and
//! the face-embedding provider. The core only ever talks to these
//! traits; concrete bindings live in their own crates.

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::types::{
    AttendanceRecord, Embedding, EnrollmentListing, ShiftConfigMap, StoredStudent,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),
    #[error("malformed document {doc}: {message}")]
    Malformed { doc: String, message: String },
}

/// Durable document store holding students, class configs and
/// attendance records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// List every student that has enrollment embeddings, in stable
    /// document-id order.
    async fn list_enrollments(&self) -> Result<Vec<EnrollmentListing>, StoreError>;

    /// Look up a student document by its auth uid.
    async fn find_student(&self, auth_uid: &str) -> Result<Option<StoredStudent>, StoreError>;

    /// Fetch the attendance record for `(auth_uid, date)`, if any.
    async fn find_attendance(
        &self,
        auth_uid: &str,
        date: NaiveDate,
    ) -> Result<Option<AttendanceRecord>, StoreError>;

    /// Class/shift configuration map keyed by class key.
    async fn list_shift_configs(&self) -> Result<ShiftConfigMap, StoreError>;

    /// Insert `record` unless one already exists for its
    /// `(auth_uid, date)` pair, then return the stored record.
    ///
    /// The conditional insert is the consistency primitive backing the
    /// at-most-one-record-per-day invariant: two concurrent callers both
    /// get the same stored record back, whoever's insert lost.
    async fn create_attendance_if_absent(
        &self,
        record: AttendanceRecord,
    ) -> Result<AttendanceRecord, StoreError>;
}

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("no face found in image")]
    NoFace,
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
}

/// External face-embedding provider: decoded image bytes in, fixed-length
/// vector out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, image: &[u8]) -> Result<Embedding, EmbedError>;
}
