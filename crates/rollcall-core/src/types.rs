use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Face embedding vector (dimensionality set by the external provider).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Cosine similarity between two embeddings, in [-1, 1].
    ///
    /// Zips to the shorter vector if lengths disagree; returns 0.0 when
    /// either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }

    /// Cosine distance: `1 - similarity`. Symmetric, 0 for identical
    /// non-zero vectors, bounded by [0, 2].
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.similarity(other)
    }
}

/// One enrolled embedding, tagged with the identity that owns it.
/// A single identity may own several entries (multiple enrollment photos).
#[derive(Debug, Clone)]
pub struct EnrolledEmbedding {
    pub identity: String,
    pub embedding: Embedding,
}

/// Daily attendance classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Late => "late",
        }
    }

    /// Parse a stored status string; anything unrecognized reads as
    /// `Present`, mirroring the upstream store's lenient default.
    pub fn parse(s: &str) -> Self {
        match s {
            "late" => AttendanceStatus::Late,
            _ => AttendanceStatus::Present,
        }
    }
}

/// A grace-period value as it appears in student/class documents:
/// either a number or a numeric string like `"30"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraceValue {
    Number(f64),
    Text(String),
}

/// One stored enrollment photo's embedding inside a student document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEmbedding {
    pub embedding: Vec<f32>,
}

/// Student document as held by the record store.
///
/// `grade_period_minutes` is a historically-misspelled alias of
/// `grace_period_minutes` that still exists in older documents; both are
/// kept and resolved by
/// [`attendance::resolve_grace_minutes`](crate::attendance::resolve_grace_minutes).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    #[serde(default)]
    pub auth_uid: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub shift: Option<String>,
    #[serde(default)]
    pub grace_period_minutes: Option<GraceValue>,
    #[serde(default)]
    pub grade_period_minutes: Option<GraceValue>,
    #[serde(default)]
    pub facial_embeddings: Vec<StoredEmbedding>,
}

/// A student document together with its store-assigned document id.
#[derive(Debug, Clone)]
pub struct StoredStudent {
    pub doc_id: String,
    pub record: StudentRecord,
}

/// Enrollment data for one student, as listed during a cache refresh.
#[derive(Debug, Clone)]
pub struct EnrollmentListing {
    pub doc_id: String,
    pub auth_uid: Option<String>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Shift timing configuration within a class document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftConfig {
    /// Shift start as `"HH:MM"` in the reference timezone.
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub grace_minutes: Option<GraceValue>,
}

/// Class document: shift name -> shift config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassConfig {
    #[serde(default)]
    pub shifts: HashMap<String, ShiftConfig>,
}

/// Class/shift configuration map keyed by class key.
pub type ShiftConfigMap = HashMap<String, ClassConfig>;

/// A persisted attendance record. At most one exists per
/// `(auth_uid, date)` pair; once written it is never mutated here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub auth_uid: String,
    pub student_name: String,
    pub class: Option<String>,
    pub shift: Option<String>,
    pub status: AttendanceStatus,
    /// Calendar day in the reference timezone.
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub recorded_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_distance_identical() {
        let a = Embedding::new(vec![1.0, 0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.cosine_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![0.0, 1.0]);
        assert!((a.cosine_distance(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_opposite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert!((a.cosine_distance(&b) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_symmetric() {
        let a = Embedding::new(vec![0.3, -0.7, 0.2]);
        let b = Embedding::new(vec![0.9, 0.1, -0.4]);
        assert!((a.cosine_distance(&b) - b.cosine_distance(&a)).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_zero_vector() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_distance(&b), 1.0);
    }

    #[test]
    fn test_student_record_grace_aliases() {
        let doc = serde_json::json!({
            "authUid": "a1",
            "fullName": "Sok Dara",
            "gracePeriodMinutes": "30",
            "gradePeriodMinutes": 10,
        });
        let rec: StudentRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(
            rec.grace_period_minutes,
            Some(GraceValue::Text("30".into()))
        );
        assert_eq!(rec.grade_period_minutes, Some(GraceValue::Number(10.0)));
    }

    #[test]
    fn test_student_record_ignores_unknown_fields() {
        let doc = serde_json::json!({
            "authUid": "a1",
            "fullName": "Sok Dara",
            "photoUrl": "https://example.com/p.jpg",
            "facialEmbeddings": [{"embedding": [0.1, 0.2]}],
        });
        let rec: StudentRecord = serde_json::from_value(doc).unwrap();
        assert_eq!(rec.facial_embeddings.len(), 1);
        assert_eq!(rec.facial_embeddings[0].embedding, vec![0.1, 0.2]);
    }

    #[test]
    fn test_attendance_status_parse_lenient() {
        assert_eq!(AttendanceStatus::parse("late"), AttendanceStatus::Late);
        assert_eq!(
            AttendanceStatus::parse("present"),
            AttendanceStatus::Present
        );
        assert_eq!(AttendanceStatus::parse("??"), AttendanceStatus::Present);
    }
}
