//! Daily attendance decision: on-time/late classification and the
//! one-record-per-student-per-day contract.
//!
//! All calendar math happens in a fixed UTC+7 reference timezone, never
//! the server's local zone.

use std::sync::Arc;

use chrono::{DateTime, Duration, FixedOffset, Utc};
use uuid::Uuid;

use crate::store::{RecordStore, StoreError};
use crate::types::{
    AttendanceRecord, AttendanceStatus, GraceValue, ShiftConfig, StoredStudent, StudentRecord,
};

const REFERENCE_UTC_OFFSET_SECS: i32 = 7 * 3600;

/// Grace minutes applied when no usable value is configured anywhere.
pub const DEFAULT_GRACE_MINUTES: i64 = 15;

/// The fixed reference timezone (UTC+7) all attendance days are keyed by.
pub fn reference_timezone() -> FixedOffset {
    FixedOffset::east_opt(REFERENCE_UTC_OFFSET_SECS).expect("UTC+7 is a valid offset")
}

/// Outcome of one recognition event's attendance step.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub status: AttendanceStatus,
    /// True when today's record already existed and its stored status
    /// was returned unchanged.
    pub already_recorded: bool,
}

/// Normalize a grace-period setting to whole minutes.
///
/// Precedence: the student's `gracePeriodMinutes`, then its misspelled
/// alias `gradePeriodMinutes`, then the shift config's value. Numbers
/// and numeric strings are accepted (fractions truncate toward zero);
/// an unparsable value or no value at all falls back to
/// [`DEFAULT_GRACE_MINUTES`].
pub fn resolve_grace_minutes(student: &StudentRecord, shift: Option<&ShiftConfig>) -> i64 {
    let value = student
        .grace_period_minutes
        .as_ref()
        .or(student.grade_period_minutes.as_ref())
        .or_else(|| shift.and_then(|s| s.grace_minutes.as_ref()));

    let Some(value) = value else {
        return DEFAULT_GRACE_MINUTES;
    };
    match coerce_minutes(value) {
        Some(minutes) => minutes,
        None => {
            tracing::warn!(?value, "unparsable grace period; using default");
            DEFAULT_GRACE_MINUTES
        }
    }
}

fn coerce_minutes(value: &GraceValue) -> Option<i64> {
    let n = match value {
        GraceValue::Number(n) => *n,
        GraceValue::Text(s) => s.trim().parse::<f64>().ok()?,
    };
    n.is_finite().then_some(n as i64)
}

/// Parse a `"HH:MM"` shift start into (hour, minute).
fn parse_start_time(s: &str) -> Option<(u32, u32)> {
    let (hour, minute) = s.split_once(':')?;
    let hour: u32 = hour.trim().parse().ok()?;
    let minute: u32 = minute.trim().parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Classify `now` against the shift, or `Present` when no shift start
/// time is resolvable (no lateness computable without one).
fn classify(
    now: DateTime<FixedOffset>,
    student: &StudentRecord,
    shift: Option<&ShiftConfig>,
) -> AttendanceStatus {
    let Some(shift) = shift else {
        return AttendanceStatus::Present;
    };
    let Some((hour, minute)) = shift.start_time.as_deref().and_then(parse_start_time) else {
        tracing::debug!("shift config has no usable start time; defaulting to present");
        return AttendanceStatus::Present;
    };
    let Some(shift_start) = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .and_then(|naive| naive.and_local_timezone(now.timezone()).single())
    else {
        return AttendanceStatus::Present;
    };

    let grace = resolve_grace_minutes(student, Some(shift));
    let deadline = shift_start + Duration::minutes(grace);

    // Strictly past the deadline is late; exactly on it is present.
    if now > deadline {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    }
}

/// Computes and persists at most one attendance record per student per
/// reference-timezone day.
pub struct AttendanceDecider {
    store: Arc<dyn RecordStore>,
}

impl AttendanceDecider {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Record attendance for a recognition event happening now.
    pub async fn record(
        &self,
        student: &StoredStudent,
        auth_uid: &str,
        caller_email: &str,
    ) -> Result<Decision, StoreError> {
        let now = Utc::now().with_timezone(&reference_timezone());
        self.record_at(now, student, auth_uid, caller_email).await
    }

    /// Same as [`record`](Self::record) with an explicit event time.
    ///
    /// The first decision of the day is authoritative: an existing record
    /// is returned unchanged, and a lost insert race yields the winner's
    /// stored status.
    pub async fn record_at(
        &self,
        now: DateTime<FixedOffset>,
        student: &StoredStudent,
        auth_uid: &str,
        caller_email: &str,
    ) -> Result<Decision, StoreError> {
        let date = now.date_naive();

        if let Some(existing) = self.store.find_attendance(auth_uid, date).await? {
            tracing::debug!(
                auth_uid,
                status = existing.status.as_str(),
                "attendance already recorded today"
            );
            return Ok(Decision {
                status: existing.status,
                already_recorded: true,
            });
        }

        let configs = self.store.list_shift_configs().await?;
        let shift_config = match (&student.record.class, &student.record.shift) {
            (Some(class), Some(shift)) => {
                // Class documents are keyed without the "Class " prefix
                // student documents carry.
                let class_key = class.strip_prefix("Class ").unwrap_or(class);
                configs.get(class_key).and_then(|c| c.shifts.get(shift))
            }
            _ => {
                tracing::debug!(auth_uid, "student missing class or shift");
                None
            }
        };

        let status = classify(now, &student.record, shift_config);
        let record = AttendanceRecord {
            id: Uuid::new_v4().to_string(),
            student_id: student.doc_id.clone(),
            auth_uid: auth_uid.to_string(),
            student_name: student
                .record
                .full_name
                .clone()
                .unwrap_or_else(|| "Unknown Student".to_string()),
            class: student.record.class.clone(),
            shift: student.record.shift.clone(),
            status,
            date,
            created_at: now.with_timezone(&Utc),
            recorded_by: format!("Face Recognition by {caller_email}"),
        };

        let stored = self.store.create_attendance_if_absent(record).await?;
        tracing::info!(
            auth_uid,
            status = stored.status.as_str(),
            %date,
            "attendance recorded"
        );
        Ok(Decision {
            status: stored.status,
            already_recorded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClassConfig, EnrollmentListing, ShiftConfigMap};
    use async_trait::async_trait;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store with insert-if-absent semantics.
    #[derive(Default)]
    struct MemoryStore {
        configs: ShiftConfigMap,
        attendance: Mutex<HashMap<(String, NaiveDate), AttendanceRecord>>,
        /// Simulates a stale read: find_attendance reports nothing even
        /// when a record exists.
        hide_from_find: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn list_enrollments(&self) -> Result<Vec<EnrollmentListing>, StoreError> {
            Ok(Vec::new())
        }

        async fn find_student(&self, _: &str) -> Result<Option<StoredStudent>, StoreError> {
            Ok(None)
        }

        async fn find_attendance(
            &self,
            auth_uid: &str,
            date: NaiveDate,
        ) -> Result<Option<AttendanceRecord>, StoreError> {
            if self.hide_from_find.load(std::sync::atomic::Ordering::SeqCst) {
                return Ok(None);
            }
            let map = self.attendance.lock().unwrap();
            Ok(map.get(&(auth_uid.to_string(), date)).cloned())
        }

        async fn list_shift_configs(&self) -> Result<ShiftConfigMap, StoreError> {
            Ok(self.configs.clone())
        }

        async fn create_attendance_if_absent(
            &self,
            record: AttendanceRecord,
        ) -> Result<AttendanceRecord, StoreError> {
            let mut map = self.attendance.lock().unwrap();
            let key = (record.auth_uid.clone(), record.date);
            Ok(map.entry(key).or_insert(record).clone())
        }
    }

    fn morning_configs(start: &str, grace: Option<GraceValue>) -> ShiftConfigMap {
        let mut shifts = HashMap::new();
        shifts.insert(
            "Morning".to_string(),
            ShiftConfig {
                start_time: Some(start.to_string()),
                grace_minutes: grace,
            },
        );
        let mut configs = ShiftConfigMap::new();
        configs.insert("12A".to_string(), ClassConfig { shifts });
        configs
    }

    fn student(grace: Option<GraceValue>, alias: Option<GraceValue>) -> StoredStudent {
        StoredStudent {
            doc_id: "doc-1".to_string(),
            record: StudentRecord {
                auth_uid: Some("a1".to_string()),
                full_name: Some("Sok Dara".to_string()),
                class: Some("Class 12A".to_string()),
                shift: Some("Morning".to_string()),
                grace_period_minutes: grace,
                grade_period_minutes: alias,
                facial_embeddings: Vec::new(),
            },
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<FixedOffset> {
        reference_timezone()
            .with_ymd_and_hms(2025, 3, 10, h, m, s)
            .unwrap()
    }

    fn decider(configs: ShiftConfigMap) -> (AttendanceDecider, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore {
            configs,
            ..Default::default()
        });
        (AttendanceDecider::new(store.clone()), store)
    }

    #[test]
    fn test_grace_coerces_numeric_string() {
        let s = student(Some(GraceValue::Text("30".into())), None);
        assert_eq!(resolve_grace_minutes(&s.record, None), 30);
    }

    #[test]
    fn test_grace_falls_back_to_misspelled_alias() {
        let s = student(None, Some(GraceValue::Number(20.0)));
        assert_eq!(resolve_grace_minutes(&s.record, None), 20);
    }

    #[test]
    fn test_grace_fractional_value_truncates() {
        let s = student(Some(GraceValue::Text("20.9".into())), None);
        assert_eq!(resolve_grace_minutes(&s.record, None), 20);
    }

    #[test]
    fn test_grace_defaults_when_absent() {
        let s = student(None, None);
        assert_eq!(resolve_grace_minutes(&s.record, None), DEFAULT_GRACE_MINUTES);
    }

    #[test]
    fn test_grace_defaults_on_unparsable_value() {
        let s = student(Some(GraceValue::Text("soon".into())), None);
        assert_eq!(resolve_grace_minutes(&s.record, None), DEFAULT_GRACE_MINUTES);
    }

    #[test]
    fn test_grace_uses_shift_config_when_student_has_none() {
        let s = student(None, None);
        let shift = ShiftConfig {
            start_time: Some("08:00".into()),
            grace_minutes: Some(GraceValue::Number(5.0)),
        };
        assert_eq!(resolve_grace_minutes(&s.record, Some(&shift)), 5);
    }

    #[test]
    fn test_parse_start_time() {
        assert_eq!(parse_start_time("08:00"), Some((8, 0)));
        assert_eq!(parse_start_time("13:45"), Some((13, 45)));
        assert_eq!(parse_start_time("8"), None);
        assert_eq!(parse_start_time("25:00"), None);
        assert_eq!(parse_start_time("08:61"), None);
    }

    #[tokio::test]
    async fn test_within_grace_is_present() {
        let (decider, _) = decider(morning_configs("08:00", None));
        let d = decider
            .record_at(at(8, 14, 59), &student(None, None), "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(d.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_past_grace_is_late() {
        let (decider, _) = decider(morning_configs("08:00", None));
        let d = decider
            .record_at(at(8, 15, 1), &student(None, None), "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(d.status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn test_exactly_on_deadline_is_present() {
        let (decider, _) = decider(morning_configs("08:00", None));
        let d = decider
            .record_at(at(8, 15, 0), &student(None, None), "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(d.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_missing_shift_config_defaults_to_present() {
        // No class configs at all; even a very late arrival is present.
        let (decider, _) = decider(ShiftConfigMap::new());
        let d = decider
            .record_at(at(11, 0, 0), &student(None, None), "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(d.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_missing_class_on_student_defaults_to_present() {
        let (decider, _) = decider(morning_configs("08:00", None));
        let mut s = student(None, None);
        s.record.class = None;
        let d = decider
            .record_at(at(11, 0, 0), &s, "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(d.status, AttendanceStatus::Present);
    }

    #[tokio::test]
    async fn test_class_prefix_is_stripped_for_config_lookup() {
        // Student says "Class 12A"; configs are keyed "12A". A late
        // arrival proves the config was actually found.
        let (decider, _) = decider(morning_configs("08:00", None));
        let d = decider
            .record_at(at(9, 0, 0), &student(None, None), "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(d.status, AttendanceStatus::Late);
    }

    #[tokio::test]
    async fn test_second_recognition_same_day_is_idempotent() {
        let (decider, store) = decider(morning_configs("08:00", None));
        let s = student(None, None);

        let first = decider
            .record_at(at(8, 20, 0), &s, "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(first.status, AttendanceStatus::Late);
        assert!(!first.already_recorded);

        // Second scan much later the same day: stored status wins.
        let second = decider
            .record_at(at(16, 0, 0), &s, "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(second.status, AttendanceStatus::Late);
        assert!(second.already_recorded);

        assert_eq!(store.attendance.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_carries_audit_fields() {
        let (decider, store) = decider(morning_configs("08:00", None));
        decider
            .record_at(at(8, 0, 0), &student(None, None), "a1", "admin@school")
            .await
            .unwrap();

        let map = store.attendance.lock().unwrap();
        let rec = map.values().next().unwrap();
        assert_eq!(rec.student_id, "doc-1");
        assert_eq!(rec.student_name, "Sok Dara");
        assert_eq!(rec.recorded_by, "Face Recognition by admin@school");
        assert_eq!(rec.date, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    }

    #[tokio::test]
    async fn test_lost_insert_race_reports_winners_status() {
        let (decider, store) = decider(morning_configs("08:00", None));
        let s = student(None, None);

        // A concurrent winner slipped a record in between our absence
        // check and our insert.
        let winner = AttendanceRecord {
            id: "w".into(),
            student_id: "doc-1".into(),
            auth_uid: "a1".into(),
            student_name: "Sok Dara".into(),
            class: None,
            shift: None,
            status: AttendanceStatus::Late,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            created_at: Utc::now(),
            recorded_by: "Face Recognition by other@school".into(),
        };
        store
            .attendance
            .lock()
            .unwrap()
            .insert(("a1".to_string(), winner.date), winner);
        store
            .hide_from_find
            .store(true, std::sync::atomic::Ordering::SeqCst);

        // We arrive on time, but the conditional insert loses and the
        // winner's stored status comes back.
        let d = decider
            .record_at(at(8, 0, 0), &s, "a1", "admin@school")
            .await
            .unwrap();
        assert_eq!(d.status, AttendanceStatus::Late);
        assert_eq!(store.attendance.lock().unwrap().len(), 1);
    }
}
