//! Spaced-repetition engine shared by course exercises and the dictionary.
//!
//! Both revision flows run through the same pieces: a due-first selector,
//! a distractor generator for multiple-choice rendering, and the Fibonacci
//! interval scheduler. The flows differ only in where their learnable units
//! live, which is abstracted behind [`RevisionSource`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::NaiveDateTime;
use serde_json::json;
use thiserror::Error;

pub mod distractors;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod sources;

/// Maximum number of items handed out per revision session.
pub const SESSION_LIMIT: usize = 10;
/// Wrong answers generated per multiple-choice item.
pub const DISTRACTOR_COUNT: usize = 3;
/// Successful reviews needed before an item counts as mastered.
pub const MASTERY_THRESHOLD: i32 = 3;

/// Per-(student, unit) revision state, with the unit's question/answer text
/// resolved from its catalog at load time.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduleRecord {
    /// Storage id of the per-student row; 0 until first persisted.
    pub id: i32,
    pub unit_id: i32,
    pub prompt: String,
    pub answer: Option<String>,
    pub successes: i32,
    pub is_master: bool,
    pub next_1: i32,
    pub next_2: i32,
    /// None means never scheduled; such records are only reachable via backfill.
    pub revise_at: Option<NaiveDateTime>,
    /// False retires the record from all selection without deleting it.
    pub continue_revision: bool,
}

impl ScheduleRecord {
    /// State for a unit the student has never reviewed.
    pub fn fresh(unit_id: i32, prompt: String, answer: Option<String>) -> Self {
        Self {
            id: 0,
            unit_id,
            prompt,
            answer,
            successes: 0,
            is_master: false,
            next_1: 1,
            next_2: 1,
            revise_at: None,
            continue_revision: true,
        }
    }
}

/// Resolved media URLs for a unit; missing files degrade to None.
#[derive(Clone, Debug, Default)]
pub struct MediaRefs {
    pub image: Option<String>,
    pub audio: Option<String>,
}

/// Capability interface over one catalog of learnable units.
///
/// Implementations carry their own scope (a course, or the student's word
/// list) and must uphold the ordering contracts: `due_records` ascending by
/// (`revise_at`, id), `backfill_records` ascending by (`successes`, id).
/// Both exclude retired records (`continue_revision = false`).
pub trait RevisionSource {
    fn due_records(
        &mut self,
        student_id: i32,
        now: NaiveDateTime,
    ) -> Result<Vec<ScheduleRecord>, RevisionError>;

    fn backfill_records(
        &mut self,
        student_id: i32,
        exclude: &[i32],
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>, RevisionError>;

    /// Count of due records, independent of the session cap.
    fn count_due(&mut self, student_id: i32, now: NaiveDateTime) -> Result<i64, RevisionError>;

    /// Distinct answer values visible in this scope, for distractor building.
    fn answer_pool(&mut self, student_id: i32) -> Result<Vec<String>, RevisionError>;

    /// Load a record by id, verifying it belongs to the student and scope.
    fn find_record(
        &mut self,
        student_id: i32,
        record_id: i32,
    ) -> Result<ScheduleRecord, RevisionError>;

    fn save_record(
        &mut self,
        student_id: i32,
        record: &ScheduleRecord,
        now: NaiveDateTime,
    ) -> Result<(), RevisionError>;

    fn media(&mut self, _unit_id: i32) -> MediaRefs {
        MediaRefs::default()
    }
}

#[derive(Error, Debug)]
pub enum RevisionError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("Not logged in")]
    Unauthorized,
    #[error("Database error")]
    Database(#[from] diesel::result::Error),
    #[error("Database connection unavailable")]
    Connection(String),
}

impl IntoResponse for RevisionError {
    fn into_response(self) -> Response {
        let status = match &self {
            RevisionError::NotFound(_) | RevisionError::Validation(_) => StatusCode::BAD_REQUEST,
            RevisionError::Unauthorized => StatusCode::UNAUTHORIZED,
            RevisionError::Database(_) | RevisionError::Connection(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// In-memory [`RevisionSource`] mirroring the query contracts of the
    /// diesel-backed sources.
    pub struct MemorySource {
        pub records: Vec<(i32, ScheduleRecord)>,
        pub pool: Vec<String>,
        pub media: Vec<(i32, MediaRefs)>,
        pub saved_ids: Vec<i32>,
    }

    impl MemorySource {
        pub fn new(student_id: i32, records: Vec<ScheduleRecord>) -> Self {
            Self {
                records: records.into_iter().map(|r| (student_id, r)).collect(),
                pool: Vec::new(),
                media: Vec::new(),
                saved_ids: Vec::new(),
            }
        }

        fn active(&self, student_id: i32) -> impl Iterator<Item = &ScheduleRecord> {
            self.records
                .iter()
                .filter(move |(owner, r)| *owner == student_id && r.continue_revision)
                .map(|(_, r)| r)
        }
    }

    impl RevisionSource for MemorySource {
        fn due_records(
            &mut self,
            student_id: i32,
            now: NaiveDateTime,
        ) -> Result<Vec<ScheduleRecord>, RevisionError> {
            let mut due: Vec<ScheduleRecord> = self
                .active(student_id)
                .filter(|r| r.revise_at.is_some_and(|at| at <= now))
                .cloned()
                .collect();
            due.sort_by_key(|r| (r.revise_at, r.id));
            Ok(due)
        }

        fn backfill_records(
            &mut self,
            student_id: i32,
            exclude: &[i32],
            limit: i64,
        ) -> Result<Vec<ScheduleRecord>, RevisionError> {
            let mut rest: Vec<ScheduleRecord> = self
                .active(student_id)
                .filter(|r| !exclude.contains(&r.id))
                .cloned()
                .collect();
            rest.sort_by_key(|r| (r.successes, r.id));
            rest.truncate(limit as usize);
            Ok(rest)
        }

        fn count_due(
            &mut self,
            student_id: i32,
            now: NaiveDateTime,
        ) -> Result<i64, RevisionError> {
            Ok(self
                .active(student_id)
                .filter(|r| r.revise_at.is_some_and(|at| at <= now))
                .count() as i64)
        }

        fn answer_pool(&mut self, _student_id: i32) -> Result<Vec<String>, RevisionError> {
            Ok(self.pool.clone())
        }

        fn find_record(
            &mut self,
            student_id: i32,
            record_id: i32,
        ) -> Result<ScheduleRecord, RevisionError> {
            self.records
                .iter()
                .find(|(owner, r)| *owner == student_id && r.id == record_id)
                .map(|(_, r)| r.clone())
                .ok_or_else(|| {
                    RevisionError::NotFound(format!("Revision item {record_id} not found"))
                })
        }

        fn save_record(
            &mut self,
            student_id: i32,
            record: &ScheduleRecord,
            _now: NaiveDateTime,
        ) -> Result<(), RevisionError> {
            let slot = self
                .records
                .iter_mut()
                .find(|(owner, r)| *owner == student_id && r.id == record.id)
                .ok_or_else(|| {
                    RevisionError::NotFound(format!("Revision item {} not found", record.id))
                })?;
            slot.1 = record.clone();
            self.saved_ids.push(record.id);
            Ok(())
        }

        fn media(&mut self, unit_id: i32) -> MediaRefs {
            self.media
                .iter()
                .find(|(id, _)| *id == unit_id)
                .map(|(_, refs)| refs.clone())
                .unwrap_or_default()
        }
    }
}
