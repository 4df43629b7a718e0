//! Session assembly and batch outcome submission.

use chrono::{DateTime, NaiveDateTime};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{
    DISTRACTOR_COUNT, RevisionError, RevisionSource, SESSION_LIMIT, distractors, scheduler,
    selector,
};

/// One reviewable item as handed to the client.
///
/// `wrong_answers`/`options` are empty when the unit has no answer text and
/// cannot be rendered as multiple choice; the client falls back to card mode.
#[derive(Debug, Serialize)]
pub struct SessionItem {
    pub record_id: i32,
    pub unit_id: i32,
    pub prompt: String,
    pub answer: Option<String>,
    pub wrong_answers: Vec<String>,
    pub options: Vec<String>,
    pub successes: i32,
    pub is_master: bool,
    pub next_1: i32,
    pub next_2: i32,
    pub revise_at: Option<NaiveDateTime>,
    pub continue_revision: bool,
    pub image: Option<String>,
    pub audio: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionPayload {
    /// Strict due count in scope, independent of the session cap.
    pub due_count: i64,
    pub items: Vec<SessionItem>,
}

#[derive(Debug, Serialize)]
pub struct SubmitStats {
    pub remaining_items: i64,
}

/// Response body for outcome submissions.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub message: String,
    pub stats: SubmitStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

impl SubmitResponse {
    pub fn saved(message: &str, remaining_items: i64, redirect_url: Option<String>) -> Self {
        Self {
            status: "success",
            message: message.to_owned(),
            stats: SubmitStats { remaining_items },
            redirect_url,
        }
    }
}

/// One submitted review outcome.
///
/// `revise_at` is a legacy client field: its format is still validated, but
/// the schedule is computed server-side from `passed`.
#[derive(Debug, Deserialize)]
pub struct OutcomeReport {
    pub record_id: i32,
    pub passed: bool,
    #[serde(default)]
    pub revise_at: Option<String>,
    #[serde(default = "default_continue_revision")]
    pub continue_revision: bool,
}

fn default_continue_revision() -> bool {
    true
}

/// Builds a bounded session for the student within the source's scope.
pub fn build_session<S, R>(
    source: &mut S,
    student_id: i32,
    now: NaiveDateTime,
    rng: &mut R,
) -> Result<SessionPayload, RevisionError>
where
    S: RevisionSource + ?Sized,
    R: Rng + ?Sized,
{
    let records = selector::select_session_items(source, student_id, now, SESSION_LIMIT)?;
    let due_count = source.count_due(student_id, now)?;
    let pool = source.answer_pool(student_id)?;

    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let media = source.media(record.unit_id);
        let (wrong, options) = match record.answer.as_deref() {
            Some(answer) => {
                let wrong = distractors::wrong_answers(answer, &pool, DISTRACTOR_COUNT, rng);
                let options = distractors::shuffled_options(answer, &wrong, rng);
                (wrong, options)
            }
            None => (Vec::new(), Vec::new()),
        };

        items.push(SessionItem {
            record_id: record.id,
            unit_id: record.unit_id,
            prompt: record.prompt,
            answer: record.answer,
            wrong_answers: wrong,
            options,
            successes: record.successes,
            is_master: record.is_master,
            next_1: record.next_1,
            next_2: record.next_2,
            revise_at: record.revise_at,
            continue_revision: record.continue_revision,
            image: media.image,
            audio: media.audio,
        });
    }

    Ok(SessionPayload { due_count, items })
}

/// Applies a batch of outcomes and returns the remaining due count.
///
/// Validation and ownership checks run for the whole batch before anything
/// is written, so a bad report leaves every record untouched. Callers wrap
/// this in a storage transaction to keep the due count consistent.
pub fn submit_outcomes<S>(
    source: &mut S,
    student_id: i32,
    reports: &[OutcomeReport],
    now: NaiveDateTime,
) -> Result<i64, RevisionError>
where
    S: RevisionSource + ?Sized,
{
    let mut updated = Vec::with_capacity(reports.len());
    for report in reports {
        if let Some(raw) = report.revise_at.as_deref() {
            parse_client_revise_at(raw)?;
        }
        let record = source.find_record(student_id, report.record_id)?;
        let mut next = scheduler::apply_outcome(&record, report.passed, now);
        next.continue_revision = report.continue_revision;
        updated.push(next);
    }

    for record in &updated {
        source.save_record(student_id, record, now)?;
    }

    source.count_due(student_id, now)
}

fn parse_client_revise_at(raw: &str) -> Result<NaiveDateTime, RevisionError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| RevisionError::Validation(format!("Invalid revise_at format: {e}")))
}
