//! Session item selection: due reviews first, least-reviewed backfill after.

use chrono::NaiveDateTime;

use super::{RevisionError, RevisionSource, ScheduleRecord};

/// Picks up to `limit` records for a session.
///
/// Due records come first, oldest due date leading. If fewer than `limit`
/// are due, the session is padded with the student's least-successful active
/// records so it is never empty while any active record exists.
pub fn select_session_items<S>(
    source: &mut S,
    student_id: i32,
    now: NaiveDateTime,
    limit: usize,
) -> Result<Vec<ScheduleRecord>, RevisionError>
where
    S: RevisionSource + ?Sized,
{
    let mut records = source.due_records(student_id, now)?;
    records.truncate(limit);

    if records.len() < limit {
        let exclude: Vec<i32> = records.iter().map(|r| r.id).collect();
        let remaining = (limit - records.len()) as i64;
        records.extend(source.backfill_records(student_id, &exclude, remaining)?);
    }

    Ok(records)
}
