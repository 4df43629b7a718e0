//! Diesel-backed [`RevisionSource`] implementations, one per catalog.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use std::path::{Path, PathBuf};

use crate::schema::{activities, dictionary_words, items, lessons, student_items, student_words};

use super::{MediaRefs, RevisionError, RevisionSource, ScheduleRecord};

type RecordRow = (
    i32,
    i32,
    String,
    Option<String>,
    i32,
    bool,
    i32,
    i32,
    Option<NaiveDateTime>,
    bool,
);

fn into_record(row: RecordRow) -> ScheduleRecord {
    let (id, unit_id, prompt, answer, successes, is_master, next_1, next_2, revise_at, cont) = row;
    ScheduleRecord {
        id,
        unit_id,
        prompt,
        answer,
        successes,
        is_master,
        next_1,
        next_2,
        revise_at,
        continue_revision: cont,
    }
}

fn media_root() -> PathBuf {
    std::env::var("MEDIA_ROOT").unwrap_or_else(|_| "media".into()).into()
}

/// Resolves a stored media path to its served URL, or None if the file is gone.
pub fn resolve_media_ref(relative: &str) -> Option<String> {
    resolve_media(&media_root(), relative)
}

fn resolve_media(root: &Path, relative: &str) -> Option<String> {
    if root.join(relative).is_file() {
        Some(format!("/media/{relative}"))
    } else {
        log::warn!("Missing media file: {relative}");
        None
    }
}

/// Course-item catalog: schedule rows scoped to one course, with the
/// question/answer text read live from the items table.
pub struct CourseItemSource<'a> {
    conn: &'a mut SqliteConnection,
    course_id: i32,
    media_root: PathBuf,
}

impl<'a> CourseItemSource<'a> {
    pub fn new(conn: &'a mut SqliteConnection, course_id: i32) -> Self {
        Self {
            conn,
            course_id,
            media_root: media_root(),
        }
    }
}

impl RevisionSource for CourseItemSource<'_> {
    fn due_records(
        &mut self,
        student_id: i32,
        now: NaiveDateTime,
    ) -> Result<Vec<ScheduleRecord>, RevisionError> {
        let rows = student_items::table
            .inner_join(items::table.inner_join(activities::table.inner_join(lessons::table)))
            .filter(lessons::course_id.eq(self.course_id))
            .filter(student_items::user_id.eq(student_id))
            .filter(student_items::continue_revision.eq(true))
            .filter(student_items::revise_at.le(now))
            .order((
                student_items::revise_at.asc(),
                student_items::student_item_id.asc(),
            ))
            .select((
                student_items::student_item_id,
                student_items::item_id,
                items::question,
                items::answer,
                student_items::successes,
                student_items::is_master,
                student_items::next_1,
                student_items::next_2,
                student_items::revise_at,
                student_items::continue_revision,
            ))
            .load::<RecordRow>(self.conn)?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    fn backfill_records(
        &mut self,
        student_id: i32,
        exclude: &[i32],
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>, RevisionError> {
        let rows = student_items::table
            .inner_join(items::table.inner_join(activities::table.inner_join(lessons::table)))
            .filter(lessons::course_id.eq(self.course_id))
            .filter(student_items::user_id.eq(student_id))
            .filter(student_items::continue_revision.eq(true))
            .filter(student_items::student_item_id.ne_all(exclude))
            .order((
                student_items::successes.asc(),
                student_items::student_item_id.asc(),
            ))
            .limit(limit)
            .select((
                student_items::student_item_id,
                student_items::item_id,
                items::question,
                items::answer,
                student_items::successes,
                student_items::is_master,
                student_items::next_1,
                student_items::next_2,
                student_items::revise_at,
                student_items::continue_revision,
            ))
            .load::<RecordRow>(self.conn)?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    fn count_due(&mut self, student_id: i32, now: NaiveDateTime) -> Result<i64, RevisionError> {
        let count = student_items::table
            .inner_join(items::table.inner_join(activities::table.inner_join(lessons::table)))
            .filter(lessons::course_id.eq(self.course_id))
            .filter(student_items::user_id.eq(student_id))
            .filter(student_items::continue_revision.eq(true))
            .filter(student_items::revise_at.le(now))
            .count()
            .get_result(self.conn)?;
        Ok(count)
    }

    fn answer_pool(&mut self, _student_id: i32) -> Result<Vec<String>, RevisionError> {
        let answers = items::table
            .inner_join(activities::table.inner_join(lessons::table))
            .filter(lessons::course_id.eq(self.course_id))
            .filter(items::answer.is_not_null())
            .select(items::answer.assume_not_null())
            .distinct()
            .load::<String>(self.conn)?;
        Ok(answers)
    }

    fn find_record(
        &mut self,
        student_id: i32,
        record_id: i32,
    ) -> Result<ScheduleRecord, RevisionError> {
        let row = student_items::table
            .inner_join(items::table.inner_join(activities::table.inner_join(lessons::table)))
            .filter(lessons::course_id.eq(self.course_id))
            .filter(student_items::user_id.eq(student_id))
            .filter(student_items::student_item_id.eq(record_id))
            .select((
                student_items::student_item_id,
                student_items::item_id,
                items::question,
                items::answer,
                student_items::successes,
                student_items::is_master,
                student_items::next_1,
                student_items::next_2,
                student_items::revise_at,
                student_items::continue_revision,
            ))
            .first::<RecordRow>(self.conn)
            .optional()?;

        row.map(into_record)
            .ok_or_else(|| RevisionError::NotFound(format!("Revision item {record_id} not found")))
    }

    fn save_record(
        &mut self,
        student_id: i32,
        record: &ScheduleRecord,
        now: NaiveDateTime,
    ) -> Result<(), RevisionError> {
        diesel::update(
            student_items::table
                .filter(student_items::student_item_id.eq(record.id))
                .filter(student_items::user_id.eq(student_id)),
        )
        .set((
            student_items::successes.eq(record.successes),
            student_items::is_master.eq(record.is_master),
            student_items::next_1.eq(record.next_1),
            student_items::next_2.eq(record.next_2),
            student_items::revise_at.eq(record.revise_at),
            student_items::continue_revision.eq(record.continue_revision),
            student_items::updated_at.eq(now),
        ))
        .execute(self.conn)?;
        Ok(())
    }

    fn media(&mut self, unit_id: i32) -> MediaRefs {
        let refs = items::table
            .find(unit_id)
            .select((items::image, items::audio))
            .first::<(Option<String>, Option<String>)>(self.conn);

        match refs {
            Ok((image, audio)) => MediaRefs {
                image: image.and_then(|p| resolve_media(&self.media_root, &p)),
                audio: audio.and_then(|p| resolve_media(&self.media_root, &p)),
            },
            Err(e) => {
                log::warn!("Media lookup failed for item {unit_id}: {e}");
                MediaRefs::default()
            }
        }
    }
}

/// Dictionary catalog: the student's personal word list, with word/meaning
/// read live from the dictionary table. Words carry no media.
pub struct StudentWordSource<'a> {
    conn: &'a mut SqliteConnection,
}

impl<'a> StudentWordSource<'a> {
    pub fn new(conn: &'a mut SqliteConnection) -> Self {
        Self { conn }
    }
}

impl RevisionSource for StudentWordSource<'_> {
    fn due_records(
        &mut self,
        student_id: i32,
        now: NaiveDateTime,
    ) -> Result<Vec<ScheduleRecord>, RevisionError> {
        let rows = student_words::table
            .inner_join(dictionary_words::table)
            .filter(student_words::user_id.eq(student_id))
            .filter(student_words::continue_revision.eq(true))
            .filter(student_words::revise_at.le(now))
            .order((
                student_words::revise_at.asc(),
                student_words::student_word_id.asc(),
            ))
            .select((
                student_words::student_word_id,
                student_words::word_id,
                dictionary_words::word,
                dictionary_words::meaning.nullable(),
                student_words::successes,
                student_words::is_master,
                student_words::next_1,
                student_words::next_2,
                student_words::revise_at,
                student_words::continue_revision,
            ))
            .load::<RecordRow>(self.conn)?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    fn backfill_records(
        &mut self,
        student_id: i32,
        exclude: &[i32],
        limit: i64,
    ) -> Result<Vec<ScheduleRecord>, RevisionError> {
        let rows = student_words::table
            .inner_join(dictionary_words::table)
            .filter(student_words::user_id.eq(student_id))
            .filter(student_words::continue_revision.eq(true))
            .filter(student_words::student_word_id.ne_all(exclude))
            .order((
                student_words::successes.asc(),
                student_words::student_word_id.asc(),
            ))
            .limit(limit)
            .select((
                student_words::student_word_id,
                student_words::word_id,
                dictionary_words::word,
                dictionary_words::meaning.nullable(),
                student_words::successes,
                student_words::is_master,
                student_words::next_1,
                student_words::next_2,
                student_words::revise_at,
                student_words::continue_revision,
            ))
            .load::<RecordRow>(self.conn)?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    fn count_due(&mut self, student_id: i32, now: NaiveDateTime) -> Result<i64, RevisionError> {
        let count = student_words::table
            .filter(student_words::user_id.eq(student_id))
            .filter(student_words::continue_revision.eq(true))
            .filter(student_words::revise_at.le(now))
            .count()
            .get_result(self.conn)?;
        Ok(count)
    }

    fn answer_pool(&mut self, student_id: i32) -> Result<Vec<String>, RevisionError> {
        let meanings = student_words::table
            .inner_join(dictionary_words::table)
            .filter(student_words::user_id.eq(student_id))
            .select(dictionary_words::meaning)
            .distinct()
            .load::<String>(self.conn)?;
        Ok(meanings)
    }

    fn find_record(
        &mut self,
        student_id: i32,
        record_id: i32,
    ) -> Result<ScheduleRecord, RevisionError> {
        let row = student_words::table
            .inner_join(dictionary_words::table)
            .filter(student_words::user_id.eq(student_id))
            .filter(student_words::student_word_id.eq(record_id))
            .select((
                student_words::student_word_id,
                student_words::word_id,
                dictionary_words::word,
                dictionary_words::meaning.nullable(),
                student_words::successes,
                student_words::is_master,
                student_words::next_1,
                student_words::next_2,
                student_words::revise_at,
                student_words::continue_revision,
            ))
            .first::<RecordRow>(self.conn)
            .optional()?;

        row.map(into_record)
            .ok_or_else(|| RevisionError::NotFound(format!("Revision word {record_id} not found")))
    }

    fn save_record(
        &mut self,
        student_id: i32,
        record: &ScheduleRecord,
        now: NaiveDateTime,
    ) -> Result<(), RevisionError> {
        diesel::update(
            student_words::table
                .filter(student_words::student_word_id.eq(record.id))
                .filter(student_words::user_id.eq(student_id)),
        )
        .set((
            student_words::successes.eq(record.successes),
            student_words::is_master.eq(record.is_master),
            student_words::next_1.eq(record.next_1),
            student_words::next_2.eq(record.next_2),
            student_words::revise_at.eq(record.revise_at),
            student_words::continue_revision.eq(record.continue_revision),
            student_words::updated_at.eq(now),
        ))
        .execute(self.conn)?;
        Ok(())
    }
}
