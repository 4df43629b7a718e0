//! End-to-end revision flow against the diesel-backed sources, using an
//! in-memory SQLite database.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use whatslearn::revision::{
    RevisionError, RevisionSource,
    selector::select_session_items,
    session::{self, OutcomeReport},
    sources::{CourseItemSource, StudentWordSource},
};
use whatslearn::schema::{
    activities, courses, dictionary_words, items, lessons, student_items, student_words, users,
};

const SCHEMA: &str = include_str!("../migrations/2025-06-10-000000_create_whatslearn/up.sql");

fn connect() -> SqliteConnection {
    let mut conn = SqliteConnection::establish(":memory:").expect("in-memory sqlite");
    conn.batch_execute(SCHEMA).expect("schema setup");
    conn
}

fn noon(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, day)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn seed_user(conn: &mut SqliteConnection, username: &str) -> i32 {
    diesel::insert_into(users::table)
        .values((
            users::email.eq(format!("{username}@example.com")),
            users::username.eq(username),
            users::password.eq("hash"),
            users::created_at.eq(noon(1)),
        ))
        .execute(conn)
        .unwrap();
    users::table
        .select(diesel::dsl::max(users::user_id))
        .first::<Option<i32>>(conn)
        .unwrap()
        .unwrap()
}

/// Creates a published course with one lesson, one exercise activity and
/// `item_count` items answering "answer N".
fn seed_course(conn: &mut SqliteConnection, title: &str, item_count: usize) -> (i32, Vec<i32>) {
    diesel::insert_into(courses::table)
        .values((
            courses::title.eq(title),
            courses::is_published.eq(true),
            courses::created_at.eq(noon(1)),
            courses::updated_at.eq(noon(1)),
        ))
        .execute(conn)
        .unwrap();
    let course_id = courses::table
        .select(diesel::dsl::max(courses::course_id))
        .first::<Option<i32>>(conn)
        .unwrap()
        .unwrap();

    diesel::insert_into(lessons::table)
        .values((
            lessons::course_id.eq(course_id),
            lessons::title.eq("Lesson 1"),
            lessons::position.eq(1),
            lessons::created_at.eq(noon(1)),
            lessons::updated_at.eq(noon(1)),
        ))
        .execute(conn)
        .unwrap();
    let lesson_id = lessons::table
        .select(diesel::dsl::max(lessons::lesson_id))
        .first::<Option<i32>>(conn)
        .unwrap()
        .unwrap();

    diesel::insert_into(activities::table)
        .values((
            activities::lesson_id.eq(lesson_id),
            activities::title.eq("Exercise 1"),
            activities::activity_type.eq("exercise"),
            activities::position.eq(1),
            activities::created_at.eq(noon(1)),
            activities::updated_at.eq(noon(1)),
        ))
        .execute(conn)
        .unwrap();
    let activity_id = activities::table
        .select(diesel::dsl::max(activities::activity_id))
        .first::<Option<i32>>(conn)
        .unwrap()
        .unwrap();

    let mut item_ids = Vec::with_capacity(item_count);
    for n in 1..=item_count {
        diesel::insert_into(items::table)
            .values((
                items::activity_id.eq(activity_id),
                items::item_type.eq("mc"),
                items::title.eq(format!("Item {n}")),
                items::question.eq(format!("question {n}")),
                items::answer.eq(format!("answer {n}")),
                items::position.eq(n as i32),
                items::created_at.eq(noon(1)),
                items::updated_at.eq(noon(1)),
            ))
            .execute(conn)
            .unwrap();
        let item_id = items::table
            .select(diesel::dsl::max(items::item_id))
            .first::<Option<i32>>(conn)
            .unwrap()
            .unwrap();
        item_ids.push(item_id);
    }

    (course_id, item_ids)
}

fn seed_student_item(
    conn: &mut SqliteConnection,
    user_id: i32,
    item_id: i32,
    successes: i32,
    revise_at: Option<NaiveDateTime>,
) -> i32 {
    diesel::insert_into(student_items::table)
        .values((
            student_items::user_id.eq(user_id),
            student_items::item_id.eq(item_id),
            student_items::successes.eq(successes),
            student_items::is_master.eq(successes >= 3),
            student_items::next_1.eq(1),
            student_items::next_2.eq(1),
            student_items::revise_at.eq(revise_at),
            student_items::continue_revision.eq(true),
            student_items::start_at.eq(noon(1)),
            student_items::updated_at.eq(noon(1)),
        ))
        .execute(conn)
        .unwrap();
    student_items::table
        .select(diesel::dsl::max(student_items::student_item_id))
        .first::<Option<i32>>(conn)
        .unwrap()
        .unwrap()
}

fn seed_word(conn: &mut SqliteConnection, word: &str, meaning: &str) -> i32 {
    diesel::insert_into(dictionary_words::table)
        .values((
            dictionary_words::word.eq(word),
            dictionary_words::meaning.eq(meaning),
        ))
        .execute(conn)
        .unwrap();
    dictionary_words::table
        .select(diesel::dsl::max(dictionary_words::word_id))
        .first::<Option<i32>>(conn)
        .unwrap()
        .unwrap()
}

fn seed_student_word(
    conn: &mut SqliteConnection,
    user_id: i32,
    word_id: i32,
    successes: i32,
    revise_at: Option<NaiveDateTime>,
) -> i32 {
    diesel::insert_into(student_words::table)
        .values((
            student_words::user_id.eq(user_id),
            student_words::word_id.eq(word_id),
            student_words::successes.eq(successes),
            student_words::is_master.eq(successes >= 3),
            student_words::next_1.eq(1),
            student_words::next_2.eq(1),
            student_words::revise_at.eq(revise_at),
            student_words::continue_revision.eq(true),
            student_words::start_at.eq(noon(1)),
            student_words::updated_at.eq(noon(1)),
        ))
        .execute(conn)
        .unwrap();
    student_words::table
        .select(diesel::dsl::max(student_words::student_word_id))
        .first::<Option<i32>>(conn)
        .unwrap()
        .unwrap()
}

fn report(record_id: i32, passed: bool) -> OutcomeReport {
    OutcomeReport {
        record_id,
        passed,
        revise_at: None,
        continue_revision: true,
    }
}

#[test]
fn course_session_selects_due_then_least_successful_backfill() {
    let mut conn = connect();
    let user = seed_user(&mut conn, "ada");
    let (course_id, item_ids) = seed_course(&mut conn, "Rust 101", 12);
    let now = noon(20);

    // 3 due records with distinct due dates, 9 future records with a spread
    // of success counts.
    let mut record_ids = Vec::new();
    record_ids.push(seed_student_item(&mut conn, user, item_ids[0], 5, Some(noon(11))));
    record_ids.push(seed_student_item(&mut conn, user, item_ids[1], 5, Some(noon(12))));
    record_ids.push(seed_student_item(&mut conn, user, item_ids[2], 5, Some(noon(13))));
    let successes = [0, 1, 1, 2, 2, 2, 3, 3, 4];
    for (i, s) in successes.iter().enumerate() {
        record_ids.push(seed_student_item(&mut conn, user, item_ids[3 + i], *s, Some(noon(25))));
    }

    let mut source = CourseItemSource::new(&mut conn, course_id);
    let picked = select_session_items(&mut source, user, now, 10).unwrap();

    assert_eq!(picked.len(), 10);
    let ids: Vec<i32> = picked.iter().map(|r| r.id).collect();
    assert_eq!(&ids[..3], &record_ids[..3]);
    let backfill: Vec<i32> = picked[3..].iter().map(|r| r.successes).collect();
    assert_eq!(backfill, vec![0, 1, 1, 2, 2, 2, 3]);

    // Prompt and answer come from the live item catalog.
    assert_eq!(picked[0].prompt, "question 1");
    assert_eq!(picked[0].answer.as_deref(), Some("answer 1"));
}

#[test]
fn records_from_other_courses_and_students_stay_invisible() {
    let mut conn = connect();
    let ada = seed_user(&mut conn, "ada");
    let bob = seed_user(&mut conn, "bob");
    let (course_a, items_a) = seed_course(&mut conn, "Course A", 2);
    let (_course_b, items_b) = seed_course(&mut conn, "Course B", 2);
    let now = noon(20);

    let mine_a = seed_student_item(&mut conn, ada, items_a[0], 0, Some(noon(10)));
    seed_student_item(&mut conn, ada, items_b[0], 0, Some(noon(10)));
    seed_student_item(&mut conn, bob, items_a[1], 0, Some(noon(10)));

    let mut source = CourseItemSource::new(&mut conn, course_a);
    let picked = select_session_items(&mut source, ada, now, 10).unwrap();
    let ids: Vec<i32> = picked.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![mine_a]);
}

#[test]
fn batch_with_out_of_scope_record_updates_nothing() {
    let mut conn = connect();
    let user = seed_user(&mut conn, "ada");
    let (course_a, items_a) = seed_course(&mut conn, "Course A", 1);
    let (_course_b, items_b) = seed_course(&mut conn, "Course B", 1);
    let now = noon(20);

    let rec_a = seed_student_item(&mut conn, user, items_a[0], 0, Some(noon(10)));
    let rec_b = seed_student_item(&mut conn, user, items_b[0], 0, Some(noon(10)));

    let reports = vec![report(rec_a, true), report(rec_b, true)];
    let result = conn.transaction::<i64, RevisionError, _>(|conn| {
        let mut source = CourseItemSource::new(conn, course_a);
        session::submit_outcomes(&mut source, user, &reports, now)
    });

    assert!(matches!(result, Err(RevisionError::NotFound(_))));
    let successes: i32 = student_items::table
        .find(rec_a)
        .select(student_items::successes)
        .first(&mut conn)
        .unwrap();
    assert_eq!(successes, 0);
}

#[test]
fn malformed_client_timestamp_aborts_batch() {
    let mut conn = connect();
    let user = seed_user(&mut conn, "ada");
    let (course_id, item_ids) = seed_course(&mut conn, "Rust 101", 1);
    let now = noon(20);
    let rec = seed_student_item(&mut conn, user, item_ids[0], 2, Some(noon(10)));

    let reports = vec![OutcomeReport {
        record_id: rec,
        passed: true,
        revise_at: Some("31/12/2025".into()),
        continue_revision: true,
    }];
    let result = conn.transaction::<i64, RevisionError, _>(|conn| {
        let mut source = CourseItemSource::new(conn, course_id);
        session::submit_outcomes(&mut source, user, &reports, now)
    });

    assert!(matches!(result, Err(RevisionError::Validation(_))));
    let successes: i32 = student_items::table
        .find(rec)
        .select(student_items::successes)
        .first(&mut conn)
        .unwrap();
    assert_eq!(successes, 2);
}

#[test]
fn passing_reviews_walk_the_fibonacci_intervals() {
    let mut conn = connect();
    let user = seed_user(&mut conn, "ada");
    let (course_id, item_ids) = seed_course(&mut conn, "Rust 101", 1);
    let now = noon(20);
    let rec = seed_student_item(&mut conn, user, item_ids[0], 2, Some(noon(10)));

    let remaining = conn
        .transaction::<i64, RevisionError, _>(|conn| {
            let mut source = CourseItemSource::new(conn, course_id);
            session::submit_outcomes(&mut source, user, &[report(rec, true)], now)
        })
        .unwrap();
    assert_eq!(remaining, 0);

    let (successes, is_master, next_1, next_2, revise_at): (i32, bool, i32, i32, Option<NaiveDateTime>) =
        student_items::table
            .find(rec)
            .select((
                student_items::successes,
                student_items::is_master,
                student_items::next_1,
                student_items::next_2,
                student_items::revise_at,
            ))
            .first(&mut conn)
            .unwrap();
    assert_eq!(successes, 3);
    assert!(is_master);
    assert_eq!((next_1, next_2), (1, 2));
    assert_eq!(revise_at, Some(now + Duration::days(1)));

    // Next review after it comes due again advances the pair to (2, 3).
    let later = now + Duration::days(2);
    conn.transaction::<i64, RevisionError, _>(|conn| {
        let mut source = CourseItemSource::new(conn, course_id);
        session::submit_outcomes(&mut source, user, &[report(rec, true)], later)
    })
    .unwrap();

    let (next_1, next_2, revise_at): (i32, i32, Option<NaiveDateTime>) = student_items::table
        .find(rec)
        .select((
            student_items::next_1,
            student_items::next_2,
            student_items::revise_at,
        ))
        .first(&mut conn)
        .unwrap();
    assert_eq!((next_1, next_2), (2, 3));
    assert_eq!(revise_at, Some(later + Duration::days(2)));
}

#[test]
fn session_build_resolves_missing_media_to_null() {
    let mut conn = connect();
    let user = seed_user(&mut conn, "ada");
    let (course_id, item_ids) = seed_course(&mut conn, "Rust 101", 4);
    diesel::update(items::table.find(item_ids[0]))
        .set(items::image.eq(Some("courses/1/gone.jpg")))
        .execute(&mut conn)
        .unwrap();
    seed_student_item(&mut conn, user, item_ids[0], 0, Some(noon(10)));
    let now = noon(20);

    let mut rng = StdRng::seed_from_u64(11);
    let mut source = CourseItemSource::new(&mut conn, course_id);
    let payload = session::build_session(&mut source, user, now, &mut rng).unwrap();

    assert_eq!(payload.items.len(), 1);
    assert_eq!(payload.items[0].image, None);
    assert_eq!(payload.items[0].audio, None);
    // Distractors come from the course's other answers.
    assert_eq!(payload.items[0].wrong_answers.len(), 3);
    assert!(!payload.items[0]
        .wrong_answers
        .contains(&"answer 1".to_owned()));
    assert_eq!(payload.items[0].options.len(), 4);
}

#[test]
fn dictionary_flow_round_trip() {
    let mut conn = connect();
    let user = seed_user(&mut conn, "ada");
    let mut word_ids = Vec::new();
    for (word, meaning) in [
        ("apple", "a fruit"),
        ("arrow", "a projectile"),
        ("artist", "a creator"),
        ("autumn", "a season"),
    ] {
        word_ids.push(seed_word(&mut conn, word, meaning));
    }
    let now = noon(20);

    let due = seed_student_word(&mut conn, user, word_ids[0], 2, Some(noon(12)));
    seed_student_word(&mut conn, user, word_ids[1], 0, None);
    seed_student_word(&mut conn, user, word_ids[2], 2, Some(noon(25)));
    seed_student_word(&mut conn, user, word_ids[3], 2, Some(noon(11)));

    let mut rng = StdRng::seed_from_u64(5);
    let payload = {
        let mut source = StudentWordSource::new(&mut conn);
        session::build_session(&mut source, user, now, &mut rng).unwrap()
    };

    assert_eq!(payload.due_count, 2);
    assert_eq!(payload.items.len(), 4);
    // Oldest due word first, then the second due one, then backfill.
    assert_eq!(payload.items[0].prompt, "autumn");
    assert_eq!(payload.items[1].prompt, "apple");

    // Wrong answers are drawn from the student's own meanings.
    let own_meanings = ["a fruit", "a projectile", "a creator", "a season"];
    for wrong in &payload.items[1].wrong_answers {
        assert!(own_meanings.contains(&wrong.as_str()));
        assert_ne!(wrong, "a fruit");
    }

    // Submit a pass for the due word and retire another.
    let reports = vec![
        report(due, true),
        OutcomeReport {
            record_id: payload.items[0].record_id,
            passed: true,
            revise_at: None,
            continue_revision: false,
        },
    ];
    let remaining = conn
        .transaction::<i64, RevisionError, _>(|conn| {
            let mut source = StudentWordSource::new(conn);
            session::submit_outcomes(&mut source, user, &reports, now)
        })
        .unwrap();
    assert_eq!(remaining, 0);

    let (successes, cont): (i32, bool) = student_words::table
        .find(payload.items[0].record_id)
        .select((student_words::successes, student_words::continue_revision))
        .first(&mut conn)
        .unwrap();
    assert_eq!(successes, 3);
    assert!(!cont);

    // The retired word no longer shows up in sessions.
    let mut source = StudentWordSource::new(&mut conn);
    let next_session = session::build_session(&mut source, user, now, &mut rng).unwrap();
    assert!(
        next_session
            .items
            .iter()
            .all(|item| item.prompt != "autumn")
    );
}

#[test]
fn retired_course_records_are_skipped_but_kept() {
    let mut conn = connect();
    let user = seed_user(&mut conn, "ada");
    let (course_id, item_ids) = seed_course(&mut conn, "Rust 101", 2);
    let now = noon(20);

    let retired = seed_student_item(&mut conn, user, item_ids[0], 1, Some(noon(10)));
    diesel::update(student_items::table.find(retired))
        .set(student_items::continue_revision.eq(false))
        .execute(&mut conn)
        .unwrap();
    let active = seed_student_item(&mut conn, user, item_ids[1], 0, None);

    let mut source = CourseItemSource::new(&mut conn, course_id);
    assert_eq!(source.count_due(user, now).unwrap(), 0);
    let picked = select_session_items(&mut source, user, now, 10).unwrap();
    let ids: Vec<i32> = picked.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![active]);

    // The row itself survives retirement.
    let exists: i64 = student_items::table
        .filter(student_items::student_item_id.eq(retired))
        .count()
        .get_result(&mut conn)
        .unwrap();
    assert_eq!(exists, 1);
}
