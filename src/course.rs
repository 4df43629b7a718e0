use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use rand::thread_rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tower_sessions::Session;

use crate::{
    DbConn, DbPool,
    model::{Activity, ActivityType, ApiResponse, Course, Item, ItemType},
    revision::{
        DISTRACTOR_COUNT, MASTERY_THRESHOLD, RevisionError, RevisionSource, ScheduleRecord,
        distractors, scheduler,
        session::{self, OutcomeReport, SessionItem, SubmitResponse},
        sources::{CourseItemSource, resolve_media_ref},
    },
    schema::{
        activities, courses, items, lessons, student_activities, student_courses, student_items,
    },
    utils,
};

pub(crate) async fn current_user(session: &Session) -> Result<i32, RevisionError> {
    utils::session::get_current_user_id(session)
        .await
        .ok_or(RevisionError::Unauthorized)
}

pub(crate) fn get_conn(pool: &DbPool) -> Result<DbConn, RevisionError> {
    pool.get()
        .map_err(|e| RevisionError::Connection(e.to_string()))
}

fn ensure_enrolled(
    conn: &mut SqliteConnection,
    user_id: i32,
    course_id: i32,
) -> Result<(), RevisionError> {
    let enrolled: i64 = student_courses::table
        .filter(student_courses::user_id.eq(user_id))
        .filter(student_courses::course_id.eq(course_id))
        .count()
        .get_result(conn)?;

    if enrolled == 0 {
        return Err(RevisionError::NotFound(format!(
            "Course {course_id} not found"
        )));
    }
    Ok(())
}

pub fn router(pool: DbPool) -> Router {
    Router::new()
        .route("/", get(list_enrolled))
        .route("/available", get(list_available))
        .route("/{course_id}/enroll", post(enroll))
        .route("/{course_id}/unsubscribe", post(unsubscribe))
        .with_state(pool)
}

pub fn activity_router(pool: DbPool) -> Router {
    Router::new()
        .route("/{activity_id}", get(activity_view))
        .route("/{activity_id}/submit", post(submit_activity))
        .with_state(pool)
}

pub fn revision_router(pool: DbPool) -> Router {
    Router::new()
        .route("/{course_id}", get(revision_session))
        .route("/{course_id}/submit", post(submit_revision))
        .with_state(pool)
}

#[derive(Serialize)]
pub struct CourseSummary {
    pub course_id: i32,
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub revision_items_count: i64,
    pub progress: f32,
}

async fn list_enrolled(
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<Vec<CourseSummary>>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let now = Utc::now().naive_utc();

    let enrolled: Vec<Course> = student_courses::table
        .inner_join(courses::table)
        .filter(student_courses::user_id.eq(user_id))
        .order(student_courses::updated_at.desc())
        .select(Course::as_select())
        .load(&mut conn)?;

    let mut summaries = Vec::with_capacity(enrolled.len());
    for course in enrolled {
        let total: i64 = activities::table
            .inner_join(lessons::table)
            .filter(lessons::course_id.eq(course.course_id))
            .count()
            .get_result(&mut conn)?;
        let completed: i64 = student_activities::table
            .inner_join(activities::table.inner_join(lessons::table))
            .filter(lessons::course_id.eq(course.course_id))
            .filter(student_activities::user_id.eq(user_id))
            .filter(student_activities::completed.eq(true))
            .count()
            .get_result(&mut conn)?;
        let progress = if total > 0 {
            completed as f32 / total as f32 * 100.0
        } else {
            0.0
        };
        let due = CourseItemSource::new(&mut conn, course.course_id).count_due(user_id, now)?;

        summaries.push(CourseSummary {
            course_id: course.course_id,
            title: course.title,
            description: course.description,
            image: course.image,
            revision_items_count: due,
            progress,
        });
    }

    Ok(Json(summaries))
}

async fn list_available(
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<Vec<Course>>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let enrolled_ids = student_courses::table
        .filter(student_courses::user_id.eq(user_id))
        .select(student_courses::course_id);

    let available: Vec<Course> = courses::table
        .filter(courses::is_published.eq(true))
        .filter(courses::course_id.ne_all(enrolled_ids))
        .order(courses::created_at.desc())
        .select(Course::as_select())
        .load(&mut conn)?;

    Ok(Json(available))
}

async fn enroll(
    Path(course_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let course: Course = courses::table
        .find(course_id)
        .select(Course::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| RevisionError::NotFound(format!("Course {course_id} not found")))?;

    let already: i64 = student_courses::table
        .filter(student_courses::user_id.eq(user_id))
        .filter(student_courses::course_id.eq(course_id))
        .count()
        .get_result(&mut conn)?;
    if already > 0 {
        return Ok(Json(ApiResponse {
            success: false,
            message: "You are already enrolled in this course".to_string(),
        }));
    }

    let now = Utc::now().naive_utc();
    diesel::insert_into(student_courses::table)
        .values((
            student_courses::user_id.eq(user_id),
            student_courses::course_id.eq(course_id),
            student_courses::enrolled_at.eq(now),
            student_courses::updated_at.eq(now),
        ))
        .execute(&mut conn)?;

    Ok(Json(ApiResponse {
        success: true,
        message: format!("Successfully enrolled in course - {}", course.title),
    }))
}

async fn unsubscribe(
    Path(course_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let title: String = conn.transaction::<String, RevisionError, _>(|conn| {
        let course: Course = courses::table
            .find(course_id)
            .select(Course::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| RevisionError::NotFound(format!("Course {course_id} not found")))?;

        let item_ids = items::table
            .inner_join(activities::table.inner_join(lessons::table))
            .filter(lessons::course_id.eq(course_id))
            .select(items::item_id);
        diesel::delete(
            student_items::table
                .filter(student_items::user_id.eq(user_id))
                .filter(student_items::item_id.eq_any(item_ids)),
        )
        .execute(conn)?;

        let activity_ids = activities::table
            .inner_join(lessons::table)
            .filter(lessons::course_id.eq(course_id))
            .select(activities::activity_id);
        diesel::delete(
            student_activities::table
                .filter(student_activities::user_id.eq(user_id))
                .filter(student_activities::activity_id.eq_any(activity_ids)),
        )
        .execute(conn)?;

        let deleted = diesel::delete(
            student_courses::table
                .filter(student_courses::user_id.eq(user_id))
                .filter(student_courses::course_id.eq(course_id)),
        )
        .execute(conn)?;
        if deleted == 0 {
            return Err(RevisionError::NotFound(
                "You are not enrolled in this course".to_string(),
            ));
        }

        Ok(course.title)
    })?;

    Ok(Json(ApiResponse {
        success: true,
        message: format!("Successfully unsubscribed from course - {title}"),
    }))
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub course_id: i32,
    pub due_count: i64,
    pub items: Vec<SessionItem>,
}

async fn revision_session(
    Path(course_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<SessionResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    ensure_enrolled(&mut conn, user_id, course_id)?;

    let now = Utc::now().naive_utc();
    let mut source = CourseItemSource::new(&mut conn, course_id);
    let payload = session::build_session(&mut source, user_id, now, &mut thread_rng())?;

    Ok(Json(SessionResponse {
        course_id,
        due_count: payload.due_count,
        items: payload.items,
    }))
}

#[derive(Deserialize)]
pub struct SubmitRevisionRequest {
    #[serde(default)]
    pub responses: Vec<OutcomeReport>,
    #[serde(default)]
    pub is_completed: bool,
}

async fn submit_revision(
    Path(course_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<SubmitRevisionRequest>,
) -> Result<Json<SubmitResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    ensure_enrolled(&mut conn, user_id, course_id)?;

    let now = Utc::now().naive_utc();
    let remaining = conn.transaction::<i64, RevisionError, _>(|conn| {
        let mut source = CourseItemSource::new(conn, course_id);
        session::submit_outcomes(&mut source, user_id, &payload.responses, now)
    })?;

    log::info!(
        "Saved {} revision outcomes for course {}, {} due remaining",
        payload.responses.len(),
        course_id,
        remaining
    );

    let redirect_url = if payload.is_completed {
        format!("/courses/{course_id}")
    } else {
        format!("/revision/{course_id}")
    };

    Ok(Json(SubmitResponse::saved(
        "Revision progress saved successfully",
        remaining,
        Some(redirect_url),
    )))
}

#[derive(Serialize)]
pub struct ExerciseItem {
    pub item_id: i32,
    pub item_type: ItemType,
    pub title: String,
    pub question: String,
    pub answer: Option<String>,
    pub options: Vec<String>,
    pub successes: i32,
    pub is_master: bool,
    pub next_1: i32,
    pub next_2: i32,
    pub revise_at: Option<NaiveDateTime>,
    pub image: Option<String>,
    pub audio: Option<String>,
}

#[derive(Serialize)]
pub struct ActivityPayload {
    pub activity_id: i32,
    pub course_id: i32,
    pub title: String,
    pub activity_type: ActivityType,
    pub progress: f32,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_embed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_file: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ExerciseItem>,
}

type ItemState = (i32, bool, i32, i32, Option<NaiveDateTime>);

async fn activity_view(
    Path(activity_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<ActivityPayload>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let activity: Activity = activities::table
        .find(activity_id)
        .select(Activity::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| RevisionError::NotFound(format!("Activity {activity_id} not found")))?;
    let course_id: i32 = lessons::table
        .filter(lessons::lesson_id.eq(activity.lesson_id))
        .select(lessons::course_id)
        .first(&mut conn)?;
    ensure_enrolled(&mut conn, user_id, course_id)?;

    let kind = ActivityType::parse(&activity.activity_type).ok_or_else(|| {
        RevisionError::Validation(format!("Unknown activity type: {}", activity.activity_type))
    })?;
    let now = Utc::now().naive_utc();

    let mut payload = ActivityPayload {
        activity_id,
        course_id,
        title: activity.title,
        activity_type: kind,
        progress: 0.0,
        completed: false,
        html_content: None,
        video_embed: None,
        pdf_file: None,
        items: Vec::new(),
    };

    match kind {
        ActivityType::Exercise => {
            let item_rows: Vec<Item> = items::table
                .filter(items::activity_id.eq(activity_id))
                .order(items::position.asc())
                .select(Item::as_select())
                .load(&mut conn)?;

            let ids: Vec<i32> = item_rows.iter().map(|i| i.item_id).collect();
            let states: HashMap<i32, ItemState> = student_items::table
                .filter(student_items::user_id.eq(user_id))
                .filter(student_items::item_id.eq_any(&ids))
                .select((
                    student_items::item_id,
                    (
                        student_items::successes,
                        student_items::is_master,
                        student_items::next_1,
                        student_items::next_2,
                        student_items::revise_at,
                    ),
                ))
                .load::<(i32, ItemState)>(&mut conn)?
                .into_iter()
                .collect();

            let answer_pool: Vec<String> =
                item_rows.iter().filter_map(|i| i.answer.clone()).collect();
            let mastered = states.values().filter(|s| s.1).count();
            let total = item_rows.len();

            let mut rng = thread_rng();
            for item in item_rows {
                let item_kind = ItemType::parse(&item.item_type).ok_or_else(|| {
                    RevisionError::Validation(format!("Unknown item type: {}", item.item_type))
                })?;
                let (successes, is_master, next_1, next_2, revise_at) = states
                    .get(&item.item_id)
                    .copied()
                    .unwrap_or((0, false, 1, 1, None));
                let options = match item.answer.as_deref() {
                    Some(answer) => {
                        let wrong =
                            distractors::wrong_answers(answer, &answer_pool, DISTRACTOR_COUNT, &mut rng);
                        distractors::shuffled_options(answer, &wrong, &mut rng)
                    }
                    None => Vec::new(),
                };

                payload.items.push(ExerciseItem {
                    item_id: item.item_id,
                    item_type: item_kind,
                    title: item.title,
                    question: item.question,
                    answer: item.answer,
                    options,
                    successes,
                    is_master,
                    next_1,
                    next_2,
                    revise_at,
                    image: item.image.as_deref().and_then(resolve_media_ref),
                    audio: item.audio.as_deref().and_then(resolve_media_ref),
                });
            }

            payload.progress = if total > 0 {
                mastered as f32 / total as f32 * 100.0
            } else {
                0.0
            };
            payload.completed = payload.progress >= 100.0;
        }
        ActivityType::Video => payload.video_embed = activity.video_embed,
        ActivityType::Html => payload.html_content = activity.html_content,
        ActivityType::Pdf => {
            payload.pdf_file = activity.pdf_file.as_deref().and_then(resolve_media_ref);
        }
    }

    upsert_student_activity(&mut conn, user_id, activity_id, payload.progress, payload.completed, now)?;

    Ok(Json(payload))
}

fn upsert_student_activity(
    conn: &mut SqliteConnection,
    user_id: i32,
    activity_id: i32,
    progress: f32,
    completed: bool,
    now: NaiveDateTime,
) -> Result<(), RevisionError> {
    diesel::insert_into(student_activities::table)
        .values((
            student_activities::user_id.eq(user_id),
            student_activities::activity_id.eq(activity_id),
            student_activities::progress.eq(progress),
            student_activities::completed.eq(completed),
            student_activities::updated_at.eq(now),
        ))
        .on_conflict((
            student_activities::user_id,
            student_activities::activity_id,
        ))
        .do_update()
        .set((
            student_activities::progress.eq(progress),
            student_activities::completed.eq(completed),
            student_activities::updated_at.eq(now),
        ))
        .execute(conn)?;
    Ok(())
}

#[derive(Deserialize)]
pub struct ActivityOutcome {
    pub item_id: i32,
    pub passed: bool,
}

#[derive(Deserialize)]
pub struct SubmitActivityRequest {
    #[serde(default)]
    pub responses: Vec<ActivityOutcome>,
    #[serde(default)]
    pub is_completed: bool,
}

async fn submit_activity(
    Path(activity_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<SubmitActivityRequest>,
) -> Result<Json<SubmitResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let lesson_id: i32 = activities::table
        .find(activity_id)
        .select(activities::lesson_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| RevisionError::NotFound(format!("Activity {activity_id} not found")))?;
    let course_id: i32 = lessons::table
        .filter(lessons::lesson_id.eq(lesson_id))
        .select(lessons::course_id)
        .first(&mut conn)?;
    ensure_enrolled(&mut conn, user_id, course_id)?;

    let now = Utc::now().naive_utc();
    let remaining = conn.transaction::<i64, RevisionError, _>(|conn| {
        for outcome in &payload.responses {
            let item: Item = items::table
                .filter(items::item_id.eq(outcome.item_id))
                .filter(items::activity_id.eq(activity_id))
                .select(Item::as_select())
                .first(conn)
                .optional()?
                .ok_or_else(|| {
                    RevisionError::NotFound(format!(
                        "Item {} not found in this activity",
                        outcome.item_id
                    ))
                })?;
            apply_item_outcome(conn, user_id, &item, outcome.passed, now)?;
        }

        let (progress, completed) = if payload.responses.is_empty() {
            // Non-exercise activities only carry a completion flag.
            (0.0, payload.is_completed)
        } else {
            let total: i64 = items::table
                .filter(items::activity_id.eq(activity_id))
                .count()
                .get_result(conn)?;
            let mastered: i64 = student_items::table
                .inner_join(items::table)
                .filter(items::activity_id.eq(activity_id))
                .filter(student_items::user_id.eq(user_id))
                .filter(student_items::successes.ge(MASTERY_THRESHOLD))
                .count()
                .get_result(conn)?;
            let progress = if total > 0 {
                mastered as f32 / total as f32 * 100.0
            } else {
                0.0
            };
            (progress, payload.is_completed || progress >= 100.0)
        };
        upsert_student_activity(conn, user_id, activity_id, progress, completed, now)?;

        CourseItemSource::new(conn, course_id).count_due(user_id, now)
    })?;

    Ok(Json(SubmitResponse::saved(
        "Activity progress saved successfully",
        remaining,
        Some(format!("/courses/{course_id}")),
    )))
}

/// Routes one item outcome through the scheduler, creating the schedule row
/// on the student's first review of the item.
fn apply_item_outcome(
    conn: &mut SqliteConnection,
    user_id: i32,
    item: &Item,
    passed: bool,
    now: NaiveDateTime,
) -> Result<(), RevisionError> {
    let existing: Option<(i32, i32, bool, i32, i32, Option<NaiveDateTime>, bool)> =
        student_items::table
            .filter(student_items::user_id.eq(user_id))
            .filter(student_items::item_id.eq(item.item_id))
            .select((
                student_items::student_item_id,
                student_items::successes,
                student_items::is_master,
                student_items::next_1,
                student_items::next_2,
                student_items::revise_at,
                student_items::continue_revision,
            ))
            .first(conn)
            .optional()?;

    let record = match existing {
        Some((id, successes, is_master, next_1, next_2, revise_at, cont)) => ScheduleRecord {
            id,
            unit_id: item.item_id,
            prompt: item.question.clone(),
            answer: item.answer.clone(),
            successes,
            is_master,
            next_1,
            next_2,
            revise_at,
            continue_revision: cont,
        },
        None => ScheduleRecord::fresh(item.item_id, item.question.clone(), item.answer.clone()),
    };
    let updated = scheduler::apply_outcome(&record, passed, now);

    if record.id == 0 {
        diesel::insert_into(student_items::table)
            .values((
                student_items::user_id.eq(user_id),
                student_items::item_id.eq(item.item_id),
                student_items::successes.eq(updated.successes),
                student_items::is_master.eq(updated.is_master),
                student_items::next_1.eq(updated.next_1),
                student_items::next_2.eq(updated.next_2),
                student_items::revise_at.eq(updated.revise_at),
                student_items::continue_revision.eq(updated.continue_revision),
                student_items::start_at.eq(now),
                student_items::updated_at.eq(now),
            ))
            .execute(conn)?;
    } else {
        diesel::update(student_items::table.filter(student_items::student_item_id.eq(record.id)))
            .set((
                student_items::successes.eq(updated.successes),
                student_items::is_master.eq(updated.is_master),
                student_items::next_1.eq(updated.next_1),
                student_items::next_2.eq(updated.next_2),
                student_items::revise_at.eq(updated.revise_at),
                student_items::continue_revision.eq(updated.continue_revision),
                student_items::updated_at.eq(now),
            ))
            .execute(conn)?;
    }

    Ok(())
}
