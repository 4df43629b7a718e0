use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{delete, post},
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{
    DbPool,
    course::{current_user, get_conn},
    model::{ActivityType, ApiResponse, ItemType},
    revision::RevisionError,
    schema::{activities, courses, items, lessons, student_activities, student_items},
};

pub fn router(pool: DbPool) -> Router {
    Router::new()
        .route("/courses", post(create_course))
        .route("/lessons", post(create_lesson))
        .route("/activities", post(create_activity))
        .route("/items", post(create_item))
        .route("/lessons/{lesson_id}", delete(delete_lesson))
        .route("/activities/{activity_id}", delete(delete_activity))
        .route("/items/{item_id}", delete(delete_item))
        .route("/lessons/{lesson_id}/reorder", post(reorder_lesson))
        .route("/activities/{activity_id}/reorder", post(reorder_activity))
        .route("/items/{item_id}/reorder", post(reorder_item))
        .with_state(pool)
}

#[derive(Serialize)]
pub struct Created {
    pub success: bool,
    pub id: i32,
}

#[derive(Deserialize)]
pub struct ReorderRequest {
    pub position: i32,
}

fn last_insert_id(conn: &mut SqliteConnection) -> Result<i32, diesel::result::Error> {
    diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
        .get_result::<i32>(conn)
}

fn owned_course(
    conn: &mut SqliteConnection,
    user_id: i32,
    course_id: i32,
) -> Result<(), RevisionError> {
    let count: i64 = courses::table
        .filter(courses::course_id.eq(course_id))
        .filter(courses::teacher_id.eq(user_id))
        .count()
        .get_result(conn)?;
    if count == 0 {
        return Err(RevisionError::NotFound(format!(
            "Course {course_id} not found"
        )));
    }
    Ok(())
}

fn course_of_lesson(conn: &mut SqliteConnection, lesson_id: i32) -> Result<i32, RevisionError> {
    lessons::table
        .find(lesson_id)
        .select(lessons::course_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| RevisionError::NotFound(format!("Lesson {lesson_id} not found")))
}

fn lesson_of_activity(conn: &mut SqliteConnection, activity_id: i32) -> Result<i32, RevisionError> {
    activities::table
        .find(activity_id)
        .select(activities::lesson_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| RevisionError::NotFound(format!("Activity {activity_id} not found")))
}

fn activity_of_item(conn: &mut SqliteConnection, item_id: i32) -> Result<i32, RevisionError> {
    items::table
        .find(item_id)
        .select(items::activity_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| RevisionError::NotFound(format!("Item {item_id} not found")))
}

// Position maintenance: entities append at max+1 and are compacted back to a
// dense 1..N sequence after every delete or reorder.

fn resequence_lessons(conn: &mut SqliteConnection, course_id: i32) -> QueryResult<()> {
    let ids: Vec<i32> = lessons::table
        .filter(lessons::course_id.eq(course_id))
        .order((lessons::position.asc(), lessons::lesson_id.asc()))
        .select(lessons::lesson_id)
        .load(conn)?;
    for (index, id) in ids.iter().enumerate() {
        diesel::update(lessons::table.find(id))
            .set(lessons::position.eq(index as i32 + 1))
            .execute(conn)?;
    }
    Ok(())
}

fn resequence_activities(conn: &mut SqliteConnection, lesson_id: i32) -> QueryResult<()> {
    let ids: Vec<i32> = activities::table
        .filter(activities::lesson_id.eq(lesson_id))
        .order((activities::position.asc(), activities::activity_id.asc()))
        .select(activities::activity_id)
        .load(conn)?;
    for (index, id) in ids.iter().enumerate() {
        diesel::update(activities::table.find(id))
            .set(activities::position.eq(index as i32 + 1))
            .execute(conn)?;
    }
    Ok(())
}

fn resequence_items(conn: &mut SqliteConnection, activity_id: i32) -> QueryResult<()> {
    let ids: Vec<i32> = items::table
        .filter(items::activity_id.eq(activity_id))
        .order((items::position.asc(), items::item_id.asc()))
        .select(items::item_id)
        .load(conn)?;
    for (index, id) in ids.iter().enumerate() {
        diesel::update(items::table.find(id))
            .set(items::position.eq(index as i32 + 1))
            .execute(conn)?;
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_published: bool,
}

async fn create_course(
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<CreateCourseRequest>,
) -> Result<Json<Created>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let now = Utc::now().naive_utc();

    diesel::insert_into(courses::table)
        .values((
            courses::title.eq(&payload.title),
            courses::description.eq(&payload.description),
            courses::is_published.eq(payload.is_published),
            courses::teacher_id.eq(user_id),
            courses::created_at.eq(now),
            courses::updated_at.eq(now),
        ))
        .execute(&mut conn)?;
    let id = last_insert_id(&mut conn)?;

    Ok(Json(Created { success: true, id }))
}

#[derive(Deserialize)]
pub struct CreateLessonRequest {
    pub course_id: i32,
    pub title: String,
}

async fn create_lesson(
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<CreateLessonRequest>,
) -> Result<Json<Created>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    owned_course(&mut conn, user_id, payload.course_id)?;
    let now = Utc::now().naive_utc();

    let id = conn.transaction::<i32, RevisionError, _>(|conn| {
        let last: Option<i32> = lessons::table
            .filter(lessons::course_id.eq(payload.course_id))
            .select(diesel::dsl::max(lessons::position))
            .first(conn)?;

        diesel::insert_into(lessons::table)
            .values((
                lessons::course_id.eq(payload.course_id),
                lessons::title.eq(&payload.title),
                lessons::position.eq(last.unwrap_or(0) + 1),
                lessons::created_at.eq(now),
                lessons::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(last_insert_id(conn)?)
    })?;

    Ok(Json(Created { success: true, id }))
}

#[derive(Deserialize)]
pub struct CreateActivityRequest {
    pub lesson_id: i32,
    pub title: String,
    pub activity_type: String,
    #[serde(default)]
    pub html_content: Option<String>,
    #[serde(default)]
    pub video_embed: Option<String>,
    #[serde(default)]
    pub pdf_file: Option<String>,
}

async fn create_activity(
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<CreateActivityRequest>,
) -> Result<Json<Created>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let course_id = course_of_lesson(&mut conn, payload.lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    let kind = ActivityType::parse(&payload.activity_type).ok_or_else(|| {
        RevisionError::Validation(format!("Unknown activity type: {}", payload.activity_type))
    })?;
    let now = Utc::now().naive_utc();

    let id = conn.transaction::<i32, RevisionError, _>(|conn| {
        let last: Option<i32> = activities::table
            .filter(activities::lesson_id.eq(payload.lesson_id))
            .select(diesel::dsl::max(activities::position))
            .first(conn)?;

        diesel::insert_into(activities::table)
            .values((
                activities::lesson_id.eq(payload.lesson_id),
                activities::title.eq(&payload.title),
                activities::activity_type.eq(kind.as_str()),
                activities::position.eq(last.unwrap_or(0) + 1),
                activities::html_content.eq(&payload.html_content),
                activities::video_embed.eq(&payload.video_embed),
                activities::pdf_file.eq(&payload.pdf_file),
                activities::created_at.eq(now),
                activities::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(last_insert_id(conn)?)
    })?;

    Ok(Json(Created { success: true, id }))
}

#[derive(Deserialize)]
pub struct CreateItemRequest {
    pub activity_id: i32,
    pub item_type: String,
    pub title: String,
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
}

async fn create_item(
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<CreateItemRequest>,
) -> Result<Json<Created>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let lesson_id = lesson_of_activity(&mut conn, payload.activity_id)?;
    let course_id = course_of_lesson(&mut conn, lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    let kind = ItemType::parse(&payload.item_type).ok_or_else(|| {
        RevisionError::Validation(format!("Unknown item type: {}", payload.item_type))
    })?;
    let now = Utc::now().naive_utc();

    let id = conn.transaction::<i32, RevisionError, _>(|conn| {
        let last: Option<i32> = items::table
            .filter(items::activity_id.eq(payload.activity_id))
            .select(diesel::dsl::max(items::position))
            .first(conn)?;

        diesel::insert_into(items::table)
            .values((
                items::activity_id.eq(payload.activity_id),
                items::item_type.eq(kind.as_str()),
                items::title.eq(&payload.title),
                items::question.eq(&payload.question),
                items::answer.eq(&payload.answer),
                items::image.eq(&payload.image),
                items::audio.eq(&payload.audio),
                items::position.eq(last.unwrap_or(0) + 1),
                items::created_at.eq(now),
                items::updated_at.eq(now),
            ))
            .execute(conn)?;
        Ok(last_insert_id(conn)?)
    })?;

    Ok(Json(Created { success: true, id }))
}

async fn delete_lesson(
    Path(lesson_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let course_id = course_of_lesson(&mut conn, lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    conn.transaction::<_, RevisionError, _>(|conn| {
        let item_ids = items::table
            .inner_join(activities::table)
            .filter(activities::lesson_id.eq(lesson_id))
            .select(items::item_id);
        diesel::delete(student_items::table.filter(student_items::item_id.eq_any(item_ids)))
            .execute(conn)?;

        let activity_ids = activities::table
            .filter(activities::lesson_id.eq(lesson_id))
            .select(activities::activity_id);
        diesel::delete(
            student_activities::table.filter(student_activities::activity_id.eq_any(activity_ids)),
        )
        .execute(conn)?;

        let owned_items: Vec<i32> = items::table
            .inner_join(activities::table)
            .filter(activities::lesson_id.eq(lesson_id))
            .select(items::item_id)
            .load(conn)?;
        diesel::delete(items::table.filter(items::item_id.eq_any(owned_items))).execute(conn)?;
        diesel::delete(activities::table.filter(activities::lesson_id.eq(lesson_id)))
            .execute(conn)?;
        diesel::delete(lessons::table.find(lesson_id)).execute(conn)?;

        resequence_lessons(conn, course_id)?;
        Ok(())
    })?;

    Ok(Json(ApiResponse {
        success: true,
        message: "Lesson deleted successfully".to_string(),
    }))
}

async fn delete_activity(
    Path(activity_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let lesson_id = lesson_of_activity(&mut conn, activity_id)?;
    let course_id = course_of_lesson(&mut conn, lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    conn.transaction::<_, RevisionError, _>(|conn| {
        let item_ids = items::table
            .filter(items::activity_id.eq(activity_id))
            .select(items::item_id);
        diesel::delete(student_items::table.filter(student_items::item_id.eq_any(item_ids)))
            .execute(conn)?;
        diesel::delete(
            student_activities::table.filter(student_activities::activity_id.eq(activity_id)),
        )
        .execute(conn)?;
        diesel::delete(items::table.filter(items::activity_id.eq(activity_id))).execute(conn)?;
        diesel::delete(activities::table.find(activity_id)).execute(conn)?;

        resequence_activities(conn, lesson_id)?;
        Ok(())
    })?;

    Ok(Json(ApiResponse {
        success: true,
        message: "Activity deleted successfully".to_string(),
    }))
}

async fn delete_item(
    Path(item_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let activity_id = activity_of_item(&mut conn, item_id)?;
    let lesson_id = lesson_of_activity(&mut conn, activity_id)?;
    let course_id = course_of_lesson(&mut conn, lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    conn.transaction::<_, RevisionError, _>(|conn| {
        diesel::delete(student_items::table.filter(student_items::item_id.eq(item_id)))
            .execute(conn)?;
        diesel::delete(items::table.find(item_id)).execute(conn)?;

        resequence_items(conn, activity_id)?;
        Ok(())
    })?;

    Ok(Json(ApiResponse {
        success: true,
        message: "Item deleted successfully".to_string(),
    }))
}

async fn reorder_lesson(
    Path(lesson_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let course_id = course_of_lesson(&mut conn, lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    conn.transaction::<_, RevisionError, _>(|conn| {
        let mut ids: Vec<i32> = lessons::table
            .filter(lessons::course_id.eq(course_id))
            .order((lessons::position.asc(), lessons::lesson_id.asc()))
            .select(lessons::lesson_id)
            .load(conn)?;
        move_id(&mut ids, lesson_id, payload.position)?;
        for (index, id) in ids.iter().enumerate() {
            diesel::update(lessons::table.find(id))
                .set(lessons::position.eq(index as i32 + 1))
                .execute(conn)?;
        }
        Ok(())
    })?;

    Ok(Json(ApiResponse {
        success: true,
        message: "Lesson order updated".to_string(),
    }))
}

async fn reorder_activity(
    Path(activity_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let lesson_id = lesson_of_activity(&mut conn, activity_id)?;
    let course_id = course_of_lesson(&mut conn, lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    conn.transaction::<_, RevisionError, _>(|conn| {
        let mut ids: Vec<i32> = activities::table
            .filter(activities::lesson_id.eq(lesson_id))
            .order((activities::position.asc(), activities::activity_id.asc()))
            .select(activities::activity_id)
            .load(conn)?;
        move_id(&mut ids, activity_id, payload.position)?;
        for (index, id) in ids.iter().enumerate() {
            diesel::update(activities::table.find(id))
                .set(activities::position.eq(index as i32 + 1))
                .execute(conn)?;
        }
        Ok(())
    })?;

    Ok(Json(ApiResponse {
        success: true,
        message: "Activity order updated".to_string(),
    }))
}

async fn reorder_item(
    Path(item_id): Path<i32>,
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<ReorderRequest>,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;
    let activity_id = activity_of_item(&mut conn, item_id)?;
    let lesson_id = lesson_of_activity(&mut conn, activity_id)?;
    let course_id = course_of_lesson(&mut conn, lesson_id)?;
    owned_course(&mut conn, user_id, course_id)?;

    conn.transaction::<_, RevisionError, _>(|conn| {
        let mut ids: Vec<i32> = items::table
            .filter(items::activity_id.eq(activity_id))
            .order((items::position.asc(), items::item_id.asc()))
            .select(items::item_id)
            .load(conn)?;
        move_id(&mut ids, item_id, payload.position)?;
        for (index, id) in ids.iter().enumerate() {
            diesel::update(items::table.find(id))
                .set(items::position.eq(index as i32 + 1))
                .execute(conn)?;
        }
        Ok(())
    })?;

    Ok(Json(ApiResponse {
        success: true,
        message: "Item order updated".to_string(),
    }))
}

/// Moves `id` to 1-based `position` within `ids`, clamping out-of-range targets.
fn move_id(ids: &mut Vec<i32>, id: i32, position: i32) -> Result<(), RevisionError> {
    let from = ids
        .iter()
        .position(|candidate| *candidate == id)
        .ok_or_else(|| RevisionError::NotFound(format!("Entity {id} not found")))?;
    let moved = ids.remove(from);
    let to = (position.max(1) as usize - 1).min(ids.len());
    ids.insert(to, moved);
    Ok(())
}
