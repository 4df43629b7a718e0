use chrono::NaiveDateTime;
use diesel::{Insertable, Queryable, Selectable};
use serde::Serialize;

use crate::schema::{activities, courses, dictionary_words, items, lessons, users};

#[derive(Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub user_id: i32,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Queryable, Selectable, Serialize)]
#[diesel(table_name = courses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Course {
    pub course_id: i32,
    pub title: String,
    pub description: String,
    pub image: Option<String>,
    pub is_published: bool,
    pub teacher_id: Option<i32>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Serialize)]
#[diesel(table_name = lessons)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Lesson {
    pub lesson_id: i32,
    pub course_id: i32,
    pub title: String,
    pub position: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Serialize)]
#[diesel(table_name = activities)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Activity {
    pub activity_id: i32,
    pub lesson_id: i32,
    pub title: String,
    pub activity_type: String,
    pub position: i32,
    pub html_content: Option<String>,
    pub video_embed: Option<String>,
    pub pdf_file: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Serialize)]
#[diesel(table_name = items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Item {
    pub item_id: i32,
    pub activity_id: i32,
    pub item_type: String,
    pub title: String,
    pub question: String,
    pub answer: Option<String>,
    pub image: Option<String>,
    pub audio: Option<String>,
    pub position: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Serialize)]
#[diesel(table_name = dictionary_words)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DictionaryWord {
    pub word_id: i32,
    pub word: String,
    pub meaning: String,
}

/// Standard API response format
#[derive(Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

/// What a lesson activity presents to the student.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Exercise,
    Video,
    Html,
    Pdf,
}

impl ActivityType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "exercise" => Some(Self::Exercise),
            "video" => Some(Self::Video),
            "html" => Some(Self::Html),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exercise => "exercise",
            Self::Video => "video",
            Self::Html => "html",
            Self::Pdf => "pdf",
        }
    }
}

/// How an exercise item is rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Card,
    Mc,
    Blank,
}

impl ItemType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "card" => Some(Self::Card),
            "mc" => Some(Self::Mc),
            "blank" => Some(Self::Blank),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Mc => "mc",
            Self::Blank => "blank",
        }
    }
}
