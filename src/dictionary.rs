use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use chrono::Utc;
use diesel::prelude::*;
use lazy_static::lazy_static;
use rand::thread_rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{
    DbPool,
    course::{SubmitRevisionRequest, current_user, get_conn},
    model::{ApiResponse, DictionaryWord},
    revision::{
        RevisionError,
        session::{self, SessionPayload, SubmitResponse},
        sources::StudentWordSource,
    },
    schema::{dictionary_words, student_words},
};

lazy_static! {
    static ref SINGLE_WORD_RE: Regex = Regex::new(r"^\w+$").unwrap();
    static ref CLEAN_RE: Regex = Regex::new(r"[^\w\s]").unwrap();
}

pub fn router(pool: DbPool) -> Router {
    Router::new()
        .route("/search", get(search))
        .route("/save-word", post(save_word))
        .route("/revision", get(revision_session))
        .route("/revision/submit", post(submit_revision))
        .with_state(pool)
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub word: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SearchEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_word: Option<String>,
    pub db_word: String,
    pub meaning: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub match_algorithm: Option<&'static str>,
    pub results: Vec<SearchEntry>,
}

async fn search(
    Query(params): Query<SearchParams>,
    State(pool): State<DbPool>,
) -> Result<Json<SearchResponse>, RevisionError> {
    let query = params.word.unwrap_or_default().trim().to_string();
    let mut response = SearchResponse {
        query: query.clone(),
        match_algorithm: None,
        results: Vec::new(),
    };
    if query.is_empty() {
        return Ok(Json(response));
    }

    let mut conn = get_conn(&pool)?;

    let clean = CLEAN_RE.replace_all(&query, "");
    let words: Vec<String> = clean.split_whitespace().map(str::to_string).collect();
    if words.is_empty() {
        return Ok(Json(response));
    }

    if words.len() == 1 {
        let original = &words[0];
        let lower = original.to_lowercase();

        let exact = single_word_match(&mut conn, &lower)?;
        match exact {
            Some(anchor) => {
                // Exact match found: this word and the following single words
                // in alphabetical order.
                response.match_algorithm = Some("exact match");
                let window: Vec<DictionaryWord> = dictionary_words::table
                    .filter(dictionary_words::word.ge(&anchor.word))
                    .order(dictionary_words::word.asc())
                    .limit(50)
                    .select(DictionaryWord::as_select())
                    .load(&mut conn)?;
                let picked: Vec<DictionaryWord> = window
                    .into_iter()
                    .filter(|w| SINGLE_WORD_RE.is_match(&w.word))
                    .take(10)
                    .collect();
                response.results = picked
                    .into_iter()
                    .enumerate()
                    .map(|(i, w)| SearchEntry {
                        input_word: (i == 0).then(|| original.clone()),
                        db_word: w.word,
                        meaning: w.meaning,
                    })
                    .collect();
            }
            None => {
                // No exact match: same-prefix single words, widening the
                // prefix when too few turn up.
                response.match_algorithm = Some("similar words");
                let prefix: String = lower.chars().take(4).collect();
                let mut picked = prefix_search(&mut conn, &prefix)?;
                if picked.len() < 5 && prefix.chars().count() > 2 {
                    let shorter: String = lower.chars().take(3).collect();
                    for candidate in prefix_search(&mut conn, &shorter)? {
                        if !picked.iter().any(|w| w.word_id == candidate.word_id) {
                            picked.push(candidate);
                        }
                    }
                }
                picked.truncate(10);

                if picked.is_empty() {
                    response.match_algorithm = Some("similar words (fuzzy)");
                    picked = fuzzy_search(&mut conn, &lower)?;
                }

                response.results = picked
                    .into_iter()
                    .map(|w| SearchEntry {
                        input_word: None,
                        db_word: w.word,
                        meaning: w.meaning,
                    })
                    .collect();
            }
        }
    } else {
        // Sentence query: exact matches only, returned in input order.
        response.match_algorithm = Some("sentence");
        let mut seen = Vec::new();
        for original in &words {
            let lower = original.to_lowercase();
            if seen.contains(&lower) {
                continue;
            }
            if let Some(entry) = single_word_match(&mut conn, &lower)? {
                response.results.push(SearchEntry {
                    input_word: Some(original.clone()),
                    db_word: entry.word,
                    meaning: entry.meaning,
                });
                seen.push(lower);
            }
        }
    }

    Ok(Json(response))
}

/// Case-insensitive exact lookup, restricted to single words.
fn single_word_match(
    conn: &mut SqliteConnection,
    lower: &str,
) -> Result<Option<DictionaryWord>, RevisionError> {
    let found: Option<DictionaryWord> = dictionary_words::table
        .filter(dictionary_words::word.like(lower))
        .select(DictionaryWord::as_select())
        .first(conn)
        .optional()?;
    Ok(found.filter(|w| SINGLE_WORD_RE.is_match(&w.word)))
}

fn prefix_search(
    conn: &mut SqliteConnection,
    prefix: &str,
) -> Result<Vec<DictionaryWord>, RevisionError> {
    let rows: Vec<DictionaryWord> = dictionary_words::table
        .filter(dictionary_words::word.like(format!("{prefix}%")))
        .order(dictionary_words::word.asc())
        .limit(50)
        .select(DictionaryWord::as_select())
        .load(conn)?;
    Ok(rows
        .into_iter()
        .filter(|w| SINGLE_WORD_RE.is_match(&w.word))
        .collect())
}

/// Last-resort ranking of the whole word list by Jaro-Winkler similarity.
fn fuzzy_search(
    conn: &mut SqliteConnection,
    lower: &str,
) -> Result<Vec<DictionaryWord>, RevisionError> {
    let all: Vec<DictionaryWord> = dictionary_words::table
        .order(dictionary_words::word.asc())
        .select(DictionaryWord::as_select())
        .load(conn)?;

    let mut scored: Vec<(f64, DictionaryWord)> = all
        .into_iter()
        .filter(|w| SINGLE_WORD_RE.is_match(&w.word))
        .map(|w| (strsim::jaro_winkler(&w.word.to_lowercase(), lower), w))
        .filter(|(score, _)| *score > 0.75)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    Ok(scored.into_iter().take(10).map(|(_, w)| w).collect())
}

#[derive(Deserialize)]
pub struct SaveWordRequest {
    pub word_id: i32,
}

async fn save_word(
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<SaveWordRequest>,
) -> Result<Json<ApiResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let word: DictionaryWord = dictionary_words::table
        .find(payload.word_id)
        .select(DictionaryWord::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| RevisionError::NotFound(format!("Word {} not found", payload.word_id)))?;

    let now = Utc::now().naive_utc();
    let inserted = diesel::insert_into(student_words::table)
        .values((
            student_words::user_id.eq(user_id),
            student_words::word_id.eq(word.word_id),
            student_words::successes.eq(0),
            student_words::is_master.eq(false),
            student_words::next_1.eq(1),
            student_words::next_2.eq(1),
            student_words::continue_revision.eq(true),
            student_words::start_at.eq(now),
            student_words::updated_at.eq(now),
        ))
        .on_conflict((student_words::user_id, student_words::word_id))
        .do_nothing()
        .execute(&mut conn)?;

    let message = if inserted == 0 {
        format!("'{}' is already in your revision list", word.word)
    } else {
        format!("'{}' added to your revision list", word.word)
    };

    Ok(Json(ApiResponse {
        success: true,
        message,
    }))
}

async fn revision_session(
    State(pool): State<DbPool>,
    session: Session,
) -> Result<Json<SessionPayload>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let now = Utc::now().naive_utc();
    let mut source = StudentWordSource::new(&mut conn);
    let payload = session::build_session(&mut source, user_id, now, &mut thread_rng())?;

    Ok(Json(payload))
}

async fn submit_revision(
    State(pool): State<DbPool>,
    session: Session,
    Json(payload): Json<SubmitRevisionRequest>,
) -> Result<Json<SubmitResponse>, RevisionError> {
    let user_id = current_user(&session).await?;
    let mut conn = get_conn(&pool)?;

    let now = Utc::now().naive_utc();
    let remaining = conn.transaction::<i64, RevisionError, _>(|conn| {
        let mut source = StudentWordSource::new(conn);
        session::submit_outcomes(&mut source, user_id, &payload.responses, now)
    })?;

    log::info!(
        "Saved {} word revision outcomes for user {}, {} due remaining",
        payload.responses.len(),
        user_id,
        remaining
    );

    let redirect_url = if payload.is_completed {
        "/dashboard".to_string()
    } else {
        "/dictionary/revision".to_string()
    };

    Ok(Json(SubmitResponse::saved(
        "Revision progress saved successfully",
        remaining,
        Some(redirect_url),
    )))
}
