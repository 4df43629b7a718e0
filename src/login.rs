use axum::{
    Router,
    extract::{Form, State},
    response::{Html, Redirect},
    routing::get,
};
use bcrypt::verify;
use diesel::prelude::*;
use std::sync::Arc;
use tera::Tera;
use tower_sessions::Session;

use crate::{
    DbPool,
    auth::{LoginError, LoginForm},
    model::User,
    schema::users,
    utils::{self, session::set_user_session},
};

pub async fn show_login_form(
    State((_pool, tera)): State<(DbPool, Arc<Tera>)>,
) -> Result<Html<String>, LoginError> {
    let mut context = tera::Context::new();
    context.insert("title", "Login");
    Ok(utils::render_template(&tera, "login.html", context))
}

#[axum::debug_handler]
pub async fn handle_login(
    State((pool, _tera)): State<(DbPool, Arc<Tera>)>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Result<Redirect, LoginError> {
    let mut conn = pool
        .get()
        .map_err(|_| LoginError::SessionError("Failed to get DB connection".into()))?;

    let user = users::table
        .filter(users::username.eq(&form.username))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()?;

    if let Some(user) = user {
        if verify(&form.password, &user.password)? {
            set_user_session(&session, user.user_id, &user.username).await?;
            return Ok(Redirect::to("/dashboard"));
        }
    }

    Err(LoginError::InvalidCredentials)
}

pub async fn handle_logout(session: Session) -> Result<Redirect, LoginError> {
    session.delete().await.map_err(|e| {
        log::error!("Failed to delete session: {}", e);
        LoginError::SessionError("Failed to logout".into())
    })?;
    Ok(Redirect::to("/"))
}

pub fn auth_router(pool: DbPool, tera: Arc<Tera>) -> Router {
    Router::new()
        .route("/login", get(show_login_form).post(handle_login))
        .route("/logout", get(handle_logout))
        .with_state((pool, tera))
}
