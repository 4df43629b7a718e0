use axum::{
    Router,
    extract::{Form, State},
    response::{Html, Redirect},
    routing::get,
};
use bcrypt::{DEFAULT_COST, hash};
use diesel::prelude::*;
use std::sync::Arc;
use tera::Tera;
use validator::Validate;

use crate::{
    DbPool,
    auth::{AuthError, RegisterError, RegisterForm},
    model::{NewUser, User},
    schema::users,
    utils::{self, session::set_user_session},
};

pub async fn show_register_form(
    State((_pool, tera)): State<(DbPool, Arc<Tera>)>,
) -> Result<Html<String>, AuthError> {
    let mut context = tera::Context::new();
    context.insert("title", "Register");
    Ok(utils::render_template(&tera, "register.html", context))
}

#[axum::debug_handler]
pub async fn handle_register(
    State((pool, _tera)): State<(DbPool, Arc<Tera>)>,
    session: tower_sessions::Session,
    Form(form): Form<RegisterForm>,
) -> Result<Redirect, AuthError> {
    form.validate().map_err(RegisterError::from)?;

    let mut conn = pool
        .get()
        .map_err(|_| RegisterError::SessionError("Failed to get DB connection".into()))?;

    let username_taken = users::table
        .filter(users::username.eq(&form.username))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(RegisterError::from)?
        .is_some();
    if username_taken {
        return Err(RegisterError::UsernameTaken.into());
    }

    let email_taken = users::table
        .filter(users::email.eq(&form.email))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .optional()
        .map_err(RegisterError::from)?
        .is_some();
    if email_taken {
        return Err(RegisterError::EmailTaken.into());
    }

    let hashed_password = hash(&form.password, DEFAULT_COST).map_err(RegisterError::from)?;

    diesel::insert_into(users::table)
        .values(&NewUser {
            email: &form.email,
            username: &form.username,
            password: &hashed_password,
        })
        .execute(&mut conn)
        .map_err(RegisterError::from)?;

    let user = users::table
        .filter(users::username.eq(&form.username))
        .select(User::as_select())
        .first::<User>(&mut conn)
        .map_err(RegisterError::from)?;

    set_user_session(&session, user.user_id, &user.username)
        .await
        .map_err(AuthError::from)?;

    Ok(Redirect::to("/dashboard"))
}

pub fn auth_router(pool: DbPool, tera: Arc<Tera>) -> Router {
    Router::new()
        .route("/register", get(show_register_form).post(handle_register))
        .with_state((pool, tera))
}
