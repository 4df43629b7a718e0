use anyhow::Context as _;
use axum::{
    Router,
    extract::Extension,
    response::IntoResponse,
    routing::{get, get_service},
};
use diesel::{
    SqliteConnection,
    r2d2::{ConnectionManager, Pool},
};
use std::sync::Arc;
use tera::{Context, Tera};
use time::Duration;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use whatslearn::{authoring, course, dictionary, login, register, utils};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Database configuration
    dotenv::dotenv().ok();
    env_logger::init();
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://whatslearn.db".into());

    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .build(manager)
        .context("Failed to create DB pool")?;

    // Templates configuration
    let templates = Arc::new(Tera::new("templates/**/*.html").context("Template parsing error")?);

    // Sessions configuration
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_expiry(Expiry::OnInactivity(Duration::days(1)))
        .with_secure(false);

    // Combined API router
    let api_router = Router::new()
        .nest("/courses", course::router(pool.clone()))
        .nest("/activities", course::activity_router(pool.clone()))
        .nest("/revision", course::revision_router(pool.clone()))
        .nest("/dictionary", dictionary::router(pool.clone()))
        .nest("/authoring", authoring::router(pool.clone()));

    // Auth router
    let auth_router = Router::new()
        .merge(login::auth_router(pool.clone(), templates.clone()))
        .merge(register::auth_router(pool.clone(), templates.clone()));

    // Main application router
    let app = Router::new()
        // Static pages
        .route("/", get(home))
        .route("/dashboard", get(dashboard))
        // Auth routes
        .nest("/auth", auth_router)
        // API routes
        .nest("/api", api_router)
        // Static and uploaded files
        .nest_service("/static", get_service(ServeDir::new("static")))
        .nest_service("/media", get_service(ServeDir::new("media")))
        // Shared state and layers
        .layer(Extension(templates))
        .layer(session_layer);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:5000".into());
    let listener = TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    log::info!("Server running on http://{addr}");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

// Handlers for static pages
async fn home(Extension(templates): Extension<Arc<Tera>>) -> impl IntoResponse {
    utils::render_template(&templates, "index.html", Context::new())
}

async fn dashboard(Extension(templates): Extension<Arc<Tera>>) -> impl IntoResponse {
    utils::render_template(&templates, "dashboard.html", Context::new())
}
