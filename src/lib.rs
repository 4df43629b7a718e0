pub mod auth;
pub mod authoring;
pub mod course;
pub mod dictionary;
pub mod login;
pub mod model;
pub mod register;
pub mod revision;
pub mod schema;
pub mod utils;

use diesel::SqliteConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;
