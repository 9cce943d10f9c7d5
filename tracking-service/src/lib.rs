pub mod api;
pub mod auth;
pub mod catalog;
pub mod error;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod serials;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub type DbPool = diesel_async::pooled_connection::bb8::Pool<diesel_async::AsyncPgConnection>;
