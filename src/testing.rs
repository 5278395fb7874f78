//! Fixtures backed by an in-memory SQLite database with the real migrations.

use chrono::{DateTime, FixedOffset, Utc};
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection, EntityTrait, Set};
use tempfile::TempDir;

use crate::entities::{post, session, user};

pub async fn memory_database() -> DatabaseConnection {
    // A single connection keeps every query on the same in-memory database.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let database = Database::connect(options)
        .await
        .expect("in-memory sqlite connects");
    migration::Migrator::up(&database, None)
        .await
        .expect("migrations apply");
    database
}

/// File-backed database with a pool of `max_connections`, so concurrent
/// transactions run on separate connections and contend for the write lock.
pub async fn file_database(dir: &TempDir, max_connections: u32) -> DatabaseConnection {
    let path = dir.path().join("forum.sqlite");
    let mut options = ConnectOptions::new(format!("sqlite://{}?mode=rwc", path.display()));
    options
        .max_connections(max_connections)
        .min_connections(1)
        .sqlx_logging(false);
    let database = Database::connect(options)
        .await
        .expect("file sqlite connects");
    migration::Migrator::up(&database, None)
        .await
        .expect("migrations apply");
    database
}

pub async fn insert_user(database: &DatabaseConnection, id: &str) {
    let row = user::ActiveModel {
        id: Set(id.to_string()),
        name: Set(id.to_string()),
        email: Set(format!("{id}@example.test")),
        created_at: Set(Utc::now().fixed_offset()),
    };
    user::Entity::insert(row)
        .exec_without_returning(database)
        .await
        .expect("user inserts");
}

pub async fn insert_post(database: &DatabaseConnection, id: &str, author_id: &str) {
    insert_post_at(database, id, author_id, Utc::now().fixed_offset()).await;
}

pub async fn insert_post_at(
    database: &DatabaseConnection,
    id: &str,
    author_id: &str,
    created_at: DateTime<FixedOffset>,
) {
    let row = post::ActiveModel {
        id: Set(id.to_string()),
        title: Set(format!("Post {id}")),
        content: Set("<p>hello</p>".to_string()),
        author_id: Set(author_id.to_string()),
        score: Set(0),
        created_at: Set(created_at),
        updated_at: Set(created_at),
    };
    post::Entity::insert(row)
        .exec_without_returning(database)
        .await
        .expect("post inserts");
}

pub async fn insert_session(
    database: &DatabaseConnection,
    token: &str,
    user_id: &str,
    expires_at: DateTime<FixedOffset>,
) {
    let row = session::ActiveModel {
        token: Set(token.to_string()),
        user_id: Set(user_id.to_string()),
        expires_at: Set(expires_at),
        created_at: Set(Utc::now().fixed_offset()),
    };
    session::Entity::insert(row)
        .exec_without_returning(database)
        .await
        .expect("session inserts");
}
