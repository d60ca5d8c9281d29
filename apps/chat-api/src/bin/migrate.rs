//! Applies the comment and block-list schema.
//!
//! Usage:
//!   cargo run -p chat-api --bin chat-migrate
//!   cargo run -p chat-api --bin chat-migrate -- --test
//!   cargo run -p chat-api --bin chat-migrate -- --status
//!
//! Reads DATABASE_URL from the environment (or .env via dotenvy). With
//! `--test` the database name gets a `_test` suffix.

use std::path::Path;

use diesel::pg::PgConnection;
use diesel::Connection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

fn main() {
    if dotenvy::dotenv().is_err() {
        let _ = dotenvy::from_path(Path::new(env!("CARGO_MANIFEST_DIR")).join(".env"));
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let has_flag = |flag: &str| args.iter().any(|a| a == flag);

    let mut database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL env var is required");
    if has_flag("--test") {
        database_url = test_database_url(&database_url);
    }

    let mut conn =
        PgConnection::establish(&database_url).expect("failed to connect to comment database");

    if has_flag("--status") {
        let pending = conn
            .pending_migrations(MIGRATIONS)
            .expect("failed to list migrations");
        if pending.is_empty() {
            println!("Comment schema is up to date.");
        }
        for migration in &pending {
            println!("  Pending: {}", migration.name());
        }
        return;
    }

    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .expect("failed to run migrations");
    for version in &applied {
        println!("  Applied: {version}");
    }
    println!("{} migration(s) applied.", applied.len());
}

/// `postgres://host/chat?x=y` becomes `postgres://host/chat_test?x=y`.
fn test_database_url(url: &str) -> String {
    let (base, query) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };
    let Some((prefix, name)) = base.rsplit_once('/') else {
        return url.to_string();
    };
    if name.is_empty() || name.ends_with("_test") {
        return url.to_string();
    }
    match query {
        Some(q) => format!("{prefix}/{name}_test?{q}"),
        None => format!("{prefix}/{name}_test"),
    }
}
