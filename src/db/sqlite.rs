use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

/// One row per session; answer maps are JSON-encoded text columns.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    code            TEXT PRIMARY KEY,
    creator_id      INTEGER NOT NULL,
    partner_id      INTEGER,
    answers_creator TEXT,
    answers_partner TEXT,
    status          TEXT NOT NULL DEFAULT 'waiting',
    created_at      TEXT NOT NULL,
    completed_at    TEXT
)
"#;

/// Opens the SQLite connection pool and ensures the schema exists
///
/// `mode=rwc` in the default URL creates the database file on first run.
pub async fn create_pool(database_url: &str) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    init_schema(&pool).await?;

    Ok(pool)
}

/// Creates the sessions table if it does not exist yet
pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA).execute(pool).await?;
    Ok(())
}

/// In-memory pool, used by the test suites
///
/// A single connection keeps every query on the same in-memory database.
pub async fn memory_pool() -> anyhow::Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_schema(&pool).await?;
    Ok(pool)
}
