//! Database initialization
//!
//! Creates the ranking schema on first start and opens it on later starts.
//! Every `CREATE` is `IF NOT EXISTS`, so running it against an existing file
//! is a no-op.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Current schema version recorded in `schema_version`
pub const SCHEMA_VERSION: i64 = 1;

/// How long a connection waits on a locked database before SQLITE_BUSY
const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open (creating if needed) the database at `db_path` and ensure the schema
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    // One worker writes; the API only appends mutations and reads lists
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema.
///
/// The connection is pinned (no idle timeout, no max lifetime) because an
/// in-memory SQLite database disappears with its last connection.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes (idempotent) and record the schema version
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_tiers_table(pool).await?;
    create_competition_classes_table(pool).await?;
    create_qualifiers_table(pool).await?;
    create_class_limits_table(pool).await?;
    create_mutations_table(pool).await?;
    create_worker_state_table(pool).await?;
    create_activity_log_table(pool).await?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?, ?)")
        .bind(SCHEMA_VERSION)
        .bind(crate::time::to_millis(crate::time::now()))
        .execute(pool)
        .await?;

    debug!("Schema version {} ensured", SCHEMA_VERSION);
    Ok(())
}

/// Highest schema version recorded, 0 for an empty database
pub async fn schema_version(pool: &SqlitePool) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_tiers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            level TEXT NOT NULL CHECK (level IN ('REGIONAL', 'NATIONAL')),
            parent_id INTEGER REFERENCES tiers(id),
            is_closed INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tiers_parent ON tiers(parent_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_competition_classes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS competition_classes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            description TEXT NOT NULL,
            is_team INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_qualifiers_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qualifiers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tier_id INTEGER NOT NULL REFERENCES tiers(id),
            class_id INTEGER NOT NULL REFERENCES competition_classes(id),
            subject_id TEXT NOT NULL,
            home_org_id INTEGER NOT NULL,
            seed_value TEXT NOT NULL,
            tiebreak_key TEXT NOT NULL DEFAULT '',
            champion_label TEXT NOT NULL DEFAULT '',
            order_index INTEGER NOT NULL CHECK (order_index >= 0),
            admission_rank INTEGER NOT NULL CHECK (admission_rank >= 0),
            participation TEXT NOT NULL DEFAULT 'UNKNOWN'
                CHECK (participation IN ('UNKNOWN', 'CONFIRMED', 'WITHDRAWN')),
            confirmation_requested_at INTEGER,
            audit_log TEXT NOT NULL DEFAULT '',
            UNIQUE (tier_id, class_id, subject_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_qualifiers_class ON qualifiers(tier_id, class_id, order_index)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_class_limits_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS class_limits (
            tier_id INTEGER NOT NULL REFERENCES tiers(id),
            class_id INTEGER NOT NULL REFERENCES competition_classes(id),
            limit_value INTEGER NOT NULL CHECK (limit_value >= 1),
            PRIMARY KEY (tier_id, class_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Mutation log. Targets carry no foreign keys: a record whose target has
/// vanished must still be readable so the worker can drop it with a reason.
async fn create_mutations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mutations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL CHECK (kind IN
                ('SEED', 'CUT_CHANGE', 'WITHDRAW', 'REGISTER', 'INVITE', 'CASCADE',
                 'EXTRA_ENTRY', 'MOVE_CLASS', 'RENUMBER')),
            tier_id INTEGER NOT NULL,
            class_id INTEGER,
            qualifier_id INTEGER,
            old_limit INTEGER,
            new_limit INTEGER,
            payload TEXT,
            actor TEXT NOT NULL DEFAULT '',
            created_at INTEGER NOT NULL,
            processed_at INTEGER,
            is_processed INTEGER NOT NULL DEFAULT 0,
            outcome TEXT,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_mutations_pending ON mutations(is_processed, created_at, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_worker_state_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS worker_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            high_water_mark INTEGER NOT NULL DEFAULT 0,
            last_pass_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO worker_state (id, high_water_mark) VALUES (1, 0)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_activity_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tier_id INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            actor TEXT NOT NULL DEFAULT '',
            topic TEXT NOT NULL,
            message TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
