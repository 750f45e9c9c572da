use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    if current_version < 3 {
        debug!("Running migration v3");
        run_migration_v3(pool).await?;
        set_schema_version(pool, 3).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM _schema_version")
        .execute(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Primary records: posts keyed by id, users, comments and the tag catalog.
async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            post_id TEXT PRIMARY KEY NOT NULL,
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            comment_count INTEGER NOT NULL DEFAULT 0,
            post_avatar_id TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS users (
            user_id TEXT PRIMARY KEY NOT NULL,
            username TEXT UNIQUE NOT NULL,
            active_avatar_id TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create users table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS comments (
            comment_id TEXT PRIMARY KEY NOT NULL,
            post_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            username TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            parent_comment_id TEXT
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create comments table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_comments_post ON comments(post_id)")
        .execute(pool)
        .await
        .context("Failed to create comments post index")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS tags (
            tag_id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create tags table")?;

    Ok(())
}

/// First feed index: every post carries a type marker and the index orders
/// the single `POST` partition by creation time.
async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: legacy type-partitioned feed index");

    sqlx::query("ALTER TABLE posts ADD COLUMN post_type TEXT")
        .execute(pool)
        .await
        .context("Failed to add post_type column")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_type ON posts(post_type, created_at)")
        .execute(pool)
        .await
        .context("Failed to create type index")?;

    Ok(())
}

/// Current indexing strategy: global feed partition, author index and the
/// tag index table.
async fn run_migration_v3(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v3: feed partition, author and tag indexes");

    sqlx::query("ALTER TABLE posts ADD COLUMN feed_key TEXT")
        .execute(pool)
        .await
        .context("Failed to add feed_key column")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_feed ON posts(feed_key, created_at)")
        .execute(pool)
        .await
        .context("Failed to create feed index")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_author ON posts(user_id, created_at)")
        .execute(pool)
        .await
        .context("Failed to create author index")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS tag_posts (
            tag TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            post_id TEXT NOT NULL,
            PRIMARY KEY (tag, created_at, post_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create tag_posts table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_tag_posts_post ON tag_posts(post_id)")
        .execute(pool)
        .await
        .context("Failed to create tag_posts post index")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _backfill_progress (
            name TEXT PRIMARY KEY NOT NULL,
            last_post_id TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            updated INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create backfill progress table")?;

    Ok(())
}
