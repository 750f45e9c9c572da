use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{BackfillProgress, Comment, Tag, TagIndexEntry, User};
use super::{GLOBAL_FEED, LEGACY_POST_TYPE};

// ========== Users ==========

/// Insert a user record. Registration lives outside this service; this is
/// used by fixtures and imports.
pub async fn insert_user(pool: &SqlitePool, user: &User) -> Result<()> {
    sqlx::query("INSERT INTO users (user_id, username, active_avatar_id) VALUES (?, ?, ?)")
        .bind(&user.user_id)
        .bind(&user.username)
        .bind(&user.active_avatar_id)
        .execute(pool)
        .await
        .context("Failed to insert user")?;
    Ok(())
}

// ========== Comments ==========

/// Insert a comment and bump the post's comment counter in one transaction.
///
/// Returns `false` without writing anything when the post does not exist.
pub async fn insert_comment(pool: &SqlitePool, comment: &Comment) -> Result<bool> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin comment transaction")?;

    let updated = sqlx::query("UPDATE posts SET comment_count = comment_count + 1 WHERE post_id = ?")
        .bind(&comment.post_id)
        .execute(&mut *tx)
        .await
        .context("Failed to bump comment count")?;

    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query(
        r"
        INSERT INTO comments (comment_id, post_id, user_id, username, content, created_at, parent_comment_id)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&comment.comment_id)
    .bind(&comment.post_id)
    .bind(&comment.user_id)
    .bind(&comment.username)
    .bind(&comment.content)
    .bind(comment.created_at)
    .bind(&comment.parent_comment_id)
    .execute(&mut *tx)
    .await
    .context("Failed to insert comment")?;

    tx.commit().await.context("Failed to commit comment")?;
    Ok(true)
}

pub async fn count_comments_for_post(pool: &SqlitePool, post_id: &str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments WHERE post_id = ?")
        .bind(post_id)
        .fetch_one(pool)
        .await
        .context("Failed to count comments")?;
    Ok(count)
}

// ========== Index inspection ==========

/// Every tag index row pointing at a post.
pub async fn tag_entries_for_post(pool: &SqlitePool, post_id: &str) -> Result<Vec<TagIndexEntry>> {
    sqlx::query_as("SELECT tag, created_at, post_id FROM tag_posts WHERE post_id = ? ORDER BY tag")
        .bind(post_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch tag entries")
}

/// Number of global feed index rows for a post (0 or 1).
pub async fn count_feed_entries_for_post(pool: &SqlitePool, post_id: &str) -> Result<i64> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM posts WHERE post_id = ? AND feed_key = ?")
            .bind(post_id)
            .bind(GLOBAL_FEED)
            .fetch_one(pool)
            .await
            .context("Failed to count feed entries")?;
    Ok(count)
}

/// Tag index rows whose post no longer exists.
pub async fn count_orphan_tag_entries(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r"
        SELECT COUNT(*) FROM tag_posts t
        WHERE NOT EXISTS (SELECT 1 FROM posts p WHERE p.post_id = t.post_id)
        ",
    )
    .fetch_one(pool)
    .await
    .context("Failed to count orphan tag entries")?;
    Ok(count)
}

pub async fn get_tag(pool: &SqlitePool, tag_id: &str) -> Result<Option<Tag>> {
    sqlx::query_as("SELECT tag_id, name FROM tags WHERE tag_id = ?")
        .bind(tag_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch tag")
}

pub async fn count_tags(pool: &SqlitePool) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tags")
        .fetch_one(pool)
        .await
        .context("Failed to count tags")?;
    Ok(count)
}

// ========== Backfill ==========

/// Set the legacy type marker on a post that does not carry one yet.
///
/// Returns `true` if the post was updated.
pub async fn set_post_type_if_absent(pool: &SqlitePool, post_id: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE posts SET post_type = ? WHERE post_id = ? AND post_type IS NULL")
        .bind(LEGACY_POST_TYPE)
        .bind(post_id)
        .execute(pool)
        .await
        .context("Failed to set post type")?;
    Ok(result.rows_affected() > 0)
}

/// Place a post into the global feed partition if it is not there yet.
///
/// Returns `true` if the post was updated.
pub async fn set_feed_key_if_absent(pool: &SqlitePool, post_id: &str) -> Result<bool> {
    let result = sqlx::query("UPDATE posts SET feed_key = ? WHERE post_id = ? AND feed_key IS NULL")
        .bind(GLOBAL_FEED)
        .bind(post_id)
        .execute(pool)
        .await
        .context("Failed to set feed key")?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_backfill_progress(pool: &SqlitePool, name: &str) -> Result<Option<BackfillProgress>> {
    sqlx::query_as(
        "SELECT name, last_post_id, processed, updated, completed FROM _backfill_progress WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch backfill progress")
}

pub async fn save_backfill_progress(pool: &SqlitePool, progress: &BackfillProgress) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO _backfill_progress (name, last_post_id, processed, updated, completed)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            last_post_id = excluded.last_post_id,
            processed = excluded.processed,
            updated = excluded.updated,
            completed = excluded.completed
        ",
    )
    .bind(&progress.name)
    .bind(&progress.last_post_id)
    .bind(progress.processed)
    .bind(progress.updated)
    .bind(progress.completed)
    .execute(pool)
    .await
    .context("Failed to save backfill progress")?;
    Ok(())
}

pub async fn reset_backfill_progress(pool: &SqlitePool, name: &str) -> Result<()> {
    sqlx::query("DELETE FROM _backfill_progress WHERE name = ?")
        .bind(name)
        .execute(pool)
        .await
        .context("Failed to reset backfill progress")?;
    Ok(())
}
