//! Keyed storage capabilities the feed subsystem is built on.
//!
//! Everything the indexer, router and hydrator need from storage goes
//! through this surface: point reads, all-or-nothing multi-item writes with
//! an item ceiling, ranged index queries and bounded unordered batch reads.

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use thiserror::Error;
use tracing::debug;

use super::models::{Post, PostChanges, PostRow, Tag, TagIndexEntry, User};
use super::{Database, IndexKey, GLOBAL_FEED, LEGACY_POST_TYPE};

pub(crate) const POST_COLUMNS: &str = "post_id, user_id, username, title, content, tags, \
     created_at, updated_at, comment_count, post_avatar_id, feed_key";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction has {items} items, limit is {limit}")]
    TransactionLimit { items: usize, limit: usize },
    #[error("batch has {items} keys, limit is {limit}")]
    BatchLimit { items: usize, limit: usize },
    #[error("conditional check failed: {0}")]
    ConditionFailed(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
    #[error("storage unavailable: {0}")]
    Unavailable(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Per-call ceilings of the storage service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Items per atomic multi-item write.
    pub transaction_items: usize,
    /// Keys per batched multi-get.
    pub batch_get: usize,
    /// Deletes per batched write.
    pub batch_write: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            transaction_items: 100,
            batch_get: 100,
            batch_write: 25,
        }
    }
}

/// One operation inside an atomic multi-item write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteItem {
    /// Insert a new post. Fails if the id is taken.
    PutPost(Post),
    /// Apply field changes, conditioned on `updated_at` still matching.
    UpdatePost {
        post_id: String,
        expected_updated_at: i64,
        changes: PostChanges,
    },
    /// Remove a post, conditioned on `updated_at` still matching.
    DeletePost {
        post_id: String,
        expected_updated_at: i64,
    },
    /// Write nothing; fail unless the post exists with this `updated_at`.
    CheckPost {
        post_id: String,
        expected_updated_at: i64,
    },
    PutTagEntry(TagIndexEntry),
    DeleteTagEntry(TagIndexEntry),
    /// Insert the catalog row if absent; an existing row is a no-op.
    EnsureTag(Tag),
}

/// Partition of a range-queryable index, ordered by `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexPartition {
    /// Global ordering index: every live post with a feed partition marker.
    Feed,
    Tag(String),
    Author(String),
    /// Superseded type-marker index.
    LegacyType,
}

impl IndexPartition {
    /// (table, partition column, partition value)
    fn target(&self) -> (&'static str, &'static str, &str) {
        match self {
            Self::Feed => ("posts", "feed_key", GLOBAL_FEED),
            Self::Tag(tag) => ("tag_posts", "tag", tag.as_str()),
            Self::Author(user_id) => ("posts", "user_id", user_id.as_str()),
            Self::LegacyType => ("posts", "post_type", LEGACY_POST_TYPE),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Ascending,
    Descending,
}

impl ScanDirection {
    const fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Ranged read against one index partition. Bounds are inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub partition: IndexPartition,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub direction: ScanDirection,
    pub limit: u32,
}

/// A bounded page of index rows in scan order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexPage {
    pub keys: Vec<IndexKey>,
    /// Continuation marker, present when the page was filled to its limit.
    pub last_key: Option<IndexKey>,
}

impl Database {
    /// Point lookup of a post by id.
    pub async fn get_post(&self, post_id: &str) -> StoreResult<Option<Post>> {
        let row: Option<PostRow> =
            sqlx::query_as(&format!("SELECT {POST_COLUMNS} FROM posts WHERE post_id = ?"))
                .bind(post_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(decode_post).transpose()
    }

    /// Point lookup of a user by the unique username key.
    pub async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as(
            "SELECT user_id, username, active_avatar_id FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?)
    }

    pub async fn get_user(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(sqlx::query_as(
            "SELECT user_id, username, active_avatar_id FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Apply every item or none of them.
    ///
    /// # Errors
    ///
    /// `TransactionLimit` before touching storage when the item count exceeds
    /// the ceiling; `ConditionFailed` when a put, update or delete condition
    /// does not hold. Either way nothing is written.
    pub async fn transact_write(&self, items: &[WriteItem]) -> StoreResult<()> {
        if items.len() > self.limits.transaction_items {
            return Err(StoreError::TransactionLimit {
                items: items.len(),
                limit: self.limits.transaction_items,
            });
        }

        let mut tx = self.pool.begin().await?;
        for item in items {
            apply_item(&mut *tx, item).await?;
        }
        tx.commit().await?;

        debug!(items = items.len(), "Committed multi-item write");
        Ok(())
    }

    /// Range query against an index partition.
    pub async fn query_index(&self, query: &IndexQuery) -> StoreResult<IndexPage> {
        let (table, column, value) = query.partition.target();
        let order = query.direction.sql();
        let sql = format!(
            "SELECT post_id, created_at FROM {table} \
             WHERE {column} = ? AND created_at >= ? AND created_at <= ? \
             ORDER BY created_at {order}, post_id {order} LIMIT ?"
        );

        let keys: Vec<IndexKey> = sqlx::query_as(&sql)
            .bind(value)
            .bind(query.start.unwrap_or(i64::MIN))
            .bind(query.end.unwrap_or(i64::MAX))
            .bind(i64::from(query.limit))
            .fetch_all(&self.pool)
            .await?;

        let last_key = if keys.len() == query.limit as usize {
            keys.last().cloned()
        } else {
            None
        };

        Ok(IndexPage { keys, last_key })
    }

    /// Fetch posts by id. Results come back in no particular order and
    /// missing ids are simply absent.
    pub async fn batch_get_posts(&self, post_ids: &[String]) -> StoreResult<Vec<Post>> {
        if post_ids.len() > self.limits.batch_get {
            return Err(StoreError::BatchLimit {
                items: post_ids.len(),
                limit: self.limits.batch_get,
            });
        }
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {POST_COLUMNS} FROM posts WHERE post_id IN ("));
        let mut separated = builder.separated(", ");
        for id in post_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let rows: Vec<PostRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(decode_post).collect()
    }

    /// Ids of every comment attached to a post.
    pub async fn comment_ids_for_post(&self, post_id: &str) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT comment_id FROM comments WHERE post_id = ? ORDER BY created_at")
                .bind(post_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Delete a bounded batch of comments.
    pub async fn batch_delete_comments(&self, comment_ids: &[String]) -> StoreResult<()> {
        if comment_ids.len() > self.limits.batch_write {
            return Err(StoreError::BatchLimit {
                items: comment_ids.len(),
                limit: self.limits.batch_write,
            });
        }
        if comment_ids.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM comments WHERE comment_id IN (");
        let mut separated = builder.separated(", ");
        for id in comment_ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Scan the primary store in key order, starting after `after`.
    pub async fn scan_posts(&self, after: Option<&str>, limit: u32) -> StoreResult<Vec<Post>> {
        let rows: Vec<PostRow> = sqlx::query_as(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE post_id > ? ORDER BY post_id LIMIT ?"
        ))
        .bind(after.unwrap_or(""))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(decode_post).collect()
    }
}

pub(crate) fn decode_post(row: PostRow) -> StoreResult<Post> {
    let post_id = row.post_id.clone();
    Post::try_from(row).map_err(|e| StoreError::Corrupt(format!("post {post_id} tags: {e}")))
}

fn encode_tags(tags: &[String]) -> StoreResult<String> {
    serde_json::to_string(tags).map_err(|e| StoreError::Corrupt(format!("tags: {e}")))
}

async fn apply_item(conn: &mut SqliteConnection, item: &WriteItem) -> StoreResult<()> {
    match item {
        WriteItem::PutPost(post) => {
            sqlx::query(&format!(
                "INSERT INTO posts ({POST_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(&post.post_id)
            .bind(&post.user_id)
            .bind(&post.username)
            .bind(&post.title)
            .bind(&post.content)
            .bind(encode_tags(&post.tags)?)
            .bind(post.created_at)
            .bind(post.updated_at)
            .bind(post.comment_count)
            .bind(&post.post_avatar_id)
            .bind(&post.feed_key)
            .execute(&mut *conn)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    StoreError::ConditionFailed(format!("post {} already exists", post.post_id))
                }
                other => StoreError::Unavailable(other),
            })?;
        }
        WriteItem::UpdatePost {
            post_id,
            expected_updated_at,
            changes,
        } => {
            let tags = changes.tags.as_deref().map(encode_tags).transpose()?;
            let (set_avatar, avatar) = match &changes.post_avatar_id {
                Some(value) => (true, value.clone()),
                None => (false, None),
            };
            let result = sqlx::query(
                r"
                UPDATE posts SET
                    title = COALESCE(?, title),
                    content = COALESCE(?, content),
                    tags = COALESCE(?, tags),
                    post_avatar_id = CASE WHEN ? THEN ? ELSE post_avatar_id END,
                    updated_at = ?
                WHERE post_id = ? AND updated_at = ?
                ",
            )
            .bind(&changes.title)
            .bind(&changes.content)
            .bind(tags)
            .bind(set_avatar)
            .bind(avatar)
            .bind(changes.updated_at)
            .bind(post_id)
            .bind(expected_updated_at)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::ConditionFailed(format!(
                    "post {post_id} was modified or deleted concurrently"
                )));
            }
        }
        WriteItem::DeletePost {
            post_id,
            expected_updated_at,
        } => {
            let result = sqlx::query("DELETE FROM posts WHERE post_id = ? AND updated_at = ?")
                .bind(post_id)
                .bind(expected_updated_at)
                .execute(&mut *conn)
                .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::ConditionFailed(format!(
                    "post {post_id} was modified or deleted concurrently"
                )));
            }
        }
        WriteItem::CheckPost {
            post_id,
            expected_updated_at,
        } => {
            let found: Option<(i64,)> =
                sqlx::query_as("SELECT 1 FROM posts WHERE post_id = ? AND updated_at = ?")
                    .bind(post_id)
                    .bind(expected_updated_at)
                    .fetch_optional(&mut *conn)
                    .await?;

            if found.is_none() {
                return Err(StoreError::ConditionFailed(format!(
                    "post {post_id} was modified or deleted concurrently"
                )));
            }
        }
        WriteItem::PutTagEntry(entry) => {
            sqlx::query(
                "INSERT INTO tag_posts (tag, created_at, post_id) VALUES (?, ?, ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&entry.tag)
            .bind(entry.created_at)
            .bind(&entry.post_id)
            .execute(&mut *conn)
            .await?;
        }
        WriteItem::DeleteTagEntry(entry) => {
            sqlx::query("DELETE FROM tag_posts WHERE tag = ? AND created_at = ? AND post_id = ?")
                .bind(&entry.tag)
                .bind(entry.created_at)
                .bind(&entry.post_id)
                .execute(&mut *conn)
                .await?;
        }
        WriteItem::EnsureTag(tag) => {
            sqlx::query("INSERT INTO tags (tag_id, name) VALUES (?, ?) ON CONFLICT(tag_id) DO NOTHING")
                .bind(&tag.tag_id)
                .bind(&tag.name)
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}
