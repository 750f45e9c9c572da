use serde::{Deserialize, Serialize};

/// Partition marker that places a post into the global ordering index.
pub const GLOBAL_FEED: &str = "GLOBAL";

/// Partition marker of the superseded type-based feed index.
pub const LEGACY_POST_TYPE: &str = "POST";

/// A content item. `post_id` and `created_at` never change once assigned;
/// `created_at` (epoch milliseconds) is the ordering key of every index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub post_id: String,
    pub user_id: String,
    pub username: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub comment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_avatar_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_key: Option<String>,
}

/// Raw `posts` row; `tags` is stored as a JSON array.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct PostRow {
    pub post_id: String,
    pub user_id: String,
    pub username: String,
    pub title: String,
    pub content: String,
    pub tags: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub comment_count: i64,
    pub post_avatar_id: Option<String>,
    pub feed_key: Option<String>,
}

impl TryFrom<PostRow> for Post {
    type Error = serde_json::Error;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        Ok(Self {
            tags: serde_json::from_str(&row.tags)?,
            post_id: row.post_id,
            user_id: row.user_id,
            username: row.username,
            title: row.title,
            content: row.content,
            created_at: row.created_at,
            updated_at: row.updated_at,
            comment_count: row.comment_count,
            post_avatar_id: row.post_avatar_id,
            feed_key: row.feed_key,
        })
    }
}

/// One row of the tag index: a (post, tag) pair ordered by creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TagIndexEntry {
    pub tag: String,
    pub created_at: i64,
    pub post_id: String,
}

/// Tag catalog row. Written once per distinct tag, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub tag_id: String,
    pub name: String,
}

impl Tag {
    #[must_use]
    pub fn named(tag: &str) -> Self {
        Self {
            tag_id: tag.to_string(),
            name: tag.to_string(),
        }
    }
}

/// Compact row returned by an index range query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IndexKey {
    pub post_id: String,
    pub created_at: i64,
}

/// A registered user, as far as feed reads and post writes need one.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub active_avatar_id: Option<String>,
}

/// A comment on a post.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub comment_id: String,
    pub post_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub created_at: i64,
    pub parent_comment_id: Option<String>,
}

/// Field changes applied to an existing post.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostChanges {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` removes the avatar.
    pub post_avatar_id: Option<Option<String>>,
    pub updated_at: i64,
}

/// Progress of a resumable backfill procedure.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct BackfillProgress {
    pub name: String,
    pub last_post_id: Option<String>,
    pub processed: i64,
    pub updated: i64,
    pub completed: bool,
}
