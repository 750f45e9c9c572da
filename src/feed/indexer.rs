//! Secondary index maintenance for post writes.
//!
//! Every create, update and delete becomes one all-or-nothing multi-item
//! write touching the post and its index rows together. The `plan_*`
//! functions compute those items and never touch storage; [`PostWriter`]
//! runs them.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::clock::MonotonicClock;
use crate::auth::Subject;
use crate::db::{Database, Post, PostChanges, Tag, TagIndexEntry, WriteItem, GLOBAL_FEED};
use crate::error::{FeedError, Result};

/// Fields of a post to create.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub post_avatar_id: Option<String>,
}

/// Partial edit of an existing post. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct PostEdit {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` removes the avatar.
    pub post_avatar_id: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub post_id: String,
    pub deleted_comments: usize,
}

/// Trim tags, drop empty ones and remove repeats, keeping first-seen order.
#[must_use]
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tags.len());
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && seen.insert(tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn tag_entry(tag: &str, post: &Post) -> TagIndexEntry {
    TagIndexEntry {
        tag: tag.to_string(),
        created_at: post.created_at,
        post_id: post.post_id.clone(),
    }
}

/// Items for a new post: the post itself (which carries its feed marker),
/// then an index row and an idempotent catalog row per tag.
#[must_use]
pub fn plan_create(post: &Post) -> Vec<WriteItem> {
    let mut items = Vec::with_capacity(1 + post.tags.len() * 2);
    items.push(WriteItem::PutPost(post.clone()));
    for tag in &post.tags {
        items.push(WriteItem::PutTagEntry(tag_entry(tag, post)));
        items.push(WriteItem::EnsureTag(Tag::named(tag)));
    }
    items
}

/// Tags to add and remove when moving from one tag list to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[must_use]
pub fn diff_tags(before: &[String], after: &[String]) -> TagDiff {
    let old: HashSet<&str> = before.iter().map(String::as_str).collect();
    let new: HashSet<&str> = after.iter().map(String::as_str).collect();
    TagDiff {
        added: after
            .iter()
            .filter(|t| !old.contains(t.as_str()))
            .cloned()
            .collect(),
        removed: before
            .iter()
            .filter(|t| !new.contains(t.as_str()))
            .cloned()
            .collect(),
    }
}

/// Items for an edit of `current`. The post update is conditioned on the
/// `updated_at` the diff was computed from; tags present both before and
/// after produce no items.
#[must_use]
pub fn plan_update(current: &Post, changes: &PostChanges) -> Vec<WriteItem> {
    let mut items = vec![WriteItem::UpdatePost {
        post_id: current.post_id.clone(),
        expected_updated_at: current.updated_at,
        changes: changes.clone(),
    }];

    if let Some(tags) = &changes.tags {
        let diff = diff_tags(&current.tags, tags);
        for tag in &diff.removed {
            items.push(WriteItem::DeleteTagEntry(tag_entry(tag, current)));
        }
        for tag in &diff.added {
            items.push(WriteItem::PutTagEntry(tag_entry(tag, current)));
            items.push(WriteItem::EnsureTag(Tag::named(tag)));
        }
    }
    items
}

/// Items for removing a post and every index row pointing at it. The delete
/// is conditioned on `updated_at`, so a tag added after `post` was read
/// makes the whole write fail instead of leaving its index row behind.
#[must_use]
pub fn plan_delete(post: &Post) -> Vec<WriteItem> {
    let mut items = Vec::with_capacity(1 + post.tags.len());
    items.push(WriteItem::DeletePost {
        post_id: post.post_id.clone(),
        expected_updated_at: post.updated_at,
    });
    for tag in &post.tags {
        items.push(WriteItem::DeleteTagEntry(tag_entry(tag, post)));
    }
    items
}

/// Runs post writes against storage.
#[derive(Debug, Clone)]
pub struct PostWriter {
    db: Database,
    max_tags: usize,
    clock: Arc<MonotonicClock>,
}

impl PostWriter {
    #[must_use]
    pub fn new(db: Database, max_tags: usize) -> Self {
        Self {
            db,
            max_tags,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    fn check_tags(&self, tags: &[String]) -> Result<Vec<String>> {
        let tags = normalize_tags(tags);
        if tags.len() > self.max_tags {
            return Err(FeedError::InvalidInput(format!(
                "A post may carry at most {} tags",
                self.max_tags
            )));
        }
        Ok(tags)
    }

    /// Create a post and its index entries atomically.
    pub async fn create(&self, subject: &Subject, new: NewPost) -> Result<Post> {
        let title = required_text("title", &new.title)?;
        let content = required_text("content", &new.content)?;
        let tags = self.check_tags(&new.tags)?;

        let user = match self.db.get_user(&subject.user_id).await {
            Ok(user) => user,
            Err(e) => {
                warn!(user_id = %subject.user_id, error = %e, "Failed to look up post author");
                None
            }
        };
        let username = subject
            .username
            .clone()
            .or_else(|| user.as_ref().map(|u| u.username.clone()))
            .unwrap_or_else(|| subject.user_id.clone());
        let post_avatar_id = new
            .post_avatar_id
            .filter(|id| !id.is_empty())
            .or_else(|| user.and_then(|u| u.active_avatar_id));

        let now = self.clock.now_millis();
        let post = Post {
            post_id: Uuid::new_v4().to_string(),
            user_id: subject.user_id.clone(),
            username,
            title,
            content,
            tags,
            created_at: now,
            updated_at: now,
            comment_count: 0,
            post_avatar_id,
            feed_key: Some(GLOBAL_FEED.to_string()),
        };

        self.db.transact_write(&plan_create(&post)).await?;
        info!(post_id = %post.post_id, tags = post.tags.len(), "Created post");
        Ok(post)
    }

    /// Apply an edit by the post's owner.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden` for anyone but the author, and `Conflict` when
    /// the post changed after it was read.
    pub async fn update(&self, subject: &Subject, post_id: &str, edit: PostEdit) -> Result<Post> {
        let current = self.owned_post(subject, post_id).await?;

        let changes = PostChanges {
            title: edit.title.as_deref().map(|t| required_text("title", t)).transpose()?,
            content: edit
                .content
                .as_deref()
                .map(|c| required_text("content", c))
                .transpose()?,
            tags: edit.tags.as_deref().map(|t| self.check_tags(t)).transpose()?,
            post_avatar_id: edit
                .post_avatar_id
                .map(|avatar| avatar.filter(|id| !id.is_empty())),
            updated_at: self.clock.now_millis().max(current.updated_at + 1),
        };

        self.db.transact_write(&plan_update(&current, &changes)).await?;
        info!(post_id = %post_id, "Updated post");
        Ok(apply_changes(current, changes))
    }

    /// Delete a post owned by the caller, its comments and its index rows.
    ///
    /// Comments go first in bounded batches outside the post's transaction.
    /// If the transaction then fails the post survives with fewer comments.
    pub async fn delete(&self, subject: &Subject, post_id: &str) -> Result<DeleteOutcome> {
        let post = self.owned_post(subject, post_id).await?;
        let deleted_comments = self.purge_comments(post_id).await?;

        self.db.transact_write(&plan_delete(&post)).await?;
        info!(post_id = %post_id, deleted_comments, "Deleted post");
        Ok(DeleteOutcome {
            post_id: post.post_id,
            deleted_comments,
        })
    }

    /// Remove every comment of a post in batches of the store's write ceiling.
    pub async fn purge_comments(&self, post_id: &str) -> Result<usize> {
        let ids = self.db.comment_ids_for_post(post_id).await?;
        for batch in ids.chunks(self.db.limits().batch_write.max(1)) {
            self.db.batch_delete_comments(batch).await?;
        }
        Ok(ids.len())
    }

    async fn owned_post(&self, subject: &Subject, post_id: &str) -> Result<Post> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| FeedError::NotFound("Post".to_string()))?;
        if post.user_id != subject.user_id {
            return Err(FeedError::Forbidden(
                "Only the author can modify this post".to_string(),
            ));
        }
        Ok(post)
    }

    #[must_use]
    pub const fn database(&self) -> &Database {
        &self.db
    }
}

fn required_text(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FeedError::InvalidInput(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn apply_changes(mut post: Post, changes: PostChanges) -> Post {
    if let Some(title) = changes.title {
        post.title = title;
    }
    if let Some(content) = changes.content {
        post.content = content;
    }
    if let Some(tags) = changes.tags {
        post.tags = tags;
    }
    if let Some(avatar) = changes.post_avatar_id {
        post.post_avatar_id = avatar;
    }
    post.updated_at = changes.updated_at;
    post
}
