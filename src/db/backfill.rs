//! Resumable index bootstrap over existing posts.
//!
//! Each procedure scans the primary store in key order and adds the index
//! attribute or rows a post is missing. Progress is saved after every page,
//! so an interrupted run resumes where it stopped. Every write is guarded by
//! an attribute-presence check, so reruns change nothing.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use super::{
    count_orphan_tag_entries, get_backfill_progress, reset_backfill_progress,
    save_backfill_progress, set_feed_key_if_absent, set_post_type_if_absent,
    tag_entries_for_post, BackfillProgress, Database, Post, StoreError, Tag, TagIndexEntry,
    WriteItem,
};

/// The available backfill procedures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backfill {
    /// Legacy type marker on every post.
    PostType,
    /// Global feed partition marker on every post.
    FeedKey,
    /// Tag index rows and catalog entries for every tag of every post.
    TagIndex,
}

impl Backfill {
    pub const ALL: [Self; 3] = [Self::PostType, Self::FeedKey, Self::TagIndex];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PostType => "post-type",
            Self::FeedKey => "feed-key",
            Self::TagIndex => "tag-index",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

/// Configuration for a backfill run.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Posts read per scan page.
    pub page_size: u32,
    /// Delay between pages, to leave write capacity for live traffic.
    pub page_delay: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            page_delay: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    /// Posts examined in this run.
    pub processed: u64,
    /// Posts that needed a write in this run.
    pub updated: u64,
    /// The procedure had already completed and was not run.
    pub skipped: bool,
}

/// Run one backfill procedure to completion.
///
/// # Errors
///
/// Returns an error if a storage call fails. Progress up to the last
/// finished page is kept, so the run can simply be repeated.
pub async fn run_backfill(
    db: &Database,
    kind: Backfill,
    config: &BackfillConfig,
    reset: bool,
) -> Result<BackfillReport> {
    let name = kind.name();
    if config.page_size == 0 {
        bail!("backfill page size must be at least 1");
    }
    if reset {
        reset_backfill_progress(db.pool(), name).await?;
    }

    let mut progress = get_backfill_progress(db.pool(), name)
        .await?
        .unwrap_or_else(|| BackfillProgress {
            name: name.to_string(),
            ..BackfillProgress::default()
        });

    if progress.completed {
        info!(backfill = name, "Backfill already completed, skipping");
        return Ok(BackfillReport {
            skipped: true,
            ..BackfillReport::default()
        });
    }

    if let Some(after) = &progress.last_post_id {
        info!(backfill = name, after = %after, processed = progress.processed, "Resuming backfill");
    } else {
        info!(backfill = name, "Starting backfill");
    }

    let mut report = BackfillReport::default();
    loop {
        let page = db
            .scan_posts(progress.last_post_id.as_deref(), config.page_size)
            .await
            .context("Failed to scan posts")?;
        let Some(last) = page.last() else {
            break;
        };
        let last_post_id = last.post_id.clone();

        let mut page_updated = 0u64;
        for post in &page {
            if backfill_post(db, kind, post)
                .await
                .with_context(|| format!("{name} backfill failed on post {}", post.post_id))?
            {
                page_updated += 1;
                debug!(backfill = name, post_id = %post.post_id, "Backfilled post");
            }
        }

        report.processed += page.len() as u64;
        report.updated += page_updated;
        progress.processed += page.len() as i64;
        progress.updated += page_updated as i64;
        progress.last_post_id = Some(last_post_id);
        save_backfill_progress(db.pool(), &progress).await?;

        info!(
            backfill = name,
            page_size = page.len(),
            page_updated,
            total = progress.processed,
            "Processed backfill page"
        );

        if page.len() < config.page_size as usize {
            break;
        }
        tokio::time::sleep(config.page_delay).await;
    }

    progress.completed = true;
    save_backfill_progress(db.pool(), &progress).await?;
    info!(
        backfill = name,
        processed = progress.processed,
        updated = progress.updated,
        "Backfill complete"
    );

    Ok(report)
}

/// Attempts at a tag-index write before giving up on a post that keeps changing.
const TAG_WRITE_ATTEMPTS: usize = 3;

/// Returns `true` if the post needed a write.
async fn backfill_post(db: &Database, kind: Backfill, post: &Post) -> Result<bool> {
    match kind {
        Backfill::PostType => set_post_type_if_absent(db.pool(), &post.post_id).await,
        Backfill::FeedKey => set_feed_key_if_absent(db.pool(), &post.post_id).await,
        Backfill::TagIndex => backfill_tag_entries(db, post).await,
    }
}

/// Add the missing tag rows of `post`, re-reading it whenever it changed
/// after being scanned. A post deleted mid-run is skipped.
async fn backfill_tag_entries(db: &Database, scanned: &Post) -> Result<bool> {
    let mut current = scanned.clone();
    for attempt in 1..=TAG_WRITE_ATTEMPTS {
        let existing = tag_entries_for_post(db.pool(), &current.post_id).await?;
        let items = missing_tag_items(&current, &existing);
        if items.is_empty() {
            return Ok(false);
        }
        match db.transact_write(&items).await {
            Ok(()) => return Ok(true),
            Err(StoreError::ConditionFailed(reason)) => {
                debug!(post_id = %current.post_id, attempt, %reason, "Post changed during backfill");
                match db.get_post(&current.post_id).await? {
                    Some(post) => current = post,
                    None => return Ok(false),
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
    bail!(
        "post {} kept changing during tag backfill after {TAG_WRITE_ATTEMPTS} attempts",
        scanned.post_id
    )
}

/// Index and catalog writes for the tags of `post` that have no entry yet.
///
/// A non-empty list starts with a check that the post still exists with the
/// `updated_at` it was read at, so rows are never added for a deleted post
/// or for tags an edit already removed.
#[must_use]
pub fn missing_tag_items(post: &Post, existing: &[TagIndexEntry]) -> Vec<WriteItem> {
    let indexed: HashSet<&str> = existing.iter().map(|e| e.tag.as_str()).collect();
    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for tag in &post.tags {
        if indexed.contains(tag.as_str()) || !seen.insert(tag.as_str()) {
            continue;
        }
        items.push(WriteItem::PutTagEntry(TagIndexEntry {
            tag: tag.clone(),
            created_at: post.created_at,
            post_id: post.post_id.clone(),
        }));
        items.push(WriteItem::EnsureTag(Tag::named(tag)));
    }
    if !items.is_empty() {
        items.insert(
            0,
            WriteItem::CheckPost {
                post_id: post.post_id.clone(),
                expected_updated_at: post.updated_at,
            },
        );
    }
    items
}

/// Differences between posts' tag lists and the tag index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub posts_checked: u64,
    /// Tags on a post with no index row.
    pub missing_entries: u64,
    /// Index rows for a tag the post no longer carries, or with the wrong timestamp.
    pub stale_entries: u64,
    /// Index rows whose post no longer exists.
    pub orphan_entries: u64,
}

impl DriftReport {
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.missing_entries == 0 && self.stale_entries == 0 && self.orphan_entries == 0
    }
}

/// Compare every post's tag list with its index rows. Read only.
///
/// # Errors
///
/// Returns an error if a storage call fails.
pub async fn verify_tag_index(db: &Database, page_size: u32) -> Result<DriftReport> {
    let mut report = DriftReport::default();
    let mut after: Option<String> = None;

    loop {
        let page = db
            .scan_posts(after.as_deref(), page_size.max(1))
            .await
            .context("Failed to scan posts")?;
        let Some(last) = page.last() else {
            break;
        };
        after = Some(last.post_id.clone());

        for post in &page {
            let entries = tag_entries_for_post(db.pool(), &post.post_id).await?;
            let tags: HashSet<&str> = post.tags.iter().map(String::as_str).collect();
            let valid: HashSet<&str> = entries
                .iter()
                .filter(|e| e.created_at == post.created_at && tags.contains(e.tag.as_str()))
                .map(|e| e.tag.as_str())
                .collect();

            let missing = tags.difference(&valid).count() as u64;
            let stale = (entries.len() - valid.len()) as u64;
            if missing > 0 || stale > 0 {
                warn!(post_id = %post.post_id, missing, stale, "Tag index drift");
            }
            report.missing_entries += missing;
            report.stale_entries += stale;
        }
        report.posts_checked += page.len() as u64;

        if page.len() < page_size.max(1) as usize {
            break;
        }
    }

    report.orphan_entries = count_orphan_tag_entries(db.pool()).await?.unsigned_abs();
    info!(
        posts = report.posts_checked,
        missing = report.missing_entries,
        stale = report.stale_entries,
        orphans = report.orphan_entries,
        "Verified tag index"
    );
    Ok(report)
}
