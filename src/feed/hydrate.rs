//! Expand compact index rows into full post records.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::db::{Database, IndexKey, Post, StoreResult};

/// Fetch the posts behind `keys`, returned in the order of `keys`.
///
/// Ids are deduplicated before fetching and fetched in batches no larger
/// than the store's multi-get ceiling. Rows pointing at posts that no longer
/// exist are logged and dropped.
pub async fn hydrate(db: &Database, keys: &[IndexKey]) -> StoreResult<Vec<Post>> {
    let ids = unique_ids(keys);
    let mut fetched = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(db.limits().batch_get.max(1)) {
        fetched.extend(db.batch_get_posts(chunk).await?);
    }
    Ok(restore_order(keys, fetched))
}

/// Post ids in first-seen order, without repeats.
fn unique_ids(keys: &[IndexKey]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(keys.len());
    let mut ids = Vec::with_capacity(keys.len());
    for key in keys {
        if seen.insert(key.post_id.as_str()) {
            ids.push(key.post_id.clone());
        }
    }
    ids
}

/// Re-impose index order on an unordered batch of posts.
#[must_use]
pub fn restore_order(keys: &[IndexKey], fetched: Vec<Post>) -> Vec<Post> {
    let mut by_id: HashMap<String, Post> = fetched
        .into_iter()
        .map(|post| (post.post_id.clone(), post))
        .collect();
    let mut emitted = HashSet::with_capacity(keys.len());
    let mut ordered = Vec::with_capacity(keys.len());

    for key in keys {
        if !emitted.insert(key.post_id.as_str()) {
            continue;
        }
        match by_id.remove(&key.post_id) {
            Some(post) => ordered.push(post),
            None => warn!(
                post_id = %key.post_id,
                created_at = key.created_at,
                "Index entry references a missing post, dropping it"
            ),
        }
    }
    ordered
}
