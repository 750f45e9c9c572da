//! Timestamp cursors for feed pagination.
//!
//! A cursor is the creation timestamp of a boundary post. `since` resumes
//! toward older content, `until` pages toward newer content. Both bounds are
//! strict, so the boundary post is never repeated on the next page.

use serde::{Deserialize, Serialize};

use crate::db::{Post, ScanDirection};
use crate::error::{FeedError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// Only items with `created_at < t`.
    Since(i64),
    /// Only items with `created_at > t`.
    Until(i64),
}

impl Cursor {
    /// Build a cursor from the two mutually exclusive request parameters.
    pub fn from_bounds(since: Option<i64>, until: Option<i64>) -> Result<Option<Self>> {
        match (since, until) {
            (Some(_), Some(_)) => Err(FeedError::InvalidInput(
                "since and until are mutually exclusive".to_string(),
            )),
            (Some(t), None) => Ok(Some(Self::Since(t))),
            (None, Some(t)) => Ok(Some(Self::Until(t))),
            (None, None) => Ok(None),
        }
    }

    /// Scan order that yields the items nearest the boundary first.
    #[must_use]
    pub const fn direction(self) -> ScanDirection {
        match self {
            Self::Since(_) => ScanDirection::Descending,
            Self::Until(_) => ScanDirection::Ascending,
        }
    }

    /// Tighten an inclusive `[start, end]` range by this cursor's strict bound.
    #[must_use]
    pub fn narrow(self, start: Option<i64>, end: Option<i64>) -> (Option<i64>, Option<i64>) {
        match self {
            Self::Since(t) => {
                let bound = t.saturating_sub(1);
                (start, Some(end.map_or(bound, |e| e.min(bound))))
            }
            Self::Until(t) => {
                let bound = t.saturating_add(1);
                (Some(start.map_or(bound, |s| s.max(bound))), end)
            }
        }
    }
}

/// Cursors for the neighbouring pages. Both are absent on an empty page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    /// Creation timestamp of the oldest item; resubmit as `since`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_since: Option<i64>,
    /// Creation timestamp of the newest item; resubmit as `until`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_until: Option<i64>,
}

/// A page of posts, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPage {
    pub items: Vec<Post>,
    pub page: PageInfo,
}

impl FeedPage {
    /// Wrap items that are already ordered newest first.
    #[must_use]
    pub fn from_items(items: Vec<Post>) -> Self {
        let page = match (items.first(), items.last()) {
            (Some(newest), Some(oldest)) => PageInfo {
                next_since: Some(oldest.created_at),
                prev_until: Some(newest.created_at),
            },
            _ => PageInfo::default(),
        };
        Self { items, page }
    }
}
