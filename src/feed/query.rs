//! Read-side query routing for the post feed.
//!
//! Each request resolves to exactly one filter, and each filter maps to one
//! ranged read against one index.

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tracing::debug;

use super::cursor::{Cursor, FeedPage};
use super::hydrate::hydrate;
use crate::db::{Database, IndexPartition, IndexQuery, ScanDirection};
use crate::error::{FeedError, Result};

const DAY_MILLIS: i64 = 86_400_000;

/// Raw query-string parameters of the feed endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedParams {
    pub tag: Option<String>,
    pub author: Option<String>,
    pub day: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub limit: Option<String>,
}

/// A UTC calendar day as an inclusive millisecond range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: i64,
    pub end: i64,
}

impl DayWindow {
    /// Parse a `YYYY-MM-DD` day.
    pub fn parse(day: &str) -> Result<Self> {
        let invalid = || FeedError::InvalidInput("Invalid day format. Use YYYY-MM-DD".to_string());
        if day.len() != 10 {
            return Err(invalid());
        }
        let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|_| invalid())?;
        let start = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        Ok(Self {
            start,
            end: start + DAY_MILLIS - 1,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFilter {
    Global,
    ByTag(String),
    /// Author display name, resolved to a user id at query time.
    ByAuthor(String),
    ByDay(DayWindow),
}

/// A validated feed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub filter: FeedFilter,
    pub cursor: Option<Cursor>,
    pub limit: u32,
}

impl FeedRequest {
    /// Validate raw parameters. Nothing here touches storage.
    pub fn parse(params: &FeedParams, default_limit: u32, max_limit: u32) -> Result<Self> {
        let since = parse_timestamp("since", params.since.as_deref())?;
        let until = parse_timestamp("until", params.until.as_deref())?;
        let cursor = Cursor::from_bounds(since, until)?;

        let tag = present(params.tag.as_deref());
        let author = present(params.author.as_deref());
        let day = present(params.day.as_deref());
        let filter = match (tag, author, day) {
            (None, None, None) => FeedFilter::Global,
            (Some(tag), None, None) => FeedFilter::ByTag(tag.to_string()),
            (None, Some(author), None) => FeedFilter::ByAuthor(author.to_string()),
            (None, None, Some(day)) => FeedFilter::ByDay(DayWindow::parse(day)?),
            _ => {
                return Err(FeedError::InvalidInput(
                    "tag, author and day are mutually exclusive".to_string(),
                ))
            }
        };

        let limit = match present(params.limit.as_deref()) {
            None => default_limit,
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) | Err(_) => {
                    return Err(FeedError::InvalidInput(
                        "limit must be a positive integer".to_string(),
                    ))
                }
                Ok(n) => n.min(max_limit),
            },
        };

        Ok(Self {
            filter,
            cursor,
            limit,
        })
    }
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_timestamp(name: &str, value: Option<&str>) -> Result<Option<i64>> {
    present(value)
        .map(|raw| {
            raw.parse::<i64>().map_err(|_| {
                FeedError::InvalidInput(format!("{name} must be a millisecond timestamp"))
            })
        })
        .transpose()
}

/// Build the index read for a partition, an optional inclusive range and a
/// cursor. Returns `None` when the cursor leaves nothing to read.
#[must_use]
pub fn build_index_query(
    partition: IndexPartition,
    range: Option<DayWindow>,
    cursor: Option<Cursor>,
    limit: u32,
) -> Option<IndexQuery> {
    let (start, end) = range.map_or((None, None), |w| (Some(w.start), Some(w.end)));
    let (start, end) = match cursor {
        Some(c) => c.narrow(start, end),
        None => (start, end),
    };
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return None;
        }
    }

    Some(IndexQuery {
        partition,
        start,
        end,
        direction: cursor.map_or(ScanDirection::Descending, Cursor::direction),
        limit,
    })
}

/// Serve one page of the feed, newest first.
pub async fn list_posts(db: &Database, request: &FeedRequest) -> Result<FeedPage> {
    let (partition, range) = match &request.filter {
        FeedFilter::Global => (IndexPartition::Feed, None),
        FeedFilter::ByTag(tag) => (IndexPartition::Tag(tag.clone()), None),
        FeedFilter::ByDay(window) => (IndexPartition::Feed, Some(*window)),
        FeedFilter::ByAuthor(username) => match db.find_user_by_username(username).await? {
            Some(user) => (IndexPartition::Author(user.user_id), None),
            None => {
                debug!(author = %username, "Unknown author, returning empty page");
                return Ok(FeedPage::default());
            }
        },
    };

    let Some(query) = build_index_query(partition, range, request.cursor, request.limit) else {
        return Ok(FeedPage::default());
    };

    let mut keys = db.query_index(&query).await?.keys;
    if query.direction == ScanDirection::Ascending {
        keys.reverse();
    }

    let items = hydrate(db, &keys).await?;
    debug!(
        filter = ?request.filter,
        keys = keys.len(),
        items = items.len(),
        "Served feed page"
    );
    Ok(FeedPage::from_items(items))
}
