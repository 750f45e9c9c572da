//! The feed subsystem: index maintenance on writes, query routing,
//! hydration and pagination cursors on reads.

mod clock;
mod cursor;
mod hydrate;
mod indexer;
mod query;

pub use clock::MonotonicClock;
pub use cursor::{Cursor, FeedPage, PageInfo};
pub use hydrate::{hydrate, restore_order};
pub use indexer::{
    diff_tags, normalize_tags, plan_create, plan_delete, plan_update, DeleteOutcome, NewPost,
    PostEdit, PostWriter, TagDiff,
};
pub use query::{build_index_query, list_posts, DayWindow, FeedFilter, FeedParams, FeedRequest};
