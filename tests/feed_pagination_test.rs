//! Integration tests for feed routing, hydration and cursor pagination.

use std::collections::HashSet;

use cms_feed::db::{
    insert_user, Database, Post, StoreLimits, TagIndexEntry, User, WriteItem, GLOBAL_FEED,
};
use cms_feed::feed::{list_posts, plan_create, FeedPage, FeedParams, FeedRequest, PageInfo};
use tempfile::TempDir;

/// 2026-02-01T00:00:00Z
const FEB_1: i64 = 1_769_904_000_000;
const DAY: i64 = 86_400_000;

async fn setup_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");
    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");
    (db, temp_dir)
}

fn make_post(n: usize, created_at: i64, user_id: &str, tags: &[&str]) -> Post {
    Post {
        post_id: format!("post-{n:03}"),
        user_id: user_id.to_string(),
        username: user_id.trim_start_matches("u-").to_string(),
        title: format!("Post {n}"),
        content: "body".to_string(),
        tags: tags.iter().map(ToString::to_string).collect(),
        created_at,
        updated_at: created_at,
        comment_count: 0,
        post_avatar_id: None,
        feed_key: Some(GLOBAL_FEED.to_string()),
    }
}

async fn seed(db: &Database, posts: &[Post]) {
    for post in posts {
        db.transact_write(&plan_create(post))
            .await
            .expect("Failed to seed post");
    }
}

/// 25 posts ten milliseconds apart; alice writes the even ones, which carry
/// the "rust" tag.
async fn seed_corpus(db: &Database) -> Vec<Post> {
    for name in ["alice", "bob"] {
        insert_user(
            db.pool(),
            &User {
                user_id: format!("u-{name}"),
                username: name.to_string(),
                active_avatar_id: None,
            },
        )
        .await
        .unwrap();
    }
    let posts: Vec<Post> = (0..25)
        .map(|n| {
            let (user, tags): (&str, &[&str]) = if n % 2 == 0 {
                ("u-alice", &["rust", "all"])
            } else {
                ("u-bob", &["all"])
            };
            make_post(n, FEB_1 + n as i64 * 10, user, tags)
        })
        .collect();
    seed(db, &posts).await;
    posts
}

async fn fetch(db: &Database, params: FeedParams) -> FeedPage {
    let request = FeedRequest::parse(&params, 10, 100).expect("Invalid request");
    list_posts(db, &request).await.expect("Feed read failed")
}

fn ids(page: &FeedPage) -> Vec<String> {
    page.items.iter().map(|p| p.post_id.clone()).collect()
}

fn newest_first(posts: &[Post]) -> Vec<String> {
    let mut sorted = posts.to_vec();
    sorted.sort_by_key(|p| std::cmp::Reverse(p.created_at));
    sorted.into_iter().map(|p| p.post_id).collect()
}

#[tokio::test]
async fn test_first_page_is_newest_first() {
    let (db, _temp_dir) = setup_db().await;
    let posts = seed_corpus(&db).await;

    let page = fetch(&db, FeedParams::default()).await;

    assert_eq!(ids(&page), newest_first(&posts)[..10]);
    assert_eq!(page.page.prev_until, Some(page.items[0].created_at));
    assert_eq!(page.page.next_since, Some(page.items[9].created_at));
}

#[tokio::test]
async fn test_since_traversal_visits_every_post_once() {
    let (db, _temp_dir) = setup_db().await;
    let posts = seed_corpus(&db).await;

    let mut seen = Vec::new();
    let mut since: Option<i64> = None;
    loop {
        let page = fetch(
            &db,
            FeedParams {
                since: since.map(|t| t.to_string()),
                limit: Some("7".to_string()),
                ..FeedParams::default()
            },
        )
        .await;
        if page.items.is_empty() {
            assert_eq!(page.page, PageInfo::default());
            break;
        }
        seen.extend(ids(&page));
        since = page.page.next_since;
    }

    assert_eq!(seen, newest_first(&posts));
    assert_eq!(seen.iter().collect::<HashSet<_>>().len(), posts.len());
}

#[tokio::test]
async fn test_until_returns_previous_page_newest_first() {
    let (db, _temp_dir) = setup_db().await;
    seed_corpus(&db).await;

    let limit = || Some("7".to_string());
    let first = fetch(&db, FeedParams { limit: limit(), ..FeedParams::default() }).await;
    let second = fetch(
        &db,
        FeedParams {
            since: first.page.next_since.map(|t| t.to_string()),
            limit: limit(),
            ..FeedParams::default()
        },
    )
    .await;
    let back = fetch(
        &db,
        FeedParams {
            until: second.page.prev_until.map(|t| t.to_string()),
            limit: limit(),
            ..FeedParams::default()
        },
    )
    .await;

    assert_eq!(ids(&back), ids(&first));
    assert_eq!(back.page, first.page);
}

#[tokio::test]
async fn test_until_at_newest_post_is_empty() {
    let (db, _temp_dir) = setup_db().await;
    seed_corpus(&db).await;

    let first = fetch(&db, FeedParams::default()).await;
    let newer = fetch(
        &db,
        FeedParams {
            until: first.page.prev_until.map(|t| t.to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert!(newer.items.is_empty());
    assert_eq!(serde_json::to_value(&newer).unwrap(), serde_json::json!({ "items": [], "page": {} }));
}

#[tokio::test]
async fn test_tag_filter_reads_tag_index() {
    let (db, _temp_dir) = setup_db().await;
    let posts = seed_corpus(&db).await;
    let tagged: Vec<Post> = posts
        .iter()
        .filter(|p| p.tags.iter().any(|t| t == "rust"))
        .cloned()
        .collect();

    let page = fetch(
        &db,
        FeedParams {
            tag: Some("rust".to_string()),
            limit: Some("100".to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert_eq!(ids(&page), newest_first(&tagged));

    let none = fetch(
        &db,
        FeedParams {
            tag: Some("nobody-uses-this".to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert!(none.items.is_empty());
}

#[tokio::test]
async fn test_author_filter_resolves_username() {
    let (db, _temp_dir) = setup_db().await;
    let posts = seed_corpus(&db).await;
    let bobs: Vec<Post> = posts.iter().filter(|p| p.user_id == "u-bob").cloned().collect();

    let page = fetch(
        &db,
        FeedParams {
            author: Some("bob".to_string()),
            limit: Some("50".to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert_eq!(ids(&page), newest_first(&bobs));

    let unknown = fetch(
        &db,
        FeedParams {
            author: Some("mallory".to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert_eq!(unknown, FeedPage::default());
}

#[tokio::test]
async fn test_day_filter_bounds_and_cursor() {
    let (db, _temp_dir) = setup_db().await;
    let posts = vec![
        make_post(1, FEB_1 - 1, "u-alice", &[]),
        make_post(2, FEB_1, "u-alice", &[]),
        make_post(3, FEB_1 + DAY / 2, "u-alice", &[]),
        make_post(4, FEB_1 + DAY - 1, "u-alice", &[]),
        make_post(5, FEB_1 + DAY, "u-alice", &[]),
    ];
    seed(&db, &posts).await;

    let day = || Some("2026-02-01".to_string());
    let page = fetch(&db, FeedParams { day: day(), ..FeedParams::default() }).await;
    assert_eq!(ids(&page), ["post-004", "post-003", "post-002"]);

    // A cursor inside the day narrows it further.
    let page = fetch(
        &db,
        FeedParams {
            day: day(),
            since: Some((FEB_1 + DAY / 2).to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert_eq!(ids(&page), ["post-002"]);

    // A cursor past the day leaves the whole day.
    let page = fetch(
        &db,
        FeedParams {
            day: day(),
            since: Some((FEB_1 + 5 * DAY).to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert_eq!(ids(&page), ["post-004", "post-003", "post-002"]);

    // A cursor before the day start leaves nothing.
    let page = fetch(
        &db,
        FeedParams {
            day: day(),
            since: Some(FEB_1.to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert!(page.items.is_empty());
}

#[tokio::test]
async fn test_index_rows_for_missing_posts_are_dropped() {
    let (db, _temp_dir) = setup_db().await;
    let posts = vec![
        make_post(1, 100, "u-alice", &["t"]),
        make_post(2, 300, "u-alice", &["t"]),
    ];
    seed(&db, &posts).await;
    db.transact_write(&[WriteItem::PutTagEntry(TagIndexEntry {
        tag: "t".to_string(),
        created_at: 200,
        post_id: "ghost".to_string(),
    })])
    .await
    .unwrap();

    let page = fetch(
        &db,
        FeedParams {
            tag: Some("t".to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert_eq!(ids(&page), ["post-002", "post-001"]);
}

#[tokio::test]
async fn test_hydration_batches_under_multi_get_ceiling() {
    let (db, _temp_dir) = setup_db().await;
    let db = db.with_limits(StoreLimits {
        batch_get: 3,
        ..StoreLimits::default()
    });
    let posts = seed_corpus(&db).await;

    let page = fetch(
        &db,
        FeedParams {
            limit: Some("25".to_string()),
            ..FeedParams::default()
        },
    )
    .await;
    assert_eq!(ids(&page), newest_first(&posts));
}

#[tokio::test]
async fn test_posts_outside_feed_partition_are_not_listed() {
    let (db, _temp_dir) = setup_db().await;
    let mut legacy = make_post(1, 100, "u-alice", &[]);
    legacy.feed_key = None;
    seed(&db, &[legacy, make_post(2, 200, "u-alice", &[])]).await;

    let page = fetch(&db, FeedParams::default()).await;
    assert_eq!(ids(&page), ["post-002"]);
}
