use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Deserializer};

use super::AppState;
use crate::auth::Subject;
use crate::db::Post;
use crate::error::{FeedError, Result};
use crate::feed::{list_posts, DeleteOutcome, FeedPage, FeedParams, FeedRequest, NewPost, PostEdit};

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list).post(create))
        .route("/posts/:id", get(show).put(update).delete(remove))
        .route("/healthz", get(health))
}

// ========== Reads ==========

async fn list(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Json<FeedPage>> {
    let request = FeedRequest::parse(
        &params,
        state.config.default_page_size,
        state.config.max_page_size,
    )?;
    Ok(Json(list_posts(&state.db, &request).await?))
}

async fn show(State(state): State<AppState>, Path(post_id): Path<String>) -> Result<Json<Post>> {
    state
        .db
        .get_post(&post_id)
        .await?
        .map(Json)
        .ok_or_else(|| FeedError::NotFound("Post".to_string()))
}

async fn health() -> &'static str {
    "OK"
}

// ========== Writes ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePostBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    post_avatar_id: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    subject: Subject,
    Json(body): Json<CreatePostBody>,
) -> Result<(StatusCode, Json<Post>)> {
    let post = state
        .writer
        .create(
            &subject,
            NewPost {
                title: body.title,
                content: body.content,
                tags: body.tags,
                post_avatar_id: body.post_avatar_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(post)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePostBody {
    title: Option<String>,
    content: Option<String>,
    tags: Option<Vec<String>>,
    /// Absent leaves the avatar alone; `null` or `""` removes it.
    #[serde(default, deserialize_with = "present_or_null")]
    post_avatar_id: Option<Option<String>>,
}

/// Distinguish a field sent as `null` from one not sent at all.
fn present_or_null<'de, D>(deserializer: D) -> std::result::Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

async fn update(
    State(state): State<AppState>,
    subject: Subject,
    Path(post_id): Path<String>,
    Json(body): Json<UpdatePostBody>,
) -> Result<Json<Post>> {
    let post = state
        .writer
        .update(
            &subject,
            &post_id,
            PostEdit {
                title: body.title,
                content: body.content,
                tags: body.tags,
                post_avatar_id: body.post_avatar_id,
            },
        )
        .await?;
    Ok(Json(post))
}

async fn remove(
    State(state): State<AppState>,
    subject: Subject,
    Path(post_id): Path<String>,
) -> Result<Json<DeleteOutcome>> {
    Ok(Json(state.writer.delete(&subject, &post_id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_body_avatar_states() {
        let absent: UpdatePostBody = serde_json::from_str(r#"{"title":"x"}"#).unwrap();
        assert_eq!(absent.post_avatar_id, None);

        let null: UpdatePostBody = serde_json::from_str(r#"{"postAvatarId":null}"#).unwrap();
        assert_eq!(null.post_avatar_id, Some(None));

        let set: UpdatePostBody = serde_json::from_str(r#"{"postAvatarId":"av1"}"#).unwrap();
        assert_eq!(set.post_avatar_id, Some(Some("av1".to_string())));
    }
}
