use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use sea_orm::{EntityTrait, QueryOrder, QuerySelect};
use serde::Deserialize;

use crate::auth::{AuthUser, MaybeUser};
use crate::entities::post;
use crate::ledger::{VoteOutcome, parse_direction};
use crate::models::post::PostView;
use crate::models::vote::{VoteCastResponse, VoteRequest};
use crate::state::AppState;

use super::HttpError;

const DEFAULT_POST_LIMIT: u64 = 10;
const MAX_POST_LIMIT: u64 = 50;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", get(list_posts))
        .route("/posts/{post_id}", get(get_post))
        .route("/posts/{post_id}/vote", get(get_vote_state).post(cast_vote))
}

#[derive(Debug, Deserialize, Default)]
struct ListPostsQuery {
    limit: Option<u64>,
}

async fn list_posts(
    Query(query): Query<ListPostsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<PostView>>, HttpError> {
    let requested_limit = query.limit.unwrap_or(DEFAULT_POST_LIMIT);
    if requested_limit == 0 {
        return Err(HttpError::new(
            StatusCode::BAD_REQUEST,
            "limit must be positive".to_string(),
        ));
    }
    let limit = requested_limit.min(MAX_POST_LIMIT);

    let posts = post::Entity::find()
        .order_by_desc(post::Column::CreatedAt)
        .order_by_desc(post::Column::Id)
        .limit(limit)
        .all(&state.database)
        .await
        .map_err(|err| HttpError::internal("Failed to list posts", err))?;

    assert!(
        posts.len() <= limit as usize,
        "Returned more posts than requested"
    );

    Ok(Json(posts.into_iter().map(PostView::from).collect()))
}

async fn get_post(
    Path(post_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PostView>, HttpError> {
    let post = post::Entity::find_by_id(post_id)
        .one(&state.database)
        .await
        .map_err(|err| HttpError::internal("Failed to load post", err))?
        .ok_or_else(|| HttpError::new(StatusCode::NOT_FOUND, "Post not found".to_string()))?;

    Ok(Json(PostView::from(post)))
}

async fn get_vote_state(
    Path(post_id): Path<String>,
    MaybeUser(user_id): MaybeUser,
    State(state): State<AppState>,
) -> Result<Json<VoteOutcome>, HttpError> {
    let outcome = state
        .ledger
        .vote_state(&post_id, user_id.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn cast_vote(
    Path(post_id): Path<String>,
    AuthUser(user_id): AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<VoteRequest>, JsonRejection>,
) -> Result<Json<VoteCastResponse>, HttpError> {
    let Json(request) = payload.map_err(|rejection| {
        HttpError::new(
            StatusCode::BAD_REQUEST,
            format!("Invalid request body: {}", rejection.body_text()),
        )
    })?;
    let direction = parse_direction(&request.vote_type)?;

    let outcome = state.ledger.cast_vote(&post_id, &user_id, direction).await?;
    Ok(Json(VoteCastResponse::from(outcome)))
}
