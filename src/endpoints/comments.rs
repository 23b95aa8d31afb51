//! Threaded comment endpoints.

use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::comments::{self, Anchor, CommentNode, ListComments, PostComment};
use crate::models::{Comment, ModerationStatus};
use crate::{auth::Caller, AppState, Db, Error, Result};

fn anchor(vote_id: Option<String>, target_id: Option<String>) -> Result<Anchor> {
    match (vote_id, target_id) {
        (Some(id), None) => Ok(Anchor::Vote(id)),
        (None, Some(id)) => Ok(Anchor::Target(id)),
        _ => Err(Error::with_status(
            StatusCode::BAD_REQUEST,
            anyhow!("exactly one of voteId and targetId must be set"),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostCommentInput {
    content: String,
    vote_id: Option<String>,
    target_id: Option<String>,
    parent_id: Option<String>,
}

async fn post_comment(
    caller: Caller,
    State(db): State<Db>,
    Json(input): Json<PostCommentInput>,
) -> Result<Json<Comment>> {
    let anchor = anchor(input.vote_id, input.target_id)?;
    let comment = comments::post(
        &db,
        caller.user(),
        PostComment {
            anchor,
            parent_id: input.parent_id,
            content: input.content,
        },
    )
    .await?;
    Ok(Json(comment))
}

#[derive(Debug, Deserialize)]
struct EditCommentInput {
    content: String,
}

async fn edit_comment(
    caller: Caller,
    State(db): State<Db>,
    Path(comment_id): Path<String>,
    Json(input): Json<EditCommentInput>,
) -> Result<Json<Comment>> {
    let comment = comments::edit(&db, &comment_id, caller.user(), input.content).await?;
    Ok(Json(comment))
}

async fn delete_comment(
    caller: Caller,
    State(db): State<Db>,
    Path(comment_id): Path<String>,
) -> Result<StatusCode> {
    comments::delete(&db, &comment_id, caller.user(), caller.is_privileged()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListCommentsQuery {
    vote_id: Option<String>,
    target_id: Option<String>,
    parent_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    include_replies: Option<bool>,
    max_depth: Option<i64>,
}

async fn list_comments(
    State(db): State<Db>,
    Query(query): Query<ListCommentsQuery>,
) -> Result<Json<Vec<CommentNode>>> {
    let anchor = anchor(query.vote_id, query.target_id)?;
    let nodes = comments::list(
        &db,
        ListComments {
            anchor,
            parent_id: query.parent_id,
            limit: query.limit.unwrap_or(50),
            offset: query.offset.unwrap_or(0),
            include_replies: query.include_replies.unwrap_or(false),
            max_depth: query.max_depth.unwrap_or(3),
        },
    )
    .await?;
    Ok(Json(nodes))
}

#[derive(Debug, Deserialize)]
struct ModerationInput {
    status: ModerationStatus,
}

async fn set_comment_moderation(
    caller: Caller,
    State(db): State<Db>,
    Path(comment_id): Path<String>,
    Json(input): Json<ModerationInput>,
) -> Result<Json<Comment>> {
    let comment =
        comments::set_moderation_status(&db, &comment_id, input.status, caller.is_privileged())
            .await?;
    Ok(Json(comment))
}

pub fn routes() -> Router<AppState> {
    // AP /api/comments
    // UG /api/comments
    // AP /api/comments/{comment_id} (PATCH, DELETE)
    // AP /api/comments/{comment_id}/moderation
    Router::new()
        .route("/comments", post(post_comment).get(list_comments))
        .route(
            "/comments/{comment_id}",
            axum::routing::patch(edit_comment).delete(delete_comment),
        )
        .route(
            "/comments/{comment_id}/moderation",
            post(set_comment_moderation),
        )
}
