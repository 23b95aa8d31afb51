//! Vote ledger endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::models::{ModerationStatus, Vote};
use crate::votes::{self, Page, SubmitVote, UpdateVote};
use crate::{auth::Caller, AppState, Db, Result};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitVoteInput {
    accomplishments: i64,
    offenses: i64,
    explanation: Option<String>,
}

async fn submit_vote(
    caller: Caller,
    State(db): State<Db>,
    Path(target_id): Path<String>,
    Json(input): Json<SubmitVoteInput>,
) -> Result<Json<Vote>> {
    let vote = votes::submit(
        &db,
        caller.user(),
        SubmitVote {
            target_id,
            accomplishments: input.accomplishments,
            offenses: input.offenses,
            explanation: input.explanation,
        },
    )
    .await?;
    Ok(Json(vote))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateVoteInput {
    accomplishments: Option<i64>,
    offenses: Option<i64>,
    explanation: Option<String>,
}

async fn update_vote(
    caller: Caller,
    State(db): State<Db>,
    Path(vote_id): Path<String>,
    Json(input): Json<UpdateVoteInput>,
) -> Result<Json<Vote>> {
    let vote = votes::update(
        &db,
        &vote_id,
        caller.user(),
        UpdateVote {
            accomplishments: input.accomplishments,
            offenses: input.offenses,
            explanation: input.explanation,
        },
    )
    .await?;
    Ok(Json(vote))
}

async fn delete_vote(
    caller: Caller,
    State(db): State<Db>,
    Path(vote_id): Path<String>,
) -> Result<StatusCode> {
    votes::delete(&db, &vote_id, caller.user(), caller.is_privileged()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_vote(State(db): State<Db>, Path(vote_id): Path<String>) -> Result<Json<Vote>> {
    let vote = votes::get(&db, &vote_id).await?;
    Ok(Json(vote))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl PageQuery {
    fn page(&self) -> Page {
        let default = Page::default();
        Page {
            limit: self.limit.unwrap_or(default.limit),
            offset: self.offset.unwrap_or(default.offset),
        }
    }
}

async fn list_target_votes(
    State(db): State<Db>,
    Path(target_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Vote>>> {
    let votes = votes::list_by_target(&db, &target_id, query.page()).await?;
    Ok(Json(votes))
}

async fn list_user_votes(
    State(db): State<Db>,
    Path(user_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Vec<Vote>>> {
    let votes = votes::list_by_user(&db, &user_id, query.page()).await?;
    Ok(Json(votes))
}

#[derive(Debug, Deserialize)]
struct ModerationInput {
    status: ModerationStatus,
}

async fn set_vote_moderation(
    caller: Caller,
    State(db): State<Db>,
    Path(vote_id): Path<String>,
    Json(input): Json<ModerationInput>,
) -> Result<Json<Vote>> {
    let vote =
        votes::set_moderation_status(&db, &vote_id, input.status, caller.is_privileged()).await?;
    Ok(Json(vote))
}

pub fn routes() -> Router<AppState> {
    // AP /api/targets/{target_id}/votes
    // UG /api/targets/{target_id}/votes
    // UG /api/votes/{vote_id}
    // AP /api/votes/{vote_id} (PATCH, DELETE)
    // AP /api/votes/{vote_id}/moderation
    // UG /api/users/{user_id}/votes
    Router::new()
        .route(
            "/targets/{target_id}/votes",
            post(submit_vote).get(list_target_votes),
        )
        .route(
            "/votes/{vote_id}",
            get(get_vote).patch(update_vote).delete(delete_vote),
        )
        .route("/votes/{vote_id}/moderation", post(set_vote_moderation))
        .route("/users/{user_id}/votes", get(list_user_votes))
}
