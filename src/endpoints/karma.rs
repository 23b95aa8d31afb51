//! Karma ledger endpoints.
//!
//! Judgments address their item through exactly one of `voteId` or
//! `communicationId`; supplying both or neither is a caller error.

use anyhow::anyhow;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::karma::{self, VotableRef};
use crate::models::KarmaValue;
use crate::{auth::Caller, AppState, Db, Error, Result};

fn votable(vote_id: Option<String>, communication_id: Option<String>) -> Result<VotableRef> {
    match (vote_id, communication_id) {
        (Some(id), None) => Ok(VotableRef::Vote(id)),
        (None, Some(id)) => Ok(VotableRef::Comment(id)),
        _ => Err(Error::with_status(
            StatusCode::BAD_REQUEST,
            anyhow!("exactly one of voteId and communicationId must be set"),
        )),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JudgmentInput {
    vote_id: Option<String>,
    communication_id: Option<String>,
    value: KarmaValue,
}

#[derive(Debug, Serialize)]
struct JudgmentOutput {
    /// The caller's judgment after the operation, `null` when cleared.
    judgment: Option<KarmaValue>,
}

async fn submit_judgment(
    caller: Caller,
    State(db): State<Db>,
    Json(input): Json<JudgmentInput>,
) -> Result<Json<JudgmentOutput>> {
    let item = votable(input.vote_id, input.communication_id)?;
    let next = karma::submit(&db, caller.user(), &item, input.value).await?;
    Ok(Json(JudgmentOutput {
        judgment: next.value(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JudgmentQuery {
    vote_id: Option<String>,
    communication_id: Option<String>,
}

async fn get_judgment(
    caller: Caller,
    State(db): State<Db>,
    Query(query): Query<JudgmentQuery>,
) -> Result<Json<JudgmentOutput>> {
    let item = votable(query.vote_id, query.communication_id)?;
    let judgment = karma::get_user_judgment(&db, caller.user_id(), &item).await?;
    Ok(Json(JudgmentOutput {
        judgment: judgment.value(),
    }))
}

pub fn routes() -> Router<AppState> {
    // AP /api/karma
    // AG /api/karma
    Router::new().route("/karma", post(submit_judgment).get(get_judgment))
}
