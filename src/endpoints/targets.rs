//! Target aggregate endpoints.

use anyhow::anyhow;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::models::{Target, VoteHistoryEntry};
use crate::{aggregates, auth::Caller, AppState, Db, EngineError, Error, Result};

async fn get_target(State(db): State<Db>, Path(target_id): Path<String>) -> Result<Json<Target>> {
    let target = aggregates::get_target(&db, &target_id).await?;
    Ok(Json(target))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    from: Option<String>,
    to: Option<String>,
}

fn parse_day(value: Option<String>, name: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d"))
        .transpose()
        .map_err(|_| {
            Error::with_status(
                StatusCode::BAD_REQUEST,
                anyhow!("{name} must be an ISO date (YYYY-MM-DD)"),
            )
        })
}

async fn target_history(
    State(db): State<Db>,
    Path(target_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<VoteHistoryEntry>>> {
    // 404 for unknown targets instead of an empty series.
    aggregates::get_target(&db, &target_id).await?;

    let from = parse_day(query.from, "from")?;
    let to = parse_day(query.to, "to")?;
    let entries = aggregates::history(&db, &target_id, from, to).await?;
    Ok(Json(entries))
}

/// Reconciliation entry point. Replays the aggregate state of one target
/// from its vote set; safe to call at any time.
async fn recompute_target(
    caller: Caller,
    State(db): State<Db>,
    Path(target_id): Path<String>,
) -> Result<StatusCode> {
    if !caller.is_privileged() {
        return Err(EngineError::Forbidden.into());
    }
    aggregates::get_target(&db, &target_id).await?;

    let mut tx = db
        .begin()
        .await
        .map_err(|err| Error::from(anyhow::Error::new(err)))?;
    aggregates::recompute(&mut tx, &target_id).await?;
    tx.commit()
        .await
        .map_err(|err| Error::from(anyhow::Error::new(err)))?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn routes() -> Router<AppState> {
    // UG /api/targets/{target_id}
    // UG /api/targets/{target_id}/history
    // AP /api/targets/{target_id}/recompute
    Router::new()
        .route("/targets/{target_id}", get(get_target))
        .route("/targets/{target_id}/history", get(target_history))
        .route("/targets/{target_id}/recompute", post(recompute_target))
}
