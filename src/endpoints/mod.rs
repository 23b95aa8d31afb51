use axum::Router;

use crate::AppState;

mod comments;
mod karma;
mod targets;
mod votes;

pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(targets::routes())
        .merge(votes::routes())
        .merge(karma::routes())
        .merge(comments::routes())
}
