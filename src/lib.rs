//! Aggregate-consistency engine for community-scored targets.
//!
//! Three coupled subsystems over one SQLite database: a vote ledger whose
//! mutations apply incremental deltas to per-target aggregates, a karma
//! ledger of idempotent plus/minus-one judgments, and depth-bounded
//! threaded comments. Every mutation keeps its denormalized counters in
//! the same transaction as the source-of-truth row.
mod aggregates;
mod auth;
mod comments;
mod config;
mod db;
mod endpoints;
pub mod error;
mod karma;
mod metrics;
mod models;
mod serve;
mod tier;
mod votes;


pub use config::AppConfig;
pub use db::Db;
pub use error::{EngineError, Error};
pub use serve::{run, AppState, Result};

/// The index (/) route.
async fn index() -> impl axum::response::IntoResponse {
    r"
                 _ _    _
 __ _____ _ _ __| (_)__| |_
 \ V / -_) '_/ _` | / _|  _|
  \_/\___|_| \__,_|_\__|\__|

This is a verdict engine: votes, aggregates, karma and threads.

API routes are under /api/
    "
}
