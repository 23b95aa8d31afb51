//! Metric name constants.

use std::time::Duration;

use anyhow::Context;
use metrics::describe_counter;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config;

pub const AUTH_FAILED: &str = "verdict.auth.failed"; // Counter.

pub const VOTE_SUBMITTED: &str = "verdict.vote.submit"; // Counter.
pub const VOTE_UPDATED: &str = "verdict.vote.update"; // Counter.
pub const VOTE_DELETED: &str = "verdict.vote.delete"; // Counter.
pub const VOTE_MODERATED: &str = "verdict.vote.moderate"; // Counter.

pub const AGGREGATE_DELTAS: &str = "verdict.aggregate.deltas"; // Counter.
pub const AGGREGATE_RECOMPUTES: &str = "verdict.aggregate.recomputes"; // Counter.

pub const KARMA_GRANTED: &str = "verdict.karma.granted"; // Counter.
pub const KARMA_TOGGLED: &str = "verdict.karma.toggled"; // Counter.
pub const KARMA_SWITCHED: &str = "verdict.karma.switched"; // Counter.

pub const COMMENT_POSTED: &str = "verdict.comment.post"; // Counter.
pub const COMMENT_DELETED: &str = "verdict.comment.delete"; // Counter.
pub const COMMENT_MODERATED: &str = "verdict.comment.moderate"; // Counter.

/// Must be ran exactly once on startup. This will declare all of the instruments for `metrics`.
pub fn setup(config: &Option<config::MetricConfig>) -> anyhow::Result<()> {
    describe_counter!(AUTH_FAILED, "The number of failed authentication attempts.");

    describe_counter!(VOTE_SUBMITTED, "The count of newly submitted votes.");
    describe_counter!(VOTE_UPDATED, "The count of vote updates.");
    describe_counter!(VOTE_DELETED, "The count of deleted votes.");
    describe_counter!(VOTE_MODERATED, "Votes whose moderation status changed.");

    describe_counter!(
        AGGREGATE_DELTAS,
        "Aggregate delta applications against targets."
    );
    describe_counter!(
        AGGREGATE_RECOMPUTES,
        "Full aggregate recomputations of a target from its vote set."
    );

    describe_counter!(KARMA_GRANTED, "Karma judgments recorded on a blank slate.");
    describe_counter!(KARMA_TOGGLED, "Karma judgments removed by resubmission.");
    describe_counter!(
        KARMA_SWITCHED,
        "Karma judgments flipped to the opposite value."
    );

    describe_counter!(COMMENT_POSTED, "The count of posted comments.");
    describe_counter!(
        COMMENT_DELETED,
        "The count of deleted comments, subtree nodes included."
    );
    describe_counter!(
        COMMENT_MODERATED,
        "Comments whose moderation status changed."
    );

    if let Some(config) = config {
        match config {
            config::MetricConfig::PrometheusPush(prometheus_config) => {
                PrometheusBuilder::new()
                    .with_push_gateway(
                        prometheus_config.url.clone(),
                        Duration::from_secs(10),
                        None,
                        None,
                    )
                    .context("failed to set up push gateway")?
                    .install()
                    .context("failed to install metrics exporter")?;
            }
        }
    }

    Ok(())
}
