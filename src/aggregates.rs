//! Aggregate maintenance for targets.
//!
//! Every denormalized field on a target is owned by this module. Targets
//! carry running sums and counts segmented by voter class; vote mutations
//! compute a delta between the old and new row and apply it inside the
//! caller's transaction, then the derived means are refreshed from the
//! accumulators and the daily history row is upserted. `recompute` rebuilds
//! the accumulators from the approved vote set and exists to reconcile
//! drift; it converges to the same state as any interleaving of deltas.

use anyhow::{Context as _, Result};
use chrono::{NaiveDate, Utc};
use metrics::counter;
use sqlx::{Row as _, SqliteConnection};

use crate::db::Db;
use crate::error::EngineError;
use crate::metrics::{AGGREGATE_DELTAS, AGGREGATE_RECOMPUTES};
use crate::models::{ModerationStatus, Target, UserClass, Vote, VoteHistoryEntry};

/// The facts of one vote as aggregation sees it.
#[derive(Debug, Clone, Copy)]
pub struct VoteFacts {
    pub accomplishments: i64,
    pub offenses: i64,
    pub total: i64,
    pub voter_class: UserClass,
}

impl VoteFacts {
    /// Extract the aggregation-relevant facts of a vote row. `None` unless
    /// approved; other statuses are invisible to aggregates.
    pub fn of_vote(vote: &Vote) -> Option<Self> {
        (vote.moderation_status == ModerationStatus::Approved).then_some(Self {
            accomplishments: vote.accomplishments,
            offenses: vote.offenses,
            total: vote.total,
            voter_class: vote.voter_class,
        })
    }
}

/// Signed adjustments to a target's accumulator columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateDelta {
    sum_accomplishments: i64,
    sum_offenses: i64,
    sum_total: i64,
    master_sum_accomplishments: i64,
    master_sum_offenses: i64,
    master_sum_total: i64,
    auth_sum_accomplishments: i64,
    auth_sum_offenses: i64,
    auth_sum_total: i64,
    total_votes: i64,
    anonymous_votes: i64,
    registered_votes: i64,
    authenticated_votes: i64,
}

impl AggregateDelta {
    /// The delta that moves accumulators from a state including `old` to a
    /// state including `new` instead. Either side may be absent: submission
    /// has no old row, deletion has no new one, and a vote hidden by
    /// moderation contributes nothing at all.
    pub fn between(old: Option<&VoteFacts>, new: Option<&VoteFacts>) -> Self {
        let mut delta = Self::default();
        if let Some(facts) = old {
            delta.accumulate(facts, -1);
        }
        if let Some(facts) = new {
            delta.accumulate(facts, 1);
        }
        delta
    }

    fn accumulate(&mut self, facts: &VoteFacts, sign: i64) {
        self.sum_accomplishments += sign * facts.accomplishments;
        self.sum_offenses += sign * facts.offenses;
        self.sum_total += sign * facts.total;
        self.total_votes += sign;
        match facts.voter_class {
            UserClass::Anonymous => self.anonymous_votes += sign,
            UserClass::Registered => {
                self.registered_votes += sign;
                self.accumulate_master(facts, sign);
            }
            UserClass::Authenticated => {
                self.authenticated_votes += sign;
                self.accumulate_master(facts, sign);
                self.accumulate_auth(facts, sign);
            }
        }
    }

    fn accumulate_master(&mut self, facts: &VoteFacts, sign: i64) {
        self.master_sum_accomplishments += sign * facts.accomplishments;
        self.master_sum_offenses += sign * facts.offenses;
        self.master_sum_total += sign * facts.total;
    }

    fn accumulate_auth(&mut self, facts: &VoteFacts, sign: i64) {
        self.auth_sum_accomplishments += sign * facts.accomplishments;
        self.auth_sum_offenses += sign * facts.offenses;
        self.auth_sum_total += sign * facts.total;
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply `delta` to a target's accumulators, refresh the derived means and
/// upsert today's history snapshot. Must run inside the transaction that
/// mutates the vote row, so readers never see the two out of step.
pub async fn apply(
    conn: &mut SqliteConnection,
    target_id: &str,
    delta: &AggregateDelta,
) -> Result<()> {
    if delta.is_zero() {
        return Ok(());
    }

    let result = sqlx::query(
        "UPDATE targets SET \
            sum_accomplishments = sum_accomplishments + ?, \
            sum_offenses = sum_offenses + ?, \
            sum_total = sum_total + ?, \
            master_sum_accomplishments = master_sum_accomplishments + ?, \
            master_sum_offenses = master_sum_offenses + ?, \
            master_sum_total = master_sum_total + ?, \
            auth_sum_accomplishments = auth_sum_accomplishments + ?, \
            auth_sum_offenses = auth_sum_offenses + ?, \
            auth_sum_total = auth_sum_total + ?, \
            total_votes = total_votes + ?, \
            anonymous_votes = anonymous_votes + ?, \
            registered_votes = registered_votes + ?, \
            authenticated_votes = authenticated_votes + ? \
         WHERE id = ?",
    )
    .bind(delta.sum_accomplishments)
    .bind(delta.sum_offenses)
    .bind(delta.sum_total)
    .bind(delta.master_sum_accomplishments)
    .bind(delta.master_sum_offenses)
    .bind(delta.master_sum_total)
    .bind(delta.auth_sum_accomplishments)
    .bind(delta.auth_sum_offenses)
    .bind(delta.auth_sum_total)
    .bind(delta.total_votes)
    .bind(delta.anonymous_votes)
    .bind(delta.registered_votes)
    .bind(delta.authenticated_votes)
    .bind(target_id)
    .execute(&mut *conn)
    .await
    .context("failed to apply aggregate delta")?;
    anyhow::ensure!(
        result.rows_affected() == 1,
        "target {target_id} missing during delta application"
    );

    refresh_derived(&mut *conn, target_id).await?;
    snapshot(&mut *conn, target_id, Utc::now().date_naive()).await?;
    counter!(AGGREGATE_DELTAS).increment(1);
    Ok(())
}

/// Recompute the derived means from the accumulator columns. Empty-segment
/// policy: the all-voter means fall back to zero, the master and
/// authenticated means go absent.
async fn refresh_derived(conn: &mut SqliteConnection, target_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE targets SET \
            avg_accomplishments = CASE WHEN total_votes = 0 THEN 0.0 \
                ELSE CAST(sum_accomplishments AS REAL) / total_votes END, \
            avg_offenses = CASE WHEN total_votes = 0 THEN 0.0 \
                ELSE CAST(sum_offenses AS REAL) / total_votes END, \
            avg_total = CASE WHEN total_votes = 0 THEN 0.0 \
                ELSE CAST(sum_total AS REAL) / total_votes END, \
            master_accomplishments = CASE WHEN registered_votes + authenticated_votes = 0 THEN NULL \
                ELSE CAST(master_sum_accomplishments AS REAL) / (registered_votes + authenticated_votes) END, \
            master_offenses = CASE WHEN registered_votes + authenticated_votes = 0 THEN NULL \
                ELSE CAST(master_sum_offenses AS REAL) / (registered_votes + authenticated_votes) END, \
            master_total = CASE WHEN registered_votes + authenticated_votes = 0 THEN NULL \
                ELSE CAST(master_sum_total AS REAL) / (registered_votes + authenticated_votes) END, \
            auth_accomplishments = CASE WHEN authenticated_votes = 0 THEN NULL \
                ELSE CAST(auth_sum_accomplishments AS REAL) / authenticated_votes END, \
            auth_offenses = CASE WHEN authenticated_votes = 0 THEN NULL \
                ELSE CAST(auth_sum_offenses AS REAL) / authenticated_votes END, \
            auth_total = CASE WHEN authenticated_votes = 0 THEN NULL \
                ELSE CAST(auth_sum_total AS REAL) / authenticated_votes END \
         WHERE id = ?",
    )
    .bind(target_id)
    .execute(conn)
    .await
    .context("failed to refresh derived aggregates")?;
    Ok(())
}

/// Rebuild a target's accumulators from its approved votes, then refresh
/// the derived means and today's snapshot. Idempotent and insensitive to
/// the order votes were applied in, so it can replay after any failure.
pub async fn recompute(conn: &mut SqliteConnection, target_id: &str) -> Result<()> {
    let row = sqlx::query(
        "SELECT \
            COALESCE(SUM(accomplishments), 0) AS sum_accomplishments, \
            COALESCE(SUM(offenses), 0) AS sum_offenses, \
            COALESCE(SUM(total), 0) AS sum_total, \
            COALESCE(SUM(CASE WHEN voter_class <> 'anonymous' THEN accomplishments END), 0) AS master_sum_accomplishments, \
            COALESCE(SUM(CASE WHEN voter_class <> 'anonymous' THEN offenses END), 0) AS master_sum_offenses, \
            COALESCE(SUM(CASE WHEN voter_class <> 'anonymous' THEN total END), 0) AS master_sum_total, \
            COALESCE(SUM(CASE WHEN voter_class = 'authenticated' THEN accomplishments END), 0) AS auth_sum_accomplishments, \
            COALESCE(SUM(CASE WHEN voter_class = 'authenticated' THEN offenses END), 0) AS auth_sum_offenses, \
            COALESCE(SUM(CASE WHEN voter_class = 'authenticated' THEN total END), 0) AS auth_sum_total, \
            COUNT(*) AS total_votes, \
            COALESCE(SUM(CASE WHEN voter_class = 'anonymous' THEN 1 END), 0) AS anonymous_votes, \
            COALESCE(SUM(CASE WHEN voter_class = 'registered' THEN 1 END), 0) AS registered_votes, \
            COALESCE(SUM(CASE WHEN voter_class = 'authenticated' THEN 1 END), 0) AS authenticated_votes \
         FROM votes WHERE target_id = ? AND moderation_status = 'approved'",
    )
    .bind(target_id)
    .fetch_one(&mut *conn)
    .await
    .context("failed to scan votes for recompute")?;

    let result = sqlx::query(
        "UPDATE targets SET \
            sum_accomplishments = ?, sum_offenses = ?, sum_total = ?, \
            master_sum_accomplishments = ?, master_sum_offenses = ?, master_sum_total = ?, \
            auth_sum_accomplishments = ?, auth_sum_offenses = ?, auth_sum_total = ?, \
            total_votes = ?, anonymous_votes = ?, registered_votes = ?, authenticated_votes = ? \
         WHERE id = ?",
    )
    .bind(row.get::<i64, _>("sum_accomplishments"))
    .bind(row.get::<i64, _>("sum_offenses"))
    .bind(row.get::<i64, _>("sum_total"))
    .bind(row.get::<i64, _>("master_sum_accomplishments"))
    .bind(row.get::<i64, _>("master_sum_offenses"))
    .bind(row.get::<i64, _>("master_sum_total"))
    .bind(row.get::<i64, _>("auth_sum_accomplishments"))
    .bind(row.get::<i64, _>("auth_sum_offenses"))
    .bind(row.get::<i64, _>("auth_sum_total"))
    .bind(row.get::<i64, _>("total_votes"))
    .bind(row.get::<i64, _>("anonymous_votes"))
    .bind(row.get::<i64, _>("registered_votes"))
    .bind(row.get::<i64, _>("authenticated_votes"))
    .bind(target_id)
    .execute(&mut *conn)
    .await
    .context("failed to store recomputed accumulators")?;
    if result.rows_affected() == 0 {
        tracing::warn!("recompute requested for missing target {target_id}");
        return Ok(());
    }

    refresh_derived(&mut *conn, target_id).await?;
    snapshot(&mut *conn, target_id, Utc::now().date_naive()).await?;
    counter!(AGGREGATE_RECOMPUTES).increment(1);
    Ok(())
}

/// Upsert the history row for `day` from the target's current aggregate
/// fields. Later writes on the same day overwrite in place, so the series
/// holds one closing row per day.
pub async fn snapshot(conn: &mut SqliteConnection, target_id: &str, day: NaiveDate) -> Result<()> {
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO vote_history (target_id, day, \
            avg_accomplishments, avg_offenses, avg_total, \
            master_accomplishments, master_offenses, master_total, \
            auth_accomplishments, auth_offenses, auth_total, \
            total_votes, anonymous_votes, registered_votes, authenticated_votes, recorded_at) \
         SELECT id, ?, \
            avg_accomplishments, avg_offenses, avg_total, \
            master_accomplishments, master_offenses, master_total, \
            auth_accomplishments, auth_offenses, auth_total, \
            total_votes, anonymous_votes, registered_votes, authenticated_votes, ? \
         FROM targets WHERE id = ? \
         ON CONFLICT (target_id, day) DO UPDATE SET \
            avg_accomplishments = excluded.avg_accomplishments, \
            avg_offenses = excluded.avg_offenses, \
            avg_total = excluded.avg_total, \
            master_accomplishments = excluded.master_accomplishments, \
            master_offenses = excluded.master_offenses, \
            master_total = excluded.master_total, \
            auth_accomplishments = excluded.auth_accomplishments, \
            auth_offenses = excluded.auth_offenses, \
            auth_total = excluded.auth_total, \
            total_votes = excluded.total_votes, \
            anonymous_votes = excluded.anonymous_votes, \
            registered_votes = excluded.registered_votes, \
            authenticated_votes = excluded.authenticated_votes, \
            recorded_at = excluded.recorded_at",
    )
    .bind(day.to_string())
    .bind(now)
    .bind(target_id)
    .execute(conn)
    .await
    .context("failed to upsert history snapshot")?;
    Ok(())
}

/// Fetch a target with its aggregate fields.
pub async fn get_target(db: &Db, target_id: &str) -> Result<Target, EngineError> {
    sqlx::query_as::<_, Target>("SELECT * FROM targets WHERE id = ?")
        .bind(target_id)
        .fetch_optional(db)
        .await
        .context("failed to fetch target")?
        .ok_or(EngineError::NotFound)
}

/// The history series for a target, oldest day first. Bounds are
/// inclusive; ISO dates order correctly as text.
pub async fn history(
    db: &Db,
    target_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> Result<Vec<VoteHistoryEntry>, EngineError> {
    let mut query = sqlx::QueryBuilder::new("SELECT * FROM vote_history WHERE target_id = ");
    query.push_bind(target_id);
    if let Some(from) = from {
        query.push(" AND day >= ").push_bind(from.to_string());
    }
    if let Some(to) = to {
        query.push(" AND day <= ").push_bind(to.to_string());
    }
    query.push(" ORDER BY day ASC");

    let rows = query
        .build_query_as::<VoteHistoryEntry>()
        .fetch_all(db)
        .await
        .context("failed to fetch target history")?;
    Ok(rows)
}
