//! The vote ledger.
//!
//! One row per (user, target) pair, enforced by precheck and unique
//! constraint both. Every mutation runs in a single transaction together
//! with the aggregate delta it implies, so the ledger and the target
//! aggregates cannot drift apart through this path.

use std::ops::RangeInclusive;

use anyhow::Context as _;
use chrono::Utc;
use metrics::counter;
use uuid::Uuid;

use crate::aggregates::{self, AggregateDelta, VoteFacts};
use crate::comments;
use crate::db::{self, Db};
use crate::error::EngineError;
use crate::metrics::{VOTE_DELETED, VOTE_MODERATED, VOTE_SUBMITTED, VOTE_UPDATED};
use crate::models::{ModerationStatus, User, Vote};
use crate::tier;

const SCORE_RANGE: RangeInclusive<i64> = 0..=10;

/// A new score submission.
#[derive(Debug, Clone)]
pub struct SubmitVote {
    pub target_id: String,
    pub accomplishments: i64,
    pub offenses: i64,
    pub explanation: Option<String>,
}

/// Partial changes to an existing vote. Absent fields keep their value;
/// the stored total is recomputed from the merged scores regardless.
#[derive(Debug, Clone, Default)]
pub struct UpdateVote {
    pub accomplishments: Option<i64>,
    pub offenses: Option<i64>,
    pub explanation: Option<String>,
}

/// Listing window. Out-of-range values are clamped, not rejected.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

impl Page {
    fn clamped(self) -> Self {
        Self {
            limit: self.limit.clamp(1, 100),
            offset: self.offset.max(0),
        }
    }
}

fn check_score(value: i64) -> Result<(), EngineError> {
    if SCORE_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidScore(value))
    }
}

/// Explanations are gated by the submitter's tier at the time of the call,
/// so a lapsed plan bites on the next edit.
fn check_explanation(user: &User, explanation: Option<&str>) -> Result<(), EngineError> {
    let Some(text) = explanation else {
        return Ok(());
    };
    let tier = tier::effective_tier(user.user_class, user.paid_plan);
    if let Some(limit) = tier::explanation_limit(tier) {
        if text.chars().count() > limit {
            return Err(EngineError::ExplanationTooLong { limit });
        }
    }
    Ok(())
}

/// Record a new vote. New votes are approved immediately and counted into
/// the target's aggregates in the same transaction.
pub async fn submit(db: &Db, user: &User, input: SubmitVote) -> Result<Vote, EngineError> {
    check_score(input.accomplishments)?;
    check_score(input.offenses)?;
    check_explanation(user, input.explanation.as_deref())?;

    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let target_exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM targets WHERE id = ?")
        .bind(&input.target_id)
        .fetch_one(&mut *tx)
        .await
        .context("failed to check target")?;
    if target_exists == 0 {
        return Err(EngineError::NotFound);
    }

    let already_voted =
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM votes WHERE user_id = ? AND target_id = ?")
            .bind(&user.id)
            .bind(&input.target_id)
            .fetch_one(&mut *tx)
            .await
            .context("failed to check for an existing vote")?;
    if already_voted > 0 {
        return Err(EngineError::DuplicateVote);
    }

    let now = Utc::now().to_rfc3339();
    let vote = Vote {
        id: Uuid::new_v4().to_string(),
        user_id: user.id.clone(),
        target_id: input.target_id,
        accomplishments: input.accomplishments,
        offenses: input.offenses,
        total: input.accomplishments - input.offenses,
        explanation: input.explanation,
        voter_class: user.user_class,
        moderation_status: ModerationStatus::Approved,
        thumbs_up: 0,
        thumbs_down: 0,
        created_at: now.clone(),
        updated_at: now,
    };

    let inserted = sqlx::query(
        "INSERT INTO votes (id, user_id, target_id, accomplishments, offenses, total, \
            explanation, voter_class, moderation_status, thumbs_up, thumbs_down, \
            created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&vote.id)
    .bind(&vote.user_id)
    .bind(&vote.target_id)
    .bind(vote.accomplishments)
    .bind(vote.offenses)
    .bind(vote.total)
    .bind(&vote.explanation)
    .bind(vote.voter_class)
    .bind(vote.moderation_status)
    .bind(vote.thumbs_up)
    .bind(vote.thumbs_down)
    .bind(&vote.created_at)
    .bind(&vote.updated_at)
    .execute(&mut *tx)
    .await;
    match inserted {
        Ok(_) => {}
        // The unique constraint catches submissions racing past the precheck.
        Err(err) if db::is_unique_violation(&err) => return Err(EngineError::DuplicateVote),
        Err(err) => {
            return Err(anyhow::Error::new(err)
                .context("failed to insert vote")
                .into())
        }
    }

    sqlx::query("UPDATE users SET vote_count = vote_count + 1 WHERE id = ?")
        .bind(&user.id)
        .execute(&mut *tx)
        .await
        .context("failed to bump the submitter's vote count")?;

    let delta = AggregateDelta::between(None, VoteFacts::of_vote(&vote).as_ref());
    aggregates::apply(&mut tx, &vote.target_id, &delta).await?;

    tx.commit().await.context("failed to commit transaction")?;
    counter!(VOTE_SUBMITTED).increment(1);
    Ok(vote)
}

/// Merge partial changes into the caller's own vote. The voter class is
/// refreshed from the caller's current account, which can move the vote
/// between aggregate segments.
pub async fn update(
    db: &Db,
    vote_id: &str,
    user: &User,
    input: UpdateVote,
) -> Result<Vote, EngineError> {
    if let Some(value) = input.accomplishments {
        check_score(value)?;
    }
    if let Some(value) = input.offenses {
        check_score(value)?;
    }
    check_explanation(user, input.explanation.as_deref())?;

    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let Some(mut vote) = sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE id = ?")
        .bind(vote_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to fetch vote")?
    else {
        return Err(EngineError::NotFound);
    };
    if vote.user_id != user.id {
        return Err(EngineError::Forbidden);
    }

    let old_facts = VoteFacts::of_vote(&vote);

    if let Some(value) = input.accomplishments {
        vote.accomplishments = value;
    }
    if let Some(value) = input.offenses {
        vote.offenses = value;
    }
    vote.total = vote.accomplishments - vote.offenses;
    if let Some(text) = input.explanation {
        vote.explanation = Some(text);
    }
    vote.voter_class = user.user_class;
    vote.updated_at = Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE votes SET accomplishments = ?, offenses = ?, total = ?, explanation = ?, \
            voter_class = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(vote.accomplishments)
    .bind(vote.offenses)
    .bind(vote.total)
    .bind(&vote.explanation)
    .bind(vote.voter_class)
    .bind(&vote.updated_at)
    .bind(&vote.id)
    .execute(&mut *tx)
    .await
    .context("failed to update vote")?;

    let delta = AggregateDelta::between(old_facts.as_ref(), VoteFacts::of_vote(&vote).as_ref());
    aggregates::apply(&mut tx, &vote.target_id, &delta).await?;

    tx.commit().await.context("failed to commit transaction")?;
    counter!(VOTE_UPDATED).increment(1);
    Ok(vote)
}

/// Remove a vote along with its karma judgments and attached comment
/// threads, reverse its aggregate contribution and release the (user,
/// target) slot. Owners and moderators only.
pub async fn delete(
    db: &Db,
    vote_id: &str,
    user: &User,
    is_privileged: bool,
) -> Result<(), EngineError> {
    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let Some(vote) = sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE id = ?")
        .bind(vote_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to fetch vote")?
    else {
        return Err(EngineError::NotFound);
    };
    if vote.user_id != user.id && !is_privileged {
        return Err(EngineError::Forbidden);
    }

    sqlx::query("DELETE FROM karma_transactions WHERE vote_id = ?")
        .bind(&vote.id)
        .execute(&mut *tx)
        .await
        .context("failed to delete karma judgments on vote")?;

    comments::delete_threads_for_vote(&mut tx, &vote.id).await?;

    sqlx::query("DELETE FROM votes WHERE id = ?")
        .bind(&vote.id)
        .execute(&mut *tx)
        .await
        .context("failed to delete vote")?;

    sqlx::query("UPDATE users SET vote_count = MAX(0, vote_count - 1) WHERE id = ?")
        .bind(&vote.user_id)
        .execute(&mut *tx)
        .await
        .context("failed to drop the submitter's vote count")?;

    let delta = AggregateDelta::between(VoteFacts::of_vote(&vote).as_ref(), None);
    aggregates::apply(&mut tx, &vote.target_id, &delta).await?;

    tx.commit().await.context("failed to commit transaction")?;
    counter!(VOTE_DELETED).increment(1);
    Ok(())
}

/// Fetch a single vote by id, any moderation status.
pub async fn get(db: &Db, vote_id: &str) -> Result<Vote, EngineError> {
    sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE id = ?")
        .bind(vote_id)
        .fetch_optional(db)
        .await
        .context("failed to fetch vote")?
        .ok_or(EngineError::NotFound)
}

/// Approved votes for a target, newest first.
pub async fn list_by_target(db: &Db, target_id: &str, page: Page) -> Result<Vec<Vote>, EngineError> {
    let page = page.clamped();
    let rows = sqlx::query_as::<_, Vote>(
        "SELECT * FROM votes WHERE target_id = ? AND moderation_status = 'approved' \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(target_id)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(db)
    .await
    .context("failed to list votes for target")?;
    Ok(rows)
}

/// All of a user's votes regardless of status, newest first. The caller
/// is expected to be the user themselves or a moderator surface.
pub async fn list_by_user(db: &Db, user_id: &str, page: Page) -> Result<Vec<Vote>, EngineError> {
    let page = page.clamped();
    let rows = sqlx::query_as::<_, Vote>(
        "SELECT * FROM votes WHERE user_id = ? \
         ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
    )
    .bind(user_id)
    .bind(page.limit)
    .bind(page.offset)
    .fetch_all(db)
    .await
    .context("failed to list votes for user")?;
    Ok(rows)
}

/// Flip a vote's moderation status. Leaving or re-entering the approved
/// state moves the vote out of or back into the target's aggregates.
pub async fn set_moderation_status(
    db: &Db,
    vote_id: &str,
    status: ModerationStatus,
    is_privileged: bool,
) -> Result<Vote, EngineError> {
    if !is_privileged {
        return Err(EngineError::Forbidden);
    }

    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let Some(mut vote) = sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE id = ?")
        .bind(vote_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to fetch vote")?
    else {
        return Err(EngineError::NotFound);
    };
    if vote.moderation_status == status {
        return Ok(vote);
    }

    let old_facts = VoteFacts::of_vote(&vote);
    vote.moderation_status = status;
    vote.updated_at = Utc::now().to_rfc3339();

    sqlx::query("UPDATE votes SET moderation_status = ?, updated_at = ? WHERE id = ?")
        .bind(vote.moderation_status)
        .bind(&vote.updated_at)
        .bind(&vote.id)
        .execute(&mut *tx)
        .await
        .context("failed to update moderation status")?;

    let delta = AggregateDelta::between(old_facts.as_ref(), VoteFacts::of_vote(&vote).as_ref());
    aggregates::apply(&mut tx, &vote.target_id, &delta).await?;

    tx.commit().await.context("failed to commit transaction")?;
    counter!(VOTE_MODERATED).increment(1);
    Ok(vote)
}
