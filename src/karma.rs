//! The karma ledger.
//!
//! At most one judgment row per (voter, item), with value plus or minus
//! one. Resubmission toggles, the opposite value switches. The transition
//! table is pure; the submit path reads the row it is about to replace
//! inside the same transaction, so every counter delta derives from state
//! actually observed under the write lock.

use anyhow::Context as _;
use chrono::Utc;
use metrics::counter;
use uuid::Uuid;

use crate::db::{self, Db};
use crate::error::EngineError;
use crate::metrics::{KARMA_GRANTED, KARMA_SWITCHED, KARMA_TOGGLED};
use crate::models::{KarmaTransaction, KarmaValue, User};

/// The two kinds of items a judgment may target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VotableRef {
    Vote(String),
    Comment(String),
}

impl VotableRef {
    fn vote_id(&self) -> Option<&str> {
        match self {
            Self::Vote(id) => Some(id),
            Self::Comment(_) => None,
        }
    }

    fn comment_id(&self) -> Option<&str> {
        match self {
            Self::Vote(_) => None,
            Self::Comment(id) => Some(id),
        }
    }
}

/// A voter's current judgment of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Judgment {
    None,
    Up,
    Down,
}

impl Judgment {
    /// The stored value behind this judgment, if any.
    pub fn value(self) -> Option<KarmaValue> {
        match self {
            Self::None => None,
            Self::Up => Some(KarmaValue::Up),
            Self::Down => Some(KarmaValue::Down),
        }
    }

    fn of_value(value: KarmaValue) -> Self {
        match value {
            KarmaValue::Up => Self::Up,
            KarmaValue::Down => Self::Down,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LedgerOp {
    Insert,
    Delete,
    Flip,
}

/// One resolved transition: the ledger operation plus every counter delta
/// it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    op: LedgerOp,
    up_delta: i64,
    down_delta: i64,
    author_delta: i64,
    next: Judgment,
}

/// The full state machine over ({none, up, down}, submitted value).
/// A switch swings the author's karma by two, the difference of the
/// values, never by one.
fn transition(current: Judgment, submitted: KarmaValue) -> Transition {
    match (current, submitted) {
        (Judgment::None, KarmaValue::Up) => Transition {
            op: LedgerOp::Insert,
            up_delta: 1,
            down_delta: 0,
            author_delta: 1,
            next: Judgment::Up,
        },
        (Judgment::None, KarmaValue::Down) => Transition {
            op: LedgerOp::Insert,
            up_delta: 0,
            down_delta: 1,
            author_delta: -1,
            next: Judgment::Down,
        },
        (Judgment::Up, KarmaValue::Up) => Transition {
            op: LedgerOp::Delete,
            up_delta: -1,
            down_delta: 0,
            author_delta: -1,
            next: Judgment::None,
        },
        (Judgment::Down, KarmaValue::Down) => Transition {
            op: LedgerOp::Delete,
            up_delta: 0,
            down_delta: -1,
            author_delta: 1,
            next: Judgment::None,
        },
        (Judgment::Up, KarmaValue::Down) => Transition {
            op: LedgerOp::Flip,
            up_delta: -1,
            down_delta: 1,
            author_delta: -2,
            next: Judgment::Down,
        },
        (Judgment::Down, KarmaValue::Up) => Transition {
            op: LedgerOp::Flip,
            up_delta: 1,
            down_delta: -1,
            author_delta: 2,
            next: Judgment::Up,
        },
    }
}

async fn fetch_existing(
    tx: &mut sqlx::SqliteConnection,
    from_user_id: &str,
    item: &VotableRef,
) -> anyhow::Result<Option<KarmaTransaction>> {
    let query = match item {
        VotableRef::Vote(_) => {
            "SELECT * FROM karma_transactions WHERE from_user_id = ? AND vote_id = ?"
        }
        VotableRef::Comment(_) => {
            "SELECT * FROM karma_transactions WHERE from_user_id = ? AND comment_id = ?"
        }
    };
    let item_id = match item {
        VotableRef::Vote(id) | VotableRef::Comment(id) => id,
    };
    sqlx::query_as::<_, KarmaTransaction>(query)
        .bind(from_user_id)
        .bind(item_id)
        .fetch_optional(tx)
        .await
        .context("failed to fetch existing judgment")
}

async fn fetch_author(
    tx: &mut sqlx::SqliteConnection,
    item: &VotableRef,
) -> Result<String, EngineError> {
    let author = match item {
        VotableRef::Vote(id) => sqlx::query_scalar::<_, String>("SELECT user_id FROM votes WHERE id = ?")
            .bind(id)
            .fetch_optional(tx)
            .await
            .context("failed to fetch vote author")?,
        VotableRef::Comment(id) => {
            sqlx::query_scalar::<_, String>("SELECT author_id FROM comments WHERE id = ?")
                .bind(id)
                .fetch_optional(tx)
                .await
                .context("failed to fetch comment author")?
        }
    };
    author.ok_or(EngineError::NotFound)
}

/// Submit a judgment and return the voter's resulting state. Submitting
/// the current value removes it, the opposite value replaces it. Users
/// cannot judge their own items.
pub async fn submit(
    db: &Db,
    from_user: &User,
    item: &VotableRef,
    value: KarmaValue,
) -> Result<Judgment, EngineError> {
    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let author_id = fetch_author(&mut tx, item).await?;
    if author_id == from_user.id {
        return Err(EngineError::SelfVoteForbidden);
    }

    let existing = fetch_existing(&mut tx, &from_user.id, item).await?;
    let current = existing
        .as_ref()
        .map_or(Judgment::None, |row| Judgment::of_value(row.value));
    let step = transition(current, value);

    match step.op {
        LedgerOp::Insert => {
            let inserted = sqlx::query(
                "INSERT INTO karma_transactions (id, from_user_id, vote_id, comment_id, value, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&from_user.id)
            .bind(item.vote_id())
            .bind(item.comment_id())
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&mut *tx)
            .await;
            match inserted {
                Ok(_) => {}
                // Lost a duplicate-submission race. Drop our work and report
                // whatever the winner left behind; last write wins.
                Err(err) if db::is_unique_violation(&err) => {
                    drop(tx);
                    return get_user_judgment(db, &from_user.id, item).await;
                }
                Err(err) => {
                    return Err(anyhow::Error::new(err)
                        .context("failed to insert judgment")
                        .into())
                }
            }
        }
        LedgerOp::Delete => {
            let row = existing.as_ref().context("observed judgment vanished")?;
            sqlx::query("DELETE FROM karma_transactions WHERE id = ?")
                .bind(&row.id)
                .execute(&mut *tx)
                .await
                .context("failed to delete judgment")?;
        }
        LedgerOp::Flip => {
            let row = existing.as_ref().context("observed judgment vanished")?;
            sqlx::query("UPDATE karma_transactions SET value = ?, created_at = ? WHERE id = ?")
                .bind(value)
                .bind(Utc::now().to_rfc3339())
                .bind(&row.id)
                .execute(&mut *tx)
                .await
                .context("failed to flip judgment")?;
        }
    }

    // Item counters floor at zero; drift would otherwise push them negative.
    match item {
        VotableRef::Vote(id) => {
            sqlx::query(
                "UPDATE votes SET thumbs_up = MAX(0, thumbs_up + ?), \
                    thumbs_down = MAX(0, thumbs_down + ?) \
                 WHERE id = ?",
            )
            .bind(step.up_delta)
            .bind(step.down_delta)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("failed to adjust vote thumbs")?;
        }
        VotableRef::Comment(id) => {
            sqlx::query(
                "UPDATE comments SET thumbs_up = MAX(0, thumbs_up + ?), \
                    thumbs_down = MAX(0, thumbs_down + ?), \
                    net_karma = MAX(0, thumbs_up + ?) - MAX(0, thumbs_down + ?) \
                 WHERE id = ?",
            )
            .bind(step.up_delta)
            .bind(step.down_delta)
            .bind(step.up_delta)
            .bind(step.down_delta)
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("failed to adjust comment thumbs")?;
        }
    }

    // The author's own karma is unbounded in both directions.
    sqlx::query("UPDATE users SET karma = karma + ? WHERE id = ?")
        .bind(step.author_delta)
        .bind(&author_id)
        .execute(&mut *tx)
        .await
        .context("failed to adjust author karma")?;

    tx.commit().await.context("failed to commit transaction")?;
    match step.op {
        LedgerOp::Insert => counter!(KARMA_GRANTED).increment(1),
        LedgerOp::Delete => counter!(KARMA_TOGGLED).increment(1),
        LedgerOp::Flip => counter!(KARMA_SWITCHED).increment(1),
    }
    Ok(step.next)
}

/// A voter's current judgment of an item, without touching anything.
pub async fn get_user_judgment(
    db: &Db,
    user_id: &str,
    item: &VotableRef,
) -> Result<Judgment, EngineError> {
    let query = match item {
        VotableRef::Vote(_) => {
            "SELECT value FROM karma_transactions WHERE from_user_id = ? AND vote_id = ?"
        }
        VotableRef::Comment(_) => {
            "SELECT value FROM karma_transactions WHERE from_user_id = ? AND comment_id = ?"
        }
    };
    let item_id = match item {
        VotableRef::Vote(id) | VotableRef::Comment(id) => id,
    };
    let value = sqlx::query_scalar::<_, KarmaValue>(query)
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(db)
        .await
        .context("failed to fetch judgment")?;
    Ok(value.map_or(Judgment::None, Judgment::of_value))
}
