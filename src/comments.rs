//! Threaded comments.
//!
//! Comments anchor to a vote or directly to a target and form a tree via
//! `parent_id`. Replies always repeat their parent's anchor, so a whole
//! thread is addressable without walking it. Deletion works through an
//! explicit worklist: subtrees are collected level by level with batched
//! child lookups and removed deepest level first, with the karma rows and
//! author counters settled along the way.

use std::collections::HashMap;

use anyhow::{Context as _, Result};
use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::db::Db;
use crate::error::EngineError;
use crate::metrics::{COMMENT_DELETED, COMMENT_MODERATED, COMMENT_POSTED};
use crate::models::{Comment, ModerationStatus, User};
use crate::tier;

/// Replies attached per node when a listing includes them.
pub const REPLIES_PER_NODE: i64 = 5;
/// Hard ceiling on requested reply depth.
pub const MAX_DEPTH: i64 = 8;

const PAGE_CAP: i64 = 100;

/// Ids bound per query; SQLite caps bound variables per statement.
pub(crate) const BIND_CHUNK: usize = 500;

/// What a comment thread hangs off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anchor {
    Vote(String),
    Target(String),
}

impl Anchor {
    fn vote_id(&self) -> Option<&str> {
        match self {
            Self::Vote(id) => Some(id),
            Self::Target(_) => None,
        }
    }

    fn target_id(&self) -> Option<&str> {
        match self {
            Self::Vote(_) => None,
            Self::Target(id) => Some(id),
        }
    }
}

/// A new comment or reply.
#[derive(Debug, Clone)]
pub struct PostComment {
    pub anchor: Anchor,
    pub parent_id: Option<String>,
    pub content: String,
}

/// Listing options. `max_depth` counts reply levels below the returned
/// page and is clamped to [`MAX_DEPTH`].
#[derive(Debug, Clone)]
pub struct ListComments {
    pub anchor: Anchor,
    /// When set, page through the replies of this comment instead of the
    /// thread roots. This is the deep-thread continuation path.
    pub parent_id: Option<String>,
    pub limit: i64,
    pub offset: i64,
    pub include_replies: bool,
    pub max_depth: i64,
}

/// A comment with the replies attached by a listing.
#[derive(Debug, Clone, Serialize)]
pub struct CommentNode {
    #[serde(flatten)]
    pub comment: Comment,
    pub replies: Vec<CommentNode>,
}

fn check_content(user: &User, content: &str) -> Result<(), EngineError> {
    if content.trim().is_empty() {
        return Err(EngineError::EmptyContent);
    }
    let tier = tier::effective_tier(user.user_class, user.paid_plan);
    if let Some(limit) = tier::comment_limit(tier) {
        if content.chars().count() > limit {
            return Err(EngineError::ContentTooLong { limit });
        }
    }
    Ok(())
}

/// Post a comment. Top-level comments are open to every class; replies
/// require a non-anonymous author and must cite a parent on the same
/// anchor.
pub async fn post(db: &Db, user: &User, input: PostComment) -> Result<Comment, EngineError> {
    check_content(user, &input.content)?;

    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let anchor_exists = match &input.anchor {
        Anchor::Vote(id) => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM votes WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .context("failed to check anchor vote")?,
        Anchor::Target(id) => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM targets WHERE id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await
                .context("failed to check anchor target")?
        }
    };
    if anchor_exists == 0 {
        return Err(EngineError::NotFound);
    }

    if let Some(parent_id) = &input.parent_id {
        if !tier::may_reply(user.user_class) {
            return Err(EngineError::Forbidden);
        }
        let Some(parent) = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
            .bind(parent_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to fetch parent comment")?
        else {
            return Err(EngineError::ParentNotFound);
        };
        let same_thread = match &input.anchor {
            Anchor::Vote(id) => parent.vote_id.as_deref() == Some(id.as_str()),
            Anchor::Target(id) => parent.target_id.as_deref() == Some(id.as_str()),
        };
        if !same_thread {
            return Err(EngineError::CrossThreadReply);
        }
    }

    let now = Utc::now().to_rfc3339();
    let comment = Comment {
        id: Uuid::new_v4().to_string(),
        author_id: user.id.clone(),
        vote_id: input.anchor.vote_id().map(str::to_owned),
        target_id: input.anchor.target_id().map(str::to_owned),
        parent_id: input.parent_id,
        character_count: input.content.chars().count() as i64,
        content: input.content,
        thumbs_up: 0,
        thumbs_down: 0,
        net_karma: 0,
        moderation_status: ModerationStatus::Approved,
        created_at: now.clone(),
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO comments (id, author_id, vote_id, target_id, parent_id, content, \
            character_count, thumbs_up, thumbs_down, net_karma, moderation_status, \
            created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&comment.id)
    .bind(&comment.author_id)
    .bind(&comment.vote_id)
    .bind(&comment.target_id)
    .bind(&comment.parent_id)
    .bind(&comment.content)
    .bind(comment.character_count)
    .bind(comment.thumbs_up)
    .bind(comment.thumbs_down)
    .bind(comment.net_karma)
    .bind(comment.moderation_status)
    .bind(&comment.created_at)
    .bind(&comment.updated_at)
    .execute(&mut *tx)
    .await
    .context("failed to insert comment")?;

    sqlx::query("UPDATE users SET comment_count = comment_count + 1 WHERE id = ?")
        .bind(&user.id)
        .execute(&mut *tx)
        .await
        .context("failed to bump the author's comment count")?;

    tx.commit().await.context("failed to commit transaction")?;
    counter!(COMMENT_POSTED).increment(1);
    Ok(comment)
}

/// Replace a comment's content. Author only; the length gate uses the
/// author's tier at edit time, not at posting time.
pub async fn edit(
    db: &Db,
    comment_id: &str,
    user: &User,
    content: String,
) -> Result<Comment, EngineError> {
    check_content(user, &content)?;

    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let Some(mut comment) = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
        .bind(comment_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to fetch comment")?
    else {
        return Err(EngineError::NotFound);
    };
    if comment.author_id != user.id {
        return Err(EngineError::Forbidden);
    }

    comment.character_count = content.chars().count() as i64;
    comment.content = content;
    comment.updated_at = Utc::now().to_rfc3339();

    sqlx::query(
        "UPDATE comments SET content = ?, character_count = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&comment.content)
    .bind(comment.character_count)
    .bind(&comment.updated_at)
    .bind(&comment.id)
    .execute(&mut *tx)
    .await
    .context("failed to update comment")?;

    tx.commit().await.context("failed to commit transaction")?;
    Ok(comment)
}

/// Identity of a comment on the deletion worklist.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct CommentRef {
    pub id: String,
    pub author_id: String,
}

/// Delete a comment and its whole subtree. Author or moderator only.
/// Returns the number of removed comments.
pub async fn delete(
    db: &Db,
    comment_id: &str,
    user: &User,
    is_privileged: bool,
) -> Result<u64, EngineError> {
    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let Some(root) =
        sqlx::query_as::<_, CommentRef>("SELECT id, author_id FROM comments WHERE id = ?")
            .bind(comment_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to fetch comment")?
    else {
        return Err(EngineError::NotFound);
    };
    if root.author_id != user.id && !is_privileged {
        return Err(EngineError::Forbidden);
    }

    let deleted = delete_subtrees(&mut tx, vec![root]).await?;

    tx.commit().await.context("failed to commit transaction")?;
    counter!(COMMENT_DELETED).increment(deleted);
    Ok(deleted)
}

/// Delete every thread anchored to a vote. Used when the vote itself goes.
pub(crate) async fn delete_threads_for_vote(
    conn: &mut SqliteConnection,
    vote_id: &str,
) -> Result<u64> {
    let roots = sqlx::query_as::<_, CommentRef>(
        "SELECT id, author_id FROM comments WHERE vote_id = ? AND parent_id IS NULL",
    )
    .bind(vote_id)
    .fetch_all(&mut *conn)
    .await
    .context("failed to fetch threads for vote")?;
    delete_subtrees(conn, roots).await
}

/// Remove the subtrees rooted at `roots`. Levels are collected breadth
/// first with chunked child queries, then deleted deepest level first
/// so the self-referential foreign key never sees an orphan. Also clears
/// karma rows on every node and settles author comment counts, descendants
/// included.
pub(crate) async fn delete_subtrees(
    conn: &mut SqliteConnection,
    roots: Vec<CommentRef>,
) -> Result<u64> {
    if roots.is_empty() {
        return Ok(0);
    }

    let mut levels: Vec<Vec<CommentRef>> = Vec::new();
    let mut frontier = roots;
    while !frontier.is_empty() {
        let mut children = Vec::new();
        for chunk in frontier.chunks(BIND_CHUNK) {
            let mut query =
                sqlx::QueryBuilder::new("SELECT id, author_id FROM comments WHERE parent_id IN (");
            let mut ids = query.separated(", ");
            for node in chunk {
                ids.push_bind(node.id.clone());
            }
            query.push(")");
            children.extend(
                query
                    .build_query_as::<CommentRef>()
                    .fetch_all(&mut *conn)
                    .await
                    .context("failed to fetch child comments")?,
            );
        }
        levels.push(std::mem::replace(&mut frontier, children));
    }

    let total: u64 = levels.iter().map(|level| level.len() as u64).sum();

    for chunk in levels.iter().flat_map(|level| level.chunks(BIND_CHUNK)) {
        let mut query =
            sqlx::QueryBuilder::new("DELETE FROM karma_transactions WHERE comment_id IN (");
        let mut ids = query.separated(", ");
        for node in chunk {
            ids.push_bind(node.id.clone());
        }
        query.push(")");
        query
            .build()
            .execute(&mut *conn)
            .await
            .context("failed to delete karma judgments on comments")?;
    }

    let mut by_author: HashMap<&str, i64> = HashMap::new();
    for node in levels.iter().flatten() {
        *by_author.entry(node.author_id.as_str()).or_default() += 1;
    }
    for (author_id, removed) in by_author {
        sqlx::query("UPDATE users SET comment_count = MAX(0, comment_count - ?) WHERE id = ?")
            .bind(removed)
            .bind(author_id)
            .execute(&mut *conn)
            .await
            .context("failed to drop an author's comment count")?;
    }

    for chunk in levels.iter().rev().flat_map(|level| level.chunks(BIND_CHUNK)) {
        let mut query = sqlx::QueryBuilder::new("DELETE FROM comments WHERE id IN (");
        let mut ids = query.separated(", ");
        for node in chunk {
            ids.push_bind(node.id.clone());
        }
        query.push(")");
        query
            .build()
            .execute(&mut *conn)
            .await
            .context("failed to delete comment level")?;
    }

    Ok(total)
}

/// List approved comments for an anchor, ranked by net karma with recency
/// breaking ties. With `include_replies`, up to [`REPLIES_PER_NODE`] replies
/// are attached per node down to the requested depth, same ranking.
pub async fn list(db: &Db, opts: ListComments) -> Result<Vec<CommentNode>, EngineError> {
    let limit = opts.limit.clamp(1, PAGE_CAP);
    let offset = opts.offset.max(0);

    let mut query = sqlx::QueryBuilder::new("SELECT * FROM comments WHERE ");
    match &opts.anchor {
        Anchor::Vote(id) => {
            query.push("vote_id = ").push_bind(id.clone());
        }
        Anchor::Target(id) => {
            query.push("target_id = ").push_bind(id.clone());
        }
    }
    match &opts.parent_id {
        Some(parent_id) => {
            query.push(" AND parent_id = ").push_bind(parent_id.clone());
        }
        None => {
            query.push(" AND parent_id IS NULL");
        }
    }
    query.push(" AND moderation_status = 'approved' ORDER BY net_karma DESC, created_at DESC");
    query.push(" LIMIT ").push_bind(limit);
    query.push(" OFFSET ").push_bind(offset);

    let page = query
        .build_query_as::<Comment>()
        .fetch_all(db)
        .await
        .context("failed to list comments")?;

    let mut nodes: Vec<CommentNode> = page
        .into_iter()
        .map(|comment| CommentNode {
            comment,
            replies: Vec::new(),
        })
        .collect();

    if opts.include_replies {
        let depth = opts.max_depth.clamp(0, MAX_DEPTH);
        attach_replies(db, &mut nodes, depth).await?;
    }
    Ok(nodes)
}

/// Attach reply levels below `nodes`, batched queries per level.
async fn attach_replies(
    db: &Db,
    nodes: &mut [CommentNode],
    mut depth: i64,
) -> Result<(), EngineError> {
    let mut frontier: Vec<&mut CommentNode> = nodes.iter_mut().collect();
    while depth > 0 && !frontier.is_empty() {
        let parent_ids: Vec<String> = frontier
            .iter()
            .map(|node| node.comment.id.clone())
            .collect();
        let children = fetch_replies(db, &parent_ids).await?;

        let mut by_parent: HashMap<String, Vec<Comment>> = HashMap::new();
        for child in children {
            let parent_id = child.parent_id.clone().unwrap_or_default();
            by_parent.entry(parent_id).or_default().push(child);
        }

        let mut next: Vec<&mut CommentNode> = Vec::new();
        for node in frontier {
            if let Some(replies) = by_parent.remove(&node.comment.id) {
                node.replies = replies
                    .into_iter()
                    .map(|comment| CommentNode {
                        comment,
                        replies: Vec::new(),
                    })
                    .collect();
            }
            next.extend(node.replies.iter_mut());
        }
        frontier = next;
        depth -= 1;
    }
    Ok(())
}

/// The top [`REPLIES_PER_NODE`] approved replies for each listed parent,
/// batched over the whole level. Each parent ranks within one chunk, so
/// chunking never splits a reply set.
async fn fetch_replies(db: &Db, parent_ids: &[String]) -> Result<Vec<Comment>, EngineError> {
    let mut rows = Vec::new();
    for chunk in parent_ids.chunks(BIND_CHUNK) {
        let mut query = sqlx::QueryBuilder::new(
            "SELECT id, author_id, vote_id, target_id, parent_id, content, character_count, \
                thumbs_up, thumbs_down, net_karma, moderation_status, created_at, updated_at \
             FROM (SELECT *, ROW_NUMBER() OVER (PARTITION BY parent_id \
                    ORDER BY net_karma DESC, created_at DESC) AS rank \
                   FROM comments WHERE moderation_status = 'approved' AND parent_id IN (",
        );
        let mut ids = query.separated(", ");
        for parent_id in chunk {
            ids.push_bind(parent_id.clone());
        }
        query.push("))");
        query.push(" WHERE rank <= ").push_bind(REPLIES_PER_NODE);
        query.push(" ORDER BY parent_id, rank");

        rows.extend(
            query
                .build_query_as::<Comment>()
                .fetch_all(db)
                .await
                .context("failed to fetch replies")?,
        );
    }
    Ok(rows)
}

/// Flip a comment's moderation status. Listings only show approved
/// comments, and a hidden node hides its subtree with it.
pub async fn set_moderation_status(
    db: &Db,
    comment_id: &str,
    status: ModerationStatus,
    is_privileged: bool,
) -> Result<Comment, EngineError> {
    if !is_privileged {
        return Err(EngineError::Forbidden);
    }

    let mut tx = db.begin().await.context("failed to begin transaction")?;

    let Some(mut comment) = sqlx::query_as::<_, Comment>("SELECT * FROM comments WHERE id = ?")
        .bind(comment_id)
        .fetch_optional(&mut *tx)
        .await
        .context("failed to fetch comment")?
    else {
        return Err(EngineError::NotFound);
    };
    if comment.moderation_status == status {
        return Ok(comment);
    }

    comment.moderation_status = status;
    comment.updated_at = Utc::now().to_rfc3339();

    sqlx::query("UPDATE comments SET moderation_status = ?, updated_at = ? WHERE id = ?")
        .bind(comment.moderation_status)
        .bind(&comment.updated_at)
        .bind(&comment.id)
        .execute(&mut *tx)
        .await
        .context("failed to update moderation status")?;

    tx.commit().await.context("failed to commit transaction")?;
    counter!(COMMENT_MODERATED).increment(1);
    Ok(comment)
}
