//! Database row types and the enumerations stored in them.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account class of a user. Determines which aggregate segments a vote
/// lands in and feeds the effective-tier resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UserClass {
    Anonymous,
    Registered,
    Authenticated,
}

/// Paid subscription plan, owned by the surrounding product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum PaidPlan {
    Free,
    Supporter,
    Patron,
}

/// Moderation state of a vote or comment. Only approved records count
/// toward aggregates and public listings; the rows themselves stay put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ModerationStatus {
    Pending,
    Approved,
    Rejected,
    Dumpster,
}

/// A karma judgment value. Anything other than plus or minus one is
/// rejected at the deserialization boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(try_from = "i64", into = "i64")]
#[repr(i32)]
pub enum KarmaValue {
    Up = 1,
    Down = -1,
}

impl TryFrom<i64> for KarmaValue {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Up),
            -1 => Ok(Self::Down),
            other => Err(format!("karma value must be 1 or -1, got {other}")),
        }
    }
}

impl From<KarmaValue> for i64 {
    fn from(value: KarmaValue) -> Self {
        value as i64
    }
}

/// A user record. Karma and the activity counts are denormalized
/// accumulators owned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub handle: String,
    pub user_class: UserClass,
    pub paid_plan: PaidPlan,
    pub moderator: bool,
    pub karma: i64,
    pub vote_count: i64,
    pub comment_count: i64,
    pub created_at: String,
}

/// A scored target with its live aggregate fields. The raw sums feeding
/// the means live only in the targets table; rows here carry the derived
/// means and counts.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    pub id: String,
    pub name: String,
    pub total_votes: i64,
    pub anonymous_votes: i64,
    pub registered_votes: i64,
    pub authenticated_votes: i64,
    pub avg_accomplishments: f64,
    pub avg_offenses: f64,
    pub avg_total: f64,
    /// Mean over registered and authenticated voters, absent until one exists.
    pub master_accomplishments: Option<f64>,
    pub master_offenses: Option<f64>,
    pub master_total: Option<f64>,
    /// Mean over authenticated voters only, absent until one exists.
    pub auth_accomplishments: Option<f64>,
    pub auth_offenses: Option<f64>,
    pub auth_total: Option<f64>,
    pub created_at: String,
}

/// One user's score submission for one target.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    pub user_id: String,
    pub target_id: String,
    pub accomplishments: i64,
    pub offenses: i64,
    /// Always accomplishments minus offenses; never accepted from callers.
    pub total: i64,
    pub explanation: Option<String>,
    pub voter_class: UserClass,
    pub moderation_status: ModerationStatus,
    pub thumbs_up: i64,
    pub thumbs_down: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Daily aggregate snapshot for a target.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct VoteHistoryEntry {
    pub target_id: String,
    /// ISO date the snapshot covers.
    pub day: String,
    pub avg_accomplishments: f64,
    pub avg_offenses: f64,
    pub avg_total: f64,
    pub master_accomplishments: Option<f64>,
    pub master_offenses: Option<f64>,
    pub master_total: Option<f64>,
    pub auth_accomplishments: Option<f64>,
    pub auth_offenses: Option<f64>,
    pub auth_total: Option<f64>,
    pub total_votes: i64,
    pub anonymous_votes: i64,
    pub registered_votes: i64,
    pub authenticated_votes: i64,
    pub recorded_at: String,
}

/// A karma ledger row. Exactly one of the item columns is set.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct KarmaTransaction {
    pub id: String,
    pub from_user_id: String,
    pub vote_id: Option<String>,
    #[serde(rename = "communicationId")]
    pub comment_id: Option<String>,
    pub value: KarmaValue,
    pub created_at: String,
}

/// A threaded comment. Exactly one of the anchor columns is set, and
/// replies repeat their parent's anchor.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author_id: String,
    pub vote_id: Option<String>,
    pub target_id: Option<String>,
    pub parent_id: Option<String>,
    pub content: String,
    pub character_count: i64,
    pub thumbs_up: i64,
    pub thumbs_down: i64,
    /// Cached thumbs_up minus thumbs_down, the reply ranking key.
    pub net_karma: i64,
    pub moderation_status: ModerationStatus,
    pub created_at: String,
    pub updated_at: String,
}
