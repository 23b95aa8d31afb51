//! Effective-tier resolution.
//!
//! Plans and account classes live on the user record; this module only
//! answers what the combination permits right now. Resolution happens
//! fresh on every gated operation, so plan changes apply retroactively
//! to edits of older content.

use crate::models::{PaidPlan, UserClass};

/// Permission tier after the free-upgrade rule is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Basic,
    Extended,
    Unlimited,
}

/// Resolve the effective tier for an account class and paid plan.
/// Authenticated accounts get the extended tier without paying.
pub fn effective_tier(class: UserClass, plan: PaidPlan) -> Tier {
    match plan {
        PaidPlan::Patron => Tier::Unlimited,
        PaidPlan::Supporter => Tier::Extended,
        PaidPlan::Free if class == UserClass::Authenticated => Tier::Extended,
        PaidPlan::Free => Tier::Basic,
    }
}

/// Character limit for vote explanations. `None` means unlimited.
pub fn explanation_limit(tier: Tier) -> Option<usize> {
    match tier {
        Tier::Basic => Some(280),
        Tier::Extended => Some(1000),
        Tier::Unlimited => None,
    }
}

/// Character limit for comments. Tracked separately from explanations.
pub fn comment_limit(tier: Tier) -> Option<usize> {
    match tier {
        Tier::Basic => Some(500),
        Tier::Extended => Some(2000),
        Tier::Unlimited => None,
    }
}

/// Whether this account class may reply to existing comments.
/// Anonymous users may start threads but not join them.
pub fn may_reply(class: UserClass) -> bool {
    class != UserClass::Anonymous
}
