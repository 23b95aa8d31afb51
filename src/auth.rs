//! Caller identity.
//!
//! Session handling belongs to the surrounding product. Requests arrive
//! with the already-authenticated user id in the `x-user-id` header; this
//! extractor resolves it to a user row once per request. Privilege means
//! the moderator flag, nothing finer.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use metrics::counter;

use crate::metrics::AUTH_FAILED;
use crate::models::User;
use crate::{AppState, Error};

/// Header carrying the trusted caller id.
const USER_ID_HEADER: &str = "x-user-id";

/// The resolved caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    user: User,
}

impl Caller {
    pub fn user(&self) -> &User {
        &self.user
    }

    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Whether the caller may act on records they do not own.
    pub fn is_privileged(&self) -> bool {
        self.user.moderator
    }
}

impl FromRequestParts<AppState> for Caller {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let Some(user_id) = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        else {
            counter!(AUTH_FAILED).increment(1);
            return Err(Error::with_status(
                StatusCode::UNAUTHORIZED,
                anyhow::anyhow!("missing {USER_ID_HEADER} header"),
            ));
        };

        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&state.db)
            .await
            .map_err(|err| Error::from(anyhow::Error::new(err).context("failed to load caller")))?;

        match user {
            Some(user) => Ok(Self { user }),
            None => {
                counter!(AUTH_FAILED).increment(1);
                Err(Error::with_status(
                    StatusCode::UNAUTHORIZED,
                    anyhow::anyhow!("unknown user {user_id}"),
                ))
            }
        }
    }
}
