use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Recoverable failures of the core engine operations. Every operation
/// rolls back before returning one of these, so retrying is always safe.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("score {0} is outside the accepted range 0..=10")]
    InvalidScore(i64),
    #[error("a vote by this user for this target already exists")]
    DuplicateVote,
    #[error("explanation exceeds the {limit}-character limit for this tier")]
    ExplanationTooLong { limit: usize },
    #[error("content exceeds the {limit}-character limit for this tier")]
    ContentTooLong { limit: usize },
    #[error("content must not be empty")]
    EmptyContent,
    #[error("record not found")]
    NotFound,
    #[error("not allowed")]
    Forbidden,
    #[error("own submissions cannot be judged")]
    SelfVoteForbidden,
    #[error("parent comment not found")]
    ParentNotFound,
    #[error("reply must stay on its parent's thread")]
    CrossThreadReply,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Stable kind name forwarded to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidScore(_) => "InvalidScore",
            Self::DuplicateVote => "DuplicateVote",
            Self::ExplanationTooLong { .. } => "ExplanationTooLong",
            Self::ContentTooLong { .. } => "ContentTooLong",
            Self::EmptyContent => "EmptyContent",
            Self::NotFound => "NotFound",
            Self::Forbidden => "Forbidden",
            Self::SelfVoteForbidden => "SelfVoteForbidden",
            Self::ParentNotFound => "ParentNotFound",
            Self::CrossThreadReply => "CrossThreadReply",
            Self::Internal(_) => "Internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidScore(_)
            | Self::ExplanationTooLong { .. }
            | Self::ContentTooLong { .. }
            | Self::EmptyContent
            | Self::CrossThreadReply => StatusCode::BAD_REQUEST,
            Self::DuplicateVote => StatusCode::CONFLICT,
            Self::NotFound | Self::ParentNotFound => StatusCode::NOT_FOUND,
            Self::Forbidden | Self::SelfVoteForbidden => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `axum`-compatible error handler. Engine errors keep their stable kind
/// and render as JSON; everything else is an opaque failure.
#[derive(Error)]
pub struct Error {
    status: StatusCode,
    kind: Option<&'static str>,
    err: anyhow::Error,
}

impl Error {
    pub fn with_status(status: StatusCode, err: impl Into<anyhow::Error>) -> Self {
        Self {
            status,
            kind: None,
            err: err.into(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: None,
            err,
        }
    }
}

impl From<EngineError> for Error {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Internal(err) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                kind: None,
                err,
            },
            err => Self {
                status: err.status(),
                kind: Some(err.kind()),
                err: anyhow::Error::new(err),
            },
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.status, self.err)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.err.fmt(f)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        if let Some(kind) = self.kind {
            // Expected engine outcomes, not server failures. No log noise.
            let body = json!({ "error": kind, "message": self.err.to_string() });
            return (self.status, Json(body)).into_response();
        }

        error!("{:?}", self.err);

        // N.B: Forward out the error message to the requester if this is a debug build.
        // This is insecure for production builds, so we'll return an empty body if this
        // is a release build.
        if cfg!(debug_assertions) {
            Response::builder()
                .status(self.status)
                .body(Body::new(format!("{:?}", self.err)))
                .unwrap()
        } else {
            Response::builder()
                .status(self.status)
                .body(Body::empty())
                .unwrap()
        }
    }
}
