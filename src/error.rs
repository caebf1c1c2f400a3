//! Boundary error type and its HTTP disposition (§7).

use std::fmt;

/// Errors visible at the boundary of the core, one variant per row of §7's table.
#[derive(Debug, thiserror::Error)]
pub enum GitHttpError {
    #[error("{0}")]
    BadRequest(String),

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("unpack error: {0}")]
    PackError(String),

    #[error("ref error: {0}")]
    RefError(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GitHttpError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn pack_error(msg: impl Into<String>) -> Self {
        Self::PackError(msg.into())
    }

    pub fn ref_error(msg: impl Into<String>) -> Self {
        Self::RefError(msg.into())
    }

    /// HTTP status this error maps to, per §7.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            // PackError/RefError are reported inline in a 200 response body
            // (pkt-line `unpack error`/`ng` lines), never as an HTTP error status.
            Self::PackError(_) | Self::RefError(_) => 200,
            Self::Internal(_) => 500,
        }
    }
}

/// Replace CR/LF with spaces so a message is safe to embed in a single pkt-line.
pub fn sanitize_line(msg: &str) -> String {
    msg.chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect()
}

impl fmt::Display for Sanitized<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", sanitize_line(self.0))
    }
}

/// Display wrapper that sanitizes its inner string for pkt-line embedding.
pub struct Sanitized<'a>(pub &'a str);

#[cfg(feature = "axum")]
mod axum_impl {
    use super::GitHttpError;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};

    impl IntoResponse for GitHttpError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, self.to_string()).into_response()
        }
    }
}
