//! services/api/src/web/middleware.rs
//!
//! Identifies the calling user from the `x-user-id` header.
//!
//! User accounts themselves are managed elsewhere; this service only needs the
//! id to scope linked platform accounts and default-account resolution.

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;
use uuid::Uuid;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The caller's user id, if the request carried one.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub Option<Uuid>);

impl Caller {
    /// The user id, or a 400 for routes that only make sense for a known user.
    pub fn require(self) -> Result<Uuid, (StatusCode, String)> {
        self.0.ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("{} header is required", USER_ID_HEADER),
            )
        })
    }
}

fn parse_caller(headers: &HeaderMap) -> Result<Caller, (StatusCode, String)> {
    let Some(raw) = headers.get(USER_ID_HEADER) else {
        return Ok(Caller(None));
    };
    let raw = raw.to_str().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid {} format", USER_ID_HEADER),
        )
    })?;
    let user_id = Uuid::parse_str(raw.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            format!("Invalid {} format", USER_ID_HEADER),
        )
    })?;
    Ok(Caller(Some(user_id)))
}

/// Middleware that parses the header and inserts a `Caller` into the request
/// extensions. A malformed id is rejected with 400; a missing one is allowed
/// through and left to the handler.
pub async fn identify_caller(mut req: Request, next: Next) -> Response {
    match parse_caller(req.headers()) {
        Ok(caller) => {
            if let Some(user_id) = caller.0 {
                debug!("Request from user {}", user_id);
            }
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(rejection) => rejection.into_response(),
    }
}
