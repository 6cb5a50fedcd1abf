//! services/api/src/web/rest.rs
//!
//! Contains the master definition for the OpenAPI document, the payload
//! types shared by several handlers, and the mapping from engine failures to
//! HTTP status codes.

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::{OpenApi, ToSchema};
use xengage_core::{AutomationError, Credentials, EngineError, ErrorClass};

use crate::web::{accounts, twitter};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        twitter::post_tweet_handler,
        twitter::reply_handler,
        twitter::post_thread_handler,
        twitter::fetch_timeline_handler,
        twitter::fetch_tweet_handler,
        twitter::list_scheduled_handler,
        twitter::cancel_scheduled_handler,
        accounts::start_auth_request_handler,
        accounts::auth_request_status_handler,
        accounts::authenticate_request_handler,
        accounts::login_and_link_handler,
        accounts::list_accounts_handler,
        accounts::get_account_handler,
        accounts::remove_account_handler,
        accounts::set_default_account_handler,
    ),
    components(
        schemas(
            CredentialsBody,
            MessageResponse,
            twitter::PostTweetRequest,
            twitter::PostThreadRequest,
            twitter::TweetResponse,
            twitter::ThreadResponse,
            twitter::TweetDto,
            accounts::AuthRequestResponse,
            accounts::AuthStatusResponse,
            accounts::AccountDto,
        )
    ),
    tags(
        (name = "X-Engage API", description = "Browser-automated posting, reading and account linking.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Shared Payloads
//=========================================================================================

/// Login material for the platform. Never stored.
#[derive(Deserialize, ToSchema)]
pub struct CredentialsBody {
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "two_factor_token")]
    pub two_factor_code: Option<String>,
    /// Name of a stored session to replay; defaults to the username.
    #[serde(default)]
    pub session_token: Option<String>,
}

impl From<CredentialsBody> for Credentials {
    fn from(body: CredentialsBody) -> Self {
        Credentials {
            username: body.username,
            password: body.password,
            two_factor_code: body.two_factor_code.filter(|c| !c.is_empty()),
            session_token: body.session_token.filter(|t| !t.is_empty()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

//=========================================================================================
// Error Mapping
//=========================================================================================

fn automation_status(err: &AutomationError) -> StatusCode {
    match err.class() {
        ErrorClass::Configuration => StatusCode::BAD_REQUEST,
        ErrorClass::UserActionable => StatusCode::UNAUTHORIZED,
        ErrorClass::Transient => StatusCode::BAD_GATEWAY,
    }
}

/// Maps an engine failure to a status code and a message carrying the stable
/// error code, e.g. `Failed to post [two-factor-required]: ...`.
pub fn engine_error(context: &str, err: EngineError) -> (StatusCode, String) {
    match err {
        EngineError::Automation(e) => {
            let status = automation_status(&e);
            if status.is_server_error() {
                error!("{}: {}", context, e);
            } else {
                warn!("{}: {}", context, e);
            }
            (status, format!("{} [{}]: {}", context, e.code(), e))
        }
        EngineError::Queue(e) => (StatusCode::BAD_REQUEST, format!("{}: {}", context, e)),
        EngineError::InvalidRequest(reason) => {
            (StatusCode::BAD_REQUEST, format!("{}: {}", context, reason))
        }
        EngineError::Port(e) => {
            error!("{}: {:?}", context, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}: internal error", context),
            )
        }
    }
}
