//! services/api/src/web/accounts.rs
//!
//! Endpoints for linking platform accounts to a user: the asynchronous,
//! poll-able auth request flow, the synchronous login-and-link shortcut and
//! management of already linked accounts.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use xengage_core::{AccountSettings, AuthRequest};

use crate::web::middleware::Caller;
use crate::web::rest::{engine_error, CredentialsBody, MessageResponse};
use crate::web::state::AppState;

//=========================================================================================
// Responses
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthRequestResponse {
    pub request_id: String,
    pub status: String,
}

/// Where an auth request stands. Profile fields are filled in once it completes.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AuthStatusResponse {
    pub success: bool,
    pub request_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub error_code: Option<String>,
    pub error: Option<String>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub profile_image_url: Option<String>,
}

impl From<AuthRequest> for AuthStatusResponse {
    fn from(request: AuthRequest) -> Self {
        let profile = request.profile;
        Self {
            success: request.status == xengage_core::AuthRequestStatus::Completed,
            request_id: request.request_id,
            status: request.status.as_str().to_string(),
            created_at: request.created_at,
            error_code: request.error.as_ref().map(|e| e.code.clone()),
            error: request.error.map(|e| e.message),
            username: profile.as_ref().map(|p| p.username.clone()),
            display_name: profile
                .as_ref()
                .map(|p| p.display_name.clone())
                .filter(|s| !s.is_empty()),
            profile_image_url: profile
                .map(|p| p.profile_image_url)
                .filter(|s| !s.is_empty()),
        }
    }
}

/// A linked account as shown to its owner. Session material stays server-side.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AccountDto {
    pub username: String,
    pub display_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub auto_login: bool,
    pub has_session: bool,
    pub is_default: bool,
}

impl AccountDto {
    fn new(account: AccountSettings, default: Option<&str>) -> Self {
        Self {
            is_default: default == Some(account.username.as_str()),
            has_session: account
                .session_data
                .as_ref()
                .is_some_and(|data| !data.is_empty()),
            username: account.username,
            display_name: account.display_name,
            profile_image_url: account.profile_image_url,
            is_active: account.is_active,
            auto_login: account.auto_login,
        }
    }
}

fn unknown_request(request_id: &str) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("Authentication request {} not found or expired", request_id),
    )
}

//=========================================================================================
// Auth Request Handlers
//=========================================================================================

/// Open an authentication request to be completed later with credentials.
#[utoipa::path(
    post,
    path = "/user/auth/twitter/request",
    responses(
        (status = 201, description = "Request created", body = AuthRequestResponse),
        (status = 400, description = "Missing or invalid x-user-id header")
    ),
    params(
        ("x-user-id" = String, Header, description = "UUID of the calling user.")
    )
)]
pub async fn start_auth_request_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = caller.require()?;
    let request_id = app_state.engine.start_auth(user_id).await;
    Ok((
        StatusCode::CREATED,
        Json(AuthRequestResponse {
            request_id,
            status: "pending".to_string(),
        }),
    ))
}

/// Poll an authentication request.
#[utoipa::path(
    get,
    path = "/user/auth/twitter/status/{request_id}",
    params(("request_id" = String, Path, description = "The auth request id.")),
    responses(
        (status = 200, description = "Current state", body = AuthStatusResponse),
        (status = 404, description = "Unknown or expired request")
    )
)]
pub async fn auth_request_status_handler(
    State(app_state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let request = app_state
        .engine
        .poll_auth(&request_id)
        .await
        .ok_or_else(|| unknown_request(&request_id))?;
    Ok(Json(AuthStatusResponse::from(request)))
}

/// Submit credentials for a pending authentication request.
///
/// The login runs before the response is sent. A request that already failed
/// is not processed again; open a new one to retry.
#[utoipa::path(
    post,
    path = "/user/auth/twitter/authenticate/{request_id}",
    request_body = CredentialsBody,
    params(("request_id" = String, Path, description = "The auth request id.")),
    responses(
        (status = 200, description = "Final state of the request", body = AuthStatusResponse),
        (status = 404, description = "Unknown or expired request")
    )
)]
pub async fn authenticate_request_handler(
    State(app_state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    Json(credentials): Json<CredentialsBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let submission = app_state
        .engine
        .submit_auth(&request_id, credentials.into())
        .await;
    let request = submission
        .request
        .ok_or_else(|| unknown_request(&request_id))?;
    if submission.accepted {
        info!("Auth request {} completed", request_id);
    }
    Ok(Json(AuthStatusResponse::from(request)))
}

/// Log in right away and link the account to the calling user.
#[utoipa::path(
    post,
    path = "/user/auth/twitter",
    request_body = CredentialsBody,
    responses(
        (status = 200, description = "Account linked", body = AccountDto),
        (status = 400, description = "Missing header or credentials"),
        (status = 401, description = "The platform rejected the login"),
        (status = 502, description = "Browser automation failed")
    ),
    params(
        ("x-user-id" = String, Header, description = "UUID of the calling user.")
    )
)]
pub async fn login_and_link_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(credentials): Json<CredentialsBody>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = caller.require()?;
    let engine = &app_state.engine;
    let account = engine
        .login_and_link(user_id, credentials.into())
        .await
        .map_err(|e| engine_error("Failed to link account", e))?;
    let default = engine
        .default_account(user_id)
        .await
        .map_err(|e| engine_error("Failed to link account", e))?;
    Ok(Json(AccountDto::new(account, default.as_deref())))
}

//=========================================================================================
// Linked Account Handlers
//=========================================================================================

/// List the caller's linked accounts.
#[utoipa::path(
    get,
    path = "/user/twitter-accounts",
    responses(
        (status = 200, description = "Linked accounts, oldest first", body = Vec<AccountDto>),
        (status = 400, description = "Missing or invalid x-user-id header")
    ),
    params(
        ("x-user-id" = String, Header, description = "UUID of the calling user.")
    )
)]
pub async fn list_accounts_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = caller.require()?;
    let engine = &app_state.engine;
    let accounts = engine
        .list_accounts(user_id)
        .await
        .map_err(|e| engine_error("Failed to list accounts", e))?;
    let default = engine
        .default_account(user_id)
        .await
        .map_err(|e| engine_error("Failed to list accounts", e))?;
    let accounts: Vec<AccountDto> = accounts
        .into_iter()
        .map(|account| AccountDto::new(account, default.as_deref()))
        .collect();
    Ok(Json(accounts))
}

#[utoipa::path(
    get,
    path = "/user/twitter-accounts/{username}",
    responses(
        (status = 200, description = "The linked account", body = AccountDto),
        (status = 404, description = "Not linked to this user")
    ),
    params(
        ("username" = String, Path, description = "The platform username."),
        ("x-user-id" = String, Header, description = "UUID of the calling user.")
    )
)]
pub async fn get_account_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = caller.require()?;
    let engine = &app_state.engine;
    let account = engine
        .get_account(user_id, &username)
        .await
        .map_err(|e| engine_error("Failed to load account", e))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                format!("Twitter account '{}' not found", username),
            )
        })?;
    let default = engine
        .default_account(user_id)
        .await
        .map_err(|e| engine_error("Failed to load account", e))?;
    Ok(Json(AccountDto::new(account, default.as_deref())))
}

/// Unlink an account. If it was the default, the next remaining one takes over.
#[utoipa::path(
    delete,
    path = "/user/twitter-accounts/{username}",
    responses(
        (status = 200, description = "Removed", body = MessageResponse),
        (status = 404, description = "Not linked to this user")
    ),
    params(
        ("username" = String, Path, description = "The platform username."),
        ("x-user-id" = String, Header, description = "UUID of the calling user.")
    )
)]
pub async fn remove_account_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = caller.require()?;
    let removed = app_state
        .engine
        .remove_account(user_id, &username)
        .await
        .map_err(|e| engine_error("Failed to remove account", e))?;
    if !removed {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Twitter account '{}' not found", username),
        ));
    }
    info!("Unlinked account {} from user {}", username, user_id);
    Ok(Json(MessageResponse::new(format!(
        "Twitter account '{}' removed successfully",
        username
    ))))
}

#[utoipa::path(
    post,
    path = "/user/twitter-accounts/default/{username}",
    responses(
        (status = 200, description = "Default updated", body = MessageResponse),
        (status = 404, description = "Not linked to this user")
    ),
    params(
        ("username" = String, Path, description = "The platform username."),
        ("x-user-id" = String, Header, description = "UUID of the calling user.")
    )
)]
pub async fn set_default_account_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let user_id = caller.require()?;
    let updated = app_state
        .engine
        .set_default_account(user_id, &username)
        .await
        .map_err(|e| engine_error("Failed to set default account", e))?;
    if !updated {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Twitter account '{}' not found", username),
        ));
    }
    Ok(Json(MessageResponse::new(format!(
        "Twitter account '{}' set as default successfully",
        username
    ))))
}
