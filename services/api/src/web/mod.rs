pub mod accounts;
pub mod middleware;
pub mod rest;
pub mod state;
pub mod twitter;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::web::state::AppState;

/// Builds the API routes. CORS and Swagger UI are layered on by the binary.
pub fn router(app_state: Arc<AppState>) -> Router {
    let twitter_routes = Router::new()
        .route("/twitter/post", post(twitter::post_tweet_handler))
        .route("/twitter/post-thread", post(twitter::post_thread_handler))
        .route("/twitter/reply/{tweet_id}", post(twitter::reply_handler))
        .route("/twitter/fetch-timeline", get(twitter::fetch_timeline_handler))
        .route("/twitter/fetch-tweet/{tweet_id}", get(twitter::fetch_tweet_handler))
        .route("/twitter/scheduled", get(twitter::list_scheduled_handler))
        .route(
            "/twitter/scheduled/{item_id}",
            delete(twitter::cancel_scheduled_handler),
        );

    let account_routes = Router::new()
        .route("/user/auth/twitter", post(accounts::login_and_link_handler))
        .route(
            "/user/auth/twitter/request",
            post(accounts::start_auth_request_handler),
        )
        .route(
            "/user/auth/twitter/status/{request_id}",
            get(accounts::auth_request_status_handler),
        )
        .route(
            "/user/auth/twitter/authenticate/{request_id}",
            post(accounts::authenticate_request_handler),
        )
        .route("/user/twitter-accounts", get(accounts::list_accounts_handler))
        .route(
            "/user/twitter-accounts/{username}",
            get(accounts::get_account_handler).delete(accounts::remove_account_handler),
        )
        .route(
            "/user/twitter-accounts/default/{username}",
            post(accounts::set_default_account_handler),
        );

    Router::new()
        .merge(twitter_routes)
        .merge(account_routes)
        .layer(axum_middleware::from_fn(middleware::identify_caller))
        .with_state(app_state)
}
