//! services/api/src/web/twitter.rs
//!
//! Handlers for posting, replying, threads, reads and the scheduled-item queue.
//! Each handler converts its payload into an engine request and maps the
//! outcome back into the response shapes below.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use xengage_core::{FetchedItem, PostOutcome, PostRequest, ThreadRequest};

use crate::web::middleware::Caller;
use crate::web::rest::{engine_error, CredentialsBody, MessageResponse};
use crate::web::state::AppState;

const DEFAULT_TIMELINE_COUNT: usize = 20;
const MAX_TIMELINE_COUNT: usize = 100;

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct PostTweetRequest {
    pub content: String,
    /// Omit to post as the caller's default linked account.
    pub credentials: Option<CredentialsBody>,
    pub media_paths: Option<Vec<String>>,
    pub reply_to_id: Option<String>,
    pub thread_id: Option<String>,
    /// A strictly future time queues the post instead of publishing it.
    pub schedule_time: Option<DateTime<Utc>>,
}

impl PostTweetRequest {
    fn into_request(self) -> PostRequest {
        PostRequest {
            content: self.content,
            credentials: self.credentials.map(Into::into),
            media: self.media_paths.unwrap_or_default(),
            reply_to_id: self.reply_to_id,
            thread_id: self.thread_id,
            schedule_time: self.schedule_time,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct PostThreadRequest {
    pub tweets: Vec<String>,
    pub credentials: Option<CredentialsBody>,
    /// Media paths keyed by the index of the post they belong to.
    pub media_paths: Option<BTreeMap<usize, Vec<String>>>,
    pub schedule_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TimelineQuery {
    pub username: String,
    pub count: Option<usize>,
}

//=========================================================================================
// Responses
//=========================================================================================

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TweetResponse {
    pub success: bool,
    /// The platform id, or the scheduled item id when `scheduled` is set.
    pub tweet_id: Option<String>,
    pub tweet_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_media: Vec<String>,
    pub scheduled: bool,
    pub schedule_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ThreadResponse {
    pub success: bool,
    pub thread_id: Option<String>,
    pub tweet_ids: Option<Vec<String>>,
    pub first_tweet_url: Option<String>,
    pub scheduled: bool,
    pub schedule_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TweetDto {
    pub id: String,
    pub text: String,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    pub likes_count: u64,
    pub retweets_count: u64,
    pub replies_count: u64,
}

impl From<FetchedItem> for TweetDto {
    fn from(item: FetchedItem) -> Self {
        Self {
            id: item.id,
            text: item.text,
            author: item.author,
            created_at: item.created_at,
            likes_count: item.likes_count,
            retweets_count: item.reposts_count,
            replies_count: item.replies_count,
        }
    }
}

fn tweet_response(outcome: PostOutcome) -> TweetResponse {
    match outcome {
        PostOutcome::Posted(item) => TweetResponse {
            success: true,
            tweet_id: Some(item.id),
            tweet_url: Some(item.url),
            skipped_media: item.skipped_media,
            scheduled: false,
            schedule_time: None,
        },
        PostOutcome::Scheduled { id, schedule_time } => TweetResponse {
            success: true,
            tweet_id: Some(id),
            tweet_url: None,
            skipped_media: Vec::new(),
            scheduled: true,
            schedule_time: Some(schedule_time),
        },
        // A single post never produces a thread; report the first item if it does.
        PostOutcome::Thread(items) => {
            let first = items.into_iter().next();
            TweetResponse {
                success: first.is_some(),
                tweet_id: first.as_ref().map(|i| i.id.clone()),
                tweet_url: first.map(|i| i.url),
                skipped_media: Vec::new(),
                scheduled: false,
                schedule_time: None,
            }
        }
    }
}

fn thread_response(outcome: PostOutcome) -> ThreadResponse {
    match outcome {
        PostOutcome::Thread(items) => ThreadResponse {
            success: true,
            thread_id: items.first().map(|i| i.id.clone()),
            first_tweet_url: items.first().map(|i| i.url.clone()),
            tweet_ids: Some(items.into_iter().map(|i| i.id).collect()),
            scheduled: false,
            schedule_time: None,
        },
        PostOutcome::Scheduled { id, schedule_time } => ThreadResponse {
            success: true,
            thread_id: Some(id),
            tweet_ids: None,
            first_tweet_url: None,
            scheduled: true,
            schedule_time: Some(schedule_time),
        },
        PostOutcome::Posted(item) => ThreadResponse {
            success: true,
            thread_id: Some(item.id.clone()),
            first_tweet_url: Some(item.url),
            tweet_ids: Some(vec![item.id]),
            scheduled: false,
            schedule_time: None,
        },
    }
}

//=========================================================================================
// Posting Handlers
//=========================================================================================

/// Post (or schedule) a single item.
#[utoipa::path(
    post,
    path = "/twitter/post",
    request_body = PostTweetRequest,
    responses(
        (status = 200, description = "Posted or scheduled", body = TweetResponse),
        (status = 400, description = "Invalid request or no usable credentials"),
        (status = 401, description = "The platform rejected the login"),
        (status = 502, description = "Browser automation failed")
    ),
    params(
        ("x-user-id" = Option<String>, Header, description = "UUID of the calling user, for default-account resolution.")
    )
)]
pub async fn post_tweet_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<PostTweetRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let outcome = app_state
        .engine
        .post(caller.0, payload.into_request())
        .await
        .map_err(|e| engine_error("Failed to post", e))?;
    Ok(Json(tweet_response(outcome)))
}

/// Reply to an existing item.
#[utoipa::path(
    post,
    path = "/twitter/reply/{tweet_id}",
    request_body = PostTweetRequest,
    responses(
        (status = 200, description = "Reply posted or scheduled", body = TweetResponse),
        (status = 400, description = "Invalid request or no usable credentials"),
        (status = 401, description = "The platform rejected the login"),
        (status = 502, description = "Browser automation failed")
    ),
    params(
        ("tweet_id" = String, Path, description = "The item being replied to."),
        ("x-user-id" = Option<String>, Header, description = "UUID of the calling user, for default-account resolution.")
    )
)]
pub async fn reply_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Path(tweet_id): Path<String>,
    Json(payload): Json<PostTweetRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let outcome = app_state
        .engine
        .reply(caller.0, &tweet_id, payload.into_request())
        .await
        .map_err(|e| engine_error("Failed to reply", e))?;
    Ok(Json(tweet_response(outcome)))
}

/// Post (or schedule) a thread; each post replies to the previous one.
#[utoipa::path(
    post,
    path = "/twitter/post-thread",
    request_body = PostThreadRequest,
    responses(
        (status = 200, description = "Thread posted or scheduled", body = ThreadResponse),
        (status = 400, description = "Invalid request or no usable credentials"),
        (status = 401, description = "The platform rejected the login"),
        (status = 502, description = "Browser automation failed or the thread is incomplete")
    ),
    params(
        ("x-user-id" = Option<String>, Header, description = "UUID of the calling user, for default-account resolution.")
    )
)]
pub async fn post_thread_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<PostThreadRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let request = ThreadRequest {
        segments: payload.tweets,
        credentials: payload.credentials.map(Into::into),
        media: payload.media_paths.unwrap_or_default(),
        schedule_time: payload.schedule_time,
    };
    let outcome = app_state
        .engine
        .post_thread(caller.0, request)
        .await
        .map_err(|e| engine_error("Failed to post thread", e))?;
    Ok(Json(thread_response(outcome)))
}

//=========================================================================================
// Read Handlers
//=========================================================================================

/// Fetch recent items from a public timeline.
#[utoipa::path(
    get,
    path = "/twitter/fetch-timeline",
    params(TimelineQuery),
    responses(
        (status = 200, description = "Items in timeline order", body = Vec<TweetDto>),
        (status = 400, description = "Missing username"),
        (status = 502, description = "Browser automation failed")
    )
)]
pub async fn fetch_timeline_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<TimelineQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let count = query
        .count
        .unwrap_or(DEFAULT_TIMELINE_COUNT)
        .clamp(1, MAX_TIMELINE_COUNT);
    let items = app_state
        .engine
        .fetch_timeline(&query.username, count)
        .await
        .map_err(|e| engine_error("Failed to fetch timeline", e))?;
    Ok(Json(items.into_iter().map(TweetDto::from).collect::<Vec<_>>()))
}

/// Fetch one item by id.
#[utoipa::path(
    get,
    path = "/twitter/fetch-tweet/{tweet_id}",
    params(("tweet_id" = String, Path, description = "The item id.")),
    responses(
        (status = 200, description = "The item", body = TweetDto),
        (status = 404, description = "The item could not be found"),
        (status = 502, description = "Browser automation failed")
    )
)]
pub async fn fetch_tweet_handler(
    State(app_state): State<Arc<AppState>>,
    Path(tweet_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let item = app_state
        .engine
        .fetch_single(&tweet_id)
        .await
        .map_err(|e| engine_error("Failed to fetch tweet", e))?;
    match item {
        Some(item) => Ok(Json(TweetDto::from(item))),
        None => Err((StatusCode::NOT_FOUND, format!("Tweet {} not found", tweet_id))),
    }
}

//=========================================================================================
// Scheduled Item Handlers
//=========================================================================================

/// List scheduled posts and threads, including their outcomes once dispatched.
#[utoipa::path(
    get,
    path = "/twitter/scheduled",
    responses(
        (status = 200, description = "Scheduled items grouped into `posts` and `threads`")
    )
)]
pub async fn list_scheduled_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(app_state.engine.list_scheduled().await)
}

/// Cancel a pending scheduled item.
#[utoipa::path(
    delete,
    path = "/twitter/scheduled/{item_id}",
    params(("item_id" = String, Path, description = "The scheduled item id.")),
    responses(
        (status = 200, description = "Cancelled", body = MessageResponse),
        (status = 404, description = "No pending item with this id")
    )
)]
pub async fn cancel_scheduled_handler(
    State(app_state): State<Arc<AppState>>,
    Path(item_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if app_state.engine.cancel_scheduled(&item_id).await {
        info!("Cancelled scheduled item {}", item_id);
        Ok(Json(MessageResponse::new(format!(
            "Scheduled item {} deleted",
            item_id
        ))))
    } else {
        warn!("No pending scheduled item {}", item_id);
        Err((
            StatusCode::NOT_FOUND,
            format!("Scheduled item {} not found", item_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xengage_core::PostedItem;

    fn posted(id: &str) -> PostedItem {
        PostedItem {
            id: id.to_string(),
            url: format!("https://twitter.com/alice/status/{}", id),
            skipped_media: vec![],
        }
    }

    #[test]
    fn thread_response_lists_ids_in_order() {
        let response = thread_response(PostOutcome::Thread(vec![posted("1"), posted("2")]));
        assert_eq!(response.thread_id.as_deref(), Some("1"));
        assert_eq!(response.tweet_ids, Some(vec!["1".to_string(), "2".to_string()]));
        assert!(response.first_tweet_url.unwrap().ends_with("/status/1"));
    }

    #[test]
    fn scheduled_outcome_reports_the_queue_id() {
        let at = Utc::now();
        let response = tweet_response(PostOutcome::Scheduled {
            id: "scheduled-x".to_string(),
            schedule_time: at,
        });
        assert!(response.scheduled);
        assert_eq!(response.tweet_id.as_deref(), Some("scheduled-x"));
        assert_eq!(response.schedule_time, Some(at));
        assert!(response.tweet_url.is_none());
    }
}
