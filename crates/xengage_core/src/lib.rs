pub mod accounts;
pub mod auth;
pub mod auth_registry;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod platform;
pub mod ports;
pub mod scheduler;
pub mod session;

pub use accounts::InMemoryAccountStore;
pub use auth::{AuthStateMachine, Authenticator, LoginSuccess};
pub use auth_registry::AuthRequestRegistry;
pub use domain::{AccountSettings, ActionAuth, ActionOutput, ActionSpec, AuthRequest, AuthRequestStatus,
    Credentials, FetchedItem, PostedItem, ProfileData, ScheduledAction, ScheduledPayload, ScheduledResult,
    ScheduledStatus, SegmentMedia, Session, SessionCookie, SessionData};
pub use engine::{AuthSubmission, Engine, PostOutcome, PostRequest, ThreadRequest};
pub use error::{AutomationError, EngineError, ErrorClass, FailureReport, QueueError};
pub use executor::{ActionExecutor, ActionReport, BrowserActionExecutor};
pub use platform::{AutomationTimeouts, PlatformUrls};
pub use ports::{AccountStore, BrowserLauncher, BrowserPage, Clock, ManualClock, PortError, PortResult, SystemClock};
pub use scheduler::{spawn_dispatcher, ActionDispatch, Dispatcher, ScheduledListing, SchedulingQueue};
pub use session::SessionStore;
