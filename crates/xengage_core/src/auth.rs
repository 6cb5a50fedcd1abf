//! crates/xengage_core/src/auth.rs
//!
//! The Authentication State Machine. Drives one login attempt on a page from
//! the username prompt through the optional verification and two-factor
//! branches to either an authenticated session or a typed failure.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{Credentials, ProfileData, Session};
use crate::error::{AutomationError, StepContext};
use crate::platform::{first_present, selectors, AutomationTimeouts, PlatformUrls};
use crate::ports::BrowserPage;
use crate::session::SessionStore;

/// States of a single login attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    Start,
    UsernameSubmitted,
    PasswordPrompted,
    TwoFactorPrompted,
    PostLoginWait { two_factor_submitted: bool },
    Authenticated,
    VerificationRequired,
    TwoFactorRequiredMissing,
    LoginFailed(AutomationError),
}

impl AuthState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Authenticated
                | Self::VerificationRequired
                | Self::TwoFactorRequiredMissing
                | Self::LoginFailed(_)
        )
    }
}

/// What a successful login produces.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub session: Session,
    pub profile: ProfileData,
}

/// Anything that can turn credentials into a session. The browser executor
/// implements this; the auth request registry only sees the trait.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginSuccess, AutomationError>;
}

pub struct AuthStateMachine {
    urls: PlatformUrls,
    timeouts: AutomationTimeouts,
    sessions: Arc<SessionStore>,
}

impl AuthStateMachine {
    pub fn new(urls: PlatformUrls, timeouts: AutomationTimeouts, sessions: Arc<SessionStore>) -> Self {
        Self {
            urls,
            timeouts,
            sessions,
        }
    }

    /// Runs the machine to a terminal state on `page`.
    pub async fn authenticate(
        &self,
        page: &dyn BrowserPage,
        credentials: &Credentials,
    ) -> Result<LoginSuccess, AutomationError> {
        let mut state = AuthState::Start;
        while !state.is_terminal() {
            let next = self.advance(state, page, credentials).await;
            debug!("Login for {} moved to {:?}", credentials.username, next);
            state = next;
        }

        match state {
            AuthState::Authenticated => {
                let profile = self.extract_profile(page).await;
                let key = if profile.username.is_empty() {
                    credentials.username.as_str()
                } else {
                    profile.username.as_str()
                };
                let session = self
                    .sessions
                    .capture(key, page)
                    .await
                    .map_err(|e| AutomationError::Unexpected(format!("session capture failed: {}", e)))?;
                info!("Login for {} succeeded", credentials.username);
                Ok(LoginSuccess { session, profile })
            }
            AuthState::VerificationRequired => {
                info!("Unusual activity detected for {}, verification required", credentials.username);
                Err(AutomationError::VerificationRequired)
            }
            AuthState::TwoFactorRequiredMissing => Err(AutomationError::TwoFactorRequired),
            AuthState::LoginFailed(err) => {
                warn!("Login for {} failed: {}", credentials.username, err);
                Err(err)
            }
            other => Err(AutomationError::Unexpected(format!(
                "login stopped in non-terminal state {:?}",
                other
            ))),
        }
    }

    /// Performs the work of `state` and returns the state it leads to.
    async fn advance(
        &self,
        state: AuthState,
        page: &dyn BrowserPage,
        credentials: &Credentials,
    ) -> AuthState {
        let t = &self.timeouts;
        match state {
            AuthState::Start => match self.submit_username(page, credentials).await {
                Ok(()) => AuthState::UsernameSubmitted,
                Err(e) => AuthState::LoginFailed(e),
            },

            AuthState::UsernameSubmitted => {
                let branch = first_present(
                    page,
                    &[selectors::VERIFICATION_INPUT, selectors::PASSWORD_INPUT],
                    t.prompt,
                    t.poll,
                )
                .await;
                match branch {
                    Ok(Some(0)) => AuthState::VerificationRequired,
                    Ok(Some(_)) => AuthState::PasswordPrompted,
                    Ok(None) => AuthState::LoginFailed(AutomationError::InvalidCredentials {
                        detail: self.platform_error(page).await,
                    }),
                    Err(e) => AuthState::LoginFailed(AutomationError::step("detect login prompt", e.to_string())),
                }
            }

            AuthState::PasswordPrompted => {
                let submitted = async {
                    page.fill(selectors::PASSWORD_INPUT, &credentials.password).await?;
                    page.click(selectors::LOGIN_BUTTON).await
                }
                .await;
                if let Err(e) = submitted {
                    warn!("Password submission failed: {}", e);
                    return AuthState::LoginFailed(AutomationError::InvalidCredentials { detail: None });
                }

                let branch = first_present(
                    page,
                    &[
                        selectors::TWO_FACTOR_INPUT,
                        selectors::HOME_LANDMARK,
                        selectors::LOGIN_ERROR,
                    ],
                    t.prompt,
                    t.poll,
                )
                .await;
                match branch {
                    Ok(Some(0)) => AuthState::TwoFactorPrompted,
                    Ok(Some(2)) => AuthState::LoginFailed(AutomationError::InvalidCredentials {
                        detail: self.platform_error(page).await,
                    }),
                    // Landmark already visible, or nothing yet: keep waiting for the landmark.
                    Ok(_) => AuthState::PostLoginWait {
                        two_factor_submitted: false,
                    },
                    Err(e) => AuthState::LoginFailed(AutomationError::step("detect login result", e.to_string())),
                }
            }

            AuthState::TwoFactorPrompted => {
                let code = match credentials.two_factor_code.as_deref() {
                    Some(code) if !code.trim().is_empty() => code,
                    _ => return AuthState::TwoFactorRequiredMissing,
                };
                let submitted = async {
                    page.fill(selectors::TWO_FACTOR_INPUT, code.trim()).await?;
                    page.click(selectors::LOGIN_BUTTON).await
                }
                .await;
                match submitted.step("submit two-factor code") {
                    Ok(()) => AuthState::PostLoginWait {
                        two_factor_submitted: true,
                    },
                    Err(e) => AuthState::LoginFailed(e),
                }
            }

            AuthState::PostLoginWait {
                two_factor_submitted,
            } => {
                let outcome = first_present(
                    page,
                    &[selectors::HOME_LANDMARK, selectors::LOGIN_ERROR],
                    t.login,
                    t.poll,
                )
                .await;
                match outcome {
                    Ok(Some(0)) => AuthState::Authenticated,
                    Ok(Some(_)) if two_factor_submitted => {
                        AuthState::LoginFailed(AutomationError::TwoFactorInvalid)
                    }
                    Ok(Some(_)) => AuthState::LoginFailed(AutomationError::InvalidCredentials {
                        detail: self.platform_error(page).await,
                    }),
                    Ok(None) => {
                        let still_on_code = two_factor_submitted
                            && page
                                .wait_for(selectors::TWO_FACTOR_INPUT, Duration::ZERO)
                                .await
                                .unwrap_or(false);
                        if still_on_code {
                            AuthState::LoginFailed(AutomationError::TwoFactorInvalid)
                        } else {
                            AuthState::LoginFailed(AutomationError::LoginTimeout {
                                detail: self.platform_error(page).await,
                            })
                        }
                    }
                    Err(e) => AuthState::LoginFailed(AutomationError::step("wait for home", e.to_string())),
                }
            }

            terminal => terminal,
        }
    }

    async fn submit_username(
        &self,
        page: &dyn BrowserPage,
        credentials: &Credentials,
    ) -> Result<(), AutomationError> {
        page.goto(&self.urls.login()).await.step("open login page")?;
        let ready = page
            .wait_for(selectors::USERNAME_INPUT, self.timeouts.element)
            .await
            .step("wait for username prompt")?;
        if !ready {
            return Err(AutomationError::step(
                "wait for username prompt",
                "login form did not appear",
            ));
        }
        page.fill(selectors::USERNAME_INPUT, &credentials.username)
            .await
            .step("enter username")?;
        page.click(selectors::USERNAME_NEXT).await.step("submit username")
    }

    /// Reads the platform's own error banner, if one is showing.
    async fn platform_error(&self, page: &dyn BrowserPage) -> Option<String> {
        match page.wait_for(selectors::LOGIN_ERROR, Duration::ZERO).await {
            Ok(true) => page
                .text_of(selectors::LOGIN_ERROR)
                .await
                .ok()
                .flatten()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            _ => None,
        }
    }

    /// Opens the account switcher and reads handle, display name and avatar.
    /// Each field falls back to an empty string.
    async fn extract_profile(&self, page: &dyn BrowserPage) -> ProfileData {
        let opened = async {
            if !page.wait_for(selectors::ACCOUNT_SWITCHER, self.timeouts.element).await? {
                return Ok(false);
            }
            page.click(selectors::ACCOUNT_SWITCHER).await?;
            page.wait_for(selectors::USER_CELL, self.timeouts.element).await
        }
        .await;
        if !matches!(opened, Ok(true)) {
            warn!("Account menu did not open; profile data left empty");
            return ProfileData::default();
        }

        let text = |selector: &'static str| async move {
            page.text_of(selector).await.ok().flatten().unwrap_or_default()
        };
        let handle = text(selectors::USER_CELL_HANDLE).await;
        let display_name = text(selectors::USER_CELL_NAME).await;
        let profile_image_url = page
            .attribute_of(selectors::USER_CELL_AVATAR, "src")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();

        if let Err(e) = page.click(selectors::PRIMARY_COLUMN).await {
            debug!("Could not dismiss account menu: {}", e);
        }

        ProfileData {
            username: handle.trim().trim_start_matches('@').to_string(),
            display_name: display_name.trim().to_string(),
            profile_image_url,
        }
    }
}
