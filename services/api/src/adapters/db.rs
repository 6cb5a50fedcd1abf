//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `AccountStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;
use xengage_core::domain::{AccountSettings, SessionData};
use xengage_core::ports::{AccountStore, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `AccountStore` port.
#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Creates a new `PgAccountStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AccountRecord {
    username: String,
    display_name: Option<String>,
    profile_image_url: Option<String>,
    is_active: bool,
    auto_login: bool,
    session_data: Option<Json<SessionData>>,
}

impl AccountRecord {
    fn to_domain(self) -> AccountSettings {
        AccountSettings {
            username: self.username,
            display_name: self.display_name,
            profile_image_url: self.profile_image_url,
            is_active: self.is_active,
            auto_login: self.auto_login,
            session_data: self.session_data.map(|Json(data)| data),
        }
    }
}

const ACCOUNT_COLUMNS: &str =
    "username, display_name, profile_image_url, is_active, auto_login, session_data";

//=========================================================================================
// `AccountStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn get_account(&self, user_id: Uuid, username: &str) -> PortResult<Option<AccountSettings>> {
        let record = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {} FROM twitter_accounts WHERE user_id = $1 AND username = $2",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(AccountRecord::to_domain))
    }

    async fn link_account(&self, user_id: Uuid, account: AccountSettings) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "INSERT INTO twitter_accounts \
                 (user_id, username, display_name, profile_image_url, is_active, auto_login, session_data) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (user_id, username) DO UPDATE SET \
                 display_name = EXCLUDED.display_name, \
                 profile_image_url = EXCLUDED.profile_image_url, \
                 is_active = EXCLUDED.is_active, \
                 auto_login = EXCLUDED.auto_login, \
                 session_data = EXCLUDED.session_data, \
                 updated_at = NOW()",
        )
        .bind(user_id)
        .bind(&account.username)
        .bind(&account.display_name)
        .bind(&account.profile_image_url)
        .bind(account.is_active)
        .bind(account.auto_login)
        .bind(account.session_data.as_ref().map(Json))
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        // The first linked account becomes the default.
        let defaulted = sqlx::query(
            "INSERT INTO account_defaults (user_id, username) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(&account.username)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        if defaulted.rows_affected() > 0 {
            info!("Account {} is now the default for {}", account.username, user_id);
        }
        Ok(true)
    }

    async fn list_accounts(&self, user_id: Uuid) -> PortResult<Vec<AccountSettings>> {
        let records = sqlx::query_as::<_, AccountRecord>(&format!(
            "SELECT {} FROM twitter_accounts WHERE user_id = $1 ORDER BY linked_at ASC",
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(AccountRecord::to_domain).collect())
    }

    async fn remove_account(&self, user_id: Uuid, username: &str) -> PortResult<bool> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Deleting the account cascades to its default row, if it had one.
        let removed = sqlx::query("DELETE FROM twitter_accounts WHERE user_id = $1 AND username = $2")
            .bind(user_id)
            .bind(username)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        if removed.rows_affected() == 0 {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO account_defaults (user_id, username) \
             SELECT user_id, username FROM twitter_accounts WHERE user_id = $1 \
             ORDER BY linked_at ASC LIMIT 1 \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(true)
    }

    async fn default_account(&self, user_id: Uuid) -> PortResult<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT username FROM account_defaults WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)
    }

    async fn set_default_account(&self, user_id: Uuid, username: &str) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT INTO account_defaults (user_id, username) \
             SELECT user_id, username FROM twitter_accounts WHERE user_id = $1 AND username = $2 \
             ON CONFLICT (user_id) DO UPDATE SET username = EXCLUDED.username",
        )
        .bind(user_id)
        .bind(username)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            warn!("Cannot make {} the default for {}: not linked", username, user_id);
        }
        Ok(result.rows_affected() > 0)
    }
}
