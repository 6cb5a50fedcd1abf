//! crates/xengage_core/src/accounts.rs
//!
//! An in-process implementation of the account store port. Used when no
//! database is configured, and by tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::AccountSettings;
use crate::ports::{AccountStore, PortResult};

#[derive(Default)]
struct UserAccounts {
    /// Kept in link order so "the next remaining account" is well defined.
    accounts: Vec<AccountSettings>,
    default: Option<String>,
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    users: RwLock<HashMap<Uuid, UserAccounts>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get_account(&self, user_id: Uuid, username: &str) -> PortResult<Option<AccountSettings>> {
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .and_then(|u| u.accounts.iter().find(|a| a.username == username))
            .cloned())
    }

    async fn link_account(&self, user_id: Uuid, account: AccountSettings) -> PortResult<bool> {
        let mut users = self.users.write().await;
        let user = users.entry(user_id).or_default();
        match user.accounts.iter_mut().find(|a| a.username == account.username) {
            Some(existing) => *existing = account,
            None => {
                if user.default.is_none() {
                    user.default = Some(account.username.clone());
                }
                user.accounts.push(account);
            }
        }
        Ok(true)
    }

    async fn list_accounts(&self, user_id: Uuid) -> PortResult<Vec<AccountSettings>> {
        let users = self.users.read().await;
        Ok(users
            .get(&user_id)
            .map(|u| u.accounts.clone())
            .unwrap_or_default())
    }

    async fn remove_account(&self, user_id: Uuid, username: &str) -> PortResult<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        let before = user.accounts.len();
        user.accounts.retain(|a| a.username != username);
        if user.accounts.len() == before {
            return Ok(false);
        }
        if user.default.as_deref() == Some(username) {
            user.default = user.accounts.first().map(|a| a.username.clone());
        }
        Ok(true)
    }

    async fn default_account(&self, user_id: Uuid) -> PortResult<Option<String>> {
        let users = self.users.read().await;
        Ok(users.get(&user_id).and_then(|u| u.default.clone()))
    }

    async fn set_default_account(&self, user_id: Uuid, username: &str) -> PortResult<bool> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&user_id) else {
            return Ok(false);
        };
        if !user.accounts.iter().any(|a| a.username == username) {
            return Ok(false);
        }
        user.default = Some(username.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(username: &str) -> AccountSettings {
        AccountSettings {
            username: username.to_string(),
            display_name: None,
            profile_image_url: None,
            is_active: true,
            auto_login: true,
            session_data: None,
        }
    }

    #[tokio::test]
    async fn first_linked_account_becomes_default() {
        let store = InMemoryAccountStore::new();
        let user = Uuid::new_v4();
        store.link_account(user, account("alice")).await.unwrap();
        store.link_account(user, account("bob")).await.unwrap();

        assert_eq!(store.default_account(user).await.unwrap().as_deref(), Some("alice"));
        assert_eq!(store.list_accounts(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn relinking_replaces_instead_of_duplicating() {
        let store = InMemoryAccountStore::new();
        let user = Uuid::new_v4();
        store.link_account(user, account("alice")).await.unwrap();
        let mut updated = account("alice");
        updated.display_name = Some("Alice".to_string());
        store.link_account(user, updated).await.unwrap();

        let accounts = store.list_accounts(user).await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].display_name.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn removing_default_promotes_next() {
        let store = InMemoryAccountStore::new();
        let user = Uuid::new_v4();
        store.link_account(user, account("alice")).await.unwrap();
        store.link_account(user, account("bob")).await.unwrap();

        assert!(store.remove_account(user, "alice").await.unwrap());
        assert_eq!(store.default_account(user).await.unwrap().as_deref(), Some("bob"));
        assert!(!store.remove_account(user, "alice").await.unwrap());

        assert!(store.remove_account(user, "bob").await.unwrap());
        assert_eq!(store.default_account(user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn default_must_be_a_linked_account() {
        let store = InMemoryAccountStore::new();
        let user = Uuid::new_v4();
        store.link_account(user, account("alice")).await.unwrap();
        store.link_account(user, account("bob")).await.unwrap();

        assert!(!store.set_default_account(user, "carol").await.unwrap());
        assert!(store.set_default_account(user, "bob").await.unwrap());
        assert_eq!(store.default_account(user).await.unwrap().as_deref(), Some("bob"));
    }
}
