//! Auth collaborator contract and its in-memory stand-in.
//!
//! Session management, password storage, and federation all live in
//! the hosted auth service; the core only consumes the current session
//! and a broadcast of auth-state transitions.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};
use tracing::info;

use molkhas_shared::{Account, UserId};

use crate::error::AuthError;

/// Auth-state transition delivered to watchers.
///
/// `Refreshed` is an incidental session refresh (token renewal, tab
/// refocus): identity is unchanged and privilege must not be
/// re-resolved for it.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Account),
    SignedOut,
    Refreshed(Account),
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The currently signed-in account, if any.
    async fn current_session(&self) -> Result<Option<Account>, AuthError>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Account, AuthError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<Account, AuthError>;

    /// Federated sign-in through a named external provider.
    async fn sign_in_with_provider(&self, provider: &str) -> Result<Account, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Update the signed-in user's explicit profile name.
    async fn update_profile_name(&self, name: &str) -> Result<(), AuthError>;

    /// Update the signed-in user's avatar reference.
    async fn update_avatar(&self, url: &str) -> Result<(), AuthError>;

    /// Watch auth-state transitions.
    fn watch(&self) -> broadcast::Receiver<AuthEvent>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct StoredUser {
    password: String,
    account: Account,
}

#[derive(Default)]
struct AuthState {
    users: HashMap<String, StoredUser>,
    federated: HashMap<String, Account>,
    current: Option<Account>,
}

/// In-memory [`AuthProvider`] for local development and tests.
pub struct MemoryAuth {
    state: RwLock<AuthState>,
    events: broadcast::Sender<AuthEvent>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: RwLock::new(AuthState::default()),
            events,
        }
    }

    /// Seed a password account without signing it in.
    pub async fn register(&self, email: &str, password: &str) -> Account {
        let account = Account {
            id: UserId::new(),
            email: email.to_string(),
            profile_name: None,
            provider_name: None,
            avatar_url: None,
            elevated_claim: false,
        };
        self.register_account(account.clone(), password).await;
        account
    }

    /// Seed a fully specified account (e.g. with an elevated role
    /// claim) without signing it in.
    pub async fn register_account(&self, account: Account, password: &str) {
        let mut state = self.state.write().await;
        state.users.insert(
            account.email.clone(),
            StoredUser {
                password: password.to_string(),
                account,
            },
        );
    }

    /// Seed the account a federated provider would return.
    pub async fn seed_federated(&self, provider: &str, account: Account) {
        let mut state = self.state.write().await;
        state.federated.insert(provider.to_string(), account);
    }

    /// Re-announce the current session, as the hosted service does on
    /// incidental refreshes.
    pub async fn refresh(&self) {
        let state = self.state.read().await;
        if let Some(account) = &state.current {
            let _ = self.events.send(AuthEvent::Refreshed(account.clone()));
        }
    }

    fn announce(&self, event: AuthEvent) {
        // No watchers is fine (e.g. before the client boots).
        let _ = self.events.send(event);
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MemoryAuth {
    async fn current_session(&self) -> Result<Option<Account>, AuthError> {
        Ok(self.state.read().await.current.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        let mut state = self.state.write().await;
        let stored = state
            .users
            .get(email)
            .filter(|u| u.password == password)
            .ok_or(AuthError::InvalidCredentials)?;
        let account = stored.account.clone();
        state.current = Some(account.clone());
        drop(state);

        info!(user = %account.id, "user signed in");
        self.announce(AuthEvent::SignedIn(account.clone()));
        Ok(account)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        {
            let state = self.state.read().await;
            if state.users.contains_key(email) {
                return Err(AuthError::EmailTaken);
            }
        }
        let account = self.register(email, password).await;
        self.state.write().await.current = Some(account.clone());
        self.announce(AuthEvent::SignedIn(account.clone()));
        Ok(account)
    }

    async fn sign_in_with_provider(&self, provider: &str) -> Result<Account, AuthError> {
        let mut state = self.state.write().await;
        let account = state
            .federated
            .get(provider)
            .cloned()
            .ok_or_else(|| AuthError::UnknownProvider(provider.to_string()))?;
        state.current = Some(account.clone());
        drop(state);

        info!(user = %account.id, provider, "federated sign-in");
        self.announce(AuthEvent::SignedIn(account.clone()));
        Ok(account)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        if state.current.take().is_none() {
            return Err(AuthError::NotSignedIn);
        }
        drop(state);

        self.announce(AuthEvent::SignedOut);
        Ok(())
    }

    async fn update_profile_name(&self, name: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        let account = state.current.as_mut().ok_or(AuthError::NotSignedIn)?;
        account.profile_name = Some(name.to_string());
        let updated = account.clone();
        if let Some(stored) = state.users.get_mut(&updated.email) {
            stored.account = updated.clone();
        }
        drop(state);

        self.announce(AuthEvent::Refreshed(updated));
        Ok(())
    }

    async fn update_avatar(&self, url: &str) -> Result<(), AuthError> {
        let mut state = self.state.write().await;
        let account = state.current.as_mut().ok_or(AuthError::NotSignedIn)?;
        account.avatar_url = Some(url.to_string());
        let updated = account.clone();
        if let Some(stored) = state.users.get_mut(&updated.email) {
            stored.account = updated.clone();
        }
        drop(state);

        self.announce(AuthEvent::Refreshed(updated));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
