//! Session provider: who is signed in, what they are called, and whether
//! they hold elevated privileges.
//!
//! Account identity and the derived display name update synchronously with
//! auth transitions. The privilege flag is resolved in the background: it
//! defaults to `false`, a session role claim short-circuits it to `true`,
//! and otherwise the privilege table is consulted behind a per-user cache
//! with a hard timeout. A backend that hangs or errors leaves the user
//! unprivileged instead of wedging sign-in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use molkhas_gateway::{AuthEvent, AuthProvider, Gateway};
use molkhas_shared::{Account, ActionKind, AnalyticsEvent, UserId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

// ---------------------------------------------------------------------------
// Privilege cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct CachedPrivilege {
    privileged: bool,
    cached_at: Instant,
}

/// TTL cache of resolved privilege flags, keyed by user id.
///
/// Only successful lookups are cached; errors and timeouts fall back to
/// `false` without poisoning the cache, so the next attempt retries.
#[derive(Clone)]
pub struct PrivilegeCache {
    ttl: Duration,
    entries: Arc<RwLock<HashMap<UserId, CachedPrivilege>>>,
}

impl PrivilegeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Return the cached flag for `user` if it is still fresh.
    pub async fn get(&self, user: UserId) -> Option<bool> {
        let entries = self.entries.read().await;
        let entry = entries.get(&user)?;
        if entry.cached_at.elapsed() < self.ttl {
            Some(entry.privileged)
        } else {
            None
        }
    }

    pub async fn put(&self, user: UserId, privileged: bool) {
        self.entries.write().await.insert(
            user,
            CachedPrivilege {
                privileged,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drop the entry for `user`. Called on sign-out so a later session
    /// re-resolves from the backend.
    pub async fn invalidate(&self, user: UserId) {
        self.entries.write().await.remove(&user);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SessionState {
    account: Option<Account>,
    display_name: Option<String>,
    /// True until the initial session restore completes.
    loading: bool,
    privileged: bool,
    /// True while a privilege lookup is in flight.
    privilege_loading: bool,
}

/// Tracks the signed-in account and resolves its privilege level.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct Session {
    auth: Arc<dyn AuthProvider>,
    gateway: Arc<dyn Gateway>,
    config: ClientConfig,
    cache: PrivilegeCache,
    state: Arc<RwLock<SessionState>>,
    /// Users with a privilege lookup currently in flight; duplicate
    /// triggers for the same user are dropped.
    in_flight: Arc<Mutex<HashSet<UserId>>>,
}

impl Session {
    pub fn new(auth: Arc<dyn AuthProvider>, gateway: Arc<dyn Gateway>, config: ClientConfig) -> Self {
        let cache = PrivilegeCache::new(config.privilege_cache_ttl);
        Self {
            auth,
            gateway,
            config,
            cache,
            state: Arc::new(RwLock::new(SessionState {
                loading: true,
                ..Default::default()
            })),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Restore the persisted session, if any, and kick off privilege
    /// resolution for it. Called once at startup.
    pub async fn start(&self) {
        match self.auth.current_session().await {
            Ok(account) => self.apply_account(account, true).await,
            Err(e) => {
                warn!(error = %e, "Session restore failed, starting signed out");
                self.apply_account(None, false).await;
            }
        }
        self.state.write().await.loading = false;
    }

    /// React to an auth transition.
    ///
    /// Privilege is re-resolved only on sign-in; token refreshes update the
    /// account snapshot without touching the privilege flag.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(account) => {
                info!(user = %account.id, "Signed in");
                self.apply_account(Some(account), true).await;
            }
            AuthEvent::Refreshed(account) => {
                debug!(user = %account.id, "Session refreshed");
                self.apply_account(Some(account), false).await;
            }
            AuthEvent::SignedOut => {
                info!("Signed out");
                let outgoing = self.user_id().await;
                if let Some(user) = outgoing {
                    self.cache.invalidate(user).await;
                }
                self.apply_account(None, false).await;
            }
        }
    }

    /// Install `account` as the current identity. The display name is
    /// derived synchronously; privilege resolution, when requested, runs
    /// on a background task.
    async fn apply_account(&self, account: Option<Account>, resolve_privilege: bool) {
        {
            let mut state = self.state.write().await;
            state.display_name = account.as_ref().map(Account::display_name);
            match &account {
                Some(_) => {
                    if resolve_privilege {
                        // Pessimistic until the lookup lands.
                        state.privileged = false;
                        state.privilege_loading = true;
                    }
                }
                None => {
                    state.privileged = false;
                    state.privilege_loading = false;
                }
            }
            state.account = account.clone();
        }

        if resolve_privilege {
            if let Some(account) = account {
                let session = self.clone();
                tokio::spawn(async move {
                    session.check_privilege(account, true).await;
                });
            }
        }
    }

    /// Resolve the privilege flag for `account`.
    ///
    /// Fast path: a role claim in the session is trusted without a lookup.
    /// Otherwise the cache is consulted (unless `use_cache` is false) and
    /// finally the privilege table, bounded by the configured timeout.
    async fn check_privilege(&self, account: Account, use_cache: bool) {
        let user = account.id;

        if account.elevated_claim {
            debug!(user = %user, "Privilege granted by session role claim");
            self.cache.put(user, true).await;
            self.finish_check(user, true).await;
            return;
        }

        {
            let mut in_flight = self.in_flight.lock().await;
            if !in_flight.insert(user) {
                debug!(user = %user, "Privilege check already in flight");
                return;
            }
        }

        if use_cache {
            if let Some(cached) = self.cache.get(user).await {
                debug!(user = %user, privileged = cached, "Privilege served from cache");
                self.finish_check(user, cached).await;
                self.in_flight.lock().await.remove(&user);
                return;
            }
        }

        let lookup = timeout(
            self.config.privilege_check_timeout,
            self.gateway.is_privileged(user),
        )
        .await;

        let privileged = match lookup {
            Ok(Ok(flag)) => {
                self.cache.put(user, flag).await;
                flag
            }
            Ok(Err(e)) => {
                warn!(user = %user, error = %e, "Privilege lookup failed, treating as unprivileged");
                false
            }
            Err(_) => {
                warn!(user = %user, "Privilege lookup timed out, treating as unprivileged");
                false
            }
        };

        self.finish_check(user, privileged).await;
        self.in_flight.lock().await.remove(&user);
    }

    /// Record the outcome of a lookup, discarding it if the signed-in user
    /// changed while it was in flight.
    async fn finish_check(&self, user: UserId, privileged: bool) {
        let mut state = self.state.write().await;
        if state.account.as_ref().map(|a| a.id) == Some(user) {
            state.privileged = privileged;
            state.privilege_loading = false;
        } else {
            debug!(user = %user, "Discarding stale privilege result");
        }
    }

    /// Force a fresh privilege lookup for the current user, bypassing the
    /// cache. No-op when signed out.
    pub async fn refresh_privilege(&self) {
        let account = match self.account().await {
            Some(account) => account,
            None => return,
        };
        self.cache.invalidate(account.id).await;
        self.state.write().await.privilege_loading = true;
        self.check_privilege(account, false).await;
    }

    // -- Auth operations ----------------------------------------------------

    /// Sign in with email and password.
    ///
    /// The resulting state change also arrives through the auth event
    /// stream; applying it here as well keeps the session usable without a
    /// running event pump.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Account> {
        let account = self.auth.sign_in(email, password).await?;
        self.record_sign_in(account.id).await;
        self.apply_account(Some(account.clone()), true).await;
        Ok(account)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Account> {
        let account = self.auth.sign_up(email, password).await?;
        self.record_sign_in(account.id).await;
        self.apply_account(Some(account.clone()), true).await;
        Ok(account)
    }

    pub async fn sign_in_with_provider(&self, provider: &str) -> Result<Account> {
        let account = self.auth.sign_in_with_provider(provider).await?;
        self.record_sign_in(account.id).await;
        self.apply_account(Some(account.clone()), true).await;
        Ok(account)
    }

    pub async fn sign_out(&self) -> Result<()> {
        let outgoing = self.user_id().await;
        self.auth.sign_out().await?;
        if let Some(user) = outgoing {
            self.cache.invalidate(user).await;
        }
        self.apply_account(None, false).await;
        Ok(())
    }

    /// Update the profile display name and reflect it locally.
    pub async fn update_display_name(&self, name: &str) -> Result<()> {
        if self.account().await.is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        self.auth.update_profile_name(name).await?;
        let mut state = self.state.write().await;
        if let Some(account) = state.account.as_mut() {
            account.profile_name = Some(name.to_string());
        }
        state.display_name = state.account.as_ref().map(Account::display_name);
        Ok(())
    }

    pub async fn update_avatar(&self, url: &str) -> Result<()> {
        if self.account().await.is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        self.auth.update_avatar(url).await?;
        if let Some(account) = self.state.write().await.account.as_mut() {
            account.avatar_url = Some(url.to_string());
        }
        Ok(())
    }

    /// Usage analytics are best effort; a failed insert never fails the
    /// sign-in itself.
    async fn record_sign_in(&self, user: UserId) {
        let event = AnalyticsEvent::bare(user, ActionKind::SignIn, "session");
        if let Err(e) = self.gateway.record_event(event).await {
            warn!(user = %user, error = %e, "Could not record sign-in event");
        }
    }

    // -- Accessors ----------------------------------------------------------

    pub async fn account(&self) -> Option<Account> {
        self.state.read().await.account.clone()
    }

    pub async fn user_id(&self) -> Option<UserId> {
        self.state.read().await.account.as_ref().map(|a| a.id)
    }

    pub async fn display_name(&self) -> Option<String> {
        self.state.read().await.display_name.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.state.read().await.loading
    }

    pub async fn is_privileged(&self) -> bool {
        self.state.read().await.privileged
    }

    pub async fn privilege_loading(&self) -> bool {
        self.state.read().await.privilege_loading
    }

    /// The signed-in user id, or [`ClientError::NotAuthenticated`].
    pub(crate) async fn require_user(&self) -> Result<UserId> {
        self.user_id().await.ok_or(ClientError::NotAuthenticated)
    }

    /// Errors unless the signed-in user holds elevated privileges.
    pub(crate) async fn require_privileged(&self) -> Result<UserId> {
        let user = self.require_user().await?;
        if self.is_privileged().await {
            Ok(user)
        } else {
            Err(ClientError::NotPrivileged)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use molkhas_gateway::{MemoryAuth, MemoryGateway};

    async fn settle(session: &Session) {
        for _ in 0..200 {
            if !session.privilege_loading().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("privilege resolution never settled");
    }

    fn rig() -> (Session, Arc<MemoryAuth>, Arc<MemoryGateway>) {
        let auth = Arc::new(MemoryAuth::new());
        let gateway = Arc::new(MemoryGateway::new());
        let config = ClientConfig {
            privilege_check_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let session = Session::new(auth.clone(), gateway.clone(), config);
        (session, auth, gateway)
    }

    #[tokio::test]
    async fn test_start_without_session() {
        let (session, _auth, _gateway) = rig();
        assert!(session.is_loading().await);
        session.start().await;
        assert!(!session.is_loading().await);
        assert!(session.account().await.is_none());
        assert!(!session.is_privileged().await);
    }

    #[tokio::test]
    async fn test_privilege_resolved_from_table() {
        let (session, auth, gateway) = rig();
        let account = auth.register("amal@example.edu", "pw").await;
        gateway.grant_privilege(account.id).await;

        session.sign_in("amal@example.edu", "pw").await.unwrap();
        settle(&session).await;
        assert!(session.is_privileged().await);
        assert_eq!(session.display_name().await.as_deref(), Some("amal"));
    }

    #[tokio::test]
    async fn test_role_claim_short_circuits() {
        let (session, auth, _gateway) = rig();
        let mut account = auth.register("root@example.edu", "pw").await;
        account.elevated_claim = true;
        auth.register_account(account, "pw2").await;

        session.sign_in("root@example.edu", "pw2").await.unwrap();
        settle(&session).await;
        // Privileged without any row in the privilege table.
        assert!(session.is_privileged().await);
    }

    #[tokio::test]
    async fn test_slow_lookup_times_out_to_unprivileged() {
        let (session, auth, gateway) = rig();
        let account = auth.register("slow@example.edu", "pw").await;
        gateway.grant_privilege(account.id).await;
        gateway.set_privilege_latency(Some(Duration::from_secs(30)));

        session.sign_in("slow@example.edu", "pw").await.unwrap();
        settle(&session).await;
        assert!(!session.is_privileged().await);
        assert!(session.account().await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_does_not_retrigger_lookup() {
        let (session, auth, gateway) = rig();
        let account = auth.register("amal@example.edu", "pw").await;
        gateway.grant_privilege(account.id).await;

        session.sign_in("amal@example.edu", "pw").await.unwrap();
        settle(&session).await;
        assert!(session.is_privileged().await);

        // A refresh with a now-slow backend must not reset the flag.
        gateway.set_privilege_latency(Some(Duration::from_secs(30)));
        let refreshed = session.account().await.unwrap();
        session
            .handle_auth_event(AuthEvent::Refreshed(refreshed))
            .await;
        assert!(session.is_privileged().await);
        assert!(!session.privilege_loading().await);
    }

    #[tokio::test]
    async fn test_sign_out_invalidates_cache() {
        let (session, auth, gateway) = rig();
        let account = auth.register("amal@example.edu", "pw").await;
        gateway.grant_privilege(account.id).await;

        session.sign_in("amal@example.edu", "pw").await.unwrap();
        settle(&session).await;
        assert!(session.is_privileged().await);

        session.sign_out().await.unwrap();
        assert!(session.account().await.is_none());
        assert!(!session.is_privileged().await);

        // Privilege was revoked while signed out; a fresh sign-in must see
        // the revocation instead of the cached flag.
        gateway.revoke_privilege(account.id).await;
        session.sign_in("amal@example.edu", "pw").await.unwrap();
        settle(&session).await;
        assert!(!session.is_privileged().await);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let (session, auth, gateway) = rig();
        let account = auth.register("amal@example.edu", "pw").await;
        gateway.grant_privilege(account.id).await;

        gateway.set_fail_reads(true);
        session.sign_in("amal@example.edu", "pw").await.unwrap();
        settle(&session).await;
        assert!(!session.is_privileged().await);

        // Backend recovers; a forced re-check resolves correctly.
        gateway.set_fail_reads(false);
        session.refresh_privilege().await;
        assert!(session.is_privileged().await);
    }

    #[tokio::test]
    async fn test_privilege_cache_expires_and_invalidates() {
        let cache = PrivilegeCache::new(Duration::from_millis(30));
        let user = UserId::new();

        cache.put(user, true).await;
        assert_eq!(cache.get(user).await, Some(true));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.get(user).await, None);

        cache.put(user, true).await;
        cache.invalidate(user).await;
        assert_eq!(cache.get(user).await, None);
    }

    #[tokio::test]
    async fn test_display_name_update() {
        let (session, auth, _gateway) = rig();
        auth.register("amal@example.edu", "pw").await;
        session.sign_in("amal@example.edu", "pw").await.unwrap();

        session.update_display_name("Amal K").await.unwrap();
        assert_eq!(session.display_name().await.as_deref(), Some("Amal K"));
    }
}
