use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::identity::{Actor, IdentityProvider, OAuthProvider, SignUpOutcome};
use crate::storage::{LocalStorage, keys, load_json, save_json};
use crate::toast::Toasts;

pub const SESSION_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CachedActor {
    actor: Actor,
    fetched_at: DateTime<Utc>,
}

impl CachedActor {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.fetched_at <= now
            && now.signed_duration_since(self.fetched_at) <= Duration::minutes(SESSION_TTL_MINUTES)
    }
}

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    storage: Arc<dyn LocalStorage>,
    toasts: Toasts,
    redirect_url: Option<String>,
    cache: Mutex<Option<CachedActor>>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        storage: Arc<dyn LocalStorage>,
        toasts: Toasts,
        redirect_url: Option<String>,
    ) -> Self {
        let cache = match load_json::<CachedActor>(storage.as_ref(), keys::SESSION_CACHE) {
            Ok(cache) => cache,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "ignoring unreadable session cache");
                None
            }
        };

        Self {
            provider,
            storage,
            toasts,
            redirect_url,
            cache: Mutex::new(cache),
        }
    }

    pub fn current(&self) -> Option<Actor> {
        self.cache.lock().as_ref().map(|cached| cached.actor.clone())
    }

    pub fn is_offline(&self) -> bool {
        self.storage
            .contains(keys::OFFLINE_MARKER)
            .unwrap_or(false)
    }

    #[tracing::instrument(skip(self))]
    pub async fn fetch_user(&self, force_refresh: bool) -> Option<Actor> {
        let now = Utc::now();
        if !force_refresh {
            let cached = self.cache.lock().clone();
            if let Some(cached) = cached
                && cached.is_fresh(now)
            {
                debug!(actor = %cached.actor.id(), "session cache hit");
                return Some(cached.actor);
            }
        }

        if self.is_offline() {
            let actor = self.offline_actor();
            debug!(actor = %actor.id(), "using offline stand-in actor");
            self.remember(Some(actor.clone()), now);
            return Some(actor);
        }

        match self.provider.current_actor().await {
            Ok(actor) => {
                debug!(signed_in = actor.is_some(), "identity provider answered");
                self.remember(actor.clone(), now);
                actor
            }
            Err(err) => {
                self.report("Fetch user", &err);
                None
            }
        }
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn sign_up(&self, email: &str, password: &str) -> Option<SignUpOutcome> {
        match self
            .provider
            .sign_up(email, password, self.redirect_url.as_deref())
            .await
        {
            Ok(outcome) => {
                if outcome.already_registered {
                    self.toasts
                        .warning("This email is already registered but not confirmed yet");
                } else if outcome.confirmation_required {
                    self.toasts
                        .info("Check your email for the confirmation link");
                } else {
                    self.remember(outcome.actor.clone(), Utc::now());
                    self.toasts.success("Account created");
                }
                Some(outcome)
            }
            Err(err) => {
                self.report("Sign up", &err);
                None
            }
        }
    }

    #[tracing::instrument(skip(self, password))]
    pub async fn sign_in(&self, email: &str, password: &str) -> Option<Actor> {
        match self.provider.sign_in_with_password(email, password).await {
            Ok(actor) => {
                info!(actor = %actor.id(), "signed in");
                self.remember(Some(actor.clone()), Utc::now());
                self.toasts
                    .success(format!("Signed in as {}", actor.email().unwrap_or(actor.id())));
                Some(actor)
            }
            Err(err) => {
                self.report("Sign in", &err);
                None
            }
        }
    }

    pub async fn sign_in_with_google(&self) -> Option<String> {
        self.sign_in_with_oauth(OAuthProvider::Google).await
    }

    pub async fn sign_in_with_github(&self) -> Option<String> {
        self.sign_in_with_oauth(OAuthProvider::Github).await
    }

    #[tracing::instrument(skip(self))]
    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> Option<String> {
        match self
            .provider
            .sign_in_with_oauth(provider, self.redirect_url.as_deref())
            .await
        {
            Ok(url) => Some(url),
            Err(err) => {
                self.report(&format!("Sign in with {provider}"), &err);
                None
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn sign_out(&self) -> bool {
        if self.is_offline() {
            let cleared = self
                .storage
                .remove_item(keys::OFFLINE_MARKER)
                .and_then(|()| self.storage.remove_item(keys::OFFLINE_ACTOR));
            if let Err(err) = cleared {
                self.report("Sign out", &err);
                return false;
            }
            info!("left offline mode");
            self.remember(None, Utc::now());
            self.toasts.success("Signed out");
            return true;
        }

        match self.provider.sign_out().await {
            Ok(()) => {
                info!("signed out");
                self.remember(None, Utc::now());
                self.toasts.success("Signed out");
                true
            }
            Err(err) => {
                self.report("Sign out", &err);
                false
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub fn enter_offline_mode(&self, name: &str, email: &str) -> Option<Actor> {
        let actor = Actor::offline(name, email);
        let stored = self
            .storage
            .set_item(keys::OFFLINE_MARKER, "true")
            .and_then(|()| save_json(self.storage.as_ref(), keys::OFFLINE_ACTOR, &actor));
        if let Err(err) = stored {
            self.report("Enter offline mode", &err);
            return None;
        }

        info!(actor = %actor.id(), "entered offline mode");
        self.remember(Some(actor.clone()), Utc::now());
        self.toasts.info("Offline mode enabled");
        Some(actor)
    }

    fn offline_actor(&self) -> Actor {
        match load_json::<Actor>(self.storage.as_ref(), keys::OFFLINE_ACTOR) {
            Ok(Some(actor)) => actor,
            Ok(None) => Actor::default(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "offline actor unreadable; using default");
                Actor::default()
            }
        }
    }

    fn remember(&self, actor: Option<Actor>, now: DateTime<Utc>) {
        let cached = actor.map(|actor| CachedActor {
            actor,
            fetched_at: now,
        });

        let persisted = match cached.as_ref() {
            Some(cached) => save_json(self.storage.as_ref(), keys::SESSION_CACHE, cached),
            None => self.storage.remove_item(keys::SESSION_CACHE),
        };
        if let Err(err) = persisted {
            warn!(error = %format!("{err:#}"), "failed persisting session cache");
        }

        *self.cache.lock() = cached;
    }

    fn report(&self, operation: &str, err: &anyhow::Error) {
        warn!(operation, error = %format!("{err:#}"), "session operation failed");
        self.toasts.error(format!("{operation} failed: {err:#}"));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::storage::MemoryStorage;
    use crate::toast::ToastKind;

    #[derive(Default)]
    struct CountingProvider {
        lookups: AtomicUsize,
        fail: bool,
    }

    fn remote_actor() -> Actor {
        Actor::Remote {
            id: "u1".to_string(),
            email: Some("u1@example.com".to_string()),
            metadata: serde_json::Value::Null,
        }
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        async fn current_actor(&self) -> anyhow::Result<Option<Actor>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("identity service unreachable"));
            }
            Ok(Some(remote_actor()))
        }

        async fn sign_up(
            &self,
            _email: &str,
            _password: &str,
            redirect: Option<&str>,
        ) -> anyhow::Result<SignUpOutcome> {
            assert_eq!(redirect, Some("https://app.example/auth/callback"));
            Ok(SignUpOutcome {
                actor: Some(remote_actor()),
                confirmation_required: true,
                already_registered: false,
            })
        }

        async fn sign_in_with_password(
            &self,
            _email: &str,
            password: &str,
        ) -> anyhow::Result<Actor> {
            if password == "wrong" {
                return Err(anyhow!("Invalid login credentials"));
            }
            Ok(remote_actor())
        }

        async fn sign_in_with_oauth(
            &self,
            provider: OAuthProvider,
            _redirect: Option<&str>,
        ) -> anyhow::Result<String> {
            Ok(format!("https://auth.example/{provider}"))
        }

        async fn sign_out(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn manager(
        provider: Arc<CountingProvider>,
        storage: Arc<MemoryStorage>,
    ) -> (SessionManager, Toasts) {
        let toasts = Toasts::new();
        let manager = SessionManager::new(
            provider,
            storage,
            toasts.clone(),
            Some("https://app.example/auth/callback".to_string()),
        );
        (manager, toasts)
    }

    #[tokio::test]
    async fn second_fetch_within_ttl_hits_cache() {
        let provider = Arc::new(CountingProvider::default());
        let (manager, _) = manager(provider.clone(), Arc::new(MemoryStorage::new()));

        assert_eq!(manager.fetch_user(false).await, Some(remote_actor()));
        assert_eq!(manager.fetch_user(false).await, Some(remote_actor()));
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn force_refresh_always_queries() {
        let provider = Arc::new(CountingProvider::default());
        let (manager, _) = manager(provider.clone(), Arc::new(MemoryStorage::new()));

        manager.fetch_user(true).await;
        manager.fetch_user(true).await;
        manager.fetch_user(true).await;
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn expired_persisted_cache_is_refreshed() {
        let storage = Arc::new(MemoryStorage::new());
        let stale = CachedActor {
            actor: remote_actor(),
            fetched_at: Utc::now() - Duration::minutes(SESSION_TTL_MINUTES + 1),
        };
        save_json(storage.as_ref(), keys::SESSION_CACHE, &stale).expect("seed cache");

        let provider = Arc::new(CountingProvider::default());
        let (manager, _) = manager(provider.clone(), storage);
        assert_eq!(manager.current(), Some(remote_actor()));

        manager.fetch_user(false).await;
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_stamped_in_the_future_is_refreshed() {
        let storage = Arc::new(MemoryStorage::new());
        let skewed = CachedActor {
            actor: remote_actor(),
            fetched_at: Utc::now() + Duration::days(365),
        };
        save_json(storage.as_ref(), keys::SESSION_CACHE, &skewed).expect("seed cache");

        let provider = Arc::new(CountingProvider::default());
        let (manager, _) = manager(provider.clone(), storage);
        manager.fetch_user(false).await;
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_persisted_cache_is_reused_by_a_new_manager() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(CountingProvider::default());

        let (first, _) = manager(provider.clone(), storage.clone());
        first.fetch_user(false).await;

        let (second, _) = manager(provider.clone(), storage);
        assert_eq!(second.fetch_user(false).await, Some(remote_actor()));
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn offline_marker_yields_stand_in_without_provider() {
        let storage = Arc::new(MemoryStorage::new());
        let provider = Arc::new(CountingProvider::default());
        let (manager, _) = manager(provider.clone(), storage);

        let actor = manager
            .enter_offline_mode("Dev", "dev@example.com")
            .expect("offline actor");
        assert!(manager.is_offline());

        let fetched = manager.fetch_user(true).await.expect("actor");
        assert_eq!(fetched, actor);
        assert_eq!(provider.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn offline_sign_out_clears_marker_and_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let (manager, _) = manager(Arc::new(CountingProvider::default()), storage.clone());
        manager.enter_offline_mode("Dev", "dev@example.com");

        assert!(manager.sign_out().await);
        assert!(!manager.is_offline());
        assert!(manager.current().is_none());
        assert!(!storage.contains(keys::OFFLINE_ACTOR).expect("contains"));
        assert!(!storage.contains(keys::SESSION_CACHE).expect("contains"));
    }

    #[tokio::test]
    async fn provider_failures_become_error_toasts() {
        let provider = Arc::new(CountingProvider {
            fail: true,
            ..CountingProvider::default()
        });
        let (manager, toasts) = manager(provider, Arc::new(MemoryStorage::new()));

        assert_eq!(manager.fetch_user(false).await, None);
        assert!(manager.sign_in("a@b.c", "wrong").await.is_none());

        let errors: Vec<String> = toasts
            .toasts()
            .into_iter()
            .filter(|toast| toast.kind == ToastKind::Error)
            .map(|toast| toast.message)
            .collect();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("Fetch user failed: identity service unreachable"));
        assert!(errors[1].contains("Invalid login credentials"));
    }

    #[tokio::test]
    async fn sign_up_passes_redirect_and_reports_confirmation() {
        let (manager, toasts) = manager(
            Arc::new(CountingProvider::default()),
            Arc::new(MemoryStorage::new()),
        );
        let outcome = manager.sign_up("new@example.com", "secret").await.expect("outcome");
        assert!(outcome.confirmation_required);
        assert!(manager.current().is_none());
        assert_eq!(toasts.toasts()[0].kind, ToastKind::Info);
    }

    #[tokio::test]
    async fn oauth_sign_in_returns_provider_url() {
        let (manager, _) = manager(
            Arc::new(CountingProvider::default()),
            Arc::new(MemoryStorage::new()),
        );
        assert_eq!(
            manager.sign_in_with_github().await.as_deref(),
            Some("https://auth.example/github")
        );
        assert_eq!(
            manager.sign_in_with_google().await.as_deref(),
            Some("https://auth.example/google")
        );
    }
}
