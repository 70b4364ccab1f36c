use crate::auth::AuthClient;
use crate::config::{Credentials, HousekeepingConfig};
use crate::error::Error;
use crate::manager::{TokenManager, TokenWatch};
use crate::token::{RenewalKind, Token, TokenRenewal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Extension point for implementations that persist tokens across process
/// restarts. The baseline loads nothing.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn load(&self) -> Result<Vec<Token>, Error>;
}

pub struct NoCache;

#[async_trait]
impl TokenCache for NoCache {
    async fn load(&self) -> Result<Vec<Token>, Error> {
        tracing::debug!("no cached tokens to load");
        Ok(Vec::new())
    }
}

/// What the renewal policy decided for one managed token this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewalAction {
    Periodic,
    SelfRenew,
    Skip,
}

/// Pure renewal-eligibility policy, evaluated once per managed token per
/// tick:
/// - periodic tokens are always refreshed, regardless of TTL
/// - renewable tokens with a known expiry renew when the remaining TTL
///   drops under `min_ttl` and renewal is enabled
/// - everything else (root, non-renewable, unknown expiry) is skipped
fn renewal_action(
    token: &Token,
    renew_enabled: bool,
    min_ttl: Duration,
    now: DateTime<Utc>,
) -> RenewalAction {
    if token.is_periodic() {
        return RenewalAction::Periodic;
    }
    if !token.renewable() || token.is_root() {
        return RenewalAction::Skip;
    }
    let Some(expires) = token.expire_time() else {
        // no expiry observed (root and some un-enriched tokens); treat as
        // non-expiring even when marked renewable
        return RenewalAction::Skip;
    };
    if !renew_enabled {
        return RenewalAction::Skip;
    }
    let remaining = (expires - now).num_seconds();
    if remaining < min_ttl.as_secs() as i64 {
        RenewalAction::SelfRenew
    } else {
        RenewalAction::Skip
    }
}

/// The periodic housekeeping cycle.
///
/// Every tick re-runs the full step sequence from the top: reachability,
/// ping, one-shot init, unseal, cached-token loading, login-if-absent, and
/// renewal. Each step is fault-isolating; a failure abandons the remainder
/// of the tick and the next tick retries from scratch. State persists only
/// in the managed-token set and the flags held here.
pub struct Housekeeping {
    auth: AuthClient,
    manager: TokenManager,
    credentials: Arc<Credentials>,
    config: HousekeepingConfig,
    cache: Box<dyn TokenCache>,
    needs_init: bool,
    unseal_enabled: bool,
    unseal_keys: Vec<String>,
}

impl Housekeeping {
    pub fn new(auth: AuthClient, manager: TokenManager, credentials: Credentials) -> Self {
        let config = auth.config().housekeeping.clone();
        Self {
            auth,
            manager,
            credentials: Arc::new(credentials),
            needs_init: config.attempt_init,
            unseal_enabled: config.attempt_unseal,
            unseal_keys: config.unseal_keys.clone(),
            config,
            cache: Box::new(NoCache),
        }
    }

    pub fn with_cache(mut self, cache: Box<dyn TokenCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn manager(&self) -> &TokenManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut TokenManager {
        &mut self.manager
    }

    pub fn subscribe(&self) -> TokenWatch {
        self.manager.subscribe()
    }

    pub fn subscribe_events(&mut self) -> mpsc::UnboundedReceiver<crate::manager::TokenEvent> {
        self.manager.subscribe_events()
    }

    /// Run one housekeeping pass. Never panics the caller; every failure is
    /// logged and ends the pass early.
    pub async fn tick(&mut self) {
        tracing::debug!("starting housekeeping tick");

        if self.config.test_reachable && !self.auth.host_reachable().await {
            tracing::error!(host = %self.auth.config().host, "host did not resolve, abandoning tick");
            return;
        }
        if self.config.ping_host && !self.auth.ping_host().await {
            tracing::error!(host = %self.auth.config().host, "socket probe failed, abandoning tick");
            return;
        }
        if let Err(e) = self.init_step().await {
            tracing::error!("init step failed: {e}");
            return;
        }
        if let Err(e) = self.unseal_step().await {
            tracing::error!("unseal step failed: {e}");
            return;
        }
        if let Err(e) = self.load_cached_step().await {
            tracing::error!("cached-token step failed: {e}");
            return;
        }
        if let Err(e) = self.login_step().await {
            tracing::error!("login step failed: {e}");
            return;
        }
        let renewals = self.renew_step().await;
        self.manager.apply_renewals(renewals);
    }

    /// One-shot backend initialization. On success the returned key shares
    /// and root token are written to the configured key file, the root token
    /// becomes the active credential, and the flag is cleared so subsequent
    /// ticks are no-ops.
    async fn init_step(&mut self) -> Result<(), Error> {
        if !self.needs_init {
            return Ok(());
        }
        let outcome = self
            .auth
            .init(self.config.secret_shares, self.config.secret_threshold)
            .await?;

        std::fs::write(
            &self.config.key_file,
            serde_json::to_string_pretty(&outcome.raw)?,
        )?;
        tracing::info!(
            key_file = %self.config.key_file.display(),
            "backend initialized, key shares written"
        );

        // this backend has never been unsealed; set up to do it this tick
        self.unseal_keys = outcome.keys;
        self.unseal_enabled = true;
        self.credentials = Arc::new(Credentials::token(outcome.root_token));
        self.needs_init = false;
        Ok(())
    }

    async fn unseal_step(&mut self) -> Result<(), Error> {
        let status = self.auth.seal_status().await?;
        if !status.sealed {
            tracing::debug!("backend is unsealed");
            return Ok(());
        }
        if !self.unseal_enabled || self.unseal_keys.is_empty() {
            tracing::error!("backend is sealed but unseal is not configured");
            return Ok(());
        }
        tracing::info!(
            shares = self.unseal_keys.len(),
            "backend is sealed, submitting key shares"
        );
        let status = self.auth.unseal(&self.unseal_keys).await?;
        if status.sealed {
            // logged, not escalated; the next tick tries again
            tracing::error!(
                progress = status.progress,
                threshold = status.t,
                "still sealed after submitting all key shares"
            );
        } else {
            tracing::info!("unsealed successfully");
        }
        Ok(())
    }

    async fn load_cached_step(&mut self) -> Result<(), Error> {
        for token in self.cache.load().await? {
            tracing::info!(handle = %token.handle(), "loaded cached token");
            self.manager.fire_reload(&token);
        }
        Ok(())
    }

    /// Login only when nothing is managed yet. Lookup enrichment is
    /// best-effort; a valid but unenriched token is still registered.
    async fn login_step(&mut self) -> Result<(), Error> {
        if !self.manager.tokens().is_empty() {
            tracing::debug!(
                managed = self.manager.tokens().len(),
                "managed tokens present, skipping login"
            );
            return Ok(());
        }

        tracing::info!("zero managed tokens, logging in");
        let token = match self.auth.login(&self.credentials).await {
            Ok(token) if token.successful() => token,
            Ok(token) => {
                tracing::warn!("login rejected by backend: {:?}", token.errors());
                self.manager.fire_failed_login();
                return Ok(());
            }
            Err(e) => {
                self.manager.fire_failed_login();
                return Err(e);
            }
        };

        let token = match self.auth.lookup_self(&token).await {
            Ok(enriched) => enriched,
            Err(e) => {
                tracing::warn!("token lookup enrichment failed, registering anyway: {e}");
                token
            }
        };

        let handle = self.manager.insert(token.clone());
        self.manager.fire_login(&token);
        tracing::debug!(%handle, "registered managed token");
        Ok(())
    }

    /// Run the renewal policy over every managed token. Refresh is
    /// best-effort per tick: a failed renewal falls back to a fresh login
    /// for that handle, and if that also fails the stale token stays in
    /// place.
    async fn renew_step(&mut self) -> Vec<TokenRenewal> {
        let snapshot: Vec<(String, Token)> = self
            .manager
            .tokens()
            .iter()
            .map(|(handle, token)| (handle.clone(), token.clone()))
            .collect();

        let mut renewals = Vec::new();
        for (handle, old) in snapshot {
            let action = renewal_action(&old, self.config.renew, self.config.min_ttl, Utc::now());
            match action {
                RenewalAction::Periodic => {
                    match self.auth.renew_periodic(&old).await {
                        Ok(new) => renewals.push(TokenRenewal {
                            handle,
                            kind: RenewalKind::Periodic,
                            old,
                            new,
                        }),
                        Err(e) => {
                            tracing::warn!(%handle, "periodic renewal failed: {e}");
                            if let Some(renewal) = self.relogin(&handle, &old).await {
                                renewals.push(renewal);
                            }
                        }
                    }
                }
                RenewalAction::SelfRenew => {
                    match self.auth.renew_self(&old).await {
                        Ok(new) => renewals.push(TokenRenewal {
                            handle,
                            kind: RenewalKind::SelfRenew,
                            old,
                            new,
                        }),
                        Err(e) => {
                            tracing::warn!(%handle, "renewal failed: {e}");
                            if let Some(renewal) = self.relogin(&handle, &old).await {
                                renewals.push(renewal);
                            }
                        }
                    }
                }
                RenewalAction::Skip => {
                    tracing::debug!(%handle, "not due for renewal");
                }
            }
        }
        renewals
    }

    async fn relogin(&self, handle: &str, old: &Token) -> Option<TokenRenewal> {
        tracing::info!(%handle, "falling back to a fresh login");
        match self.auth.login(old.credentials()).await {
            Ok(token) if token.successful() => {
                let token = match self.auth.lookup_self(&token).await {
                    Ok(enriched) => enriched,
                    Err(e) => {
                        tracing::warn!(%handle, "lookup after fallback login failed: {e}");
                        token
                    }
                };
                Some(TokenRenewal {
                    handle: handle.to_string(),
                    kind: RenewalKind::ReLogin,
                    old: old.clone(),
                    new: token,
                })
            }
            Ok(token) => {
                tracing::error!(
                    %handle,
                    "fallback login rejected: {:?}, keeping stale token",
                    token.errors()
                );
                None
            }
            Err(e) => {
                tracing::error!(%handle, "fallback login failed: {e}, keeping stale token");
                None
            }
        }
    }

    /// Move the cycle onto a background task: run once immediately, then on
    /// a fixed delay. A slow tick delays the next one; ticks never overlap.
    pub fn spawn(mut self) -> JoinHandle<()> {
        let period = self.config.period;
        tokio::spawn(async move {
            loop {
                self.tick().await;
                tokio::time::sleep(period).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(auth: serde_json::Value, lookup: Option<serde_json::Value>) -> Token {
        let base = Token::new(
            Arc::new(Credentials::token("bootstrap")),
            json!({ "auth": auth }),
            true,
        );
        match lookup {
            Some(data) => base.with_lookup(data),
            None => base,
        }
    }

    fn expires_in(seconds: i64) -> serde_json::Value {
        let at = Utc::now() + chrono::Duration::seconds(seconds);
        json!({"data": {"expire_time": at.to_rfc3339()}})
    }

    const MIN_TTL: Duration = Duration::from_secs(1800);

    #[test]
    fn test_periodic_always_renews() {
        let periodic = token(
            json!({"client_token": "s.p", "accessor": "a", "renewable": true, "period": 3600, "policies": ["default"]}),
            Some(expires_in(100_000)),
        );
        // regardless of TTL and even with renew disabled
        assert_eq!(
            renewal_action(&periodic, false, MIN_TTL, Utc::now()),
            RenewalAction::Periodic
        );
    }

    #[test]
    fn test_ttl_threshold() {
        let near = token(
            json!({"client_token": "s.n", "accessor": "a", "renewable": true, "policies": ["default"]}),
            Some(expires_in(60)),
        );
        assert_eq!(
            renewal_action(&near, true, MIN_TTL, Utc::now()),
            RenewalAction::SelfRenew
        );
        assert_eq!(
            renewal_action(&near, false, MIN_TTL, Utc::now()),
            RenewalAction::Skip
        );

        let far = token(
            json!({"client_token": "s.f", "accessor": "a", "renewable": true, "policies": ["default"]}),
            Some(expires_in(100_000)),
        );
        assert_eq!(
            renewal_action(&far, true, MIN_TTL, Utc::now()),
            RenewalAction::Skip
        );
    }

    #[test]
    fn test_root_never_renews() {
        let root = token(
            json!({"client_token": "s.r", "accessor": "a", "renewable": true, "policies": ["root"]}),
            Some(expires_in(60)),
        );
        assert_eq!(
            renewal_action(&root, true, MIN_TTL, Utc::now()),
            RenewalAction::Skip
        );
    }

    #[test]
    fn test_unknown_expiry_skipped() {
        let unenriched = token(
            json!({"client_token": "s.u", "accessor": "a", "renewable": true, "policies": ["default"]}),
            None,
        );
        assert_eq!(
            renewal_action(&unenriched, true, MIN_TTL, Utc::now()),
            RenewalAction::Skip
        );

        let null_expiry = token(
            json!({"client_token": "s.z", "accessor": "a", "renewable": true, "policies": ["default"]}),
            Some(json!({"data": {"expire_time": null}})),
        );
        assert_eq!(
            renewal_action(&null_expiry, true, MIN_TTL, Utc::now()),
            RenewalAction::Skip
        );
    }

    #[test]
    fn test_non_renewable_skipped() {
        let fixed = token(
            json!({"client_token": "s.x", "accessor": "a", "renewable": false, "policies": ["default"]}),
            Some(expires_in(60)),
        );
        assert_eq!(
            renewal_action(&fixed, true, MIN_TTL, Utc::now()),
            RenewalAction::Skip
        );
    }
}
