use crate::config::{Credentials, DriverConfig};
use crate::error::Error;
use crate::token::Token;
use crate::transport::{Transport, VaultResponse};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

const PING_TIMEOUT: Duration = Duration::from_millis(200);
const RENEW_INCREMENT: &str = "1h";

/// Seal state reported by `/sys/seal-status`.
#[derive(Debug, Clone, Deserialize)]
pub struct SealStatus {
    pub sealed: bool,
    #[serde(default)]
    pub t: u32,
    #[serde(default)]
    pub n: u32,
    #[serde(default)]
    pub progress: u32,
}

/// Result of a one-shot `/sys/init` call: the ordered unseal key shares and
/// the root token, plus the raw response for persisting to a key file.
#[derive(Debug, Clone)]
pub struct InitOutcome {
    pub keys: Vec<String>,
    pub keys_base64: Vec<String>,
    pub root_token: String,
    pub raw: serde_json::Value,
}

/// Implements logins for the supported auth methods, token lookup
/// enrichment, renewals, and the seal/init workflow. One HTTP call per
/// operation, no retries; retry policy belongs to the housekeeping cycle.
#[derive(Debug, Clone)]
pub struct AuthClient {
    transport: Transport,
    config: Arc<DriverConfig>,
}

impl AuthClient {
    pub fn new(config: Arc<DriverConfig>) -> Self {
        Self {
            transport: Transport::new(),
            config,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Perform the login call for the configured credentials.
    ///
    /// A transport failure is an error; a completed HTTP exchange always
    /// yields a token whose `successful` flag records whether the backend
    /// accepted the login. The TOKEN method is the one authenticated login:
    /// the bootstrap credential rides the header of a single token-create
    /// call and is never used again.
    pub async fn login(&self, credentials: &Arc<Credentials>) -> Result<Token, Error> {
        let response = match credentials.as_ref() {
            Credentials::Token { .. } => {
                let bootstrap = credentials.resolve_token()?;
                let payload = serde_json::json!({ "renewable": self.config.renewable });
                tracing::debug!(url = %self.config.token_create_url(), "token-create login");
                self.transport
                    .post(&self.config.token_create_url(), &payload, Some(&bootstrap))
                    .await
                    .map_err(|e| Error::LoginFailed(e.to_string()))?
            }
            other => {
                let (url, payload) = other.login_request(&self.config)?;
                tracing::debug!(%url, method = other.method(), "login");
                self.transport
                    .post(&url, &payload, None)
                    .await
                    .map_err(|e| Error::LoginFailed(e.to_string()))?
            }
        };

        let body = response
            .json()
            .map_err(|e| Error::LoginFailed(format!("unparseable login response: {e}")))?;
        Ok(Token::new(
            Arc::clone(credentials),
            body,
            response.successful,
        ))
    }

    /// Enrich a token with its own lookup data. Returns a new instance; the
    /// original is unchanged. Requires read permission on
    /// `auth/token/lookup-self`.
    pub async fn lookup_self(&self, token: &Token) -> Result<Token, Error> {
        let url = self.config.token_lookup_self_url();
        tracing::debug!(%url, "lookup-self");

        let response = self
            .transport
            .get(&url, Some(token.client_token()))
            .await
            .map_err(|e| Error::ReadFailed(e.to_string()))?;

        self.lookup_result(token, response)
    }

    /// Look up an arbitrary token using `token` as the caller.
    pub async fn lookup(&self, token: &Token, subject: &Token) -> Result<Token, Error> {
        let url = self.config.token_lookup_url();
        let payload = serde_json::json!({ "token": subject.client_token() });

        let response = self
            .transport
            .post(&url, &payload, Some(token.client_token()))
            .await
            .map_err(|e| Error::ReadFailed(e.to_string()))?;

        self.lookup_result(subject, response)
    }

    fn lookup_result(&self, token: &Token, response: VaultResponse) -> Result<Token, Error> {
        if !response.successful {
            return Err(Error::ReadFailed(format!(
                "lookup returned HTTP {}: {}",
                response.code, response.body
            )));
        }
        let data = response.json().map_err(|e| Error::ReadFailed(e.to_string()))?;
        if data.get("errors").is_some() {
            return Err(Error::ReadFailed(format!(
                "errors on token lookup: {}",
                response.body
            )));
        }
        Ok(token.with_lookup(data))
    }

    /// Extend a token using its own identity. Requires permission on
    /// `auth/token/renew-self`.
    pub async fn renew_self(&self, token: &Token) -> Result<Token, Error> {
        let url = self.config.token_renew_self_url();
        let payload = serde_json::json!({ "increment": RENEW_INCREMENT });
        tracing::debug!(%url, accessor = token.accessor(), "renew-self");

        let response = self
            .transport
            .post(&url, &payload, Some(token.client_token()))
            .await
            .map_err(|e| self.renewal_error(token, e.to_string()))?;

        self.renewed(token, response).await
    }

    /// Re-issue a periodic token. Requires permission on `auth/token/renew`.
    pub async fn renew_periodic(&self, token: &Token) -> Result<Token, Error> {
        let url = self.config.token_renew_url();
        let payload = serde_json::json!({ "token": token.client_token() });
        tracing::debug!(%url, accessor = token.accessor(), "renew periodic");

        let response = self
            .transport
            .post(&url, &payload, Some(token.client_token()))
            .await
            .map_err(|e| self.renewal_error(token, e.to_string()))?;

        self.renewed(token, response).await
    }

    async fn renewed(&self, old: &Token, response: VaultResponse) -> Result<Token, Error> {
        if !response.successful {
            return Err(self.renewal_error(
                old,
                format!("backend returned HTTP {}: {}", response.code, response.body),
            ));
        }
        let body = response
            .json()
            .map_err(|e| self.renewal_error(old, e.to_string()))?;
        let token = Token::new(Arc::clone(old.credentials()), body, true);

        // Enrichment keeps expire_time fresh for the next tick's TTL check,
        // but a renewed token is usable without it.
        match self.lookup_self(&token).await {
            Ok(enriched) => Ok(enriched),
            Err(e) => {
                tracing::warn!(accessor = token.accessor(), "lookup after renewal failed: {e}");
                Ok(token)
            }
        }
    }

    fn renewal_error(&self, token: &Token, message: String) -> Error {
        Error::RenewalFailed {
            accessor: token.accessor().to_string(),
            message,
        }
    }

    /// Query `/sys/seal-status`; unauthenticated.
    pub async fn seal_status(&self) -> Result<SealStatus, Error> {
        let response = self
            .transport
            .get(&self.config.seal_status_url(), None)
            .await
            .map_err(|e| Error::ReadFailed(e.to_string()))?;
        if !response.successful {
            return Err(Error::ReadFailed(format!(
                "seal-status returned HTTP {}: {}",
                response.code, response.body
            )));
        }
        serde_json::from_str(&response.body).map_err(|e| Error::ReadFailed(e.to_string()))
    }

    /// Submit one unseal key share; unauthenticated, expects HTTP 200.
    pub async fn unseal_one(
        &self,
        key: &str,
        reset: bool,
        migrate: bool,
    ) -> Result<SealStatus, Error> {
        let payload = serde_json::json!({ "key": key, "reset": reset, "migrate": migrate });
        let response = self
            .transport
            .put(&self.config.unseal_url(), &payload, None)
            .await
            .map_err(|e| Error::ConfigureFailed(e.to_string()))?;
        if response.code != 200 {
            return Err(Error::ConfigureFailed(format!(
                "unseal returned HTTP {}: {}",
                response.code, response.body
            )));
        }
        serde_json::from_str(&response.body).map_err(|e| Error::ConfigureFailed(e.to_string()))
    }

    /// Submit key shares in order until the backend reports unsealed or the
    /// keys are exhausted. Returns the last observed status.
    pub async fn unseal(&self, keys: &[String]) -> Result<SealStatus, Error> {
        let mut status = None;
        for (index, key) in keys.iter().enumerate() {
            tracing::debug!("submitting unseal key share {}", index + 1);
            let current = self.unseal_one(key, false, false).await?;
            let sealed = current.sealed;
            status = Some(current);
            if !sealed {
                break;
            }
        }
        status.ok_or_else(|| Error::ConfigureFailed("no unseal keys configured".into()))
    }

    /// Initialize a never-initialized backend; expects HTTP 200 with the
    /// ordered key shares and the root token.
    pub async fn init(&self, secret_shares: u32, secret_threshold: u32) -> Result<InitOutcome, Error> {
        let payload = serde_json::json!({
            "secret_shares": secret_shares,
            "secret_threshold": secret_threshold,
        });
        tracing::debug!(url = %self.config.init_url(), "init");

        let response = self
            .transport
            .put(&self.config.init_url(), &payload, None)
            .await
            .map_err(|e| Error::ConfigureFailed(e.to_string()))?;
        if response.code != 200 {
            return Err(Error::ConfigureFailed(format!(
                "init returned HTTP {}: {}",
                response.code, response.body
            )));
        }

        #[derive(Deserialize)]
        struct InitResponse {
            keys: Vec<String>,
            #[serde(default)]
            keys_base64: Vec<String>,
            root_token: String,
        }

        let raw = response.json().map_err(|e| Error::ConfigureFailed(e.to_string()))?;
        let parsed: InitResponse =
            serde_json::from_value(raw.clone()).map_err(|e| Error::ConfigureFailed(e.to_string()))?;

        Ok(InitOutcome {
            keys: parsed.keys,
            keys_base64: parsed.keys_base64,
            root_token: parsed.root_token,
            raw,
        })
    }

    /// Low-level host probe: does the configured host resolve at all.
    pub async fn host_reachable(&self) -> bool {
        tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
            .await
            .map(|mut addrs| addrs.next().is_some())
            .unwrap_or(false)
    }

    /// Socket probe with a short timeout.
    pub async fn ping_host(&self) -> bool {
        let target = (self.config.host.as_str(), self.config.port);
        matches!(
            tokio::time::timeout(PING_TIMEOUT, TcpStream::connect(target)).await,
            Ok(Ok(_))
        )
    }
}
