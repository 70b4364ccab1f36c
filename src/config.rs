use crate::Error;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PERIOD: Duration = Duration::from_secs(30);
const DEFAULT_MIN_TTL: Duration = Duration::from_secs(1800);
const DEFAULT_SECRET_SHARES: u32 = 3;
const DEFAULT_SECRET_THRESHOLD: u32 = 2;
const DEFAULT_KEY_FILE: &str = "vault-init-keys.json";

/// Login credentials for one of the supported auth methods.
///
/// Exactly one variant is active per configuration; the variant determines
/// which login endpoint is called and what the request body looks like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Bootstrap with an existing token (e.g. a root token). The bootstrap
    /// value is used for exactly one token-create call; only the minted
    /// child token is used for subsequent API calls.
    Token {
        value: Option<String>,
        /// When set, the token is read from this file at login time and
        /// takes precedence over `value`.
        source_file: Option<PathBuf>,
    },
    Ldap {
        username: String,
        password: String,
    },
    AppRole {
        role_id: String,
        secret_id: String,
    },
    UserPass {
        username: String,
        password: String,
    },
}

impl Credentials {
    pub fn token(value: impl Into<String>) -> Self {
        Credentials::Token {
            value: Some(value.into()),
            source_file: None,
        }
    }

    pub fn token_file(path: impl Into<PathBuf>) -> Self {
        Credentials::Token {
            value: None,
            source_file: Some(path.into()),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Credentials::Token { .. } => "token",
            Credentials::Ldap { .. } => "ldap",
            Credentials::AppRole { .. } => "approle",
            Credentials::UserPass { .. } => "userpass",
        }
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::Ldap { username, .. } | Credentials::UserPass { username, .. } => {
                Some(username)
            }
            _ => None,
        }
    }

    /// Resolve the bootstrap token for the TOKEN method. The file location
    /// wins over the inline value when both are set.
    pub(crate) fn resolve_token(&self) -> Result<String, Error> {
        match self {
            Credentials::Token { value, source_file } => {
                if let Some(path) = source_file {
                    let raw = std::fs::read_to_string(path).map_err(|e| {
                        Error::LoginFailed(format!(
                            "failed to read token from {}: {e}",
                            path.display()
                        ))
                    })?;
                    return Ok(raw.trim().to_string());
                }
                value
                    .clone()
                    .ok_or_else(|| Error::LoginFailed("no token value or file configured".into()))
            }
            other => Err(Error::LoginFailed(format!(
                "resolve_token called for {} credentials",
                other.method()
            ))),
        }
    }

    /// Map the variant onto its unauthenticated login call: URL plus JSON
    /// payload. The TOKEN method is not handled here since token creation
    /// goes through an authenticated endpoint.
    pub(crate) fn login_request(
        &self,
        config: &DriverConfig,
    ) -> Result<(String, serde_json::Value), Error> {
        match self {
            Credentials::Ldap { username, password } => Ok((
                config.ldap_login_url(username),
                serde_json::json!({ "password": password }),
            )),
            Credentials::AppRole { role_id, secret_id } => Ok((
                config.approle_login_url(),
                serde_json::json!({ "role_id": role_id, "secret_id": secret_id }),
            )),
            Credentials::UserPass { username, password } => Ok((
                config.userpass_login_url(username),
                serde_json::json!({ "password": password }),
            )),
            Credentials::Token { .. } => Err(Error::LoginFailed(
                "token credentials use the authenticated create endpoint".into(),
            )),
        }
    }
}

/// Housekeeping (token lifecycle) parameters. Read-only after construction;
/// runtime state derived from these flags lives on the housekeeping worker.
#[derive(Debug, Clone)]
pub struct HousekeepingConfig {
    /// Resolve the host before each tick; abort the tick on failure.
    pub test_reachable: bool,
    /// Probe the host:port socket before each tick; abort the tick on failure.
    pub ping_host: bool,
    /// Attempt a one-shot backend initialization.
    pub attempt_init: bool,
    pub secret_shares: u32,
    pub secret_threshold: u32,
    /// Where the init response (unseal key shares + root token) is written.
    pub key_file: PathBuf,
    /// Attempt to unseal a sealed backend using `unseal_keys`.
    pub attempt_unseal: bool,
    pub unseal_keys: Vec<String>,
    /// Renew non-periodic tokens approaching expiry. Periodic tokens are
    /// always renewed regardless of this flag.
    pub renew: bool,
    /// Renew when a token's remaining TTL drops below this.
    pub min_ttl: Duration,
    /// Delay between housekeeping ticks.
    pub period: Duration,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            test_reachable: true,
            ping_host: true,
            attempt_init: false,
            secret_shares: DEFAULT_SECRET_SHARES,
            secret_threshold: DEFAULT_SECRET_THRESHOLD,
            key_file: PathBuf::from(DEFAULT_KEY_FILE),
            attempt_unseal: false,
            unseal_keys: Vec::new(),
            renew: true,
            min_ttl: DEFAULT_MIN_TTL,
            period: DEFAULT_PERIOD,
        }
    }
}

impl HousekeepingConfig {
    pub fn reachable(mut self, test_reachable: bool) -> Self {
        self.test_reachable = test_reachable;
        self
    }

    pub fn ping(mut self, ping_host: bool) -> Self {
        self.ping_host = ping_host;
        self
    }

    pub fn init(mut self, attempt_init: bool) -> Self {
        self.attempt_init = attempt_init;
        self
    }

    pub fn shares(mut self, secret_shares: u32, secret_threshold: u32) -> Self {
        self.secret_shares = secret_shares;
        self.secret_threshold = secret_threshold;
        self
    }

    pub fn key_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_file = path.into();
        self
    }

    pub fn unseal(mut self, attempt_unseal: bool) -> Self {
        self.attempt_unseal = attempt_unseal;
        self
    }

    pub fn unseal_keys(mut self, keys: Vec<String>) -> Self {
        self.unseal_keys = keys;
        self
    }

    /// Load unseal keys from a file, one key per line; blank lines ignored.
    pub fn unseal_keys_file(mut self, path: impl Into<PathBuf>) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path.into())?;
        self.unseal_keys = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        Ok(self)
    }

    pub fn renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    pub fn min_ttl(mut self, min_ttl: Duration) -> Self {
        self.min_ttl = min_ttl;
        self
    }

    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

/// Connection and path configuration for one backend instance.
///
/// All endpoint paths are produced here; nothing else in the crate builds
/// URLs by hand.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// API version prefix, e.g. `/v1`.
    pub api_prefix: String,
    /// Where the auth backends are mounted, normally `/auth`.
    pub auth_path: String,
    /// KV v2 mount name, normally `secret`.
    pub kv_mount: String,
    /// Whether tokens minted through the TOKEN method should be renewable.
    pub renewable: bool,
    pub housekeeping: HousekeepingConfig,
}

impl DriverConfig {
    pub fn builder() -> DriverConfigBuilder {
        DriverConfigBuilder::new()
    }

    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme, self.host, self.port, self.api_prefix
        )
    }

    fn auth_url(&self, suffix: &str) -> String {
        format!("{}{}{}", self.base_url(), self.auth_path, suffix)
    }

    pub fn ldap_login_url(&self, username: &str) -> String {
        self.auth_url(&format!("/ldap/login/{username}"))
    }

    pub fn approle_login_url(&self) -> String {
        self.auth_url("/approle/login")
    }

    pub fn userpass_login_url(&self, username: &str) -> String {
        self.auth_url(&format!("/userpass/login/{username}"))
    }

    pub fn token_create_url(&self) -> String {
        self.auth_url("/token/create")
    }

    pub fn token_lookup_self_url(&self) -> String {
        self.auth_url("/token/lookup-self")
    }

    pub fn token_lookup_url(&self) -> String {
        self.auth_url("/token/lookup")
    }

    pub fn token_renew_self_url(&self) -> String {
        self.auth_url("/token/renew-self")
    }

    pub fn token_renew_url(&self) -> String {
        self.auth_url("/token/renew")
    }

    pub fn seal_status_url(&self) -> String {
        format!("{}/sys/seal-status", self.base_url())
    }

    pub fn unseal_url(&self) -> String {
        format!("{}/sys/unseal", self.base_url())
    }

    pub fn init_url(&self) -> String {
        format!("{}/sys/init", self.base_url())
    }

    pub fn kv2_data_url(&self, path: &str) -> String {
        format!("{}/{}/data/{}", self.base_url(), self.kv_mount, path)
    }

    pub fn kv2_metadata_url(&self, path: &str) -> String {
        format!("{}/{}/metadata/{}", self.base_url(), self.kv_mount, path)
    }
}

pub struct DriverConfigBuilder {
    scheme: String,
    host: String,
    port: u16,
    api_prefix: String,
    auth_path: String,
    kv_mount: String,
    renewable: bool,
    housekeeping: HousekeepingConfig,
}

impl Default for DriverConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverConfigBuilder {
    pub fn new() -> Self {
        Self {
            scheme: "https".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8200,
            api_prefix: "/v1".to_string(),
            auth_path: "/auth".to_string(),
            kv_mount: "secret".to_string(),
            renewable: true,
            housekeeping: HousekeepingConfig::default(),
        }
    }

    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set scheme, host and port from an address like `http://127.0.0.1:8200`.
    pub fn address(mut self, addr: &str) -> Result<Self, Error> {
        let (scheme, rest) = addr
            .split_once("://")
            .ok_or_else(|| Error::ConfigureFailed(format!("invalid address: {addr}")))?;
        let (host, port) = rest
            .split_once(':')
            .ok_or_else(|| Error::ConfigureFailed(format!("invalid address: {addr}")))?;
        self.scheme = scheme.to_string();
        self.host = host.to_string();
        self.port = port
            .parse()
            .map_err(|_| Error::ConfigureFailed(format!("invalid port in address: {addr}")))?;
        Ok(self)
    }

    pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.api_prefix = prefix.into();
        self
    }

    pub fn auth_path(mut self, path: impl Into<String>) -> Self {
        self.auth_path = path.into();
        self
    }

    pub fn kv_mount(mut self, mount: impl Into<String>) -> Self {
        self.kv_mount = mount.into();
        self
    }

    pub fn renewable(mut self, renewable: bool) -> Self {
        self.renewable = renewable;
        self
    }

    pub fn housekeeping(mut self, housekeeping: HousekeepingConfig) -> Self {
        self.housekeeping = housekeeping;
        self
    }

    pub fn build(self) -> DriverConfig {
        DriverConfig {
            scheme: self.scheme,
            host: self.host,
            port: self.port,
            api_prefix: self.api_prefix,
            auth_path: self.auth_path,
            kv_mount: self.kv_mount,
            renewable: self.renewable,
            housekeeping: self.housekeeping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builder_defaults() {
        let config = DriverConfig::builder().build();
        assert_eq!(config.base_url(), "https://127.0.0.1:8200/v1");
        assert_eq!(
            config.token_lookup_self_url(),
            "https://127.0.0.1:8200/v1/auth/token/lookup-self"
        );
        assert_eq!(
            config.seal_status_url(),
            "https://127.0.0.1:8200/v1/sys/seal-status"
        );
    }

    #[test]
    fn test_builder_address() {
        let config = DriverConfig::builder()
            .address("http://vault.internal:8201")
            .unwrap()
            .build();
        assert_eq!(config.scheme, "http");
        assert_eq!(config.host, "vault.internal");
        assert_eq!(config.port, 8201);
    }

    #[test]
    fn test_custom_auth_path() {
        let config = DriverConfig::builder().auth_path("/auth-special").build();
        assert_eq!(
            config.approle_login_url(),
            "https://127.0.0.1:8200/v1/auth-special/approle/login"
        );
    }

    #[test]
    fn test_token_file_precedence() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "file-token").unwrap();

        let creds = Credentials::Token {
            value: Some("inline-token".to_string()),
            source_file: Some(file.path().to_path_buf()),
        };
        assert_eq!(creds.resolve_token().unwrap(), "file-token");
    }

    #[test]
    fn test_token_inline_fallback() {
        let creds = Credentials::token("inline-token");
        assert_eq!(creds.resolve_token().unwrap(), "inline-token");
    }

    #[test]
    fn test_login_request_shapes() {
        let config = DriverConfig::builder().build();

        let ldap = Credentials::Ldap {
            username: "bob".to_string(),
            password: "pw".to_string(),
        };
        let (url, payload) = ldap.login_request(&config).unwrap();
        assert!(url.ends_with("/auth/ldap/login/bob"));
        assert_eq!(payload, serde_json::json!({"password": "pw"}));

        let approle = Credentials::AppRole {
            role_id: "r1".to_string(),
            secret_id: "s1".to_string(),
        };
        let (url, payload) = approle.login_request(&config).unwrap();
        assert!(url.ends_with("/auth/approle/login"));
        assert_eq!(payload, serde_json::json!({"role_id": "r1", "secret_id": "s1"}));
    }

    #[test]
    fn test_unseal_keys_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "key-one").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  key-two  ").unwrap();

        let hk = HousekeepingConfig::default()
            .unseal_keys_file(file.path())
            .unwrap();
        assert_eq!(hk.unseal_keys, vec!["key-one", "key-two"]);
    }
}
