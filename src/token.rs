use crate::Credentials;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Immutable snapshot of one login or lookup response.
///
/// A token is not necessarily valid at any given moment; `successful`
/// records whether the backend accepted the login it came from. Instances
/// are sometimes enriched with lookup data, which produces a new instance,
/// never a mutation. The credentials that produced the token travel with it
/// so a failed renewal can fall back to a fresh login.
#[derive(Debug, Clone)]
pub struct Token {
    credentials: Arc<Credentials>,
    body: serde_json::Value,
    successful: bool,
    lookup: Option<serde_json::Value>,
}

impl Token {
    pub fn new(credentials: Arc<Credentials>, body: serde_json::Value, successful: bool) -> Self {
        Self {
            credentials,
            body,
            successful,
            lookup: None,
        }
    }

    /// Clone of this token carrying lookup enrichment data.
    pub fn with_lookup(&self, lookup: serde_json::Value) -> Self {
        Self {
            credentials: Arc::clone(&self.credentials),
            body: self.body.clone(),
            successful: self.successful,
            lookup: Some(lookup),
        }
    }

    pub fn successful(&self) -> bool {
        self.successful
    }

    pub fn credentials(&self) -> &Arc<Credentials> {
        &self.credentials
    }

    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    pub fn lookup_data(&self) -> Option<&serde_json::Value> {
        self.lookup.as_ref()
    }

    fn auth(&self) -> Option<&serde_json::Value> {
        self.body.get("auth")
    }

    pub fn client_token(&self) -> &str {
        self.auth()
            .and_then(|auth| auth.get("client_token"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
    }

    pub fn accessor(&self) -> &str {
        self.auth()
            .and_then(|auth| auth.get("accessor"))
            .and_then(serde_json::Value::as_str)
            .unwrap_or("")
    }

    pub fn renewable(&self) -> bool {
        self.auth()
            .and_then(|auth| auth.get("renewable"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
    }

    /// Present only for periodic tokens, which have no fixed expiry but must
    /// still be refreshed on a cadence to avoid backend-side revocation.
    pub fn period(&self) -> Option<Duration> {
        self.auth()
            .and_then(|auth| auth.get("period"))
            .and_then(serde_json::Value::as_u64)
            .map(Duration::from_secs)
    }

    pub fn is_periodic(&self) -> bool {
        self.period().is_some()
    }

    /// Root detection scans the attached policy list for a root marker.
    pub fn is_root(&self) -> bool {
        self.auth()
            .and_then(|auth| auth.get("policies"))
            .and_then(serde_json::Value::as_array)
            .is_some_and(|policies| {
                policies
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .any(|policy| policy.contains("root"))
            })
    }

    /// Absolute expiry parsed from lookup data. `None` for root tokens,
    /// tokens that were never enriched, or a null `expire_time` field.
    pub fn expire_time(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .lookup
            .as_ref()?
            .get("data")?
            .get("expire_time")?
            .as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|parsed| parsed.with_timezone(&Utc))
    }

    /// Error strings from the response body, if the backend reported any.
    pub fn errors(&self) -> Vec<String> {
        self.body
            .get("errors")
            .and_then(serde_json::Value::as_array)
            .map(|errors| {
                errors
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Stable local identifier used as the key in the managed-token set.
    /// Concatenates the auth method, the username where one applies, and the
    /// accessor; root tokens get the fixed handle `token-root`.
    pub fn handle(&self) -> String {
        match self.credentials.as_ref() {
            Credentials::Token { .. } => {
                if self.is_root() {
                    "token-root".to_string()
                } else {
                    format!("token-{}", self.accessor())
                }
            }
            Credentials::AppRole { .. } => format!("approle-{}", self.accessor()),
            Credentials::Ldap { username, .. } => format!("ldap-{username}-{}", self.accessor()),
            Credentials::UserPass { username, .. } => {
                format!("userpass-{username}-{}", self.accessor())
            }
        }
    }
}

/// Token equality is what the manager's replacement logic relies on: two
/// tokens are the same iff their client token values match.
impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.client_token() == other.client_token()
    }
}

impl Eq for Token {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalKind {
    /// renew-self on a renewable token approaching expiry
    SelfRenew,
    /// cadence refresh of a periodic token
    Periodic,
    /// fresh login after a failed renewal
    ReLogin,
}

/// Record of one completed refresh, consumed by the manager to update its
/// set and notify listeners.
#[derive(Debug, Clone)]
pub struct TokenRenewal {
    pub handle: String,
    pub kind: RenewalKind,
    pub old: Token,
    pub new: Token,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token_body(client_token: &str, extra: serde_json::Value) -> serde_json::Value {
        let mut auth = json!({
            "client_token": client_token,
            "accessor": "acc-1",
            "renewable": true,
            "policies": ["default"],
        });
        if let (Some(auth_map), Some(extra_map)) = (auth.as_object_mut(), extra.as_object()) {
            for (key, value) in extra_map {
                auth_map.insert(key.clone(), value.clone());
            }
        }
        json!({ "auth": auth })
    }

    fn sample(client_token: &str, extra: serde_json::Value) -> Token {
        Token::new(
            Arc::new(Credentials::token("bootstrap")),
            token_body(client_token, extra),
            true,
        )
    }

    #[test]
    fn test_identity_is_client_token_value() {
        let a = sample("s.abc", json!({}));
        let b = a.with_lookup(json!({"data": {"num_uses": 0}}));
        let c = sample("s.other", json!({}));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_derived_defaults_when_absent() {
        let token = Token::new(
            Arc::new(Credentials::token("bootstrap")),
            json!({"errors": ["permission denied"]}),
            false,
        );
        assert_eq!(token.client_token(), "");
        assert_eq!(token.accessor(), "");
        assert!(!token.renewable());
        assert!(!token.is_periodic());
        assert!(!token.is_root());
        assert_eq!(token.errors(), vec!["permission denied"]);
    }

    #[test]
    fn test_periodic_detection() {
        let plain = sample("s.abc", json!({}));
        assert!(plain.period().is_none());

        let periodic = sample("s.abc", json!({"period": 3600}));
        assert_eq!(periodic.period(), Some(Duration::from_secs(3600)));
        assert!(periodic.is_periodic());
    }

    #[test]
    fn test_root_policy_scan() {
        let root = sample("s.root", json!({"policies": ["default", "root"]}));
        assert!(root.is_root());
        assert_eq!(root.handle(), "token-root");

        let child = sample("s.child", json!({"policies": ["default", "app"]}));
        assert!(!child.is_root());
        assert_eq!(child.handle(), "token-acc-1");
    }

    #[test]
    fn test_expire_time_parse() {
        let token = sample("s.abc", json!({}));
        assert!(token.expire_time().is_none());

        // Vault emits sub-second precision with a zone offset
        let enriched = token.with_lookup(json!({
            "data": {"expire_time": "2026-05-19T11:35:54.466476215-04:00"}
        }));
        let expires = enriched.expire_time().unwrap();
        assert_eq!(expires.timezone(), Utc);

        let null_expiry = token.with_lookup(json!({"data": {"expire_time": null}}));
        assert!(null_expiry.expire_time().is_none());
    }

    #[test]
    fn test_handle_includes_username() {
        let token = Token::new(
            Arc::new(Credentials::Ldap {
                username: "bob".to_string(),
                password: "pw".to_string(),
            }),
            token_body("s.abc", json!({})),
            true,
        );
        assert_eq!(token.handle(), "ldap-bob-acc-1");
    }
}
