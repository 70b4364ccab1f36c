use crate::Error;

const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";

/// Response envelope for one backend call: status code, a success flag
/// derived from it, and the raw body. The body is only parsed as JSON when
/// a caller actually needs a field.
#[derive(Debug, Clone)]
pub struct VaultResponse {
    pub code: u16,
    pub successful: bool,
    pub body: String,
}

impl VaultResponse {
    pub fn new(code: u16, body: String) -> Self {
        Self {
            code,
            successful: (200..300).contains(&code),
            body,
        }
    }

    pub fn json(&self) -> Result<serde_json::Value, Error> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Thin wrapper over reqwest. The client token is an explicit argument on
/// every call; the transport holds no credential state of its own.
#[derive(Debug, Clone)]
pub struct Transport {
    http: reqwest::Client,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<VaultResponse, Error> {
        let response = request.send().await?;
        let code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(VaultResponse::new(code, body))
    }

    pub async fn get(&self, url: &str, token: Option<&str>) -> Result<VaultResponse, Error> {
        let mut request = self.http.get(url);
        if let Some(token) = token {
            request = request.header(VAULT_TOKEN_HEADER, token);
        }
        self.execute(request).await
    }

    pub async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<VaultResponse, Error> {
        let mut request = self.http.post(url).json(payload);
        if let Some(token) = token {
            request = request.header(VAULT_TOKEN_HEADER, token);
        }
        self.execute(request).await
    }

    pub async fn put(
        &self,
        url: &str,
        payload: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<VaultResponse, Error> {
        let mut request = self.http.put(url).json(payload);
        if let Some(token) = token {
            request = request.header(VAULT_TOKEN_HEADER, token);
        }
        self.execute(request).await
    }

    pub async fn delete(&self, url: &str, token: &str) -> Result<VaultResponse, Error> {
        let request = self.http.delete(url).header(VAULT_TOKEN_HEADER, token);
        self.execute(request).await
    }

    /// KV list is a GET with `list=true`; there is no LIST verb in HTTP.
    pub async fn list(&self, url: &str, token: &str) -> Result<VaultResponse, Error> {
        let request = self
            .http
            .get(url)
            .query(&[("list", "true")])
            .header(VAULT_TOKEN_HEADER, token);
        self.execute(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_range() {
        assert!(VaultResponse::new(200, String::new()).successful);
        assert!(VaultResponse::new(204, String::new()).successful);
        assert!(!VaultResponse::new(300, String::new()).successful);
        assert!(!VaultResponse::new(403, String::new()).successful);
    }

    #[test]
    fn test_lazy_json_parse() {
        let response = VaultResponse::new(200, r#"{"sealed": true}"#.to_string());
        let json = response.json().unwrap();
        assert_eq!(json["sealed"], serde_json::json!(true));

        let bad = VaultResponse::new(200, "not json".to_string());
        assert!(bad.json().is_err());
    }
}
