use crate::config::DriverConfig;
use crate::error::Error;
use crate::manager::{DEFAULT_READY_TIMEOUT, TokenWatch};
use crate::transport::{Transport, VaultResponse};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One KV v2 secret version.
#[derive(Debug, Clone)]
pub struct Secret {
    pub data: HashMap<String, serde_json::Value>,
    pub version: u64,
}

/// KV v2 client. Contains no lifecycle logic: every operation first waits
/// on the readiness gate, then issues its call with the token taken from
/// the gate. A gate timeout fails the operation rather than proceeding with
/// a stale or absent token.
#[derive(Debug, Clone)]
pub struct KvClient {
    transport: Transport,
    config: Arc<DriverConfig>,
    watch: TokenWatch,
    wait_timeout: Duration,
}

impl KvClient {
    pub fn new(config: Arc<DriverConfig>, watch: TokenWatch) -> Self {
        Self {
            transport: Transport::new(),
            config,
            watch,
            wait_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    async fn client_token(&self) -> Result<String, Error> {
        let token = self.watch.wait_ready(self.wait_timeout).await?;
        Ok(token.client_token().to_string())
    }

    pub async fn read(&self, path: &str) -> Result<Secret, Error> {
        let token = self.client_token().await?;
        let url = self.config.kv2_data_url(path);

        let response = self
            .transport
            .get(&url, Some(&token))
            .await
            .map_err(|e| Error::ReadFailed(e.to_string()))?;
        check_read(&response, path)?;

        #[derive(Deserialize)]
        struct ReadResponse {
            data: ReadData,
        }
        #[derive(Deserialize)]
        struct ReadData {
            data: HashMap<String, serde_json::Value>,
            metadata: VersionMetadata,
        }
        #[derive(Deserialize)]
        struct VersionMetadata {
            version: u64,
        }

        let parsed: ReadResponse =
            serde_json::from_str(&response.body).map_err(|e| Error::ReadFailed(e.to_string()))?;
        Ok(Secret {
            data: parsed.data.data,
            version: parsed.data.metadata.version,
        })
    }

    /// Write a secret version; returns the version number the backend
    /// assigned.
    pub async fn write(
        &self,
        path: &str,
        data: &HashMap<String, serde_json::Value>,
    ) -> Result<u64, Error> {
        let token = self.client_token().await?;
        let url = self.config.kv2_data_url(path);
        let payload = serde_json::json!({ "data": data });

        let response = self
            .transport
            .post(&url, &payload, Some(&token))
            .await
            .map_err(|e| Error::WriteFailed(e.to_string()))?;
        check_write(&response, path)?;

        #[derive(Deserialize)]
        struct WriteResponse {
            data: VersionMetadata,
        }
        #[derive(Deserialize)]
        struct VersionMetadata {
            version: u64,
        }

        let parsed: WriteResponse =
            serde_json::from_str(&response.body).map_err(|e| Error::WriteFailed(e.to_string()))?;
        Ok(parsed.data.version)
    }

    /// Soft-delete the latest version of a secret.
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        let token = self.client_token().await?;
        let url = self.config.kv2_data_url(path);

        let response = self
            .transport
            .delete(&url, &token)
            .await
            .map_err(|e| Error::WriteFailed(e.to_string()))?;
        check_write(&response, path)?;
        Ok(())
    }

    /// List the keys under a path.
    pub async fn list(&self, path: &str) -> Result<Vec<String>, Error> {
        let token = self.client_token().await?;
        let url = self.config.kv2_metadata_url(path);

        let response = self
            .transport
            .list(&url, &token)
            .await
            .map_err(|e| Error::ReadFailed(e.to_string()))?;
        check_read(&response, path)?;

        #[derive(Deserialize)]
        struct ListResponse {
            data: ListData,
        }
        #[derive(Deserialize)]
        struct ListData {
            keys: Vec<String>,
        }

        let parsed: ListResponse =
            serde_json::from_str(&response.body).map_err(|e| Error::ReadFailed(e.to_string()))?;
        Ok(parsed.data.keys)
    }
}

fn check_read(response: &VaultResponse, path: &str) -> Result<(), Error> {
    if response.successful {
        return Ok(());
    }
    Err(Error::ReadFailed(match response.code {
        404 => format!("HTTP 404 for {path}, this is usually a problem with the path"),
        403 => format!("HTTP 403 for {path}, this is usually a permissions issue"),
        code => format!("unexpected HTTP {code} for {path}: {}", response.body),
    }))
}

fn check_write(response: &VaultResponse, path: &str) -> Result<(), Error> {
    if response.successful {
        return Ok(());
    }
    Err(Error::WriteFailed(match response.code {
        400 => format!("HTTP 400 for {path}, in KV v2 this may be a check-and-set issue"),
        404 => format!("HTTP 404 for {path}, this is usually a problem with the path"),
        403 => format!("HTTP 403 for {path}, this is usually a permissions issue"),
        code => format!("unexpected HTTP {code} for {path}: {}", response.body),
    }))
}
