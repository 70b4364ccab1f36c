use crate::auth::AuthClient;
use crate::config::{Credentials, DriverConfig};
use crate::housekeeping::Housekeeping;
use crate::kv::KvClient;
use crate::manager::{TokenManager, TokenWatch};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Convenience facade wiring the whole lifecycle together: builds the auth
/// client and token manager, moves them into a background housekeeping
/// worker, and hands out gated dependent clients.
///
/// For listener access to the raw event stream, assemble [`Housekeeping`]
/// directly and call `subscribe_events` before spawning.
pub struct Driver {
    config: Arc<DriverConfig>,
    watch: TokenWatch,
    worker: JoinHandle<()>,
}

impl Driver {
    /// Start the background worker. The first housekeeping tick runs
    /// immediately; dependent clients block on the readiness gate until it
    /// produces a token.
    pub fn start(config: DriverConfig, credentials: Credentials) -> Self {
        let config = Arc::new(config);
        let auth = AuthClient::new(Arc::clone(&config));
        let housekeeping = Housekeeping::new(auth, TokenManager::new(), credentials);
        let watch = housekeeping.subscribe();
        let worker = housekeeping.spawn();
        Self {
            config,
            watch,
            worker,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Readiness gate handle for ad-hoc token access.
    pub fn watch(&self) -> TokenWatch {
        self.watch.clone()
    }

    /// A KV v2 client gated on this driver's token lifecycle.
    pub fn kv(&self) -> KvClient {
        KvClient::new(Arc::clone(&self.config), self.watch.clone())
    }

    /// Stop the background worker. In-flight calls are dropped, not drained.
    pub fn shutdown(self) {
        self.worker.abort();
    }
}
