//! vault-lifecycle - token lifecycle management for a Vault-style backend
//!
//! Authenticate once with one of four credential schemes (token, LDAP,
//! AppRole, userpass); a background housekeeping worker then keeps a usable
//! token alive for the life of the process, renewing or re-acquiring it as
//! needed, and distributes the current token to dependent clients through a
//! readiness gate so no privileged call ever runs before a token exists.

mod auth;
mod config;
mod driver;
mod error;
mod housekeeping;
mod kv;
mod manager;
mod token;
mod transport;

pub use auth::{AuthClient, InitOutcome, SealStatus};
pub use config::{Credentials, DriverConfig, DriverConfigBuilder, HousekeepingConfig};
pub use driver::Driver;
pub use error::Error;
pub use housekeeping::{Housekeeping, NoCache, TokenCache};
pub use kv::{KvClient, Secret};
pub use manager::{DEFAULT_READY_TIMEOUT, TokenEvent, TokenManager, TokenWatch};
pub use token::{RenewalKind, Token, TokenRenewal};
pub use transport::{Transport, VaultResponse};
