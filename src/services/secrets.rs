//! Secret store abstraction.
//!
//! A store holds at most one token pair. Callers never branch on the backend:
//! they get a [`SecretStoreBackend`] from configuration and talk to it through
//! [`SecretStore`].

use super::aws_secrets::AwsSecretStore;
use super::local_store::LocalFileStore;
use crate::auth::token::TokenPair;
use crate::config::SecretBackend;
use crate::utils::error::{ConfigError, StoreResult};

#[allow(async_fn_in_trait)]
pub trait SecretStore {
    /// Human-readable location, used in logs and status output.
    fn describe(&self) -> String;

    /// `Ok(None)` when nothing has been stored yet.
    async fn load(&self) -> StoreResult<Option<TokenPair>>;

    /// Replaces the stored pair.
    async fn save(&self, tokens: &TokenPair) -> StoreResult<()>;
}

/// The configured backend.
#[derive(Debug)]
pub enum SecretStoreBackend {
    Local(LocalFileStore),
    Aws(AwsSecretStore),
}

impl SecretStoreBackend {
    pub async fn from_backend(backend: &SecretBackend) -> Result<Self, ConfigError> {
        match backend {
            SecretBackend::Local { path } => Ok(Self::Local(LocalFileStore::new(path.clone()))),
            SecretBackend::Aws(aws) => Ok(Self::Aws(AwsSecretStore::connect(aws).await)),
            SecretBackend::Azure => Err(ConfigError::UnsupportedBackend(backend.name().to_string())),
        }
    }
}

impl SecretStore for SecretStoreBackend {
    fn describe(&self) -> String {
        match self {
            Self::Local(store) => store.describe(),
            Self::Aws(store) => store.describe(),
        }
    }

    async fn load(&self) -> StoreResult<Option<TokenPair>> {
        match self {
            Self::Local(store) => store.load().await,
            Self::Aws(store) => store.load().await,
        }
    }

    async fn save(&self, tokens: &TokenPair) -> StoreResult<()> {
        match self {
            Self::Local(store) => store.save(tokens).await,
            Self::Aws(store) => store.save(tokens).await,
        }
    }
}
