//! Salesforce OAuth2 token lifecycle.
//!
//! Loads a stored token pair, refreshes it, falls back to the interactive
//! authorization-code flow when refresh is impossible, persists the result
//! through a secret store and validates it against the REST API.
//!
//! ```no_run
//! use sfauth::auth::{ConsolePrompt, Controller};
//! use sfauth::config::Settings;
//! use sfauth::services::SecretStoreBackend;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let settings = Settings::from_env()?;
//! let store = SecretStoreBackend::from_backend(&settings.secret_backend).await?;
//! let prompt = ConsolePrompt::from_settings(&settings);
//!
//! let mut controller = Controller::new(settings, store, prompt)?;
//! let report = controller.initialize().await?;
//! println!("{:?} via {:?}", controller.authorization_header(), report.source);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod services;
pub mod utils;

pub use auth::{Controller, InitReport, Phase, TokenPair};
pub use config::Settings;
pub use services::{SecretStore, SecretStoreBackend};
pub use utils::error::{AuthError, ConfigError, InitError, StoreError, ValidationFailure};
