//! # OAuth2 Authentication
//!
//! Token lifecycle against the provider's OAuth2 endpoints.
//!
//! ## Structure:
//! - `config.rs`: OAuth2 endpoints and authorization URL
//! - `client.rs`: HTTP exchanges (code grant, refresh grant, validation query)
//! - `token.rs`: token pair, token grant and in-memory token state
//! - `prompt.rs`: interactive code capture
//! - `token_manager.rs`: the controller driving initialization and refresh

pub mod client;
pub mod config;
pub mod prompt;
pub mod token;
pub mod token_manager;

pub use client::OAuthClient;
pub use config::{AuthorizationRequest, OAuth2Config};
pub use prompt::{extract_code, CodePrompt, ConsolePrompt};
pub use token::{TokenGrant, TokenPair, TokenState, UpdatedFields};
pub use token_manager::{Controller, InitReport, Phase, RefreshReport, TokenSource, ValidationOutcome};
