//! OAuth2 HTTP Client
//!
//! The three exchanges with the provider: authorization-code grant,
//! refresh-token grant and the validation query.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use super::config::{AuthorizationRequest, OAuth2Config};
use super::token::TokenGrant;
use crate::config::Settings;
use crate::utils::error::{AuthError, AuthResult, ValidationFailure};
use crate::utils::logging::{log_oauth_error, log_validation_result};
use crate::utils::string_utils::{mask_token, truncate_safe};

const VALIDATION_QUERY: &str = "SELECT Id FROM User LIMIT 1";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(rename = "totalSize")]
    total_size: i64,
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    config: OAuth2Config,
    http_client: Client,
}

impl OAuthClient {
    pub fn new(config: OAuth2Config, timeout: Duration) -> AuthResult<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self { config, http_client })
    }

    pub fn from_settings(settings: &Settings) -> AuthResult<Self> {
        Self::new(OAuth2Config::from_settings(settings), settings.http_timeout)
    }

    pub fn config(&self) -> &OAuth2Config {
        &self.config
    }

    /// Authorization-code request URL; the code comes back out-of-band.
    pub fn authorization_url(&self) -> AuthResult<AuthorizationRequest> {
        self.config.authorization_request()
    }

    /// Trades an authorization code for a token pair.
    pub async fn exchange_authorization_code(&self, code: &str) -> AuthResult<TokenGrant> {
        info!(code_len = code.len(), "[OAuth2] Exchanging authorization code");

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("format", "json"),
        ];

        self.token_request(&params).await
    }

    /// Trades a refresh token for a new access token.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenGrant> {
        info!("[OAuth2] Refreshing access token");

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("format", "json"),
        ];

        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> AuthResult<TokenGrant> {
        let endpoint = self.config.token_url.as_str();

        let response = self
            .http_client
            .post(endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                log_oauth_error(endpoint, None, &e.to_string());
                AuthError::Network(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            log_oauth_error(endpoint, Some(status.as_u16()), &body);
            return Err(AuthError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let grant = TokenGrant::from_body(&body).map_err(|e| {
            log_oauth_error(endpoint, Some(status.as_u16()), &e.to_string());
            e
        })?;

        debug!(access_token = %mask_token(&grant.access_token), "[OAuth2] Token endpoint answered");
        Ok(grant)
    }

    /// Runs the validation query and explains a rejection.
    pub async fn check_access_token(
        &self,
        access_token: &str,
        instance_url: &str,
    ) -> Result<(), ValidationFailure> {
        if access_token.is_empty() {
            return Err(ValidationFailure::NoAccessToken);
        }

        let url = format!(
            "{}/services/data/{}/query/",
            instance_url.trim_end_matches('/'),
            self.config.api_version
        );

        let response = self
            .http_client
            .get(&url)
            .query(&[("q", VALIDATION_QUERY)])
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ValidationFailure::Status {
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        let result: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| ValidationFailure::Body(format!("{}: {}", e, truncate_safe(&body, 200))))?;

        if result.total_size != 1 {
            return Err(ValidationFailure::UnexpectedResult(result.total_size));
        }

        Ok(())
    }

    /// True only for HTTP 200 with `totalSize == 1`.
    pub async fn validate(&self, access_token: &str, instance_url: &str) -> bool {
        match self.check_access_token(access_token, instance_url).await {
            Ok(()) => {
                log_validation_result(true, "");
                true
            }
            Err(e) => {
                log_validation_result(false, &e.to_string());
                false
            }
        }
    }
}
