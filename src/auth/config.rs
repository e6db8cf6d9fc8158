//! OAuth2 Configuration
//!
//! Everything the OAuth client needs, derived once from [`Settings`].

use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, CsrfToken, RedirectUrl, TokenUrl};
use url::Url;

use crate::config::Settings;
use crate::utils::error::AuthResult;

/// Authorization URL plus the CSRF state it carries.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
}

#[derive(Clone)]
pub struct OAuth2Config {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub api_version: String,
}

impl std::fmt::Debug for OAuth2Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuth2Config")
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("authorize_url", &self.authorize_url)
            .field("token_url", &self.token_url)
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl OAuth2Config {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            client_id: settings.credentials.client_id.clone(),
            client_secret: settings.credentials.client_secret.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            authorize_url: settings.authorize_endpoint(),
            token_url: settings.token_endpoint(),
            api_version: settings.api_version.clone(),
        }
    }

    /// Builds the authorization-code request URL with a fresh random state.
    pub fn authorization_request(&self) -> AuthResult<AuthorizationRequest> {
        let client = BasicClient::new(
            ClientId::new(self.client_id.clone()),
            Some(ClientSecret::new(self.client_secret.clone())),
            AuthUrl::new(self.authorize_url.clone())?,
            Some(TokenUrl::new(self.token_url.clone())?),
        )
        .set_redirect_uri(RedirectUrl::new(self.redirect_uri.clone())?);

        let (url, csrf_token) = client.authorize_url(CsrfToken::new_random).url();

        Ok(AuthorizationRequest {
            url,
            state: csrf_token.secret().clone(),
        })
    }
}
