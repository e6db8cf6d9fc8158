use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::error::{AuthError, AuthResult};
use crate::utils::string_utils::truncate_safe;

/// Access/refresh token pair. The serialized form is the secret record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl TokenPair {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }

    /// `Bearer <access token>` for the Authorization header.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Raw token endpoint body; every field optional so a missing
/// `access_token` becomes a typed error instead of a serde one.
#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    instance_url: Option<String>,
    issued_at: Option<String>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Successful token endpoint response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub instance_url: Option<String>,
    pub issued_at: Option<String>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl TokenGrant {
    /// Parses a 2xx token endpoint body.
    pub fn from_body(body: &str) -> AuthResult<Self> {
        let raw: RawTokenResponse = serde_json::from_str(body).map_err(|e| {
            AuthError::MalformedResponse(format!("{} in body '{}'", e, truncate_safe(body, 200)))
        })?;

        if let Some(error) = raw.error {
            return Err(AuthError::MalformedResponse(format!(
                "{}: {}",
                error,
                raw.error_description.unwrap_or_default()
            )));
        }

        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AuthError::MalformedResponse("response has no access_token".to_string()))?;

        Ok(Self {
            access_token,
            refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
            instance_url: raw.instance_url.filter(|u| !u.is_empty()),
            issued_at: raw.issued_at,
            token_type: raw.token_type,
            scope: raw.scope,
        })
    }
}

/// Which fields a refresh actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdatedFields {
    pub access_token: bool,
    pub refresh_token: bool,
    pub instance_url: bool,
}

impl UpdatedFields {
    pub fn any(&self) -> bool {
        self.access_token || self.refresh_token || self.instance_url
    }

    /// Whether the persisted record differs (the instance URL is not stored).
    pub fn tokens_changed(&self) -> bool {
        self.access_token || self.refresh_token
    }
}

/// In-memory token state: current pair, instance URL and expiry estimate.
#[derive(Debug, Clone)]
pub struct TokenState {
    tokens: Option<TokenPair>,
    instance_url: String,
    expires_at: Option<DateTime<Utc>>,
    session_lifetime: chrono::Duration,
}

impl TokenState {
    pub fn new(instance_url: impl Into<String>, session_lifetime: Duration) -> Self {
        Self {
            tokens: None,
            instance_url: instance_url.into(),
            expires_at: None,
            session_lifetime: chrono::Duration::from_std(session_lifetime)
                .unwrap_or_else(|_| chrono::Duration::hours(4)),
        }
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.tokens.as_ref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.as_ref().and_then(|t| t.refresh_token.as_deref())
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    /// Tokens read from a store have an unknown age, so no expiry is set.
    pub fn load(&mut self, tokens: TokenPair) {
        self.tokens = Some(tokens);
        self.expires_at = None;
    }

    /// Saturates at the latest representable instant.
    fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.session_lifetime)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Unknown expiry counts as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now >= at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Merges a refresh grant, reporting only the fields that changed.
    pub fn apply_refresh(&mut self, grant: TokenGrant) -> UpdatedFields {
        let mut updated = UpdatedFields::default();
        let previous = self.tokens.take();

        let refresh_token = match (grant.refresh_token, previous.as_ref().and_then(|p| p.refresh_token.clone())) {
            (Some(new), Some(old)) if new == old => Some(old),
            (Some(new), _) => {
                updated.refresh_token = true;
                Some(new)
            }
            (None, old) => old,
        };

        if previous.as_ref().map(|p| p.access_token.as_str()) != Some(grant.access_token.as_str()) {
            updated.access_token = true;
        }

        if let Some(url) = grant.instance_url {
            if url != self.instance_url {
                self.instance_url = url;
                updated.instance_url = true;
            }
        }

        self.tokens = Some(TokenPair::new(grant.access_token, refresh_token));
        self.expires_at = Some(self.expiry_from(Utc::now()));
        updated
    }

    /// Replaces the pair with the result of an authorization-code exchange.
    pub fn apply_authorization(&mut self, grant: TokenGrant) {
        let refresh_token = grant
            .refresh_token
            .or_else(|| self.refresh_token().map(str::to_string));

        if let Some(url) = grant.instance_url {
            self.instance_url = url;
        }

        self.tokens = Some(TokenPair::new(grant.access_token, refresh_token));
        self.expires_at = Some(self.expiry_from(Utc::now()));
    }
}
