//! Token lifecycle controller.
//!
//! Owns the token state and drives it through
//! `NoToken -> RefreshAttempted -> {Valid, NeedsAuth} -> Authorized -> Valid`,
//! with `Failed` as the terminal state of an unsuccessful initialization.
//! Lower layers only report typed failures; whether a failure is terminal is
//! decided here.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::client::OAuthClient;
use super::config::AuthorizationRequest;
use super::prompt::{extract_code, CodePrompt};
use super::token::{TokenPair, TokenState, UpdatedFields};
use crate::config::Settings;
use crate::services::secrets::SecretStore;
use crate::utils::error::{AuthError, AuthResult, ConfigError, InitError};
use crate::utils::logging::{log_phase, log_store_error, log_tokens_loaded, log_tokens_saved, log_validation_result};

/// First attempt plus one retry.
const MAX_AUTHORIZATION_ATTEMPTS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No usable token established yet.
    NoToken,
    RefreshAttempted,
    NeedsAuth,
    Authorized,
    Valid,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NoToken => "no_token",
            Phase::RefreshAttempted => "refresh_attempted",
            Phase::NeedsAuth => "needs_auth",
            Phase::Authorized => "authorized",
            Phase::Valid => "valid",
            Phase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the current access token was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Refreshed,
    Authorized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ValidationOutcome {
    Valid,
    Invalid(String),
    Skipped,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }
}

/// Result of a refresh-token exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub updated: UpdatedFields,
    /// Whether the store holds the current pair afterwards.
    pub persisted: bool,
}

/// Successful initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    pub source: TokenSource,
    pub persisted: bool,
    pub instance_url: String,
    pub validation: ValidationOutcome,
}

pub struct Controller<S, P> {
    settings: Settings,
    client: OAuthClient,
    store: S,
    prompt: P,
    state: TokenState,
    phase: Phase,
}

impl<S: SecretStore, P: CodePrompt> Controller<S, P> {
    /// Fails on bad configuration before any network call is made.
    pub fn new(settings: Settings, store: S, prompt: P) -> Result<Self, InitError> {
        settings.validate()?;

        let client = OAuthClient::from_settings(&settings).map_err(|e| {
            ConfigError::invalid("SF_HTTP_TIMEOUT_SECS", format!("could not build HTTP client: {}", e))
        })?;
        let state = TokenState::new(settings.credentials.instance_url.clone(), settings.session_lifetime);

        Ok(Self {
            settings,
            client,
            store,
            prompt,
            state,
            phase: Phase::NoToken,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn tokens(&self) -> Option<&TokenPair> {
        self.state.tokens()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.state.access_token()
    }

    /// Instance URL from configuration, or the one the provider last reported.
    pub fn instance_url(&self) -> &str {
        self.state.instance_url()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn prompt(&self) -> &P {
        &self.prompt
    }

    pub fn state(&self) -> &TokenState {
        &self.state
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.state.tokens().map(TokenPair::authorization_header)
    }

    pub fn authorization_request(&self) -> AuthResult<AuthorizationRequest> {
        self.client.authorization_url()
    }

    fn set_phase(&mut self, next: Phase) {
        if self.phase != next {
            log_phase(self.phase.as_str(), next.as_str());
            self.phase = next;
        }
    }

    /// Full startup sequence: stored tokens, refresh, interactive fallback,
    /// persist and (optionally) validate.
    pub async fn initialize(&mut self) -> Result<InitReport, InitError> {
        self.set_phase(Phase::NoToken);
        self.load_stored().await;

        let (source, persisted) = match self.refresh_tokens().await {
            Ok(report) => (TokenSource::Refreshed, report.persisted),
            Err(error) => {
                warn!(error = %error, "[TokenManager] Refresh unavailable, falling back to interactive authorization");
                self.set_phase(Phase::NeedsAuth);
                (TokenSource::Authorized, self.authorize_interactively().await?)
            }
        };

        self.finish(source, persisted).await
    }

    /// Skips the refresh attempt and runs interactive authorization directly.
    pub async fn reauthorize(&mut self) -> Result<InitReport, InitError> {
        self.load_stored().await;
        self.set_phase(Phase::NeedsAuth);
        let persisted = self.authorize_interactively().await?;
        self.finish(TokenSource::Authorized, persisted).await
    }

    async fn finish(&mut self, source: TokenSource, persisted: bool) -> Result<InitReport, InitError> {
        self.set_phase(Phase::Valid);

        let validation = if self.settings.validate_on_init {
            self.validate().await
        } else {
            debug!("[TokenManager] Validation on init disabled");
            ValidationOutcome::Skipped
        };

        Ok(InitReport {
            source,
            persisted,
            instance_url: self.state.instance_url().to_string(),
            validation,
        })
    }

    /// Reads the store into memory. Any store failure counts as "nothing stored".
    pub async fn load_stored(&mut self) -> bool {
        match self.store.load().await {
            Ok(Some(tokens)) => {
                log_tokens_loaded(&self.store.describe(), tokens.refresh_token.is_some());
                self.state.load(tokens);
                true
            }
            Ok(None) => {
                info!(store = %self.store.describe(), "[TokenManager] No stored tokens");
                false
            }
            Err(e) => {
                log_store_error("load", &e.to_string());
                false
            }
        }
    }

    /// Refreshes only when the expiry estimate has passed.
    pub async fn ensure_fresh(&mut self) -> AuthResult<Option<RefreshReport>> {
        if !self.state.is_expired() {
            return Ok(None);
        }
        debug!(expires_at = ?self.state.expires_at(), "[TokenManager] Access token expired, refreshing");
        self.refresh_now().await.map(Some)
    }

    /// Forces a refresh-token exchange. On failure the controller needs
    /// interactive authorization.
    pub async fn refresh_now(&mut self) -> AuthResult<RefreshReport> {
        match self.refresh_tokens().await {
            Ok(report) => {
                self.set_phase(Phase::Valid);
                Ok(report)
            }
            Err(e) => {
                self.set_phase(Phase::NeedsAuth);
                Err(e)
            }
        }
    }

    async fn refresh_tokens(&mut self) -> AuthResult<RefreshReport> {
        let refresh_token = self
            .state
            .refresh_token()
            .ok_or(AuthError::MissingRefreshToken)?
            .to_string();

        self.set_phase(Phase::RefreshAttempted);
        let grant = self.client.refresh(&refresh_token).await?;
        let updated = self.state.apply_refresh(grant);

        if updated.instance_url {
            info!(instance_url = %self.state.instance_url(), "[TokenManager] Provider reported a new instance URL");
        }

        let persisted = if updated.tokens_changed() {
            self.persist().await
        } else {
            debug!("[TokenManager] Refresh returned the same tokens, nothing to save");
            true
        };

        Ok(RefreshReport { updated, persisted })
    }

    /// One attempt plus one confirmed retry.
    async fn authorize_interactively(&mut self) -> Result<bool, InitError> {
        let mut attempts = 0u8;

        loop {
            attempts += 1;
            match self.authorize_once().await {
                Ok(()) => {
                    self.set_phase(Phase::Authorized);
                    return Ok(self.persist().await);
                }
                Err(error) => {
                    warn!(attempt = attempts, error = %error, "[TokenManager] Authorization attempt failed");

                    if attempts >= MAX_AUTHORIZATION_ATTEMPTS {
                        self.set_phase(Phase::Failed);
                        return Err(InitError::AuthorizationFailed { attempts, source: error });
                    }
                    if !self.prompt.confirm_retry(&error).await {
                        self.set_phase(Phase::Failed);
                        return Err(InitError::RetryDeclined { source: error });
                    }
                }
            }
        }
    }

    async fn authorize_once(&mut self) -> AuthResult<()> {
        let request = self.client.authorization_url()?;
        let pasted = self.prompt.request_code(&request).await?;
        let code = extract_code(&pasted, &request.state)?;

        let grant = self.client.exchange_authorization_code(&code).await?;
        self.state.apply_authorization(grant);
        Ok(())
    }

    /// A failed save leaves the in-memory pair usable.
    async fn persist(&self) -> bool {
        let Some(tokens) = self.state.tokens() else {
            return false;
        };

        match self.store.save(tokens).await {
            Ok(()) => {
                log_tokens_saved(&self.store.describe(), &tokens.access_token);
                true
            }
            Err(e) => {
                log_store_error("save", &e.to_string());
                false
            }
        }
    }

    /// Runs the validation query against the current token and instance URL.
    pub async fn validate(&self) -> ValidationOutcome {
        let token = self.state.access_token().unwrap_or_default();

        match self.client.check_access_token(token, self.state.instance_url()).await {
            Ok(()) => {
                log_validation_result(true, "");
                ValidationOutcome::Valid
            }
            Err(e) => {
                let reason = e.to_string();
                log_validation_result(false, &reason);
                ValidationOutcome::Invalid(reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::prompt::tests::ScriptedPrompt;
    use crate::utils::error::{StoreError, StoreResult};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct MemoryStore {
        record: Mutex<Option<TokenPair>>,
        saves: Mutex<Vec<TokenPair>>,
        fail_load: bool,
        fail_save: bool,
    }

    impl MemoryStore {
        fn with(pair: TokenPair) -> Self {
            Self {
                record: Mutex::new(Some(pair)),
                ..Default::default()
            }
        }

        fn saves(&self) -> Vec<TokenPair> {
            self.saves.lock().unwrap().clone()
        }
    }

    impl SecretStore for MemoryStore {
        fn describe(&self) -> String {
            "memory".to_string()
        }

        async fn load(&self) -> StoreResult<Option<TokenPair>> {
            if self.fail_load {
                return Err(StoreError::Backend("store offline".to_string()));
            }
            Ok(self.record.lock().unwrap().clone())
        }

        async fn save(&self, tokens: &TokenPair) -> StoreResult<()> {
            if self.fail_save {
                return Err(StoreError::Backend("store offline".to_string()));
            }
            self.saves.lock().unwrap().push(tokens.clone());
            *self.record.lock().unwrap() = Some(tokens.clone());
            Ok(())
        }
    }

    fn settings_for(server: &MockServer, validate_on_init: bool) -> Settings {
        let uri = server.uri();
        let vars: HashMap<&str, String> = HashMap::from([
            ("SF_CLIENT_ID", "test_client_id".to_string()),
            ("SF_CLIENT_SECRET", "test_client_secret".to_string()),
            ("SF_USERNAME", "test_username".to_string()),
            ("SF_INSTANCE_URL", uri.clone()),
            ("SF_LOGIN_URL", uri),
            ("SF_VALIDATE_ON_INIT", validate_on_init.to_string()),
            ("SF_OPEN_BROWSER", "false".to_string()),
        ]);
        Settings::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    fn prompt_with_codes(codes: &[&str], retries: &[bool]) -> ScriptedPrompt {
        ScriptedPrompt {
            codes: codes.iter().map(|c| Ok(c.to_string())).collect(),
            retries: retries.iter().copied().collect(),
            echo_state: true,
            ..Default::default()
        }
    }

    async fn mount_refresh(server: &MockServer, status: u16, body: serde_json::Value, times: u64) {
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(times)
            .mount(server)
            .await;
    }

    async fn mount_exchange(server: &MockServer, status: u16, body: serde_json::Value, times: u64) {
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .expect(times)
            .mount(server)
            .await;
    }

    async fn mount_query(server: &MockServer, token: &str, status: u16, total_size: i64) {
        Mock::given(method("GET"))
            .and(path("/services/data/v60.0/query/"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "totalSize": total_size, "done": true })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_refresh_success_saves_once() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, json!({ "access_token": "new_access", "token_type": "Bearer" }), 1).await;
        mount_query(&server, "new_access", 200, 1).await;

        let store = MemoryStore::with(TokenPair::new("old_access", Some("rt".to_string())));
        let mut controller = Controller::new(settings_for(&server, true), store, ScriptedPrompt::default()).unwrap();

        let report = controller.initialize().await.unwrap();

        assert_eq!(report.source, TokenSource::Refreshed);
        assert!(report.persisted);
        assert_eq!(report.validation, ValidationOutcome::Valid);
        assert_eq!(controller.prompt().code_requests, 0);
        assert_eq!(controller.phase(), Phase::Valid);
        assert_eq!(
            controller.store().saves(),
            vec![TokenPair::new("new_access", Some("rt".to_string()))]
        );
        assert_eq!(controller.authorization_header().as_deref(), Some("Bearer new_access"));
    }

    #[tokio::test]
    async fn test_no_refresh_token_authorizes_interactively() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, json!({ "access_token": "unused" }), 0).await;
        Mock::given(method("POST"))
            .and(path("/services/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=aPrx%3D%3D"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh_access",
                "refresh_token": "fresh_refresh",
                "instance_url": server.uri()
            })))
            .expect(1)
            .mount(&server)
            .await;

        let prompt = prompt_with_codes(&["aPrx%3D%3D"], &[]);
        let mut controller = Controller::new(settings_for(&server, false), MemoryStore::default(), prompt).unwrap();

        let report = controller.initialize().await.unwrap();

        assert_eq!(report.source, TokenSource::Authorized);
        assert!(report.persisted);
        assert_eq!(report.validation, ValidationOutcome::Skipped);
        assert_eq!(controller.phase(), Phase::Valid);
        assert_eq!(
            controller.store().saves(),
            vec![TokenPair::new("fresh_access", Some("fresh_refresh".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_rejected_refresh_falls_back_to_authorization() {
        let server = MockServer::start().await;
        mount_refresh(&server, 400, json!({ "error": "invalid_grant", "error_description": "expired access/refresh token" }), 1).await;
        mount_exchange(&server, 200, json!({ "access_token": "fresh_access", "refresh_token": "fresh_refresh" }), 1).await;

        let store = MemoryStore::with(TokenPair::new("old_access", Some("stale".to_string())));
        let mut controller = Controller::new(settings_for(&server, false), store, prompt_with_codes(&["code1"], &[])).unwrap();

        let report = controller.initialize().await.unwrap();

        assert_eq!(report.source, TokenSource::Authorized);
        assert_eq!(controller.access_token(), Some("fresh_access"));
        assert_eq!(controller.store().saves().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_retry() {
        let server = MockServer::start().await;
        mount_exchange(&server, 400, json!({ "error": "invalid_grant", "error_description": "authentication failure" }), 1).await;

        let prompt = prompt_with_codes(&["bad"], &[false]);
        let mut controller = Controller::new(settings_for(&server, false), MemoryStore::default(), prompt).unwrap();

        let err = controller.initialize().await.unwrap_err();

        assert!(matches!(err, InitError::RetryDeclined { source: AuthError::Http { status: 400, .. } }));
        assert_eq!(controller.phase(), Phase::Failed);
        assert!(controller.store().saves().is_empty());
        assert!(controller.tokens().is_none());
    }

    #[tokio::test]
    async fn test_two_failed_exchanges() {
        let server = MockServer::start().await;
        mount_exchange(&server, 400, json!({ "error": "invalid_grant" }), 2).await;

        let prompt = prompt_with_codes(&["bad1", "bad2"], &[true]);
        let mut controller = Controller::new(settings_for(&server, false), MemoryStore::default(), prompt).unwrap();

        let err = controller.initialize().await.unwrap_err();

        assert!(matches!(err, InitError::AuthorizationFailed { attempts: 2, .. }));
        assert_eq!(controller.prompt().code_requests, 2);
        assert_eq!(controller.prompt().retry_requests, 1);
        assert!(controller.store().saves().is_empty());
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let server = MockServer::start().await;
        mount_exchange(&server, 200, json!({ "access_token": "fresh_access", "refresh_token": "fresh_refresh" }), 1).await;

        let prompt = ScriptedPrompt {
            codes: [Err(AuthError::Timeout), Ok("good".to_string())].into_iter().collect(),
            retries: [true].into_iter().collect(),
            echo_state: true,
            ..Default::default()
        };
        let mut controller = Controller::new(settings_for(&server, false), MemoryStore::default(), prompt).unwrap();

        let report = controller.initialize().await.unwrap();
        assert_eq!(report.source, TokenSource::Authorized);
        assert_eq!(controller.access_token(), Some("fresh_access"));
    }

    #[tokio::test]
    async fn test_code_timeout_without_retry() {
        let server = MockServer::start().await;
        mount_exchange(&server, 200, json!({ "access_token": "unused" }), 0).await;

        let prompt = ScriptedPrompt {
            codes: [Err(AuthError::Timeout)].into_iter().collect(),
            ..Default::default()
        };
        let mut controller = Controller::new(settings_for(&server, false), MemoryStore::default(), prompt).unwrap();

        let err = controller.initialize().await.unwrap_err();
        assert!(matches!(err, InitError::RetryDeclined { source: AuthError::Timeout }));
    }

    #[tokio::test]
    async fn test_store_failures_are_not_fatal() {
        let server = MockServer::start().await;
        mount_exchange(&server, 200, json!({ "access_token": "fresh_access", "refresh_token": "fresh_refresh" }), 1).await;

        let store = MemoryStore {
            fail_load: true,
            fail_save: true,
            ..Default::default()
        };
        let mut controller = Controller::new(settings_for(&server, false), store, prompt_with_codes(&["code1"], &[])).unwrap();

        let report = controller.initialize().await.unwrap();

        assert!(!report.persisted);
        assert_eq!(controller.phase(), Phase::Valid);
        assert_eq!(controller.access_token(), Some("fresh_access"));
    }

    #[tokio::test]
    async fn test_invalid_token_does_not_block() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, json!({ "access_token": "new_access" }), 1).await;
        mount_query(&server, "new_access", 401, 0).await;

        let store = MemoryStore::with(TokenPair::new("old_access", Some("rt".to_string())));
        let mut controller = Controller::new(settings_for(&server, true), store, ScriptedPrompt::default()).unwrap();

        let report = controller.initialize().await.unwrap();

        assert!(matches!(report.validation, ValidationOutcome::Invalid(ref reason) if reason.contains("401")));
        assert_eq!(controller.phase(), Phase::Valid);
    }

    #[tokio::test]
    async fn test_unchanged_refresh_is_not_saved() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, json!({ "access_token": "same_access", "refresh_token": "rt" }), 1).await;

        let store = MemoryStore::with(TokenPair::new("same_access", Some("rt".to_string())));
        let mut controller = Controller::new(settings_for(&server, false), store, ScriptedPrompt::default()).unwrap();

        let report = controller.initialize().await.unwrap();

        assert_eq!(report.source, TokenSource::Refreshed);
        assert!(report.persisted);
        assert!(controller.store().saves().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_updates_instance_url() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, json!({ "access_token": "new_access", "instance_url": "https://na2.salesforce.com" }), 1).await;

        let store = MemoryStore::with(TokenPair::new("old_access", Some("rt".to_string())));
        let mut controller = Controller::new(settings_for(&server, false), store, ScriptedPrompt::default()).unwrap();

        let report = controller.initialize().await.unwrap();
        assert_eq!(report.instance_url, "https://na2.salesforce.com");
        assert_eq!(controller.instance_url(), "https://na2.salesforce.com");
    }

    #[tokio::test]
    async fn test_ensure_fresh_skips_unexpired_token() {
        let server = MockServer::start().await;
        mount_refresh(&server, 200, json!({ "access_token": "new_access" }), 1).await;

        let store = MemoryStore::with(TokenPair::new("old_access", Some("rt".to_string())));
        let mut controller = Controller::new(settings_for(&server, false), store, ScriptedPrompt::default()).unwrap();

        controller.initialize().await.unwrap();
        assert_eq!(controller.ensure_fresh().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_refresh_now_without_refresh_token() {
        let server = MockServer::start().await;
        let store = MemoryStore::with(TokenPair::new("old_access", None));
        let mut controller = Controller::new(settings_for(&server, false), store, ScriptedPrompt::default()).unwrap();

        assert!(controller.load_stored().await);
        assert!(matches!(controller.refresh_now().await, Err(AuthError::MissingRefreshToken)));
        assert_eq!(controller.phase(), Phase::NeedsAuth);
    }

    #[tokio::test]
    async fn test_missing_config_fails_before_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut settings = settings_for(&server, true);
        settings.credentials.client_id.clear();

        let result = Controller::new(settings, MemoryStore::default(), ScriptedPrompt::default());
        assert!(matches!(result, Err(InitError::Config(ConfigError::Missing("SF_CLIENT_ID")))));
    }
}
