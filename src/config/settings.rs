use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::utils::error::ConfigError;
use crate::utils::logging::log_config_loaded;

pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";
pub const DEFAULT_API_VERSION: &str = "v60.0";
pub const DEFAULT_TOKEN_PATH: &str = ".tokens/.token";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CODE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_PROMPT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_SESSION_LIFETIME_MINUTES: u64 = 240;
/// One year; longer sessions are not something the provider issues.
const MAX_SESSION_LIFETIME_MINUTES: u64 = 366 * 24 * 60;

/// Connected-app credentials. Loaded once, never mutated.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub instance_url: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"****")
            .field("username", &self.username)
            .field("instance_url", &self.instance_url)
            .finish()
    }
}

/// AWS Secrets Manager location and optional static credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct AwsSecretSettings {
    pub secret_name: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
}

impl fmt::Debug for AwsSecretSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSecretSettings")
            .field("secret_name", &self.secret_name)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("static_credentials", &self.secret_access_key.is_some())
            .finish()
    }
}

/// Where the token pair is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretBackend {
    Local { path: PathBuf },
    Aws(AwsSecretSettings),
    /// Accepted by configuration so the choice is explicit; building a store
    /// for it fails with [`ConfigError::UnsupportedBackend`].
    Azure,
}

impl SecretBackend {
    pub fn name(&self) -> &'static str {
        match self {
            SecretBackend::Local { .. } => "local",
            SecretBackend::Aws(_) => "aws",
            SecretBackend::Azure => "azure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub credentials: Credentials,
    pub login_url: String,
    pub redirect_uri: String,
    pub api_version: String,
    pub secret_backend: SecretBackend,
    pub http_timeout: Duration,
    pub code_timeout: Duration,
    pub retry_prompt_timeout: Duration,
    pub session_lifetime: Duration,
    pub validate_on_init: bool,
    pub open_browser: bool,
}

impl Settings {
    /// Loads `.env` (outside tests) and reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        if cfg!(not(test)) {
            dotenvy::dotenv().ok();
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let credentials = Credentials {
            client_id: require("SF_CLIENT_ID")?,
            client_secret: require("SF_CLIENT_SECRET")?,
            username: require("SF_USERNAME")?,
            instance_url: require("SF_INSTANCE_URL")?.trim_end_matches('/').to_string(),
        };

        let login_url = get("SF_LOGIN_URL")
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let redirect_uri = get("SF_REDIRECT_URI")
            .unwrap_or_else(|| format!("{}/services/oauth2/success", login_url));
        let api_version = get("SF_API_VERSION").unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

        let secret_backend = match get("SECRET_MANAGEMENT_TYPE")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => SecretBackend::Local {
                path: PathBuf::from(get("SF_TOKEN_PATH").unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string())),
            },
            "aws" => SecretBackend::Aws(AwsSecretSettings {
                secret_name: require("AWSSM_SECRET_NAME")?,
                region: require("AWSSM_REGION_NAME")?,
                access_key_id: get("AWS_ACCESS_KEY_ID"),
                secret_access_key: get("AWS_SECRET_ACCESS_KEY"),
                session_token: get("AWS_SESSION_TOKEN"),
            }),
            "azure" => SecretBackend::Azure,
            other => {
                return Err(ConfigError::invalid(
                    "SECRET_MANAGEMENT_TYPE",
                    format!("'{}' (expected local, aws or azure)", other),
                ))
            }
        };

        let secs = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match get(key) {
                Some(v) => v
                    .parse::<u64>()
                    .map_err(|e| ConfigError::invalid(key, format!("'{}': {}", v, e))),
                None => Ok(default),
            }
        };
        let flag = |key: &'static str, default: bool| -> Result<bool, ConfigError> {
            match get(key).map(|v| v.to_lowercase()) {
                None => Ok(default),
                Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
                Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
                Some(v) => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", v))),
            }
        };

        let settings = Self {
            credentials,
            login_url,
            redirect_uri,
            api_version,
            secret_backend,
            http_timeout: Duration::from_secs(secs("SF_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?),
            code_timeout: Duration::from_secs(secs("SF_CODE_TIMEOUT_SECS", DEFAULT_CODE_TIMEOUT_SECS)?),
            retry_prompt_timeout: Duration::from_secs(secs(
                "SF_RETRY_PROMPT_TIMEOUT_SECS",
                DEFAULT_RETRY_PROMPT_TIMEOUT_SECS,
            )?),
            session_lifetime: Duration::from_secs(
                secs("SF_SESSION_LIFETIME_MINUTES", DEFAULT_SESSION_LIFETIME_MINUTES)?
                    .checked_mul(60)
                    .ok_or_else(|| ConfigError::invalid("SF_SESSION_LIFETIME_MINUTES", "value is too large"))?,
            ),
            validate_on_init: flag("SF_VALIDATE_ON_INIT", true)?,
            open_browser: flag("SF_OPEN_BROWSER", true)?,
        };

        settings.validate()?;
        log_config_loaded(settings.secret_backend.name(), &settings.credentials.instance_url);
        Ok(settings)
    }

    /// Checks the invariants a hand-built `Settings` must also satisfy.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let creds = &self.credentials;
        if creds.client_id.is_empty() {
            return Err(ConfigError::Missing("SF_CLIENT_ID"));
        }
        if creds.client_secret.is_empty() {
            return Err(ConfigError::Missing("SF_CLIENT_SECRET"));
        }
        if creds.username.is_empty() {
            return Err(ConfigError::Missing("SF_USERNAME"));
        }

        Self::check_http_url("SF_INSTANCE_URL", &creds.instance_url)?;
        Self::check_http_url("SF_LOGIN_URL", &self.login_url)?;
        Self::check_http_url("SF_REDIRECT_URI", &self.redirect_uri)?;

        if self.api_version.is_empty() {
            return Err(ConfigError::Missing("SF_API_VERSION"));
        }

        let lifetime_minutes = self.session_lifetime.as_secs() / 60;
        if lifetime_minutes == 0 || lifetime_minutes > MAX_SESSION_LIFETIME_MINUTES {
            return Err(ConfigError::invalid(
                "SF_SESSION_LIFETIME_MINUTES",
                format!("{} is outside 1..={}", lifetime_minutes, MAX_SESSION_LIFETIME_MINUTES),
            ));
        }

        Ok(())
    }

    fn check_http_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
        if value.is_empty() {
            return Err(ConfigError::Missing(key));
        }
        let url = Url::parse(value).map_err(|e| ConfigError::invalid(key, format!("'{}': {}", value, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::invalid(key, format!("'{}' must be an http(s) URL", value)));
        }
        Ok(())
    }

    /// `<login>/services/oauth2/token`
    pub fn token_endpoint(&self) -> String {
        format!("{}/services/oauth2/token", self.login_url)
    }

    /// `<instance>/services/oauth2/authorize`
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/services/oauth2/authorize", self.credentials.instance_url)
    }
}
