use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use super::string_utils::mask_token;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `sfauth=info`, or `sfauth=debug` when
/// `verbose` is on. Logs go to stderr so stdout stays machine-readable.
pub fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "sfauth=debug" } else { "sfauth=info" };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn log_config_loaded(backend: &str, instance_url: &str) {
    info!(backend, instance_url, "[Config] Configuration loaded");
}

pub fn log_tokens_loaded(source: &str, has_refresh_token: bool) {
    info!(source, has_refresh_token, "[SecretStore] Tokens loaded from secret store");
}

pub fn log_tokens_saved(destination: &str, access_token: &str) {
    info!(destination, access_token = %mask_token(access_token), "[SecretStore] Tokens saved");
}

pub fn log_store_error(operation: &str, error: &str) {
    warn!(operation, error, "[SecretStore] Operation failed");
}

pub fn log_oauth_error(endpoint: &str, status: Option<u16>, error: &str) {
    error!(endpoint, ?status, error, "[OAuth2] Exchange failed");
}

pub fn log_validation_result(valid: bool, detail: &str) {
    if valid {
        info!("[OAuth2] Access token is valid");
    } else {
        warn!(detail, "[OAuth2] Access token is not valid");
    }
}

pub fn log_phase(from: &str, to: &str) {
    debug!(from, to, "[TokenManager] Phase change");
}
