//! Interactive capture of the authorization code.
//!
//! The user authorizes in a browser, gets redirected to the success page and
//! pastes either the code or the whole redirect URL back into the console.

use std::io::Write as _;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use url::{form_urlencoded, Url};

use super::config::AuthorizationRequest;
use crate::config::Settings;
use crate::utils::error::{AuthError, AuthResult};

/// Source of authorization codes and retry decisions.
#[allow(async_fn_in_trait)]
pub trait CodePrompt {
    /// Presents the authorization URL and returns what the user pasted.
    async fn request_code(&mut self, request: &AuthorizationRequest) -> AuthResult<String>;

    /// Asks whether to attempt authorization once more after `error`.
    async fn confirm_retry(&mut self, error: &AuthError) -> bool;
}

/// Reads from stdin with a deadline on every read.
pub struct ConsolePrompt {
    lines: Lines<BufReader<Stdin>>,
    code_timeout: Duration,
    retry_timeout: Duration,
    open_browser: bool,
}

impl ConsolePrompt {
    pub fn new(code_timeout: Duration, retry_timeout: Duration, open_browser: bool) -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            code_timeout,
            retry_timeout,
            open_browser,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.code_timeout,
            settings.retry_prompt_timeout,
            settings.open_browser,
        )
    }

    /// `Ok(None)` on timeout or end of input. `next_line` is cancel safe, so a
    /// timed-out read loses nothing.
    async fn read_line(&mut self, timeout: Duration) -> AuthResult<Option<String>> {
        match tokio::time::timeout(timeout, self.lines.next_line()).await {
            Ok(line) => Ok(line?),
            Err(_) => Ok(None),
        }
    }

    /// Prompts go to stderr; stdout carries command output.
    fn show(text: &str) {
        eprint!("{}", text);
        let _ = std::io::stderr().flush();
    }
}

impl CodePrompt for ConsolePrompt {
    async fn request_code(&mut self, request: &AuthorizationRequest) -> AuthResult<String> {
        eprintln!("\nAuthorize this application in your browser:\n  {}\n", request.url);

        if self.open_browser {
            match webbrowser::open(request.url.as_str()) {
                Ok(()) => info!("[Prompt] Browser opened on the authorization URL"),
                Err(e) => warn!(error = %e, "[Prompt] Could not open a browser, open the URL manually"),
            }
        }

        Self::show("Paste the code (or the full redirect URL): ");
        match tokio::time::timeout(self.code_timeout, self.lines.next_line()).await {
            Err(_) => {
                eprintln!();
                Err(AuthError::Timeout)
            }
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => Err(AuthError::InvalidCode("no input".to_string())),
            Ok(Err(e)) => Err(AuthError::Input(e)),
        }
    }

    async fn confirm_retry(&mut self, error: &AuthError) -> bool {
        eprintln!("Authorization failed: {}", error);
        Self::show(&format!(
            "Would you like to try again? (Y/n) (default is \"n\" after {} seconds): ",
            self.retry_timeout.as_secs()
        ));

        match self.read_line(self.retry_timeout).await {
            Ok(Some(answer)) => {
                let answer = answer.trim().to_lowercase();
                answer != "n" && answer != "no"
            }
            Ok(None) => {
                eprintln!();
                false
            }
            Err(e) => {
                warn!(error = %e, "[Prompt] Could not read retry answer");
                false
            }
        }
    }
}

/// Pulls the authorization code out of whatever the user pasted.
///
/// Accepts the bare code, a `code=<value>&state=<value>` fragment, or the
/// redirect URL with or without its scheme. Whenever a `state` is present it
/// must match `expected_state`.
pub fn extract_code(input: &str, expected_state: &str) -> AuthResult<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::InvalidCode("empty input".to_string()));
    }

    if let Ok(url) = Url::parse(input) {
        if url.scheme() == "http" || url.scheme() == "https" {
            return code_from_query(url.query().unwrap_or_default(), expected_state);
        }
    }

    if input.contains('?') || input.contains("code=") || input.contains("error=") {
        let query = input.split_once('?').map_or(input, |(_, q)| q);
        let query = query.split('#').next().unwrap_or_default();
        return code_from_query(query, expected_state);
    }

    let code = urlencoding::decode(input)
        .map_err(|e| AuthError::InvalidCode(e.to_string()))?
        .into_owned();
    Ok(code)
}

fn code_from_query(query: &str, expected_state: &str) -> AuthResult<String> {
    let pairs: Vec<(String, String)> = form_urlencoded::parse(query.trim_start_matches('&').as_bytes())
        .into_owned()
        .collect();
    let param = |name: &str| pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

    if let Some(error) = param("error") {
        let description = param("error_description").unwrap_or_default();
        return Err(AuthError::AccessDenied(format!("{} {}", error, description).trim().to_string()));
    }

    if let Some(state) = param("state") {
        if state != expected_state {
            return Err(AuthError::InvalidState);
        }
    }

    match param("code") {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(AuthError::InvalidCode("no code parameter".to_string())),
    }
}
