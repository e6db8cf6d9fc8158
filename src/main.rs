use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use sfauth::auth::{ConsolePrompt, Controller};
use sfauth::config::Settings;
use sfauth::services::{SecretStore, SecretStoreBackend};
use sfauth::utils::logging::init_tracing;
use sfauth::utils::mask_token;

/// Salesforce OAuth2 token manager
#[derive(Parser)]
#[command(name = "sfauth")]
#[command(version)]
#[command(about = "Obtains, refreshes and stores Salesforce OAuth2 tokens", long_about = None)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short = 'o', long, default_value = "pretty", global = true)]
    output: OutputFormat,

    /// Debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, PartialEq)]
enum OutputFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "pretty" => Ok(OutputFormat::Pretty),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Loads stored tokens, refreshes them and falls back to browser authorization
    Login {
        /// Skip the refresh attempt and authorize again
        #[arg(short = 'f', long)]
        force: bool,
    },

    /// Exchanges the stored refresh token for a new access token
    Refresh,

    /// Runs the validation query with the stored access token
    Validate,

    /// Prints the authorization URL without starting the flow
    Url,

    /// Shows what the secret store currently holds
    Status,
}

/// Uniform command result
#[derive(serde::Serialize)]
struct CliResponse {
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

impl CliResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let response = match execute_command(&cli).await {
        Ok(response) => response,
        Err(e) => CliResponse::error(format!("{:#}", e)),
    };

    let exit_code = if response.success { 0 } else { 1 };
    output_response(&response, &cli.output);
    std::process::exit(exit_code);
}

async fn execute_command(cli: &Cli) -> Result<CliResponse> {
    let settings = Settings::from_env().context("failed to load configuration")?;

    let store = SecretStoreBackend::from_backend(&settings.secret_backend).await?;
    let prompt = ConsolePrompt::from_settings(&settings);
    let mut controller = Controller::new(settings, store, prompt)?;

    let response = match &cli.command {
        Commands::Login { force } => {
            let result = if *force {
                controller.reauthorize().await
            } else {
                controller.initialize().await
            };

            match result {
                Ok(report) => CliResponse::success(json!({
                    "report": report,
                    "access_token": controller.access_token().map(mask_token),
                    "store": controller.store().describe(),
                })),
                Err(e) => CliResponse::error(e.to_string()),
            }
        }

        Commands::Refresh => {
            if !controller.load_stored().await {
                return Ok(CliResponse::error("no stored tokens, run `sfauth login` first"));
            }

            match controller.refresh_now().await {
                Ok(report) => CliResponse::success(json!({
                    "report": report,
                    "access_token": controller.access_token().map(mask_token),
                    "instance_url": controller.instance_url(),
                })),
                Err(e) => CliResponse::error(e.to_string()),
            }
        }

        Commands::Validate => {
            controller.load_stored().await;
            let outcome = controller.validate().await;

            if outcome.is_valid() {
                CliResponse::success(json!({
                    "validation": outcome,
                    "instance_url": controller.instance_url(),
                }))
            } else {
                CliResponse {
                    success: false,
                    data: Some(json!({ "validation": outcome })),
                    error: Some("access token is not valid".to_string()),
                }
            }
        }

        Commands::Status => {
            let loaded = controller.load_stored().await;
            let tokens = controller.tokens();

            CliResponse::success(json!({
                "store": controller.store().describe(),
                "has_tokens": loaded,
                "has_refresh_token": tokens.is_some_and(|t| t.refresh_token.is_some()),
                "access_token": tokens.map(|t| mask_token(&t.access_token)),
                "instance_url": controller.instance_url(),
                "phase": controller.phase(),
            }))
        }

        Commands::Url => {
            let request = controller.authorization_request()?;
            CliResponse::success(json!({
                "url": request.url.as_str(),
                "state": request.state,
                "redirect_uri": controller.settings().redirect_uri,
            }))
        }
    };

    Ok(response)
}

fn output_response(response: &CliResponse, format: &OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string(response) {
            Ok(body) => println!("{}", body),
            Err(e) => eprintln!("Error: could not serialize response: {}", e),
        },
        OutputFormat::Pretty => {
            if let Some(error) = &response.error {
                eprintln!("Error: {}", error);
            }
            if let Some(data) = &response.data {
                match serde_json::to_string_pretty(data) {
                    Ok(body) => println!("{}", body),
                    Err(e) => eprintln!("Error: could not serialize response: {}", e),
                }
            }
        }
    }
}
