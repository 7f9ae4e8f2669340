//! loandesk - command-line front end for the loan platform portals.
//!
//! Signs in to the borrower portal or the admin console, keeps the token
//! pair in the local token store, and performs authenticated calls against
//! the backend with transparent token refresh.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loandesk_core::auth::token_store_from_config;
use loandesk_core::config::Portal;
use loandesk_core::{ApiClient, ApiError, AuthGuard, Config, Role};
use serde_json::Value;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "loandesk", about = "Borrower portal and admin console client", version)]
struct Args {
    /// Portal to act for (borrower or admin)
    #[arg(long, global = true)]
    portal: Option<Portal>,

    /// Backend base URL, overrides LOANDESK_API_URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign out and clear stored tokens
    Logout,
    /// Show the signed-in account
    Whoami,
    /// Exit 0 if the session is valid (and has ROLE, when given), 1 otherwise
    Check {
        #[arg(long)]
        role: Option<String>,
    },
    /// Show token expiry for the stored session
    Session,
    /// Authenticated GET, prints the JSON response
    Get { path: String },
    /// Authenticated POST with an optional JSON body
    Post {
        path: String,
        #[arg(long)]
        body: Option<String>,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Log file path has no file name"))?;
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(portal) = args.portal {
        config.portal = portal;
    }
    if let Some(ref url) = args.api_url {
        config.api_url = Some(url.clone());
    }
    Ok(config)
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn prompt_email() -> Result<String> {
    print!("Email: ");
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    Ok(email.trim().to_string())
}

/// Turn an API error into a message the user can act on.
fn describe(error: &ApiError) -> String {
    match error {
        e if e.requires_login() => "Not signed in. Run `loandesk login` first.".to_string(),
        ApiError::Timeout => "The server took too long to respond. Please try again.".to_string(),
        ApiError::Network(_) => {
            "Unable to connect to server. Check your connection and try again.".to_string()
        }
        other => other.to_string(),
    }
}

/// Renew a locally expired access token before a data command, since the
/// gateway refuses to send requests without one.
async fn ensure_access_token(client: &ApiClient) {
    if client.store().access_token().is_none() && client.store().refresh_token().is_some() {
        debug!("Access token expired locally, refreshing before request");
        client.refresher().refresh().await;
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let config = load_config(&args)?;
    let store = Arc::new(token_store_from_config(&config)?);
    let client = ApiClient::from_config(&config, store.clone())?;
    debug!(portal = %config.portal, "Client ready");

    match args.command {
        Command::Login { email } => {
            let email = match email {
                Some(email) => email,
                None => prompt_email()?,
            };
            let password = rpassword::prompt_password("Password: ")?;
            if email.is_empty() || password.is_empty() {
                anyhow::bail!("Email and password required");
            }

            match client.login(&email, &password).await {
                Ok(user) => {
                    match user {
                        Some(user) => println!("Signed in as {}", user.display_name_or_id()),
                        None => println!("Signed in"),
                    }
                    info!(portal = %config.portal, "Login successful");
                }
                Err(e) if e.is_client_error() => anyhow::bail!("Invalid email or password"),
                Err(e) => anyhow::bail!(describe(&e)),
            }
        }
        Command::Logout => {
            client.logout().await?;
            println!("Signed out");
        }
        Command::Whoami => {
            ensure_access_token(&client).await;
            let user = client
                .current_user()
                .await
                .map_err(|e| anyhow::anyhow!(describe(&e)))?;
            print_json(&serde_json::to_value(&user)?)?;
        }
        Command::Check { role } => {
            let guard = AuthGuard::new(client);
            let role = role.map(Role::from);
            if guard.check_auth(role.as_ref()).await {
                println!("authenticated");
            } else {
                println!("unauthenticated");
                return Ok(ExitCode::from(1));
            }
        }
        Command::Session => match store.session() {
            Some(session) => {
                println!("Portal:          {}", config.portal);
                println!(
                    "Access token:    expires {} ({}m left)",
                    session.access_token_expiry,
                    session.minutes_until_access_expiry()
                );
                println!(
                    "Refresh token:   expires {} ({}d left)",
                    session.refresh_token_expiry,
                    session.days_until_refresh_expiry()
                );
            }
            None => {
                println!("No stored session");
                return Ok(ExitCode::from(1));
            }
        },
        Command::Get { path } => {
            ensure_access_token(&client).await;
            let value: Value = client
                .get(&path)
                .await
                .map_err(|e| anyhow::anyhow!(describe(&e)))?;
            print_json(&value)?;
        }
        Command::Post { path, body } => {
            let body: Value = match body {
                Some(raw) => serde_json::from_str(&raw).context("--body is not valid JSON")?,
                None => Value::Object(Default::default()),
            };
            ensure_access_token(&client).await;
            let value: Value = client
                .post(&path, &body)
                .await
                .map_err(|e| anyhow::anyhow!(describe(&e)))?;
            print_json(&value)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _log_guard = init_tracing(args.log_file.as_ref())?;

    run(args).await
}
