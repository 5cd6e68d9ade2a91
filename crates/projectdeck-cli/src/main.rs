//! projectdeck - command-line client for the project-management API.
//!
//! Logs in, keeps the session on disk (or in the OS keychain), and makes
//! authenticated calls. `watch` keeps the expiry monitor running and prints
//! session events as they happen.

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use projectdeck_core::auth::token;
use projectdeck_core::config::ENV_API_URL;
use projectdeck_core::storage::{Storage, AUTH_STORAGE_KEY};
use projectdeck_core::utils::{mask_token, truncate_string};
use projectdeck_core::{AppContext, Config, SessionEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// When set, logs are also written to a daily-rotated file in this directory
const ENV_LOG_DIR: &str = "PROJECTDECK_LOG_DIR";

/// Longest display name shown by `status`
const NAME_WIDTH: usize = 40;

#[derive(Parser)]
#[command(name = "projectdeck")]
#[command(about = "Session-aware client for the projectdeck API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API base URL, overriding the config file
    #[arg(long, env = ENV_API_URL)]
    api_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session
    Login {
        /// Account email (defaults to the last one used)
        #[arg(short, long)]
        email: Option<String>,
    },

    /// Create an account and log into it
    Register {
        #[arg(short, long)]
        email: String,

        /// Full name shown in the app
        #[arg(short, long)]
        name: String,
    },

    /// End the session here and on the server
    Logout,

    /// Show the restored session
    Status,

    /// Fetch the current user from the server
    Whoami,

    /// GET an API path with the session's credentials and print the JSON
    Get {
        /// Path under the API base URL, e.g. /projects
        path: String,
    },

    /// Keep the session monitored and print session events
    Watch,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(ENV_LOG_DIR) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), "projectdeck.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing();
    info!("projectdeck starting");

    let mut config = Config::load()?;
    if let Some(url) = cli.api_url.as_deref() {
        config.api_base_url = url.to_string();
    }

    let ctx = AppContext::from_config(config)?;
    ctx.hydrate().await;
    // Subscribed up front so a session ended mid-command is still reported
    let mut events = ctx.subscribe_events();

    let result = match cli.command {
        Commands::Login { email } => login(&ctx, email).await,
        Commands::Register { email, name } => register(&ctx, &email, &name).await,
        Commands::Logout => {
            ctx.logout().await;
            println!("Logged out");
            Ok(())
        }
        Commands::Status => status(&ctx),
        Commands::Whoami => whoami(&ctx).await,
        Commands::Get { path } => get(&ctx, &path).await,
        Commands::Watch => watch(&ctx).await,
    };

    if result.is_err() {
        report_session_end(&ctx, &mut events);
    }
    result
}

/// Print the notice and login hint of a session ended by the last command.
fn report_session_end(ctx: &AppContext, events: &mut Receiver<SessionEvent>) {
    for event in ctx.settle_events(events) {
        match event {
            SessionEvent::Notice(message) => eprintln!("{}", message),
            SessionEvent::Redirect { to } => {
                eprintln!("Run `projectdeck login` to sign in again ({})", to);
            }
            _ => {}
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    eprint!("{}", label);
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn remember_email(ctx: &AppContext, email: &str) {
    let mut config = ctx.config().clone();
    config.last_email = Some(email.to_string());
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
}

async fn login(ctx: &AppContext, email: Option<String>) -> Result<()> {
    let email = match email.or_else(|| ctx.config().last_email.clone()) {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    ctx.login(&email, &password)
        .await
        .with_context(|| format!("Login failed for {}", email))?;
    remember_email(ctx, &email);

    let name = ctx
        .store()
        .user()
        .map(|u| u.display_name().to_string())
        .unwrap_or(email);
    println!("Logged in as {}", name);
    Ok(())
}

async fn register(ctx: &AppContext, email: &str, name: &str) -> Result<()> {
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    ctx.register(email, &password, name)
        .await
        .with_context(|| format!("Registration failed for {}", email))?;
    remember_email(ctx, email);
    println!("Account created, logged in as {}", name);
    Ok(())
}

fn status(ctx: &AppContext) -> Result<()> {
    let state = ctx.monitor().state();
    let snapshot = ctx.store().snapshot();
    let stored = ctx.store().storage().get(AUTH_STORAGE_KEY)?.is_some();

    println!("API:            {}", ctx.api().base_url());
    println!("Hydrated:       {}", state.hydrated);
    println!("Ready:          {}", state.ready);
    println!("Authenticated:  {}", ctx.monitor().is_authenticated());
    println!("Token:          {}", mask_token(snapshot.token.as_deref()));
    if let Some(t) = snapshot.token.as_deref() {
        match token::decode_claims(t).ok().and_then(|c| c.expires_at()) {
            Some(at) => println!("Expires:        {}", at.to_rfc3339()),
            None => println!("Expires:        (unreadable)"),
        }
    }
    match snapshot.user {
        Some(user) => println!(
            "User:           {} <{}>{}",
            truncate_string(user.display_name(), NAME_WIDTH),
            user.email,
            if user.is_admin { " (admin)" } else { "" }
        ),
        None => println!("User:           (none)"),
    }
    println!("Stored session: {}", if stored { "yes" } else { "no" });
    Ok(())
}

async fn whoami(ctx: &AppContext) -> Result<()> {
    if !ctx.monitor().is_authenticated() {
        anyhow::bail!("Not logged in. Run `projectdeck login` first.");
    }
    let user = ctx.current_user().await?;
    println!("{}", serde_json::to_string_pretty(&user)?);
    Ok(())
}

async fn get(ctx: &AppContext, path: &str) -> Result<()> {
    let value = ctx.api().get_value(path).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn watch(ctx: &AppContext) -> Result<()> {
    if !ctx.monitor().is_authenticated() {
        anyhow::bail!("Not logged in. Run `projectdeck login` first.");
    }

    let mut events = ctx.subscribe_events();
    let handle = ctx.watch_expiry();
    println!("Watching session (Ctrl-C to stop)");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(SessionEvent::Notice(message)) => eprintln!("{}", message),
                Ok(SessionEvent::Redirect { to }) => {
                    println!("Session ended, continue at {}", to);
                    break;
                }
                Ok(SessionEvent::LoggedOut) => info!("Session cleared"),
                Ok(SessionEvent::LoggedIn { email }) => info!(email, "Session renewed"),
                Err(RecvError::Lagged(n)) => {
                    warn!(skipped = n, "Missed session events");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                ctx.api().terminator().cancel_redirect();
                break;
            }
        }
    }

    handle.stop();
    Ok(())
}
