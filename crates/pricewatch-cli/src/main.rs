//! pricewatch - terminal front end for a pricewatch account session.
//!
//! Signs in, out and inspects the stored session, and can stay attached to
//! keep the session refreshed while printing lifecycle notifications.

use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pricewatch_core::auth::{FileMedium, KeyringMedium, MemoryMedium, PersistenceMedium};
use pricewatch_core::config::StorageKind;
use pricewatch_core::{
    CredentialStore, EventBus, HttpExecutor, SessionConfig, SessionController, SessionError,
    TransportInterceptor,
};

type Controller = SessionController<HttpExecutor>;

const USAGE: &str = "\
Usage: pricewatch <command>

Commands:
  login [email]            Sign in
  register [username]      Create an account and sign in
  logout                   Sign out and notify the server
  status                   Print the current session as JSON
  watch                    Keep the session alive and print session events
  reset-password [email]   Request a password reset email
  confirm-reset <token>    Set a new password with a reset token";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr. With `log_dir`, a daily rolling file is written as
/// well; the returned guard must live until exit so buffered lines flush.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "pricewatch.log");
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

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        eprintln!("{}", USAGE);
        return Ok(());
    };

    let log_dir = if command == "watch" {
        SessionConfig::data_dir().ok()
    } else {
        None
    };
    let _log_guard = init_tracing(log_dir.as_deref());

    let config = SessionConfig::load()?;
    info!(api = %config.api_base_url, storage = ?config.storage, "pricewatch starting");
    let controller = build_controller(config)?;
    let arg = args.get(1).map(String::as_str);

    let result = match command {
        "login" => login(&controller, arg).await,
        "register" => register(&controller, arg).await,
        "logout" => logout(&controller).await,
        "status" => status(&controller).await,
        "watch" => watch(&controller).await,
        "reset-password" => request_reset(&controller, arg).await,
        "confirm-reset" => confirm_reset(&controller, arg).await,
        "-h" | "--help" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => Err(anyhow!("Unknown command '{}'\n\n{}", other, USAGE)),
    };

    controller.shutdown();
    result
}

/// Wire the credential medium, transport and controller from configuration.
fn build_controller(config: SessionConfig) -> Result<Controller> {
    let medium: Arc<dyn PersistenceMedium> = match config.storage {
        StorageKind::File => {
            let dir = SessionConfig::data_dir()?;
            Arc::new(FileMedium::in_dir(&dir))
        }
        StorageKind::Keyring => Arc::new(KeyringMedium::new()),
        StorageKind::Memory => Arc::new(MemoryMedium::new()),
    };

    let store = CredentialStore::new(medium, config.token_ttl());
    let bus = EventBus::new();
    let interceptor = TransportInterceptor::new(store.clone(), bus.clone());
    let executor = HttpExecutor::new(config.clone(), interceptor)
        .context("Failed to build HTTP client")?;

    Ok(SessionController::new(config, executor, store, bus))
}

// ============================================================================
// Commands
// ============================================================================

async fn login(controller: &Controller, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(email) => email.to_string(),
        None => prompt("Email")?,
    };
    let password = rpassword::prompt_password("Password: ")?;

    let user = controller.login(&email, &password).await.map_err(report)?;
    match user {
        Some(user) => println!("Signed in as {}", user.display_name()),
        None => println!("Signed in"),
    }
    Ok(())
}

async fn register(controller: &Controller, username: Option<&str>) -> Result<()> {
    let username = match username {
        Some(username) => username.to_string(),
        None => prompt("Username")?,
    };
    let email = prompt("Email")?;
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;

    let user = controller
        .register(&username, &email, &password, &confirm)
        .await
        .map_err(report)?;
    match user {
        Some(user) => println!("Account created, signed in as {}", user.display_name()),
        None => println!("Account created"),
    }
    Ok(())
}

async fn logout(controller: &Controller) -> Result<()> {
    let outcome = controller.logout(false).await;
    info!(?outcome, "Logout finished");
    println!("Signed out");
    Ok(())
}

async fn status(controller: &Controller) -> Result<()> {
    controller.start().await;
    let snapshot = controller.snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn watch(controller: &Controller) -> Result<()> {
    let mut signals = controller.subscribe();
    controller.start().await;

    if !controller.is_authenticated() {
        return Err(anyhow!("Not signed in. Run `pricewatch login` first."));
    }
    match controller.user() {
        Some(user) => println!("Watching session for {} (Ctrl-C to stop)", user.display_name()),
        None => println!("Watching session (Ctrl-C to stop)"),
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, detaching from session");
                break;
            }
            signal = signals.recv() => match signal {
                Ok(signal) => {
                    println!("{:?}", signal);
                    if let Some(notice) = signal.notice() {
                        println!("{}", notice);
                    }
                    if !controller.is_authenticated() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session signals"),
                Err(RecvError::Closed) => break,
            }
        }
    }
    Ok(())
}

async fn request_reset(controller: &Controller, email: Option<&str>) -> Result<()> {
    let email = match email {
        Some(email) => email.to_string(),
        None => prompt("Email")?,
    };
    let message = controller
        .request_password_reset(&email)
        .await
        .map_err(report)?;
    println!("{}", message);
    Ok(())
}

async fn confirm_reset(controller: &Controller, token: Option<&str>) -> Result<()> {
    let token = token.ok_or_else(|| anyhow!("Usage: pricewatch confirm-reset <token>"))?;
    let password = rpassword::prompt_password("New password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;

    let message = controller
        .confirm_password_reset(token, &password, &confirm)
        .await
        .map_err(report)?;
    println!("{}", message);
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn report(err: SessionError) -> anyhow::Error {
    anyhow!(err.user_message())
}
