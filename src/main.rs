use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;

use authkeep::config::{CliArgs, Command, Config};
use authkeep::http_client::AuthHttpClient;
use authkeep::router::MemoryRouter;
use authkeep::store::{MemoryCookieJar, MemoryStorage, SqliteStorage, StateContainer};
use authkeep::{AuthManager, Host, SessionSlot};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = CliArgs::parse();

    // Load configuration first (for log level)
    let mut config = Config::load(&args)?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    // One-shot process: endpoints stay as configured, timers never run
    config.options.disable_timers();
    tracing::debug!(base_url = %config.base_url, store = %config.store_dir.display(), "Configuration loaded");

    let db_path = config.session_db_path();
    let durable = SqliteStorage::open(&db_path)
        .with_context(|| format!("Failed to open session database {}", db_path.display()))?;

    let host = Host::new(Arc::new(MemoryRouter::new("/")))
        .with_local_storage(Arc::new(durable))
        .with_session_storage(Arc::new(MemoryStorage::new()))
        .with_cookie_jar(Arc::new(MemoryCookieJar::new()))
        .with_state(Arc::new(StateContainer::new()))
        .with_slot(SessionSlot::new());

    let http = Arc::new(AuthHttpClient::from_config(&config)?);
    let manager = Arc::new(AuthManager::with_host(config.options.clone(), &host, http)?);
    let session = manager.start();

    let outcome = run(&manager, args.command).await;
    session.stop();
    outcome
}

async fn run(manager: &Arc<AuthManager>, command: Command) -> Result<ExitCode> {
    match command {
        Command::Login { username, password } => {
            let username = match username {
                Some(u) => u,
                None => Input::new()
                    .with_prompt("Username")
                    .interact_text()
                    .context("Failed to read username")?,
            };
            let password = match password {
                Some(p) => p,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };

            manager
                .login(&json!({ "username": username, "password": password }))
                .await
                .context("Login failed")?;
            println!("Logged in");
            if let Some(user) = manager.user() {
                println!("{}", serde_json::to_string_pretty(&user)?);
            }
        }
        Command::Logout => {
            manager.logout().await;
            println!("Logged out");
        }
        Command::Refresh => {
            manager.refresh().await.context("Refresh failed")?;
            println!("Credential refreshed");
        }
        Command::Whoami => match manager.fetch_user().await.context("Failed to fetch user")? {
            Some(user) => println!("{}", serde_json::to_string_pretty(&user)?),
            None => {
                println!("Not logged in");
                return Ok(ExitCode::FAILURE);
            }
        },
        Command::Status { role } => {
            let role_check = (!role.is_empty()).then(|| manager.check_roles(role.clone()));
            let status = json!({
                "state": manager.state(),
                "authenticated": manager.check(),
                "user": manager.user(),
                "roles": manager.roles(),
                "role_check": role_check,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            if role_check == Some(false) {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Get { path } => {
            let response = manager
                .http()
                .get(&path)
                .await
                .with_context(|| format!("GET {} failed", path))?;
            println!("{}", serde_json::to_string_pretty(&response.body)?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
