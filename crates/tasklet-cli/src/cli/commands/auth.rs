//! Auth command handlers.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use tasklet_core::auth::{AuthUser, Gate, SessionState};
use tasklet_core::config::{Config, paths};

use crate::cli::start_session;

/// Password source for non-interactive sign-in.
const PASSWORD_ENV: &str = "TASKLET_PASSWORD";

pub async fn login(config: &Config, interactive: bool, username: Option<String>) -> Result<()> {
    if !config.auth.enabled {
        println!(
            "Authentication is disabled; running as {}.",
            AuthUser::dev().username
        );
        return Ok(());
    }
    if !config.auth.is_configured() {
        anyhow::bail!(
            "Auth0 tenant is not configured. Set auth.domain and auth.client_id in {} \
             (or TASKLET_AUTH0_DOMAIN / TASKLET_AUTH0_CLIENT_ID)",
            paths::config_path().display()
        );
    }

    let session = start_session(config).await?;
    if let Some(user) = session.current_user() {
        println!("Already signed in as {}.", user.username);
        println!("Run `tasklet logout` first to switch accounts.");
        return Ok(());
    }

    if interactive {
        println!("Signing in through the hosted login page...");
        session.sign_in_interactive().await?;
    } else {
        let username = match username {
            Some(username) => username,
            None => prompt("Username: ")?,
        };
        let password = match std::env::var(PASSWORD_ENV) {
            Ok(password) => password,
            Err(_) => prompt_password()?,
        };
        session.sign_in(&username, &password).await?;
    }

    match session.current_user() {
        Some(user) => {
            println!("✓ Signed in as {}", user.username);
            if let Some(email) = user.email.as_deref() {
                println!("  Email: {email}");
            }
        }
        None => println!("Login cancelled."),
    }
    Ok(())
}

pub async fn logout(config: &Config) -> Result<()> {
    if !config.auth.enabled {
        println!("Authentication is disabled; nothing to sign out of.");
        return Ok(());
    }

    let session = start_session(config).await?;
    let had_session = session.current_user().is_some();
    session.sign_out().await;

    if had_session {
        println!("✓ Signed out");
    } else {
        println!("Not signed in (no stored session).");
    }
    Ok(())
}

pub async fn status(config: &Config) -> Result<()> {
    let gate = if config.auth.enabled {
        let session = start_session(config).await?;
        Gate::resolve(true, &session.snapshot())
    } else {
        Gate::resolve(false, &SessionState::default())
    };

    match gate {
        Gate::SignedIn(user) => {
            println!("Signed in as {}", user.username);
            println!("  Id: {}", user.id);
            if let Some(email) = user.email.as_deref() {
                println!("  Email: {email}");
            }
            if !config.auth.enabled {
                println!("  (authentication disabled)");
            }
        }
        Gate::SignedOut => println!("Not signed in. Run `tasklet login` to sign in."),
        Gate::Loading => println!("Session is still loading."),
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        print!("{label}");
        io::stdout().flush()?;
    }
    let mut input = String::new();
    stdin
        .lock()
        .read_line(&mut input)
        .context("read from stdin")?;
    Ok(input.trim().to_string())
}

/// Reads the password without echo on a TTY; piped input is read as a line.
fn prompt_password() -> Result<String> {
    if io::stdin().is_terminal() {
        return rpassword::prompt_password("Password: ").context("read password");
    }
    prompt("Password: ")
}
