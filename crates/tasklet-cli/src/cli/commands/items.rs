//! Item command handlers.

use anyhow::{Context, Result};
use tasklet_core::auth::{AuthUser, Gate, SessionState};
use tasklet_core::config::Config;
use tasklet_core::items::{self, ItemList, ListItem, NewItem};
use tracing::warn;

use crate::cli::start_session;

/// Resolves the signed-in user, or fails the command.
async fn require_user(config: &Config) -> Result<AuthUser> {
    let gate = if config.auth.enabled {
        let session = start_session(config).await?;
        Gate::resolve(true, &session.snapshot())
    } else {
        Gate::resolve(false, &SessionState::default())
    };

    match gate {
        Gate::SignedIn(user) => Ok(user),
        Gate::SignedOut | Gate::Loading => {
            anyhow::bail!("Not signed in. Run `tasklet login` first.")
        }
    }
}

pub async fn fetch(config: &Config, limit: Option<u32>) -> Result<()> {
    let user = require_user(config).await?;

    let client = reqwest::Client::builder()
        .timeout(config.auth.request_timeout())
        .build()
        .context("create HTTP client")?;
    let limit = limit.unwrap_or(config.items.limit);

    let mut list = ItemList::new();
    match items::fetch_remote_items(&client, &config.items.endpoint, limit).await {
        Ok(fetched) => list.replace(fetched),
        Err(e) => {
            warn!("fetching items failed: {e}");
            anyhow::bail!(e.user_message());
        }
    }

    println!("{}'s list ({} items)", user.username, list.len());
    for item in list.items() {
        println!("  {}  {}", item.id, item.name);
    }
    Ok(())
}

pub async fn add(config: &Config, input: NewItem) -> Result<()> {
    require_user(config).await?;

    let mut list = ItemList::new();
    let Some(id) = list.add(input).map(|item| item.id.clone()) else {
        anyhow::bail!("Item name cannot be empty");
    };
    let item = list.get(&id).context("added item missing from list")?;
    print_details(item);
    Ok(())
}

fn print_details(item: &ListItem) {
    println!("{}", item.name);
    if !item.description.is_empty() {
        println!("  {}", item.description);
    }
    println!("  Daily rate: {}", item.formatted_rate());
    println!("  Available:  {}", item.formatted_date());
    println!("  Id: {}", item.id);
}
