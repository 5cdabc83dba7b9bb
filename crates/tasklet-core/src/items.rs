//! The signed-in list: locally entered items plus an optional remote sample.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Shown to the user whenever a remote fetch fails, whatever the cause.
pub const LOAD_FAILED_MESSAGE: &str = "Failed to load data. Please try again.";

const NOT_AVAILABLE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListItem {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Free text as entered; see [`format_daily_rate`].
    pub daily_rate: String,
    pub available_date: String,
}

impl ListItem {
    pub fn formatted_rate(&self) -> String {
        format_daily_rate(&self.daily_rate)
    }

    pub fn formatted_date(&self) -> &str {
        non_blank(&self.available_date).unwrap_or(NOT_AVAILABLE)
    }
}

/// Form input for a new item. Fields are trimmed on insert.
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub name: String,
    pub description: String,
    pub daily_rate: String,
    pub available_date: String,
}

#[derive(Debug, Clone, Default)]
pub struct ItemList {
    items: Vec<ListItem>,
}

impl ItemList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an item. Returns `None` (and changes nothing) if the name is blank.
    pub fn add(&mut self, input: NewItem) -> Option<&ListItem> {
        let name = input.name.trim();
        if name.is_empty() {
            return None;
        }

        self.items.push(ListItem {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: input.description.trim().to_string(),
            daily_rate: input.daily_rate.trim().to_string(),
            available_date: input.available_date.trim().to_string(),
        });
        self.items.last()
    }

    /// Replaces the whole list, as a remote fetch does.
    pub fn replace(&mut self, items: Vec<ListItem>) {
        self.items = items;
    }

    pub fn get(&self, id: &str) -> Option<&ListItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn items(&self) -> &[ListItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum ItemsError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),
}

impl ItemsError {
    /// The message the list view shows for any fetch failure.
    pub fn user_message(&self) -> &'static str {
        LOAD_FAILED_MESSAGE
    }
}

#[derive(Debug, Deserialize)]
struct RemoteRecord {
    id: serde_json::Value,
    title: String,
}

impl From<RemoteRecord> for ListItem {
    fn from(record: RemoteRecord) -> Self {
        let id = match record.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        ListItem {
            id: format!("remote-{id}"),
            name: record.title,
            description: String::new(),
            daily_rate: String::new(),
            available_date: String::new(),
        }
    }
}

/// Fetches up to `limit` sample records from `endpoint` (`?_limit=N`).
///
/// # Errors
/// Returns an error on transport failure, a non-2xx status, or an
/// undecodable body.
pub async fn fetch_remote_items(
    client: &reqwest::Client,
    endpoint: &str,
    limit: u32,
) -> Result<Vec<ListItem>, ItemsError> {
    let response = client
        .get(endpoint)
        .query(&[("_limit", limit)])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        warn!(%status, endpoint, "remote items request failed");
        return Err(ItemsError::Status(status));
    }

    let records: Vec<RemoteRecord> = response.json().await?;
    debug!(count = records.len(), "fetched remote items");
    Ok(records.into_iter().map(ListItem::from).collect())
}

/// Formats a daily rate as US dollars (`$1,234.50`).
///
/// Non-numeric input is returned as typed; blank input becomes `N/A`.
pub fn format_daily_rate(raw: &str) -> String {
    let Some(text) = non_blank(raw) else {
        return NOT_AVAILABLE.to_string();
    };
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => format_usd(value),
        _ => raw.to_string(),
    }
}

fn format_usd(value: f64) -> String {
    let fixed = format!("{:.2}", value.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}${grouped}.{cents}")
}

fn non_blank(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
