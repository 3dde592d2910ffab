//! Remote mailbox provider client.
//!
//! Speaks the 1secmail-style query API: `genRandomMailbox` to mint an
//! address, `getMessages` to list an inbox, `readMessage` for one body.
//! The implementation is deliberately thin; deadlines and fallback behavior
//! live in the session manager.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::ProviderError;
use crate::models::{MessageBody, MessageSummary};

/// Capability consumed by the session manager.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Mint a fresh, provider-assigned address.
    async fn generate_address(&self) -> Result<String, ProviderError>;

    /// Full message list for an address, in provider order.
    async fn fetch_messages(&self, address: &str) -> Result<Vec<MessageSummary>, ProviderError>;

    /// One full message body.
    async fn fetch_message_body(
        &self,
        address: &str,
        message_id: i64,
    ) -> Result<MessageBody, ProviderError>;
}

const DEFAULT_BASE_URL: &str = "https://www.1secmail.com/api/v1/";

/// HTTP implementation of [`EmailProvider`].
#[derive(Clone)]
pub struct HttpEmailProvider {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEmailProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    async fn get_text(&self, query: &[(&str, String)]) -> Result<String, ProviderError> {
        let response = self.http.get(&self.base_url).query(query).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl EmailProvider for HttpEmailProvider {
    async fn generate_address(&self) -> Result<String, ProviderError> {
        let body = self
            .get_text(&[
                ("action", "genRandomMailbox".to_string()),
                ("count", "1".to_string()),
            ])
            .await?;
        parse_generated_address(&body)
    }

    async fn fetch_messages(&self, address: &str) -> Result<Vec<MessageSummary>, ProviderError> {
        let (login, domain) = split_address(address)?;
        let body = self
            .get_text(&[
                ("action", "getMessages".to_string()),
                ("login", login.to_string()),
                ("domain", domain.to_string()),
            ])
            .await?;
        parse_message_list(&body)
    }

    async fn fetch_message_body(
        &self,
        address: &str,
        message_id: i64,
    ) -> Result<MessageBody, ProviderError> {
        let (login, domain) = split_address(address)?;
        let body = self
            .get_text(&[
                ("action", "readMessage".to_string()),
                ("login", login.to_string()),
                ("domain", domain.to_string()),
                ("id", message_id.to_string()),
            ])
            .await?;
        parse_message_body(&body)
    }
}

#[derive(Debug, Deserialize)]
struct WireSummary {
    id: i64,
    #[serde(default)]
    from: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBody {
    id: i64,
    #[serde(default)]
    from: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    text_body: Option<String>,
    #[serde(default)]
    html_body: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

fn split_address(address: &str) -> Result<(&str, &str), ProviderError> {
    address
        .split_once('@')
        .filter(|(login, domain)| !login.is_empty() && !domain.is_empty())
        .ok_or_else(|| ProviderError::Malformed(format!("address without domain: {address:?}")))
}

/// Provider timestamps come as naive `YYYY-MM-DD HH:MM:SS` strings; a value
/// that does not parse is dropped rather than failing the whole poll.
fn parse_received_at(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_generated_address(body: &str) -> Result<String, ProviderError> {
    let addresses: Vec<String> = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("address list: {e}")))?;
    let address = addresses
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("empty address list".to_string()))?;
    split_address(&address)?;
    Ok(address)
}

fn parse_message_list(body: &str) -> Result<Vec<MessageSummary>, ProviderError> {
    let wire: Vec<WireSummary> = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("message list: {e}")))?;
    Ok(wire
        .into_iter()
        .map(|m| MessageSummary {
            id: m.id,
            from: m.from,
            subject: m.subject,
            received_at: parse_received_at(m.date.as_deref()),
        })
        .collect())
}

fn parse_message_body(body: &str) -> Result<MessageBody, ProviderError> {
    let wire: WireBody = serde_json::from_str(body)
        .map_err(|e| ProviderError::Malformed(format!("message body: {e}")))?;
    let text = wire
        .text_body
        .or(wire.body)
        .unwrap_or_default();
    Ok(MessageBody {
        id: wire.id,
        from: wire.from,
        subject: wire.subject,
        received_at: parse_received_at(wire.date.as_deref()),
        text,
        html: wire.html_body.filter(|h| !h.is_empty()),
    })
}
