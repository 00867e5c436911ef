use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Thumbtack "lead created" event.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbtackLeadPayload {
    #[serde(rename = "leadID")]
    pub lead_id: String,

    /// Epoch seconds; Thumbtack sends it as a string.
    #[serde(deserialize_with = "string_or_number")]
    pub create_timestamp: String,

    /// Free-text estimate ("More information needed to give an estimate").
    pub price: String,

    pub request: ThumbtackRequest,
    pub customer: ThumbtackCustomer,
    pub business: ThumbtackBusiness,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbtackRequest {
    #[serde(rename = "requestID")]
    pub request_id: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub schedule: String,
    pub location: ThumbtackLocation,
    pub travel_preferences: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbtackLocation {
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbtackCustomer {
    #[serde(rename = "customerID")]
    pub customer_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbtackBusiness {
    #[serde(rename = "businessID")]
    pub business_id: String,
    pub name: String,
}

/// Thumbtack "message received" event.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ThumbtackMessagePayload {
    #[serde(rename = "leadID")]
    pub lead_id: String,
    #[serde(rename = "customerID")]
    pub customer_id: String,
    #[serde(rename = "businessID")]
    pub business_id: String,
    pub message: ThumbtackMessage,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbtackMessage {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub create_timestamp: String,
    pub text: String,
}

/// Messenger webhook delivery (`object: "page"`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessengerWebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    pub entry: Vec<MessengerEntry>,
}

/// One page's batch of events.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessengerEntry {
    /// Page id.
    pub id: String,
    /// Delivery time, epoch milliseconds.
    pub time: i64,
    #[serde(default)]
    pub messaging: Vec<MessengerEvent>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessengerEvent {
    pub sender: MessengerParticipant,
    pub recipient: MessengerParticipant,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default)]
    pub message: Option<MessengerMessage>,
}

impl MessengerEvent {
    /// True for text messages sent by a user to the page (not echoes of the
    /// page's own replies, not receipts or postbacks).
    pub fn is_user_message(&self) -> bool {
        self.message
            .as_ref()
            .map(|m| !m.is_echo && m.text.is_some())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessengerParticipant {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessengerMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
}

/// Query string of the Messenger subscription handshake.
#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// Response sent back for ingestion endpoints.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<usize>,
}

impl IngestResponse {
    pub fn success() -> Self {
        Self {
            status: "success".to_string(),
            stored: None,
            skipped: None,
        }
    }

    pub fn batch(stored: usize, skipped: usize) -> Self {
        Self {
            status: "success".to_string(),
            stored: Some(stored),
            skipped: Some(skipped),
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, found {}",
            other
        ))),
    }
}
