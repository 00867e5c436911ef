//! Maps inbound Thumbtack and Messenger payloads onto fixed table rows.
//!
//! Fields are read by name through the typed payloads in
//! [`crate::webhook_models`], so a reordering of the source's JSON keys cannot
//! shift values into the wrong columns.

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::flatten::{epoch_millis_to_naive_local, epoch_seconds_to_naive_local, flatten_json};
use crate::store::{Row, Scalar};
use crate::webhook_models::{
    MessengerEntry, MessengerEvent, ThumbtackLeadPayload, ThumbtackMessagePayload,
};

pub const LEAD_COLUMNS: [&str; 16] = [
    "thumbtack_lead_id",
    "contacted_time",
    "price",
    "thumbtack_request_id",
    "category",
    "title",
    "description",
    "schedule",
    "city",
    "state",
    "zip",
    "travel_preferences",
    "thumbtack_customer_id",
    "customer_name",
    "thumbtack_business_id",
    "thumbtack_business_name",
];

pub const MESSAGE_COLUMNS: [&str; 6] = [
    "thumbtack_lead_id",
    "thumbtack_customer_id",
    "thumbtack_business_id",
    "thumbtack_message_id",
    "contacted_time",
    "message_text",
];

/// Millisecond fields of a flattened Messenger record.
const MESSENGER_TIME_KEYS: [&str; 2] = ["timestamp", "update_time"];

/// A `thumbtack.leads` row.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadRow {
    pub thumbtack_lead_id: String,
    pub contacted_time: NaiveDateTime,
    pub price: String,
    pub thumbtack_request_id: String,
    pub category: String,
    pub title: String,
    pub description: String,
    pub schedule: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub travel_preferences: String,
    pub thumbtack_customer_id: String,
    pub customer_name: String,
    pub thumbtack_business_id: String,
    pub thumbtack_business_name: String,
}

impl LeadRow {
    /// Values in [`LEAD_COLUMNS`] order.
    pub fn values(&self) -> [Scalar; 16] {
        [
            Scalar::from(&self.thumbtack_lead_id),
            Scalar::Timestamp(self.contacted_time),
            Scalar::from(&self.price),
            Scalar::from(&self.thumbtack_request_id),
            Scalar::from(&self.category),
            Scalar::from(&self.title),
            Scalar::from(&self.description),
            Scalar::from(&self.schedule),
            Scalar::from(&self.city),
            Scalar::from(&self.state),
            Scalar::from(&self.zip),
            Scalar::from(&self.travel_preferences),
            Scalar::from(&self.thumbtack_customer_id),
            Scalar::from(&self.customer_name),
            Scalar::from(&self.thumbtack_business_id),
            Scalar::from(&self.thumbtack_business_name),
        ]
    }

    pub fn to_row(&self) -> Row {
        LEAD_COLUMNS
            .iter()
            .zip(self.values())
            .fold(Row::new(), |row, (column, value)| row.with(*column, value))
    }
}

/// A `thumbtack.messages` row.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub thumbtack_lead_id: String,
    pub thumbtack_customer_id: String,
    pub thumbtack_business_id: String,
    pub thumbtack_message_id: String,
    pub contacted_time: NaiveDateTime,
    pub message_text: String,
}

impl MessageRow {
    /// Values in [`MESSAGE_COLUMNS`] order.
    pub fn values(&self) -> [Scalar; 6] {
        [
            Scalar::from(&self.thumbtack_lead_id),
            Scalar::from(&self.thumbtack_customer_id),
            Scalar::from(&self.thumbtack_business_id),
            Scalar::from(&self.thumbtack_message_id),
            Scalar::Timestamp(self.contacted_time),
            Scalar::from(&self.message_text),
        ]
    }

    pub fn to_row(&self) -> Row {
        MESSAGE_COLUMNS
            .iter()
            .zip(self.values())
            .fold(Row::new(), |row, (column, value)| row.with(*column, value))
    }
}

/// Deserializes a typed payload, reporting missing keys as malformed.
pub fn parse_payload<T: DeserializeOwned>(payload: &Value, what: &str) -> Result<T, AppError> {
    T::deserialize(payload)
        .map_err(|e| AppError::MalformedPayload(format!("{}: {}", what, e)))
}

fn epoch_seconds(raw: &str) -> Result<NaiveDateTime, AppError> {
    let seconds = raw.trim().parse::<i64>().map_err(|_| {
        AppError::MalformedPayload(format!("createTimestamp {:?} is not epoch seconds", raw))
    })?;
    epoch_seconds_to_naive_local(seconds)
}

/// Normalizes a Thumbtack lead payload into a [`LeadRow`].
pub fn normalize_lead(payload: &Value) -> Result<LeadRow, AppError> {
    let lead: ThumbtackLeadPayload = parse_payload(payload, "lead")?;

    Ok(LeadRow {
        contacted_time: epoch_seconds(&lead.create_timestamp)?,
        thumbtack_lead_id: lead.lead_id,
        price: lead.price,
        thumbtack_request_id: lead.request.request_id,
        category: lead.request.category,
        title: lead.request.title,
        description: lead.request.description,
        schedule: lead.request.schedule,
        city: lead.request.location.city,
        state: lead.request.location.state,
        zip: lead.request.location.zip_code,
        travel_preferences: lead.request.travel_preferences,
        thumbtack_customer_id: lead.customer.customer_id,
        customer_name: lead.customer.name,
        thumbtack_business_id: lead.business.business_id,
        thumbtack_business_name: lead.business.name,
    })
}

/// Normalizes a Thumbtack message payload into a [`MessageRow`].
pub fn normalize_thumbtack_message(payload: &Value) -> Result<MessageRow, AppError> {
    let message: ThumbtackMessagePayload = parse_payload(payload, "message")?;

    Ok(MessageRow {
        contacted_time: epoch_seconds(&message.message.create_timestamp)?,
        thumbtack_lead_id: message.lead_id,
        thumbtack_customer_id: message.customer_id,
        thumbtack_business_id: message.business_id,
        thumbtack_message_id: message.message.message_id,
        message_text: message.message.text,
    })
}

/// Reshapes one Messenger event the way `fb.messages` stores it and flattens it.
///
/// `mid` becomes `message_id`, only the text stays under `message`, and the
/// entry's page id and delivery time are injected as `page_id`/`update_time`.
pub fn flatten_messenger_event(
    entry: &MessengerEntry,
    event: &MessengerEvent,
) -> Result<serde_json::Map<String, Value>, AppError> {
    let message = event
        .message
        .as_ref()
        .ok_or_else(|| AppError::MalformedPayload("messaging event has no message".to_string()))?;
    let text = message
        .text
        .as_deref()
        .ok_or_else(|| AppError::MalformedPayload("message has no text".to_string()))?;
    let mid = message
        .mid
        .as_deref()
        .ok_or_else(|| AppError::MalformedPayload("message has no mid".to_string()))?;

    let reshaped = json!({
        "sender": {"id": event.sender.id},
        "recipient": {"id": event.recipient.id},
        "timestamp": event.timestamp,
        "message": {"text": text},
        "message_id": mid,
        "page_id": entry.id,
        "update_time": entry.time,
    });

    Ok(flatten_json(&reshaped))
}

/// Flattens a Messenger event into an `fb.messages` row, converting the
/// millisecond timestamps to local time.
pub fn normalize_messenger_event(
    entry: &MessengerEntry,
    event: &MessengerEvent,
) -> Result<Row, AppError> {
    let flat = flatten_messenger_event(entry, event)?;

    let mut row = Row::new();
    for (column, value) in &flat {
        let scalar = if MESSENGER_TIME_KEYS.contains(&column.as_str()) {
            let millis = value.as_i64().ok_or_else(|| {
                AppError::MalformedPayload(format!("{} is not epoch milliseconds", column))
            })?;
            Scalar::Timestamp(epoch_millis_to_naive_local(millis)?)
        } else {
            Scalar::from_json(value)
        };
        row.set(column.as_str(), scalar);
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_missing_location_is_malformed() {
        let payload = json!({
            "leadID": "1",
            "createTimestamp": "1636428031",
            "price": "n/a",
            "request": {
                "requestID": "2",
                "category": "House Cleaning",
                "title": "House Cleaning",
                "description": "",
                "schedule": "",
                "travelPreferences": ""
            },
            "customer": {"customerID": "3", "name": "John Doe"},
            "business": {"businessID": "4", "name": "Sparkly"}
        });

        let err = normalize_lead(&payload).unwrap_err();
        assert!(matches!(err, AppError::MalformedPayload(ref msg) if msg.contains("location")));
    }

    #[test]
    fn non_numeric_create_timestamp_is_malformed() {
        let payload = json!({
            "leadID": "299614694480093245",
            "customerID": "331138063184986319",
            "businessID": "286845156044809661",
            "message": {"messageID": "1", "createTimestamp": "yesterday", "text": "hi"}
        });

        assert!(matches!(
            normalize_thumbtack_message(&payload),
            Err(AppError::MalformedPayload(_))
        ));
    }
}
