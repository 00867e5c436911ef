//! Payloads and helpers shared by the integration tests.
#![allow(dead_code)]

use serde_json::{json, Value};

pub const BUSINESS_ID: &str = "437282430088732672";
pub const PAGE_ID: &str = "103603665458708";

pub fn lead_payload() -> Value {
    json!({
        "leadID": "437282430869512192",
        "createTimestamp": "1636428031",
        "price": "More information needed to give an estimate",
        "request": {
            "requestID": "437282427823792129",
            "category": "House Cleaning",
            "title": "House Cleaning",
            "description": "I am looking for someone to clean my apartment before I move",
            "schedule": "Date: Tue, May 05 2020\nTime: 6:00 PM\nLength: 3.5 hours",
            "location": {
                "city": "San Francisco",
                "state": "CA",
                "zipCode": "94103"
            },
            "travelPreferences": "Professional must travel to my address"
        },
        "customer": {
            "customerID": "437282427635040257",
            "name": "John Doe"
        },
        "business": {
            "businessID": BUSINESS_ID,
            "name": "Mr. Clean's Sparkly Cleaning Service"
        }
    })
}

/// A lead with its own id, timestamp (epoch seconds) and state.
pub fn lead_with(lead_id: &str, epoch_seconds: i64, state: &str) -> Value {
    let mut lead = lead_payload();
    lead["leadID"] = json!(lead_id);
    lead["createTimestamp"] = json!(epoch_seconds.to_string());
    lead["request"]["location"]["state"] = json!(state);
    lead
}

pub fn thumbtack_message_payload() -> Value {
    json!({
        "leadID": "437282430869512192",
        "customerID": "437282427635040257",
        "businessID": BUSINESS_ID,
        "message": {
            "messageID": "8699842694484326245",
            "createTimestamp": "1498760294",
            "text": "Do you offer fridge cleaning or is that extra?"
        }
    })
}

pub fn messenger_payload() -> Value {
    json!({
        "object": "page",
        "entry": [{
            "id": PAGE_ID,
            "time": 1636985618000i64,
            "messaging": [
                {
                    "sender": {"id": "4419062761494933"},
                    "recipient": {"id": PAGE_ID},
                    "timestamp": 1636985617543i64,
                    "message": {
                        "mid": "8699842694484326245",
                        "text": "Do you offer fridge cleaning or is that extra?"
                    }
                },
                {
                    "sender": {"id": PAGE_ID},
                    "recipient": {"id": "4419062761494933"},
                    "timestamp": 1636985619000i64,
                    "message": {"mid": "m_echo", "text": "Yes we do", "is_echo": true}
                },
                {
                    "sender": {"id": "4419062761494933"},
                    "recipient": {"id": PAGE_ID},
                    "timestamp": 1636985620000i64,
                    "read": {"watermark": 1636985619000i64}
                }
            ]
        }]
    })
}
