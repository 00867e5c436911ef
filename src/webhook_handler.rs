use crate::errors::{AppError, ResultExt};
use crate::handlers::AppState;
use crate::models::{User, FB_SCHEMA, LEADS_TABLE, MESSAGES_TABLE, THUMBTACK_SCHEMA};
use crate::normalizer::{
    normalize_lead, normalize_messenger_event, normalize_thumbtack_message, parse_payload,
};
use crate::store::Row;
use crate::webhook_models::{IngestResponse, MessengerWebhookPayload, WebhookVerifyQuery};
use axum::{
    extract::{Query, State},
    Extension, Json,
};
use serde_json::Value;
use std::sync::Arc;

/// Unwraps an optional JSON body; a missing or non-JSON body is a client error.
fn require_body(body: Option<Json<Value>>) -> Result<Value, AppError> {
    body.map(|Json(value)| value)
        .ok_or_else(|| AppError::BadRequest("request body must be a JSON object".to_string()))
}

fn warn_on_foreign_business(user: &User, business_id: &str) {
    if user.thumbtack_business_id.as_deref() != Some(business_id) {
        tracing::warn!(
            "{} posted data for business {} which is not their linked business",
            user.username,
            business_id
        );
    }
}

/// Thumbtack lead webhook
///
/// Receives a "lead created" event, maps it onto the 16 lead columns and
/// stores it. A malformed lead is rejected whole.
pub async fn thumbtack_lead(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    body: Option<Json<Value>>,
) -> Result<Json<IngestResponse>, AppError> {
    let payload = require_body(body)?;
    let lead = normalize_lead(&payload)?;
    tracing::info!("Received Thumbtack lead {}", lead.thumbtack_lead_id);
    warn_on_foreign_business(&user, &lead.thumbtack_business_id);

    state
        .store
        .insert(THUMBTACK_SCHEMA, LEADS_TABLE, &lead.to_row())
        .await
        .with_context(|| format!("store lead {}", lead.thumbtack_lead_id))?;

    Ok(Json(IngestResponse::success()))
}

/// Thumbtack message webhook
pub async fn thumbtack_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    body: Option<Json<Value>>,
) -> Result<Json<IngestResponse>, AppError> {
    let payload = require_body(body)?;
    let message = normalize_thumbtack_message(&payload)?;
    tracing::info!(
        "Received Thumbtack message {} on lead {}",
        message.thumbtack_message_id,
        message.thumbtack_lead_id
    );
    warn_on_foreign_business(&user, &message.thumbtack_business_id);

    state
        .store
        .insert(THUMBTACK_SCHEMA, MESSAGES_TABLE, &message.to_row())
        .await
        .with_context(|| format!("store message {}", message.thumbtack_message_id))?;

    Ok(Json(IngestResponse::success()))
}

/// GET /api/v1/thumbtack/dummy-lead
///
/// Has the staging API fabricate a lead, stores it and returns it.
pub async fn dummy_lead(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("Creating staging test lead for {}", user.username);

    let payload = state.thumbtack_client.create_test_lead().await?;
    let lead = normalize_lead(&payload)?;
    state
        .store
        .insert(THUMBTACK_SCHEMA, LEADS_TABLE, &lead.to_row())
        .await
        .with_context(|| format!("store test lead {}", lead.thumbtack_lead_id))?;

    Ok(Json(payload))
}

/// Messenger subscription handshake
///
/// Echoes `hub.challenge` when `hub.verify_token` equals the caller's
/// registered secret key.
pub async fn facebook_verify(
    Extension(user): Extension<User>,
    Query(params): Query<WebhookVerifyQuery>,
) -> Result<String, AppError> {
    tracing::info!(
        "Messenger verification for {} (mode {:?})",
        user.username,
        params.mode
    );

    let expected = user
        .fb_secret_key
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("account has no linked facebook credentials".to_string()))?;
    let token = params.verify_token.as_deref().unwrap_or_default();

    if !constant_time_compare(token, expected) {
        tracing::warn!("Messenger verify token mismatch for {}", user.username);
        return Err(AppError::BadRequest("verify token mismatch".to_string()));
    }

    Ok(params.challenge.unwrap_or_default())
}

/// Messenger webhook
///
/// Every user message in every entry is normalized before anything is
/// stored, so one malformed event rejects the whole delivery. Echoes and
/// receipts are skipped.
pub async fn facebook_messages(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    body: Option<Json<Value>>,
) -> Result<Json<IngestResponse>, AppError> {
    let payload: MessengerWebhookPayload = parse_payload(&require_body(body)?, "webhook")?;

    let mut rows: Vec<Row> = Vec::new();
    let mut skipped = 0;
    for entry in &payload.entry {
        if user.fb_page_id.as_deref() != Some(entry.id.as_str()) {
            tracing::warn!("{} posted events for page {}", user.username, entry.id);
        }
        for event in &entry.messaging {
            if event.is_user_message() {
                rows.push(normalize_messenger_event(entry, event)?);
            } else {
                skipped += 1;
            }
        }
    }

    for row in &rows {
        state
            .store
            .insert(FB_SCHEMA, MESSAGES_TABLE, row)
            .await
            .context("store messenger message")?;
    }

    tracing::info!(
        "Messenger webhook complete: {} stored, {} skipped",
        rows.len(),
        skipped
    );
    Ok(Json(IngestResponse::batch(rows.len(), skipped)))
}

/// Constant-time string comparison
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.as_bytes()
        .iter()
        .zip(b.as_bytes().iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("secret123", "secret123"));
        assert!(!constant_time_compare("secret123", "secret124"));
        assert!(!constant_time_compare("short", "longer"));
        assert!(!constant_time_compare("", "x"));
    }

    #[test]
    fn missing_body_is_bad_request() {
        assert!(matches!(require_body(None), Err(AppError::BadRequest(_))));
    }
}
