//! Leads API Library
//!
//! Ingests leads and messages from the Thumbtack marketplace and Facebook
//! Messenger, normalizes them into Postgres tables and serves tenant-scoped
//! queries and date-bucketed analytics over them.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `data`: Data access layer.
//! - `integrations`: External service integrations.
//! - `accounts`: Registration, update and removal of tenant accounts.
//! - `analytics`: Grouped counts and zero-filled trend reports.
//! - `auth`: Basic authentication middleware and password hashing.
//! - `config`: Configuration management.
//! - `dates`: Date validation, ranges and calendar periods.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Postgres implementation of the store.
//! - `errors`: Error handling types.
//! - `flatten`: Flattening of nested JSON and epoch conversions.
//! - `handlers`: HTTP request handlers.
//! - `memory_store`: In-process store.
//! - `models`: Core data models.
//! - `normalizer`: Lead and message payload normalization.
//! - `store`: Store contract, filters and rows.
//! - `thumbtack_client`: Thumbtack partner API client.
//! - `webhook_handler`: Thumbtack and Messenger webhook handlers.
//! - `webhook_models`: Webhook payload models.

pub mod api;
pub mod core;
pub mod data;
pub mod integrations;

pub mod accounts;
pub mod analytics;
pub mod auth;
pub mod config;
pub mod dates;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod flatten;
pub mod handlers;
pub mod memory_store;
pub mod models;
pub mod normalizer;
pub mod store;
pub mod thumbtack_client;
pub mod webhook_handler;
pub mod webhook_models;

use std::sync::Arc;

use axum::{
    http::Request,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::Span;

use crate::handlers::AppState;

/// Maximum accepted request body (webhook deliveries included).
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Request span carrying the method and path only. Registration sends
/// passwords and tokens in the query string, so the URI is never recorded.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathOnlySpan;

impl<B> MakeSpan<B> for PathOnlySpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        tracing::debug_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            version = ?request.version(),
        )
    }
}

/// HTTP trace layer used by the binary.
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>, PathOnlySpan> {
    TraceLayer::new_for_http().make_span_with(PathOnlySpan)
}

/// Builds every route of the service over `state`.
///
/// Rate limiting, tracing and CORS are layered on by the binary so that
/// tests can drive this router directly.
pub fn build_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/api/v1/thumbtack/leads", post(webhook_handler::thumbtack_lead))
        .route(
            "/api/v1/thumbtack/messages",
            post(webhook_handler::thumbtack_message),
        )
        .route(
            "/api/v1/thumbtack/dummy-lead",
            get(webhook_handler::dummy_lead),
        )
        .route(
            "/api/v1/webhooks/facebook",
            get(webhook_handler::facebook_verify).post(webhook_handler::facebook_messages),
        )
        .route("/api/v1/messages", get(handlers::get_messages))
        .route("/api/v1/leads", get(handlers::get_leads))
        .route("/api/v1/analytics/messages", get(handlers::message_analytics))
        .route("/api/v1/analytics/leads", get(handlers::lead_analytics))
        .route(
            "/api/v1/analytics/messages/trends",
            get(handlers::message_trends),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/v1/register",
            post(handlers::register_user)
                .put(handlers::update_user)
                .delete(handlers::delete_user),
        )
        .merge(authenticated)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
