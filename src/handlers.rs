use crate::accounts::Accounts;
use crate::analytics::{Analytics, TrendOptions};
use crate::config::Config;
use crate::dates::{check_date_format, create_dates, parse_day, Granularity};
use crate::errors::{AppError, ResultExt};
use crate::models::*;
use crate::store::{Filter, Record, Store};
use crate::thumbtack_client::ThumbtackClient;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Leads, messages and accounts.
    pub store: Arc<dyn Store>,
    /// Date-bucketed counts over the store.
    pub analytics: Arc<Analytics>,
    /// Registration and credential checks.
    pub accounts: Arc<Accounts>,
    /// Application configuration.
    pub config: Config,
    /// Thumbtack partner API, used for staging test leads.
    pub thumbtack_client: ThumbtackClient,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Result<Self, AppError> {
        let thumbtack_client = ThumbtackClient::from_config(&config)?;
        Ok(Self {
            analytics: Arc::new(Analytics::new(store.clone())),
            accounts: Arc::new(Accounts::new(store.clone())),
            store,
            config,
            thumbtack_client,
        })
    }
}

/// Health check endpoint.
///
/// Returns the service status and version.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "rust-leads-api",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

fn success_with(data: Vec<Record>) -> Json<Value> {
    Json(json!({
        "status": "success",
        "count": data.len(),
        "data": data,
    }))
}

/// Parses an optional `date` query value.
fn optional_day(raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(day) if check_date_format(day) => Ok(parse_day(day)),
        Some(_) => Err(AppError::BadRequest(
            "Please enter the date in YYYY-MM-DD format".to_string(),
        )),
    }
}

/// GET /api/v1/messages
///
/// Messages of the authenticated tenant, from one source or every linked one,
/// optionally restricted to a single contacted day.
pub async fn get_messages(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<MessagesQuery>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("GET /messages for {} - params: {:?}", user.username, params);

    let day = optional_day(params.date.as_deref())?;
    let requested = LeadSource::parse_optional(params.lead_source.as_deref())?;

    let sources: Vec<(LeadSource, &str)> = match requested {
        Some(source) => vec![(source, user.require_tenant_id(source)?)],
        None => LeadSource::ALL
            .iter()
            .filter_map(|&source| user.tenant_id(source).map(|id| (source, id)))
            .collect(),
    };

    let mut messages = Vec::new();
    for (source, tenant) in sources {
        let mut filter = Filter::new().eq(source.tenant_column(), tenant);
        if let Some(day) = day {
            filter = filter.on_date(source.message_date_column(), day);
        }
        let rows = state
            .store
            .get(source.schema(), MESSAGES_TABLE, &filter)
            .await
            .with_context(|| format!("{} messages", source.as_str()))?;
        messages.extend(rows);
    }

    tracing::info!("Returning {} message(s) for {}", messages.len(), user.username);
    Ok(success_with(messages))
}

/// GET /api/v1/leads
///
/// Marketplace leads of the authenticated tenant, optionally for one day.
pub async fn get_leads(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<LeadsQuery>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("GET /leads for {} - params: {:?}", user.username, params);

    let day = optional_day(params.date.as_deref())?;
    let business = user.require_tenant_id(LeadSource::Thumbtack)?;

    let mut filter = Filter::new().eq(LeadSource::Thumbtack.tenant_column(), business);
    if let Some(day) = day {
        filter = filter.on_date("contacted_time", day);
    }

    let leads = state
        .store
        .get(THUMBTACK_SCHEMA, LEADS_TABLE, &filter)
        .await
        .context("leads")?;

    Ok(success_with(leads))
}

fn day_range(params: &AnalyticsQuery) -> Result<crate::dates::DateRange, AppError> {
    create_dates(
        Granularity::Days,
        params.from_date.as_deref(),
        params.to_date.as_deref(),
    )
    .ok_or_else(|| {
        AppError::BadRequest(
            "Please enter from_date and to_date in YYYY-MM-DD format, from_date first".to_string(),
        )
    })
}

/// GET /api/v1/analytics/messages
///
/// Daily message counts per linked source.
pub async fn message_analytics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("GET /analytics/messages for {} - params: {:?}", user.username, params);

    let range = day_range(&params)?;
    let counts = state.analytics.get_message_analytics(&user, &range).await?;
    Ok(success_with(counts))
}

/// GET /api/v1/analytics/leads
///
/// Daily lead counts, optionally split by category, state or travel preference.
pub async fn lead_analytics(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<AnalyticsQuery>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("GET /analytics/leads for {} - params: {:?}", user.username, params);

    let dimension = Dimension::parse_optional(params.dimension.as_deref())?;
    let range = day_range(&params)?;
    let counts = state
        .analytics
        .get_lead_analytics(&user, dimension, &range)
        .await?;
    Ok(success_with(counts))
}

/// GET /api/v1/analytics/messages/trends
///
/// Zero-filled yearly or monthly message counts.
pub async fn message_trends(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Query(params): Query<TrendsQuery>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("GET /analytics/messages/trends for {} - params: {:?}", user.username, params);

    let requested = params
        .frequency
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(Granularity::parse);
    let (granularity, frequency) = match requested {
        None | Some(Some(Granularity::Years)) => (Granularity::Years, "years"),
        Some(Some(Granularity::Months)) => (Granularity::Months, "months"),
        Some(_) => {
            return Err(AppError::BadRequest(
                "Accepted values of frequency = years or months".to_string(),
            ))
        }
    };

    let options = TrendOptions {
        lead_source: LeadSource::parse_optional(params.lead_source.as_deref())?,
        dimension: Dimension::parse_optional(params.dimension.as_deref())?,
        data_format: DataFormat::parse(params.data_format.as_deref()),
    };

    let range = create_dates(
        granularity,
        params.from_date.as_deref(),
        params.to_date.as_deref(),
    )
    .ok_or_else(|| {
        AppError::BadRequest(format!(
            "Please enter from_date and to_date in {} format, from_date first",
            granularity.format_hint()
        ))
    })?;

    let report = state.analytics.message_trend(&user, &options, &range).await?;
    let periods = report.periods();

    Ok(Json(json!({
        "status": "success",
        "frequency": frequency,
        "from": periods.first().copied().unwrap_or_default(),
        "to": range.to_label(),
        "data": report,
    })))
}

/// POST /api/v1/register
pub async fn register_user(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegisterParams>,
) -> Result<Json<Value>, AppError> {
    tracing::info!("POST /register - username: {:?}", params.username);

    let user = state.accounts.register(&params).await?;
    Ok(Json(json!({
        "status": "success",
        "user": user,
    })))
}

/// PUT /api/v1/register
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegisterParams>,
) -> Result<Json<Value>, AppError> {
    tracing::info!(
        "PUT /register - email: {:?}, username: {:?}",
        params.email,
        params.username
    );

    state.accounts.update(&params).await?;
    Ok(Json(json!({"status": "success"})))
}

/// DELETE /api/v1/register
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RegisterParams>,
) -> Result<Json<Value>, AppError> {
    tracing::info!(
        "DELETE /register - email: {:?}, username: {:?}",
        params.email,
        params.username
    );

    state.accounts.delete(&params).await?;
    Ok(Json(json!({"status": "success"})))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_day_accepts_blank_and_iso() {
        assert_eq!(optional_day(None).unwrap(), None);
        assert_eq!(optional_day(Some(" ")).unwrap(), None);
        assert_eq!(
            optional_day(Some("2021-11-08")).unwrap(),
            NaiveDate::from_ymd_opt(2021, 11, 8)
        );
        assert!(matches!(
            optional_day(Some("2021-11-31")),
            Err(AppError::BadRequest(_))
        ));
    }
}
