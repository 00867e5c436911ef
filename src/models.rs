use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::store::Record;

pub const ACCOUNTS_SCHEMA: &str = "accounts";
pub const USERS_TABLE: &str = "users";
pub const THUMBTACK_SCHEMA: &str = "thumbtack";
pub const LEADS_TABLE: &str = "leads";
pub const FB_SCHEMA: &str = "fb";
pub const MESSAGES_TABLE: &str = "messages";

// ============ Accounts ============

/// A registered tenant account.
///
/// Linked marketplace/page ids scope every query the user makes.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub user_id: String,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string.
    #[serde(rename = "password", skip_serializing)]
    pub password_hash: String,
    pub phone_number: Option<String>,
    pub thumbtack_user_id: Option<String>,
    #[serde(skip_serializing)]
    pub thumbtack_password: Option<String>,
    pub thumbtack_business_id: Option<String>,
    pub fb_app_id: Option<String>,
    pub fb_page_id: Option<String>,
    #[serde(skip_serializing)]
    pub fb_page_access_token: Option<String>,
    #[serde(skip_serializing)]
    pub fb_secret_key: Option<String>,
}

impl User {
    pub fn from_record(record: Record) -> Result<Self, AppError> {
        serde_json::from_value(serde_json::Value::Object(record))
            .map_err(|e| AppError::InternalError(format!("Malformed user row: {}", e)))
    }

    /// The external id that scopes this user's data for `source`.
    pub fn tenant_id(&self, source: LeadSource) -> Option<&str> {
        match source {
            LeadSource::Facebook => self.fb_page_id.as_deref(),
            LeadSource::Thumbtack => self.thumbtack_business_id.as_deref(),
        }
        .filter(|id| !id.is_empty())
    }

    /// Like [`User::tenant_id`] but an input error when the source is not linked.
    pub fn require_tenant_id(&self, source: LeadSource) -> Result<&str, AppError> {
        self.tenant_id(source).ok_or_else(|| {
            AppError::BadRequest(format!(
                "account has no linked {} credentials",
                source.as_str()
            ))
        })
    }
}

// ============ Sources & Dimensions ============

/// Where a lead or message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeadSource {
    Facebook,
    Thumbtack,
}

impl LeadSource {
    pub const ALL: [LeadSource; 2] = [LeadSource::Facebook, LeadSource::Thumbtack];

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim() {
            "facebook" => Ok(LeadSource::Facebook),
            "thumbtack" => Ok(LeadSource::Thumbtack),
            other => Err(AppError::BadRequest(format!(
                "Accepted values of lead_source = facebook or thumbtack, got {:?}",
                other
            ))),
        }
    }

    /// Parses an optional query value; blank means "all sources".
    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, AppError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => Self::parse(value).map(Some),
            None => Ok(None),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LeadSource::Facebook => "facebook",
            LeadSource::Thumbtack => "thumbtack",
        }
    }

    pub fn schema(self) -> &'static str {
        match self {
            LeadSource::Facebook => FB_SCHEMA,
            LeadSource::Thumbtack => THUMBTACK_SCHEMA,
        }
    }

    /// Column holding a message's timestamp.
    pub fn message_date_column(self) -> &'static str {
        match self {
            LeadSource::Facebook => "timestamp",
            LeadSource::Thumbtack => "contacted_time",
        }
    }

    /// Column holding the tenant's external id.
    pub fn tenant_column(self) -> &'static str {
        match self {
            LeadSource::Facebook => "page_id",
            LeadSource::Thumbtack => "thumbtack_business_id",
        }
    }
}

/// Secondary grouping column for lead analytics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Category,
    State,
    TravelPreferences,
}

impl Dimension {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim() {
            "category" => Ok(Dimension::Category),
            "state" => Ok(Dimension::State),
            "travel_preferences" => Ok(Dimension::TravelPreferences),
            _ => Err(AppError::BadRequest(
                "Accepted values of dimension = category, state, or travel_preferences".to_string(),
            )),
        }
    }

    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, AppError> {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => Self::parse(value).map(Some),
            None => Ok(None),
        }
    }

    pub fn column(self) -> &'static str {
        match self {
            Dimension::Category => "category",
            Dimension::State => "state",
            Dimension::TravelPreferences => "travel_preferences",
        }
    }
}

/// Output shape of trend reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// Per-period totals with per-source (and optional dimension) breakdowns.
    #[default]
    Table,
    /// Dimensionless per-period counts only.
    Graph,
}

impl DataFormat {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("graph") => DataFormat::Graph,
            _ => DataFormat::Table,
        }
    }
}

// ============ API Request Models ============

#[derive(Debug, Default, Deserialize)]
pub struct MessagesQuery {
    pub lead_source: Option<String>,
    /// `YYYY-MM-DD`
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LeadsQuery {
    pub date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyticsQuery {
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub dimension: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TrendsQuery {
    /// `years` (default) or `months`.
    pub frequency: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub lead_source: Option<String>,
    pub dimension: Option<String>,
    pub data_format: Option<String>,
}

/// Query string of `/api/v1/register`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterParams {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub new_password: Option<String>,
    pub phone_number: Option<String>,
    pub thumbtack_user_id: Option<String>,
    pub thumbtack_password: Option<String>,
    pub thumbtack_business_id: Option<String>,
    pub fb_app_id: Option<String>,
    pub fb_page_id: Option<String>,
    pub fb_page_access_token: Option<String>,
    pub fb_secret_key: Option<String>,
}
