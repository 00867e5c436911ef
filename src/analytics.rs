//! Date-bucketed counts over leads and messages.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::dates::{DateRange, Granularity, Period};
use crate::errors::AppError;
use crate::models::{
    DataFormat, Dimension, LeadSource, User, LEADS_TABLE, MESSAGES_TABLE, THUMBTACK_SCHEMA,
};
use crate::store::{CountQuery, DimensionSource, Filter, GroupedCount, Record, Store};

/// Label used for rows whose dimension column is NULL.
pub const UNKNOWN_DIMENSION: &str = "unknown";

/// Selection shared by the yearly and monthly trend reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrendOptions {
    /// `None` means every source.
    pub lead_source: Option<LeadSource>,
    pub dimension: Option<Dimension>,
    pub data_format: DataFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodCount {
    pub period: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceCount {
    pub source: LeadSource,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<String, i64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodBreakdown {
    pub period: String,
    pub total: i64,
    pub sources: Vec<SourceCount>,
}

/// A zero-filled trend series, one entry per period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrendReport {
    Graph(Vec<PeriodCount>),
    Table(Vec<PeriodBreakdown>),
}

impl TrendReport {
    pub fn len(&self) -> usize {
        match self {
            TrendReport::Graph(points) => points.len(),
            TrendReport::Table(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Period labels in order.
    pub fn periods(&self) -> Vec<&str> {
        match self {
            TrendReport::Graph(points) => points.iter().map(|p| p.period.as_str()).collect(),
            TrendReport::Table(rows) => rows.iter().map(|r| r.period.as_str()).collect(),
        }
    }
}

/// Per-period counts of one source.
#[derive(Debug, Default)]
struct SourceSeries {
    totals: BTreeMap<Period, i64>,
    breakdown: BTreeMap<Period, BTreeMap<String, i64>>,
}

impl SourceSeries {
    fn total(&self, period: Period) -> i64 {
        self.totals.get(&period).copied().unwrap_or(0)
    }
}

pub struct Analytics {
    store: Arc<dyn Store>,
}

impl Analytics {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Runs a grouped count and renders each group as
    /// `{date, count[, <dimension column>]}`.
    pub async fn get_grouped_by_date(&self, query: &CountQuery) -> Result<Vec<Record>, AppError> {
        let groups = self.store.count_grouped(query).await?;
        let dimension_key = query.dimension.as_ref().map(DimensionSource::column);

        Ok(groups
            .into_iter()
            .map(|group| {
                let mut record = Record::new();
                record.insert("date".to_string(), Value::String(group.bucket));
                record.insert("count".to_string(), Value::from(group.count));
                if let Some(key) = dimension_key {
                    record.insert(key.to_string(), Value::from(group.dimension));
                }
                record
            })
            .collect())
    }

    /// Daily message counts per linked source, each record tagged with
    /// `user_source`.
    pub async fn get_message_analytics(
        &self,
        user: &User,
        range: &DateRange,
    ) -> Result<Vec<Record>, AppError> {
        let mut records = Vec::new();
        for source in LeadSource::ALL {
            let Some(tenant) = user.tenant_id(source) else {
                continue;
            };
            let query = message_query(source, tenant, None, Granularity::Days, range.from, range.until());
            for mut record in self.get_grouped_by_date(&query).await? {
                record.insert(
                    "user_source".to_string(),
                    Value::String(source.as_str().to_string()),
                );
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Daily lead counts for the user's marketplace business.
    pub async fn get_lead_analytics(
        &self,
        user: &User,
        dimension: Option<Dimension>,
        range: &DateRange,
    ) -> Result<Vec<Record>, AppError> {
        let business = user.require_tenant_id(LeadSource::Thumbtack)?;
        let query = CountQuery {
            schema: THUMBTACK_SCHEMA.to_string(),
            table: LEADS_TABLE.to_string(),
            date_column: "contacted_time".to_string(),
            granularity: Granularity::Days,
            dimension: dimension.map(|d| DimensionSource::Column(d.column().to_string())),
            filter: Filter::new().eq(LeadSource::Thumbtack.tenant_column(), business),
            from: range.from,
            until: range.until(),
        };
        self.get_grouped_by_date(&query).await
    }

    /// Message counts for every year in `[from_year, to_year]`.
    pub async fn get_message_counts_per_year(
        &self,
        user: &User,
        options: &TrendOptions,
        from_year: i32,
        to_year: i32,
    ) -> Result<TrendReport, AppError> {
        check_years([from_year, to_year])?;
        self.trend(user, options, Period::Year(from_year), Period::Year(to_year), false)
            .await
    }

    /// Message counts for every month from `from` to `to`, both `(year, month)`.
    pub async fn get_message_counts_per_month(
        &self,
        user: &User,
        options: &TrendOptions,
        from: (i32, u32),
        to: (i32, u32),
    ) -> Result<TrendReport, AppError> {
        check_years([from.0, to.0])?;
        for (_, month) in [from, to] {
            if !(1..=12).contains(&month) {
                return Err(AppError::BadRequest(format!(
                    "month must be between 1 and 12, got {}",
                    month
                )));
            }
        }
        self.trend(
            user,
            options,
            Period::Month(from.0, from.1),
            Period::Month(to.0, to.1),
            false,
        )
        .await
    }

    /// Trend over a parsed range. An open lower bound starts the series at
    /// the earliest period holding data.
    pub async fn message_trend(
        &self,
        user: &User,
        options: &TrendOptions,
        range: &DateRange,
    ) -> Result<TrendReport, AppError> {
        if range.granularity == Granularity::Days {
            return Err(AppError::BadRequest(
                "Accepted values of frequency = years or months".to_string(),
            ));
        }
        self.trend(
            user,
            options,
            range.from_period(),
            range.to_period(),
            range.open_from,
        )
        .await
    }

    async fn trend(
        &self,
        user: &User,
        options: &TrendOptions,
        first: Period,
        last: Period,
        open_from: bool,
    ) -> Result<TrendReport, AppError> {
        if options.data_format == DataFormat::Graph && options.dimension.is_some() {
            return Err(AppError::BadRequest(
                "dimension cannot be combined with data_format=graph".to_string(),
            ));
        }
        if first > last {
            return Err(AppError::BadRequest(format!(
                "from ({}) must not be after to ({})",
                first, last
            )));
        }

        let sources: Vec<(LeadSource, Option<&str>)> = match options.lead_source {
            Some(source) => vec![(source, Some(user.require_tenant_id(source)?))],
            None => LeadSource::ALL
                .iter()
                .map(|&source| (source, user.tenant_id(source)))
                .collect(),
        };

        let granularity = match first {
            Period::Year(_) => Granularity::Years,
            Period::Month(..) => Granularity::Months,
        };

        let mut series = Vec::with_capacity(sources.len());
        for (source, tenant) in &sources {
            let counts = match tenant {
                Some(tenant) => {
                    let dimension = options.dimension.and_then(|d| message_dimension(*source, d));
                    let query = message_query(
                        *source,
                        tenant,
                        dimension,
                        granularity,
                        first.start(),
                        last.next().start(),
                    );
                    self.store.count_grouped(&query).await?
                }
                None => {
                    tracing::debug!("{} not linked for {}; counting zero", source.as_str(), user.username);
                    Vec::new()
                }
            };
            series.push((*source, collect_series(first, counts)?));
        }

        let first = if open_from {
            series
                .iter()
                .filter_map(|(_, s)| s.totals.keys().next().copied())
                .min()
                .unwrap_or(last)
        } else {
            first
        };

        let periods = first.through(last);
        let report = match options.data_format {
            DataFormat::Graph => TrendReport::Graph(
                periods
                    .into_iter()
                    .map(|period| PeriodCount {
                        period: period.label(),
                        count: series.iter().map(|(_, s)| s.total(period)).sum(),
                    })
                    .collect(),
            ),
            DataFormat::Table => TrendReport::Table(
                periods
                    .into_iter()
                    .map(|period| {
                        let sources: Vec<SourceCount> = series
                            .iter()
                            .map(|(source, s)| SourceCount {
                                source: *source,
                                count: s.total(period),
                                breakdown: options
                                    .dimension
                                    .and_then(|d| message_dimension(*source, d))
                                    .map(|_| s.breakdown.get(&period).cloned().unwrap_or_default()),
                            })
                            .collect();
                        PeriodBreakdown {
                            period: period.label(),
                            total: sources.iter().map(|s| s.count).sum(),
                            sources,
                        }
                    })
                    .collect(),
            ),
        };

        tracing::debug!(
            "trend for {}: {} periods from {} to {}",
            user.username,
            report.len(),
            first,
            last
        );
        Ok(report)
    }
}

/// Years a trend may span; matches the four-digit years the date parser accepts.
const YEARS: std::ops::RangeInclusive<i32> = 0..=9999;

fn check_years(years: [i32; 2]) -> Result<(), AppError> {
    match years.into_iter().find(|year| !YEARS.contains(year)) {
        Some(year) => Err(AppError::BadRequest(format!(
            "year must be between 0 and 9999, got {}",
            year
        ))),
        None => Ok(()),
    }
}

/// Where a message's dimension lives. Marketplace messages read it from
/// their lead; Messenger messages have no lead and report totals only.
fn message_dimension(source: LeadSource, dimension: Dimension) -> Option<DimensionSource> {
    match source {
        LeadSource::Thumbtack => Some(DimensionSource::Joined {
            schema: THUMBTACK_SCHEMA.to_string(),
            table: LEADS_TABLE.to_string(),
            column: dimension.column().to_string(),
            local_key: "thumbtack_lead_id".to_string(),
            foreign_key: "thumbtack_lead_id".to_string(),
        }),
        LeadSource::Facebook => None,
    }
}

fn message_query(
    source: LeadSource,
    tenant: &str,
    dimension: Option<DimensionSource>,
    granularity: Granularity,
    from: chrono::NaiveDate,
    until: chrono::NaiveDate,
) -> CountQuery {
    CountQuery {
        schema: source.schema().to_string(),
        table: MESSAGES_TABLE.to_string(),
        date_column: source.message_date_column().to_string(),
        granularity,
        dimension,
        filter: Filter::new().eq(source.tenant_column(), tenant),
        from,
        until,
    }
}

fn collect_series(shape: Period, counts: Vec<GroupedCount>) -> Result<SourceSeries, AppError> {
    let mut series = SourceSeries::default();
    for group in counts {
        let period = shape.parse_like(&group.bucket).ok_or_else(|| {
            AppError::InternalError(format!("unexpected bucket label {:?}", group.bucket))
        })?;
        *series.totals.entry(period).or_insert(0) += group.count;
        let key = group
            .dimension
            .unwrap_or_else(|| UNKNOWN_DIMENSION.to_string());
        *series
            .breakdown
            .entry(period)
            .or_default()
            .entry(key)
            .or_insert(0) += group.count;
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_buckets_into_periods() {
        let counts = vec![
            GroupedCount { bucket: "2021-01".to_string(), dimension: Some("CA".to_string()), count: 2 },
            GroupedCount { bucket: "2021-01".to_string(), dimension: None, count: 1 },
            GroupedCount { bucket: "2021-03".to_string(), dimension: Some("NY".to_string()), count: 4 },
        ];
        let series = collect_series(Period::Month(2021, 1), counts).unwrap();

        assert_eq!(series.total(Period::Month(2021, 1)), 3);
        assert_eq!(series.total(Period::Month(2021, 2)), 0);
        assert_eq!(
            series.breakdown[&Period::Month(2021, 1)].get(UNKNOWN_DIMENSION),
            Some(&1)
        );
    }

    #[test]
    fn bad_bucket_label_is_internal_error() {
        let counts = vec![GroupedCount { bucket: "2021-1x".to_string(), dimension: None, count: 1 }];
        assert!(matches!(
            collect_series(Period::Month(2021, 1), counts),
            Err(AppError::InternalError(_))
        ));
    }

    #[test]
    fn messenger_messages_have_no_dimension() {
        assert!(message_dimension(LeadSource::Facebook, Dimension::State).is_none());
        assert_eq!(
            message_dimension(LeadSource::Thumbtack, Dimension::State)
                .as_ref()
                .map(DimensionSource::column),
            Some("state")
        );
    }
}
