//! Date parsing, validation and calendar bucketing.
//!
//! All dates are naive calendar dates; "today" is the server's local date.

use std::fmt;
use std::sync::OnceLock;

use chrono::{Datelike, Local, NaiveDate};
use regex::Regex;

/// Earliest year used when a range has no lower bound.
pub const OPEN_FROM_YEAR: i32 = 1;

/// Time-bucket size for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Days,
    Months,
    Years,
}

impl Granularity {
    /// Parses a `frequency` query value. `"all"` is the day-level granularity.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "days" | "all" => Some(Granularity::Days),
            "months" => Some(Granularity::Months),
            "years" => Some(Granularity::Years),
            _ => None,
        }
    }

    /// Postgres `to_char` pattern producing this granularity's labels.
    pub fn sql_format(self) -> &'static str {
        match self {
            Granularity::Days => "YYYY-MM-DD",
            Granularity::Months => "YYYY-MM",
            Granularity::Years => "YYYY",
        }
    }

    /// Label of the bucket containing `date`.
    pub fn label(self, date: NaiveDate) -> String {
        match self {
            Granularity::Days => date.format("%Y-%m-%d").to_string(),
            Granularity::Months => format!("{:04}-{:02}", date.year(), date.month()),
            Granularity::Years => format!("{:04}", date.year()),
        }
    }

    /// Human-readable format hint for error messages.
    pub fn format_hint(self) -> &'static str {
        match self {
            Granularity::Days => "YYYY-MM-DD",
            Granularity::Months => "YYYY-MM",
            Granularity::Years => "YYYY",
        }
    }

    fn pattern(self) -> &'static Regex {
        static DAYS: OnceLock<Regex> = OnceLock::new();
        static MONTHS: OnceLock<Regex> = OnceLock::new();
        static YEARS: OnceLock<Regex> = OnceLock::new();

        match self {
            Granularity::Days => DAYS.get_or_init(|| compile(r"^\d{4}-\d{2}-\d{2}$")),
            Granularity::Months => MONTHS.get_or_init(|| compile(r"^\d{4}-\d{2}$")),
            Granularity::Years => YEARS.get_or_init(|| compile(r"^\d{4}$")),
        }
    }

    /// First day of the bucket described by `raw`, if `raw` is well formed.
    fn parse_start(self, raw: &str) -> Option<NaiveDate> {
        if !self.pattern().is_match(raw) {
            return None;
        }
        match self {
            Granularity::Days => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
            Granularity::Months => {
                let (year, month) = raw.split_once('-')?;
                NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
            }
            Granularity::Years => NaiveDate::from_ymd_opt(raw.parse().ok()?, 1, 1),
        }
    }

    /// First day of the bucket containing `date`.
    fn truncate(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Days => date,
            Granularity::Months => date.with_day(1).unwrap_or(date),
            Granularity::Years => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }

    /// First day of the bucket after the one starting at `start`.
    fn next_start(self, start: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Days => start.succ_opt().unwrap_or(NaiveDate::MAX),
            Granularity::Months => Period::Month(start.year(), start.month()).next().start(),
            Granularity::Years => Period::Year(start.year()).next().start(),
        }
    }
}

fn compile(pattern: &str) -> Regex {
    // Patterns are literals above; a failure here is a programming error.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid date pattern {}: {}", pattern, e))
}

/// True iff `s` is an ISO calendar date `YYYY-MM-DD` (4-digit year, real day).
pub fn check_date_format(s: &str) -> bool {
    Granularity::Days.parse_start(s).is_some()
}

/// Parses a `YYYY-MM-DD` string.
pub fn parse_day(s: &str) -> Option<NaiveDate> {
    Granularity::Days.parse_start(s)
}

/// The server's local date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Inclusive calendar range at a granularity.
///
/// `from` and `to` are the first days of their buckets. `open_from` marks a
/// range whose lower bound was not supplied and sits at [`OPEN_FROM_YEAR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub granularity: Granularity,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub open_from: bool,
}

impl DateRange {
    pub fn from_label(&self) -> String {
        self.granularity.label(self.from)
    }

    pub fn to_label(&self) -> String {
        self.granularity.label(self.to)
    }

    /// Exclusive upper bound: first day after the `to` bucket.
    pub fn until(&self) -> NaiveDate {
        self.granularity.next_start(self.to)
    }

    pub fn from_period(&self) -> Period {
        Period::containing(self.granularity, self.from)
    }

    pub fn to_period(&self) -> Period {
        Period::containing(self.granularity, self.to)
    }
}

/// Builds a validated range using the server's local "today".
pub fn create_dates(
    granularity: Granularity,
    from: Option<&str>,
    to: Option<&str>,
) -> Option<DateRange> {
    create_dates_at(granularity, from, to, today())
}

/// Builds a validated range relative to `today`.
///
/// Missing or blank `from` opens the range at year 0001; missing or blank `to`
/// is `today` at the granularity. Returns `None` when a supplied bound does
/// not match the granularity's format or `from > to`.
pub fn create_dates_at(
    granularity: Granularity,
    from: Option<&str>,
    to: Option<&str>,
    today: NaiveDate,
) -> Option<DateRange> {
    let from = from.map(str::trim).filter(|s| !s.is_empty());
    let to = to.map(str::trim).filter(|s| !s.is_empty());

    let (from_date, open_from) = match from {
        Some(raw) => (granularity.parse_start(raw)?, false),
        None => (NaiveDate::from_ymd_opt(OPEN_FROM_YEAR, 1, 1)?, true),
    };
    let to_date = match to {
        Some(raw) => granularity.parse_start(raw)?,
        None => granularity.truncate(today),
    };

    if from_date > to_date {
        return None;
    }

    Some(DateRange {
        granularity,
        from: from_date,
        to: to_date,
        open_from,
    })
}

/// A single year or month bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Period {
    Year(i32),
    Month(i32, u32),
}

impl Period {
    /// The period of `granularity` containing `date`. Days are not trend
    /// periods and map to their month.
    pub fn containing(granularity: Granularity, date: NaiveDate) -> Self {
        match granularity {
            Granularity::Years => Period::Year(date.year()),
            Granularity::Months | Granularity::Days => Period::Month(date.year(), date.month()),
        }
    }

    /// Parses a label produced by [`Period::label`] of the same shape as `self`.
    pub fn parse_like(&self, label: &str) -> Option<Period> {
        match self {
            Period::Year(_) => label.parse().ok().map(Period::Year),
            Period::Month(..) => {
                let (year, month) = label.split_once('-')?;
                let month: u32 = month.parse().ok()?;
                if !(1..=12).contains(&month) {
                    return None;
                }
                Some(Period::Month(year.parse().ok()?, month))
            }
        }
    }

    /// The following period in calendar order; December rolls into January.
    pub fn next(self) -> Self {
        match self {
            Period::Year(year) => Period::Year(year + 1),
            Period::Month(year, 12) => Period::Month(year + 1, 1),
            Period::Month(year, month) => Period::Month(year, month + 1),
        }
    }

    pub fn start(self) -> NaiveDate {
        let date = match self {
            Period::Year(year) => NaiveDate::from_ymd_opt(year, 1, 1),
            Period::Month(year, month) => NaiveDate::from_ymd_opt(year, month, 1),
        };
        date.unwrap_or(NaiveDate::MAX)
    }

    pub fn label(&self) -> String {
        match self {
            Period::Year(year) => format!("{:04}", year),
            Period::Month(year, month) => format!("{:04}-{:02}", year, month),
        }
    }

    /// Every period from `self` to `last`, both inclusive.
    pub fn through(self, last: Period) -> Vec<Period> {
        let mut periods = Vec::new();
        let mut current = self;
        while current <= last {
            periods.push(current);
            current = current.next();
        }
        periods
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
