/// Date validation and range construction
use chrono::{Datelike, NaiveDate};
use rust_leads_api::dates::{
    check_date_format, create_dates, create_dates_at, today, Granularity, Period, OPEN_FROM_YEAR,
};

#[test]
fn iso_date_examples() {
    assert!(check_date_format("2021-05-10"));
    assert!(!check_date_format("242345-05-10"));
    assert!(!check_date_format("2021-02-30"));
}

#[test]
fn blank_year_range_covers_everything_through_this_year() {
    let range = create_dates(Granularity::Years, Some(""), Some("")).unwrap();

    assert!(range.open_from);
    assert_eq!(range.from.year(), OPEN_FROM_YEAR);
    assert_eq!(range.to_label(), format!("{:04}", today().year()));
    assert!(range.until() > today());
}

#[test]
fn missing_bounds_behave_like_blank_ones() {
    let blank = create_dates(Granularity::Months, Some(""), Some("  ")).unwrap();
    let missing = create_dates(Granularity::Months, None, None).unwrap();
    assert_eq!(blank, missing);
}

#[test]
fn month_range_through_today() {
    let today = NaiveDate::from_ymd_opt(2021, 11, 15).unwrap();
    let range = create_dates_at(Granularity::Months, Some("2021-06"), None, today).unwrap();

    assert!(!range.open_from);
    assert_eq!(range.from_period(), Period::Month(2021, 6));
    assert_eq!(range.to_period(), Period::Month(2021, 11));
    assert_eq!(range.until(), NaiveDate::from_ymd_opt(2021, 12, 1).unwrap());
}

#[test]
fn december_range_ends_next_january() {
    let today = NaiveDate::from_ymd_opt(2022, 3, 1).unwrap();
    let range =
        create_dates_at(Granularity::Months, Some("2021-11"), Some("2021-12"), today).unwrap();

    assert_eq!(range.until(), NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
    let labels: Vec<String> = range
        .from_period()
        .through(range.to_period())
        .iter()
        .map(Period::label)
        .collect();
    assert_eq!(labels, vec!["2021-11", "2021-12"]);
}

#[test]
fn invalid_input_yields_none() {
    let today = NaiveDate::from_ymd_opt(2021, 11, 15).unwrap();
    assert!(create_dates_at(Granularity::Years, Some("21"), None, today).is_none());
    assert!(create_dates_at(Granularity::Years, None, Some("2021-11"), today).is_none());
    assert!(create_dates_at(Granularity::Months, Some("2021-00"), None, today).is_none());
    assert!(create_dates_at(Granularity::Days, Some("2021-11-16"), Some("2021-11-15"), today).is_none());
}

#[test]
fn frequency_names() {
    assert_eq!(Granularity::parse("all"), Some(Granularity::Days));
    assert_eq!(Granularity::parse("months"), Some(Granularity::Months));
    assert_eq!(Granularity::parse("weeks"), None);
}
