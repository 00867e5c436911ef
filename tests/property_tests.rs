/// Property-based tests using proptest
/// Tests invariants that should hold for all inputs
use proptest::prelude::*;
use rust_leads_api::accounts::is_valid_email;
use rust_leads_api::dates::{check_date_format, create_dates_at, Granularity, Period};
use rust_leads_api::flatten::{flatten_json, KEY_SEPARATOR};
use serde_json::{Map, Value};

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,8}".prop_map(Value::from),
    ]
}

fn arb_json() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn arb_object() -> impl Strategy<Value = Value> {
    prop::collection::btree_map("[a-z]{1,4}", arb_json(), 0..5)
        .prop_map(|m| Value::Object(m.into_iter().collect::<Map<String, Value>>()))
}

/// Every leaf with its key path.
fn leaves(value: &Value, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, Value)>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                path.push(key.clone());
                leaves(child, path, out);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(index.to_string());
                leaves(child, path, out);
                path.pop();
            }
        }
        leaf => out.push((path.clone(), leaf.clone())),
    }
}

// Property: flattening then splitting keys on the separator recovers every leaf
proptest! {
    #[test]
    fn flatten_then_split_recovers_leaves(input in arb_object()) {
        let mut expected = Vec::new();
        leaves(&input, &mut Vec::new(), &mut expected);
        expected.sort_by(|a, b| a.0.cmp(&b.0));

        let mut renested: Vec<(Vec<String>, Value)> = flatten_json(&input)
            .into_iter()
            .map(|(key, value)| {
                (key.split(KEY_SEPARATOR).map(str::to_string).collect(), value)
            })
            .collect();
        renested.sort_by(|a, b| a.0.cmp(&b.0));

        prop_assert_eq!(renested, expected);
    }

    #[test]
    fn flattened_values_are_never_containers(input in arb_object()) {
        for value in flatten_json(&input).values() {
            prop_assert!(!value.is_object() && !value.is_array());
        }
    }
}

// Property: validators never panic
proptest! {
    #[test]
    fn date_check_never_panics(raw in "\\PC*") {
        let _ = check_date_format(&raw);
    }

    #[test]
    fn email_validation_never_panics(email in "\\PC*") {
        let _ = is_valid_email(&email);
    }

    #[test]
    fn real_dates_pass_the_check(year in 0i32..=9999, month in 1u32..=12, day in 1u32..=28) {
        let raw = format!("{:04}-{:02}-{:02}", year, month, day);
        prop_assert!(check_date_format(&raw));
    }
}

// Property: year ranges span exactly to - from + 1 periods
proptest! {
    #[test]
    fn year_range_period_count(from in 1900i32..2100, span in 0i32..50) {
        let to = from + span;
        let today = chrono::NaiveDate::from_ymd_opt(2150, 1, 1).unwrap();
        let range = create_dates_at(
            Granularity::Years,
            Some(&format!("{:04}", from)),
            Some(&format!("{:04}", to)),
            today,
        ).unwrap();

        let periods = range.from_period().through(range.to_period());
        prop_assert_eq!(periods.len() as i32, span + 1);
        prop_assert_eq!(periods.first().copied(), Some(Period::Year(from)));
    }

    #[test]
    fn month_iteration_is_strictly_increasing(year in 1900i32..2100, month in 1u32..=12, steps in 1usize..40) {
        let mut current = Period::Month(year, month);
        for _ in 0..steps {
            let next = current.next();
            prop_assert!(next > current);
            if let Period::Month(_, m) = next {
                prop_assert!((1..=12).contains(&m));
            }
            current = next;
        }
    }
}
