use std::env;
use uuid::Uuid;

use rust_leads_api::data::{CountQuery, Database, DimensionSource, Filter, PgStore, Store};
use rust_leads_api::dates::Granularity;
use rust_leads_api::models::{LEADS_TABLE, THUMBTACK_SCHEMA};
use rust_leads_api::normalizer::normalize_lead;

mod common;

/// Integration smoke test for the Postgres store.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn pg_store_lead_smoke_test() -> anyhow::Result<()> {
    let db_url = env::var("TEST_DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    db.migrate().await?;
    let store = PgStore::new(db.pool.clone());

    // Unique ids so repeated runs do not collide on the lead id constraint.
    let business = format!("smoke-{}", Uuid::new_v4().simple());
    let mut payload = common::lead_with(&Uuid::new_v4().to_string(), 1636428031, "CA");
    payload["business"]["businessID"] = serde_json::json!(business);
    let lead = normalize_lead(&payload).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    store
        .insert(THUMBTACK_SCHEMA, LEADS_TABLE, &lead.to_row())
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let filter = Filter::new().eq("thumbtack_business_id", business.as_str());
    let rows = store
        .get(THUMBTACK_SCHEMA, LEADS_TABLE, &filter)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["state"], "CA");

    let counts = store
        .count_grouped(&CountQuery {
            schema: THUMBTACK_SCHEMA.to_string(),
            table: LEADS_TABLE.to_string(),
            date_column: "contacted_time".to_string(),
            granularity: Granularity::Years,
            dimension: Some(DimensionSource::Column("state".to_string())),
            filter,
            from: chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
            until: chrono::NaiveDate::from_ymd_opt(2100, 1, 1).unwrap(),
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert_eq!(counts.len(), 1);
    assert_eq!(counts[0].dimension.as_deref(), Some("CA"));
    assert_eq!(counts[0].count, 1);
    Ok(())
}
