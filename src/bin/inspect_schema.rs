//! Utility to print the service's tables and their columns.

use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::env;

const SCHEMAS: [&str; 3] = ["accounts", "thumbtack", "fb"];

/// Connects to `DATABASE_URL` and lists every table in the service schemas.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let database_url = env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;

    for schema in SCHEMAS {
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT table_name FROM information_schema.tables WHERE table_schema = $1 ORDER BY table_name",
        )
        .bind(schema)
        .fetch_all(&pool)
        .await?;

        if tables.is_empty() {
            println!("{}: (missing, run with RUN_MIGRATIONS=true)", schema);
            continue;
        }

        for (table,) in &tables {
            println!("{}.{}", schema, table);

            let columns: Vec<(String, String)> = sqlx::query_as(
                "SELECT column_name, data_type FROM information_schema.columns \
                 WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
            )
            .bind(schema)
            .bind(table)
            .fetch_all(&pool)
            .await?;

            for (col, type_) in columns {
                println!("  - {}: {}", col, type_);
            }
            println!();
        }
    }

    Ok(())
}
