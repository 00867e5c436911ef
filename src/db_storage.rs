use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row as _};

use crate::errors::{AppError, ResultExt};
use crate::store::{
    validate_identifier, CountQuery, DimensionSource, Filter, FilterColumn, GroupedCount, Record,
    Row, Scalar, Store,
};

/// Postgres implementation of [`Store`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

}

/// Maps a failed INSERT/UPDATE; unique-constraint violations become
/// [`AppError::Conflict`].
fn write_error(err: sqlx::Error, action: String) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(format!("{}: {}", action, db.message()))
        }
        _ => AppError::WithContext {
            source: Box::new(AppError::DatabaseError(err)),
            context: action,
        },
    }
}

fn bind_scalar<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Scalar,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Scalar::Null => query.bind(Option::<String>::None),
        Scalar::Bool(b) => query.bind(*b),
        Scalar::Int(i) => query.bind(*i),
        Scalar::Text(s) => query.bind(s.as_str()),
        Scalar::Date(d) => query.bind(*d),
        Scalar::Timestamp(t) => query.bind(*t),
    }
}

/// `schema.table`, after checking both names.
fn qualified(schema: &str, table: &str) -> Result<String, AppError> {
    validate_identifier(schema)?;
    validate_identifier(table)?;
    Ok(format!("{}.{}", schema, table))
}

/// Renders `filter` as a WHERE clause. Placeholders start at `$first_param`;
/// NULL comparisons render as `IS NULL` and bind nothing.
fn where_clause<'f>(
    filter: &'f Filter,
    alias: Option<&str>,
    first_param: usize,
) -> Result<(String, Vec<&'f Scalar>), AppError> {
    let prefix = alias.map(|a| format!("{}.", a)).unwrap_or_default();
    let mut terms = Vec::with_capacity(filter.terms().len());
    let mut params = Vec::new();

    for (column, value) in filter.terms() {
        validate_identifier(column.column())?;
        let lhs = match column {
            FilterColumn::Plain(name) => format!("{}{}", prefix, name),
            FilterColumn::Date(name) => format!("date({}{})", prefix, name),
        };
        if *value == Scalar::Null {
            terms.push(format!("{} IS NULL", lhs));
        } else {
            params.push(value);
            terms.push(format!("{} = ${}", lhs, first_param + params.len() - 1));
        }
    }

    if terms.is_empty() {
        Ok((String::new(), params))
    } else {
        Ok((format!("WHERE {}", terms.join(" AND ")), params))
    }
}

fn record_from_row(row: &PgRow) -> Result<Record, AppError> {
    match row.try_get::<Value, _>("record")? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::InternalError(format!(
            "row_to_json returned a non-object: {}",
            other
        ))),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get(
        &self,
        schema: &str,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>, AppError> {
        let target = qualified(schema, table)?;
        let (where_sql, params) = where_clause(filter, Some("t"), 1)?;
        let sql = format!(
            "SELECT row_to_json(t) AS record FROM {} t {}",
            target, where_sql
        );
        tracing::debug!("get: {} ({} params)", sql, params.len());

        let mut query = sqlx::query(&sql);
        for value in params {
            query = bind_scalar(query, value);
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("select from {}", target))?;

        rows.iter().map(record_from_row).collect()
    }

    async fn insert(&self, schema: &str, table: &str, row: &Row) -> Result<(), AppError> {
        let target = qualified(schema, table)?;
        if row.is_empty() {
            return Err(AppError::InternalError(format!(
                "empty insert into {}",
                target
            )));
        }
        for column in row.columns() {
            validate_identifier(column)?;
        }

        let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            target,
            row.columns().join(", "),
            placeholders.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = bind_scalar(query, value);
        }

        query
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, format!("insert into {}", target)))?;

        tracing::debug!("Inserted row into {}", target);
        Ok(())
    }

    async fn update(
        &self,
        schema: &str,
        table: &str,
        values: &Row,
        filter: &Filter,
    ) -> Result<u64, AppError> {
        let target = qualified(schema, table)?;
        if values.is_empty() {
            return Ok(0);
        }

        let mut assignments = Vec::with_capacity(values.len());
        for (index, column) in values.columns().iter().enumerate() {
            validate_identifier(column)?;
            assignments.push(format!("{} = ${}", column, index + 1));
        }
        let (where_sql, params) = where_clause(filter, None, values.len() + 1)?;
        let sql = format!(
            "UPDATE {} SET {} {}",
            target,
            assignments.join(", "),
            where_sql
        );

        let mut query = sqlx::query(&sql);
        for value in values.values() {
            query = bind_scalar(query, value);
        }
        for value in params {
            query = bind_scalar(query, value);
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, format!("update {}", target)))?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, schema: &str, table: &str, filter: &Filter) -> Result<u64, AppError> {
        let target = qualified(schema, table)?;
        if filter.is_empty() {
            return Err(AppError::InternalError(format!(
                "refusing unfiltered delete from {}",
                target
            )));
        }

        let (where_sql, params) = where_clause(filter, None, 1)?;
        let sql = format!("DELETE FROM {} {}", target, where_sql);

        let mut query = sqlx::query(&sql);
        for value in params {
            query = bind_scalar(query, value);
        }

        let result = query
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete from {}", target))?;

        Ok(result.rows_affected())
    }

    async fn count_grouped(&self, query: &CountQuery) -> Result<Vec<GroupedCount>, AppError> {
        for name in query.identifiers() {
            validate_identifier(name)?;
        }
        let target = format!("{}.{}", query.schema, query.table);

        let (dimension_sql, join_sql) = match &query.dimension {
            None => ("NULL::TEXT".to_string(), String::new()),
            Some(DimensionSource::Column(column)) => (format!("t.{}::TEXT", column), String::new()),
            Some(DimensionSource::Joined {
                schema,
                table,
                column,
                local_key,
                foreign_key,
            }) => (
                format!("j.{}::TEXT", column),
                format!(
                    "LEFT JOIN {}.{} j ON j.{} = t.{}",
                    schema, table, foreign_key, local_key
                ),
            ),
        };

        let (filter_sql, params) = where_clause(&query.filter, Some("t"), 1)?;
        let range_from = params.len() + 1;
        let range_sql = format!(
            "t.{col} >= ${from} AND t.{col} < ${until}",
            col = query.date_column,
            from = range_from,
            until = range_from + 1
        );
        let where_sql = if filter_sql.is_empty() {
            format!("WHERE {}", range_sql)
        } else {
            format!("{} AND {}", filter_sql, range_sql)
        };

        let sql = format!(
            "SELECT to_char(t.{date}, '{fmt}') AS bucket, {dimension} AS dimension, \
             COUNT(*)::BIGINT AS count \
             FROM {target} t {join} {where_sql} \
             GROUP BY 1, 2 ORDER BY 1, 2",
            date = query.date_column,
            fmt = query.granularity.sql_format(),
            dimension = dimension_sql,
            target = target,
            join = join_sql,
            where_sql = where_sql,
        );
        tracing::debug!("count_grouped: {}", sql);

        let mut db_query = sqlx::query(&sql);
        for value in params {
            db_query = bind_scalar(db_query, value);
        }
        db_query = db_query.bind(query.from).bind(query.until);

        let rows = db_query
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("grouped count over {}", target))?;

        rows.iter()
            .map(|row| -> Result<GroupedCount, AppError> {
                Ok(GroupedCount {
                    bucket: row.try_get("bucket")?,
                    dimension: row.try_get("dimension")?,
                    count: row.try_get("count")?,
                })
            })
            .collect()
    }
}
