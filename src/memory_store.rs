//! In-process [`Store`] used by the test-suite and by `DATABASE_URL=memory://`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::store::{
    validate_identifier, CountQuery, DimensionSource, Filter, GroupedCount, Record, Row, Scalar,
    Store,
};

type TableKey = (String, String);

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<TableKey, Vec<Row>>>,
    unique: Mutex<HashMap<TableKey, Vec<String>>>,
    calls: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the unique columns declared by `migrations/0001_init.sql`.
    pub fn with_service_schema() -> Self {
        let store = Self::new();
        store.add_unique("accounts", "users", "user_id");
        store.add_unique("accounts", "users", "username");
        store.add_unique("accounts", "users", "email");
        store.add_unique("thumbtack", "leads", "thumbtack_lead_id");
        store.add_unique("thumbtack", "messages", "thumbtack_message_id");
        store.add_unique("fb", "messages", "message_id");
        store
    }

    pub fn add_unique(&self, schema: &str, table: &str, column: &str) {
        self.unique
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key(schema, table))
            .or_default()
            .push(column.to_string());
    }

    /// Number of store calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Makes every following call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, schema: &str, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key(schema, table))
            .cloned()
            .unwrap_or_default()
    }

    fn enter(&self, schema: &str, table: &str) -> Result<(), AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::Store("connection refused".to_string()));
        }
        validate_identifier(schema)?;
        validate_identifier(table)
    }

    fn check_unique(&self, target: &TableKey, rows: &[Row], candidate: &Row, skip: Option<usize>) -> Result<(), AppError> {
        let unique = self.unique.lock().unwrap_or_else(|e| e.into_inner());
        let Some(columns) = unique.get(target) else {
            return Ok(());
        };

        for column in columns {
            let Some(value) = candidate.get(column).filter(|v| **v != Scalar::Null) else {
                continue;
            };
            let clash = rows
                .iter()
                .enumerate()
                .filter(|(index, _)| Some(*index) != skip)
                .any(|(_, row)| row.get(column) == Some(value));
            if clash {
                return Err(AppError::Conflict(format!(
                    "duplicate key value violates unique constraint on {}.{}.{}",
                    target.0, target.1, column
                )));
            }
        }
        Ok(())
    }
}

fn key(schema: &str, table: &str) -> TableKey {
    (schema.to_string(), table.to_string())
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(
        &self,
        schema: &str,
        table: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>, AppError> {
        self.enter(schema, table)?;
        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());

        Ok(tables
            .get(&key(schema, table))
            .map(|rows| {
                rows.iter()
                    .filter(|row| filter.matches(row))
                    .map(Row::to_record)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, schema: &str, table: &str, row: &Row) -> Result<(), AppError> {
        self.enter(schema, table)?;
        let target = key(schema, table);
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let rows = tables.entry(target.clone()).or_default();

        self.check_unique(&target, rows, row, None)?;
        rows.push(row.clone());
        Ok(())
    }

    async fn update(
        &self,
        schema: &str,
        table: &str,
        values: &Row,
        filter: &Filter,
    ) -> Result<u64, AppError> {
        self.enter(schema, table)?;
        let target = key(schema, table);
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get_mut(&target) else {
            return Ok(0);
        };

        let matching: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, row)| filter.matches(row))
            .map(|(index, _)| index)
            .collect();

        for &index in &matching {
            let mut updated = rows[index].clone();
            for (column, value) in values.iter() {
                updated.set(column, value.clone());
            }
            self.check_unique(&target, rows, &updated, Some(index))?;
            rows[index] = updated;
        }

        Ok(matching.len() as u64)
    }

    async fn delete(&self, schema: &str, table: &str, filter: &Filter) -> Result<u64, AppError> {
        self.enter(schema, table)?;
        let mut tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get_mut(&key(schema, table)) else {
            return Ok(0);
        };

        let before = rows.len();
        rows.retain(|row| !filter.matches(row));
        Ok((before - rows.len()) as u64)
    }

    async fn count_grouped(&self, query: &CountQuery) -> Result<Vec<GroupedCount>, AppError> {
        self.enter(&query.schema, &query.table)?;
        for name in query.identifiers() {
            validate_identifier(name)?;
        }

        let tables = self.tables.lock().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get(&key(&query.schema, &query.table)) else {
            return Ok(Vec::new());
        };

        let mut groups: BTreeMap<(String, Option<String>), i64> = BTreeMap::new();
        for row in rows.iter().filter(|row| query.filter.matches(row)) {
            let Some(date) = row.get(&query.date_column).and_then(Scalar::as_date) else {
                continue;
            };
            if date < query.from || date >= query.until {
                continue;
            }

            let dimension = match &query.dimension {
                None => None,
                Some(DimensionSource::Column(column)) => {
                    row.get(column).and_then(Scalar::as_group_key)
                }
                Some(DimensionSource::Joined {
                    schema,
                    table,
                    column,
                    local_key,
                    foreign_key,
                }) => {
                    let local = row.get(local_key);
                    tables
                        .get(&key(schema, table))
                        .and_then(|joined| {
                            joined
                                .iter()
                                .find(|candidate| local.is_some() && candidate.get(foreign_key) == local)
                        })
                        .and_then(|candidate| candidate.get(column))
                        .and_then(Scalar::as_group_key)
                }
            };

            *groups
                .entry((query.granularity.label(date), dimension))
                .or_insert(0) += 1;
        }

        Ok(groups
            .into_iter()
            .map(|((bucket, dimension), count)| GroupedCount {
                bucket,
                dimension,
                count,
            })
            .collect())
    }
}
