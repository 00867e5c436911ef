//! Store contract and its Postgres and in-memory implementations.

pub use crate::db::Database;
pub use crate::db_storage::PgStore;
pub use crate::memory_store::MemoryStore;
pub use crate::store::{
    CountQuery, DimensionSource, Filter, FilterColumn, GroupedCount, Record, Row, Scalar, Store,
};
