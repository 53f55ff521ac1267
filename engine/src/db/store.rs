//! Generic record store
//!
//! Capabilities never write SQL. They go through [`RecordStore`], which
//! speaks in rows (`serde_json::Map`) addressed by [`Collection`] and column
//! filters. [`SqliteStore`] is the production implementation.
//!
//! All identifiers are checked against the collection's column whitelist
//! before they reach SQL; all values are bound as parameters.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, warn};

use super::collections::Collection;

/// A record as a JSON object keyed by column name
pub type Row = Map<String, Value>;

/// Attempts made by a versioned insert before a version conflict is reported
pub const VERSION_RETRY_ATTEMPTS: usize = 5;

/// Record store failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("unknown column '{column}' in {collection}")]
    UnknownColumn {
        collection: Collection,
        column: String,
    },

    #[error("{collection} does not support {operation}")]
    Unsupported {
        collection: Collection,
        operation: &'static str,
    },
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }

    fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => StoreError::Unavailable(err.to_string()),
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() || db.is_check_violation() {
                    return StoreError::Constraint(db.message().to_string());
                }
                // SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN (primary codes)
                let primary = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| code & 0xff);
                match primary {
                    Some(5) | Some(6) | Some(14) => {
                        StoreError::Unavailable(db.message().to_string())
                    }
                    _ => StoreError::Query(db.message().to_string()),
                }
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
            other => EngineError::Database(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

impl FilterOp {
    fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => " = ",
            FilterOp::Gte => " >= ",
            FilterOp::Lte => " <= ",
        }
    }
}

/// A single column condition; conditions in a slice are ANDed
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Gte,
            value: value.into(),
        }
    }

    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Self {
            column: column.to_string(),
            op: FilterOp::Lte,
            value: value.into(),
        }
    }
}

/// Projection, ordering and limit for [`RecordStore::find_many`]
#[derive(Debug, Clone, PartialEq)]
pub struct FindOptions {
    pub projection: Option<Vec<String>>,
    pub order_by: Option<String>,
    pub ascending: bool,
    pub limit: Option<u32>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            projection: None,
            order_by: None,
            ascending: true,
            limit: None,
        }
    }
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.projection = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order_by = Some(column.to_string());
        self.ascending = ascending;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Storage contract used by the context assembler and the task executors
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert `row`, or update the columns it names when a row with the
    /// same `conflict_keys` values exists. Columns absent from `row` are
    /// left untouched on update.
    async fn upsert(
        &self,
        collection: Collection,
        row: Row,
        conflict_keys: &[&str],
    ) -> Result<(), StoreError>;

    async fn insert(&self, collection: Collection, row: Row) -> Result<(), StoreError>;

    async fn find_one(
        &self,
        collection: Collection,
        filters: &[Filter],
        projection: Option<&[&str]>,
    ) -> Result<Option<Row>, StoreError>;

    async fn find_many(
        &self,
        collection: Collection,
        filters: &[Filter],
        options: FindOptions,
    ) -> Result<Vec<Row>, StoreError>;

    /// 1 + the highest version stored for `user_id`, or 1 when none exists
    async fn next_version(&self, collection: Collection, user_id: &str)
        -> Result<i64, StoreError>;

    /// Insert `row` under the next version for its `user_id` and return
    /// the version assigned. Version selection and insert are one statement.
    async fn insert_versioned(&self, collection: Collection, row: Row) -> Result<i64, StoreError>;

    /// Clear `is_current` on every row of the user and insert `row` as the
    /// new current version, atomically. Returns the version assigned.
    async fn replace_current(&self, collection: Collection, row: Row) -> Result<i64, StoreError>;
}

/// SQLite implementation of [`RecordStore`]
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident)
}

fn check_column(collection: Collection, column: &str) -> Result<(), StoreError> {
    if collection.has_column(column) {
        Ok(())
    } else {
        Err(StoreError::UnknownColumn {
            collection,
            column: column.to_string(),
        })
    }
}

fn check_row(collection: Collection, row: &Row) -> Result<(), StoreError> {
    row.keys().try_for_each(|column| check_column(collection, column))
}

fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
    match value {
        Value::Null => qb.push_bind(Option::<String>::None),
        Value::Bool(b) => qb.push_bind(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => qb.push_bind(i),
            None => qb.push_bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => qb.push_bind(s.clone()),
        other => qb.push_bind(other.to_string()),
    };
}

fn push_filters(
    qb: &mut QueryBuilder<'_, Sqlite>,
    collection: Collection,
    filters: &[Filter],
) -> Result<(), StoreError> {
    for (i, filter) in filters.iter().enumerate() {
        check_column(collection, &filter.column)?;
        qb.push(if i == 0 { " WHERE " } else { " AND " });
        qb.push(quote(&filter.column));
        qb.push(filter.op.sql());
        push_value(qb, &filter.value);
    }
    Ok(())
}

fn push_select(
    qb: &mut QueryBuilder<'_, Sqlite>,
    collection: Collection,
    projection: Option<&[String]>,
) -> Result<(), StoreError> {
    let columns: Vec<&str> = match projection {
        Some(cols) => {
            for col in cols {
                check_column(collection, col)?;
            }
            cols.iter().map(String::as_str).collect()
        }
        None => collection.columns().to_vec(),
    };

    qb.push("SELECT json_object(");
    for (i, col) in columns.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(format!("'{}', {}", col, quote(col)));
    }
    qb.push(") FROM ");
    qb.push(quote(collection.table()));
    Ok(())
}

/// Turn a `json_object` row back into structured JSON
fn decode_row(collection: Collection, raw: &str) -> Result<Row, StoreError> {
    let mut row: Row = serde_json::from_str(raw)
        .map_err(|e| StoreError::Query(format!("undecodable row in {}: {}", collection, e)))?;

    for column in collection.json_columns() {
        if let Some(Value::String(text)) = row.get(*column) {
            if let Ok(parsed) = serde_json::from_str::<Value>(text) {
                row.insert((*column).to_string(), parsed);
            }
        }
    }
    for column in collection.bool_columns() {
        if let Some(Value::Number(n)) = row.get(*column) {
            let flag = n.as_i64().unwrap_or_default() != 0;
            row.insert((*column).to_string(), Value::Bool(flag));
        }
    }
    Ok(row)
}

/// Build `INSERT ... SELECT <values>, COALESCE(MAX(version), 0) + 1 ... RETURNING version`
fn versioned_insert_query<'a>(
    collection: Collection,
    mut row: Row,
) -> Result<QueryBuilder<'a, Sqlite>, StoreError> {
    if !collection.is_versioned() {
        return Err(StoreError::Unsupported {
            collection,
            operation: "versioned insert",
        });
    }
    row.remove("version");
    check_row(collection, &row)?;
    let user_id = match row.get("user_id") {
        Some(Value::String(id)) => id.clone(),
        _ => {
            return Err(StoreError::Query(format!(
                "versioned insert into {} requires a user_id",
                collection
            )))
        }
    };

    let table = quote(collection.table());
    let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", table));
    for (i, column) in row.keys().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(quote(column));
    }
    qb.push(", \"version\") SELECT ");
    for value in row.values() {
        push_value(&mut qb, value);
        qb.push(", ");
    }
    qb.push(format!(
        "COALESCE(MAX(\"version\"), 0) + 1 FROM {} WHERE \"user_id\" = ",
        table
    ));
    qb.push_bind(user_id);
    qb.push(" RETURNING \"version\"");
    Ok(qb)
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn stamp_updated_at(collection: Collection, row: &mut Row) {
        if collection.has_column("updated_at") && !row.contains_key("updated_at") {
            row.insert("updated_at".to_string(), Value::String(now_timestamp()));
        }
    }

    async fn try_replace_current(
        &self,
        collection: Collection,
        row: Row,
    ) -> Result<i64, StoreError> {
        let user_id = row
            .get("user_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_default();

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "UPDATE {} SET \"is_current\" = 0 WHERE \"user_id\" = ? AND \"is_current\" = 1",
            quote(collection.table())
        ))
        .bind(&user_id)
        .execute(&mut *tx)
        .await?;

        let version = versioned_insert_query(collection, row)?
            .build_query_scalar::<i64>()
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(version)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn upsert(
        &self,
        collection: Collection,
        mut row: Row,
        conflict_keys: &[&str],
    ) -> Result<(), StoreError> {
        Self::stamp_updated_at(collection, &mut row);
        check_row(collection, &row)?;
        for key in conflict_keys {
            check_column(collection, key)?;
            if !row.contains_key(*key) {
                return Err(StoreError::Query(format!(
                    "upsert into {} is missing conflict key '{}'",
                    collection, key
                )));
            }
        }

        let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", quote(collection.table())));
        for (i, column) in row.keys().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(quote(column));
        }
        qb.push(") VALUES (");
        for (i, value) in row.values().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, value);
        }
        qb.push(") ON CONFLICT (");
        qb.push(
            conflict_keys
                .iter()
                .map(|k| quote(k))
                .collect::<Vec<_>>()
                .join(", "),
        );
        qb.push(")");

        let updates: Vec<String> = row
            .keys()
            .filter(|column| !conflict_keys.contains(&column.as_str()))
            .map(|column| format!("{col} = excluded.{col}", col = quote(column)))
            .collect();
        if updates.is_empty() {
            qb.push(" DO NOTHING");
        } else {
            qb.push(" DO UPDATE SET ");
            qb.push(updates.join(", "));
        }

        qb.build().execute(&self.pool).await?;
        debug!("Upserted row into {}", collection);
        Ok(())
    }

    async fn insert(&self, collection: Collection, row: Row) -> Result<(), StoreError> {
        check_row(collection, &row)?;
        if row.is_empty() {
            return Err(StoreError::Query(format!("empty insert into {}", collection)));
        }

        let mut qb = QueryBuilder::new(format!("INSERT INTO {} (", quote(collection.table())));
        for (i, column) in row.keys().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            qb.push(quote(column));
        }
        qb.push(") VALUES (");
        for (i, value) in row.values().enumerate() {
            if i > 0 {
                qb.push(", ");
            }
            push_value(&mut qb, value);
        }
        qb.push(")");

        qb.build().execute(&self.pool).await?;
        debug!("Inserted row into {}", collection);
        Ok(())
    }

    async fn find_one(
        &self,
        collection: Collection,
        filters: &[Filter],
        projection: Option<&[&str]>,
    ) -> Result<Option<Row>, StoreError> {
        let mut options = FindOptions::new().limit(1);
        if let Some(cols) = projection {
            options = options.select(cols);
        }
        Ok(self
            .find_many(collection, filters, options)
            .await?
            .into_iter()
            .next())
    }

    async fn find_many(
        &self,
        collection: Collection,
        filters: &[Filter],
        options: FindOptions,
    ) -> Result<Vec<Row>, StoreError> {
        let mut qb = QueryBuilder::new("");
        push_select(&mut qb, collection, options.projection.as_deref())?;
        push_filters(&mut qb, collection, filters)?;

        let direction = if options.ascending { "ASC" } else { "DESC" };
        if let Some(order_by) = &options.order_by {
            check_column(collection, order_by)?;
            qb.push(format!(
                " ORDER BY {} {dir}, rowid {dir}",
                quote(order_by),
                dir = direction
            ));
        } else {
            qb.push(" ORDER BY rowid ASC");
        }
        if let Some(limit) = options.limit {
            qb.push(" LIMIT ");
            qb.push_bind(i64::from(limit));
        }

        let raw_rows = qb
            .build_query_scalar::<String>()
            .fetch_all(&self.pool)
            .await?;

        raw_rows
            .iter()
            .map(|raw| decode_row(collection, raw))
            .collect()
    }

    async fn next_version(
        &self,
        collection: Collection,
        user_id: &str,
    ) -> Result<i64, StoreError> {
        if !collection.is_versioned() {
            return Err(StoreError::Unsupported {
                collection,
                operation: "versioning",
            });
        }
        let version: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(\"version\"), 0) + 1 FROM {} WHERE \"user_id\" = ?",
            quote(collection.table())
        ))
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(version)
    }

    async fn insert_versioned(&self, collection: Collection, row: Row) -> Result<i64, StoreError> {
        let mut last_err = None;
        for attempt in 1..=VERSION_RETRY_ATTEMPTS {
            let result = versioned_insert_query(collection, row.clone())?
                .build_query_scalar::<i64>()
                .fetch_one(&self.pool)
                .await
                .map_err(StoreError::from);
            match result {
                Ok(version) => {
                    debug!("Inserted {} version {}", collection, version);
                    return Ok(version);
                }
                Err(e) if e.is_constraint() => {
                    warn!(
                        "Version conflict on {} (attempt {}/{}): {}",
                        collection, attempt, VERSION_RETRY_ATTEMPTS, e
                    );
                    last_err = Some(e);
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Constraint("version conflict".to_string())))
    }

    async fn replace_current(
        &self,
        collection: Collection,
        mut row: Row,
    ) -> Result<i64, StoreError> {
        if !collection.has_column("is_current") {
            return Err(StoreError::Unsupported {
                collection,
                operation: "current-row replacement",
            });
        }
        row.insert("is_current".to_string(), Value::Bool(true));

        let mut last_err = None;
        for attempt in 1..=VERSION_RETRY_ATTEMPTS {
            match self.try_replace_current(collection, row.clone()).await {
                Ok(version) => {
                    debug!("Replaced current {} with version {}", collection, version);
                    return Ok(version);
                }
                Err(e) if e.is_constraint() => {
                    warn!(
                        "Current-row conflict on {} (attempt {}/{}): {}",
                        collection, attempt, VERSION_RETRY_ATTEMPTS, e
                    );
                    last_err = Some(e);
                    tokio::task::yield_now().await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| StoreError::Constraint("current-row conflict".to_string())))
    }
}
