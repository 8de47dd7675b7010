//! Storage ports and engines for tabsink sources and imported rows.
//!
//! Components never touch a database handle directly; they receive the
//! [`SourceStore`] and [`RowStore`] ports. [`MemoryStore`] backs tests and
//! embedded use, [`PgStore`] is the Postgres engine behind the same ports.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use tabsink_core::{ColumnType, NewDataRow, RunStatus, SlotValue, Source, SourceStatus};

pub const CRATE_NAME: &str = "tabsink-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("source short key {key:?} is already in use")]
    DuplicateShortKey { key: String },
    #[error("source {id} not found")]
    MissingSource { id: Uuid },
    #[error("raw select fragments are not supported by this store")]
    SelectUnsupported,
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Sort direction + physical field for a row query.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub descending: bool,
}

/// A physical-field row query. Field names here are already translated;
/// logical names never reach a store.
#[derive(Debug, Clone, Default)]
pub struct RowQuery {
    pub conditions: Vec<(String, JsonValue)>,
    pub sort: Option<SortSpec>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

pub type RecordMap = JsonMap<String, JsonValue>;

#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn insert_source(&self, source: &Source) -> Result<(), StoreError>;
    async fn update_source(&self, source: &Source) -> Result<(), StoreError>;
    async fn delete_source(&self, id: Uuid) -> Result<(), StoreError>;
    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StoreError>;
    async fn get_source_by_key(&self, key: &str) -> Result<Option<Source>, StoreError>;
    async fn list_sources(&self, status: Option<SourceStatus>) -> Result<Vec<Source>, StoreError>;
    /// Records the outcome of a sync run. Success and error stamp
    /// `last_run_at`; pending only flips the status.
    async fn record_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RowStore: Send + Sync {
    /// Replaces every stored row of the source with `rows`, atomically where
    /// the engine supports it.
    async fn replace_rows(
        &self,
        source_id: Uuid,
        rows: Vec<NewDataRow>,
    ) -> Result<usize, StoreError>;

    async fn query_rows(
        &self,
        source_id: Uuid,
        query: &RowQuery,
    ) -> Result<Vec<RecordMap>, StoreError>;

    /// Free-form WHERE fragment with `?` placeholders, AND-combined under the
    /// implicit source predicate. Conditions in `query` are ignored; sort and
    /// pagination apply.
    async fn query_rows_select(
        &self,
        source_id: Uuid,
        fragment: &str,
        params: &[JsonValue],
        query: &RowQuery,
    ) -> Result<Vec<RecordMap>, StoreError>;
}

/// True for field names a row query may reference: the canonical slot
/// columns plus the fixed row attributes.
pub fn is_queryable_field(name: &str) -> bool {
    if matches!(name, "id" | "source_id" | "row_number" | "created_at") {
        return true;
    }
    is_slot_field(name)
}

fn is_slot_field(name: &str) -> bool {
    let Some((prefix, slot)) = name.rsplit_once('_') else {
        return false;
    };
    let Some(ty) = ColumnType::parse_str(prefix) else {
        return false;
    };
    slot.parse::<u16>()
        .map(|slot| ty.field_name(slot).is_some())
        .unwrap_or(false)
}

#[derive(Debug, Clone)]
struct MemoryRow {
    id: Uuid,
    row_number: u32,
    created_at: DateTime<Utc>,
    values: BTreeMap<String, SlotValue>,
}

/// In-memory store for tests and embedded use. Whole-map locks are fine at
/// this scale; replace_rows swaps the source's vector in one write.
#[derive(Default)]
pub struct MemoryStore {
    sources: RwLock<HashMap<Uuid, Source>>,
    rows: RwLock<HashMap<Uuid, Vec<MemoryRow>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn assert_key_free(&self, source: &Source) -> Result<(), StoreError> {
        let Some(key) = &source.short_key else {
            return Ok(());
        };
        let sources = self.sources.read().await;
        let taken = sources
            .values()
            .any(|other| other.id != source.id && other.short_key.as_deref() == Some(key));
        if taken {
            return Err(StoreError::DuplicateShortKey { key: key.clone() });
        }
        Ok(())
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn insert_source(&self, source: &Source) -> Result<(), StoreError> {
        self.assert_key_free(source).await?;
        self.sources
            .write()
            .await
            .insert(source.id, source.clone());
        Ok(())
    }

    async fn update_source(&self, source: &Source) -> Result<(), StoreError> {
        self.assert_key_free(source).await?;
        let mut sources = self.sources.write().await;
        if !sources.contains_key(&source.id) {
            return Err(StoreError::MissingSource { id: source.id });
        }
        sources.insert(source.id, source.clone());
        Ok(())
    }

    async fn delete_source(&self, id: Uuid) -> Result<(), StoreError> {
        self.sources.write().await.remove(&id);
        self.rows.write().await.remove(&id);
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StoreError> {
        Ok(self.sources.read().await.get(&id).cloned())
    }

    async fn get_source_by_key(&self, key: &str) -> Result<Option<Source>, StoreError> {
        Ok(self
            .sources
            .read()
            .await
            .values()
            .find(|source| source.short_key.as_deref() == Some(key))
            .cloned())
    }

    async fn list_sources(&self, status: Option<SourceStatus>) -> Result<Vec<Source>, StoreError> {
        let mut sources: Vec<Source> = self
            .sources
            .read()
            .await
            .values()
            .filter(|source| status.map_or(true, |wanted| source.status == wanted))
            .cloned()
            .collect();
        sources.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(sources)
    }

    async fn record_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut sources = self.sources.write().await;
        let source = sources
            .get_mut(&id)
            .ok_or(StoreError::MissingSource { id })?;
        source.last_run_status = status;
        source.last_error = error;
        if matches!(status, RunStatus::Success | RunStatus::Error) {
            source.last_run_at = Some(Utc::now());
        }
        source.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn replace_rows(
        &self,
        source_id: Uuid,
        rows: Vec<NewDataRow>,
    ) -> Result<usize, StoreError> {
        let stored: Vec<MemoryRow> = rows
            .into_iter()
            .map(|row| MemoryRow {
                id: Uuid::new_v4(),
                row_number: row.row_number,
                created_at: Utc::now(),
                values: row.values,
            })
            .collect();
        let count = stored.len();
        self.rows.write().await.insert(source_id, stored);
        Ok(count)
    }

    async fn query_rows(
        &self,
        source_id: Uuid,
        query: &RowQuery,
    ) -> Result<Vec<RecordMap>, StoreError> {
        for (field, _) in &query.conditions {
            if !is_queryable_field(field) {
                return Err(StoreError::Invalid(format!("unknown field {field:?}")));
            }
        }
        let rows = self.rows.read().await;
        let mut maps: Vec<RecordMap> = rows
            .get(&source_id)
            .map(|rows| rows.iter().map(|row| memory_row_to_map(source_id, row)).collect())
            .unwrap_or_default();

        maps.retain(|map| {
            query.conditions.iter().all(|(field, expected)| {
                json_eq(map.get(field.as_str()).unwrap_or(&JsonValue::Null), expected)
            })
        });

        if let Some(sort) = &query.sort {
            if !is_queryable_field(&sort.field) {
                return Err(StoreError::Invalid(format!(
                    "unknown sort field {:?}",
                    sort.field
                )));
            }
            maps.sort_by(|a, b| {
                let ordering = json_cmp(
                    a.get(sort.field.as_str()).unwrap_or(&JsonValue::Null),
                    b.get(sort.field.as_str()).unwrap_or(&JsonValue::Null),
                );
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let maps = maps.into_iter().skip(offset);
        Ok(match query.limit {
            Some(limit) => maps.take(limit as usize).collect(),
            None => maps.collect(),
        })
    }

    async fn query_rows_select(
        &self,
        _source_id: Uuid,
        _fragment: &str,
        _params: &[JsonValue],
        _query: &RowQuery,
    ) -> Result<Vec<RecordMap>, StoreError> {
        Err(StoreError::SelectUnsupported)
    }
}

fn memory_row_to_map(source_id: Uuid, row: &MemoryRow) -> RecordMap {
    let mut map = RecordMap::new();
    map.insert("id".into(), JsonValue::String(row.id.to_string()));
    map.insert(
        "source_id".into(),
        JsonValue::String(source_id.to_string()),
    );
    map.insert("row_number".into(), JsonValue::from(row.row_number));
    map.insert(
        "created_at".into(),
        JsonValue::String(row.created_at.to_rfc3339()),
    );
    for (field, value) in &row.values {
        map.insert(field.clone(), value.to_json());
    }
    map
}

fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn json_cmp(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Ordering::Equal,
        // Nulls sort last regardless of direction of the other value.
        (JsonValue::Null, _) => Ordering::Greater,
        (_, JsonValue::Null) => Ordering::Less,
        (JsonValue::Number(x), JsonValue::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Postgres-backed store. The wide `data_rows` table carries one nullable
/// column per slot; `replace_rows` runs delete + insert inside a single
/// transaction so readers never observe the empty window.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const SOURCE_COLUMNS: &str = "id, name, short_key, description, status, content_type, url, \
     schedule, columns_json, created_at, updated_at, last_run_at, last_run_status, last_error";

fn source_from_row(row: &PgRow) -> Result<Source, StoreError> {
    let status: String = row.try_get("status")?;
    let content_type: String = row.try_get("content_type")?;
    let last_run_status: String = row.try_get("last_run_status")?;
    let columns_json: JsonValue = row.try_get("columns_json")?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        short_key: row.try_get("short_key")?,
        description: row.try_get("description")?,
        status: SourceStatus::parse_str(&status)
            .ok_or_else(|| StoreError::Invalid(format!("bad source status {status:?}")))?,
        content_type: tabsink_core::ContentType::parse_str(&content_type)
            .ok_or_else(|| StoreError::Invalid(format!("bad content type {content_type:?}")))?,
        url: row.try_get("url")?,
        schedule: row.try_get("schedule")?,
        columns: serde_json::from_value(columns_json)
            .map_err(|err| StoreError::Invalid(format!("bad columns_json: {err}")))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_run_at: row.try_get("last_run_at")?,
        last_run_status: RunStatus::parse_str(&last_run_status).ok_or_else(|| {
            StoreError::Invalid(format!("bad run status {last_run_status:?}"))
        })?,
        last_error: row.try_get("last_error")?,
    })
}

fn map_unique_violation(err: sqlx::Error, source: &Source) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StoreError::DuplicateShortKey {
                key: source.short_key.clone().unwrap_or_default(),
            };
        }
    }
    StoreError::Database(err)
}

#[async_trait]
impl SourceStore for PgStore {
    async fn insert_source(&self, source: &Source) -> Result<(), StoreError> {
        let columns_json = serde_json::to_value(&source.columns)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        sqlx::query(
            "INSERT INTO sources (id, name, short_key, description, status, content_type, url, \
             schedule, columns_json, created_at, updated_at, last_run_at, last_run_status, last_error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(&source.short_key)
        .bind(&source.description)
        .bind(source.status.as_str())
        .bind(source.content_type.as_str())
        .bind(&source.url)
        .bind(&source.schedule)
        .bind(columns_json)
        .bind(source.created_at)
        .bind(source.updated_at)
        .bind(source.last_run_at)
        .bind(source.last_run_status.as_str())
        .bind(&source.last_error)
        .execute(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, source))?;
        Ok(())
    }

    async fn update_source(&self, source: &Source) -> Result<(), StoreError> {
        let columns_json = serde_json::to_value(&source.columns)
            .map_err(|err| StoreError::Invalid(err.to_string()))?;
        let result = sqlx::query(
            "UPDATE sources SET name = $2, short_key = $3, description = $4, status = $5, \
             content_type = $6, url = $7, schedule = $8, columns_json = $9, updated_at = $10, \
             last_run_at = $11, last_run_status = $12, last_error = $13 WHERE id = $1",
        )
        .bind(source.id)
        .bind(&source.name)
        .bind(&source.short_key)
        .bind(&source.description)
        .bind(source.status.as_str())
        .bind(source.content_type.as_str())
        .bind(&source.url)
        .bind(&source.schedule)
        .bind(columns_json)
        .bind(source.updated_at)
        .bind(source.last_run_at)
        .bind(source.last_run_status.as_str())
        .bind(&source.last_error)
        .execute(&self.pool)
        .await
        .map_err(|err| map_unique_violation(err, source))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingSource { id: source.id });
        }
        Ok(())
    }

    async fn delete_source(&self, id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sources WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn get_source_by_key(&self, key: &str) -> Result<Option<Source>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources WHERE short_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn list_sources(&self, status: Option<SourceStatus>) -> Result<Vec<Source>, StoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {SOURCE_COLUMNS} FROM sources WHERE status = $1 ORDER BY name, id"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY name, id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(source_from_row).collect()
    }

    async fn record_run(
        &self,
        id: Uuid,
        status: RunStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let stamp_run = matches!(status, RunStatus::Success | RunStatus::Error);
        let result = sqlx::query(
            "UPDATE sources SET last_run_status = $2, last_error = $3, \
             last_run_at = CASE WHEN $4 THEN now() ELSE last_run_at END, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .bind(stamp_run)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::MissingSource { id });
        }
        Ok(())
    }
}

#[async_trait]
impl RowStore for PgStore {
    async fn replace_rows(
        &self,
        source_id: Uuid,
        rows: Vec<NewDataRow>,
    ) -> Result<usize, StoreError> {
        for row in &rows {
            for field in row.values.keys() {
                if !is_slot_field(field) {
                    return Err(StoreError::Invalid(format!("unknown slot field {field:?}")));
                }
            }
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM data_rows WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;

        for row in &rows {
            let mut builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO data_rows (id, source_id, row_number, created_at");
            for field in row.values.keys() {
                builder.push(", ");
                builder.push(field.as_str());
            }
            builder.push(") VALUES (");
            {
                let mut values = builder.separated(", ");
                values.push_bind(Uuid::new_v4());
                values.push_bind(source_id);
                values.push_bind(row.row_number as i32);
                values.push_bind(Utc::now());
                for value in row.values.values() {
                    match value {
                        SlotValue::Text(v) | SlotValue::Json(v) => values.push_bind(v.clone()),
                        SlotValue::Int(v) | SlotValue::Date(v) => values.push_bind(*v),
                        SlotValue::Float(v) => values.push_bind(*v),
                        SlotValue::Bool(v) => values.push_bind(*v),
                    };
                }
            }
            builder.push(")");
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(%source_id, rows = rows.len(), "replaced data rows");
        Ok(rows.len())
    }

    async fn query_rows(
        &self,
        source_id: Uuid,
        query: &RowQuery,
    ) -> Result<Vec<RecordMap>, StoreError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT * FROM data_rows WHERE source_id = ");
        builder.push_bind(source_id);

        for (field, value) in &query.conditions {
            if !is_queryable_field(field) {
                return Err(StoreError::Invalid(format!("unknown field {field:?}")));
            }
            builder.push(" AND ");
            builder.push(field.as_str());
            push_json_comparison(&mut builder, value);
        }

        push_tail(&mut builder, query)?;

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(pg_row_to_map).collect()
    }

    async fn query_rows_select(
        &self,
        source_id: Uuid,
        fragment: &str,
        params: &[JsonValue],
        query: &RowQuery,
    ) -> Result<Vec<RecordMap>, StoreError> {
        let mut sql = String::from("SELECT * FROM data_rows WHERE source_id = $1");
        if !fragment.trim().is_empty() {
            sql.push_str(" AND (");
            sql.push_str(&rewrite_placeholders(fragment, 2));
            sql.push(')');
        }
        if let Some(sort) = &query.sort {
            if !is_queryable_field(&sort.field) {
                return Err(StoreError::Invalid(format!(
                    "unknown sort field {:?}",
                    sort.field
                )));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&sort.field);
            sql.push_str(if sort.descending { " DESC" } else { " ASC" });
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let mut prepared = sqlx::query(&sql).bind(source_id);
        for param in params {
            prepared = match param {
                JsonValue::Null => prepared.bind(Option::<String>::None),
                JsonValue::Bool(v) => prepared.bind(*v),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(v) => prepared.bind(v),
                    None => prepared.bind(n.as_f64().unwrap_or(0.0)),
                },
                JsonValue::String(v) => prepared.bind(v.clone()),
                other => prepared.bind(other.to_string()),
            };
        }

        let rows = prepared.fetch_all(&self.pool).await?;
        rows.iter().map(pg_row_to_map).collect()
    }
}

fn push_json_comparison(builder: &mut QueryBuilder<Postgres>, value: &JsonValue) {
    match value {
        JsonValue::Null => {
            builder.push(" IS NULL");
        }
        JsonValue::Bool(v) => {
            builder.push(" = ");
            builder.push_bind(*v);
        }
        JsonValue::Number(n) => {
            builder.push(" = ");
            match n.as_i64() {
                Some(v) => builder.push_bind(v),
                None => builder.push_bind(n.as_f64().unwrap_or(0.0)),
            };
        }
        JsonValue::String(v) => {
            builder.push(" = ");
            builder.push_bind(v.clone());
        }
        other => {
            builder.push(" = ");
            builder.push_bind(other.to_string());
        }
    }
}

fn push_tail(builder: &mut QueryBuilder<Postgres>, query: &RowQuery) -> Result<(), StoreError> {
    if let Some(sort) = &query.sort {
        if !is_queryable_field(&sort.field) {
            return Err(StoreError::Invalid(format!(
                "unknown sort field {:?}",
                sort.field
            )));
        }
        builder.push(" ORDER BY ");
        builder.push(sort.field.as_str());
        builder.push(if sort.descending { " DESC" } else { " ASC" });
    }
    if let Some(limit) = query.limit {
        builder.push(" LIMIT ");
        builder.push_bind(limit as i64);
    }
    if let Some(offset) = query.offset {
        builder.push(" OFFSET ");
        builder.push_bind(offset as i64);
    }
    Ok(())
}

/// Rewrites `?` placeholders to `$n`, numbering from `start`. Question marks
/// inside single-quoted literals are left alone.
pub fn rewrite_placeholders(fragment: &str, start: usize) -> String {
    let mut out = String::with_capacity(fragment.len() + 4);
    let mut n = start;
    let mut in_literal = false;
    for ch in fragment.chars() {
        match ch {
            '\'' => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '?' if !in_literal => {
                out.push('$');
                out.push_str(&n.to_string());
                n += 1;
            }
            _ => out.push(ch),
        }
    }
    out
}

fn pg_row_to_map(row: &PgRow) -> Result<RecordMap, StoreError> {
    let mut map = RecordMap::new();
    let id: Uuid = row.try_get("id")?;
    let source_id: Uuid = row.try_get("source_id")?;
    let row_number: i32 = row.try_get("row_number")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    map.insert("id".into(), JsonValue::String(id.to_string()));
    map.insert("source_id".into(), JsonValue::String(source_id.to_string()));
    map.insert("row_number".into(), JsonValue::from(row_number));
    map.insert("created_at".into(), JsonValue::String(created_at.to_rfc3339()));

    for ty in ColumnType::ALL {
        for slot in 1..=ty.capacity() {
            let Some(field) = ty.field_name(slot) else {
                continue;
            };
            let value = match ty {
                ColumnType::Text | ColumnType::Json => row
                    .try_get::<Option<String>, _>(field.as_str())?
                    .map(JsonValue::String),
                ColumnType::Int | ColumnType::Date => row
                    .try_get::<Option<i64>, _>(field.as_str())?
                    .map(JsonValue::from),
                ColumnType::Float => row
                    .try_get::<Option<f64>, _>(field.as_str())?
                    .map(JsonValue::from),
                ColumnType::Bool => row
                    .try_get::<Option<bool>, _>(field.as_str())?
                    .map(JsonValue::Bool),
            };
            if let Some(value) = value {
                map.insert(field, value);
            }
        }
    }
    Ok(map)
}
