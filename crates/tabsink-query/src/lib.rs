//! Logical-name query facade over imported rows.
//!
//! Consumers query by the logical names a source's mapping configuration
//! declares; slot columns never leak into calling code unless they are
//! unmapped row attributes (id, source reference, row number).

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use tabsink_core::{ContentType, MappingEntry, RunStatus, Source, SourceStatus};
use tabsink_store::{RecordMap, RowQuery, RowStore, SortSpec, SourceStore, StoreError};

pub const CRATE_NAME: &str = "tabsink-query";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("source {key:?} not found")]
    SourceNotFound { key: String },
    #[error("unknown field {name:?}")]
    UnknownField { name: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A record query in logical-name terms.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordQuery {
    #[serde(default)]
    pub conditions: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub sort: Option<Sort>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sort {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// Listing view of a source for embedders; a source without a mapping is
/// flagged unconfigured rather than erroring at read time.
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub id: Uuid,
    pub name: String,
    pub short_key: Option<String>,
    pub description: String,
    pub status: SourceStatus,
    pub content_type: ContentType,
    pub url: String,
    pub schedule: String,
    pub configured: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: RunStatus,
    pub last_error: Option<String>,
}

impl From<&Source> for SourceSummary {
    fn from(source: &Source) -> Self {
        Self {
            id: source.id,
            name: source.name.clone(),
            short_key: source.short_key.clone(),
            description: source.description.clone(),
            status: source.status,
            content_type: source.content_type,
            url: source.url.clone(),
            schedule: source.schedule.clone(),
            configured: source.is_configured(),
            last_run_at: source.last_run_at,
            last_run_status: source.last_run_status,
            last_error: source.last_error.clone(),
        }
    }
}

/// Builds the logical → physical field map from a mapping configuration.
/// The first entry wins when a logical name repeats.
fn logical_fields(columns: &[MappingEntry]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for entry in columns {
        let Some(slot) = entry.slot else {
            continue;
        };
        let Some(field) = entry.ty.field_name(slot) else {
            continue;
        };
        map.entry(entry.logical_name.clone()).or_insert(field);
    }
    map
}

pub struct QueryFacade {
    sources: Arc<dyn SourceStore>,
    rows: Arc<dyn RowStore>,
}

impl QueryFacade {
    pub fn new(sources: Arc<dyn SourceStore>, rows: Arc<dyn RowStore>) -> Self {
        Self { sources, rows }
    }

    pub async fn list_sources(
        &self,
        status: Option<SourceStatus>,
    ) -> Result<Vec<SourceSummary>, QueryError> {
        let sources = self.sources.list_sources(status).await?;
        Ok(sources.iter().map(SourceSummary::from).collect())
    }

    /// Resolves a source by short key, or by id when the key parses as one.
    pub async fn resolve_source(&self, key: &str) -> Result<Source, QueryError> {
        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(source) = self.sources.get_source(id).await? {
                return Ok(source);
            }
        }
        self.sources
            .get_source_by_key(key)
            .await?
            .ok_or_else(|| QueryError::SourceNotFound {
                key: key.to_string(),
            })
    }

    pub async fn get_source(&self, key: &str) -> Result<SourceSummary, QueryError> {
        Ok(SourceSummary::from(&self.resolve_source(key).await?))
    }

    /// Queries a source's records by logical names and renames the results
    /// back, dropping the physical names from the output.
    pub async fn get_records(
        &self,
        key: &str,
        query: &RecordQuery,
    ) -> Result<Vec<RecordMap>, QueryError> {
        let source = self.resolve_source(key).await?;
        let fields_map = logical_fields(&source.columns);

        let mut row_query = RowQuery {
            offset: query.offset,
            limit: query.limit,
            ..RowQuery::default()
        };
        for (logical, value) in &query.conditions {
            let physical = translate(&fields_map, logical)?;
            row_query.conditions.push((physical, value.clone()));
        }
        row_query.sort = translate_sort(&fields_map, query.sort.as_ref())?;
        validate_projection(&fields_map, query.fields.as_deref())?;

        let rows = self.rows.query_rows(source.id, &row_query).await?;
        Ok(rows
            .into_iter()
            .map(|row| rename_row(row, &fields_map, query.fields.as_deref()))
            .collect())
    }

    /// Advanced variant: a free-form physical-field predicate fragment with
    /// `?` placeholders, AND-combined under the implicit source predicate.
    pub async fn get_records_select(
        &self,
        key: &str,
        fragment: &str,
        params: &[JsonValue],
        query: &RecordQuery,
    ) -> Result<Vec<RecordMap>, QueryError> {
        let source = self.resolve_source(key).await?;
        let fields_map = logical_fields(&source.columns);

        let row_query = RowQuery {
            sort: translate_sort(&fields_map, query.sort.as_ref())?,
            offset: query.offset,
            limit: query.limit,
            ..RowQuery::default()
        };
        validate_projection(&fields_map, query.fields.as_deref())?;

        let rows = self
            .rows
            .query_rows_select(source.id, fragment, params, &row_query)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| rename_row(row, &fields_map, query.fields.as_deref()))
            .collect())
    }
}

fn translate_sort(
    fields_map: &BTreeMap<String, String>,
    sort: Option<&Sort>,
) -> Result<Option<SortSpec>, QueryError> {
    sort.map(|sort| {
        let physical = translate(fields_map, &sort.field)?;
        Ok(SortSpec {
            field: physical,
            descending: sort.descending,
        })
    })
    .transpose()
}

fn translate(fields_map: &BTreeMap<String, String>, logical: &str) -> Result<String, QueryError> {
    fields_map
        .get(logical)
        .cloned()
        .ok_or_else(|| QueryError::UnknownField {
            name: logical.to_string(),
        })
}

fn validate_projection(
    fields_map: &BTreeMap<String, String>,
    fields: Option<&[String]>,
) -> Result<(), QueryError> {
    if let Some(fields) = fields {
        for field in fields {
            if !fields_map.contains_key(field) {
                return Err(QueryError::UnknownField {
                    name: field.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Sets each logical name from its physical value and deletes the physical
/// name; unmapped physical fields stay visible. An explicit projection then
/// narrows the output to the requested logical fields, in request order.
fn rename_row(
    mut row: RecordMap,
    fields_map: &BTreeMap<String, String>,
    projection: Option<&[String]>,
) -> RecordMap {
    for (logical, physical) in fields_map {
        if let Some(value) = row.remove(physical.as_str()) {
            row.insert(logical.clone(), value);
        }
    }
    match projection {
        None => row,
        Some(fields) => {
            let mut projected = RecordMap::new();
            let mut seen = HashSet::new();
            for field in fields {
                if !seen.insert(field.as_str()) {
                    continue;
                }
                if let Some(value) = row.remove(field.as_str()) {
                    projected.insert(field.clone(), value);
                }
            }
            projected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabsink_core::{ColumnType, NewDataRow, SlotValue};
    use tabsink_store::MemoryStore;

    fn entry(pattern: &str, ty: ColumnType, slot: u16, logical: &str) -> MappingEntry {
        MappingEntry {
            pattern: pattern.to_string(),
            ty,
            slot: Some(slot),
            logical_name: logical.to_string(),
        }
    }

    async fn seeded() -> (Arc<MemoryStore>, QueryFacade, Source) {
        let store = Arc::new(MemoryStore::new());
        let mut source = Source::new(
            "inventory",
            "https://example.com/data.csv",
            ContentType::Csv,
            "30 minutes",
        );
        source.short_key = Some("inventory".to_string());
        source.columns = vec![
            entry("Name", ColumnType::Text, 1, "name"),
            entry("Amount", ColumnType::Int, 1, "amount"),
        ];
        store.insert_source(&source).await.unwrap();
        store
            .replace_rows(
                source.id,
                vec![
                    NewDataRow {
                        row_number: 1,
                        values: [
                            ("text_1".to_string(), SlotValue::Text("Foo".into())),
                            ("int_1".to_string(), SlotValue::Int(10)),
                        ]
                        .into_iter()
                        .collect(),
                    },
                    NewDataRow {
                        row_number: 2,
                        values: [
                            ("text_1".to_string(), SlotValue::Text("Bar".into())),
                            ("int_1".to_string(), SlotValue::Int(3)),
                        ]
                        .into_iter()
                        .collect(),
                    },
                ],
            )
            .await
            .unwrap();
        let facade = QueryFacade::new(store.clone(), store.clone());
        (store, facade, source)
    }

    #[tokio::test]
    async fn records_come_back_under_logical_names() {
        let (_store, facade, _source) = seeded().await;
        let rows = facade
            .get_records("inventory", &RecordQuery::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], JsonValue::String("Foo".into()));
        assert_eq!(rows[0]["amount"], JsonValue::from(10));
        assert!(rows[0].get("text_1").is_none());
        assert!(rows[0].get("int_1").is_none());
        // Unmapped row attributes stay visible under their own names.
        assert_eq!(rows[0]["row_number"], JsonValue::from(1u32));
        assert!(rows[0].get("id").is_some());
        assert!(rows[0].get("source_id").is_some());
    }

    #[tokio::test]
    async fn conditions_and_sort_translate_to_physical_fields() {
        let (_store, facade, _source) = seeded().await;
        let query = RecordQuery {
            conditions: [("name".to_string(), JsonValue::String("Bar".into()))]
                .into_iter()
                .collect(),
            ..RecordQuery::default()
        };
        let rows = facade.get_records("inventory", &query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["amount"], JsonValue::from(3));

        let sorted = RecordQuery {
            sort: Some(Sort {
                field: "amount".to_string(),
                descending: true,
            }),
            ..RecordQuery::default()
        };
        let rows = facade.get_records("inventory", &sorted).await.unwrap();
        assert_eq!(rows[0]["amount"], JsonValue::from(10));
    }

    #[tokio::test]
    async fn fields_project_to_exactly_the_requested_logical_names() {
        let (_store, facade, _source) = seeded().await;
        let query = RecordQuery {
            fields: Some(vec!["amount".to_string()]),
            ..RecordQuery::default()
        };
        let rows = facade.get_records("inventory", &query).await.unwrap();
        assert_eq!(rows[0].len(), 1);
        assert_eq!(rows[0]["amount"], JsonValue::from(10));
    }

    #[tokio::test]
    async fn unknown_logical_names_are_rejected() {
        let (_store, facade, _source) = seeded().await;
        for query in [
            RecordQuery {
                conditions: [("mystery".to_string(), JsonValue::from(1))]
                    .into_iter()
                    .collect(),
                ..RecordQuery::default()
            },
            RecordQuery {
                sort: Some(Sort {
                    field: "mystery".to_string(),
                    descending: false,
                }),
                ..RecordQuery::default()
            },
            RecordQuery {
                fields: Some(vec!["mystery".to_string()]),
                ..RecordQuery::default()
            },
        ] {
            match facade.get_records("inventory", &query).await {
                Err(QueryError::UnknownField { name }) => assert_eq!(name, "mystery"),
                other => panic!("expected UnknownField, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn missing_source_key_is_source_not_found() {
        let (_store, facade, _source) = seeded().await;
        assert!(matches!(
            facade.get_records("nope", &RecordQuery::default()).await,
            Err(QueryError::SourceNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn sources_resolve_by_id_as_well_as_key() {
        let (_store, facade, source) = seeded().await;
        let by_id = facade.get_source(&source.id.to_string()).await.unwrap();
        assert_eq!(by_id.id, source.id);
        let by_key = facade.get_source("inventory").await.unwrap();
        assert_eq!(by_key.id, source.id);
    }

    #[tokio::test]
    async fn listing_flags_unconfigured_sources() {
        let (store, facade, _source) = seeded().await;
        let mut bare = Source::new(
            "bare",
            "https://example.com/bare.csv",
            ContentType::Csv,
            "1 hour",
        );
        bare.short_key = Some("bare".to_string());
        store.insert_source(&bare).await.unwrap();

        let listed = facade.list_sources(None).await.unwrap();
        let bare_row = listed.iter().find(|s| s.name == "bare").unwrap();
        assert!(!bare_row.configured);
        let inv_row = listed.iter().find(|s| s.name == "inventory").unwrap();
        assert!(inv_row.configured);
    }

    #[tokio::test]
    async fn duplicate_logical_names_resolve_to_the_first_entry() {
        let columns = vec![
            entry("A", ColumnType::Text, 1, "value"),
            entry("B", ColumnType::Int, 1, "value"),
        ];
        let map = logical_fields(&columns);
        assert_eq!(map.get("value").map(String::as_str), Some("text_1"));
    }
}
