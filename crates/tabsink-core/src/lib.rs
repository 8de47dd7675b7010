//! Core domain model and the pure mapping subsystems for tabsink.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "tabsink-core";

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("too many {ty} columns: requested {requested}, capacity {max}")]
    CapacityExceeded {
        ty: ColumnType,
        max: u16,
        requested: usize,
    },
}

/// The fixed set of slot types. Enumeration order is the order capacity
/// violations are reported in, independent of input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Int,
    Float,
    Bool,
    Date,
    Json,
}

impl ColumnType {
    pub const ALL: [ColumnType; 6] = [
        ColumnType::Text,
        ColumnType::Int,
        ColumnType::Float,
        ColumnType::Bool,
        ColumnType::Date,
        ColumnType::Json,
    ];

    pub fn capacity(self) -> u16 {
        match self {
            ColumnType::Text => 20,
            ColumnType::Int => 20,
            ColumnType::Float => 5,
            ColumnType::Bool => 5,
            ColumnType::Date => 10,
            ColumnType::Json => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ColumnType::Text => "text",
            ColumnType::Int => "int",
            ColumnType::Float => "float",
            ColumnType::Bool => "bool",
            ColumnType::Date => "date",
            ColumnType::Json => "json",
        }
    }

    pub fn parse_str(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(ColumnType::Text),
            "int" => Some(ColumnType::Int),
            "float" => Some(ColumnType::Float),
            "bool" => Some(ColumnType::Bool),
            "date" => Some(ColumnType::Date),
            "json" => Some(ColumnType::Json),
            _ => None,
        }
    }

    /// Canonical storage column name for a (type, slot) pair, e.g. `text_3`.
    /// Slots are 1-based; anything outside `[1, capacity]` has no field.
    pub fn field_name(self, slot: u16) -> Option<String> {
        if (1..=self.capacity()).contains(&slot) {
            Some(format!("{}_{}", self.as_str(), slot))
        } else {
            None
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed cell value, keyed by its canonical field name in a sparse row map.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(i64),
    Json(String),
}

impl SlotValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            SlotValue::Text(_) => ColumnType::Text,
            SlotValue::Int(_) => ColumnType::Int,
            SlotValue::Float(_) => ColumnType::Float,
            SlotValue::Bool(_) => ColumnType::Bool,
            SlotValue::Date(_) => ColumnType::Date,
            SlotValue::Json(_) => ColumnType::Json,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            SlotValue::Text(v) => JsonValue::String(v.clone()),
            SlotValue::Int(v) => JsonValue::from(*v),
            SlotValue::Float(v) => {
                serde_json::Number::from_f64(*v).map_or(JsonValue::Null, JsonValue::Number)
            }
            SlotValue::Bool(v) => JsonValue::Bool(*v),
            SlotValue::Date(v) => JsonValue::from(*v),
            SlotValue::Json(v) => JsonValue::String(v.clone()),
        }
    }
}

/// One entry of a source's column mapping configuration. The configuration is
/// an ordered list owned by exactly one source and replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub pattern: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u16>,
    pub logical_name: String,
}

/// Column descriptor handed to [`assign_slots`] before any slot exists.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub ty: ColumnType,
    pub logical_name: String,
    pub pattern: Option<String>,
}

/// Assigns per-type slot numbers consecutively in input order, starting at 1.
/// Capacity violations are reported for the first offending type in
/// [`ColumnType::ALL`] order.
pub fn assign_slots(columns: &[ColumnSpec]) -> Result<Vec<MappingEntry>, CoreError> {
    let mut requested: BTreeMap<ColumnType, usize> = BTreeMap::new();
    for column in columns {
        *requested.entry(column.ty).or_default() += 1;
    }
    for ty in ColumnType::ALL {
        let count = requested.get(&ty).copied().unwrap_or(0);
        if count > ty.capacity() as usize {
            return Err(CoreError::CapacityExceeded {
                ty,
                max: ty.capacity(),
                requested: count,
            });
        }
    }

    let mut counters: BTreeMap<ColumnType, u16> = BTreeMap::new();
    let mut entries = Vec::with_capacity(columns.len());
    for column in columns {
        let counter = counters.entry(column.ty).or_insert(0);
        *counter += 1;
        entries.push(MappingEntry {
            pattern: column
                .pattern
                .clone()
                .unwrap_or_else(|| column.logical_name.clone()),
            ty: column.ty,
            slot: Some(*counter),
            logical_name: column.logical_name.clone(),
        });
    }
    Ok(entries)
}

/// A header-matching rule, classified once from its surface syntax:
/// `/body/flags` is a regex, `*needle*` a case-insensitive substring,
/// anything else an exact case-sensitive match.
#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Substring(String),
    Regex(Regex),
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.is_empty() {
            return Err(CoreError::InvalidPattern {
                pattern: raw.to_string(),
                reason: "pattern must not be empty".to_string(),
            });
        }

        if let Some(rest) = raw.strip_prefix('/') {
            if let Some(idx) = rest.rfind('/') {
                let flags = &rest[idx + 1..];
                if flags.chars().all(|c| c.is_ascii_alphabetic()) {
                    return Self::compile_regex(raw, &rest[..idx], flags);
                }
            }
        }

        if raw.len() >= 2 && raw.starts_with('*') && raw.ends_with('*') {
            let needle = raw[1..raw.len() - 1].to_lowercase();
            return Ok(Pattern::Substring(needle));
        }

        Ok(Pattern::Exact(raw.to_string()))
    }

    fn compile_regex(raw: &str, body: &str, flags: &str) -> Result<Self, CoreError> {
        // Only the flag letters the regex crate understands inline are kept;
        // the rest (g, u, ...) have no effect on a single-candidate test.
        let inline: String = flags
            .chars()
            .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'U'))
            .collect();
        let source = if inline.is_empty() {
            body.to_string()
        } else {
            format!("(?{inline}){body}")
        };
        match Regex::new(&source) {
            Ok(compiled) => Ok(Pattern::Regex(compiled)),
            Err(err) => Err(CoreError::InvalidPattern {
                pattern: raw.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Pattern::Exact(expected) => candidate == expected,
            Pattern::Substring(needle) => candidate.to_lowercase().contains(needle),
            Pattern::Regex(re) => re.is_match(candidate),
        }
    }

    /// Filters `candidates` down to the matching ones, preserving order.
    pub fn filter_matching<'a, I>(&self, candidates: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        candidates
            .into_iter()
            .filter(|candidate| self.matches(candidate))
            .collect()
    }
}

const TRUTHY: [&str; 6] = ["1", "true", "yes", "y", "да", "д"];

/// Converts one raw cell into the typed representation for a slot type.
///
/// Bad data never errors: empty/whitespace input is null for every type,
/// non-numeric int/float input degrades to 0/0.0, unparseable dates to null,
/// invalid JSON is kept as the raw trimmed text.
pub fn convert(raw: &str, ty: ColumnType) -> Option<SlotValue> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match ty {
        ColumnType::Text => Some(SlotValue::Text(trimmed.to_string())),
        ColumnType::Int => Some(SlotValue::Int(parse_int_loose(trimmed))),
        ColumnType::Float => Some(SlotValue::Float(parse_float_loose(trimmed))),
        ColumnType::Bool => {
            let lowered = trimmed.to_lowercase();
            Some(SlotValue::Bool(TRUTHY.contains(&lowered.as_str())))
        }
        ColumnType::Date => parse_date(trimmed).map(SlotValue::Date),
        ColumnType::Json => match serde_json::from_str::<JsonValue>(trimmed) {
            Ok(value) => Some(SlotValue::Json(value.to_string())),
            Err(_) => Some(SlotValue::Json(trimmed.to_string())),
        },
    }
}

/// Integer parse with leading-prefix truncation: `"10abc"` is 10, `"3.7"` is
/// 3, anything without a leading integer is 0.
fn parse_int_loose(raw: &str) -> i64 {
    if let Ok(value) = raw.parse::<i64>() {
        return value;
    }
    let prefix = numeric_prefix(raw, false);
    prefix.parse::<i64>().unwrap_or(0)
}

fn parse_float_loose(raw: &str) -> f64 {
    if let Ok(value) = raw.parse::<f64>() {
        return value;
    }
    let prefix = numeric_prefix(raw, true);
    prefix.parse::<f64>().unwrap_or(0.0)
}

fn numeric_prefix(raw: &str, allow_point: bool) -> &str {
    let mut end = 0;
    let mut seen_point = false;
    for (idx, ch) in raw.char_indices() {
        let ok = match ch {
            '+' | '-' => idx == 0,
            '.' if allow_point && !seen_point => {
                seen_point = true;
                true
            }
            _ => ch.is_ascii_digit(),
        };
        if !ok {
            break;
        }
        end = idx + ch.len_utf8();
    }
    &raw[..end]
}

/// Parses common date and datetime spellings to unix seconds.
fn parse_date(raw: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.timestamp());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc().timestamp());
        }
    }
    for format in ["%Y-%m-%d", "%d.%m.%Y", "%m/%d/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp());
        }
    }
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<i64>().ok();
    }
    None
}

/// One CSV column resolved against the stored mapping configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedColumn {
    pub ty: ColumnType,
    pub slot: u16,
    pub field: String,
    pub logical_name: String,
}

/// Resolves CSV headers against a stored mapping configuration.
///
/// Headers are taken left to right; for each one the first configuration
/// entry whose pattern matches wins and is consumed (a later header can only
/// reuse a pattern by binding the next entry carrying it). Entries with a
/// stored slot are revalidated against the type capacity; an out-of-range
/// slot drops the header rather than failing the import. Entries without a
/// stored slot draw from per-type running counters in header order. Headers
/// matching nothing are dropped. An empty result is returned as-is; callers
/// decide whether that is an error.
pub fn build_mapping(
    headers: &[String],
    config: &[MappingEntry],
) -> Result<BTreeMap<usize, MappedColumn>, CoreError> {
    let mut compiled = Vec::with_capacity(config.len());
    for entry in config {
        compiled.push(Pattern::parse(&entry.pattern)?);
    }

    let mut consumed = vec![false; config.len()];
    let mut counters: BTreeMap<ColumnType, u16> = BTreeMap::new();
    let mut mapping = BTreeMap::new();

    for (position, header) in headers.iter().enumerate() {
        for (idx, entry) in config.iter().enumerate() {
            if consumed[idx] || !compiled[idx].matches(header) {
                continue;
            }
            consumed[idx] = true;

            let slot = match entry.slot {
                Some(stored) => {
                    if entry.ty.field_name(stored).is_none() {
                        break;
                    }
                    stored
                }
                None => {
                    let counter = counters.entry(entry.ty).or_insert(0);
                    *counter += 1;
                    if *counter > entry.ty.capacity() {
                        break;
                    }
                    *counter
                }
            };

            if let Some(field) = entry.ty.field_name(slot) {
                mapping.insert(
                    position,
                    MappedColumn {
                        ty: entry.ty,
                        slot,
                        field,
                        logical_name: entry.logical_name.clone(),
                    },
                );
            }
            break;
        }
    }

    Ok(mapping)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Enabled,
    Disabled,
    Frozen,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceStatus::Enabled => "enabled",
            SourceStatus::Disabled => "disabled",
            SourceStatus::Frozen => "frozen",
        }
    }

    pub fn parse_str(raw: &str) -> Option<Self> {
        match raw {
            "enabled" => Some(SourceStatus::Enabled),
            "disabled" => Some(SourceStatus::Disabled),
            "frozen" => Some(SourceStatus::Frozen),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Csv,
    Tsv,
}

impl ContentType {
    pub fn delimiter(self) -> u8 {
        match self {
            ContentType::Csv => b',',
            ContentType::Tsv => b'\t',
        }
    }

    pub fn export_format(self) -> &'static str {
        match self {
            ContentType::Csv => "csv",
            ContentType::Tsv => "tsv",
        }
    }

    pub fn as_str(self) -> &'static str {
        self.export_format()
    }

    pub fn parse_str(raw: &str) -> Option<Self> {
        match raw {
            "csv" => Some(ContentType::Csv),
            "tsv" => Some(ContentType::Tsv),
            _ => None,
        }
    }
}

/// Outcome of the most recent sync run, the only externally observable
/// state of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    None,
    Pending,
    Success,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::None => "none",
            RunStatus::Pending => "pending",
            RunStatus::Success => "success",
            RunStatus::Error => "error",
        }
    }

    pub fn parse_str(raw: &str) -> Option<Self> {
        match raw {
            "none" => Some(RunStatus::None),
            "pending" => Some(RunStatus::Pending),
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            _ => None,
        }
    }
}

/// One configured external tabular dataset and its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub name: String,
    pub short_key: Option<String>,
    pub description: String,
    pub status: SourceStatus,
    pub content_type: ContentType,
    pub url: String,
    pub schedule: String,
    pub columns: Vec<MappingEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: RunStatus,
    pub last_error: Option<String>,
}

impl Source {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        content_type: ContentType,
        schedule: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            short_key: None,
            description: String::new(),
            status: SourceStatus::Enabled,
            content_type,
            url: url.into(),
            schedule: schedule.into(),
            columns: Vec::new(),
            created_at: now,
            updated_at: now,
            last_run_at: None,
            last_run_status: RunStatus::None,
            last_error: None,
        }
    }

    /// A source without a non-empty mapping configuration cannot sync and is
    /// flagged as unconfigured in listings.
    pub fn is_configured(&self) -> bool {
        !self.columns.is_empty()
    }
}

/// One row produced by an import, before storage assigns an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDataRow {
    pub row_number: u32,
    pub values: BTreeMap<String, SlotValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_classification() {
        assert!(matches!(Pattern::parse("Qty").unwrap(), Pattern::Exact(_)));
        assert!(matches!(
            Pattern::parse("*2024*").unwrap(),
            Pattern::Substring(_)
        ));
        assert!(matches!(
            Pattern::parse("/^Qty$/i").unwrap(),
            Pattern::Regex(_)
        ));
        // A lone slash or an unterminated regex form falls back to exact.
        assert!(matches!(Pattern::parse("/").unwrap(), Pattern::Exact(_)));
        assert!(matches!(Pattern::parse("/abc").unwrap(), Pattern::Exact(_)));
        // A lone asterisk is too short for the substring form.
        assert!(matches!(Pattern::parse("*").unwrap(), Pattern::Exact(_)));
    }

    #[test]
    fn empty_pattern_is_invalid() {
        assert!(matches!(
            Pattern::parse(""),
            Err(CoreError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn broken_regex_is_invalid() {
        assert!(matches!(
            Pattern::parse("/([a-z/"),
            Err(CoreError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn substring_is_case_insensitive_and_unicode_aware() {
        let pattern = Pattern::parse("*категория*").unwrap();
        assert!(pattern.matches("КАТЕГОРИЯ 2024"));
        let pattern = Pattern::parse("*Amount*").unwrap();
        assert!(pattern.matches("total amount"));
        assert!(!pattern.matches("total"));
    }

    #[test]
    fn exact_is_case_sensitive() {
        let pattern = Pattern::parse("Qty").unwrap();
        assert!(pattern.matches("Qty"));
        assert!(!pattern.matches("qty"));
    }

    #[test]
    fn regex_flags_apply() {
        let pattern = Pattern::parse("/^amount$/i").unwrap();
        assert!(pattern.matches("Amount"));
        let pattern = Pattern::parse("/^Amount$/").unwrap();
        assert!(!pattern.matches("amount"));
    }

    #[test]
    fn filter_matching_preserves_order() {
        let pattern = Pattern::parse("*a*").unwrap();
        let got = pattern.filter_matching(["Beta", "gamma", "delta", "xyz"]);
        assert_eq!(got, vec!["Beta", "gamma", "delta"]);
        let empty: Vec<&str> = Vec::new();
        assert_eq!(pattern.filter_matching(empty.clone()), empty);
    }

    #[test]
    fn slots_assigned_consecutively_per_type() {
        let columns = vec![
            ColumnSpec {
                ty: ColumnType::Text,
                logical_name: "name".into(),
                pattern: None,
            },
            ColumnSpec {
                ty: ColumnType::Int,
                logical_name: "qty".into(),
                pattern: None,
            },
            ColumnSpec {
                ty: ColumnType::Text,
                logical_name: "category".into(),
                pattern: Some("*cat*".into()),
            },
        ];
        let entries = assign_slots(&columns).unwrap();
        assert_eq!(entries[0].slot, Some(1));
        assert_eq!(entries[1].slot, Some(1));
        assert_eq!(entries[2].slot, Some(2));
        assert_eq!(entries[0].pattern, "name");
        assert_eq!(entries[2].pattern, "*cat*");

        // Deterministic: same input, same assignment.
        let again = assign_slots(&columns).unwrap();
        assert_eq!(entries, again);
    }

    #[test]
    fn capacity_violation_names_type_max_and_requested() {
        let columns: Vec<ColumnSpec> = (0..4)
            .map(|i| ColumnSpec {
                ty: ColumnType::Json,
                logical_name: format!("j{i}"),
                pattern: None,
            })
            .collect();
        match assign_slots(&columns) {
            Err(CoreError::CapacityExceeded {
                ty,
                max,
                requested,
            }) => {
                assert_eq!(ty, ColumnType::Json);
                assert_eq!(max, 3);
                assert_eq!(requested, 4);
            }
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[test]
    fn first_capacity_violation_follows_type_enumeration_order() {
        // Both float and json are over capacity; float comes first in the
        // fixed enumeration even though json columns appear first here.
        let mut columns: Vec<ColumnSpec> = (0..4)
            .map(|i| ColumnSpec {
                ty: ColumnType::Json,
                logical_name: format!("j{i}"),
                pattern: None,
            })
            .collect();
        columns.extend((0..6).map(|i| ColumnSpec {
            ty: ColumnType::Float,
            logical_name: format!("f{i}"),
            pattern: None,
        }));
        match assign_slots(&columns) {
            Err(CoreError::CapacityExceeded { ty, .. }) => assert_eq!(ty, ColumnType::Float),
            other => panic!("expected CapacityExceeded, got {other:?}"),
        }
    }

    #[test]
    fn field_names_cover_exactly_the_capacity_range() {
        for ty in ColumnType::ALL {
            assert_eq!(ty.field_name(0), None);
            assert_eq!(ty.field_name(ty.capacity() + 1), None);
            for slot in 1..=ty.capacity() {
                assert_eq!(ty.field_name(slot), Some(format!("{}_{slot}", ty.as_str())));
            }
        }
        assert_eq!(ColumnType::Int.field_name(5).as_deref(), Some("int_5"));
    }

    #[test]
    fn convert_blank_is_null_for_every_type() {
        for ty in ColumnType::ALL {
            assert_eq!(convert("", ty), None);
            assert_eq!(convert("   \t ", ty), None);
        }
    }

    #[test]
    fn convert_int_truncates_permissively() {
        assert_eq!(convert("10", ColumnType::Int), Some(SlotValue::Int(10)));
        assert_eq!(convert(" -7 ", ColumnType::Int), Some(SlotValue::Int(-7)));
        assert_eq!(convert("abc", ColumnType::Int), Some(SlotValue::Int(0)));
        assert_eq!(convert("10abc", ColumnType::Int), Some(SlotValue::Int(10)));
        assert_eq!(convert("3.7", ColumnType::Int), Some(SlotValue::Int(3)));
    }

    #[test]
    fn convert_float_truncates_permissively() {
        assert_eq!(
            convert("2.5", ColumnType::Float),
            Some(SlotValue::Float(2.5))
        );
        assert_eq!(
            convert("abc", ColumnType::Float),
            Some(SlotValue::Float(0.0))
        );
        assert_eq!(
            convert("1.5kg", ColumnType::Float),
            Some(SlotValue::Float(1.5))
        );
    }

    #[test]
    fn convert_bool_truthy_set() {
        for raw in ["1", "true", "YES", "y", "Да", "д", "TRUE"] {
            assert_eq!(
                convert(raw, ColumnType::Bool),
                Some(SlotValue::Bool(true)),
                "{raw}"
            );
        }
        for raw in ["0", "no", "maybe", "false"] {
            assert_eq!(
                convert(raw, ColumnType::Bool),
                Some(SlotValue::Bool(false)),
                "{raw}"
            );
        }
        assert_eq!(convert("", ColumnType::Bool), None);
    }

    #[test]
    fn convert_date_formats() {
        assert_eq!(
            convert("2024-03-01", ColumnType::Date),
            Some(SlotValue::Date(1709251200))
        );
        assert_eq!(
            convert("1970-01-01 00:00:10", ColumnType::Date),
            Some(SlotValue::Date(10))
        );
        assert_eq!(
            convert("2024-03-01T00:00:00Z", ColumnType::Date),
            Some(SlotValue::Date(1709251200))
        );
        assert_eq!(
            convert("01.03.2024", ColumnType::Date),
            Some(SlotValue::Date(1709251200))
        );
        assert_eq!(convert("not a date", ColumnType::Date), None);
    }

    #[test]
    fn convert_json_canonicalizes_and_is_idempotent() {
        let first = convert(r#" {"b": 1,  "a": "я"} "#, ColumnType::Json);
        let Some(SlotValue::Json(canonical)) = first else {
            panic!("expected json value");
        };
        assert!(canonical.contains("я"));
        let second = convert(&canonical, ColumnType::Json);
        assert_eq!(second, Some(SlotValue::Json(canonical)));
    }

    #[test]
    fn convert_invalid_json_keeps_raw_text() {
        assert_eq!(
            convert(" not json ", ColumnType::Json),
            Some(SlotValue::Json("not json".into()))
        );
    }

    #[test]
    fn mapping_first_matching_entry_wins() {
        let headers = vec!["Category 2024".to_string(), "Qty".to_string()];
        let config = vec![
            MappingEntry {
                pattern: "*2024*".into(),
                ty: ColumnType::Text,
                slot: Some(1),
                logical_name: "cat".into(),
            },
            MappingEntry {
                pattern: "Qty".into(),
                ty: ColumnType::Int,
                slot: Some(1),
                logical_name: "qty".into(),
            },
        ];
        let mapping = build_mapping(&headers, &config).unwrap();
        assert_eq!(mapping[&0].field, "text_1");
        assert_eq!(mapping[&0].logical_name, "cat");
        assert_eq!(mapping[&1].field, "int_1");
        assert_eq!(mapping[&1].logical_name, "qty");
    }

    #[test]
    fn mapping_entry_is_consumed_after_first_match() {
        let headers = vec!["Amount A".to_string(), "Amount B".to_string()];
        let config = vec![MappingEntry {
            pattern: "*amount*".into(),
            ty: ColumnType::Int,
            slot: Some(1),
            logical_name: "amount".into(),
        }];
        let mapping = build_mapping(&headers, &config).unwrap();
        assert_eq!(mapping.len(), 1);
        assert!(mapping.contains_key(&0));
    }

    #[test]
    fn mapping_duplicate_pattern_binds_next_entry() {
        let headers = vec!["Amount A".to_string(), "Amount B".to_string()];
        let config = vec![
            MappingEntry {
                pattern: "*amount*".into(),
                ty: ColumnType::Int,
                slot: Some(1),
                logical_name: "amount_a".into(),
            },
            MappingEntry {
                pattern: "*amount*".into(),
                ty: ColumnType::Int,
                slot: Some(2),
                logical_name: "amount_b".into(),
            },
        ];
        let mapping = build_mapping(&headers, &config).unwrap();
        assert_eq!(mapping[&0].logical_name, "amount_a");
        assert_eq!(mapping[&1].logical_name, "amount_b");
    }

    #[test]
    fn mapping_invalid_stored_slot_skips_header() {
        let headers = vec!["Qty".to_string(), "Name".to_string()];
        let config = vec![
            MappingEntry {
                pattern: "Qty".into(),
                ty: ColumnType::Int,
                slot: Some(99),
                logical_name: "qty".into(),
            },
            MappingEntry {
                pattern: "Name".into(),
                ty: ColumnType::Text,
                slot: Some(1),
                logical_name: "name".into(),
            },
        ];
        let mapping = build_mapping(&headers, &config).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[&1].field, "text_1");
    }

    #[test]
    fn mapping_without_stored_slots_uses_running_counters() {
        let headers = vec![
            "Name".to_string(),
            "City".to_string(),
            "Qty".to_string(),
        ];
        let config = vec![
            MappingEntry {
                pattern: "Name".into(),
                ty: ColumnType::Text,
                slot: None,
                logical_name: "name".into(),
            },
            MappingEntry {
                pattern: "City".into(),
                ty: ColumnType::Text,
                slot: None,
                logical_name: "city".into(),
            },
            MappingEntry {
                pattern: "Qty".into(),
                ty: ColumnType::Int,
                slot: None,
                logical_name: "qty".into(),
            },
        ];
        let mapping = build_mapping(&headers, &config).unwrap();
        assert_eq!(mapping[&0].field, "text_1");
        assert_eq!(mapping[&1].field, "text_2");
        assert_eq!(mapping[&2].field, "int_1");
    }

    #[test]
    fn mapping_unmatched_headers_are_dropped() {
        let headers = vec!["Mystery".to_string()];
        let config = vec![MappingEntry {
            pattern: "Qty".into(),
            ty: ColumnType::Int,
            slot: Some(1),
            logical_name: "qty".into(),
        }];
        let mapping = build_mapping(&headers, &config).unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn mapping_propagates_invalid_pattern() {
        let headers = vec!["Qty".to_string()];
        let config = vec![MappingEntry {
            pattern: "/(/".into(),
            ty: ColumnType::Int,
            slot: Some(1),
            logical_name: "qty".into(),
        }];
        assert!(matches!(
            build_mapping(&headers, &config),
            Err(CoreError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn status_round_trips() {
        assert_eq!(
            SourceStatus::parse_str("frozen"),
            Some(SourceStatus::Frozen)
        );
        assert_eq!(RunStatus::parse_str(RunStatus::Pending.as_str()), Some(RunStatus::Pending));
        assert_eq!(ContentType::parse_str("tsv"), Some(ContentType::Tsv));
        assert_eq!(ContentType::Tsv.delimiter(), b'\t');
    }
}
