//! Warehouse schema types for bqmigrate.
//!
//! This crate contains the column/schema data model shared between the
//! migration engine and anything that parses schema JSON: the closed
//! [`FieldType`] / [`FieldMode`] enums, the [`Column`] tree, and the
//! normalization / validation / flattening primitives everything else is
//! built on.
//!
//! Normalization happens once at every external boundary (config parse,
//! warehouse response parse): types and modes are uppercased into their
//! enums by deserialization, and [`normalize_columns`] resolves an unset
//! mode to `NULLABLE` at every nesting level. Normalization is idempotent.

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;


/// Errors produced while validating column shapes or schema transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("column name `{0}` is invalid format")]
    InvalidName(String),

    #[error("column name `{0}` must be less than 128 characters")]
    NameTooLong(String),

    #[error("column type `{0}` is not an allowed type")]
    InvalidType(String),

    #[error("column mode `{0}` is not an allowed mode")]
    InvalidMode(String),

    #[error("column `{0}` is not a RECORD but has nested fields")]
    UnexpectedFields(String),

    #[error("`RECORD` column `{column}` can not be changed to `{to}`")]
    RecordTypeChange { column: String, to: FieldType },

    #[error("`REPEATED` column `{column}` can not change type ({from} => {to})")]
    RepeatedTypeChange {
        column: String,
        from: FieldType,
        to: FieldType,
    },

    #[error("newly adding a `REQUIRED` column `{column}` is not allowed")]
    NewRequiredColumn { column: String },

    #[error("column `{column}` mode can not be changed ({from} => {to})")]
    ModeChange {
        column: String,
        from: FieldMode,
        to: FieldMode,
    },
}

/// Column types accepted by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Boolean,
    Record,
    Timestamp,
    Bytes,
    Date,
    Time,
    Datetime,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "STRING",
            FieldType::Integer => "INTEGER",
            FieldType::Float => "FLOAT",
            FieldType::Boolean => "BOOLEAN",
            FieldType::Record => "RECORD",
            FieldType::Timestamp => "TIMESTAMP",
            FieldType::Bytes => "BYTES",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Datetime => "DATETIME",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    /// Case-insensitive: `integer` and `INTEGER` both parse.
    fn from_str(s: &str) -> Result<Self, SchemaError> {
        match s.to_ascii_uppercase().as_str() {
            "STRING" => Ok(FieldType::String),
            "INTEGER" => Ok(FieldType::Integer),
            "FLOAT" => Ok(FieldType::Float),
            "BOOLEAN" => Ok(FieldType::Boolean),
            "RECORD" => Ok(FieldType::Record),
            "TIMESTAMP" => Ok(FieldType::Timestamp),
            "BYTES" => Ok(FieldType::Bytes),
            "DATE" => Ok(FieldType::Date),
            "TIME" => Ok(FieldType::Time),
            "DATETIME" => Ok(FieldType::Datetime),
            _ => Err(SchemaError::InvalidType(s.to_string())),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Column modes accepted by the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldMode {
    Nullable,
    Required,
    Repeated,
}

impl FieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldMode::Nullable => "NULLABLE",
            FieldMode::Required => "REQUIRED",
            FieldMode::Repeated => "REPEATED",
        }
    }
}

impl fmt::Display for FieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldMode {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, SchemaError> {
        match s.to_ascii_uppercase().as_str() {
            "NULLABLE" => Ok(FieldMode::Nullable),
            "REQUIRED" => Ok(FieldMode::Required),
            "REPEATED" => Ok(FieldMode::Repeated),
            _ => Err(SchemaError::InvalidMode(s.to_string())),
        }
    }
}

impl Serialize for FieldMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One schema field descriptor.
///
/// `mode: None` means "unset" — distinct from an explicit `NULLABLE`, which
/// matters to the fill-if-unset semantics of reverse-merging. `fields` is
/// non-empty only for `RECORD` columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<FieldMode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<Column>,
}

impl Column {
    /// A scalar column with no explicit mode.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Column {
            name: name.into(),
            field_type,
            mode: None,
            fields: Vec::new(),
        }
    }

    /// A `RECORD` column with the given nested fields.
    pub fn record(name: impl Into<String>, fields: Vec<Column>) -> Self {
        Column {
            name: name.into(),
            field_type: FieldType::Record,
            mode: None,
            fields,
        }
    }

    pub fn with_mode(mut self, mode: FieldMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn is_record(&self) -> bool {
        self.field_type == FieldType::Record
    }

    pub fn is_repeated(&self) -> bool {
        self.mode == Some(FieldMode::Repeated)
    }
}

/// An ordered, top-level list of columns.
///
/// The constructor normalizes and validates, so a `Schema` obtained through
/// [`Schema::new`] is always safe to hand to the diff engine or the
/// denormalizer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Result<Self, SchemaError> {
        let columns = normalize_columns(&columns);
        validate_columns(&columns)?;
        Ok(Schema { columns })
    }

    pub fn empty() -> Self {
        Schema::default()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn find(&self, name: &str) -> Option<&Column> {
        find_column_by_name(&self.columns, name)
    }

    pub fn flattened(&self) -> FlattenedSchema {
        flatten_columns(&self.columns)
    }
}

/// The type/mode pair stored for each leaf path of a flattened schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatColumn {
    pub field_type: FieldType,
    pub mode: Option<FieldMode>,
}

/// Dotted leaf path -> type/mode, in schema order.
///
/// `RECORD` nodes are expanded into their fields and never appear as keys
/// themselves. Order is load bearing: rewrite queries select fields in
/// flattened target order.
pub type FlattenedSchema = IndexMap<String, FlatColumn>;

/// Resolve unset modes to `NULLABLE`, recursively. Idempotent.
pub fn normalize_columns(columns: &[Column]) -> Vec<Column> {
    columns
        .iter()
        .map(|column| {
            let mut column = column.clone();
            column.mode = Some(column.mode.unwrap_or(FieldMode::Nullable));
            if column.is_record() && !column.fields.is_empty() {
                column.fields = normalize_columns(&column.fields);
            }
            column
        })
        .collect()
}

/// Check the name rule on every column, recursively.
///
/// Names must match `^[A-Za-z_]\w*$` and be shorter than 128 characters.
/// Types and modes are already closed enums, so only the structural
/// `RECORD`/`fields` consistency is checked beyond names.
pub fn validate_columns(columns: &[Column]) -> Result<(), SchemaError> {
    for column in columns {
        validate_name(&column.name)?;
        if !column.fields.is_empty() && !column.is_record() {
            return Err(SchemaError::UnexpectedFields(column.name.clone()));
        }
        if column.is_record() {
            validate_columns(&column.fields)?;
        }
    }
    Ok(())
}

pub fn validate_name(name: &str) -> Result<(), SchemaError> {
    let mut chars = name.chars();
    let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_head || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SchemaError::InvalidName(name.to_string()));
    }
    if name.len() >= 128 {
        return Err(SchemaError::NameTooLong(name.to_string()));
    }
    Ok(())
}

/// First column at this level with a matching name.
pub fn find_column_by_name<'a>(columns: &'a [Column], name: &str) -> Option<&'a Column> {
    columns.iter().find(|c| c.name == name)
}

/// Expand nested `RECORD` columns into dotted leaf paths.
pub fn flatten_columns(columns: &[Column]) -> FlattenedSchema {
    let mut out = FlattenedSchema::new();
    flatten_into(columns, None, &mut out);
    out
}

fn flatten_into(columns: &[Column], prefix: Option<&str>, out: &mut FlattenedSchema) {
    for column in columns {
        let path = match prefix {
            Some(prefix) => format!("{prefix}.{}", column.name),
            None => column.name.clone(),
        };
        if column.is_record() {
            flatten_into(&column.fields, Some(&path), out);
        } else {
            out.insert(
                path,
                FlatColumn {
                    field_type: column.field_type,
                    mode: column.mode,
                },
            );
        }
    }
}

/// Number of non-`RECORD` columns across every nesting depth.
pub fn leaf_count(columns: &[Column]) -> usize {
    columns
        .iter()
        .map(|c| if c.is_record() { leaf_count(&c.fields) } else { 1 })
        .sum()
}

/// Force every leaf's mode to `NULLABLE`.
pub fn make_nullable(columns: &[Column]) -> Vec<Column> {
    columns
        .iter()
        .map(|column| {
            let mut column = column.clone();
            if column.fields.is_empty() {
                column.mode = Some(FieldMode::Nullable);
            } else {
                column.fields = make_nullable(&column.fields);
            }
            column
        })
        .collect()
}
