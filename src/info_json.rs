//! Purpose: JSON serializers for CLI output documents.
//! Exports: `image_info_json`, `table_json`, `formats_json`.
//! Role: Keep the CLI envelope shapes in one place.
//! Invariants: Numeric values keep their kind (integers stay integers); null objects map to `null`.
//! Invariants: Columns are listed in table order; row objects are keyed by column name.

use emio::api::{ArrayDim, ImageIo, Object, ObjectDict, Row, Scalar, Table, TableIo};
use serde_json::{Map, Value, json};

pub(crate) fn object_json(value: &Object) -> Value {
    match value.scalar() {
        Some(Scalar::Int(v)) => json!(v),
        Some(Scalar::UInt(v)) => json!(v),
        Some(Scalar::Float(v)) => json!(v),
        Some(Scalar::Text(v)) => json!(v),
        None if value.is_null() => Value::Null,
        None => json!(value.to_string()),
    }
}

fn dim_json(dim: ArrayDim) -> Value {
    serde_json::to_value(dim).unwrap_or(Value::Null)
}

fn header_json(values: &ObjectDict) -> Value {
    let map: Map<String, Value> = values
        .iter()
        .map(|(key, value)| (key.clone(), object_json(value)))
        .collect();
    Value::Object(map)
}

/// Describe the file currently open in `io`.
pub(crate) fn image_info_json(io: &ImageIo, file_size: u64) -> Value {
    let mut map = Map::new();
    if let Some(path) = io.path() {
        map.insert("path".to_string(), json!(path.display().to_string()));
    }
    map.insert("format".to_string(), json!(io.format_name()));
    map.insert("dim".to_string(), dim_json(io.dim()));
    map.insert("type".to_string(), json!(io.element_type().name()));
    map.insert("header_size".to_string(), json!(io.header_size()));
    map.insert("pad_size".to_string(), json!(io.pad_size()));
    map.insert("item_bytes".to_string(), json!(io.item_bytes()));
    map.insert("file_size".to_string(), json!(file_size));
    if !io.header().is_empty() {
        map.insert("header".to_string(), header_json(io.header()));
    }
    Value::Object(map)
}

fn row_json(row: &Row) -> Value {
    let map: Map<String, Value> = row
        .iter()
        .map(|(column, value)| (column.name().to_string(), object_json(value)))
        .collect();
    Value::Object(map)
}

pub(crate) fn table_json(name: &str, table: &Table) -> Value {
    let columns: Vec<Value> = table
        .column_map()
        .iter()
        .map(|column| json!({ "name": column.name(), "type": column.ty().name() }))
        .collect();
    let rows: Vec<Value> = table.iter().map(row_json).collect();
    json!({ "name": name, "columns": columns, "rows": rows })
}

pub(crate) fn formats_json() -> Value {
    json!({
        "image": ImageIo::registered_keys(),
        "table": TableIo::registered_keys(),
    })
}
