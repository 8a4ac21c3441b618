//! Records and schema-inferring record batches.
//!
//! A [`Record`] is one extracted unit: an ordered mapping from field name to a
//! JSON [`Value`]. Records feeding one batch may carry different field sets.
//!
//! A [`RecordBatch`] accumulates records and converts them to a columnar Arrow
//! batch with [`RecordBatch::to_arrow`]. Column types are either pinned by an
//! explicit schema or inferred from the first non-null value observed in each
//! column. Fields absent from a record become nulls.
//!
//! In **strict** mode a batch rejects any record whose field set differs from
//! its schema. The buffered writer relies on this to keep every batch it
//! flushes after the first one on a single schema.
//!
//! # Example
//!
//! ```
//! use ironhaul::record::{Record, RecordBatch};
//!
//! let mut batch = RecordBatch::new();
//! batch.append(Record::new().with("a", 1).with("b", "x"))?;
//! batch.append(Record::new().with("a", 2))?;
//!
//! let table = batch.to_arrow()?;
//! assert_eq!(table.num_rows(), 2);
//! assert_eq!(table.schema().field(1).name(), "b");
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::error::RecordError;
use crate::pipeline::Sink;
use anyhow::{Context, Result};
use arrow::array::{
    ArrayRef, BooleanBuilder, LargeStringBuilder, NullArray, PrimitiveBuilder, StringBuilder,
};
use arrow::datatypes::{
    ArrowPrimitiveType, DataType, Field, Float32Type, Float64Type, Int32Type, Int64Type, Schema,
    SchemaRef, UInt64Type,
};
use arrow::record_batch::{RecordBatch as ArrowRecordBatch, RecordBatchOptions};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;

/// One extracted record: field name to value, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Insert a field, returning the previous value if the field existed.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Field names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Return a record holding `front`'s fields first, followed by this
    /// record's fields. Fields present in both keep `self`'s value.
    #[must_use]
    pub fn prefixed(self, front: Record) -> Record {
        let mut out = front.0;
        for (k, v) in self.0 {
            out.insert(k, v);
        }
        Record(out)
    }

    /// Convert a JSON object into a record.
    ///
    /// # Errors
    /// Returns an error if `value` is not an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => anyhow::bail!("expected a JSON object, found {}", value_kind(&other)),
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// An ordered collection of records sharing, or coerced to, one schema.
#[derive(Clone, Debug, Default)]
pub struct RecordBatch {
    records: Vec<Record>,
    schema: Option<SchemaRef>,
    strict: bool,
    // Field names of `schema`, cached for the strict check.
    schema_names: HashSet<String>,
}

impl RecordBatch {
    /// An empty batch that infers its schema from the records it receives.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty batch with an explicit schema.
    ///
    /// The schema pins the type of each column it names. With `strict`,
    /// records whose field set differs from the schema are rejected; without
    /// it, extra fields are inferred and appended after the schema's columns.
    #[must_use]
    pub fn with_schema(schema: SchemaRef, strict: bool) -> Self {
        let schema_names = schema.fields().iter().map(|f| f.name().clone()).collect();
        Self {
            records: Vec::new(),
            schema: Some(schema),
            strict,
            schema_names,
        }
    }

    /// Shorthand for `with_schema(schema, true)`.
    #[must_use]
    pub fn strict(schema: SchemaRef) -> Self {
        Self::with_schema(schema, true)
    }

    #[must_use]
    pub fn schema(&self) -> Option<&SchemaRef> {
        self.schema.as_ref()
    }

    #[must_use]
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append one record.
    ///
    /// # Errors
    /// In strict mode, returns [`RecordError::SchemaMismatch`] when the record's
    /// field set differs from the schema.
    pub fn append(&mut self, record: Record) -> Result<(), RecordError> {
        if self.strict && !self.conforms(&record) {
            let expected = self
                .schema
                .iter()
                .flat_map(|s| s.fields().iter().map(|f| f.name().clone()))
                .collect();
            let found = record.keys().map(str::to_string).collect();
            return Err(RecordError::SchemaMismatch { expected, found });
        }
        self.records.push(record);
        Ok(())
    }

    fn conforms(&self, record: &Record) -> bool {
        record.len() == self.schema_names.len()
            && record.keys().all(|k| self.schema_names.contains(k))
    }

    /// Convert accumulated records into one Arrow batch.
    ///
    /// Column order is the schema's order (if any) followed by remaining
    /// fields in order of first appearance.
    ///
    /// # Errors
    /// Returns an error if a value can't be stored in its column's type or the
    /// schema pins a type that records can't be converted into.
    pub fn to_arrow(&self) -> Result<ArrowRecordBatch> {
        let mut fields: Vec<Field> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        if let Some(schema) = &self.schema {
            for f in schema.fields() {
                seen.insert(f.name().as_str());
                fields.push(f.as_ref().clone());
            }
        }
        if !self.strict {
            for record in &self.records {
                for key in record.keys() {
                    if seen.insert(key) {
                        fields.push(Field::new(key, infer_type(key, &self.records), true));
                    }
                }
            }
        }

        let columns = fields
            .iter()
            .map(|f| build_column(f.name(), f.data_type(), &self.records))
            .collect::<Result<Vec<ArrayRef>, RecordError>>()?;

        // Strict batches reuse the fixed schema as-is, metadata included.
        let schema = match &self.schema {
            Some(schema) if self.strict => Arc::clone(schema),
            _ => Arc::new(Schema::new(fields)),
        };
        let options = RecordBatchOptions::new().with_row_count(Some(self.records.len()));
        ArrowRecordBatch::try_new_with_options(schema, columns, &options)
            .context("assemble record batch columns")
    }
}

impl Sink for RecordBatch {
    fn accept(&mut self, record: Record) -> Result<()> {
        self.append(record)?;
        Ok(())
    }
}

/// Infer a column type from the first non-null value of `key`.
fn infer_type(key: &str, records: &[Record]) -> DataType {
    let first = records
        .iter()
        .filter_map(|r| r.get(key))
        .find(|v| !v.is_null());
    match first {
        None | Some(Value::Null) => DataType::Null,
        Some(Value::Bool(_)) => DataType::Boolean,
        Some(Value::Number(n)) => {
            if n.is_i64() {
                DataType::Int64
            } else if n.is_u64() {
                DataType::UInt64
            } else {
                DataType::Float64
            }
        }
        // Nested values are kept as JSON text.
        Some(Value::String(_) | Value::Array(_) | Value::Object(_)) => DataType::Utf8,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn mismatch(column: &str, expected: &DataType, found: &Value) -> RecordError {
    RecordError::TypeMismatch {
        column: column.to_string(),
        expected: expected.to_string(),
        found: value_kind(found).to_string(),
    }
}

fn build_column(
    name: &str,
    data_type: &DataType,
    records: &[Record],
) -> Result<ArrayRef, RecordError> {
    let values = records.iter().map(|r| r.get(name).filter(|v| !v.is_null()));
    match data_type {
        DataType::Null => {
            if let Some(v) = values.flatten().next() {
                return Err(mismatch(name, data_type, v));
            }
            Ok(Arc::new(NullArray::new(records.len())))
        }
        DataType::Boolean => {
            let mut b = BooleanBuilder::with_capacity(records.len());
            for v in values {
                match v {
                    None => b.append_null(),
                    Some(Value::Bool(x)) => b.append_value(*x),
                    Some(other) => return Err(mismatch(name, data_type, other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::Int64 => primitive::<Int64Type>(name, data_type, values, Value::as_i64),
        DataType::Int32 => primitive::<Int32Type>(name, data_type, values, |v| {
            v.as_i64().and_then(|x| i32::try_from(x).ok())
        }),
        DataType::UInt64 => primitive::<UInt64Type>(name, data_type, values, Value::as_u64),
        DataType::Float64 => primitive::<Float64Type>(name, data_type, values, Value::as_f64),
        #[allow(clippy::cast_possible_truncation)]
        DataType::Float32 => {
            primitive::<Float32Type>(name, data_type, values, |v| v.as_f64().map(|x| x as f32))
        }
        DataType::Utf8 => {
            let mut b = StringBuilder::with_capacity(records.len(), 0);
            for v in values {
                match v {
                    None => b.append_null(),
                    Some(Value::String(s)) => b.append_value(s),
                    Some(nested @ (Value::Array(_) | Value::Object(_))) => {
                        b.append_value(nested.to_string());
                    }
                    Some(other) => return Err(mismatch(name, data_type, other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        DataType::LargeUtf8 => {
            let mut b = LargeStringBuilder::with_capacity(records.len(), 0);
            for v in values {
                match v {
                    None => b.append_null(),
                    Some(Value::String(s)) => b.append_value(s),
                    Some(other) => return Err(mismatch(name, data_type, other)),
                }
            }
            Ok(Arc::new(b.finish()))
        }
        other => Err(RecordError::UnsupportedType {
            column: name.to_string(),
            data_type: other.to_string(),
        }),
    }
}

fn primitive<'a, T: ArrowPrimitiveType>(
    name: &str,
    data_type: &DataType,
    values: impl Iterator<Item = Option<&'a Value>>,
    convert: impl Fn(&Value) -> Option<T::Native>,
) -> Result<ArrayRef, RecordError> {
    let mut b = PrimitiveBuilder::<T>::new();
    for v in values {
        match v {
            None => b.append_null(),
            Some(v) => match convert(v) {
                Some(x) => b.append_value(x),
                None => return Err(mismatch(name, data_type, v)),
            },
        }
    }
    Ok(Arc::new(b.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, Float64Array, Int64Array, StringArray};

    #[test]
    fn infers_types_from_first_non_null() {
        let mut batch = RecordBatch::new();
        batch.append(Record::new().with("a", Value::Null).with("b", 1.5)).unwrap();
        batch.append(Record::new().with("a", 7).with("b", 2)).unwrap();

        let t = batch.to_arrow().unwrap();
        assert_eq!(t.schema().field(0).data_type(), &DataType::Int64);
        assert_eq!(t.schema().field(1).data_type(), &DataType::Float64);

        let a = t.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert!(a.is_null(0));
        assert_eq!(a.value(1), 7);
        let b = t.column(1).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(b.value(1), 2.0);
    }

    #[test]
    fn absent_fields_become_null() {
        let mut batch = RecordBatch::new();
        batch.append(Record::new().with("x", "a")).unwrap();
        batch.append(Record::new().with("y", true)).unwrap();

        let t = batch.to_arrow().unwrap();
        assert_eq!(t.num_columns(), 2);
        let x = t.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(x.value(0), "a");
        assert!(x.is_null(1));
        assert!(t.column(1).is_null(0));
    }

    #[test]
    fn float_in_integer_column_is_a_type_mismatch() {
        let mut batch = RecordBatch::new();
        batch.append(Record::new().with("n", 1)).unwrap();
        batch.append(Record::new().with("n", 1.5)).unwrap();

        let err = batch.to_arrow().unwrap_err();
        let err = err.downcast_ref::<RecordError>().unwrap();
        assert!(matches!(err, RecordError::TypeMismatch { column, .. } if column == "n"));
    }

    #[test]
    fn strict_schema_rejects_different_field_sets() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("b", DataType::Utf8, true),
        ]));
        let mut batch = RecordBatch::strict(schema);
        batch.append(Record::new().with("b", "x").with("a", 1)).unwrap();

        let err = batch.append(Record::new().with("a", 1)).unwrap_err();
        assert!(matches!(err, RecordError::SchemaMismatch { .. }));
        let err = batch
            .append(Record::new().with("a", 1).with("b", "y").with("c", 0))
            .unwrap_err();
        assert!(matches!(err, RecordError::SchemaMismatch { .. }));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn explicit_schema_pins_types() {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Float64, true)]));
        let mut batch = RecordBatch::with_schema(schema, false);
        batch.append(Record::new().with("v", 3).with("extra", "e")).unwrap();

        let t = batch.to_arrow().unwrap();
        assert_eq!(t.schema().field(0).data_type(), &DataType::Float64);
        assert_eq!(t.schema().field(1).name(), "extra");
    }

    #[test]
    fn nested_values_are_json_text() {
        let mut batch = RecordBatch::new();
        batch
            .append(Record::new().with("tags", serde_json::json!(["x", "y"])))
            .unwrap();
        let t = batch.to_arrow().unwrap();
        let tags = t.column(0).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(tags.value(0), r#"["x","y"]"#);
    }

    #[test]
    fn empty_batch_converts_to_empty_table() {
        let t = RecordBatch::new().to_arrow().unwrap();
        assert_eq!(t.num_rows(), 0);
        assert_eq!(t.num_columns(), 0);
    }

    #[test]
    fn prefixed_puts_front_fields_first() {
        let r = Record::new()
            .with("a", 1)
            .prefixed(Record::new().with("file_path", "/x"));
        assert_eq!(r.keys().collect::<Vec<_>>(), vec!["file_path", "a"]);
    }
}
