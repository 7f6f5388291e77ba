//! Collection schemas for records.
//!
//! Every [`Record`] lives in a named collection. Before a record is persisted
//! its payload is checked against the collection's field definitions; a
//! collection may also name the representation strategy its newly created
//! records use. Collections are kept in a `BTreeMap` so snapshots of a schema
//! serialize identically on every device.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{error::Result, CollectionName, Error, Record, SchemaVersion};

/// Field types a payload may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    /// Milliseconds since the epoch
    Timestamp,
    /// Arbitrary nested JSON
    Json,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "String",
            FieldType::Int => "Int",
            FieldType::Float => "Float",
            FieldType::Bool => "Bool",
            FieldType::Timestamp => "Timestamp",
            FieldType::Json => "Json",
        }
    }

    /// Whether a non-null value has this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Int | FieldType::Timestamp => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Json => true,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Name of the JSON shape of a value, as reported in type mismatches.
fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_f64() => "Float",
        Value::Number(_) => "Int",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// One field of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    /// Absent and null values are rejected
    pub required: bool,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
        }
    }

    /// Check the value found under this field's name, if any.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value.filter(|v| !v.is_null()) {
            None if self.required => Err(Error::MissingRequiredField(self.name.clone())),
            None => Ok(()),
            Some(v) if self.field_type.accepts(v) => Ok(()),
            Some(v) => Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: kind_of(v).to_string(),
            }),
        }
    }
}

/// Fields and representation of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSchema {
    pub name: CollectionName,
    pub fields: Vec<FieldDef>,
    /// Representation strategy for newly created records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub representation: Option<String>,
}

impl CollectionSchema {
    pub fn new(name: impl Into<CollectionName>, fields: Vec<FieldDef>) -> Self {
        Self {
            name: name.into(),
            fields,
            representation: None,
        }
    }

    /// Represent newly created records of this collection with `method`.
    pub fn with_representation(mut self, method: impl Into<String>) -> Self {
        self.representation = Some(method.into());
        self
    }

    /// Check a payload object field by field. Unknown fields are allowed.
    pub fn validate_payload(&self, payload: &Value) -> Result<()> {
        let Some(fields) = payload.as_object() else {
            return Err(Error::InvalidPayload(format!(
                "{} payload must be an object, got {}",
                self.name,
                kind_of(payload)
            )));
        };
        self.fields
            .iter()
            .try_for_each(|field| field.validate(fields.get(&field.name)))
    }
}

/// All collections a store accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Snapshots are only imported into a store with the same version
    pub version: SchemaVersion,
    pub collections: BTreeMap<CollectionName, CollectionSchema>,
}

impl Schema {
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            collections: BTreeMap::new(),
        }
    }

    /// Add or replace a collection.
    pub fn add_collection(&mut self, collection: CollectionSchema) -> &mut Self {
        self.collections.insert(collection.name.clone(), collection);
        self
    }

    pub fn with_collection(mut self, collection: CollectionSchema) -> Self {
        self.add_collection(collection);
        self
    }

    pub fn get_collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    /// Validate a record against its collection.
    ///
    /// The collection must exist even for tombstones, but a tombstone keeps
    /// whatever payload it had and is not checked further.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        let collection = self
            .get_collection(&record.collection)
            .ok_or_else(|| Error::CollectionNotFound(record.collection.clone()))?;
        if record.is_active() {
            collection.validate_payload(&record.payload)?;
        }
        Ok(())
    }

    /// Representation strategy configured for a collection, if any.
    pub fn representation_for(&self, collection: &str) -> Option<&str> {
        self.get_collection(collection)?.representation.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn todos() -> Schema {
        Schema::new(1)
            .with_collection(CollectionSchema::new(
                "todos",
                vec![
                    FieldDef::required("title", FieldType::String),
                    FieldDef::optional("done", FieldType::Bool),
                    FieldDef::optional("due", FieldType::Timestamp),
                    FieldDef::optional("extra", FieldType::Json),
                ],
            ))
            .with_collection(
                CollectionSchema::new("boards", vec![FieldDef::required("title", FieldType::String)])
                    .with_representation("room"),
            )
    }

    fn todo(payload: Value) -> Record {
        Record::new("todo-1", "db-1", "todos", payload, 1000)
    }

    #[test]
    fn accepts_valid_records() {
        let schema = todos();
        assert!(schema.validate_record(&todo(json!({"title": "Buy milk"}))).is_ok());
        assert!(schema
            .validate_record(&todo(json!({
                "title": "Ship", "done": false, "due": 1706745600000u64,
                "extra": {"tags": ["a"]}, "unknown": 1
            })))
            .is_ok());
    }

    #[test]
    fn missing_and_null_required_fields() {
        let schema = todos();
        let missing = schema.validate_record(&todo(json!({"done": true})));
        assert!(matches!(missing, Err(Error::MissingRequiredField(f)) if f == "title"));

        let null = schema.validate_record(&todo(json!({"title": null})));
        assert!(matches!(null, Err(Error::MissingRequiredField(f)) if f == "title"));

        // Optional nulls are fine
        assert!(schema
            .validate_record(&todo(json!({"title": "x", "done": null})))
            .is_ok());
    }

    #[test]
    fn type_mismatch_names_both_types() {
        let result = todos().validate_record(&todo(json!({"title": "x", "due": 1.5})));
        match result {
            Err(Error::TypeMismatch {
                field,
                expected,
                got,
            }) => {
                assert_eq!(field, "due");
                assert_eq!(expected, "Timestamp");
                assert_eq!(got, "Float");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn payload_must_be_an_object() {
        let result = todos().validate_record(&todo(json!(["title"])));
        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn unknown_collection() {
        let record = Record::new("post-1", "db-1", "posts", json!({}), 1000);
        let result = todos().validate_record(&record);
        assert!(matches!(result, Err(Error::CollectionNotFound(c)) if c == "posts"));
    }

    #[test]
    fn tombstones_skip_payload_checks() {
        let mut record = todo(json!({}));
        assert!(todos().validate_record(&record).is_err());
        record.meta.deleted = true;
        assert!(todos().validate_record(&record).is_ok());
    }

    #[test]
    fn representation_per_collection() {
        let schema = todos();
        assert_eq!(schema.representation_for("boards"), Some("room"));
        assert_eq!(schema.representation_for("todos"), None);
        assert_eq!(schema.representation_for("missing"), None);
    }

    #[test]
    fn serialization_is_ordered() {
        let json = serde_json::to_string(&todos()).unwrap();
        let boards = json.find("\"boards\"").unwrap();
        let todos_at = json.find("\"todos\"").unwrap();
        assert!(boards < todos_at);

        let parsed: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, todos());
    }
}
