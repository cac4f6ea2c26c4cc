//! Structured commands for the document backend
//!
//! The wire format is a single JSON object:
//!
//! ```json
//! { "operation": "insert_one", "collection": "people",
//!   "data": {"name": "Ada"}, "query": {}, "options": {} }
//! ```
//!
//! It is decoded once into [`DocumentCommand`]; adapters never see the raw
//! mapping.

use crate::error::{DataError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A JSON object used as a document, filter or update specification
pub type JsonDocument = serde_json::Map<String, serde_json::Value>;

/// The fixed set of document operations
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DocumentOperation {
    Aggregate,
    InsertOne,
    InsertMany,
    Find,
    FindOne,
    UpdateOne,
    UpdateMany,
    DeleteOne,
    DeleteMany,
    Command,
}

impl DocumentOperation {
    pub const ALL: [DocumentOperation; 10] = [
        DocumentOperation::Aggregate,
        DocumentOperation::InsertOne,
        DocumentOperation::InsertMany,
        DocumentOperation::Find,
        DocumentOperation::FindOne,
        DocumentOperation::UpdateOne,
        DocumentOperation::UpdateMany,
        DocumentOperation::DeleteOne,
        DocumentOperation::DeleteMany,
        DocumentOperation::Command,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOperation::Aggregate => "aggregate",
            DocumentOperation::InsertOne => "insert_one",
            DocumentOperation::InsertMany => "insert_many",
            DocumentOperation::Find => "find",
            DocumentOperation::FindOne => "find_one",
            DocumentOperation::UpdateOne => "update_one",
            DocumentOperation::UpdateMany => "update_many",
            DocumentOperation::DeleteOne => "delete_one",
            DocumentOperation::DeleteMany => "delete_many",
            DocumentOperation::Command => "command",
        }
    }
}

impl fmt::Display for DocumentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentOperation {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self> {
        DocumentOperation::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| {
                DataError::operation_not_supported(format!(
                    "Unsupported document operation '{}'",
                    s
                ))
            })
    }
}

/// Options accepted by `find` and `find_one`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FindOptions {
    pub sort: Option<JsonDocument>,
    pub projection: Option<JsonDocument>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
}

/// Options accepted by `update_one` and `update_many`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateOptions {
    pub upsert: Option<bool>,
}

/// Options accepted by `aggregate`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AggregateOptions {
    #[serde(alias = "allowDiskUse")]
    pub allow_disk_use: Option<bool>,
    #[serde(alias = "batchSize")]
    pub batch_size: Option<u32>,
}

/// Operations without options only accept an empty (or absent) `options`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoOptions {}

/// A decoded document command
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentCommand {
    Aggregate {
        collection: String,
        pipeline: Vec<JsonDocument>,
        options: AggregateOptions,
    },
    InsertOne {
        collection: String,
        document: JsonDocument,
    },
    InsertMany {
        collection: String,
        documents: Vec<JsonDocument>,
    },
    Find {
        collection: String,
        filter: JsonDocument,
        options: FindOptions,
    },
    FindOne {
        collection: String,
        filter: JsonDocument,
        options: FindOptions,
    },
    UpdateOne {
        collection: String,
        filter: JsonDocument,
        update: JsonDocument,
        options: UpdateOptions,
    },
    UpdateMany {
        collection: String,
        filter: JsonDocument,
        update: JsonDocument,
        options: UpdateOptions,
    },
    DeleteOne {
        collection: String,
        filter: JsonDocument,
    },
    DeleteMany {
        collection: String,
        filter: JsonDocument,
    },
    /// Administrative command run against the database (e.g. `{"dbStats": 1}`).
    /// Keys given as `options` are appended to the command document.
    Command { command: JsonDocument },
}

#[derive(Debug, Deserialize)]
struct RawCommand {
    operation: String,
    collection: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    query: serde_json::Value,
    #[serde(default)]
    options: serde_json::Value,
}

impl DocumentCommand {
    /// Decode a command from its JSON wire format
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawCommand = serde_json::from_str(json)
            .map_err(|e| DataError::invalid_query(format!("Malformed document command: {}", e)))?;
        Self::from_raw(raw)
    }

    /// Decode a command from an already-parsed JSON value
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let raw: RawCommand = serde_json::from_value(value)
            .map_err(|e| DataError::invalid_query(format!("Malformed document command: {}", e)))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawCommand) -> Result<Self> {
        let operation: DocumentOperation = raw.operation.parse()?;
        let collection = raw.collection;

        let command = match operation {
            DocumentOperation::Aggregate => DocumentCommand::Aggregate {
                collection: required_collection(operation, collection)?,
                pipeline: objects(operation, "data", raw.data)?,
                options: options(operation, raw.options)?,
            },
            DocumentOperation::InsertOne => {
                options::<NoOptions>(operation, raw.options)?;
                DocumentCommand::InsertOne {
                    collection: required_collection(operation, collection)?,
                    document: object(operation, "data", raw.data)?,
                }
            }
            DocumentOperation::InsertMany => {
                options::<NoOptions>(operation, raw.options)?;
                DocumentCommand::InsertMany {
                    collection: required_collection(operation, collection)?,
                    documents: objects(operation, "data", raw.data)?,
                }
            }
            DocumentOperation::Find => DocumentCommand::Find {
                collection: required_collection(operation, collection)?,
                filter: object_or_empty(operation, "query", raw.query)?,
                options: options(operation, raw.options)?,
            },
            DocumentOperation::FindOne => DocumentCommand::FindOne {
                collection: required_collection(operation, collection)?,
                filter: object_or_empty(operation, "query", raw.query)?,
                options: options(operation, raw.options)?,
            },
            DocumentOperation::UpdateOne => DocumentCommand::UpdateOne {
                collection: required_collection(operation, collection)?,
                filter: object_or_empty(operation, "query", raw.query)?,
                update: object(operation, "data", raw.data)?,
                options: options(operation, raw.options)?,
            },
            DocumentOperation::UpdateMany => DocumentCommand::UpdateMany {
                collection: required_collection(operation, collection)?,
                filter: object_or_empty(operation, "query", raw.query)?,
                update: object(operation, "data", raw.data)?,
                options: options(operation, raw.options)?,
            },
            DocumentOperation::DeleteOne => {
                options::<NoOptions>(operation, raw.options)?;
                DocumentCommand::DeleteOne {
                    collection: required_collection(operation, collection)?,
                    filter: object_or_empty(operation, "query", raw.query)?,
                }
            }
            DocumentOperation::DeleteMany => {
                options::<NoOptions>(operation, raw.options)?;
                DocumentCommand::DeleteMany {
                    collection: required_collection(operation, collection)?,
                    filter: object_or_empty(operation, "query", raw.query)?,
                }
            }
            DocumentOperation::Command => DocumentCommand::Command {
                command: command_document(operation, raw.data, raw.options)?,
            },
        };

        Ok(command)
    }

    pub fn operation(&self) -> DocumentOperation {
        match self {
            DocumentCommand::Aggregate { .. } => DocumentOperation::Aggregate,
            DocumentCommand::InsertOne { .. } => DocumentOperation::InsertOne,
            DocumentCommand::InsertMany { .. } => DocumentOperation::InsertMany,
            DocumentCommand::Find { .. } => DocumentOperation::Find,
            DocumentCommand::FindOne { .. } => DocumentOperation::FindOne,
            DocumentCommand::UpdateOne { .. } => DocumentOperation::UpdateOne,
            DocumentCommand::UpdateMany { .. } => DocumentOperation::UpdateMany,
            DocumentCommand::DeleteOne { .. } => DocumentOperation::DeleteOne,
            DocumentCommand::DeleteMany { .. } => DocumentOperation::DeleteMany,
            DocumentCommand::Command { .. } => DocumentOperation::Command,
        }
    }

    /// Target collection; `None` for database-level commands
    pub fn collection(&self) -> Option<&str> {
        match self {
            DocumentCommand::Aggregate { collection, .. }
            | DocumentCommand::InsertOne { collection, .. }
            | DocumentCommand::InsertMany { collection, .. }
            | DocumentCommand::Find { collection, .. }
            | DocumentCommand::FindOne { collection, .. }
            | DocumentCommand::UpdateOne { collection, .. }
            | DocumentCommand::UpdateMany { collection, .. }
            | DocumentCommand::DeleteOne { collection, .. }
            | DocumentCommand::DeleteMany { collection, .. } => Some(collection),
            DocumentCommand::Command { .. } => None,
        }
    }
}

fn required_collection(op: DocumentOperation, collection: Option<String>) -> Result<String> {
    match collection {
        Some(name) if !name.trim().is_empty() => Ok(name),
        _ => Err(DataError::invalid_query(format!(
            "{} requires a collection name",
            op
        ))),
    }
}

fn object(op: DocumentOperation, field: &str, value: serde_json::Value) -> Result<JsonDocument> {
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(DataError::invalid_query(format!(
            "{}: '{}' must be an object, got {}",
            op,
            field,
            json_type(&other)
        ))),
    }
}

fn object_or_empty(
    op: DocumentOperation,
    field: &str,
    value: serde_json::Value,
) -> Result<JsonDocument> {
    match value {
        serde_json::Value::Null => Ok(JsonDocument::new()),
        other => object(op, field, other),
    }
}

fn objects(
    op: DocumentOperation,
    field: &str,
    value: serde_json::Value,
) -> Result<Vec<JsonDocument>> {
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| object(op, field, item))
            .collect(),
        other => Err(DataError::invalid_query(format!(
            "{}: '{}' must be an array of objects, got {}",
            op,
            field,
            json_type(&other)
        ))),
    }
}

fn options<T>(op: DocumentOperation, value: serde_json::Value) -> Result<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    match value {
        serde_json::Value::Null => Ok(T::default()),
        other => serde_json::from_value(other)
            .map_err(|e| DataError::invalid_query(format!("{}: invalid options: {}", op, e))),
    }
}

/// The command document followed by its extra arguments; a key may appear only once
fn command_document(
    op: DocumentOperation,
    data: serde_json::Value,
    extra: serde_json::Value,
) -> Result<JsonDocument> {
    let mut command = object(op, "data", data)?;
    for (key, value) in object_or_empty(op, "options", extra)? {
        if command.contains_key(&key) {
            return Err(DataError::invalid_query(format!(
                "{}: option '{}' repeats a command field",
                op, key
            )));
        }
        command.insert(key, value);
    }
    Ok(command)
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_insert_one() {
        let cmd = DocumentCommand::parse(
            r#"{"operation":"insert_one","collection":"c","data":{"x":1}}"#,
        )
        .unwrap();

        match cmd {
            DocumentCommand::InsertOne {
                collection,
                document,
            } => {
                assert_eq!(collection, "c");
                assert_eq!(document.get("x"), Some(&json!(1)));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_query_defaults_to_empty_filter() {
        let cmd = DocumentCommand::parse(r#"{"operation":"find","collection":"c"}"#).unwrap();
        assert_eq!(
            cmd,
            DocumentCommand::Find {
                collection: "c".to_string(),
                filter: JsonDocument::new(),
                options: FindOptions::default(),
            }
        );
    }

    #[test]
    fn test_unknown_operation_is_unsupported() {
        let err = DocumentCommand::parse(r#"{"operation":"drop_everything","collection":"c"}"#)
            .unwrap_err();
        assert!(matches!(err, DataError::OperationNotSupported(_)));
    }

    #[test]
    fn test_insert_many_requires_array() {
        let err = DocumentCommand::parse(
            r#"{"operation":"insert_many","collection":"c","data":{"x":1}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidQuery(_)));
    }

    #[test]
    fn test_collection_required_except_for_command() {
        assert!(DocumentCommand::parse(r#"{"operation":"find_one"}"#).is_err());

        let cmd = DocumentCommand::parse(r#"{"operation":"command","data":{"dbStats":1}}"#)
            .unwrap();
        assert_eq!(cmd.operation(), DocumentOperation::Command);
        assert_eq!(cmd.collection(), None);
    }

    #[test]
    fn test_typed_options() {
        let cmd = DocumentCommand::from_value(json!({
            "operation": "find",
            "collection": "c",
            "options": {"limit": 5, "sort": {"x": -1}}
        }))
        .unwrap();

        match cmd {
            DocumentCommand::Find { options, .. } => {
                assert_eq!(options.limit, Some(5));
                assert_eq!(options.sort.unwrap().get("x"), Some(&json!(-1)));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let agg = DocumentCommand::from_value(json!({
            "operation": "aggregate",
            "collection": "c",
            "data": [{"$match": {"x": 1}}],
            "options": {"allowDiskUse": true}
        }))
        .unwrap();
        assert!(matches!(
            agg,
            DocumentCommand::Aggregate { ref options, .. } if options.allow_disk_use == Some(true)
        ));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let err = DocumentCommand::from_value(json!({
            "operation": "update_one",
            "collection": "c",
            "query": {"x": 1},
            "data": {"$set": {"x": 2}},
            "options": {"bypass": true}
        }))
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidQuery(_)));
    }

    #[test]
    fn test_options_rejected_where_none_are_accepted() {
        for (operation, data) in [
            ("insert_one", json!({"x": 1})),
            ("insert_many", json!([{"x": 1}])),
            ("delete_one", json!(null)),
            ("delete_many", json!(null)),
        ] {
            let err = DocumentCommand::from_value(json!({
                "operation": operation,
                "collection": "c",
                "data": data,
                "options": {"bogus": true}
            }))
            .unwrap_err();
            assert!(matches!(err, DataError::InvalidQuery(_)), "{}: {:?}", operation, err);
        }

        let cmd = DocumentCommand::from_value(json!({
            "operation": "delete_many",
            "collection": "c",
            "options": {}
        }))
        .unwrap();
        assert_eq!(cmd.operation(), DocumentOperation::DeleteMany);
    }

    #[test]
    fn test_command_options_extend_the_command() {
        let cmd = DocumentCommand::from_value(json!({
            "operation": "command",
            "data": {"dbStats": 1},
            "options": {"scale": 1024}
        }))
        .unwrap();

        match cmd {
            DocumentCommand::Command { command } => {
                let keys: Vec<_> = command.keys().map(String::as_str).collect();
                assert_eq!(keys, vec!["dbStats", "scale"]);
                assert_eq!(command.get("scale"), Some(&json!(1024)));
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let err = DocumentCommand::from_value(json!({
            "operation": "command",
            "data": {"dbStats": 1},
            "options": {"dbStats": 0}
        }))
        .unwrap_err();
        assert!(matches!(err, DataError::InvalidQuery(_)));
    }

    #[test]
    fn test_operation_names_round_trip() {
        for op in DocumentOperation::ALL {
            assert_eq!(op.as_str().parse::<DocumentOperation>().unwrap(), op);
        }
    }
}
