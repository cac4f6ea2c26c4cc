//! Cached description of a backend's tables or collections

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Role a column plays in the table's keys
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyRole {
    Primary,
    Unique,
    /// Part of a non-unique index
    Multiple,
    None,
}

impl KeyRole {
    /// Map the catalog's `column_key` code (`PRI`, `UNI`, `MUL`, empty)
    pub fn from_catalog_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "PRI" => KeyRole::Primary,
            "UNI" => KeyRole::Unique,
            "MUL" => KeyRole::Multiple,
            _ => KeyRole::None,
        }
    }
}

/// One column of a relational table
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub key: KeyRole,
    pub default: Option<String>,
    pub extra: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            key: KeyRole::None,
            default: None,
            extra: String::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_key(mut self, key: KeyRole) -> Self {
        self.key = key;
        self
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.key == KeyRole::Primary
    }
}

/// Shape of one table or collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "shape", rename_all = "lowercase")]
pub enum EntityShape {
    /// Ordered column list of a relational table
    Columns(Vec<ColumnDescriptor>),
    /// One sampled document; a hint, not an authoritative schema
    Sample(Option<serde_json::Value>),
}

/// Snapshot of every table/collection at the time of the last refresh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    entities: BTreeMap<String, EntityShape>,
}

impl SchemaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, shape: EntityShape) {
        self.entities.insert(name.into(), shape);
    }

    pub fn get(&self, name: &str) -> Option<&EntityShape> {
        self.entities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }

    /// Columns of a relational table, `None` for unknown tables and collections
    pub fn columns(&self, table: &str) -> Option<&[ColumnDescriptor]> {
        match self.entities.get(table)? {
            EntityShape::Columns(columns) => Some(columns),
            EntityShape::Sample(_) => None,
        }
    }

    /// Entity names in order
    pub fn names(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &EntityShape)> {
        self.entities.iter().map(|(name, shape)| (name.as_str(), shape))
    }

    /// Human-readable description, one block per table or collection
    pub fn render_text(&self) -> String {
        let mut out = String::new();

        for (name, shape) in &self.entities {
            match shape {
                EntityShape::Columns(columns) => {
                    let _ = writeln!(out, "Table '{}':", name);
                    for column in columns {
                        let _ = write!(
                            out,
                            "- Column '{}' of type '{}'",
                            column.name, column.data_type
                        );
                        if !column.nullable {
                            out.push_str(", not nullable");
                        }
                        if column.is_primary_key() {
                            out.push_str(", primary key");
                        }
                        out.push('\n');
                    }
                }
                EntityShape::Sample(sample) => {
                    let _ = writeln!(out, "Collection '{}':", name);
                    match sample {
                        Some(doc) => {
                            let _ = writeln!(out, "- Sample document: {}", doc);
                        }
                        None => out.push_str("- No documents\n"),
                    }
                }
            }
            out.push('\n');
        }

        out
    }
}
