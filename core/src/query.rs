//! Structured requests consumed by the table layer
//!
//! A `Query` is what a SQL front end hands to the database after parsing. On
//! the wire it travels as JSON, tagged by `"type"`:
//!
//! ```json
//! {"type": "insert", "table": "people", "values": {"name": "ada", "age": 36}}
//! ```

use crate::storage::{Column, Row, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Query {
    CreateTable {
        table: String,
        columns: Vec<Column>,
    },
    DropTable {
        table: String,
    },
    Insert {
        table: String,
        values: HashMap<String, Value>,
    },
    /// Rows with ids in `[from, to]`; open ends default to the whole table.
    Select {
        table: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<i64>,
    },
    Count {
        table: String,
    },
    Delete {
        table: String,
        row_id: i64,
    },
    ListTables,
}

impl Query {
    /// Table the query targets, if any
    pub fn table(&self) -> Option<&str> {
        match self {
            Query::CreateTable { table, .. }
            | Query::DropTable { table }
            | Query::Insert { table, .. }
            | Query::Select { table, .. }
            | Query::Count { table }
            | Query::Delete { table, .. } => Some(table),
            Query::ListTables => None,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Query::CreateTable { .. } => "create_table",
            Query::DropTable { .. } => "drop_table",
            Query::Insert { .. } => "insert",
            Query::Select { .. } => "select",
            Query::Count { .. } => "count",
            Query::Delete { .. } => "delete",
            Query::ListTables => "list_tables",
        }
    }
}

/// Column names plus the rows of a select
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryOutput {
    Created { table: String },
    Dropped { table: String },
    Inserted { row_id: i64 },
    Rows(ResultSet),
    Count { count: i64 },
    Deleted { deleted: bool },
    Tables { tables: Vec<String> },
}
