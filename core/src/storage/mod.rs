//! Storage layer: row codec, byte handlers, tables and the catalog

pub mod catalog;
pub mod handler;
pub mod schema;
pub mod table;

// Re-export core types
pub use catalog::{CATALOG_FILE, CatalogEntry, PersistentCatalog};
pub use handler::{DATA_FILE, DiskStorage, METADATA_FILE, MemoryStorage, StorageHandler, TableMetadata};
pub use schema::{Column, DataType, MAX_STRING_CAPACITY, ROW_ID_COLUMN, Row, Value, validate_columns};
pub use table::{HEADER_SIZE, Table, validate_table_name};
