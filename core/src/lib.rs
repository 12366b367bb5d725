//! PineDB - embedded table store with a B+ tree row index

pub mod btree;
pub mod config;
pub mod database;
pub mod error;
pub mod network;
pub mod query;
pub mod server;
pub mod storage;

pub use btree::BPlusTree;
pub use config::{Config, ServerConfig, StorageConfig, StorageMedium};
pub use database::{Database, TableRef};
pub use error::{ErrorKind, PineError, PineResult};
pub use query::{Query, QueryOutput, ResultSet};
pub use storage::{Column, DataType, Row, Table, Value};
