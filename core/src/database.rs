//! Table registry and query execution

use crate::config::{StorageConfig, StorageMedium};
use crate::error::{PineError, PineResult};
use crate::query::{Query, QueryOutput, ResultSet};
use crate::storage::{
    CATALOG_FILE, Column, DiskStorage, MemoryStorage, PersistentCatalog, Row, StorageHandler,
    Table, Value, validate_table_name,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared handle to an open table. Writers take the exclusive lock.
pub type TableRef = Arc<RwLock<Table>>;

pub struct Database {
    config: StorageConfig,
    data_dir: PathBuf,
    tables: RwLock<HashMap<String, TableRef>>,
    catalog: RwLock<PersistentCatalog>,
}

impl Database {
    /// Open the database described by `config`, loading every catalogued table.
    pub fn open(config: StorageConfig) -> PineResult<Self> {
        let data_dir = PathBuf::from(&config.data_dir);

        let mut catalog = match config.medium {
            StorageMedium::Disk => {
                std::fs::create_dir_all(&data_dir)?;
                PersistentCatalog::load(data_dir.join(CATALOG_FILE))?
            }
            StorageMedium::Memory => PersistentCatalog::new(),
        };

        let db = Self {
            config,
            data_dir,
            tables: RwLock::new(HashMap::new()),
            catalog: RwLock::new(PersistentCatalog::new()),
        };

        let mut tables = HashMap::new();
        let mut stale = Vec::new();
        for name in catalog.list_tables() {
            match Table::load(&name, db.handler(&name)?, db.config.tree_order)? {
                Some(table) => {
                    tables.insert(name, Arc::new(RwLock::new(table)));
                }
                None => {
                    tracing::warn!(table = %name, "Catalogued table has no metadata, dropping it");
                    db.discard_files(&name);
                    stale.push(name);
                }
            }
        }

        if !stale.is_empty() {
            for name in &stale {
                catalog.remove_table(name);
            }
            db.save_catalog(&catalog)?;
        }

        tracing::info!(
            data_dir = %db.data_dir.display(),
            medium = ?db.config.medium,
            tables = tables.len(),
            "Database opened"
        );

        *db.tables.write() = tables;
        *db.catalog.write() = catalog;
        Ok(db)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn handler(&self, name: &str) -> PineResult<Box<dyn StorageHandler>> {
        match self.config.medium {
            StorageMedium::Disk => Ok(Box::new(DiskStorage::open(&self.data_dir, name)?)),
            StorageMedium::Memory => Ok(Box::new(MemoryStorage::new(name))),
        }
    }

    fn save_catalog(&self, catalog: &PersistentCatalog) -> PineResult<()> {
        match self.config.medium {
            StorageMedium::Disk => catalog.save(self.data_dir.join(CATALOG_FILE)),
            StorageMedium::Memory => Ok(()),
        }
    }

    /// Remove files left behind by a table that failed to initialise.
    fn discard_files(&self, name: &str) {
        if self.config.medium == StorageMedium::Disk {
            let dir = self.data_dir.join(name);
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                tracing::warn!(table = %name, error = %e, "Failed to clean up table directory");
            }
        }
    }

    pub fn create_table(&self, name: &str, columns: Vec<Column>) -> PineResult<()> {
        validate_table_name(name)?;

        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(PineError::TableExists(name.to_string()));
        }

        let table = match Table::create(name, columns, self.handler(name)?, self.config.tree_order) {
            Ok(table) => table,
            Err(e @ PineError::TableExists(_)) => return Err(e),
            Err(e) => {
                self.discard_files(name);
                return Err(e);
            }
        };

        let mut catalog = self.catalog.write();
        catalog.add_table(name);
        if let Err(e) = self.save_catalog(&catalog) {
            catalog.remove_table(name);
            if let Err(cleanup) = table.destroy() {
                tracing::warn!(table = %name, error = %cleanup, "Failed to remove uncatalogued table");
            }
            return Err(e);
        }

        tables.insert(name.to_string(), Arc::new(RwLock::new(table)));
        Ok(())
    }

    /// Drop a table and delete its files. In-flight users of the table keep
    /// their handle until they finish. The table stays open if the catalog
    /// cannot be updated.
    pub fn drop_table(&self, name: &str) -> PineResult<()> {
        let mut tables = self.tables.write();
        if !tables.contains_key(name) {
            return Err(PineError::TableNotFound(name.to_string()));
        }

        let mut catalog = self.catalog.write();
        let entry = catalog.tables.remove(name);
        if let Err(e) = self.save_catalog(&catalog) {
            if let Some(entry) = entry {
                catalog.tables.insert(name.to_string(), entry);
            }
            return Err(e);
        }
        drop(catalog);

        let table = tables
            .remove(name)
            .ok_or_else(|| PineError::TableNotFound(name.to_string()))?;
        drop(tables);

        table.write().destroy()
    }

    pub fn table(&self, name: &str) -> PineResult<TableRef> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| PineError::TableNotFound(name.to_string()))
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.read().list_tables()
    }

    pub fn insert(&self, table: &str, fields: HashMap<String, Value>) -> PineResult<i64> {
        self.table(table)?.write().insert(fields)
    }

    pub fn select_range(&self, table: &str, from: i64, to: i64) -> PineResult<Vec<Row>> {
        self.table(table)?.read().select_range(from, to)
    }

    pub fn select_all(&self, table: &str) -> PineResult<Vec<Row>> {
        self.table(table)?.read().select_all()
    }

    pub fn count_all(&self, table: &str) -> PineResult<i64> {
        self.table(table)?.read().count_all()
    }

    pub fn delete(&self, table: &str, row_id: i64) -> PineResult<bool> {
        self.table(table)?.write().delete(row_id)
    }

    /// Sync every open table to its medium.
    pub fn flush(&self) -> PineResult<()> {
        let tables: Vec<TableRef> = self.tables.read().values().cloned().collect();
        for table in tables {
            table.read().flush()?;
        }
        Ok(())
    }

    pub fn execute(&self, query: Query) -> PineResult<QueryOutput> {
        let output = match query {
            Query::CreateTable { table, columns } => {
                self.create_table(&table, columns)?;
                QueryOutput::Created { table }
            }
            Query::DropTable { table } => {
                self.drop_table(&table)?;
                QueryOutput::Dropped { table }
            }
            Query::Insert { table, values } => QueryOutput::Inserted {
                row_id: self.insert(&table, values)?,
            },
            Query::Select { table, from, to } => {
                let handle = self.table(&table)?;
                let table = handle.read();
                let from = from.unwrap_or(1);
                let to = to.unwrap_or_else(|| table.row_sequence_id());
                QueryOutput::Rows(ResultSet {
                    columns: table.column_names(),
                    rows: table.select_range(from, to)?,
                })
            }
            Query::Count { table } => QueryOutput::Count {
                count: self.count_all(&table)?,
            },
            Query::Delete { table, row_id } => QueryOutput::Deleted {
                deleted: self.delete(&table, row_id)?,
            },
            Query::ListTables => QueryOutput::Tables {
                tables: self.list_tables(),
            },
        };
        Ok(output)
    }
}
