//! Persistent table catalog

use crate::error::{PineError, PineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentCatalog {
    pub tables: BTreeMap<String, CatalogEntry>,
}

impl PersistentCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load catalog from disk, starting empty if the file does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> PineResult<Self> {
        match File::open(path) {
            Ok(mut file) => {
                let mut contents = String::new();
                file.read_to_string(&mut contents)?;

                serde_json::from_str(&contents)
                    .map_err(|e| PineError::Serialization(format!("Failed to parse catalog: {}", e)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(PineError::Io(e)),
        }
    }

    /// Save catalog to disk
    pub fn save<P: AsRef<Path>>(&self, path: P) -> PineResult<()> {
        let json = serde_json::to_string_pretty(self)?;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        file.write_all(json.as_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    pub fn add_table(&mut self, name: &str) {
        self.tables.insert(
            name.to_string(),
            CatalogEntry {
                created_at: Utc::now(),
            },
        );
    }

    /// Returns whether the table was listed
    pub fn remove_table(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Table names in sorted order
    pub fn list_tables(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_is_empty_catalog() {
        let dir = TempDir::new().unwrap();
        let catalog = PersistentCatalog::load(dir.path().join(CATALOG_FILE)).unwrap();
        assert!(catalog.tables.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CATALOG_FILE);

        let mut catalog = PersistentCatalog::new();
        catalog.add_table("orders");
        catalog.add_table("customers");
        catalog.add_table("scratch");
        assert!(catalog.remove_table("scratch"));
        assert!(!catalog.remove_table("scratch"));
        catalog.save(&path).unwrap();

        let loaded = PersistentCatalog::load(&path).unwrap();
        assert_eq!(loaded, catalog);
        assert_eq!(loaded.list_tables(), vec!["customers", "orders"]);
        assert!(loaded.contains("orders"));
    }

    #[test]
    fn test_garbage_catalog_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CATALOG_FILE);
        std::fs::write(&path, "[1, 2").unwrap();

        assert!(matches!(
            PersistentCatalog::load(&path),
            Err(PineError::Serialization(_))
        ));
    }
}
