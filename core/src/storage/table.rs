//! Row store for a single table
//!
//! Data file layout: an 8-byte big-endian live row count, zero padding up to
//! [`HEADER_SIZE`], then fixed-width row blocks. The B+ tree maps each row id
//! to the byte offset of its block and is rebuilt from the data file on load.

use crate::btree::BPlusTree;
use crate::error::{PineError, PineResult};
use crate::storage::handler::{StorageHandler, TableMetadata};
use crate::storage::schema::{self, Column, DataType, ROW_ID_COLUMN, Row, Value};
use bytes::{Buf, BytesMut};
use std::collections::{HashMap, HashSet, VecDeque};

/// Bytes reserved at the start of every data file.
pub const HEADER_SIZE: u64 = 64;

const ROW_COUNT_WIDTH: usize = 8;

pub struct Table {
    name: String,
    schema: Vec<Column>,
    row_sequence_id: i64,
    row_size_in_bytes: usize,
    index: BPlusTree<u64>,
    free_row_blocks: VecDeque<u64>,
    handler: Box<dyn StorageHandler>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("columns", &self.schema.len())
            .field("row_sequence_id", &self.row_sequence_id)
            .field("indexed_rows", &self.index.len())
            .field("free_row_blocks", &self.free_row_blocks.len())
            .finish()
    }
}

/// Table names double as directory names.
pub fn validate_table_name(name: &str) -> PineResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PineError::InvalidInput(format!(
            "invalid table name '{}': use 1-64 ASCII letters, digits or underscores",
            name
        )))
    }
}

impl Table {
    /// Create an empty table. `columns` must not include the row id column,
    /// which is prepended here.
    pub fn create(
        name: &str,
        mut columns: Vec<Column>,
        handler: Box<dyn StorageHandler>,
        order: usize,
    ) -> PineResult<Self> {
        validate_table_name(name)?;
        if handler.load_metadata()?.is_some() {
            return Err(PineError::TableExists(name.to_string()));
        }

        for column in &mut columns {
            column.size_in_bytes = column.computed_size();
        }
        schema::validate_columns(&columns)?;

        let mut schema = Vec::with_capacity(columns.len() + 1);
        schema.push(Column::row_id());
        schema.extend(columns);

        let table = Self {
            name: name.to_string(),
            row_size_in_bytes: schema.iter().map(|c| c.size_in_bytes).sum(),
            schema,
            row_sequence_id: 0,
            index: BPlusTree::new(order)?,
            free_row_blocks: VecDeque::new(),
            handler,
        };

        table.handler.write_data(0, &[0u8; HEADER_SIZE as usize])?;
        table.persist_metadata()?;

        tracing::info!(
            table = %table.name,
            columns = table.schema.len(),
            row_size = table.row_size_in_bytes,
            "Created table"
        );
        Ok(table)
    }

    /// Open an existing table, rebuilding its index from the data file.
    /// Returns `Ok(None)` when the handler holds no such table.
    pub fn load(name: &str, handler: Box<dyn StorageHandler>, order: usize) -> PineResult<Option<Self>> {
        let Some(metadata) = handler.load_metadata()? else {
            return Ok(None);
        };
        check_metadata(name, &metadata)?;

        let TableMetadata {
            schema,
            row_sequence_id,
            free_row_blocks,
            ..
        } = metadata;

        let mut table = Self {
            name: name.to_string(),
            row_size_in_bytes: schema.iter().map(|c| c.size_in_bytes).sum(),
            schema,
            row_sequence_id,
            index: BPlusTree::new(order)?,
            free_row_blocks,
            handler,
        };

        for offset in &table.free_row_blocks {
            if !table.is_block_offset(*offset) {
                return Err(PineError::corrupt(
                    name,
                    format!("free block offset {} is not a row boundary", offset),
                ));
            }
        }

        table.rebuild_index()?;
        Ok(Some(table))
    }

    fn rebuild_index(&mut self) -> PineResult<()> {
        let eof = self.handler.eof_offset()?;
        if eof < HEADER_SIZE {
            return Err(PineError::corrupt(
                &self.name,
                format!("data file is {} bytes, shorter than its header", eof),
            ));
        }

        let free: HashSet<u64> = self.free_row_blocks.iter().copied().collect();
        let row_size = self.row_size_in_bytes as u64;
        let mut offset = HEADER_SIZE;

        while offset + row_size <= eof {
            if !free.contains(&offset) {
                let block = self.handler.read_data(offset, ROW_COUNT_WIDTH)?;
                let row_id = (&block[..]).get_i64();

                // Zeroed blocks were deleted and not yet reused
                if row_id != 0 {
                    if row_id < 0 || row_id > self.row_sequence_id {
                        return Err(PineError::corrupt(
                            &self.name,
                            format!("row id {} at offset {} is out of sequence", row_id, offset),
                        ));
                    }
                    self.index.insert(row_id, offset).map_err(|_| {
                        PineError::corrupt(&self.name, format!("row id {} stored twice", row_id))
                    })?;
                }
            }
            offset += row_size;
        }

        let recorded = self.count_all()?;
        let live = self.index.len() as i64;
        if recorded != live {
            tracing::warn!(
                table = %self.name,
                recorded,
                live,
                "Row count header disagrees with data file, rewriting"
            );
            self.write_row_count(live)?;
        }

        tracing::info!(
            table = %self.name,
            rows = live,
            free_blocks = self.free_row_blocks.len(),
            "Loaded table"
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in storage order, row id first
    pub fn columns(&self) -> &[Column] {
        &self.schema
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.iter().map(|c| c.name.clone()).collect()
    }

    /// Last row id handed out
    pub fn row_sequence_id(&self) -> i64 {
        self.row_sequence_id
    }

    pub fn row_size(&self) -> usize {
        self.row_size_in_bytes
    }

    pub fn free_row_blocks(&self) -> &VecDeque<u64> {
        &self.free_row_blocks
    }

    pub fn index(&self) -> &BPlusTree<u64> {
        &self.index
    }

    /// Insert a row and return its id. Missing optional columns take their
    /// default, or NULL.
    pub fn insert(&mut self, mut fields: HashMap<String, Value>) -> PineResult<i64> {
        if fields.contains_key(ROW_ID_COLUMN) {
            return Err(PineError::validation(
                ROW_ID_COLUMN,
                "row ids are assigned by the table",
            ));
        }
        if let Some(unknown) = fields
            .keys()
            .find(|name| !self.schema.iter().any(|c| &c.name == *name))
        {
            return Err(PineError::validation(unknown.as_str(), "unknown column"));
        }

        let row_id = self.row_sequence_id + 1;
        let mut row = BytesMut::with_capacity(self.row_size_in_bytes);
        self.schema[0].encode(&Value::Int(row_id), &mut row);
        for column in &self.schema[1..] {
            let value = match fields.remove(&column.name) {
                Some(value) => column.check(value)?,
                None => column.resolve_missing()?,
            };
            column.encode(&value, &mut row);
        }
        debug_assert_eq!(row.len(), self.row_size_in_bytes);

        let reused = self.free_row_blocks.front().copied();
        let offset = match reused {
            Some(offset) => offset,
            None => self.end_of_blocks()?,
        };
        let count = self.count_all()?;
        let previous_sequence = self.row_sequence_id;

        if let Err(e) = self.place_row(row_id, offset, reused.is_some(), count, &row) {
            self.undo_insert(row_id, offset, reused.is_some(), count, previous_sequence);
            return Err(e);
        }

        tracing::debug!(table = %self.name, row_id, offset, reused = reused.is_some(), "Inserted row");
        Ok(row_id)
    }

    fn place_row(
        &mut self,
        row_id: i64,
        offset: u64,
        reused: bool,
        count: i64,
        row: &[u8],
    ) -> PineResult<()> {
        self.handler.write_data(offset, row)?;
        self.write_row_count(count + 1)?;

        self.index.insert(row_id, offset)?;
        self.row_sequence_id = row_id;
        if reused {
            self.free_row_blocks.pop_front();
        }
        self.persist_metadata()
    }

    /// Put the table back the way it was before a failed insert. The block is
    /// zeroed and kept on the free list whether or not it came from there.
    fn undo_insert(
        &mut self,
        row_id: i64,
        offset: u64,
        reused: bool,
        count: i64,
        previous_sequence: i64,
    ) {
        self.index.delete(row_id);
        self.row_sequence_id = previous_sequence;
        if self.free_row_blocks.front() != Some(&offset) {
            self.free_row_blocks.push_front(offset);
        }

        let zeroed = self.handler.write_data(offset, &vec![0u8; self.row_size_in_bytes]);
        if let Err(e) = &zeroed {
            tracing::error!(table = %self.name, row_id, offset, error = %e, "Failed to clear block of aborted insert");
            if !reused {
                self.free_row_blocks.pop_front();
            }
        }
        self.restore_after_failure(count);
    }

    /// Rows with ids in `[from, to]`, ascending by id.
    pub fn select_range(&self, from: i64, to: i64) -> PineResult<Vec<Row>> {
        self.index
            .search_range(from, to)
            .into_iter()
            .map(|offset| self.read_row(offset))
            .collect()
    }

    pub fn select_all(&self) -> PineResult<Vec<Row>> {
        self.select_range(1, self.row_sequence_id)
    }

    pub fn get(&self, row_id: i64) -> PineResult<Option<Row>> {
        self.index
            .search(row_id)
            .map(|offset| self.read_row(*offset))
            .transpose()
    }

    /// Live row count, read from the data file header
    pub fn count_all(&self) -> PineResult<i64> {
        let header = self.handler.read_data(0, ROW_COUNT_WIDTH)?;
        Ok((&header[..]).get_i64())
    }

    /// Remove a row. Returns `false` when the id is not present.
    pub fn delete(&mut self, row_id: i64) -> PineResult<bool> {
        let Some(offset) = self.index.search(row_id).copied() else {
            return Ok(false);
        };

        let original = self.handler.read_data(offset, self.row_size_in_bytes)?;
        let count = self.count_all()?;

        if let Err(e) = self.clear_row(row_id, offset, count) {
            self.undo_delete(row_id, offset, count, &original);
            return Err(e);
        }

        tracing::debug!(table = %self.name, row_id, offset, "Deleted row");
        Ok(true)
    }

    fn clear_row(&mut self, row_id: i64, offset: u64, count: i64) -> PineResult<()> {
        self.handler
            .write_data(offset, &vec![0u8; self.row_size_in_bytes])?;
        self.write_row_count(count - 1)?;

        self.index.delete(row_id);
        self.free_row_blocks.push_back(offset);
        self.persist_metadata()
    }

    fn undo_delete(&mut self, row_id: i64, offset: u64, count: i64, original: &[u8]) {
        if self.free_row_blocks.back() == Some(&offset) {
            self.free_row_blocks.pop_back();
        }
        if !self.index.contains_key(row_id) {
            // The id was removed just above, so it cannot collide.
            let _ = self.index.insert(row_id, offset);
        }

        if let Err(e) = self.handler.write_data(offset, original) {
            tracing::error!(table = %self.name, row_id, offset, error = %e, "Failed to restore block of aborted delete");
        }
        self.restore_after_failure(count);
    }

    /// Best-effort rewrite of the row count and metadata after an aborted
    /// mutation. A stale count is repaired on the next load.
    fn restore_after_failure(&self, count: i64) {
        if let Err(e) = self.write_row_count(count) {
            tracing::warn!(table = %self.name, error = %e, "Failed to restore row count");
        }
        if let Err(e) = self.persist_metadata() {
            tracing::warn!(table = %self.name, error = %e, "Failed to restore metadata");
        }
    }

    pub fn flush(&self) -> PineResult<()> {
        self.handler.sync()
    }

    /// Delete every stored byte of this table. The table is unusable afterwards.
    pub fn destroy(&self) -> PineResult<()> {
        self.handler.destroy()?;
        tracing::info!(table = %self.name, "Destroyed table");
        Ok(())
    }

    fn read_row(&self, offset: u64) -> PineResult<Row> {
        let block = self.handler.read_data(offset, self.row_size_in_bytes)?;
        self.decode_row(&block)
    }

    fn decode_row(&self, block: &[u8]) -> PineResult<Row> {
        let mut values = Vec::with_capacity(self.schema.len());
        let mut start = 0;
        for column in &self.schema {
            let end = start + column.size_in_bytes;
            values.push(column.decode(&block[start..end])?);
            start = end;
        }
        Ok(Row(values))
    }

    fn write_row_count(&self, count: i64) -> PineResult<()> {
        self.handler.write_data(0, &count.to_be_bytes())
    }

    /// First block boundary at or past the end of the data. A torn trailing
    /// block is skipped rather than overwritten at a misaligned offset.
    fn end_of_blocks(&self) -> PineResult<u64> {
        let eof = self.handler.eof_offset()?.max(HEADER_SIZE);
        let row_size = self.row_size_in_bytes as u64;
        Ok(HEADER_SIZE + (eof - HEADER_SIZE).div_ceil(row_size) * row_size)
    }

    fn is_block_offset(&self, offset: u64) -> bool {
        offset >= HEADER_SIZE && (offset - HEADER_SIZE) % self.row_size_in_bytes as u64 == 0
    }

    fn metadata(&self) -> TableMetadata {
        TableMetadata {
            name: self.name.clone(),
            schema: self.schema.clone(),
            row_sequence_id: self.row_sequence_id,
            free_row_blocks: self.free_row_blocks.clone(),
        }
    }

    fn persist_metadata(&self) -> PineResult<()> {
        self.handler.flush_metadata(&self.metadata())
    }
}

fn check_metadata(name: &str, metadata: &TableMetadata) -> PineResult<()> {
    if metadata.name != name {
        return Err(PineError::corrupt(
            name,
            format!("metadata belongs to table '{}'", metadata.name),
        ));
    }

    let Some((first, rest)) = metadata.schema.split_first() else {
        return Err(PineError::corrupt(name, "schema has no columns"));
    };
    if first.name != ROW_ID_COLUMN || first.data_type != DataType::Int || first.nullable {
        return Err(PineError::corrupt(name, "first column is not the row id"));
    }
    if let Some(column) = metadata
        .schema
        .iter()
        .find(|c| c.size_in_bytes != c.computed_size())
    {
        return Err(PineError::corrupt(
            name,
            format!("column '{}' has an inconsistent width", column.name),
        ));
    }
    schema::validate_columns(rest).map_err(|e| PineError::corrupt(name, e.to_string()))?;

    if metadata.row_sequence_id < 0 {
        return Err(PineError::corrupt(name, "negative row sequence"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::handler::{DiskStorage, MemoryStorage};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Number of upcoming operations of each kind that fail.
    #[derive(Default)]
    struct Faults {
        count_writes: AtomicUsize,
        metadata_flushes: AtomicUsize,
    }

    fn trip(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn disk_full() -> PineError {
        PineError::Io(std::io::Error::other("disk full"))
    }

    /// Memory storage shared across reloads, with injectable write failures.
    struct FlakyStorage {
        inner: Arc<MemoryStorage>,
        faults: Arc<Faults>,
    }

    impl StorageHandler for FlakyStorage {
        fn load_metadata(&self) -> PineResult<Option<TableMetadata>> {
            self.inner.load_metadata()
        }

        fn flush_metadata(&self, metadata: &TableMetadata) -> PineResult<()> {
            if trip(&self.faults.metadata_flushes) {
                return Err(disk_full());
            }
            self.inner.flush_metadata(metadata)
        }

        fn eof_offset(&self) -> PineResult<u64> {
            self.inner.eof_offset()
        }

        fn read_data(&self, offset: u64, len: usize) -> PineResult<Vec<u8>> {
            self.inner.read_data(offset, len)
        }

        fn write_data(&self, offset: u64, bytes: &[u8]) -> PineResult<()> {
            if offset == 0 && bytes.len() == ROW_COUNT_WIDTH && trip(&self.faults.count_writes) {
                return Err(disk_full());
            }
            self.inner.write_data(offset, bytes)
        }

        fn sync(&self) -> PineResult<()> {
            Ok(())
        }

        fn destroy(&self) -> PineResult<()> {
            self.inner.destroy()
        }
    }

    fn flaky_table() -> (Table, Arc<MemoryStorage>, Arc<Faults>) {
        let inner = Arc::new(MemoryStorage::new("people"));
        let faults = Arc::new(Faults::default());
        let handler = FlakyStorage {
            inner: Arc::clone(&inner),
            faults: Arc::clone(&faults),
        };
        let table = Table::create("people", people_columns(), Box::new(handler), 4).unwrap();
        (table, inner, faults)
    }

    fn reload(inner: &Arc<MemoryStorage>) -> Table {
        let handler = FlakyStorage {
            inner: Arc::clone(inner),
            faults: Arc::new(Faults::default()),
        };
        Table::load("people", Box::new(handler), 4).unwrap().unwrap()
    }

    fn people_columns() -> Vec<Column> {
        vec![
            Column::new("name", DataType::String).not_null().with_capacity(16),
            Column::new("age", DataType::Int),
        ]
    }

    fn person(name: &str, age: i64) -> HashMap<String, Value> {
        HashMap::from([
            ("name".to_string(), Value::from(name)),
            ("age".to_string(), Value::Int(age)),
        ])
    }

    fn memory_table() -> Table {
        Table::create("people", people_columns(), Box::new(MemoryStorage::new("people")), 4).unwrap()
    }

    #[test]
    fn test_create_prepends_row_id() {
        let table = memory_table();

        assert_eq!(table.column_names(), vec!["row_id", "name", "age"]);
        // 8 (row id) + 17 (string) + 9 (nullable int)
        assert_eq!(table.row_size(), 34);
        assert_eq!(table.count_all().unwrap(), 0);
        assert_eq!(table.row_sequence_id(), 0);
    }

    #[test]
    fn test_insert_and_select_range() {
        let mut table = memory_table();

        assert_eq!(table.insert(person("ada", 36)).unwrap(), 1);
        assert_eq!(table.insert(person("grace", 45)).unwrap(), 2);
        assert_eq!(table.insert(person("linus", 28)).unwrap(), 3);

        let rows = table.select_range(1, 3).unwrap();
        assert_eq!(
            rows,
            vec![
                Row(vec![Value::Int(1), Value::from("ada"), Value::Int(36)]),
                Row(vec![Value::Int(2), Value::from("grace"), Value::Int(45)]),
                Row(vec![Value::Int(3), Value::from("linus"), Value::Int(28)]),
            ]
        );
        assert_eq!(table.count_all().unwrap(), 3);
        assert_eq!(table.select_range(2, 2).unwrap().len(), 1);
        assert!(table.select_range(4, 10).unwrap().is_empty());
    }

    #[test]
    fn test_rows_are_laid_out_after_header() {
        let mut table = memory_table();
        table.insert(person("a", 1)).unwrap();
        table.insert(person("b", 2)).unwrap();

        assert_eq!(table.index().search(1), Some(&HEADER_SIZE));
        assert_eq!(table.index().search(2), Some(&(HEADER_SIZE + 34)));
    }

    #[test]
    fn test_missing_optional_field_is_null() {
        let mut table = memory_table();
        let id = table
            .insert(HashMap::from([("name".to_string(), Value::from("solo"))]))
            .unwrap();

        let row = table.get(id).unwrap().unwrap();
        assert_eq!(row.values()[2], Value::Null);
    }

    #[test]
    fn test_default_value_applies() {
        let columns = vec![
            Column::new("label", DataType::String).with_capacity(8),
            Column::new("active", DataType::Bool).not_null().with_default(true),
            Column::new("weight", DataType::Float),
        ];
        let mut table =
            Table::create("flags", columns, Box::new(MemoryStorage::new("flags")), 5).unwrap();

        let id = table
            .insert(HashMap::from([("weight".to_string(), Value::Int(3))]))
            .unwrap();
        let row = table.get(id).unwrap().unwrap();

        assert_eq!(
            row,
            Row(vec![Value::Int(1), Value::Null, Value::Bool(true), Value::Float(3.0)])
        );
    }

    #[test]
    fn test_insert_validation() {
        let mut table = memory_table();

        let cases = [
            (HashMap::from([("row_id".to_string(), Value::Int(9))]), "row_id"),
            (
                HashMap::from([
                    ("name".to_string(), Value::from("x")),
                    ("shoe".to_string(), Value::Int(1)),
                ]),
                "shoe",
            ),
            (HashMap::from([("age".to_string(), Value::Int(3))]), "name"),
            (HashMap::from([("name".to_string(), Value::Null)]), "name"),
            (
                HashMap::from([("name".to_string(), Value::from("far too long for sixteen"))]),
                "name",
            ),
            (
                HashMap::from([
                    ("name".to_string(), Value::from("x")),
                    ("age".to_string(), Value::from("old")),
                ]),
                "age",
            ),
        ];

        for (fields, expected) in cases {
            match table.insert(fields) {
                Err(PineError::Validation { column, .. }) => assert_eq!(column, expected),
                other => panic!("expected validation error on {}, got {:?}", expected, other),
            }
        }

        // Failed inserts leave no trace
        assert_eq!(table.count_all().unwrap(), 0);
        assert_eq!(table.row_sequence_id(), 0);
        assert!(table.index().is_empty());
    }

    #[test]
    fn test_delete_frees_block_for_reuse() {
        let mut table = memory_table();
        for i in 0..4 {
            table.insert(person("p", i)).unwrap();
        }
        let freed = *table.index().search(2).unwrap();

        assert!(table.delete(2).unwrap());
        assert!(!table.delete(2).unwrap());
        assert_eq!(table.count_all().unwrap(), 3);
        assert_eq!(table.free_row_blocks(), &VecDeque::from([freed]));
        assert_eq!(table.get(2).unwrap(), None);

        let id = table.insert(person("q", 9)).unwrap();

        assert_eq!(id, 5);
        assert_eq!(table.index().search(5), Some(&freed));
        assert!(table.free_row_blocks().is_empty());
        assert_eq!(table.count_all().unwrap(), 4);

        // The next insert extends the file again
        table.insert(person("r", 10)).unwrap();
        assert_eq!(table.index().search(6), Some(&(HEADER_SIZE + 4 * 34)));
    }

    #[test]
    fn test_free_blocks_are_reused_in_fifo_order() {
        let mut table = memory_table();
        for i in 0..5 {
            table.insert(person("p", i)).unwrap();
        }
        let third = *table.index().search(3).unwrap();
        let first = *table.index().search(1).unwrap();

        table.delete(3).unwrap();
        table.delete(1).unwrap();

        let a = table.insert(person("a", 0)).unwrap();
        let b = table.insert(person("b", 0)).unwrap();
        assert_eq!(table.index().search(a), Some(&third));
        assert_eq!(table.index().search(b), Some(&first));
    }

    #[test]
    fn test_select_all_skips_deleted() {
        let mut table = memory_table();
        for i in 0..6 {
            table.insert(person("p", i)).unwrap();
        }
        table.delete(1).unwrap();
        table.delete(4).unwrap();

        let ids: Vec<_> = table
            .select_all()
            .unwrap()
            .iter()
            .filter_map(Row::row_id)
            .collect();
        assert_eq!(ids, vec![2, 3, 5, 6]);
    }

    #[test]
    fn test_create_twice_on_same_handler() {
        let dir = TempDir::new().unwrap();
        Table::create("t", people_columns(), Box::new(DiskStorage::open(dir.path(), "t").unwrap()), 4)
            .unwrap();

        let err = Table::create(
            "t",
            people_columns(),
            Box::new(DiskStorage::open(dir.path(), "t").unwrap()),
            4,
        )
        .unwrap_err();
        assert!(matches!(err, PineError::TableExists(_)));
    }

    #[test]
    fn test_load_missing_table() {
        let loaded = Table::load("ghost", Box::new(MemoryStorage::new("ghost")), 4).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_reload_rebuilds_index() {
        let dir = TempDir::new().unwrap();
        let open = || Box::new(DiskStorage::open(dir.path(), "people").unwrap());

        let mut table = Table::create("people", people_columns(), open(), 4).unwrap();
        for i in 1..=30 {
            table.insert(person(&format!("n{}", i), i)).unwrap();
        }
        for id in [3, 10, 11, 29] {
            table.delete(id).unwrap();
        }
        table.flush().unwrap();
        let before = table.select_all().unwrap();
        drop(table);

        let mut table = Table::load("people", open(), 4).unwrap().unwrap();
        table.index().check_invariants().unwrap();

        assert_eq!(table.select_all().unwrap(), before);
        assert_eq!(table.count_all().unwrap(), 26);
        assert_eq!(table.row_sequence_id(), 30);
        assert_eq!(table.free_row_blocks().len(), 4);

        // Sequence continues, freed blocks are still reused
        let id = table.insert(person("next", 0)).unwrap();
        assert_eq!(id, 31);
        assert_eq!(table.free_row_blocks().len(), 3);
    }

    #[test]
    fn test_load_rejects_foreign_metadata() {
        let handler = MemoryStorage::new("a");
        handler
            .flush_metadata(&TableMetadata {
                name: "b".into(),
                schema: vec![Column::row_id()],
                row_sequence_id: 0,
                free_row_blocks: VecDeque::new(),
            })
            .unwrap();

        let err = Table::load("a", Box::new(handler), 4).unwrap_err();
        assert!(matches!(err, PineError::CorruptMetadata { .. }));
    }

    #[test]
    fn test_load_repairs_row_count() {
        let dir = TempDir::new().unwrap();
        let mut table = Table::create(
            "people",
            people_columns(),
            Box::new(DiskStorage::open(dir.path(), "people").unwrap()),
            4,
        )
        .unwrap();
        table.insert(person("a", 1)).unwrap();
        table.insert(person("b", 2)).unwrap();
        table.write_row_count(7).unwrap();
        drop(table);

        let table = Table::load(
            "people",
            Box::new(DiskStorage::open(dir.path(), "people").unwrap()),
            4,
        )
        .unwrap()
        .unwrap();
        assert_eq!(table.count_all().unwrap(), 2);
    }

    #[test]
    fn test_create_rejects_bad_names() {
        for name in ["", "../etc", "has space", "dots.no"] {
            let result = Table::create(name, people_columns(), Box::new(MemoryStorage::new(name)), 4);
            assert!(matches!(result, Err(PineError::InvalidInput(_))), "{}", name);
        }
    }

    #[test]
    fn test_failed_count_write_undoes_insert() {
        let (mut table, inner, faults) = flaky_table();

        faults.count_writes.store(1, Ordering::SeqCst);
        assert!(matches!(table.insert(person("ada", 36)), Err(PineError::Io(_))));

        assert_eq!(table.row_sequence_id(), 0);
        assert_eq!(table.count_all().unwrap(), 0);
        assert!(table.index().is_empty());
        assert_eq!(table.free_row_blocks(), &VecDeque::from([HEADER_SIZE]));

        // The aborted block is handed out again with the same row id
        assert_eq!(table.insert(person("ada", 36)).unwrap(), 1);
        assert_eq!(table.index().search(1), Some(&HEADER_SIZE));
        assert!(table.free_row_blocks().is_empty());
        drop(table);

        let table = reload(&inner);
        assert_eq!(table.count_all().unwrap(), 1);
        assert_eq!(
            table.select_all().unwrap(),
            vec![Row(vec![Value::Int(1), Value::from("ada"), Value::Int(36)])]
        );
    }

    #[test]
    fn test_failed_metadata_flush_undoes_insert_into_free_block() {
        let (mut table, inner, faults) = flaky_table();
        table.insert(person("a", 1)).unwrap();
        table.insert(person("b", 2)).unwrap();
        table.delete(1).unwrap();

        faults.metadata_flushes.store(1, Ordering::SeqCst);
        assert!(table.insert(person("c", 3)).is_err());

        assert_eq!(table.row_sequence_id(), 2);
        assert_eq!(table.count_all().unwrap(), 1);
        assert_eq!(table.get(3).unwrap(), None);
        assert_eq!(table.free_row_blocks(), &VecDeque::from([HEADER_SIZE]));

        assert_eq!(table.insert(person("c", 3)).unwrap(), 3);
        assert_eq!(table.index().search(3), Some(&HEADER_SIZE));
        drop(table);

        let table = reload(&inner);
        let ids: Vec<_> = table.select_all().unwrap().iter().filter_map(Row::row_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(table.count_all().unwrap(), 2);
    }

    #[test]
    fn test_failed_delete_keeps_row() {
        let (mut table, inner, faults) = flaky_table();
        for i in 1..=3 {
            table.insert(person(&format!("p{}", i), i)).unwrap();
        }
        let before = table.select_all().unwrap();

        faults.count_writes.store(1, Ordering::SeqCst);
        assert!(matches!(table.delete(2), Err(PineError::Io(_))));
        assert_eq!(table.select_all().unwrap(), before);
        assert_eq!(table.count_all().unwrap(), 3);
        assert!(table.free_row_blocks().is_empty());

        faults.metadata_flushes.store(1, Ordering::SeqCst);
        assert!(table.delete(2).is_err());
        assert_eq!(table.select_all().unwrap(), before);
        assert_eq!(table.count_all().unwrap(), 3);
        assert!(table.free_row_blocks().is_empty());
        drop(table);

        let mut table = reload(&inner);
        assert_eq!(table.select_all().unwrap(), before);
        assert!(table.delete(2).unwrap());
        assert_eq!(table.count_all().unwrap(), 2);
    }

    #[test]
    fn test_partial_trailing_block_is_skipped() {
        let handler = MemoryStorage::new("people");
        let mut table = Table::create("people", people_columns(), Box::new(handler), 4).unwrap();
        table.insert(person("a", 1)).unwrap();

        // A partial block past the last row, as left by an interrupted write
        table.handler.write_data(HEADER_SIZE + 34, &[0u8; 10]).unwrap();

        let id = table.insert(person("b", 2)).unwrap();
        assert_eq!(table.index().search(id), Some(&(HEADER_SIZE + 2 * 34)));
    }
}
