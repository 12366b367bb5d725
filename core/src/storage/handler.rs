//! Byte-addressable table storage
//!
//! A handler owns one table's data bytes and its metadata document. The table
//! layer decides what goes where; handlers only move bytes.

use crate::error::{PineError, PineResult};
use crate::storage::schema::Column;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const DATA_FILE: &str = "data.tbl";
pub const METADATA_FILE: &str = "metadata.json";

/// Everything about a table that is not row data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub schema: Vec<Column>,
    pub row_sequence_id: i64,
    pub free_row_blocks: VecDeque<u64>,
}

pub trait StorageHandler: Send + Sync {
    /// `None` when the table has never been created on this handler.
    fn load_metadata(&self) -> PineResult<Option<TableMetadata>>;

    fn flush_metadata(&self, metadata: &TableMetadata) -> PineResult<()>;

    /// Current length of the data store in bytes.
    fn eof_offset(&self) -> PineResult<u64>;

    /// Read exactly `len` bytes at `offset`. Reading past the end is an error.
    fn read_data(&self, offset: u64, len: usize) -> PineResult<Vec<u8>>;

    /// Write `bytes` at `offset`, extending the store (zero-filled) as needed.
    fn write_data(&self, offset: u64, bytes: &[u8]) -> PineResult<()>;

    fn sync(&self) -> PineResult<()>;

    /// Remove all stored state for the table.
    fn destroy(&self) -> PineResult<()>;
}

fn parse_metadata(table: &str, raw: &[u8]) -> PineResult<TableMetadata> {
    serde_json::from_slice(raw).map_err(|e| PineError::corrupt(table, e.to_string()))
}

fn past_end(offset: u64, len: usize, eof: u64) -> PineError {
    PineError::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("read of {} bytes at offset {} past end of data ({})", len, offset, eof),
    ))
}

/// Table files under `<data_dir>/<table>/`
pub struct DiskStorage {
    table: String,
    dir: PathBuf,
    data: Mutex<File>,
}

impl DiskStorage {
    /// Open (creating if needed) the directory and data file for `table`.
    pub fn open<P: AsRef<Path>>(data_dir: P, table: &str) -> PineResult<Self> {
        let dir = data_dir.as_ref().join(table);
        fs::create_dir_all(&dir)?;

        let data = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(DATA_FILE))?;

        Ok(Self {
            table: table.to_string(),
            dir,
            data: Mutex::new(data),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl StorageHandler for DiskStorage {
    fn load_metadata(&self) -> PineResult<Option<TableMetadata>> {
        match File::open(self.dir.join(METADATA_FILE)) {
            Ok(mut file) => {
                let mut contents = Vec::new();
                file.read_to_end(&mut contents)?;
                parse_metadata(&self.table, &contents).map(Some)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PineError::Io(e)),
        }
    }

    fn flush_metadata(&self, metadata: &TableMetadata) -> PineResult<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        let path = self.dir.join(METADATA_FILE);
        let staging = self.dir.join(format!("{}.tmp", METADATA_FILE));

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&staging)?;
        file.write_all(&json)?;
        file.sync_all()?;
        fs::rename(staging, path)?;

        Ok(())
    }

    fn eof_offset(&self) -> PineResult<u64> {
        Ok(self.data.lock().metadata()?.len())
    }

    fn read_data(&self, offset: u64, len: usize) -> PineResult<Vec<u8>> {
        let mut file = self.data.lock();
        let eof = file.metadata()?.len();
        if offset.saturating_add(len as u64) > eof {
            return Err(past_end(offset, len, eof));
        }

        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_data(&self, offset: u64, bytes: &[u8]) -> PineResult<()> {
        let mut file = self.data.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn sync(&self) -> PineResult<()> {
        self.data.lock().sync_data()?;
        Ok(())
    }

    fn destroy(&self) -> PineResult<()> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PineError::Io(e)),
        }
    }
}

#[derive(Default)]
struct MemoryState {
    data: Vec<u8>,
    metadata: Option<Vec<u8>>,
}

/// Volatile handler, used for the in-memory medium and in tests
pub struct MemoryStorage {
    table: String,
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl StorageHandler for MemoryStorage {
    fn load_metadata(&self) -> PineResult<Option<TableMetadata>> {
        let state = self.state.lock();
        state
            .metadata
            .as_deref()
            .map(|raw| parse_metadata(&self.table, raw))
            .transpose()
    }

    fn flush_metadata(&self, metadata: &TableMetadata) -> PineResult<()> {
        // Kept serialized so a reload goes through the same decoding as disk.
        let json = serde_json::to_vec(metadata)?;
        self.state.lock().metadata = Some(json);
        Ok(())
    }

    fn eof_offset(&self) -> PineResult<u64> {
        Ok(self.state.lock().data.len() as u64)
    }

    fn read_data(&self, offset: u64, len: usize) -> PineResult<Vec<u8>> {
        let state = self.state.lock();
        let eof = state.data.len() as u64;
        if offset.saturating_add(len as u64) > eof {
            return Err(past_end(offset, len, eof));
        }

        let start = offset as usize;
        Ok(state.data[start..start + len].to_vec())
    }

    fn write_data(&self, offset: u64, bytes: &[u8]) -> PineResult<()> {
        let mut state = self.state.lock();
        let start = offset as usize;
        let end = start + bytes.len();
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn sync(&self) -> PineResult<()> {
        Ok(())
    }

    fn destroy(&self) -> PineResult<()> {
        *self.state.lock() = MemoryState::default();
        Ok(())
    }
}
