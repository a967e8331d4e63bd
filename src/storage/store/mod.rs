#![forbid(unsafe_code)]
//! SQLite-backed persistent store: node records, metadata, string table,
//! stored layouts and secondary index tables.

use std::collections::{BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{GraphError, Result};
use crate::types::{NodeId, StrId};

use super::catalog::StringTable;
use super::layout::StoredLayout;

/// On-disk format version; opening a store written with any other version fails.
pub const STORAGE_FORMAT_VERSION: i64 = 1;
/// Metadata key holding the storage format version.
pub const META_STORAGE_FORMAT_VERSION: &str = "STORAGE_FORMAT_VERSION";
/// Metadata key holding the string table id high-water mark.
pub const META_STRING_TO_INT_MAX_ID: &str = "STRING_TO_INT_MAX_ID";
/// Metadata key recording the crate version that last flushed the store.
pub const META_LIBRARY_VERSION: &str = "LIBRARY_VERSION";

const SCAN_PAGE: i64 = 1024;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value
    );
    CREATE TABLE IF NOT EXISTS nodes (
        id INTEGER PRIMARY KEY,
        bytes BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS strings (
        id INTEGER PRIMARY KEY,
        value TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS layouts (
        label TEXT PRIMARY KEY,
        descriptor BLOB NOT NULL
    );
    CREATE TABLE IF NOT EXISTS index_catalog (
        key TEXT PRIMARY KEY
    );
    CREATE TABLE IF NOT EXISTS index_entries (
        key TEXT NOT NULL,
        value BLOB NOT NULL,
        node_id INTEGER NOT NULL,
        PRIMARY KEY (key, value, node_id)
    ) WITHOUT ROWID;
    CREATE INDEX IF NOT EXISTS idx_index_entries_node ON index_entries (key, node_id);
";

enum Location {
    File(PathBuf),
    Temp(TempDir),
    Memory,
}

/// Result of a batched write: which ids reached the store and which failed.
#[derive(Debug, Default)]
pub struct PersistOutcome {
    /// Ids whose bytes were written.
    pub persisted: Vec<NodeId>,
    /// Ids whose write failed, with the cause.
    pub failed: Vec<(NodeId, GraphError)>,
}

/// Persistent map from node id to record bytes plus metadata and index tables.
pub struct Store {
    conn: Mutex<Option<Connection>>,
    location: Mutex<Option<Location>>,
    strings: Arc<StringTable>,
}

impl Store {
    /// Opens (or creates) the store at `path`.
    ///
    /// Without a path the store is ephemeral: a temporary file deleted on
    /// [`Store::close`] when `in_memory` is false, a pure in-memory database
    /// otherwise. Fails with [`GraphError::StorageVersionMismatch`] when the
    /// stored format version differs from [`STORAGE_FORMAT_VERSION`].
    pub fn open(path: Option<&Path>, in_memory: bool) -> Result<Self> {
        let (conn, location) = match path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                (Connection::open(path)?, Location::File(path.to_path_buf()))
            }
            None if in_memory => (Connection::open_in_memory()?, Location::Memory),
            None => {
                let dir = tempfile::Builder::new().prefix("spillgraph").tempdir()?;
                let conn = Connection::open(dir.path().join("overflow.db"))?;
                (conn, Location::Temp(dir))
            }
        };
        if !matches!(location, Location::Memory) {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
        }
        conn.execute_batch(SCHEMA_SQL)?;
        Self::check_version(&conn)?;

        let stored_max = meta_int(&conn, META_STRING_TO_INT_MAX_ID)?.unwrap_or(0);
        let stored_max = u32::try_from(stored_max)
            .map_err(|_| GraphError::Corruption("string table high-water mark out of range"))?;
        let entries = {
            let mut stmt = conn.prepare("SELECT id, value FROM strings")?;
            let rows = stmt.query_map([], |row| {
                Ok((StrId(row.get::<_, u32>(0)?), row.get::<_, String>(1)?))
            })?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        let strings = Arc::new(StringTable::load(entries, stored_max)?);
        info!(
            location = %describe(&location),
            strings = strings.len(),
            "store.open"
        );
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            location: Mutex::new(Some(location)),
            strings,
        })
    }

    fn check_version(conn: &Connection) -> Result<()> {
        match meta_int(conn, META_STORAGE_FORMAT_VERSION)? {
            Some(stored) if stored == STORAGE_FORMAT_VERSION => Ok(()),
            Some(stored) => Err(GraphError::StorageVersionMismatch {
                stored,
                expected: STORAGE_FORMAT_VERSION,
            }),
            None => {
                let existing: i64 =
                    conn.query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
                if existing > 0 {
                    return Err(GraphError::StorageVersionMismatch {
                        stored: 0,
                        expected: STORAGE_FORMAT_VERSION,
                    });
                }
                set_meta(conn, META_STORAGE_FORMAT_VERSION, STORAGE_FORMAT_VERSION)?;
                Ok(())
            }
        }
    }

    /// Shared string table.
    pub fn strings(&self) -> &Arc<StringTable> {
        &self.strings
    }

    /// Returns true when the store does not outlive [`Store::close`].
    pub fn is_ephemeral(&self) -> bool {
        !matches!(&*self.location.lock(), Some(Location::File(_)))
    }

    /// Returns true for a pure in-memory store.
    pub fn is_in_memory(&self) -> bool {
        matches!(&*self.location.lock(), Some(Location::Memory))
    }

    /// Backing file path, if any.
    pub fn path(&self) -> Option<PathBuf> {
        match &*self.location.lock() {
            Some(Location::File(path)) => Some(path.clone()),
            Some(Location::Temp(dir)) => Some(dir.path().join("overflow.db")),
            _ => None,
        }
    }

    fn conn(&self) -> Result<MappedConn<'_>> {
        let guard = self.conn.lock();
        if guard.is_none() {
            return Err(GraphError::Closed);
        }
        Ok(MappedConn { guard })
    }

    /// Writes a single node record.
    pub fn persist(&self, id: NodeId, bytes: &[u8]) -> Result<()> {
        let mut outcome = self.persist_batch(&[(id, bytes.to_vec())])?;
        match outcome.failed.pop() {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    /// Writes a batch of node records in one transaction.
    ///
    /// A row that fails is reported in [`PersistOutcome::failed`] without
    /// aborting the rest of the batch. Pending string table entries are
    /// written in the same transaction.
    pub fn persist_batch(&self, records: &[(NodeId, Vec<u8>)]) -> Result<PersistOutcome> {
        let mut conn = self.conn()?;
        let pending = self.strings.take_pending();
        let result = (|| -> Result<PersistOutcome> {
            let tx = conn.get_mut().transaction()?;
            write_strings(&tx, &pending)?;
            let mut outcome = PersistOutcome::default();
            {
                let mut stmt =
                    tx.prepare_cached("INSERT OR REPLACE INTO nodes (id, bytes) VALUES (?1, ?2)")?;
                for (id, bytes) in records {
                    let written = sql_id(*id).and_then(|raw| {
                        stmt.execute(params![raw, bytes])
                            .map_err(GraphError::from)
                    });
                    match written {
                        Ok(_) => outcome.persisted.push(*id),
                        Err(err) => {
                            warn!(node = id.0, error = %err, "store.persist.row_failed");
                            outcome.failed.push((*id, err));
                        }
                    }
                }
            }
            tx.commit()?;
            Ok(outcome)
        })();
        if result.is_err() {
            self.strings.restore_pending(&pending);
        }
        let outcome = result?;
        debug!(
            persisted = outcome.persisted.len(),
            failed = outcome.failed.len(),
            "store.persist_batch"
        );
        Ok(outcome)
    }

    /// Reads a node record.
    pub fn read(&self, id: NodeId) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn()?;
        let mut stmt = conn
            .get_mut()
            .prepare_cached("SELECT bytes FROM nodes WHERE id = ?1")?;
        let bytes = stmt
            .query_row([sql_id(id)?], |row| row.get::<_, Vec<u8>>(0))
            .optional()?;
        Ok(bytes)
    }

    /// Deletes a node record; missing ids are ignored.
    pub fn remove(&self, id: NodeId) -> Result<()> {
        let mut conn = self.conn()?;
        conn.get_mut()
            .prepare_cached("DELETE FROM nodes WHERE id = ?1")?
            .execute([sql_id(id)?])?;
        Ok(())
    }

    /// Number of stored node records.
    pub fn stored_count(&self) -> Result<u64> {
        let mut conn = self.conn()?;
        let count: i64 = conn
            .get_mut()
            .query_row("SELECT COUNT(*) FROM nodes", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Iterates every stored record in id order, fetching pages lazily.
    pub fn scan_all(&self) -> NodeScan<'_> {
        NodeScan {
            store: self,
            after: -1,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn scan_page(&self, after: i64) -> Result<Vec<(NodeId, Vec<u8>)>> {
        let mut conn = self.conn()?;
        let mut stmt = conn.get_mut().prepare_cached(
            "SELECT id, bytes FROM nodes WHERE id > ?1 ORDER BY id LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![after, SCAN_PAGE], |row| {
            Ok((NodeId(row.get::<_, i64>(0)? as u64), row.get::<_, Vec<u8>>(1)?))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Writes pending strings and metadata.
    pub fn flush(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let pending = self.strings.take_pending();
        let result = (|| -> Result<()> {
            let tx = conn.get_mut().transaction()?;
            write_strings(&tx, &pending)?;
            set_meta(&tx, META_STRING_TO_INT_MAX_ID, self.strings.max_id() as i64)?;
            tx.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                params![META_LIBRARY_VERSION, env!("CARGO_PKG_VERSION")],
            )?;
            tx.commit()?;
            Ok(())
        })();
        if result.is_err() {
            self.strings.restore_pending(&pending);
        }
        result?;
        debug!(
            strings = self.strings.len(),
            max_id = self.strings.max_id(),
            "store.flush"
        );
        Ok(())
    }

    /// Flushes, closes the connection and removes an ephemeral backing file.
    /// Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.conn.lock().is_none() {
            return Ok(());
        }
        let flushed = self.flush();
        if let Some(conn) = self.conn.lock().take() {
            if let Err((_, err)) = conn.close() {
                warn!(error = %err, "store.close.connection_failed");
            }
        }
        let location = self.location.lock().take();
        if let Some(Location::Temp(dir)) = location {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                warn!(path = %path.display(), error = %err, "store.close.cleanup_failed");
            }
        }
        info!("store.close");
        flushed
    }

    /// Reads an integer metadata value.
    pub fn meta_int(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn()?;
        meta_int(conn.get_mut(), key)
    }

    /// Reads a text metadata value.
    pub fn meta_text(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn()?;
        let value = conn
            .get_mut()
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Layout descriptors recorded per node label.
    pub fn stored_layouts(&self) -> Result<Vec<(String, StoredLayout)>> {
        let mut conn = self.conn()?;
        let mut stmt = conn
            .get_mut()
            .prepare("SELECT label, descriptor FROM layouts ORDER BY label")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut layouts = Vec::new();
        for row in rows {
            let (label, bytes) = row?;
            layouts.push((label, StoredLayout::decode(&bytes)?));
        }
        Ok(layouts)
    }

    /// Records the layout descriptor that `label` records are written under.
    pub fn put_layout(&self, label: &str, layout: &StoredLayout) -> Result<()> {
        let bytes = layout.encode()?;
        let mut conn = self.conn()?;
        conn.get_mut().execute(
            "INSERT OR REPLACE INTO layouts (label, descriptor) VALUES (?1, ?2)",
            params![label, bytes],
        )?;
        Ok(())
    }

    /// Property keys with a registered index.
    pub fn index_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn()?;
        let mut stmt = conn
            .get_mut()
            .prepare("SELECT key FROM index_catalog ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Replaces the contents of the index table for `key` and registers it.
    pub fn index_rebuild(&self, key: &str, entries: &[(Vec<u8>, NodeId)]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.get_mut().transaction()?;
        tx.execute("DELETE FROM index_entries WHERE key = ?1", [key])?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO index_entries (key, value, node_id) VALUES (?1, ?2, ?3)",
            )?;
            for (value, id) in entries {
                stmt.execute(params![key, value, sql_id(*id)?])?;
            }
        }
        tx.execute(
            "INSERT OR IGNORE INTO index_catalog (key) VALUES (?1)",
            [key],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Removes every entry of the index on `key`, keeping it registered.
    pub fn index_clear(&self, key: &str) -> Result<()> {
        let mut conn = self.conn()?;
        conn.get_mut()
            .execute("DELETE FROM index_entries WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Unregisters the index on `key` and deletes its entries.
    pub fn index_drop(&self, key: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.get_mut().transaction()?;
        tx.execute("DELETE FROM index_entries WHERE key = ?1", [key])?;
        tx.execute("DELETE FROM index_catalog WHERE key = ?1", [key])?;
        tx.commit()?;
        Ok(())
    }

    /// Adds `id` under `value` in the index on `key`.
    pub fn index_insert(&self, key: &str, value: &[u8], id: NodeId) -> Result<()> {
        let mut conn = self.conn()?;
        conn.get_mut()
            .prepare_cached(
                "INSERT OR IGNORE INTO index_entries (key, value, node_id) VALUES (?1, ?2, ?3)",
            )?
            .execute(params![key, value, sql_id(id)?])?;
        Ok(())
    }

    /// Removes `id` from under `value` in the index on `key`.
    pub fn index_remove(&self, key: &str, value: &[u8], id: NodeId) -> Result<()> {
        let mut conn = self.conn()?;
        conn.get_mut()
            .prepare_cached(
                "DELETE FROM index_entries WHERE key = ?1 AND value = ?2 AND node_id = ?3",
            )?
            .execute(params![key, value, sql_id(id)?])?;
        Ok(())
    }

    /// Removes `id` from every value of the index on `key`.
    pub fn index_remove_node(&self, key: &str, id: NodeId) -> Result<()> {
        let mut conn = self.conn()?;
        conn.get_mut()
            .prepare_cached("DELETE FROM index_entries WHERE key = ?1 AND node_id = ?2")?
            .execute(params![key, sql_id(id)?])?;
        Ok(())
    }

    /// Node ids stored under `value` in the index on `key`.
    pub fn index_lookup(&self, key: &str, value: &[u8]) -> Result<BTreeSet<NodeId>> {
        let mut conn = self.conn()?;
        let mut stmt = conn.get_mut().prepare_cached(
            "SELECT node_id FROM index_entries WHERE key = ?1 AND value = ?2",
        )?;
        let ids = stmt
            .query_map(params![key, value], |row| {
                Ok(NodeId(row.get::<_, i64>(0)? as u64))
            })?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(ids)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "store.drop.close_failed");
        }
    }
}

struct MappedConn<'a> {
    guard: MutexGuard<'a, Option<Connection>>,
}

impl MappedConn<'_> {
    fn get_mut(&mut self) -> &mut Connection {
        self.guard
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection presence checked on acquire"))
    }
}

/// Lazy, paged iterator over every stored record.
pub struct NodeScan<'a> {
    store: &'a Store,
    after: i64,
    buffer: VecDeque<(NodeId, Vec<u8>)>,
    done: bool,
}

impl Iterator for NodeScan<'_> {
    type Item = Result<(NodeId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            match self.store.scan_page(self.after) {
                Ok(page) => {
                    if (page.len() as i64) < SCAN_PAGE {
                        self.done = true;
                    }
                    if let Some((last, _)) = page.last() {
                        self.after = last.0 as i64;
                    }
                    self.buffer.extend(page);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn sql_id(id: NodeId) -> Result<i64> {
    i64::try_from(id.0).map_err(|_| GraphError::Invalid("node id exceeds storage range"))
}

fn meta_int(conn: &Connection, key: &str) -> Result<Option<i64>> {
    let value = conn
        .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?;
    Ok(value)
}

fn set_meta(conn: &Connection, key: &str, value: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn write_strings(conn: &Connection, entries: &[(StrId, Arc<str>)]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut stmt =
        conn.prepare_cached("INSERT OR REPLACE INTO strings (id, value) VALUES (?1, ?2)")?;
    for (id, value) in entries {
        stmt.execute(params![id.0, value.as_ref()])?;
    }
    Ok(())
}

fn describe(location: &Location) -> String {
    match location {
        Location::File(path) => path.display().to_string(),
        Location::Temp(dir) => format!("temp:{}", dir.path().display()),
        Location::Memory => "memory".to_string(),
    }
}
