//! RocksDB-backed session store.
//!
//! Column families:
//! - `sessions`: one record per room, bincode-encoded [`PersistedSession`],
//!   LZ4 compressed, keyed by the room id's UTF-8 bytes.
//!
//! Records are written once per room teardown and read once per room
//! bootstrap, so the store is tuned for point lookups rather than scans.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteOptions,
};
use std::path::{Path, PathBuf};

use super::{PersistedSession, SessionStore, StoreError};

const CF_SESSIONS: &str = "sessions";

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every teardown write (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("codesync_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches, no fsync).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// RocksDB-backed [`SessionStore`].
pub struct RocksSessionStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksSessionStore {
    /// Open the store, creating the database and column family if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);

        let mut cf_opts = Options::default();
        cf_opts.set_block_based_table_factory(&block_opts);
        // Values are already LZ4 framed.
        cf_opts.set_compression_type(DBCompressionType::None);
        cf_opts.optimize_for_point_lookup(config.block_cache_size as u64);

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            vec![ColumnFamilyDescriptor::new(CF_SESSIONS, cf_opts)],
        )?;

        log::info!("Opened session store at {}", config.path.display());
        Ok(Self { db, config })
    }

    /// Load a session record.
    pub fn load_session(&self, room_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, room_id.as_bytes())? {
            Some(bytes) => Self::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Write a session record, replacing any previous one.
    pub fn save_session(&self, record: &PersistedSession) -> Result<(), StoreError> {
        let cf = self.cf()?;
        let value = Self::encode(record)?;

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.put_cf_opt(cf, record.id.as_bytes(), value, &write_opts)?;
        Ok(())
    }

    /// Room ids of every persisted session.
    pub fn list_sessions(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf()?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(format!("Invalid room id key: {e}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Delete a session record. Deleting a missing record is not an error.
    pub fn delete_session(&self, room_id: &str) -> Result<(), StoreError> {
        let cf = self.cf()?;
        self.db.delete_cf(cf, room_id.as_bytes())?;
        Ok(())
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(CF_SESSIONS)
            .ok_or_else(|| StoreError::Database(format!("Column family '{CF_SESSIONS}' not found")))
    }

    fn encode(record: &PersistedSession) -> Result<Vec<u8>, StoreError> {
        let raw = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&raw))
    }

    fn decode(bytes: &[u8]) -> Result<PersistedSession, StoreError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let (record, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(record)
    }
}

impl SessionStore for RocksSessionStore {
    fn load(&self, room_id: &str) -> Result<Option<PersistedSession>, StoreError> {
        self.load_session(room_id)
    }

    fn save(&self, room_id: &str, document: &str, language: &str) -> Result<PersistedSession, StoreError> {
        let record = PersistedSession::new(room_id, document, language);
        self.save_session(&record)?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, RocksSessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksSessionStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    #[test]
    fn test_store_open() {
        let (_dir, store) = open_temp();
        assert!(store.path().exists());
        assert!(store.list_sessions().unwrap().is_empty());
    }

    #[test]
    fn test_save_load() {
        let (_dir, store) = open_temp();
        let saved = store.save("r1", "console.log(1);\n", "JavaScript").unwrap();

        let loaded = store.load("r1").unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.document, "console.log(1);\n");
    }

    #[test]
    fn test_load_missing() {
        let (_dir, store) = open_temp();
        assert_eq!(store.load("missing").unwrap(), None);
    }

    #[test]
    fn test_overwrite() {
        let (_dir, store) = open_temp();
        store.save("r1", "a", "c").unwrap();
        store.save("r1", "b", "rust").unwrap();

        let loaded = store.load("r1").unwrap().unwrap();
        assert_eq!(loaded.document, "b");
        assert_eq!(loaded.language, "rust");
        assert_eq!(store.list_sessions().unwrap(), vec!["r1".to_string()]);
    }

    #[test]
    fn test_list_and_delete() {
        let (_dir, store) = open_temp();
        for id in ["a", "b", "c"] {
            store.save(id, "", "plaintext").unwrap();
        }
        let mut ids = store.list_sessions().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b", "c"]);

        store.delete_session("b").unwrap();
        store.delete_session("never-existed").unwrap();
        assert_eq!(store.load("b").unwrap(), None);
        assert_eq!(store.list_sessions().unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_survives() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig::for_testing(dir.path().join("db"));
        {
            let store = RocksSessionStore::open(config.clone()).unwrap();
            store.save("r1", "persisted", "python").unwrap();
            store.sync().unwrap();
        }
        let store = RocksSessionStore::open(config).unwrap();
        assert_eq!(store.load("r1").unwrap().unwrap().document, "persisted");
    }

    #[test]
    fn test_large_document_roundtrip() {
        let (_dir, store) = open_temp();
        let document = "fn tick() { counter += 1; }\n".repeat(20_000);
        store.save("big", &document, "rust").unwrap();
        assert_eq!(store.load("big").unwrap().unwrap().document, document);
    }

    #[test]
    fn test_corrupt_value_is_error() {
        let (_dir, store) = open_temp();
        let cf = store.cf().unwrap();
        store.db.put_cf(cf, b"bad", [0x10, 0x00, 0x00, 0x00, 0xFF]).unwrap();
        assert!(store.load("bad").is_err());
    }

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.bloom_filter_bits, 10);
        assert!(config.sync_writes);
    }
}
