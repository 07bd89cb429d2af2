use rocksdb::{Direction, IteratorMode, Options, ReadOptions, WriteBatch as RocksWriteBatch, DB};
use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use crate::{Database, DatabaseIterator, KeyValue, Result, StorageError, WriteBatch as WriteBatchTrait};

fn db_error(e: rocksdb::Error) -> StorageError {
    StorageError::DatabaseError(e.to_string())
}

/// On-disk backend for the history, archive and thumbnail stores
pub struct RocksDatabase {
    db: Arc<DB>,
}

impl RocksDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        // History rows are small; keep the write buffers modest.
        opts.set_write_buffer_size(16 * 1024 * 1024);
        opts.set_max_write_buffer_number(2);
        opts.set_max_open_files(256);
        opts.set_compaction_style(rocksdb::DBCompactionStyle::Level);

        let db = DB::open(&opts, path).map_err(db_error)?;
        Ok(Self { db: Arc::new(db) })
    }
}

impl Database for RocksDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get(key).map_err(db_error)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(key, value).map_err(db_error)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete(key).map_err(db_error)
    }

    fn batch(&self) -> Box<dyn WriteBatchTrait> {
        Box::new(RocksBatch::default())
    }

    fn write_batch(&self, batch: Box<dyn WriteBatchTrait>) -> Result<()> {
        let rocks_batch = batch
            .as_any()
            .downcast_ref::<RocksBatch>()
            .ok_or_else(|| StorageError::InvalidData("Invalid batch type".to_string()))?;
        if rocks_batch.is_empty() {
            return Ok(());
        }

        let mut write = RocksWriteBatch::default();
        for (key, value) in &rocks_batch.ops {
            match value {
                Some(value) => write.put(key, value),
                None => write.delete(key),
            }
        }
        self.db.write(write).map_err(db_error)
    }

    fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> Box<dyn DatabaseIterator + '_> {
        let mut read_opts = ReadOptions::default();
        if let Some(end) = end {
            read_opts.set_iterate_upper_bound(end.to_vec());
        }
        Box::new(RocksIterator {
            iter: self
                .db
                .iterator_opt(IteratorMode::From(start, Direction::Forward), read_opts),
        })
    }
}

/// Buffered operations; `rocksdb::WriteBatch` is not `Send` on every platform
#[derive(Default)]
pub struct RocksBatch {
    ops: Vec<(Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteBatchTrait for RocksBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.ops.push((key.to_vec(), Some(value.to_vec())));
    }

    fn delete(&mut self, key: &[u8]) {
        self.ops.push((key.to_vec(), None));
    }

    fn len(&self) -> usize {
        self.ops.len()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct RocksIterator<'a> {
    iter: rocksdb::DBIterator<'a>,
}

impl<'a> DatabaseIterator for RocksIterator<'a> {
    fn next(&mut self) -> Option<Result<KeyValue>> {
        self.iter.next().map(|result| {
            result
                .map_err(db_error)
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rocksdb_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDatabase::open(temp_dir.path()).unwrap();

        db.put(b"test_key", b"test_value").unwrap();
        assert_eq!(db.get(b"test_key").unwrap(), Some(b"test_value".to_vec()));
        assert!(db.contains(b"test_key").unwrap());

        db.delete(b"test_key").unwrap();
        assert!(!db.contains(b"test_key").unwrap());
    }

    #[test]
    fn test_batch_and_scan() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDatabase::open(temp_dir.path()).unwrap();

        let mut batch = db.batch();
        for i in 0..10 {
            batch.put(format!("row_{:02}", i).as_bytes(), b"v");
        }
        batch.put(b"zzz", b"other");
        db.write_batch(batch).unwrap();

        assert_eq!(db.scan_prefix(b"row_").unwrap().len(), 10);
    }

    #[test]
    fn test_iter_range_stops_at_upper_bound() {
        let temp_dir = TempDir::new().unwrap();
        let db = RocksDatabase::open(temp_dir.path()).unwrap();
        for k in [b"a", b"b", b"c", b"d"] {
            db.put(k, b"v").unwrap();
        }

        let mut iter = db.iter_range(b"b", Some(b"d"));
        let mut keys = Vec::new();
        while let Some(entry) = iter.next() {
            keys.push(entry.unwrap().0);
        }
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }
}
