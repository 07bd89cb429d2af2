use crate::{Database, DatabaseIterator, KeyValue, Result, StorageError, WriteBatch};
use parking_lot::RwLock;
use std::collections::{BTreeMap, VecDeque};
use std::ops::Bound;
use std::sync::Arc;

/// Entries copied out per read-lock acquisition while iterating
const SCAN_CHUNK: usize = 64;

type Table = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory database implementation using BTreeMap
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    data: Arc<RwLock<Table>>,
}

impl MemoryDatabase {
    /// Create a new empty in-memory database
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemoryBatch::default())
    }

    fn write_batch(&self, batch: Box<dyn WriteBatch>) -> Result<()> {
        let batch = batch
            .as_any()
            .downcast_ref::<MemoryBatch>()
            .ok_or_else(|| StorageError::InvalidData("Invalid batch type".to_string()))?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        for op in &batch.operations {
            match op {
                BatchOp::Put(key, value) => {
                    data.insert(key.clone(), value.clone());
                }
                BatchOp::Delete(key) => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }

    fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> Box<dyn DatabaseIterator + '_> {
        Box::new(MemoryIterator::new(&self.data, start, end))
    }
}

#[derive(Debug)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

#[derive(Debug, Default)]
struct MemoryBatch {
    operations: Vec<BatchOp>,
}

impl WriteBatch for MemoryBatch {
    fn put(&mut self, key: &[u8], value: &[u8]) {
        self.operations.push(BatchOp::Put(key.to_vec(), value.to_vec()));
    }

    fn delete(&mut self, key: &[u8]) {
        self.operations.push(BatchOp::Delete(key.to_vec()));
    }

    fn len(&self) -> usize {
        self.operations.len()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Walks a key range in chunks, releasing the lock between chunks.
///
/// Writes made while iterating are visible to later chunks.
struct MemoryIterator<'a> {
    data: &'a RwLock<Table>,
    cursor: Bound<Vec<u8>>,
    end: Option<Vec<u8>>,
    buffer: VecDeque<KeyValue>,
    exhausted: bool,
}

impl<'a> MemoryIterator<'a> {
    fn new(data: &'a RwLock<Table>, start: &[u8], end: Option<&[u8]>) -> Self {
        Self {
            data,
            cursor: Bound::Included(start.to_vec()),
            end: end.map(<[u8]>::to_vec),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    fn cursor_past_end(&self) -> bool {
        let Some(end) = &self.end else {
            return false;
        };
        match &self.cursor {
            Bound::Included(key) | Bound::Excluded(key) => key >= end,
            Bound::Unbounded => false,
        }
    }

    fn refill(&mut self) {
        if self.cursor_past_end() {
            self.exhausted = true;
            return;
        }
        let upper = match &self.end {
            Some(end) => Bound::Excluded(end.clone()),
            None => Bound::Unbounded,
        };
        let data = self.data.read();
        self.buffer.extend(
            data.range::<Vec<u8>, _>((self.cursor.clone(), upper))
                .take(SCAN_CHUNK)
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        match self.buffer.back() {
            Some((last, _)) if self.buffer.len() == SCAN_CHUNK => self.cursor = Bound::Excluded(last.clone()),
            _ => self.exhausted = true,
        }
    }
}

impl DatabaseIterator for MemoryIterator<'_> {
    fn next(&mut self) -> Option<Result<KeyValue>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.refill();
        }
        self.buffer.pop_front().map(Ok)
    }
}
