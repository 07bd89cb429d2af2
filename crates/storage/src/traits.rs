use crate::{Result, KeyValue};

/// Core key-value operations the row stores are built on
pub trait Database: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete a key
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn contains(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Create a new batch for atomic writes
    fn batch(&self) -> Box<dyn WriteBatch>;

    /// Execute a batch of operations atomically
    fn write_batch(&self, batch: Box<dyn WriteBatch>) -> Result<()>;

    /// Iterate keys in `start..end` in key order; `None` leaves the range open above
    fn iter_range(&self, start: &[u8], end: Option<&[u8]>) -> Box<dyn DatabaseIterator + '_>;

    /// Collect every pair whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<KeyValue>> {
        let end = prefix_end(prefix);
        let mut iter = self.iter_range(prefix, end.as_deref());
        let mut entries = Vec::new();
        while let Some(entry) = iter.next() {
            entries.push(entry?);
        }
        Ok(entries)
    }
}

/// Smallest key greater than every key starting with `prefix`
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

/// Batch operations for atomic writes
pub trait WriteBatch: Send {
    /// Add a put operation to the batch
    fn put(&mut self, key: &[u8], value: &[u8]);

    /// Add a delete operation to the batch
    fn delete(&mut self, key: &[u8]);

    /// Get the number of operations in the batch
    fn len(&self) -> usize;

    /// Check if the batch is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Helper method for downcasting
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Database iterator trait
pub trait DatabaseIterator: Send {
    /// Move to the next item
    fn next(&mut self) -> Option<Result<KeyValue>>;
}

/// Extension trait for typed access to database
pub trait TypedDatabase: Database {
    /// Get a value and deserialize it
    fn get_typed<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Serialize and put a value
    fn put_typed<T: serde::Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        self.put(key, &encode(value)?)
    }
}

/// Implement TypedDatabase for all types that implement Database
impl<T: Database + ?Sized> TypedDatabase for T {}

pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| crate::StorageError::SerializationError(e.to_string()))
}

pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| crate::StorageError::SerializationError(e.to_string()))
}
