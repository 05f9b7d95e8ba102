// In-memory backend used by the engine tests.
use super::{Storage, StorageError};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

#[derive(Clone, Default)]
pub(crate) struct MemoryStorage {
    files: Rc<RefCell<BTreeMap<String, Vec<u8>>>>,
    writes: Rc<RefCell<Vec<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.borrow().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.borrow_mut().clear();
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }

    /// Replaces content without recording a write.
    pub fn put(&self, path: &str, content: &[u8]) {
        self.files
            .borrow_mut()
            .insert(path.to_string(), content.to_vec());
    }

    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.borrow().clone()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, content: &[u8]) -> Result<(), StorageError> {
        self.put(path, content);
        self.writes.borrow_mut().push(path.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}
