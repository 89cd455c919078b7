use std::collections::HashMap;

use crate::error::ErrorKind;
use crate::types::Value;

/// Backreference table for one decode.
///
/// Sparse: a stream may memoize at any 32-bit index, so entries live in a
/// map rather than a vector sized by the largest index.
#[derive(Debug, Default)]
pub struct Memo {
    entries: HashMap<u32, Value>,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` at `index`, replacing any previous entry.
    pub fn insert(&mut self, index: u32, value: Value) {
        self.entries.insert(index, value);
    }

    /// Shared handle to the value at `index`.
    pub fn lookup(&self, index: u32) -> Option<Value> {
        self.entries.get(&index).cloned()
    }

    /// Index MEMOIZE writes to: the current entry count.
    pub fn next_index(&self) -> Result<u32, ErrorKind> {
        index_for(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn index_for(count: usize) -> Result<u32, ErrorKind> {
    u32::try_from(count).map_err(|_| ErrorKind::MemoExhausted(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let mut memo = Memo::new();
        assert!(memo.lookup(0).is_none());
        memo.insert(0, Value::long(1));
        memo.insert(0, Value::long(2));
        assert_eq!(memo.lookup(0), Some(Value::long(2)));
        assert_eq!(memo.len(), 1);
    }

    #[test]
    fn test_sparse_high_index() {
        let mut memo = Memo::new();
        memo.insert(u32::MAX, Value::None);
        assert_eq!(memo.lookup(u32::MAX), Some(Value::None));
        assert_eq!(memo.next_index(), Ok(1));
    }

    #[test]
    fn test_next_index_past_u32_is_an_error() {
        assert_eq!(index_for(u32::MAX as usize), Ok(u32::MAX));
        let count = u32::MAX as usize + 1;
        assert_eq!(index_for(count), Err(ErrorKind::MemoExhausted(count)));
    }

    #[test]
    fn test_lookup_returns_shared_handle() {
        let mut memo = Memo::new();
        let list = Value::list(vec![]);
        memo.insert(3, list.clone());
        let got = memo.lookup(3).unwrap();
        assert!(got.same_instance(&list));
    }
}
