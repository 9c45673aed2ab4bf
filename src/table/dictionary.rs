use std::collections::HashMap;

use parking_lot::Mutex;

/// An append-only string interning pool.
///
/// Categorical and string attributes store the index of a value here instead
/// of the value itself. Several attributes (and the tables that share them)
/// may intern into one dictionary, so the append path is locked.
#[derive(Debug, Default)]
pub struct Dictionary {
    inner: Mutex<DictionaryInner>,
}

#[derive(Debug, Default)]
struct DictionaryInner {
    values: Vec<String>,
    index: HashMap<String, usize>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a dictionary whose indices follow `values`. Duplicates keep
    /// their first position.
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let dictionary = Self::new();
        for value in values {
            dictionary.intern(value.into());
        }
        dictionary
    }

    /// Returns the index of `value`, adding it if it is new.
    pub fn intern(&self, value: impl Into<String>) -> usize {
        let value = value.into();
        let mut inner = self.inner.lock();
        if let Some(&index) = inner.index.get(&value) {
            return index;
        }
        let index = inner.values.len();
        inner.values.push(value.clone());
        inner.index.insert(value, index);
        index
    }

    /// Index of `value` if it has been interned.
    pub fn lookup(&self, value: &str) -> Option<usize> {
        self.inner.lock().index.get(value).copied()
    }

    /// Value stored at `index`.
    pub fn get(&self, index: usize) -> Option<String> {
        self.inner.lock().values.get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every value, in index order.
    pub fn values(&self) -> Vec<String> {
        self.inner.lock().values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_intern_is_idempotent() {
        let dict = Dictionary::new();
        assert_eq!(dict.intern("a"), 0);
        assert_eq!(dict.intern("b"), 1);
        assert_eq!(dict.intern("a"), 0);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.get(1).as_deref(), Some("b"));
        assert_eq!(dict.lookup("c"), None);
    }

    #[test]
    fn test_from_values_keeps_order() {
        let dict = Dictionary::from_values(["x", "y", "x", "z"]);
        assert_eq!(dict.values(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_concurrent_interning() {
        let dict = Arc::new(Dictionary::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dict = Arc::clone(&dict);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        dict.intern(format!("v{}", i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(dict.len(), 100);
        let index = dict.lookup("v42").unwrap();
        assert_eq!(dict.get(index).as_deref(), Some("v42"));
    }
}
