use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtectError {
    #[error("no protected value with id {0}")]
    UnknownId(u64),
}

/// Keeps values alive while only native state refers to them.
///
/// Every [`protect`](ProtectionTable::protect) hands out a fresh id, even for a
/// value that is already protected, and must be matched by exactly one
/// [`unprotect`](ProtectionTable::unprotect). Ids are never reused.
#[derive(Debug)]
pub struct ProtectionTable<T> {
    entries: HashMap<u64, T>,
    next_id: u64,
}

impl<T> ProtectionTable<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn protect(&mut self, value: T) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, value);
        id
    }

    pub fn retrieve(&self, id: u64) -> Result<&T, ProtectError> {
        self.entries.get(&id).ok_or(ProtectError::UnknownId(id))
    }

    pub fn unprotect(&mut self, id: u64) -> Result<T, ProtectError> {
        self.entries.remove(&id).ok_or(ProtectError::UnknownId(id))
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry at once
    pub fn drain(&mut self) -> Vec<T> {
        self.entries.drain().map(|(_, value)| value).collect()
    }
}

impl<T> Default for ProtectionTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_never_reused() {
        let mut table = ProtectionTable::new();
        let a = table.protect("same");
        let b = table.protect("same");
        assert_ne!(a, b);

        table.unprotect(a).unwrap();
        let c = table.protect("other");
        assert!(c != a && c != b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_retrieve_survives_unrelated_activity() {
        let mut table = ProtectionTable::new();
        let kept = table.protect(String::from("kept"));
        for n in 0..10 {
            let id = table.protect(format!("temp {n}"));
            assert_eq!(table.retrieve(kept).unwrap(), "kept");
            table.unprotect(id).unwrap();
        }
        assert_eq!(table.retrieve(kept).unwrap(), "kept");
    }

    #[test]
    fn test_unknown_ids_fail() {
        let mut table = ProtectionTable::new();
        let id = table.protect(1);
        assert_eq!(table.unprotect(id), Ok(1));
        assert_eq!(table.retrieve(id), Err(ProtectError::UnknownId(id)));
        assert_eq!(table.unprotect(id), Err(ProtectError::UnknownId(id)));
        assert!(table.is_empty());
    }
}
