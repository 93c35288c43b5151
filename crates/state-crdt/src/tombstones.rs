use std::collections::HashSet;

use crate::OperationId;

/// Append-only set of dead operation ids
///
/// An id that enters this set can never again validate an add.
#[derive(Debug, Clone, Default)]
pub struct TombstoneSet {
    ids: HashSet<OperationId>,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the id was not already tombstoned
    pub fn insert(&mut self, id: OperationId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationId> {
        self.ids.iter()
    }
}

impl Extend<OperationId> for TombstoneSet {
    fn extend<I: IntoIterator<Item = OperationId>>(&mut self, iter: I) {
        self.ids.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_new_ids_only() {
        let mut tombstones = TombstoneSet::new();
        assert!(tombstones.is_empty());

        assert!(tombstones.insert(OperationId::from("a")));
        assert!(!tombstones.insert(OperationId::from("a")));
        assert_eq!(tombstones.len(), 1);
        assert!(tombstones.contains(&OperationId::from("a")));
    }

    #[test]
    fn test_len_never_shrinks() {
        let mut tombstones = TombstoneSet::new();
        let mut last = 0;
        for id in ["a", "b", "a", "c", "b"] {
            tombstones.insert(OperationId::from(id));
            assert!(tombstones.len() >= last);
            last = tombstones.len();
        }

        tombstones.extend([OperationId::from("c"), OperationId::from("d")]);
        assert_eq!(tombstones.len(), 4);
    }
}
