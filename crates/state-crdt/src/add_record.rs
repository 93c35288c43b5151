use crate::{IdGenerator, OperationId};

/// A value together with the operation ids that currently hold it
///
/// Several ids on one record are independently issued operations that
/// converged on an equal value. A record whose id set becomes empty is dead
/// and must be evicted by its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct AddRecord<V> {
    value: V,
    ids: Vec<OperationId>,
}

impl<V> AddRecord<V> {
    /// Record for a local write, holding one freshly generated id
    pub fn new(value: V, id_generator: &mut dyn IdGenerator) -> Self {
        Self {
            value,
            ids: vec![id_generator.next_id()],
        }
    }

    /// Record rebuilt from a wire payload; duplicate ids are collapsed
    pub fn from_wire(value: V, ids: impl IntoIterator<Item = OperationId>) -> Self {
        let mut unique = Vec::new();
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self { value, ids: unique }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn ids(&self) -> &[OperationId] {
        &self.ids
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// True if this record shares at least one id with `candidates`
    pub fn has_any_id_in(&self, candidates: &[OperationId]) -> bool {
        candidates.iter().any(|id| self.ids.contains(id))
    }

    /// Strip one id; returns whether it was present
    pub fn remove_id(&mut self, id: &OperationId) -> bool {
        match self.ids.iter().position(|held| held == id) {
            Some(index) => {
                self.ids.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn retain_ids(&mut self, keep: impl FnMut(&OperationId) -> bool) {
        self.ids.retain(keep);
    }

    pub fn into_parts(self) -> (V, Vec<OperationId>) {
        (self.value, self.ids)
    }
}
