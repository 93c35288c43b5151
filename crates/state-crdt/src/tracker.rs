/// Merge engine for one (user, field) pair
/// Applies local writes optimistically and reconciles server summaries
use std::fmt;
use tracing::{debug, trace};

use crate::{
    AddRecord, ChangeReport, CrdtError, CrdtKind, IdGenerator, OperationId, RandomIdGenerator,
    Result, SyncPayload, TombstoneSet, TrackedValue, TrackerConfig, UserId,
};

/// Tracks, merges and reports changes for one state field of one user
///
/// Writes are resolved in the order they reach the tracker. For the
/// last-writer-wins kinds this means replicas only agree when they replay
/// operations in one shared order, normally the server's order as delivered
/// through [`StateTracker::synchronize`].
pub struct StateTracker<V> {
    kind: CrdtKind,
    field_name: String,
    user_id: UserId,

    /// Live add records, oldest first
    adds: Vec<AddRecord<V>>,

    /// Operation ids that may never validate an add again
    tombstones: TombstoneSet,

    id_generator: Box<dyn IdGenerator>,
}

impl<V> fmt::Debug for StateTracker<V>
where
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTracker")
            .field("kind", &self.kind)
            .field("field_name", &self.field_name)
            .field("user_id", &self.user_id)
            .field("adds", &self.adds)
            .field("tombstones", &self.tombstones.len())
            .finish()
    }
}

impl<V> StateTracker<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    pub fn new(kind: CrdtKind, field_name: impl Into<String>, user_id: UserId) -> Result<Self> {
        let field_name = field_name.into();
        if field_name.is_empty() {
            return Err(CrdtError::InvalidTracker(
                "field name must not be empty".to_string(),
            ));
        }

        Ok(Self {
            kind,
            field_name,
            user_id,
            adds: Vec::new(),
            tombstones: TombstoneSet::new(),
            id_generator: Box::new(RandomIdGenerator::default()),
        })
    }

    pub fn from_config(
        config: &TrackerConfig,
        kind: CrdtKind,
        field_name: impl Into<String>,
        user_id: UserId,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(kind, field_name, user_id)?.with_id_generator(config.id_generator()))
    }

    pub fn with_id_generator(mut self, id_generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Box::new(id_generator);
        self
    }

    pub fn kind(&self) -> CrdtKind {
        self.kind
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn records(&self) -> &[AddRecord<V>] {
        &self.adds
    }

    pub fn tombstones(&self) -> &TombstoneSet {
        &self.tombstones
    }

    /// Current value: the ordered values for a set, otherwise the single value or null
    pub fn value(&self) -> TrackedValue<V> {
        match self.kind {
            CrdtKind::Set => {
                TrackedValue::Set(self.adds.iter().map(|add| add.value().clone()).collect())
            }
            CrdtKind::FirstWriterWins
            | CrdtKind::LastWriterWins
            | CrdtKind::LastWriterWinsNullable => {
                TrackedValue::Single(self.adds.first().map(|add| add.value().clone()))
            }
        }
    }

    /// Apply a local write of `value`
    ///
    /// A value that is already live is not written again, so no redundant
    /// operation id is issued.
    pub fn add(&mut self, value: V) -> Vec<ChangeReport<V>> {
        if self.adds.iter().any(|add| add.value() == &value) {
            trace!(field = %self.field_name, ?value, "value already live, skipping add");
            return Vec::new();
        }

        let record = AddRecord::new(value, &mut *self.id_generator);
        self.merge(record)
    }

    /// Apply a local removal of `value` by tombstoning every id that holds it
    pub fn remove(&mut self, value: &V) -> Vec<ChangeReport<V>> {
        let ids: Vec<OperationId> = self
            .adds
            .iter()
            .filter(|add| add.value() == value)
            .flat_map(|add| add.ids().iter().cloned())
            .collect();

        ids.iter().flat_map(|id| self.tombstone(id)).collect()
    }

    /// Reconcile with an authoritative server summary
    ///
    /// Removes are applied before adds so an id that was both added and
    /// removed ends up excluded whatever the order inside the payload. A
    /// payload that mentions this user but not this field is rejected before
    /// anything is mutated. A payload that does not mention this user at all
    /// is accepted and changes nothing; it is not treated as malformed.
    pub fn synchronize(&mut self, payload: &SyncPayload<V>) -> Result<Vec<ChangeReport<V>>> {
        let summary = match payload.field_summary(&self.user_id, &self.field_name)? {
            Some(summary) => summary,
            None => {
                trace!(user = %self.user_id, field = %self.field_name, "payload does not mention user");
                return Ok(Vec::new());
            }
        };

        let records: Vec<AddRecord<V>> = summary.adds.iter().map(|add| add.to_record()).collect();
        let mut changes = Vec::new();

        for id in &summary.removes {
            changes.extend(self.tombstone(id));
        }

        for record in records {
            changes.extend(self.merge(record));
        }

        debug!(
            user = %self.user_id,
            field = %self.field_name,
            adds = summary.adds.len(),
            removes = summary.removes.len(),
            changes = changes.len(),
            "synchronized field"
        );

        Ok(changes)
    }

    /// Merge one incoming add record
    fn merge(&mut self, mut incoming: AddRecord<V>) -> Vec<ChangeReport<V>> {
        let old_value = self.value();

        let tombstones = &self.tombstones;
        incoming.retain_ids(|id| !tombstones.contains(id));
        if incoming.is_empty() {
            trace!(field = %self.field_name, "add fully superseded by tombstones");
            return Vec::new();
        }

        if self.adds.is_empty() {
            return self.install(incoming, old_value);
        }

        if self.adds.iter().any(|add| add.has_any_id_in(incoming.ids())) {
            trace!(field = %self.field_name, ids = ?incoming.ids(), "add already merged");
            return Vec::new();
        }

        match self.kind {
            CrdtKind::FirstWriterWins => {
                debug!(
                    field = %self.field_name,
                    ids = ?incoming.ids(),
                    "field already set, rejecting later write"
                );
                let (_, ids) = incoming.into_parts();
                self.tombstones.extend(ids);
                Vec::new()
            }
            CrdtKind::LastWriterWins | CrdtKind::LastWriterWinsNullable => {
                if let Some(previous) = self.adds.pop() {
                    debug!(
                        field = %self.field_name,
                        evicted = ?previous.value(),
                        "newer write replaces current value"
                    );
                    let (_, ids) = previous.into_parts();
                    self.tombstones.extend(ids);
                }
                self.install(incoming, old_value)
            }
            CrdtKind::Set => self.install(incoming, old_value),
        }
    }

    /// Push a record and report one add per id it carries
    fn install(
        &mut self,
        record: AddRecord<V>,
        old_value: TrackedValue<V>,
    ) -> Vec<ChangeReport<V>> {
        debug!(field = %self.field_name, value = ?record.value(), "installing value");

        let changes = record
            .ids()
            .iter()
            .map(|id| {
                ChangeReport::added(
                    self.kind,
                    &self.field_name,
                    &self.user_id,
                    id.clone(),
                    record.value().clone(),
                    old_value.clone(),
                )
            })
            .collect();

        self.adds.push(record);
        changes
    }

    /// Retire one operation id
    fn tombstone(&mut self, id: &OperationId) -> Vec<ChangeReport<V>> {
        match self.kind {
            CrdtKind::FirstWriterWins | CrdtKind::LastWriterWins => {
                trace!(field = %self.field_name, kind = %self.kind, "remove not supported");
                return Vec::new();
            }
            CrdtKind::LastWriterWinsNullable | CrdtKind::Set => {}
        }

        for add in &mut self.adds {
            add.remove_id(id);
        }

        let (evicted, live): (Vec<_>, Vec<_>) =
            self.adds.drain(..).partition(|add| add.is_empty());
        self.adds = live;

        // Recorded even when no record held the id, so a late add carrying it stays dead.
        self.tombstones.insert(id.clone());

        evicted
            .into_iter()
            .map(|record| {
                let (value, _) = record.into_parts();
                debug!(field = %self.field_name, ?value, %id, "value removed");
                ChangeReport::removed(self.kind, &self.field_name, &self.user_id, id.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeKind, FieldSummary, SequenceIdGenerator};

    fn tracker(kind: CrdtKind) -> StateTracker<&'static str> {
        StateTracker::new(kind, "answer", UserId::from("u1"))
            .unwrap()
            .with_id_generator(SequenceIdGenerator::new("op"))
    }

    fn single(value: &'static str) -> TrackedValue<&'static str> {
        TrackedValue::Single(Some(value))
    }

    #[test]
    fn test_empty_field_name_is_rejected() {
        let result = StateTracker::<i32>::new(CrdtKind::Set, "", UserId::from("u1"));
        assert!(matches!(result, Err(CrdtError::InvalidTracker(_))));
    }

    #[test]
    fn test_initial_values() {
        assert!(tracker(CrdtKind::LastWriterWins).value().is_null());
        assert_eq!(tracker(CrdtKind::Set).value(), TrackedValue::Set(vec![]));
    }

    #[test]
    fn test_first_writer_wins() {
        let mut t = tracker(CrdtKind::FirstWriterWins);

        assert_eq!(t.add("A").len(), 1);
        assert!(t.add("B").is_empty());
        assert_eq!(t.value(), single("A"));
        assert!(t.tombstones().contains(&OperationId::from("op-2")));

        assert!(t.remove(&"A").is_empty());
        assert_eq!(t.value(), single("A"));
    }

    #[test]
    fn test_last_writer_wins() {
        let mut t = tracker(CrdtKind::LastWriterWins);
        t.add("A");

        let changes = t.add("B");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value(), Some(&"B"));
        assert_eq!(changes[0].old_value(), &single("A"));
        assert_eq!(t.value(), single("B"));
        assert!(t.tombstones().contains(&OperationId::from("op-1")));

        assert!(t.remove(&"B").is_empty());
        assert_eq!(t.value(), single("B"));
    }

    #[test]
    fn test_last_writer_wins_nullable() {
        let mut t = tracker(CrdtKind::LastWriterWinsNullable);
        t.add("A");
        t.add("B");

        let changes = t.remove(&"B");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_kind(), ChangeKind::Remove);
        assert_eq!(changes[0].operation_id(), &OperationId::from("op-2"));
        assert!(t.value().is_null());
    }

    #[test]
    fn test_set_keeps_insertion_order() {
        let mut t = tracker(CrdtKind::Set);
        t.add("A");
        t.add("B");
        assert_eq!(t.value(), TrackedValue::Set(vec!["A", "B"]));

        t.remove(&"A");
        assert_eq!(t.value(), TrackedValue::Set(vec!["B"]));

        let changes = t.add("A");
        assert_eq!(changes[0].operation_id(), &OperationId::from("op-3"));
        assert_eq!(t.value(), TrackedValue::Set(vec!["B", "A"]));
    }

    #[test]
    fn test_duplicate_local_add_issues_no_operation() {
        let mut t = tracker(CrdtKind::Set);
        t.add("A");
        assert!(t.add("A").is_empty());
        assert_eq!(t.records()[0].ids().len(), 1);
    }

    #[test]
    fn test_remove_of_unknown_value_is_noop() {
        let mut t = tracker(CrdtKind::Set);
        assert!(t.remove(&"missing").is_empty());
        assert!(t.tombstones().is_empty());
    }

    #[test]
    fn test_record_with_several_ids_reports_each_and_survives_partial_removal() {
        let mut t = tracker(CrdtKind::Set);
        let payload = SyncPayload::new().with_field(
            "u1",
            "answer",
            FieldSummary::new().with_add("A", ["x", "y"]),
        );

        let changes = t.synchronize(&payload).unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].operation_id(), &OperationId::from("y"));

        let payload = SyncPayload::new().with_field(
            "u1",
            "answer",
            FieldSummary::new().with_add("A", ["y"]).with_remove("x"),
        );
        assert!(t.synchronize(&payload).unwrap().is_empty());
        assert_eq!(t.value(), TrackedValue::Set(vec!["A"]));

        let changes = t.remove(&"A");
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].operation_id(), &OperationId::from("y"));
        assert_eq!(t.value(), TrackedValue::Set(vec![]));
    }

    #[test]
    fn test_tombstoned_id_is_never_live() {
        let mut t = tracker(CrdtKind::LastWriterWinsNullable);
        t.add("A");
        t.add("B");

        for record in t.records() {
            for id in record.ids() {
                assert!(!t.tombstones().contains(id));
            }
        }
    }

    #[test]
    fn test_malformed_payload_leaves_state_untouched() {
        let mut t = tracker(CrdtKind::Set);
        t.add("A");

        let payload = SyncPayload::new().with_field(
            "u1",
            "other-field",
            FieldSummary::new().with_remove("op-1"),
        );
        let err = t.synchronize(&payload).unwrap_err();

        assert!(matches!(err, CrdtError::MalformedPayload { .. }));
        assert_eq!(t.value(), TrackedValue::Set(vec!["A"]));
        assert!(t.tombstones().is_empty());
    }
}
