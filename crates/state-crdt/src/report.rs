/// Change reports describing deltas applied to a tracker
/// Reports feed UI refreshes and, through their serializable view, outbound sync
use serde::{Deserialize, Serialize};

use crate::{CrdtKind, OperationId, UserId};

/// Current value of a tracked field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackedValue<V> {
    /// Values of a `Set` field, in insertion order
    Set(Vec<V>),

    /// Value of a single-valued field, `None` when null
    Single(Option<V>),
}

impl<V> TrackedValue<V> {
    /// The single value, if this is a non-null single-valued field
    pub fn as_single(&self) -> Option<&V> {
        match self {
            TrackedValue::Single(value) => value.as_ref(),
            TrackedValue::Set(_) => None,
        }
    }

    /// The values of a set field
    pub fn as_set(&self) -> Option<&[V]> {
        match self {
            TrackedValue::Set(values) => Some(values),
            TrackedValue::Single(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TrackedValue::Single(None))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Remove,
}

/// One applied delta
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeReport<V> {
    change_kind: ChangeKind,
    crdt_kind: CrdtKind,
    field_name: String,
    operation_id: OperationId,
    value: Option<V>,
    user_id: UserId,
    old_value: TrackedValue<V>,
}

impl<V> ChangeReport<V> {
    pub(crate) fn added(
        crdt_kind: CrdtKind,
        field_name: &str,
        user_id: &UserId,
        operation_id: OperationId,
        value: V,
        old_value: TrackedValue<V>,
    ) -> Self {
        Self {
            change_kind: ChangeKind::Add,
            crdt_kind,
            field_name: field_name.to_string(),
            operation_id,
            value: Some(value),
            user_id: user_id.clone(),
            old_value,
        }
    }

    pub(crate) fn removed(
        crdt_kind: CrdtKind,
        field_name: &str,
        user_id: &UserId,
        operation_id: OperationId,
        evicted: V,
    ) -> Self {
        Self {
            change_kind: ChangeKind::Remove,
            crdt_kind,
            field_name: field_name.to_string(),
            operation_id,
            value: None,
            user_id: user_id.clone(),
            old_value: TrackedValue::Single(Some(evicted)),
        }
    }

    pub fn change_kind(&self) -> ChangeKind {
        self.change_kind
    }

    pub fn crdt_kind(&self) -> CrdtKind {
        self.crdt_kind
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn operation_id(&self) -> &OperationId {
        &self.operation_id
    }

    /// New value; `None` for removes
    pub fn value(&self) -> Option<&V> {
        self.value.as_ref()
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Field value before an add, or the evicted value for a remove
    ///
    /// A remove always carries `TrackedValue::Single(Some(evicted))`, even on a
    /// `Set` field, so it does not share the shape of that field's
    /// [`StateTracker::value`](crate::StateTracker::value).
    pub fn old_value(&self) -> &TrackedValue<V> {
        &self.old_value
    }
}

impl<V: Clone> ChangeReport<V> {
    /// Wire view of this change; user id and old value stay local
    pub fn to_serializable(&self) -> SerializableChange<V> {
        SerializableChange {
            change_kind: self.change_kind,
            crdt_kind: self.crdt_kind,
            value: self.value.clone(),
            field_name: self.field_name.clone(),
            operation_id: self.operation_id.clone(),
        }
    }
}

/// Durable log representation of a change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializableChange<V> {
    pub change_kind: ChangeKind,
    pub crdt_kind: CrdtKind,
    pub value: Option<V>,
    pub field_name: String,
    pub operation_id: OperationId,
}
