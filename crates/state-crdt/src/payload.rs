/// Authoritative summaries delivered by the server for synchronization
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{AddRecord, CrdtError, OperationId, Result, UserId};

/// One add entry of a field summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddEntry<V> {
    pub value: V,
    pub ids: Vec<OperationId>,
}

impl<V: Clone> AddEntry<V> {
    pub(crate) fn to_record(&self) -> AddRecord<V> {
        AddRecord::from_wire(self.value.clone(), self.ids.iter().cloned())
    }
}

/// Every operation the server holds for one (user, field) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary<V> {
    #[serde(default = "Vec::new")]
    pub adds: Vec<AddEntry<V>>,
    #[serde(default)]
    pub removes: Vec<OperationId>,
}

impl<V> FieldSummary<V> {
    pub fn new() -> Self {
        Self {
            adds: Vec::new(),
            removes: Vec::new(),
        }
    }

    pub fn with_add<I, T>(mut self, value: V, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<OperationId>,
    {
        self.adds.push(AddEntry {
            value,
            ids: ids.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_remove(mut self, id: impl Into<OperationId>) -> Self {
        self.removes.push(id.into());
        self
    }
}

impl<V> Default for FieldSummary<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot keyed by user, then field name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncPayload<V> {
    users: HashMap<UserId, HashMap<String, FieldSummary<V>>>,
}

impl<V> SyncPayload<V> {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    /// Builder used to assemble payloads field by field
    pub fn with_field(
        mut self,
        user_id: impl Into<UserId>,
        field_name: impl Into<String>,
        summary: FieldSummary<V>,
    ) -> Self {
        self.insert(user_id.into(), field_name.into(), summary);
        self
    }

    pub fn insert(&mut self, user_id: UserId, field_name: String, summary: FieldSummary<V>) {
        self.users
            .entry(user_id)
            .or_default()
            .insert(field_name, summary);
    }

    pub fn contains_user(&self, user_id: &UserId) -> bool {
        self.users.contains_key(user_id)
    }

    pub fn users(&self) -> impl Iterator<Item = &UserId> {
        self.users.keys()
    }

    /// Summary for one (user, field) pair
    ///
    /// `Ok(None)` when the payload does not mention the user at all. A payload
    /// that mentions the user but omits the field is malformed.
    pub fn field_summary(
        &self,
        user_id: &UserId,
        field_name: &str,
    ) -> Result<Option<&FieldSummary<V>>> {
        match self.users.get(user_id) {
            None => Ok(None),
            Some(fields) => fields.get(field_name).map(Some).ok_or_else(|| {
                CrdtError::MalformedPayload {
                    user_id: user_id.clone(),
                    field_name: field_name.to_string(),
                }
            }),
        }
    }
}

impl<V> Default for SyncPayload<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: DeserializeOwned> SyncPayload<V> {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CrdtError::SerializationError(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CrdtError::SerializationError(e.to_string()))
    }
}
