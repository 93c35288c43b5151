/// Ownership and serialization of tracker access
/// A registry owns one tracker per observed (user, field) pair; a worker task
/// gives a single tracker one FIFO mutation queue
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{info, warn};

use crate::{
    ChangeReport, CrdtError, CrdtKind, Result, StateTracker, SyncPayload, TrackedValue,
    TrackerConfig, UserId,
};

/// Capacity of the change broadcast channel of a tracker worker
pub const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Identifies the tracker of one (user, field) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackerKey {
    pub user_id: UserId,
    pub field_name: String,
}

impl TrackerKey {
    pub fn new(user_id: UserId, field_name: impl Into<String>) -> Self {
        Self {
            user_id,
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.field_name)
    }
}

/// Trackers for every (user, field) pair currently observed
pub struct TrackerRegistry<V> {
    config: TrackerConfig,
    trackers: BTreeMap<TrackerKey, StateTracker<V>>,
}

impl<V> TrackerRegistry<V>
where
    V: Clone + PartialEq + fmt::Debug,
{
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            trackers: BTreeMap::new(),
        })
    }

    /// Start observing a pair, or return its existing tracker
    pub fn observe(
        &mut self,
        kind: CrdtKind,
        field_name: &str,
        user_id: &UserId,
    ) -> Result<&mut StateTracker<V>> {
        let key = TrackerKey::new(user_id.clone(), field_name);

        match self.trackers.entry(key) {
            Entry::Occupied(entry) => {
                let tracker = entry.into_mut();
                if tracker.kind() != kind {
                    return Err(CrdtError::KindMismatch {
                        field_name: field_name.to_string(),
                        existing: tracker.kind(),
                        requested: kind,
                    });
                }
                Ok(tracker)
            }
            Entry::Vacant(entry) => {
                let tracker =
                    StateTracker::from_config(&self.config, kind, field_name, user_id.clone())?;
                info!(key = %entry.key(), %kind, "observing field");
                Ok(entry.insert(tracker))
            }
        }
    }

    /// Stop observing a pair and hand back its tracker
    pub fn forget(&mut self, user_id: &UserId, field_name: &str) -> Option<StateTracker<V>> {
        let key = TrackerKey::new(user_id.clone(), field_name);
        let removed = self.trackers.remove(&key);
        if removed.is_some() {
            info!(%key, "no longer observing field");
        }
        removed
    }

    pub fn get(&self, user_id: &UserId, field_name: &str) -> Option<&StateTracker<V>> {
        self.trackers
            .get(&TrackerKey::new(user_id.clone(), field_name))
    }

    pub fn get_mut(&mut self, user_id: &UserId, field_name: &str) -> Option<&mut StateTracker<V>> {
        self.trackers
            .get_mut(&TrackerKey::new(user_id.clone(), field_name))
    }

    pub fn keys(&self) -> impl Iterator<Item = &TrackerKey> {
        self.trackers.keys()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Reconcile every observed tracker against one payload
    ///
    /// The payload is checked against all trackers first; if it is malformed
    /// for any of them, none is mutated.
    pub fn synchronize(&mut self, payload: &SyncPayload<V>) -> Result<Vec<ChangeReport<V>>> {
        for key in self.trackers.keys() {
            if let Err(e) = payload.field_summary(&key.user_id, &key.field_name) {
                warn!(%key, error = %e, "rejecting payload");
                return Err(e);
            }
        }

        let mut changes = Vec::new();
        for tracker in self.trackers.values_mut() {
            changes.extend(tracker.synchronize(payload)?);
        }
        Ok(changes)
    }
}

enum TrackerCommand<V> {
    Add {
        value: V,
        reply: oneshot::Sender<Vec<ChangeReport<V>>>,
    },
    Remove {
        value: V,
        reply: oneshot::Sender<Vec<ChangeReport<V>>>,
    },
    Synchronize {
        payload: Arc<SyncPayload<V>>,
        reply: oneshot::Sender<Result<Vec<ChangeReport<V>>>>,
    },
    Value {
        reply: oneshot::Sender<TrackedValue<V>>,
    },
    Shutdown {
        reply: oneshot::Sender<StateTracker<V>>,
    },
}

/// Handle to a tracker owned by its own worker task
///
/// Commands from every clone of the handle are applied strictly in the order
/// they were sent.
pub struct TrackerHandle<V> {
    key: TrackerKey,
    tx: mpsc::UnboundedSender<TrackerCommand<V>>,
    changes: broadcast::Sender<ChangeReport<V>>,
}

impl<V> Clone for TrackerHandle<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            tx: self.tx.clone(),
            changes: self.changes.clone(),
        }
    }
}

/// Move a tracker into a worker task; must be called within a tokio runtime
pub fn spawn_tracker<V>(tracker: StateTracker<V>) -> TrackerHandle<V>
where
    V: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    let key = TrackerKey::new(tracker.user_id().clone(), tracker.field_name());
    let (tx, rx) = mpsc::unbounded_channel();
    let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

    tokio::spawn(run_tracker(tracker, rx, changes.clone()));

    TrackerHandle { key, tx, changes }
}

impl<V> TrackerHandle<V>
where
    V: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    pub fn key(&self) -> &TrackerKey {
        &self.key
    }

    /// Receive every change report the worker produces from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeReport<V>> {
        self.changes.subscribe()
    }

    pub async fn add(&self, value: V) -> Result<Vec<ChangeReport<V>>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Add { value, reply })?;
        rx.await.map_err(|_| CrdtError::WorkerStopped)
    }

    pub async fn remove(&self, value: V) -> Result<Vec<ChangeReport<V>>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Remove { value, reply })?;
        rx.await.map_err(|_| CrdtError::WorkerStopped)
    }

    pub async fn synchronize(
        &self,
        payload: impl Into<Arc<SyncPayload<V>>>,
    ) -> Result<Vec<ChangeReport<V>>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Synchronize {
            payload: payload.into(),
            reply,
        })?;
        rx.await.map_err(|_| CrdtError::WorkerStopped)?
    }

    pub async fn value(&self) -> Result<TrackedValue<V>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Value { reply })?;
        rx.await.map_err(|_| CrdtError::WorkerStopped)
    }

    /// Stop the worker once earlier commands are applied, returning the tracker
    pub async fn shutdown(&self) -> Result<StateTracker<V>> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Shutdown { reply })?;
        rx.await.map_err(|_| CrdtError::WorkerStopped)
    }

    fn send(&self, command: TrackerCommand<V>) -> Result<()> {
        self.tx.send(command).map_err(|_| CrdtError::WorkerStopped)
    }
}

async fn run_tracker<V>(
    mut tracker: StateTracker<V>,
    mut rx: mpsc::UnboundedReceiver<TrackerCommand<V>>,
    changes: broadcast::Sender<ChangeReport<V>>,
) where
    V: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    let key = TrackerKey::new(tracker.user_id().clone(), tracker.field_name());
    info!(%key, kind = %tracker.kind(), "tracker worker started");

    while let Some(command) = rx.recv().await {
        match command {
            TrackerCommand::Add { value, reply } => {
                let batch = tracker.add(value);
                publish(&changes, &batch);
                let _ = reply.send(batch);
            }
            TrackerCommand::Remove { value, reply } => {
                let batch = tracker.remove(&value);
                publish(&changes, &batch);
                let _ = reply.send(batch);
            }
            TrackerCommand::Synchronize { payload, reply } => {
                let result = tracker.synchronize(&payload);
                match &result {
                    Ok(batch) => publish(&changes, batch),
                    Err(e) => warn!(%key, error = %e, "synchronize rejected"),
                }
                let _ = reply.send(result);
            }
            TrackerCommand::Value { reply } => {
                let _ = reply.send(tracker.value());
            }
            TrackerCommand::Shutdown { reply } => {
                info!(%key, "tracker worker stopped");
                let _ = reply.send(tracker);
                return;
            }
        }
    }

    info!(%key, "tracker worker stopped, all handles dropped");
}

fn publish<V: Clone>(changes: &broadcast::Sender<ChangeReport<V>>, batch: &[ChangeReport<V>]) {
    for change in batch {
        // No subscribers is fine; reports are also returned to the caller.
        let _ = changes.send(change.clone());
    }
}
