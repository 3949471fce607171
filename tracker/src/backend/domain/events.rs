//! # Event Bus
//!
//! Explicit subscriber list through which the herd store announces changes.
//! Views and other collaborators register once at startup; the store never
//! needs to know who is listening.
//!
//! Subscribers are called synchronously, in registration order, on the
//! publishing task. `publish` works on a snapshot of the subscriber list, so a
//! callback may subscribe or unsubscribe (including itself) without
//! deadlocking.

use log::debug;
use shared::{CowEntry, DatabaseObject};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub type SubscriptionId = u64;

/// Change notifications published after successful persistence
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The active object's collection was replaced
    EntriesUpdated { object_id: String, entries: Vec<CowEntry> },
    /// An object was created, renamed or deleted
    ObjectsChanged { objects: Vec<DatabaseObject> },
    /// A different object became active
    ObjectSwitched { object_id: String },
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::EntriesUpdated { .. } => "entries:updated",
            StoreEvent::ObjectsChanged { .. } => "objects:changed",
            StoreEvent::ObjectSwitched { .. } => "object:switched",
        }
    }
}

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().push((id, Arc::new(callback)));
        debug!("Subscriber {} registered", id);
        id
    }

    /// Returns false if the id was not subscribed
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    pub fn publish(&self, event: &StoreEvent) {
        let snapshot: Vec<Callback> = self.lock().iter().map(|(_, cb)| cb.clone()).collect();
        debug!("Publishing {} to {} subscribers", event.name(), snapshot.len());
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SubscriptionId, Callback)>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
