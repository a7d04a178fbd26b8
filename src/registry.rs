//! Tracks the live subscribers of one topic and fans out wake signals to
//! them. Signin/signout arrive over the control channel (`src/control`) and
//! are applied here by the publisher-side listener thread.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::semaphore::NamedSemaphore;
use crate::topic::names;

pub struct SubscriberRegistry {
    topic: String,
    subscribers: Mutex<HashMap<String, Arc<NamedSemaphore>>>,
}

impl SubscriberRegistry {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Creates the subscriber's wake semaphore and registers it. A second
    /// signin for the same id replaces the prior registration (the old
    /// semaphore handle is dropped, not unlinked, matching the subscriber's
    /// own ownership of its name).
    pub fn signin(&self, subscriber_id: &str) -> crate::error::Result<()> {
        let sem = NamedSemaphore::create(&names::wake_sem(&self.topic, subscriber_id), 0)?;
        self.subscribers
            .lock()
            .unwrap()
            .insert(subscriber_id.to_string(), Arc::new(sem));
        tracing::info!(topic = %self.topic, subscriber_id, "subscriber signed in");
        Ok(())
    }

    /// Removes and unlinks `subscriber_id`'s wake semaphore. A signout for
    /// an unknown id is a no-op — the control channel has no way to
    /// guarantee exactly-once delivery.
    pub fn signout(&self, subscriber_id: &str) {
        let removed = self.subscribers.lock().unwrap().remove(subscriber_id);
        if removed.is_some() {
            NamedSemaphore::unlink(&names::wake_sem(&self.topic, subscriber_id));
            tracing::info!(topic = %self.topic, subscriber_id, "subscriber signed out");
        }
    }

    /// Signals every registered subscriber. Takes a snapshot of the current
    /// registrations and releases the lock before making any semaphore
    /// calls, so a slow or failing subscriber can't stall signin/signout
    /// for the others.
    pub fn fanout_signal(&self) {
        let snapshot: Vec<(String, Arc<NamedSemaphore>)> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(id, sem)| (id.clone(), Arc::clone(sem)))
            .collect();

        for (subscriber_id, sem) in snapshot {
            if let Err(e) = sem.try_signal_edge() {
                tracing::warn!(topic = %self.topic, subscriber_id, error = %e, "failed to signal subscriber");
            }
        }
    }

    /// Drains and unlinks every registered wake semaphore. Called by the
    /// publisher during its own shutdown.
    pub fn shutdown(&self) {
        let drained: Vec<String> = self.subscribers.lock().unwrap().drain().map(|(id, _)| id).collect();
        for subscriber_id in drained {
            NamedSemaphore::unlink(&names::wake_sem(&self.topic, &subscriber_id));
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
