use std::fmt;
use std::sync::Arc;

use crate::event_error::EventError;
use crate::events::{ModelEvent, ModelObserver};
use crate::model::RecordRef;

/// Ordered observers for one model
#[derive(Clone, Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn ModelObserver>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn ModelObserver>) {
        self.observers.push(observer);
    }

    /// Append another registry's observers after this one's
    pub fn extend(&mut self, other: &ObserverRegistry) {
        self.observers.extend(other.observers.iter().cloned());
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Run every observer for `event`, stopping at the first error
    pub async fn trigger(&self, event: ModelEvent, record: &RecordRef) -> Result<(), EventError> {
        for observer in &self.observers {
            match event {
                ModelEvent::Creating => observer.creating(record).await?,
                ModelEvent::Created => observer.created(record).await?,
                ModelEvent::Updating => observer.updating(record).await?,
                ModelEvent::Updated => observer.updated(record).await?,
                ModelEvent::Saving => observer.saving(record).await?,
                ModelEvent::Saved => observer.saved(record).await?,
                ModelEvent::Deleting => observer.deleting(record).await?,
                ModelEvent::Deleted => observer.deleted(record).await?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.observers.len())
            .finish()
    }
}
