//! Record lifecycle callbacks
//!
//! Observers are registered per model on its schema. `creating`, `updating`,
//! `saving` and `deleting` run before the write and may abort it by returning
//! an error; the surrounding transaction is then rolled back.

use std::fmt;

use async_trait::async_trait;

use crate::event_error::EventError;
use crate::model::RecordRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelEvent {
    Creating,
    Created,
    Updating,
    Updated,
    Saving,
    Saved,
    Deleting,
    Deleted,
}

impl ModelEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelEvent::Creating => "creating",
            ModelEvent::Created => "created",
            ModelEvent::Updating => "updating",
            ModelEvent::Updated => "updated",
            ModelEvent::Saving => "saving",
            ModelEvent::Saved => "saved",
            ModelEvent::Deleting => "deleting",
            ModelEvent::Deleted => "deleted",
        }
    }
}

impl fmt::Display for ModelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait ModelObserver: Send + Sync {
    async fn creating(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }

    async fn created(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }

    async fn updating(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }

    async fn updated(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }

    async fn saving(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }

    async fn saved(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleting(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }

    async fn deleted(&self, _record: &RecordRef) -> Result<(), EventError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::Record;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct TestObserver {
        events: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ModelObserver for TestObserver {
        async fn creating(&self, record: &RecordRef) -> Result<(), EventError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("creating: {}", record.get_str("name").unwrap_or_default()));
            Ok(())
        }

        async fn deleting(&self, record: &RecordRef) -> Result<(), EventError> {
            if record.get_str("name").as_deref() == Some("Locked") {
                return Err(EventError::propagation_stopped("record is locked"));
            }
            Ok(())
        }
    }

    fn client(name: &str) -> RecordRef {
        let row = json!({"name": name}).as_object().cloned().unwrap();
        RecordRef::new(Record::new("Client", "id", row, true))
    }

    #[tokio::test]
    async fn test_observer_records_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let observer = TestObserver { events: events.clone() };

        observer.creating(&client("Summit")).await.unwrap();
        observer.saved(&client("Summit")).await.unwrap();

        assert_eq!(*events.lock().unwrap(), vec!["creating: Summit".to_string()]);
    }

    #[tokio::test]
    async fn test_observer_can_abort() {
        let observer = TestObserver {
            events: Arc::new(Mutex::new(Vec::new())),
        };
        assert!(observer.deleting(&client("Open")).await.is_ok());
        assert!(observer.deleting(&client("Locked")).await.is_err());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ModelEvent::Deleting.to_string(), "deleting");
        assert_eq!(ModelEvent::Saved.as_str(), "saved");
    }
}
