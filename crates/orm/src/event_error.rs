use thiserror::Error;

/// Error returned by an observer to abort the surrounding save or destroy.
/// The session reports it as `ModelError::Callback` and rolls back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    /// The observer itself failed
    #[error("Observer error: {message}")]
    Observer { message: String },
    /// The observer refused the operation (a `deleting` hook protecting a record)
    #[error("Event propagation stopped: {reason}")]
    PropagationStopped { reason: String },
}

impl EventError {
    pub fn observer(message: &str) -> Self {
        Self::Observer {
            message: message.to_string(),
        }
    }

    pub fn propagation_stopped(reason: &str) -> Self {
        Self::PropagationStopped {
            reason: reason.to_string(),
        }
    }

    pub fn is_veto(&self) -> bool {
        matches!(self, Self::PropagationStopped { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            EventError::propagation_stopped("Summit is protected").to_string(),
            "Event propagation stopped: Summit is protected"
        );
        assert_eq!(EventError::observer("mailer down").to_string(), "Observer error: mailer down");
    }

    #[test]
    fn test_only_propagation_stop_is_a_veto() {
        assert!(EventError::propagation_stopped("locked").is_veto());
        assert!(!EventError::observer("mailer down").is_veto());
    }
}
