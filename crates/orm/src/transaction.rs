//! Transaction Management
//!
//! Scoped transactions over a [`DatabaseBackend`]. Scopes nest: an inner
//! scope joins the outer one, and a rollback anywhere rolls back the whole
//! outermost scope when it finishes.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backends::DatabaseBackend;
use crate::error::{ModelError, ModelResult};

/// One open transaction scope
pub struct Transaction {
    backend: Option<Arc<dyn DatabaseBackend>>,
    label: String,
    active: bool,
}

impl Transaction {
    /// Open a scope on `backend`
    pub async fn begin(backend: Arc<dyn DatabaseBackend>, label: &str) -> ModelResult<Transaction> {
        backend
            .begin()
            .await
            .map_err(|e| ModelError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        debug!(target: "tether::transaction", "Began transaction for {}", label);
        Ok(Transaction {
            backend: Some(backend),
            label: label.to_string(),
            active: true,
        })
    }

    /// A scope that never touches the backend (transactional cascades switched off)
    pub fn disabled(label: &str) -> Transaction {
        Transaction {
            backend: None,
            label: label.to_string(),
            active: false,
        }
    }

    /// Check if the scope is still open (not committed or rolled back)
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub async fn commit(mut self) -> ModelResult<()> {
        self.active = false;
        match self.backend.take() {
            Some(backend) => {
                backend.commit().await?;
                debug!(target: "tether::transaction", "Committed transaction for {}", self.label);
                Ok(())
            }
            None => Ok(()),
        }
    }

    pub async fn rollback(mut self) -> ModelResult<()> {
        self.active = false;
        match self.backend.take() {
            Some(backend) => {
                backend.rollback().await?;
                debug!(target: "tether::transaction", "Rolled back transaction for {}", self.label);
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Commit on `Ok`, roll back on `Err`. A failing commit replaces the result.
    pub async fn finish<T>(self, result: ModelResult<T>) -> ModelResult<T> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(error) => {
                let label = self.label.clone();
                if let Err(rollback_error) = self.rollback().await {
                    warn!(
                        target: "tether::transaction",
                        "Rollback for {} failed: {}", label, rollback_error
                    );
                }
                Err(error)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.active {
            // No await in Drop; the backend stays inside the scope until a
            // later commit or rollback at the outer level closes it.
            warn!(
                target: "tether::transaction",
                "Transaction for {} dropped without commit or rollback", self.label
            );
        }
    }
}

/// Run `operation` inside a scope, committing on success and rolling back on failure
pub async fn with_transaction<F, Fut, R>(
    backend: Arc<dyn DatabaseBackend>,
    label: &str,
    operation: F,
) -> ModelResult<R>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ModelResult<R>>,
{
    let tx = Transaction::begin(backend, label).await?;
    let result = operation().await;
    tx.finish(result).await
}
