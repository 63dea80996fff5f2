//! # tether-orm: record associations for dynamic models
//!
//! Models are declared at runtime through [`ModelSchema`]s and resolved into
//! an immutable [`Registry`]. A [`Session`] pairs the registry with a
//! [`DatabaseBackend`] and persists [`RecordRef`]s.
//!
//! Associations (`belongs_to`, `has_one`, `has_many` and
//! `has_and_belongs_to_many`) are reached through proxies bound to an owner
//! record. They load lazily, cache their targets on the owner, write through
//! to storage where the association kind demands it, and cascade destroys
//! according to each association's dependency policy.

pub mod backends;
pub mod config;
pub mod error;
pub mod event_error;
pub mod events;
pub mod logging;
pub mod model;
pub mod observers;
pub mod query;
pub mod relationships;
pub mod session;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;



// Re-export core types
pub use backends::{DatabaseBackend, JoinedRow, MemoryBackend};
pub use config::{ConfigError, SessionConfig};
pub use error::{FieldError, ModelError, ModelResult, OrmError, OrmResult};
pub use event_error::EventError;
pub use events::{ModelEvent, ModelObserver};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use model::{KeyKind, ModelSchema, PrimaryKey, RecordRef, Row};
pub use observers::ObserverRegistry;
pub use query::{OrderDirection, QueryBuilder, QueryOperator, WhereCondition};
pub use relationships::{
    AssociationOptions, AssociationProxy, AssociationValue, CollectionProxy, DependentPolicy, FindOptions,
    FindResult, Finder, Registry, RegistryBuilder, RelationshipMetadata, RelationshipType, SingleProxy,
};
pub use session::Session;
pub use transaction::{with_transaction, Transaction};
