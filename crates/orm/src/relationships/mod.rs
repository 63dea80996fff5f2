//! Relationships Module - association declarations, proxies and cascades
//!
//! - `registry`: resolved models and association metadata
//! - `single`: belongs_to and has_one proxies
//! - `collection`: has_many and has_and_belongs_to_many proxies
//! - `dependency`: dependent policies applied on destroy and removal

pub mod collection;
pub mod dependency;
pub mod inflector;
pub mod metadata;
pub mod options;
pub mod proxy;
pub mod registry;
pub mod single;
pub mod value;

#[cfg(test)]
mod collection_tests;
#[cfg(test)]
mod registry_tests;

pub use collection::{CollectionProxy, FindOptions, FindResult, Finder};
pub use metadata::{DependentPolicy, JoinTableConfig, RelationshipMetadata, RelationshipType};
pub use options::AssociationOptions;
pub use proxy::{AssociationCache, AssociationProxy, CollectionEntry, CollectionTarget, SingleTarget};
pub use registry::{ModelInfo, Registry, RegistryBuilder};
pub use single::SingleProxy;
pub use value::AssociationValue;
