//! Model System - dynamic records, identity and per-model schema
//!
//! - `primary_key`: Primary key types and utilities
//! - `record`: Dynamic records and shared record handles
//! - `schema`: Per-model declarations consumed by the registry

pub mod primary_key;
pub mod record;
pub mod schema;

pub use primary_key::{KeyKind, PrimaryKey};
pub use record::{RecordRef, Row};
pub use schema::{AssociationDeclaration, ModelSchema, Validation, Validator};
