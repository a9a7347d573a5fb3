pub mod adapter;
pub mod cache;
pub mod domain;
pub mod error;
pub mod retry;
pub mod schema;
pub mod sqlite;
pub mod traits;
pub mod wire;

pub use adapter::{check_widgets, PersistenceAdapter};
pub use cache::RecordCache;
pub use domain::{Domain, DomainConfig, EndpointTemplates};
pub use error::{AdapterError, StorageError};
pub use retry::RetryPolicy;
pub use sqlite::SqliteBackend;
pub use traits::*;
pub use wire::{BatchKind, ControlInfo, InheritanceInfo, ValidationReport};
