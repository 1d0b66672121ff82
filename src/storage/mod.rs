//! Save-point storage layer
//!
//! Durable storage of [`SavePointContainer`]s behind the
//! [`SavePointContainerService`] trait, with file, memory, and PostgreSQL
//! backends selected by [`SavePointStoreFactory`].

pub mod backends;
pub mod config;
pub mod error;
pub mod factory;
pub mod traits;
pub mod types;

pub use backends::{FileBackend, MemoryBackend};
#[cfg(feature = "postgres")]
pub use backends::PostgresBackend;
pub use config::{BackendType, FileConfig, PostgresConfig, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use factory::SavePointStoreFactory;
pub use traits::SavePointContainerService;
pub use types::{HealthStatus, SavePointContainer, SAVEPOINT_FORMAT_VERSION};
