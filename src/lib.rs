//! # indexsync
//!
//! Incremental, resumable synchronization of relational rows into a search
//! index.
//!
//! ## Usage
//!
//! ```bash
//! indexsync run -c job.toml [--max-pages N] [--page-size N]
//! ```
//!
//! ## Modules
//!
//! - `bootstrap` - Composition root wiring configuration into a runnable job
//! - `config` - TOML configuration with environment overrides
//! - `error` - Run-level error taxonomy
//! - `index` - Search index clients (HTTP bulk API and in-memory)
//! - `job` - The fetch / process / write / checkpoint loop
//! - `page` - Page cursor over the source result set
//! - `retry` - Transport-level retry with backoff
//! - `savepoint` - Save points, job modes, and the save-point service
//! - `source` - Record sources (PostgreSQL and in-memory)
//! - `storage` - Durable save-point stores
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod index;
pub mod job;
pub mod page;
pub mod retry;
pub mod savepoint;
pub mod source;
pub mod storage;

pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use job::{Job, JobState, RunReport};
pub use page::PageRequest;
pub use savepoint::{JobMode, SavePoint, SavePointService};
