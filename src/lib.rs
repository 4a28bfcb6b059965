//! alistsync - one-way directory synchronization between AList storages
//!
//! alistsync keeps a destination directory tree in line with a source tree,
//! both living on the same AList/OpenList server. All file operations are
//! delegated to the server: copies are queued as server-side tasks and never
//! pass through this process.
//!
//! ## Core Features
//!
//! - **Incremental copy**: Only missing or changed files are copied
//! - **Destination cleanup**: Extras are left alone, moved to a trash folder, or deleted
//! - **Move mode**: Source files are removed once the destination holds them
//! - **Filtering**: Excluded paths, file name patterns, and size bounds
//! - **Configuration Management**: YAML-based configuration with environment overrides
//!
//! ## Modules
//!
//! - [`client`]: AList REST API client and the [`RemoteFs`] port
//! - [`config`]: Configuration management and parsing
//! - [`policy`]: Per-file sync decisions
//! - [`walker`]: Recursive tree reconciliation
//! - [`sync`]: Pair runner and run summaries

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod filter;
pub mod policy;
pub mod sync;
pub mod timestamp;
pub mod walker;

pub use client::{AlistClient, AuthMethod, Credentials, DirEntry, FileStat, RemoteFs};
pub use config::Config;
pub use error::SyncError;
pub use events::{RecordingObserver, SyncEvent, SyncObserver, TracingObserver};
pub use policy::{DeleteAction, SyncPolicy};
pub use sync::{PairOutcome, SyncEngine, SyncPair, SyncSummary};
