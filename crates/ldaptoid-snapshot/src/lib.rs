//! # Snapshot Pipeline
//!
//! Turns adapter output into immutable directory snapshots: deterministic
//! POSIX id allocation, group synthesis, atomic publication, and the
//! refresh loop that drives it all on an interval with bounded backoff.
//!
//! ## Crate Organization
//!
//! - [`alloc`] - FNV-1a based UID/GID allocator with collision handling
//! - [`model`] - `User`/`Group`/`Snapshot` records and feature flags
//! - [`builder`] - Snapshot assembly from adapter output
//! - [`scheduler`] - Interval refresh, backoff, atomic publication, health
//! - [`store`] - Optional redis-backed persistence of id assignments
//! - [`error`] - Error types

pub mod alloc;
pub mod builder;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;

pub use alloc::{Allocation, IdAllocator};
pub use builder::{build_snapshot, BuildConfig, NewMapping};
pub use error::{SnapshotError, StoreError};
pub use model::{Feature, Group, Snapshot, User, SENTINEL_PRIMARY_GROUP_ID};
pub use scheduler::{DirectorySource, Health, RefreshScheduler, SchedulerConfig};
pub use store::{seed_allocators, MappingRecord, MappingStore, MemoryMappingStore, RedisMappingStore};
