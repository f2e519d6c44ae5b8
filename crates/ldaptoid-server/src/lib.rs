//! # LDAP Engine
//!
//! The read-only directory server: projects the current snapshot as an
//! LDAP tree under a configured suffix and answers Bind/Search/Unbind over
//! TCP.
//!
//! ## Crate Organization
//!
//! - [`tree`] - Suffix layout, DN construction, entry projection
//! - [`filter`] - Filter evaluation against projected entries
//! - [`search`] - Scope traversal, candidate enumeration, limits
//! - [`session`] - Per-connection protocol state machine
//! - [`listener`] - TCP accept loop and connection tasks

pub mod filter;
pub mod listener;
pub mod search;
pub mod session;
pub mod tree;

pub use listener::{serve, ServerContext};
pub use session::{Session, SessionConfig, SnapshotProvider};
pub use tree::DirectoryTree;
