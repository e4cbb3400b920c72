//! Public facade for the cloud-burst parallel execution backend: typed
//! wrappers around the ephemeral dispatcher and the detached session core
//! that mirror the external interface surface (spec.md §6.5) — the CLI
//! binaries in `src/bin/` are thin clients of this crate, nothing more.

pub mod backends;
pub mod cluster;
pub mod session;

pub use cb_types::{
    Architecture, ClusterConfig, ClusterConfigBuilder, Error, LaunchKind,
};
pub use cluster::Cluster;
pub use session::{list_sessions, Session, SessionSummary};
