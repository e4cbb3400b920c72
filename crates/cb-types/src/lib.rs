//! Shared data model, configuration, and error vocabulary for cloudburst.
//!
//! Every other crate in the workspace depends on this one for the types
//! that cross component boundaries: cluster/session configuration, the
//! wire envelope schemas, object-store key conventions, the session
//! manifest, and the shared `Error` enum.

pub mod config;
pub mod envelope;
pub mod error;
pub mod keys;
pub mod manifest;

pub use config::{Architecture, ClusterConfig, ClusterConfigBuilder, CpuUnits, LaunchKind, MemoryGb};
pub use envelope::{ResultEnvelope, TaskEnvelope};
pub use error::{Error, Result};
pub use manifest::{SessionManifest, TaskManifestEntry};
