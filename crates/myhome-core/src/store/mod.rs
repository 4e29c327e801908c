// ── Persistence and the registry cache above it ──

pub mod registry;
pub mod sqlite;

pub use registry::{Registry, RegistryEvent};
pub use sqlite::Store;
