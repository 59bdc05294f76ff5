//! Repository implementations
//!
//! SQLite-backed implementations of the ports in [`crate::repository`],
//! sharing one [`crate::database::Database`] handle, plus in-memory
//! implementations used by unit tests and ephemeral deployments.

pub mod memory;
pub mod port_allocations;
pub mod service_instances;
pub mod settings;
pub mod vlan_allocations;

pub use memory::{
    MemoryPortAllocationStore, MemoryServiceInstanceStore, MemorySettingsStore,
    MemoryVlanAllocationStore,
};
pub use port_allocations::SqlitePortAllocationStore;
pub use service_instances::SqliteServiceInstanceStore;
pub use settings::SqliteSettingsStore;
pub use vlan_allocations::SqliteVlanAllocationStore;
