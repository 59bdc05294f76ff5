//! # NasNet Core - Router Management Control Plane
//!
//! Control-plane core of the NasNet panel: provisions, supervises, and
//! resource-governs the helper service instances (proxies, DNS filters,
//! VPN daemons) that run alongside one or more managed MikroTik routers.
//!
//! ## Subsystems
//!
//! - **Capabilities**: detects what each router can do (OS version,
//!   packages, hardware, container support) and caches the snapshot with a
//!   TTL ([`capabilities`]).
//! - **Network allocators**: conflict-free port and VLAN allocation backed
//!   by a persistent store, with orphan reconciliation
//!   ([`port_registry`], [`vlan_allocator`]).
//! - **Resource governance**: cgroups-v2 limits and periodic usage polling
//!   with hysteresis-gated warnings ([`resources`]).
//! - **Log capture**: per-instance log files with rotation and
//!   non-blocking subscriber fan-out ([`log_capture`]).
//! - **Shared plumbing**: the coded error taxonomy with redaction
//!   ([`errors`]), the event bus ([`events`]), and the repository,
//!   transport, clock, and filesystem ports.
//!
//! The CLI/GraphQL facade, router wire protocol, and persistence engine
//! live outside this crate and are consumed through the ports in
//! [`transport`], [`repository`], and [`events`].

pub mod capabilities;
pub mod database;
pub mod domain_types;
pub mod errors;
pub mod events;
pub mod fs;
pub mod log_capture;
pub mod port_registry;
pub mod repository;
pub mod resources;
pub mod storage;
pub mod time_provider;
pub mod transport;
pub mod vlan_allocator;

pub use capabilities::{
    Capability, CapabilityCache, CapabilityDetector, CapabilityService, CapabilitySnapshot,
    SupportLevel,
};
pub use domain_types::{
    AllocationId, FeatureId, InstanceId, MemoryMb, PortNumber, PortProtocol, RequestId, RouterId,
    ServiceType, VlanId,
};
pub use errors::{CoreError, CoreResult, ErrorCategory, ErrorPresenter};
pub use events::{Event, EventBus, EventPayload, EventPriority, SharedEventBus};
pub use log_capture::{LogCapture, LogEntry, LogLevel, LogSubscriber};
pub use port_registry::{PortLease, PortRegistry};
pub use resources::{CgroupManager, ProcUsageReader, ResourcePoller, UsageReader};
pub use time_provider::{SharedTimeProvider, SystemClock, TimeProvider};
pub use transport::{RouterTransport, SharedRouterTransport};
pub use vlan_allocator::{PoolStatus, VlanAllocator, VlanLease};
