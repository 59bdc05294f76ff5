//! Router capability detection and caching
//!
//! Discovers what a router can do (OS version, packages, hardware,
//! container support), derives a support level per capability, and caches
//! the resulting snapshot with a TTL. The [`CapabilityService`] brokers
//! cache-miss detection for callers.

pub mod cache;
pub mod compat;
pub mod detector;
pub mod levels;
pub mod parse;
pub mod service;
pub mod snapshot;

pub use cache::CapabilityCache;
pub use detector::CapabilityDetector;
pub use parse::{format_size, parse_size, parse_version};
pub use service::CapabilityService;
pub use snapshot::{
    CAPABILITY_TTL, Capability, CapabilityEntry, CapabilitySnapshot, ContainerFacts,
    HardwareFacts, ReleaseChannel, RouterOsVersion, SoftwareFacts, SupportLevel,
};
