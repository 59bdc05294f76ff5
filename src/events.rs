//! Domain events and the event bus port
//!
//! Components publish typed events through [`EventBus`]; the facade owns
//! delivery. The crate ships a bounded-channel implementation for in-process
//! wiring and a recording implementation for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::domain_types::{FeatureId, InstanceId, RouterId, ServiceType};
use crate::errors::{CoreError, CoreResult, codes};

/// Delivery priority of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Normal,
    Critical,
}

/// Severity of a VLAN pool warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolWarningLevel {
    Warning,
    Critical,
}

/// Direction of a monitored instance's recent memory usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
}

/// Payload of `vlan.pool.warning`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VlanPoolWarning {
    pub router_id: RouterId,
    pub total: u32,
    pub allocated: u32,
    pub available: u32,
    pub utilization_percent: f64,
    pub level: PoolWarningLevel,
    pub recommended_action: String,
}

/// Payload of `resource.warning`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceWarning {
    pub instance_id: InstanceId,
    pub feature_id: FeatureId,
    pub resource_type: String,
    pub current_usage_mb: f64,
    pub limit_mb: u64,
    pub detected_at: DateTime<Utc>,
    pub recommended_action: String,
    pub trend: TrendDirection,
    pub threshold_percent: f64,
    pub usage_percent: f64,
}

/// Payload of `service.config.exported` / `service.config.imported`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigShared {
    pub instance_id: InstanceId,
    pub service_type: ServiceType,
}

/// Typed event payloads; the variant fixes the event's type string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    VlanPoolWarning(VlanPoolWarning),
    ResourceWarning(ResourceWarning),
    ConfigExported(ConfigShared),
    ConfigImported(ConfigShared),
}

impl EventPayload {
    /// The event's dotted type string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::VlanPoolWarning(_) => "vlan.pool.warning",
            Self::ResourceWarning(_) => "resource.warning",
            Self::ConfigExported(_) => "service.config.exported",
            Self::ConfigImported(_) => "service.config.imported",
        }
    }
}

/// A domain event as published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub priority: EventPriority,
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Creates an event stamped with the given time
    pub fn new(
        priority: EventPriority,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            priority,
            source: source.into(),
            timestamp,
            payload,
        }
    }

    /// The event's dotted type string
    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }
}

/// Asynchronous publisher of domain events.
#[async_trait]
pub trait EventBus: Send + Sync + std::fmt::Debug {
    /// Publishes one event.
    async fn publish(&self, event: Event) -> CoreResult<()>;
}

/// Type alias for a shared event bus
pub type SharedEventBus = Arc<dyn EventBus>;

/// Event bus backed by a bounded tokio channel.
///
/// The receiver half is handed to whoever dispatches events onward (the
/// facade, a websocket fan-out, ...). `publish` awaits capacity; it fails
/// only once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelEventBus {
    sender: mpsc::Sender<Event>,
}

impl ChannelEventBus {
    /// Creates a bus with the given channel capacity, returning the
    /// receiving half alongside it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventBus for ChannelEventBus {
    async fn publish(&self, event: Event) -> CoreResult<()> {
        let event_type = event.event_type();
        self.sender.send(event).await.map_err(|_| {
            CoreError::resource(codes::RESOURCE_CLOSED, "event bus receiver dropped")
                .with_context("eventType", event_type)
        })
    }
}

/// Event bus that stores published events for assertions.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<Event>>,
}

impl RecordingEventBus {
    /// Creates an empty recording bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared recording bus
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Snapshot of everything published so far
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("event lock poisoned").clone()
    }

    /// Events of one type, in publish order
    pub fn events_of_type(&self, event_type: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type() == event_type)
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: Event) -> CoreResult<()> {
        self.events.lock().expect("event lock poisoned").push(event);
        Ok(())
    }
}
