//! Resource usage poller
//!
//! Samples every monitored instance on a fixed interval, keeps a small
//! circular window of samples per instance, and emits `resource.warning`
//! events through an 80%-enter / 70%-exit hysteresis with a five-minute
//! repeat cooldown. State transitions are computed on a single task, so
//! per-instance event order is exactly warning, cleared, warning over time.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::usage::{ResourceUsage, UsageReader};
use crate::domain_types::{FeatureId, InstanceId, MemoryMb};
use crate::events::{Event, EventPayload, EventPriority, ResourceWarning, SharedEventBus, TrendDirection};
use crate::time_provider::SharedTimeProvider;

/// Samples retained per instance for trend inference
const SAMPLE_WINDOW: usize = 10;

/// Poller thresholds and cadence
#[derive(Debug, Clone, Copy)]
pub struct ResourcePollerConfig {
    pub interval: Duration,
    pub warning_threshold_percent: f64,
    pub clear_threshold_percent: f64,
    pub cooldown: Duration,
}

impl Default for ResourcePollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            warning_threshold_percent: 80.0,
            clear_threshold_percent: 70.0,
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug)]
struct MonitoredInstance {
    feature_id: FeatureId,
    name: String,
    pid: u32,
    memory_limit: MemoryMb,
    last_warning_at: Option<SystemTime>,
    in_warning: bool,
    samples: [f64; SAMPLE_WINDOW],
    next_slot: usize,
    sample_count: usize,
}

impl MonitoredInstance {
    fn new(feature_id: FeatureId, name: String, pid: u32, memory_limit: MemoryMb) -> Self {
        Self {
            feature_id,
            name,
            pid,
            memory_limit,
            last_warning_at: None,
            in_warning: false,
            samples: [0.0; SAMPLE_WINDOW],
            next_slot: 0,
            sample_count: 0,
        }
    }

    fn record(&mut self, memory_mb: f64) {
        self.samples[self.next_slot] = memory_mb;
        self.next_slot = (self.next_slot + 1) % SAMPLE_WINDOW;
        self.sample_count = (self.sample_count + 1).min(SAMPLE_WINDOW);
    }

    fn average(&self) -> f64 {
        if self.sample_count == 0 {
            return 0.0;
        }
        self.samples[..self.sample_count].iter().sum::<f64>() / self.sample_count as f64
    }

    /// Advisory trend over the sample window
    fn trend(&self, current: f64) -> TrendDirection {
        if self.sample_count < 2 {
            return TrendDirection::Stable;
        }
        let average = self.average();
        if current > average * 1.1 {
            TrendDirection::Rising
        } else if current < average * 0.9 {
            TrendDirection::Falling
        } else {
            TrendDirection::Stable
        }
    }
}

#[derive(Debug)]
struct PollerCore {
    config: ResourcePollerConfig,
    reader: Arc<dyn UsageReader>,
    events: SharedEventBus,
    time: SharedTimeProvider,
    instances: RwLock<HashMap<InstanceId, MonitoredInstance>>,
}

impl PollerCore {
    /// One sampling cycle: snapshot the monitored set under the read lock,
    /// sample each PID outside it, then apply state transitions.
    async fn poll_once(&self) {
        let targets: Vec<(InstanceId, u32)> = {
            let instances = self.instances.read().await;
            instances.iter().map(|(id, inst)| (*id, inst.pid)).collect()
        };

        for (instance_id, pid) in targets {
            match self.reader.read_usage(pid) {
                Ok(usage) => {
                    let event = {
                        let mut instances = self.instances.write().await;
                        // The instance may have been removed since the snapshot.
                        match instances.get_mut(&instance_id) {
                            Some(instance) => self.apply_sample(instance_id, instance, usage),
                            None => None,
                        }
                    };
                    if let Some(event) = event {
                        if let Err(err) = self.events.publish(event).await {
                            warn!(error = %err, "failed to publish resource warning");
                        }
                    }
                }
                Err(err) => {
                    debug!(pid, error = %err, "usage read failed; dropping instance");
                    let removed = self.instances.write().await.remove(&instance_id);
                    if removed.is_some() {
                        info!(
                            instance_id = %instance_id,
                            pid,
                            "instance process gone; monitoring removed"
                        );
                    }
                }
            }
        }
    }

    fn apply_sample(
        &self,
        instance_id: InstanceId,
        instance: &mut MonitoredInstance,
        usage: ResourceUsage,
    ) -> Option<Event> {
        instance.record(usage.memory_mb);

        let limit_mb = instance.memory_limit.as_u64();
        let usage_percent = usage.memory_mb / limit_mb as f64 * 100.0;
        let now = self.time.now();

        if instance.in_warning {
            if usage_percent < self.config.clear_threshold_percent {
                instance.in_warning = false;
                debug!(
                    instance_id = %instance_id,
                    usage_percent,
                    "memory warning cleared"
                );
                return None;
            }
            if usage_percent >= self.config.warning_threshold_percent {
                let cooled_down = instance
                    .last_warning_at
                    .and_then(|at| now.duration_since(at).ok())
                    .is_some_and(|since| since >= self.config.cooldown);
                if cooled_down {
                    instance.last_warning_at = Some(now);
                    return Some(self.warning_event(instance_id, instance, &usage, usage_percent, now));
                }
            }
            return None;
        }

        if usage_percent >= self.config.warning_threshold_percent {
            instance.in_warning = true;
            instance.last_warning_at = Some(now);
            return Some(self.warning_event(instance_id, instance, &usage, usage_percent, now));
        }
        None
    }

    fn warning_event(
        &self,
        instance_id: InstanceId,
        instance: &MonitoredInstance,
        usage: &ResourceUsage,
        usage_percent: f64,
        now: SystemTime,
    ) -> Event {
        warn!(
            instance_id = %instance_id,
            instance_name = %instance.name,
            usage_mb = usage.memory_mb,
            limit_mb = instance.memory_limit.as_u64(),
            usage_percent,
            "instance memory above warning threshold"
        );
        Event::new(
            EventPriority::Normal,
            "resource-poller",
            DateTime::<Utc>::from(now),
            EventPayload::ResourceWarning(ResourceWarning {
                instance_id,
                feature_id: instance.feature_id.clone(),
                resource_type: "memory".to_string(),
                current_usage_mb: usage.memory_mb,
                limit_mb: instance.memory_limit.as_u64(),
                detected_at: DateTime::<Utc>::from(now),
                recommended_action: "increase_memory_limit".to_string(),
                trend: instance.trend(usage.memory_mb),
                threshold_percent: self.config.warning_threshold_percent,
                usage_percent,
            }),
        )
    }
}

/// Periodic sampler of monitored service instances.
#[derive(Debug)]
pub struct ResourcePoller {
    core: Arc<PollerCore>,
    shutdown: std::sync::Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ResourcePoller {
    /// Creates a poller with default thresholds
    pub fn new(
        reader: Arc<dyn UsageReader>,
        events: SharedEventBus,
        time: SharedTimeProvider,
    ) -> Self {
        Self::with_config(reader, events, time, ResourcePollerConfig::default())
    }

    /// Creates a poller with custom thresholds
    pub fn with_config(
        reader: Arc<dyn UsageReader>,
        events: SharedEventBus,
        time: SharedTimeProvider,
        config: ResourcePollerConfig,
    ) -> Self {
        Self {
            core: Arc::new(PollerCore {
                config,
                reader,
                events,
                time,
                instances: RwLock::new(HashMap::new()),
            }),
            shutdown: std::sync::Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// Registers an instance for monitoring.
    #[instrument(skip(self, feature_id, instance_name), fields(instance_id = %instance_id, pid))]
    pub async fn add_instance(
        &self,
        instance_id: InstanceId,
        feature_id: FeatureId,
        instance_name: impl Into<String>,
        pid: u32,
        memory_limit: MemoryMb,
    ) {
        let mut instances = self.core.instances.write().await;
        instances.insert(
            instance_id,
            MonitoredInstance::new(feature_id, instance_name.into(), pid, memory_limit),
        );
        debug!(monitored = instances.len(), "instance added to poller");
    }

    /// Stops monitoring an instance; returns whether it was known.
    pub async fn remove_instance(&self, instance_id: InstanceId) -> bool {
        self.core
            .instances
            .write()
            .await
            .remove(&instance_id)
            .is_some()
    }

    /// Number of instances currently monitored
    pub async fn monitored_count(&self) -> usize {
        self.core.instances.read().await.len()
    }

    /// Runs exactly one sampling cycle. The background loop calls this;
    /// tests drive it directly for determinism.
    pub async fn poll_once(&self) {
        self.core.poll_once().await;
    }

    /// Starts the background sampling loop. Idempotent.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock().expect("shutdown lock poisoned") = Some(tx);

        let core = self.core.clone();
        *handle = Some(tokio::spawn(async move {
            info!(interval_s = core.config.interval.as_secs(), "resource poller started");
            loop {
                tokio::select! {
                    _ = core.time.sleep(core.config.interval) => {
                        core.poll_once().await;
                    }
                    _ = rx.changed() => break,
                }
            }
            info!("resource poller stopped");
        }));
    }

    /// Signals the loop and waits for it to actually finish.
    pub async fn stop(&self) {
        let sender = self.shutdown.lock().expect("shutdown lock poisoned").take();
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventBus;
    use crate::resources::usage::ScriptedUsageReader;
    use crate::time_provider::ManualClock;

    struct Fixture {
        poller: ResourcePoller,
        reader: Arc<ScriptedUsageReader>,
        events: Arc<RecordingEventBus>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new();
        let reader = Arc::new(ScriptedUsageReader::new());
        let events = RecordingEventBus::shared();
        let poller = ResourcePoller::new(
            reader.clone(),
            events.clone(),
            Arc::new(clock.clone()),
        );
        Fixture {
            poller,
            reader,
            events,
            clock,
        }
    }

    fn feature() -> FeatureId {
        FeatureId::try_new("vpn".to_string()).unwrap()
    }

    fn limit(mb: u64) -> MemoryMb {
        MemoryMb::try_new(mb).unwrap()
    }

    async fn drive(fx: &Fixture, ticks: usize) {
        for _ in 0..ticks {
            fx.clock.advance(Duration::from_secs(10));
            fx.poller.poll_once().await;
        }
    }

    #[tokio::test]
    async fn hysteresis_emits_on_entry_and_reentry_only() {
        let fx = fixture();
        let id = InstanceId::generate();
        fx.reader
            .push_samples(100, &[70.0, 85.0, 88.0, 82.0, 75.0, 68.0, 90.0, 92.0]);
        fx.poller
            .add_instance(id, feature(), "tor-exit", 100, limit(100))
            .await;

        drive(&fx, 8).await;

        let warnings = fx.events.events_of_type("resource.warning");
        assert_eq!(warnings.len(), 2);

        let payloads: Vec<&ResourceWarning> = warnings
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::ResourceWarning(p) => Some(p),
                _ => None,
            })
            .collect();
        assert_eq!(payloads[0].usage_percent, 85.0);
        assert_eq!(payloads[1].usage_percent, 90.0);
        assert_eq!(payloads[0].resource_type, "memory");
        assert_eq!(payloads[0].limit_mb, 100);
        assert_eq!(payloads[0].threshold_percent, 80.0);
    }

    #[tokio::test]
    async fn sustained_warning_repeats_only_after_cooldown() {
        let fx = fixture();
        let id = InstanceId::generate();
        // 40 ticks of 10s at 90% usage: entry warning at t=10s, one
        // repeat once 5 minutes have passed.
        fx.reader.push_samples(100, &[90.0]);
        fx.poller
            .add_instance(id, feature(), "tor-exit", 100, limit(100))
            .await;

        drive(&fx, 40).await;

        let warnings = fx.events.events_of_type("resource.warning");
        assert_eq!(warnings.len(), 2);
    }

    #[tokio::test]
    async fn dead_process_is_auto_removed() {
        let fx = fixture();
        let id = InstanceId::generate();
        fx.reader.push_samples(100, &[50.0]);
        fx.poller
            .add_instance(id, feature(), "tor-exit", 100, limit(100))
            .await;

        drive(&fx, 1).await;
        assert_eq!(fx.poller.monitored_count().await, 1);

        fx.reader.kill_pid(100);
        drive(&fx, 1).await;
        assert_eq!(fx.poller.monitored_count().await, 0);
    }

    #[tokio::test]
    async fn trend_reflects_sample_window() {
        let fx = fixture();
        let id = InstanceId::generate();
        // Flat history then a spike: the spike reads as rising.
        fx.reader
            .push_samples(100, &[50.0, 50.0, 50.0, 50.0, 85.0]);
        fx.poller
            .add_instance(id, feature(), "tor-exit", 100, limit(100))
            .await;

        drive(&fx, 5).await;

        let warnings = fx.events.events_of_type("resource.warning");
        assert_eq!(warnings.len(), 1);
        let EventPayload::ResourceWarning(payload) = &warnings[0].payload else {
            panic!("wrong payload");
        };
        assert_eq!(payload.trend, TrendDirection::Rising);
    }

    #[tokio::test]
    async fn first_sample_trend_is_stable() {
        let fx = fixture();
        let id = InstanceId::generate();
        fx.reader.push_samples(100, &[95.0]);
        fx.poller
            .add_instance(id, feature(), "tor-exit", 100, limit(100))
            .await;

        drive(&fx, 1).await;

        let warnings = fx.events.events_of_type("resource.warning");
        let EventPayload::ResourceWarning(payload) = &warnings[0].payload else {
            panic!("wrong payload");
        };
        assert_eq!(payload.trend, TrendDirection::Stable);
    }

    #[tokio::test]
    async fn add_and_remove_instances() {
        let fx = fixture();
        let id = InstanceId::generate();
        fx.poller
            .add_instance(id, feature(), "tor-exit", 100, limit(100))
            .await;
        assert_eq!(fx.poller.monitored_count().await, 1);

        assert!(fx.poller.remove_instance(id).await);
        assert!(!fx.poller.remove_instance(id).await);
        assert_eq!(fx.poller.monitored_count().await, 0);
    }

    #[tokio::test]
    async fn start_and_stop_terminate_cleanly() {
        let fx = fixture();
        let id = InstanceId::generate();
        fx.reader.push_samples(100, &[90.0]);
        fx.poller
            .add_instance(id, feature(), "tor-exit", 100, limit(100))
            .await;

        fx.poller.start().await;
        // Second start is a no-op.
        fx.poller.start().await;

        // The manual clock turns every interval sleep into a yield, so a
        // few real yields let the loop run at least one cycle.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }

        fx.poller.stop().await;
        assert!(!fx.events.events_of_type("resource.warning").is_empty());

        // Stop is idempotent.
        fx.poller.stop().await;
    }
}
