//! Resource governance end to end: cgroup limit writes, degraded mode,
//! and the poller's hysteresis over a scripted usage sequence.

use std::sync::Arc;
use std::time::Duration;

use nasnet_core::events::{EventPayload, RecordingEventBus};
use nasnet_core::fs::{FilesystemPort, MemoryFilesystem};
use nasnet_core::resources::{
    CgroupManager, ResourcePoller, ScriptedUsageReader, cpu_weight_for,
};
use nasnet_core::time_provider::ManualClock;
use nasnet_core::{FeatureId, InstanceId, MemoryMb};

fn feature() -> FeatureId {
    FeatureId::try_new("vpn".to_string()).unwrap()
}

fn mb(value: u64) -> MemoryMb {
    MemoryMb::try_new(value).unwrap()
}

#[test]
fn cpu_weight_boundaries() {
    assert_eq!(cpu_weight_for(1), 100);
    assert_eq!(cpu_weight_for(50), 5000);
    assert_eq!(cpu_weight_for(100), 10000);
    // Out-of-range priorities clamp instead of erroring.
    assert_eq!(cpu_weight_for(0), cpu_weight_for(1));
    assert_eq!(cpu_weight_for(u32::MAX), cpu_weight_for(100));
}

#[test]
fn limits_reach_the_cgroup_tree() {
    let fs = Arc::new(MemoryFilesystem::new());
    fs.put("/sys/fs/cgroup/cgroup.controllers", "cpu io memory pids");
    let manager = CgroupManager::new(fs.clone());
    assert!(manager.is_available());

    let instance = InstanceId::generate();
    manager.setup_instance(instance).unwrap();
    manager.apply_memory_limits(instance, mb(80), mb(100)).unwrap();
    manager.apply_cpu_priority(instance, 25).unwrap();
    manager.attach_process(instance, 31337).unwrap();

    let dir = manager.instance_dir(instance);
    assert_eq!(
        fs.contents(&dir.join("memory.high")).unwrap(),
        (80u64 << 20).to_string()
    );
    assert_eq!(
        fs.contents(&dir.join("memory.max")).unwrap(),
        (100u64 << 20).to_string()
    );
    assert_eq!(fs.contents(&dir.join("cgroup.procs")).unwrap(), "31337");
}

#[test]
fn cgroup_unavailable_mode_is_a_silent_success() {
    let fs = Arc::new(MemoryFilesystem::new());
    let manager = CgroupManager::new(fs.clone());
    assert!(!manager.is_available());

    let instance = InstanceId::generate();
    manager.setup_instance(instance).unwrap();
    manager.apply_memory_limits(instance, mb(80), mb(100)).unwrap();
    manager.apply_cpu_priority(instance, 25).unwrap();
    manager.attach_process(instance, 31337).unwrap();
    manager.remove_instance(instance).unwrap();

    // No filesystem work happened.
    assert!(!fs.exists(&manager.instance_dir(instance)));
}

#[test_log::test(tokio::test)]
async fn hysteresis_scenario_emits_exactly_two_warnings() {
    let clock = ManualClock::new();
    let reader = Arc::new(ScriptedUsageReader::new());
    let events = RecordingEventBus::shared();
    let poller = ResourcePoller::new(reader.clone(), events.clone(), Arc::new(clock.clone()));

    let instance = InstanceId::generate();
    // Limit 100 MB; the sequence crosses 80% at 85, drops below 70% at
    // 68, and re-crosses at 90.
    reader.push_samples(4242, &[70.0, 85.0, 88.0, 82.0, 75.0, 68.0, 90.0, 92.0]);
    poller
        .add_instance(instance, feature(), "wg-gateway", 4242, mb(100))
        .await;

    for _ in 0..8 {
        clock.advance(Duration::from_secs(10));
        poller.poll_once().await;
    }

    let warnings = fx_payloads(&events);
    assert_eq!(warnings.len(), 2);
    assert_eq!(warnings[0].usage_percent, 85.0);
    assert_eq!(warnings[1].usage_percent, 90.0);
    assert!(warnings[0].detected_at < warnings[1].detected_at);
}

#[test_log::test(tokio::test)]
async fn repeat_warnings_respect_the_five_minute_cooldown() {
    let clock = ManualClock::new();
    let reader = Arc::new(ScriptedUsageReader::new());
    let events = RecordingEventBus::shared();
    let poller = ResourcePoller::new(reader.clone(), events.clone(), Arc::new(clock.clone()));

    let instance = InstanceId::generate();
    reader.push_samples(4242, &[95.0]);
    poller
        .add_instance(instance, feature(), "wg-gateway", 4242, mb(100))
        .await;

    // Sustained pressure at 10 s cadence across two cooldown windows:
    // entry at t=10s, repeats at t=310s and t=610s.
    for _ in 0..62 {
        clock.advance(Duration::from_secs(10));
        poller.poll_once().await;
    }

    let warnings = fx_payloads(&events);
    assert_eq!(warnings.len(), 3);
}

#[tokio::test]
async fn vanished_process_stops_being_monitored() {
    let clock = ManualClock::new();
    let reader = Arc::new(ScriptedUsageReader::new());
    let events = RecordingEventBus::shared();
    let poller = ResourcePoller::new(reader.clone(), events.clone(), Arc::new(clock.clone()));

    let instance = InstanceId::generate();
    reader.push_samples(4242, &[40.0]);
    poller
        .add_instance(instance, feature(), "wg-gateway", 4242, mb(100))
        .await;

    poller.poll_once().await;
    assert_eq!(poller.monitored_count().await, 1);

    reader.kill_pid(4242);
    poller.poll_once().await;
    assert_eq!(poller.monitored_count().await, 0);
}

#[tokio::test]
async fn stop_waits_for_the_loop_to_finish() {
    let clock = ManualClock::new();
    let reader = Arc::new(ScriptedUsageReader::new());
    let events = RecordingEventBus::shared();
    let poller = ResourcePoller::new(reader, events, Arc::new(clock));

    poller.start().await;
    poller.stop().await;
    // A stopped poller can be driven manually without panicking.
    poller.poll_once().await;
}

fn fx_payloads(
    events: &RecordingEventBus,
) -> Vec<nasnet_core::events::ResourceWarning> {
    events
        .events_of_type("resource.warning")
        .into_iter()
        .filter_map(|e| match e.payload {
            EventPayload::ResourceWarning(p) => Some(p),
            _ => None,
        })
        .collect()
}
