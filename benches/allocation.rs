//! Port allocation throughput benchmark against the in-memory store.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use tokio::runtime::Runtime;

use nasnet_core::storage::{MemoryPortAllocationStore, MemoryServiceInstanceStore};
use nasnet_core::time_provider::SystemClock;
use nasnet_core::{InstanceId, PortProtocol, PortRegistry, RouterId, ServiceType};

fn bench_port_allocation(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("port_allocation");
    group.sample_size(50);

    group.bench_function("allocate_release_cycle", |b| {
        let registry = rt.block_on(async {
            PortRegistry::new(
                MemoryPortAllocationStore::shared(),
                MemoryServiceInstanceStore::shared(),
                SystemClock::shared(),
            )
            .await
            .unwrap()
        });
        let registry = Arc::new(registry);
        let router = RouterId::try_new("bench-router".to_string()).unwrap();
        let service = ServiceType::try_new("tor".to_string()).unwrap();

        b.to_async(&rt).iter(|| {
            let registry = registry.clone();
            let router = router.clone();
            let service = service.clone();
            async move {
                let lease = registry
                    .allocate_port(
                        &router,
                        InstanceId::generate(),
                        &service,
                        PortProtocol::Tcp,
                        None,
                    )
                    .await
                    .unwrap();
                registry
                    .release_port(&router, lease.port, PortProtocol::Tcp)
                    .await
                    .unwrap();
                black_box(lease.port);
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_port_allocation);
criterion_main!(benches);
