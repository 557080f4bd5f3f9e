//! Benchmarks Agent Registry capability lookup and selection under a large
//! agent population (spec.md §4.2 "Selection").

use std::sync::Arc;

use agentmesh_core::domain_types::{AgentId, CapabilityName};
use agentmesh_core::event_bus::EventBusImpl;
use agentmesh_core::ports::clock::SystemClock;
use agentmesh_core::ports::Clock;
use agentmesh_core::registry::{AgentRegistryImpl, RegistryConfig};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn populated_registry(agents_per_capability: usize) -> (Arc<AgentRegistryImpl>, CapabilityName) {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let bus = EventBusImpl::new(Default::default(), Arc::clone(&clock));
    let registry = AgentRegistryImpl::new(RegistryConfig::default(), clock, bus);

    let target = CapabilityName::try_new("weather.get").unwrap();
    for i in 0..agents_per_capability {
        let caps = [
            target.clone(),
            CapabilityName::try_new(format!("capability{i}")).unwrap(),
        ]
        .into_iter()
        .collect();
        registry.register(AgentId::generate(), caps, "bench-agent".to_string()).unwrap();
    }
    (registry, target)
}

fn bench_find_by_capability(c: &mut Criterion) {
    let (registry, cap) = populated_registry(500);
    c.bench_function("registry_find_by_capability_500_agents", |b| {
        b.iter(|| black_box(registry.find_by_capability(&cap)));
    });
}

fn bench_select_for_capability(c: &mut Criterion) {
    let (registry, cap) = populated_registry(500);
    c.bench_function("registry_select_for_capability_500_agents", |b| {
        b.iter(|| black_box(registry.select_for_capability(&cap, &|_| false)));
    });
}

fn bench_match_plan(c: &mut Criterion) {
    let (registry, cap) = populated_registry(500);
    let required: std::collections::BTreeSet<CapabilityName> = [cap].into_iter().collect();
    c.bench_function("registry_match_plan_single_capability_500_agents", |b| {
        b.iter(|| black_box(registry.match_plan(&required, |_| false)));
    });
}

criterion_group!(benches, bench_find_by_capability, bench_select_for_capability, bench_match_plan);
criterion_main!(benches);
