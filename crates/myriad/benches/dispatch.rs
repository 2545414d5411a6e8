// Dispatch and mirroring benchmarks for the Myriad runtime
//
// These benchmarks measure:
// - Allocation through the constructor chain
// - Slot dispatch for compartment simulation
// - Hierarchy walks in is_instance_of
// - Instance mirroring to the simulated device

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use myriad::model::{
    self, CompartmentInit, LeakInit, MechanismInit, SomaInit, new_leak, new_soma, step_network,
};
use myriad::runtime::{SimDevice, dispatch, mirror_all};

fn soma_init(id: u64, steps: usize) -> SomaInit {
    SomaInit {
        compartment: CompartmentInit {
            id,
            mechanisms: Vec::new(),
        },
        steps,
        vm0: -65.0,
        cm: 1.0,
    }
}

/// Benchmark allocating and destroying instances through the full
/// constructor and destructor chains.
fn bench_new_destruct(c: &mut Criterion) {
    let mut group = c.benchmark_group("new_destruct");

    for steps in &[16usize, 1024] {
        group.bench_with_input(BenchmarkId::new("soma", steps), steps, |b, &steps| {
            b.iter(|| {
                let soma = new_soma(black_box(&soma_init(0, steps))).unwrap();
                dispatch::destruct(soma.object()).unwrap();
            });
        });
    }

    group.bench_function("leak", |b| {
        b.iter(|| {
            let leak = new_leak(black_box(&LeakInit::default())).unwrap();
            dispatch::destruct(leak).unwrap();
        });
    });

    group.finish();
}

/// Benchmark one network step, which dispatches `simulate` per compartment
/// and the mechanism function per attached mechanism.
fn bench_step_network(c: &mut Criterion) {
    let mut group = c.benchmark_group("step_network");

    for size in &[1usize, 16, 128] {
        let steps = 1024;
        let somas: Vec<_> = (0..*size)
            .map(|id| new_soma(&soma_init(id as u64, steps)).unwrap())
            .collect();
        for soma in &somas {
            let leak = new_leak(&LeakInit {
                mechanism: MechanismInit {
                    source_id: soma.id(),
                },
                g_leak: 0.1,
                e_rev: -70.0,
            })
            .unwrap();
            soma.add_mechanism(leak).unwrap();
        }
        let network: Vec<_> = somas.iter().map(|soma| soma.object()).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &network, |b, network| {
            let mut step = 1;
            b.iter(|| {
                step_network(black_box(network), 0.01, step).unwrap();
                step = step % (steps - 1) + 1;
            });
        });
    }

    group.finish();
}

/// Benchmark the hierarchy walk for a hit at the top of the chain and a
/// miss that walks to the root.
fn bench_is_instance_of(c: &mut Criterion) {
    let soma = new_soma(&soma_init(0, 1)).unwrap();
    let object = soma.object();
    let compartment = model::compartment::init_compartment().unwrap();
    let leak = model::leak::init_leak().unwrap();

    c.bench_function("is_instance_of_hit", |b| {
        b.iter(|| black_box(object).is_instance_of(black_box(compartment)));
    });
    c.bench_function("is_instance_of_miss", |b| {
        b.iter(|| black_box(object).is_instance_of(black_box(leak)));
    });
}

/// Benchmark mirroring a soma with an owned trace to the device.
fn bench_mirror_instance(c: &mut Criterion) {
    let device = SimDevice::default();
    model::load_device_functions(&device);
    model::soma::init_soma().unwrap();
    mirror_all(&device).unwrap();

    let soma = new_soma(&soma_init(0, 256)).unwrap();
    c.bench_function("mirror_soma", |b| {
        b.iter(|| {
            // Instance mirrors only record the class address, so dropping
            // the class copies between batches is harmless here.
            if device.memory().stats().used > 32 << 20 {
                device.memory().reset();
            }
            soma.object().mirror(black_box(&device)).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_new_destruct,
    bench_step_network,
    bench_is_instance_of,
    bench_mirror_instance,
);
criterion_main!(benches);
