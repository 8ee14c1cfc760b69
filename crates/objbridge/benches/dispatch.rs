// Binding dispatch benchmarks
//
// This benchmark suite measures:
// - Property access through the runtime vs. the typed slot
// - Downcasting a native handle to its Rust state
// - Signal emission into typed handlers
// - Construction through each path

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use objbridge::prelude::*;
use objbridge::{downcast, instance_of};

struct Gauge {
    level: Property<i32>,
    tick: Signal<(i32,)>,
}

impl ObjectImpl for Gauge {}

impl ObjectSubclass for Gauge {
    const NAME: Option<&'static str> = Some("BenchGauge");
    type ParentClass = Object;
    type Interfaces = ();

    fn new(cx: &Construct) -> objbridge::Result<Self> {
        Ok(Gauge {
            level: Property::new(cx, ParamSpec::int("level", "", "", 0, 1000, 0, ParamFlags::READWRITE))?,
            tick: Signal::new(cx, "tick", SignalFlags::RUN_LAST)?,
        })
    }

    fn members(&self, m: &mut Members) {
        self.level.bind(m);
        self.tick.bind(m);
    }
}

/// Benchmark property reads and writes, by name and through the slot
fn bench_property_access(c: &mut Criterion) {
    let gauge = RefPtr::<Gauge>::new(&ConstructParams::new()).unwrap();
    let mut group = c.benchmark_group("property");

    group.bench_function("slot_get", |b| b.iter(|| black_box(gauge.level.get())));
    group.bench_function("slot_set", |b| b.iter(|| gauge.level.set_value(black_box(5), false)));
    group.bench_function("runtime_get", |b| {
        b.iter(|| black_box(gauge.object().property_value::<i32>("level").unwrap()))
    });
    group.bench_function("runtime_set", |b| {
        b.iter(|| gauge.object().set_property("level", black_box(7)).unwrap())
    });

    group.finish();
}

/// Benchmark recovering the Rust state from a native handle
fn bench_downcast(c: &mut Criterion) {
    let gauge = RefPtr::<Gauge>::new(&ConstructParams::new()).unwrap();
    let object = gauge.object().clone();
    let mut group = c.benchmark_group("downcast");

    group.bench_function("instance_of", |b| b.iter(|| black_box(instance_of(&object).is_some())));
    group.bench_function("downcast", |b| b.iter(|| black_box(downcast::<Gauge>(&object).is_some())));
    group.bench_function("ref_ptr_cast", |b| b.iter(|| black_box(ref_ptr_cast::<Gauge>(&object))));

    group.finish();
}

/// Benchmark emission with an increasing number of handlers
fn bench_signal_emission(c: &mut Criterion) {
    let mut group = c.benchmark_group("signal_emit");

    for handlers in [0usize, 1, 4, 16] {
        let gauge = RefPtr::<Gauge>::new(&ConstructParams::new()).unwrap();
        for _ in 0..handlers {
            gauge
                .tick
                .connect(|_, (n,)| {
                    black_box(n);
                })
                .unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(handlers), &handlers, |b, _| {
            b.iter(|| gauge.tick.emit(black_box((1,))).unwrap())
        });
    }

    group.finish();
}

/// Benchmark instance creation through each path
fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construct");
    let params = ConstructParams::new().with("level", 3);

    for mode in [ConstructMode::Static, ConstructMode::Native] {
        group.bench_with_input(BenchmarkId::from_parameter(format!("{mode:?}")), &mode, |b, mode| {
            b.iter(|| make_ref::<Gauge>(*mode, &params).unwrap())
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_property_access,
    bench_downcast,
    bench_signal_emission,
    bench_construction
);

criterion_main!(benches);
