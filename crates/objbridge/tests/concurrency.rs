// Concurrency integration tests
//
// Racing first registrations, concurrent construction from Rust and from
// the runtime, and concurrent property traffic on shared instances.

mod common;

use common::{Person, Square, shape_area};
use objbridge::prelude::*;
use objbridge::{downcast, register_type};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

static RACER_PASSES: AtomicUsize = AtomicUsize::new(0);
static RACER_INSTANCES: AtomicUsize = AtomicUsize::new(0);

struct Racer {
    laps: Property<i64>,
}

impl ObjectImpl for Racer {}

impl ObjectSubclass for Racer {
    const NAME: Option<&'static str> = Some("BridgeTestRacer");
    type ParentClass = Object;
    type Interfaces = ();

    fn new(cx: &Construct) -> objbridge::Result<Self> {
        if cx.is_registration() {
            RACER_PASSES.fetch_add(1, Ordering::SeqCst);
        } else {
            RACER_INSTANCES.fetch_add(1, Ordering::SeqCst);
        }
        Ok(Racer {
            laps: Property::new(
                cx,
                ParamSpec::int64("laps", "", "", 0, i64::MAX, 0, ParamFlags::READWRITE | ParamFlags::CONSTRUCT),
            )?,
        })
    }

    fn members(&self, m: &mut Members) {
        self.laps.bind(m);
    }
}

#[test]
fn test_racing_registration_happens_once() {
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let ty = register_type::<Racer>().unwrap();
                let racer = RefPtr::<Racer>::new(&ConstructParams::new().with("laps", i as i64)).unwrap();
                assert_eq!(racer.laps.get(), i as i64);
                ty
            })
        })
        .collect();

    let types: Vec<Type> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert!(types.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(RACER_PASSES.load(Ordering::SeqCst), 1);
    assert_eq!(RACER_INSTANCES.load(Ordering::SeqCst), THREADS);
}

#[test]
fn test_concurrent_static_first_construction() {
    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            thread::spawn(move || {
                let side = (i + 1) as f64;
                let square = RefPtr::<Square>::new(&ConstructParams::new().with("side", side)).unwrap();
                assert_eq!(shape_area(square.object()), side * side);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_concurrent_native_first_construction() {
    let ty = register_type::<Person>().unwrap();
    let workers: Vec<_> = (0..THREADS)
        .map(|i| {
            thread::spawn(move || {
                let obj = Object::new(ty, &[("age", Value::Int(i as i32))]).unwrap();
                assert_eq!(downcast::<Person>(&obj).unwrap().age.get(), i as i32);
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn test_concurrent_signal_traffic() {
    let person = RefPtr::<Person>::new(&ConstructParams::new()).unwrap();
    let total = Arc::new(AtomicUsize::new(0));
    let sink = total.clone();
    person
        .birthday
        .connect(move |_, (years,)| {
            sink.fetch_add(years as usize, Ordering::SeqCst);
        })
        .unwrap();

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let person = person.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    person.birthday.emit((1,)).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(total.load(Ordering::SeqCst), THREADS * 100);
}
