// Shared fixtures for the binding integration tests.
//
// `Shape` is a native class with one virtual method (`area`) and
// `Measurable` a native interface with two (`area`, `perimeter`). Both
// expose the layer traits a Rust subclass needs to override them. `Person`
// and `Square` are the subclasses most tests build on.

#![allow(dead_code)]

use objbridge::prelude::*;
use objbridge::{
    IsSubclassable, LayerClaim, Layers, Member, PropertyDecl, class_vfunc, instance_of_raw, layer_defines,
};
use objbridge_log::FatalMode;
use objbridge_rt::{
    Instance, TypeClass, TypeInfo, TypeInterface, interface_install_property, register_interface, register_static,
};
use parking_lot::Mutex;
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Makes fatal reports panic instead of aborting the test binary.
pub fn fatal_panics() {
    objbridge_log::set_fatal_mode(FatalMode::Panic);
}

pub type AreaFn = unsafe extern "C" fn(*mut Instance) -> f64;

/// First virtual slot past the root class's.
pub fn area_slot() -> usize {
    Type::OBJECT.query().map_or(0, |q| q.class_size)
}

unsafe extern "C" fn shape_default_area(_obj: *mut Instance) -> f64 {
    -1.0
}

unsafe extern "C" fn shape_class_init(klass: *mut TypeClass, _data: *mut c_void) {
    // SAFETY: exclusively owned during class init
    unsafe { (*klass).set_vfunc(area_slot(), Some(shape_default_area as AreaFn)) };
}

pub fn shape_type() -> Type {
    static TYPE: OnceLock<Type> = OnceLock::new();
    *TYPE.get_or_init(|| {
        let q = Type::OBJECT.query().unwrap();
        register_static(
            Type::OBJECT,
            "BridgeTestShape",
            &TypeInfo {
                class_size: q.class_size + 1,
                instance_size: q.instance_size,
                class_init: Some(shape_class_init),
                ..TypeInfo::default()
            },
        )
        .unwrap()
    })
}

/// Calls `area` the way native code would.
pub fn shape_area(obj: &Object) -> f64 {
    // SAFETY: obj is a live shape; the slot holds an AreaFn
    unsafe {
        match class_vfunc::<AreaFn>(obj.as_ptr(), area_slot()) {
            Some(f) => f(obj.as_ptr()),
            None => f64::NAN,
        }
    }
}

/// Handle type for the native shape class.
pub struct Shape;

impl StaticType for Shape {
    fn static_type() -> Type {
        shape_type()
    }
}

pub const SHAPE_LAYER: &str = "shape";

pub trait ShapeImpl: ObjectSubclass {
    const AREA: Option<fn(&Self) -> f64> = None;
}

unsafe extern "C" fn shape_area_trampoline<T: ShapeImpl>(obj: *mut Instance) -> f64 {
    // SAFETY: the runtime calls us on a live instance
    let imp = unsafe { instance_of_raw(obj) }.and_then(|bridge| bridge.downcast_ref::<T>());
    match (imp, <T as ShapeImpl>::AREA) {
        (Some(imp), Some(area)) => area(imp),
        _ => f64::NAN,
    }
}

unsafe impl<T: ShapeImpl> IsSubclassable<T> for Shape {
    const LAYERS: Layers = <Object as IsSubclassable<T>>::LAYERS.with(LayerClaim::new(
        SHAPE_LAYER,
        &["area"],
        <T as ShapeImpl>::AREA.is_some() as u64,
    ));

    fn class_init(klass: &mut TypeClass) {
        <Object as IsSubclassable<T>>::class_init(klass);
        if layer_defines::<T>(SHAPE_LAYER, "area") {
            // SAFETY: readers of the slot use AreaFn
            unsafe { klass.set_vfunc(area_slot(), Some(shape_area_trampoline::<T> as AreaFn)) };
        }
    }
}

pub const MEASURABLE_LAYER: &str = "measurable";
pub const MEASURABLE_AREA: usize = 0;
pub const MEASURABLE_PERIMETER: usize = 1;

pub fn measurable_type() -> Type {
    static TYPE: OnceLock<Type> = OnceLock::new();
    *TYPE.get_or_init(|| {
        let ty = register_interface("BridgeTestMeasurable", 2, None).unwrap();
        interface_install_property(
            ty,
            ParamSpec::string("unit", "Unit", "Unit of length", Some("m"), ParamFlags::READWRITE),
        )
        .unwrap();
        ty
    })
}

/// Calls one of the interface's methods the way native code would.
/// `None` when the class leaves the slot empty.
pub fn measure(obj: &Object, slot: usize) -> Option<f64> {
    let iface = obj.class().interface(measurable_type())?;
    // SAFETY: both slots hold AreaFn-shaped methods
    let f = unsafe { iface.vfunc::<AreaFn>(slot) }?;
    // SAFETY: obj is live
    Some(unsafe { f(obj.as_ptr()) })
}

/// Handle type for the native interface.
pub struct Measurable;

pub trait MeasurableImpl: ObjectSubclass {
    const AREA: Option<fn(&Self) -> f64> = None;
    const PERIMETER: Option<fn(&Self) -> f64> = None;
}

unsafe extern "C" fn measurable_trampoline<T: MeasurableImpl, const SLOT: usize>(obj: *mut Instance) -> f64 {
    let method = match SLOT {
        MEASURABLE_AREA => <T as MeasurableImpl>::AREA,
        _ => <T as MeasurableImpl>::PERIMETER,
    };
    // SAFETY: the runtime calls us on a live instance
    let imp = unsafe { instance_of_raw(obj) }.and_then(|bridge| bridge.downcast_ref::<T>());
    match (imp, method) {
        (Some(imp), Some(f)) => f(imp),
        _ => f64::NAN,
    }
}

unsafe impl<T: MeasurableImpl> IsImplementable<T> for Measurable {
    const CLAIM: LayerClaim = LayerClaim::new(
        MEASURABLE_LAYER,
        &["area", "perimeter"],
        (<T as MeasurableImpl>::AREA.is_some() as u64) | ((<T as MeasurableImpl>::PERIMETER.is_some() as u64) << 1),
    );

    fn interface_type() -> Type {
        measurable_type()
    }

    fn interface_init(iface: &mut TypeInterface) {
        // SAFETY: readers of both slots use AreaFn
        unsafe {
            if layer_defines::<T>(MEASURABLE_LAYER, "area") {
                iface.set_vfunc(MEASURABLE_AREA, Some(measurable_trampoline::<T, MEASURABLE_AREA> as AreaFn));
            }
            if layer_defines::<T>(MEASURABLE_LAYER, "perimeter") {
                iface.set_vfunc(
                    MEASURABLE_PERIMETER,
                    Some(measurable_trampoline::<T, MEASURABLE_PERIMETER> as AreaFn),
                );
            }
        }
    }
}

/// A named subclass of the root object with a bounded `age`, a `name` and
/// a `birthday` signal.
pub struct Person {
    pub age: Property<i32>,
    pub name: Property<Option<String>>,
    pub birthday: Signal<(i32,)>,
    pub constructed: AtomicBool,
    pub on_dispose: Mutex<Option<Arc<AtomicBool>>>,
}

impl Person {
    fn mark_constructed(&self) {
        self.constructed.store(true, Ordering::SeqCst);
    }

    fn run_dispose(&self) {
        if let Some(flag) = self.on_dispose.lock().take() {
            flag.store(true, Ordering::SeqCst);
        }
    }
}

impl ObjectImpl for Person {
    const CONSTRUCTED: Option<fn(&Self)> = Some(Person::mark_constructed);
    const DISPOSE: Option<fn(&Self)> = Some(Person::run_dispose);
}

impl ObjectSubclass for Person {
    const NAME: Option<&'static str> = Some("BridgeTestPerson");
    type ParentClass = Object;
    type Interfaces = ();

    fn new(cx: &Construct) -> objbridge::Result<Self> {
        Ok(Person {
            age: Property::new(
                cx,
                ParamSpec::int("age", "Age", "Age in years", 0, 100, 10, ParamFlags::READWRITE | ParamFlags::CONSTRUCT),
            )?,
            name: Property::new(cx, ParamSpec::string("name", "Name", "Full name", None, ParamFlags::READWRITE))?,
            birthday: Signal::new(cx, "birthday", SignalFlags::RUN_LAST)?,
            constructed: AtomicBool::new(false),
            on_dispose: Mutex::new(None),
        })
    }

    fn members(&self, m: &mut Members) {
        self.age.bind(m);
        self.name.bind(m);
        self.birthday.bind(m);
    }
}

/// An unnamed subclass of [`Shape`] that also implements [`Measurable`].
/// Both layers see an `area` override; the shape layer owns it.
pub struct Square {
    pub side: Property<f64>,
    pub unit: Property<Option<String>>,
}

impl Square {
    fn area(&self) -> f64 {
        let side = self.side.get();
        side * side
    }

    fn perimeter(&self) -> f64 {
        4.0 * self.side.get()
    }
}

impl ObjectImpl for Square {}

impl ShapeImpl for Square {
    const AREA: Option<fn(&Self) -> f64> = Some(Square::area);
}

impl MeasurableImpl for Square {
    const AREA: Option<fn(&Self) -> f64> = Some(Square::area);
    const PERIMETER: Option<fn(&Self) -> f64> = Some(Square::perimeter);
}

impl ObjectSubclass for Square {
    const DEFINES: &'static [Member] = &[Member::new(SHAPE_LAYER, "area")];
    type ParentClass = Shape;
    type Interfaces = (Measurable,);

    fn new(cx: &Construct) -> objbridge::Result<Self> {
        Ok(Square {
            side: Property::new(
                cx,
                ParamSpec::double("side", "Side", "Edge length", 0.0, 1e6, 1.0, ParamFlags::READWRITE),
            )?,
            unit: Property::override_(cx, "unit")?,
        })
    }

    fn members(&self, m: &mut Members) {
        self.side.bind(m);
        self.unit.bind(m);
    }

    fn properties() -> Vec<PropertyDecl> {
        vec![PropertyDecl::overriding("unit")]
    }
}
