//! Typed by-name access to one property of an instance.

use crate::error::{Error, Result};
use crate::property::PropertyValue;
use objbridge_rt::{HandlerId, Object, ParamSpec, StaticType};
use std::fmt;
use std::marker::PhantomData;

/// A property of one instance, read and written through the runtime, so
/// class dispatch, validation and `notify` all apply.
pub struct PropertyProxy<V> {
    object: Object,
    spec: ParamSpec,
    _marker: PhantomData<fn() -> V>,
}

impl<V: PropertyValue> PropertyProxy<V> {
    /// Looks `name` up on `object`'s class.
    ///
    /// # Errors
    ///
    /// [`objbridge_rt::Error::PropertyNotFound`] for an unknown name,
    /// [`Error::SlotTypeMismatch`] if the property does not hold `V`.
    pub fn new(object: &Object, name: &str) -> Result<Self> {
        let spec = object
            .class()
            .find_property(name)
            .ok_or_else(|| objbridge_rt::Error::PropertyNotFound {
                type_name: object.type_().name().to_string(),
                name: name.to_string(),
            })?;
        if !spec.value_type().is_a(V::static_type()) {
            return Err(Error::SlotTypeMismatch {
                name: spec.name().to_string(),
                spec_type: spec.value_type().name(),
                slot_type: std::any::type_name::<V>(),
            });
        }
        Ok(Self::from_spec(object.clone(), spec))
    }

    pub(crate) fn from_spec(object: Object, spec: ParamSpec) -> Self {
        PropertyProxy {
            object,
            spec,
            _marker: PhantomData,
        }
    }

    /// # Errors
    ///
    /// Access errors from the runtime.
    pub fn get(&self) -> Result<V> {
        Ok(self.object.property_value::<V>(self.spec.name())?)
    }

    /// Sets the property and emits `notify`.
    ///
    /// # Errors
    ///
    /// Access and validation errors from the runtime.
    pub fn set(&self, value: V) -> Result<()> {
        Ok(self.object.set_property(self.spec.name(), value)?)
    }

    /// Calls `f` with the new value after every change.
    ///
    /// # Errors
    ///
    /// Connection errors from the runtime.
    pub fn connect_notify<F>(&self, f: F) -> Result<HandlerId>
    where
        F: Fn(&Object, V) + Send + Sync + 'static,
    {
        let name = self.spec.name().to_string();
        Ok(self.object.connect_notify(Some(&name), move |obj, spec| {
            if let Ok(value) = obj.property_value::<V>(spec.name()) {
                f(obj, value);
            }
        })?)
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn spec(&self) -> &ParamSpec {
        &self.spec
    }

    pub fn object(&self) -> &Object {
        &self.object
    }
}

impl<V> fmt::Debug for PropertyProxy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyProxy")
            .field("object", &self.object)
            .field("name", &self.spec.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objbridge_rt::{ParamFlags, Type, TypeInfo, class_ref, register_static};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn test_proxy_on_native_property() {
        let q = Type::OBJECT.query().unwrap();
        let ty = register_static(
            Type::OBJECT,
            "ProxyTestNative",
            &TypeInfo {
                class_size: q.class_size,
                instance_size: q.instance_size,
                ..TypeInfo::default()
            },
        )
        .unwrap();
        let spec = ParamSpec::int("level", "", "", 0, 5, 1, ParamFlags::READWRITE);
        class_ref(ty).unwrap().install_property(1, spec).unwrap();
        let obj = Object::new(ty, &[]).unwrap();

        assert!(matches!(
            PropertyProxy::<bool>::new(&obj, "level"),
            Err(Error::SlotTypeMismatch { .. })
        ));
        assert!(PropertyProxy::<i32>::new(&obj, "missing").is_err());

        let proxy = PropertyProxy::<i32>::new(&obj, "level").unwrap();
        assert_eq!(proxy.name(), "level");
        assert_eq!(proxy.spec().value_type(), Type::INT);
        assert!(ptr_eq(proxy.object(), &obj));

        let seen = Arc::new(AtomicI32::new(-1));
        let seen2 = seen.clone();
        proxy
            .connect_notify(move |_, v| seen2.store(v, Ordering::SeqCst))
            .unwrap();
        // the default dispatch stores nothing, but notify still fires
        proxy.set(3).unwrap();
        assert_ne!(seen.load(Ordering::SeqCst), -1);
    }

    fn ptr_eq(a: &Object, b: &Object) -> bool {
        a.as_ptr() == b.as_ptr()
    }
}
