//! Interned string keys.
//!
//! A [`Quark`] is a process-wide unique 32-bit id for a string. Quarks key
//! every side table in the runtime: instance data, property spec data, type
//! data and signal details.
//!
//! # Examples
//!
//! ```
//! use objbridge_rt::Quark;
//!
//! let a = Quark::from_string("OBJBRIDGE_OBJECT");
//! let b = Quark::from_string("OBJBRIDGE_OBJECT");
//!
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "OBJBRIDGE_OBJECT");
//! assert_eq!(Quark::try_string("never-interned-key"), None);
//! ```

use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::OnceLock;

/// An interned string.
///
/// Quarks are never freed. Equality and hashing are O(1) on the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quark(u32);

/// Global quark table.
///
/// Strings are leaked on first interning; the table only ever grows.
struct QuarkTable {
    by_name: FxHashMap<&'static str, Quark>,
    names: Vec<&'static str>,
}

static TABLE: OnceLock<RwLock<QuarkTable>> = OnceLock::new();

fn table() -> &'static RwLock<QuarkTable> {
    TABLE.get_or_init(|| {
        RwLock::new(QuarkTable {
            by_name: FxHashMap::default(),
            // id 0 is never handed out
            names: vec![""],
        })
    })
}

impl Quark {
    /// Returns the quark for `s`, interning it if needed.
    ///
    /// # Thread Safety
    ///
    /// Concurrent callers interning the same string get the same quark.
    pub fn from_string(s: &str) -> Quark {
        let table = table();

        // Fast path: read lock only
        if let Some(&quark) = table.read().by_name.get(s) {
            return quark;
        }

        let mut table = table.write();

        // Another thread may have interned it while we waited
        if let Some(&quark) = table.by_name.get(s) {
            return quark;
        }

        let name: &'static str = Box::leak(s.to_owned().into_boxed_str());
        let quark = Quark(table.names.len() as u32);
        table.names.push(name);
        table.by_name.insert(name, quark);
        quark
    }

    /// Returns the quark for `s` only if it was interned before.
    pub fn try_string(s: &str) -> Option<Quark> {
        table().read().by_name.get(s).copied()
    }

    /// Returns the interned string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        table().read().names.get(self.0 as usize).copied().unwrap_or("")
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Quark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_quark_interning() {
        let a = Quark::from_string("quark-test-interning");
        let b = Quark::from_string("quark-test-interning");
        let c = Quark::from_string("quark-test-other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a.as_u32(), 0);
    }

    #[test]
    fn test_quark_try_string() {
        assert_eq!(Quark::try_string("quark-test-absent"), None);
        let q = Quark::from_string("quark-test-present");
        assert_eq!(Quark::try_string("quark-test-present"), Some(q));
    }

    #[test]
    fn test_quark_display() {
        let q = Quark::from_string("notify");
        assert_eq!(q.to_string(), "notify");
    }

    #[test]
    fn test_quark_thread_safety() {
        let handles: Vec<_> = (0..8)
            .map(|_| thread::spawn(|| Quark::from_string("quark-test-shared")))
            .collect();

        let quarks: Vec<Quark> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(quarks.windows(2).all(|w| w[0] == w[1]));
    }
}
