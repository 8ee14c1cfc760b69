//! Which layer defines which virtual member.
//!
//! A subclass is built from layers: its parent class chain and each
//! interface it implements. Every layer lists the virtual members it can
//! dispatch to Rust and reports which of them the subclass actually
//! defines. When two layers both see a definition for the same member name
//! (say `dispose` on the object layer and on an interface), the subclass
//! must say which layer owns it through `DEFINES`; otherwise registration
//! fails to compile.
//!
//! Everything here is `const`, so the check runs at monomorphization.

/// One member owned by one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    pub layer: &'static str,
    pub name: &'static str,
}

impl Member {
    pub const fn new(layer: &'static str, name: &'static str) -> Self {
        Member { layer, name }
    }
}

/// What one layer can dispatch, and what the subclass defines of it.
///
/// Bit `i` of `detected` is set when the subclass defines `members[i]`.
#[derive(Debug, Clone, Copy)]
pub struct LayerClaim {
    pub layer: &'static str,
    pub members: &'static [&'static str],
    pub detected: u64,
}

impl LayerClaim {
    pub const fn new(layer: &'static str, members: &'static [&'static str], detected: u64) -> Self {
        LayerClaim {
            layer,
            members,
            detected,
        }
    }

    const fn detects(&self, name: &str) -> bool {
        let mut i = 0;
        while i < self.members.len() {
            if str_eq(self.members[i], name) {
                return self.detected & (1 << i) != 0;
            }
            i += 1;
        }
        false
    }

    const fn declares(&self, name: &str) -> bool {
        let mut i = 0;
        while i < self.members.len() {
            if str_eq(self.members[i], name) {
                return true;
            }
            i += 1;
        }
        false
    }
}

/// Largest number of layers one subclass can stack.
pub const MAX_LAYERS: usize = 8;

/// The layers of one subclass, parent chain first.
#[derive(Debug, Clone, Copy)]
pub struct Layers {
    claims: [Option<LayerClaim>; MAX_LAYERS],
    len: usize,
}

impl Layers {
    pub const EMPTY: Layers = Layers {
        claims: [None; MAX_LAYERS],
        len: 0,
    };

    /// # Panics
    ///
    /// At compile time, past [`MAX_LAYERS`].
    pub const fn with(mut self, claim: LayerClaim) -> Self {
        assert!(self.len < MAX_LAYERS, "too many layers");
        self.claims[self.len] = Some(claim);
        self.len += 1;
        self
    }

    pub const fn concat(mut self, other: Layers) -> Self {
        let mut i = 0;
        while i < other.len {
            if let Some(claim) = other.claims[i] {
                self = self.with(claim);
            }
            i += 1;
        }
        self
    }

    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    const fn get(&self, i: usize) -> Option<&LayerClaim> {
        if i < self.len { self.claims[i].as_ref() } else { None }
    }

    const fn find(&self, layer: &str) -> Option<&LayerClaim> {
        let mut i = 0;
        while let Some(claim) = self.get(i) {
            if str_eq(claim.layer, layer) {
                return Some(claim);
            }
            i += 1;
        }
        None
    }

    const fn detections(&self, name: &str) -> usize {
        let mut n = 0;
        let mut i = 0;
        while let Some(claim) = self.get(i) {
            if claim.detects(name) {
                n += 1;
            }
            i += 1;
        }
        n
    }
}

pub(crate) const fn str_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    let mut i = 0;
    while i < a.len() {
        if a[i] != b[i] {
            return false;
        }
        i += 1;
    }
    true
}

const fn explicit_owner(defines: &[Member], name: &str) -> Option<&'static str> {
    let mut i = 0;
    while i < defines.len() {
        if str_eq(defines[i].name, name) {
            return Some(defines[i].layer);
        }
        i += 1;
    }
    None
}

/// Rejects ambiguous definitions.
///
/// # Panics
///
/// At compile time when a member is detected in more than one layer
/// without a `DEFINES` entry, when `DEFINES` names a member twice, or when
/// it names a member its layer does not declare.
pub const fn check(layers: &Layers, defines: &[Member]) {
    let mut d = 0;
    while d < defines.len() {
        let entry = defines[d];
        match layers.find(entry.layer) {
            Some(claim) if claim.declares(entry.name) => {}
            _ => panic!("DEFINES names a member its layer does not declare"),
        }
        let mut e = d + 1;
        while e < defines.len() {
            if str_eq(defines[e].name, entry.name) {
                panic!("DEFINES names the same member twice");
            }
            e += 1;
        }
        d += 1;
    }

    let mut i = 0;
    while let Some(claim) = layers.get(i) {
        let mut m = 0;
        while m < claim.members.len() {
            let name = claim.members[m];
            if layers.detections(name) > 1 && explicit_owner(defines, name).is_none() {
                panic!("a member is defined for more than one layer; name its owner in DEFINES");
            }
            m += 1;
        }
        i += 1;
    }
}

/// Whether `layer` should dispatch `member` to the subclass.
///
/// An explicit `DEFINES` entry wins; otherwise the layer's own detection
/// decides.
pub const fn defines(layers: &Layers, entries: &[Member], layer: &str, member: &str) -> bool {
    match explicit_owner(entries, member) {
        Some(owner) => str_eq(owner, layer),
        None => match layers.find(layer) {
            Some(claim) => claim.detects(member),
            None => false,
        },
    }
}
