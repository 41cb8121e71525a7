//! Canonical Flag Sets
//!
//! A [`FlagSet`] is the active-flag list of one shader variant. It is kept
//! sorted by flag *name* at all times, so two evaluations that activate the
//! same flags produce identical sets (and identical hashes) no matter in
//! which order the definitions were visited.
//!
//! Names and values are interned [`Symbol`]s, which keeps cloning cheap and
//! equality a plain integer comparison.
//!
//! ```rust,ignore
//! let mut flags = FlagSet::new();
//! flags.insert("USE_SSAO", None);
//! flags.insert("NUM_SAMPLES", Some("16"));
//!
//! assert_eq!(flags.names(), ["NUM_SAMPLES", "USE_SSAO"]);
//! println!("{}", flags.header());
//! // #define NUM_SAMPLES 16
//! // #define USE_SSAO
//! ```

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::utils::interner::{self, Symbol};

/// Sorted set of active flags, each with an optional define value.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
    flags: Vec<(Symbol, Option<Symbol>)>,
}

impl FlagSet {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { flags: Vec::new() }
    }

    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            flags: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, name: &str) -> Result<usize, usize> {
        self.flags
            .binary_search_by(|&(k, _)| interner::resolve(k).cmp(name))
    }

    /// Inserts or updates a flag, keeping name order.
    pub fn insert(&mut self, name: &str, value: Option<&str>) {
        let key = interner::intern(name);
        let value = value.map(interner::intern);
        match self.position(name) {
            Ok(idx) => self.flags[idx].1 = value,
            Err(idx) => self.flags.insert(idx, (key, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        if let Ok(idx) = self.position(name) {
            self.flags.remove(idx);
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_ok()
    }

    /// Define value of an active flag (`None` for boolean flags or inactive ones).
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&'static str> {
        self.position(name)
            .ok()
            .and_then(|idx| self.flags[idx].1.map(interner::resolve))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flag names in canonical order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.flags.iter().map(|&(k, _)| interner::resolve(k)).collect()
    }

    /// `(name, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&'static str>)> + '_ {
        self.flags
            .iter()
            .map(|&(k, v)| (interner::resolve(k), v.map(interner::resolve)))
    }

    /// Canonical human readable list: `NAME` or `NAME=VALUE`.
    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v}"),
                None => k.to_owned(),
            })
            .collect()
    }

    /// Preprocessor header, one `#define` per flag.
    #[must_use]
    pub fn header(&self) -> String {
        let mut out = String::with_capacity(self.flags.len() * 24);
        for (k, v) in self.iter() {
            out.push_str("#define ");
            out.push_str(k);
            if let Some(v) = v {
                out.push(' ');
                out.push_str(v);
            }
            out.push('\n');
        }
        out
    }

    /// Template context: boolean flags map to `"1"`.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(k, v)| (k.to_owned(), v.unwrap_or("1").to_owned()))
            .collect()
    }

    /// Content hash (order-independent by construction).
    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        use std::hash::BuildHasher;

        rustc_hash::FxBuildHasher.hash_one(self)
    }
}

impl Hash for FlagSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.flags.hash(state);
    }
}

impl PartialEq for FlagSet {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
    }
}

impl Eq for FlagSet {}

impl From<&[(&str, Option<&str>)]> for FlagSet {
    fn from(flags: &[(&str, Option<&str>)]) -> Self {
        let mut result = Self::with_capacity(flags.len());
        for (k, v) in flags {
            result.insert(k, *v);
        }
        result
    }
}
