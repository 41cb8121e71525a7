use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use super::value::StateValue;

/// Path into a state snapshot, e.g. `material.baseColorTexture`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StatePath(SmallVec<[String; 4]>);

impl StatePath {
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parses a dotted path (`"camera.exposure"`).
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        Self::new(dotted.split('.').filter(|s| !s.is_empty()))
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every non-empty prefix, shortest first (the path itself included).
    pub fn prefixes(&self) -> impl Iterator<Item = StatePath> + '_ {
        (1..=self.0.len()).map(|n| StatePath(self.0[..n].iter().cloned().collect()))
    }
}

impl fmt::Display for StatePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for StatePath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

impl<const N: usize> From<[&str; N]> for StatePath {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

impl From<&[&str]> for StatePath {
    fn from(segments: &[&str]) -> Self {
        Self::new(segments.iter().copied())
    }
}

/// Read-only, path-addressed view of component state for one frame.
///
/// Producers (scene, material, camera, post-processing settings) contribute
/// top-level maps; flag definitions read leaves through [`StatePath`]s.
/// A path that does not resolve yields `None`, never an implicit `false`:
/// whether "absent" counts as inactive is decided by the flag evaluator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateSnapshot {
    root: BTreeMap<String, StateValue>,
}

impl StateSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from a JSON object. Non-object input yields an empty snapshot.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        match StateValue::from(json) {
            StateValue::Map(root) => Self { root },
            _ => Self::default(),
        }
    }

    /// Resolves `path`, returning `None` when any segment is missing.
    #[must_use]
    pub fn get(&self, path: &StatePath) -> Option<&StateValue> {
        let (first, rest) = path.segments().split_first()?;
        let mut current = self.root.get(first)?;
        for segment in rest {
            current = current.as_map()?.get(segment)?;
        }
        Some(current)
    }

    /// Sets `path`, creating intermediate maps and replacing non-map values on the way.
    pub fn set(&mut self, path: impl Into<StatePath>, value: impl Into<StateValue>) {
        let path = path.into();
        insert_at(&mut self.root, path.segments(), value.into());
    }

    /// Chainable [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, path: impl Into<StatePath>, value: impl Into<StateValue>) -> Self {
        self.set(path, value);
        self
    }

    /// Every path present in the snapshot (maps and leaves).
    #[must_use]
    pub fn paths(&self) -> Vec<StatePath> {
        fn walk(prefix: &mut Vec<String>, value: &StateValue, out: &mut Vec<StatePath>) {
            out.push(StatePath::new(prefix.iter().cloned()));
            if let StateValue::Map(map) = value {
                for (key, child) in map {
                    prefix.push(key.clone());
                    walk(prefix, child, out);
                    prefix.pop();
                }
            }
        }

        let mut out = Vec::new();
        let mut prefix = Vec::new();
        for (key, value) in &self.root {
            prefix.push(key.clone());
            walk(&mut prefix, value, &mut out);
            prefix.pop();
        }
        out
    }
}

/// Closed set of paths producers promise to provide.
///
/// Flag tables are validated against the schema once, when they are built,
/// so a typo in a definition path is a configuration error at startup
/// instead of a flag that silently never turns on.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    known: FxHashSet<StatePath>,
}

impl StateSchema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `path` and all of its prefixes.
    pub fn insert(&mut self, path: impl Into<StatePath>) {
        let path = path.into();
        for prefix in path.prefixes() {
            self.known.insert(prefix);
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<StatePath>) -> Self {
        self.insert(path);
        self
    }

    /// Schema describing exactly the paths of a representative snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &StateSnapshot) -> Self {
        let mut schema = Self::new();
        for path in snapshot.paths() {
            schema.known.insert(path);
        }
        schema
    }

    #[must_use]
    pub fn contains(&self, path: &StatePath) -> bool {
        self.known.contains(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

fn insert_at(map: &mut BTreeMap<String, StateValue>, segments: &[String], value: StateValue) {
    match segments {
        [] => {}
        [last] => {
            map.insert(last.clone(), value);
        }
        [first, rest @ ..] => {
            let entry = map
                .entry(first.clone())
                .or_insert_with(|| StateValue::Map(BTreeMap::new()));
            if let StateValue::Map(inner) = entry {
                insert_at(inner, rest, value);
            } else {
                let mut inner = BTreeMap::new();
                insert_at(&mut inner, rest, value);
                *entry = StateValue::Map(inner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested() {
        let snapshot = StateSnapshot::from_json(json!({ "a": { "b": true, "c": 2 } }));
        assert_eq!(snapshot.get(&"a.b".into()), Some(&StateValue::Bool(true)));
        assert_eq!(snapshot.get(&["a", "c"].into()), Some(&StateValue::Int(2)));
        assert_eq!(snapshot.get(&"a.d".into()), None);
        assert_eq!(snapshot.get(&"a.b.c".into()), None);
    }

    #[test]
    fn test_set_creates_maps() {
        let snapshot = StateSnapshot::new()
            .with("camera.exposure", 1.5)
            .with("camera.toneMap", "aces");
        assert_eq!(
            snapshot.get(&"camera.exposure".into()),
            Some(&StateValue::Float(1.5))
        );
        let overwritten = snapshot.with("camera.exposure.value", 2.0);
        assert_eq!(
            overwritten.get(&"camera.exposure.value".into()),
            Some(&StateValue::Float(2.0))
        );
    }

    #[test]
    fn test_set_replaces_leaves_along_the_path() {
        let mut snapshot = StateSnapshot::new().with("post.bloom", true).with("post.fxaa", 1);
        snapshot.set("post.bloom.strength.value", 0.5);
        assert_eq!(
            snapshot.get(&"post.bloom.strength.value".into()),
            Some(&StateValue::Float(0.5))
        );
        assert_eq!(snapshot.get(&"post.fxaa".into()), Some(&StateValue::Int(1)));

        snapshot.set("post", "flat");
        assert_eq!(snapshot.get(&"post".into()), Some(&StateValue::from("flat")));
        assert_eq!(snapshot.get(&"post.fxaa".into()), None);
    }

    #[test]
    fn test_schema_from_snapshot() {
        let snapshot = StateSnapshot::from_json(json!({ "material": { "blend": false } }));
        let schema = StateSchema::from_snapshot(&snapshot);
        assert!(schema.contains(&"material".into()));
        assert!(schema.contains(&"material.blend".into()));
        assert!(!schema.contains(&"material.blnd".into()));
    }
}
