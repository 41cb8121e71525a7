//! Flag Definitions & Evaluation
//!
//! A flag definition is a declarative triple `(state path, flag name, options)`.
//! Evaluating a [`FlagTable`] against a [`StateSnapshot`] yields the active
//! [`FlagSet`] (which selects the shader variant) plus a side table of uniform
//! values that definitions with `uniform` metadata pull out of the state.
//!
//! # Evaluation
//!
//! 1. Every definition computes its *raw* predicate from the snapshot alone.
//! 2. Gating runs as a fixpoint over sets until nothing changes:
//!    - a definition whose `requires` flag is not active is dropped;
//!    - every flag named by the `excludes` of an active definition is dropped.
//!
//! Both steps only look at sets, never at the position of a definition in
//! the table, so any permutation of a table yields the same result.
//!
//! # Flag types
//!
//! | Type | Active when | Define |
//! |------|-------------|--------|
//! | `Boolean` | value truthy (or equal to `compare`) | `#define NAME` |
//! | `Value` | value present and scalar | `#define NAME VALUE` |
//! | `Counter` | value is a number (zero included) | `#define NAME N` |
//! | `Texture` | value is a texture handle | `#define NAME` |

use std::collections::BTreeMap;

use rustc_hash::FxHashSet;

use super::defines::FlagSet;
use crate::command::UniformMap;
use crate::errors::{FrameError, Result};
use crate::state::{StatePath, StateSchema, StateSnapshot, StateValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlagType {
    #[default]
    Boolean,
    Value,
    Counter,
    Texture,
}

impl FlagType {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "boolean" => Ok(FlagType::Boolean),
            "value" => Ok(FlagType::Value),
            "counter" => Ok(FlagType::Counter),
            "texture" => Ok(FlagType::Texture),
            other => Err(FrameError::config(format!("unknown flag type '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlagOptions {
    /// Active only when the value equals this (Boolean flags only).
    pub compare: Option<StateValue>,
    /// Dropped unless this flag is active too.
    pub requires: Option<String>,
    /// Removes this flag when active.
    pub excludes: Option<String>,
    pub ty: FlagType,
    /// Uniform populated with the state value, active or not.
    pub uniform: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlagDefinition {
    pub path: StatePath,
    pub flag: String,
    pub options: FlagOptions,
}

impl FlagDefinition {
    pub fn new(path: impl Into<StatePath>, flag: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            flag: flag.into(),
            options: FlagOptions::default(),
        }
    }

    #[must_use]
    pub fn compare(mut self, value: impl Into<StateValue>) -> Self {
        self.options.compare = Some(value.into());
        self
    }

    #[must_use]
    pub fn requires(mut self, flag: impl Into<String>) -> Self {
        self.options.requires = Some(flag.into());
        self
    }

    #[must_use]
    pub fn excludes(mut self, flag: impl Into<String>) -> Self {
        self.options.excludes = Some(flag.into());
        self
    }

    #[must_use]
    pub fn typed(mut self, ty: FlagType) -> Self {
        self.options.ty = ty;
        self
    }

    #[must_use]
    pub fn uniform(mut self, name: impl Into<String>) -> Self {
        self.options.uniform = Some(name.into());
        self
    }

    /// Parses the tuple notation `[["a", "b"], "FLAG", { "requires": "X" }]`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let malformed = |why: &str| FrameError::config(format!("malformed flag definition {value}: {why}"));

        let items = value.as_array().ok_or_else(|| malformed("expected an array"))?;
        if !(2..=3).contains(&items.len()) {
            return Err(malformed("expected [path, flag] or [path, flag, options]"));
        }

        let path = match &items[0] {
            serde_json::Value::String(dotted) => StatePath::parse(dotted),
            serde_json::Value::Array(segments) => StatePath::new(
                segments
                    .iter()
                    .map(|s| s.as_str().ok_or_else(|| malformed("path segments must be strings")))
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => return Err(malformed("path must be a string or an array")),
        };
        let flag = items[1]
            .as_str()
            .ok_or_else(|| malformed("flag name must be a string"))?;

        let mut def = FlagDefinition::new(path, flag);
        if let Some(options) = items.get(2) {
            let options = options
                .as_object()
                .ok_or_else(|| malformed("options must be an object"))?;
            for (key, v) in options {
                let as_string = || {
                    v.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| malformed(&format!("'{key}' must be a string")))
                };
                match key.as_str() {
                    "compare" => def.options.compare = Some(StateValue::from(v.clone())),
                    "requires" => def.options.requires = Some(as_string()?),
                    "excludes" => def.options.excludes = Some(as_string()?),
                    "uniform" => def.options.uniform = Some(as_string()?),
                    "type" => def.options.ty = FlagType::parse(&as_string()?)?,
                    other => return Err(malformed(&format!("unknown option '{other}'"))),
                }
            }
        }
        Ok(def)
    }

    fn validate(&self) -> Result<()> {
        let bad = |why: String| {
            FrameError::config(format!("flag definition '{}' at '{}': {why}", self.flag, self.path))
        };

        if self.path.is_empty() {
            return Err(bad("empty state path".into()));
        }
        if !is_identifier(&self.flag) {
            return Err(bad("flag name is not a valid identifier".into()));
        }
        for (what, target) in [
            ("requires", &self.options.requires),
            ("excludes", &self.options.excludes),
        ] {
            if let Some(target) = target {
                if target == &self.flag {
                    return Err(bad(format!("{what} itself")));
                }
                if !is_identifier(target) {
                    return Err(bad(format!("{what} '{target}' is not a valid identifier")));
                }
            }
        }
        if self.options.compare.is_some() && self.options.ty != FlagType::Boolean {
            return Err(bad("'compare' is only valid on boolean flags".into()));
        }
        if self.options.ty == FlagType::Texture && self.options.uniform.is_none() {
            return Err(bad("texture flags need a 'uniform'".into()));
        }
        Ok(())
    }

    /// Raw predicate plus define value, before any gating.
    fn evaluate_raw(&self, value: Option<&StateValue>) -> Result<Option<Option<String>>> {
        let Some(value) = value else {
            return Ok(None);
        };

        match self.options.ty {
            FlagType::Boolean => {
                let active = match &self.options.compare {
                    Some(expected) => value.loose_eq(expected),
                    None => value.is_truthy(),
                };
                Ok(active.then_some(None))
            }
            FlagType::Value => {
                if matches!(value, StateValue::Null) {
                    return Ok(None);
                }
                let text = value.define_text().ok_or_else(|| {
                    FrameError::config(format!(
                        "value flag '{}' needs a scalar at '{}', found {value}",
                        self.flag, self.path
                    ))
                })?;
                Ok(Some(Some(text)))
            }
            FlagType::Counter => match value {
                StateValue::Int(n) => Ok(Some(Some(n.to_string()))),
                StateValue::Float(f) if f.fract() == 0.0 => {
                    Ok(Some(Some((*f as i64).to_string())))
                }
                StateValue::Null => Ok(None),
                other => Err(FrameError::config(format!(
                    "counter flag '{}' needs an integer at '{}', found {other}",
                    self.flag, self.path
                ))),
            },
            FlagType::Texture => Ok(texture_of(value).map(|_| None)),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A texture value, either direct or wrapped as `{ "texture": handle }`.
fn texture_of(value: &StateValue) -> Option<&StateValue> {
    match value {
        StateValue::Texture(_) => Some(value),
        StateValue::Map(map) => map
            .get("texture")
            .filter(|t| matches!(t, StateValue::Texture(_))),
        _ => None,
    }
}

/// Output of [`FlagTable::evaluate`].
#[derive(Debug, Clone, Default)]
pub struct FlagEvaluation {
    pub flags: FlagSet,
    pub uniforms: UniformMap,
}

/// A validated list of flag definitions.
///
/// Validation (identifiers, option combinations, dangling `requires`/`excludes`
/// and, when a schema is given, unknown state paths) happens once here, so
/// per-frame evaluation never meets a malformed definition.
#[derive(Debug, Clone, Default)]
pub struct FlagTable {
    definitions: Vec<FlagDefinition>,
}

impl FlagTable {
    pub fn new(definitions: Vec<FlagDefinition>, schema: Option<&StateSchema>) -> Result<Self> {
        let names: FxHashSet<&str> = definitions.iter().map(|d| d.flag.as_str()).collect();

        for def in &definitions {
            def.validate()?;

            for target in [&def.options.requires, &def.options.excludes]
                .into_iter()
                .flatten()
            {
                if !names.contains(target.as_str()) {
                    return Err(FrameError::config(format!(
                        "flag '{}' refers to '{target}', which no definition in the table produces",
                        def.flag
                    )));
                }
            }

            if let Some(schema) = schema
                && !schema.contains(&def.path)
            {
                return Err(FrameError::config(format!(
                    "flag '{}' reads unknown state path '{}'",
                    def.flag, def.path
                )));
            }
        }

        Ok(Self { definitions })
    }

    /// Table without definitions: always evaluates to an empty flag set.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses and validates a JSON array of tuple-notation definitions.
    pub fn from_json(value: &serde_json::Value, schema: Option<&StateSchema>) -> Result<Self> {
        let items = value
            .as_array()
            .ok_or_else(|| FrameError::config("flag table must be a JSON array"))?;
        let definitions = items
            .iter()
            .map(FlagDefinition::from_json)
            .collect::<Result<Vec<_>>>()?;
        Self::new(definitions, schema)
    }

    #[must_use]
    pub fn definitions(&self) -> &[FlagDefinition] {
        &self.definitions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Evaluates every definition against `state`.
    pub fn evaluate(&self, state: &StateSnapshot) -> Result<FlagEvaluation> {
        let mut uniforms = UniformMap::default();
        // Per definition: Some(define value) while active.
        let mut active: Vec<Option<Option<String>>> = Vec::with_capacity(self.definitions.len());

        for def in &self.definitions {
            let value = state.get(&def.path);

            if let (Some(uniform), Some(value)) = (&def.options.uniform, value) {
                let source = if def.options.ty == FlagType::Texture {
                    texture_of(value)
                } else {
                    Some(value)
                };
                if let Some(u) = source.and_then(StateValue::to_uniform) {
                    uniforms.insert(uniform.clone(), u);
                }
            }

            active.push(def.evaluate_raw(value)?);
        }

        loop {
            self.apply_requires(&mut active);

            // Exclusions aimed at a flag that is still active.
            let targets: FxHashSet<&str> = self
                .survivors(&active)
                .filter_map(|d| d.options.excludes.as_deref())
                .filter(|target| self.survivors(&active).any(|d| d.flag == *target))
                .collect();
            if targets.is_empty() {
                break;
            }

            // Only excluders whose own support is not under attack act this round.
            // When every excluder is threatened (flags excluding each other),
            // all pending exclusions apply at once.
            let unstable = self.unstable(&active, &targets);
            let mut acting: FxHashSet<&str> = self
                .definitions
                .iter()
                .zip(&active)
                .zip(&unstable)
                .filter(|((_, slot), unstable)| slot.is_some() && !**unstable)
                .filter_map(|((d, _), _)| d.options.excludes.as_deref())
                .filter(|target| targets.contains(target))
                .collect();
            if acting.is_empty() {
                acting = targets;
            }

            for (def, slot) in self.definitions.iter().zip(active.iter_mut()) {
                if acting.contains(def.flag.as_str()) {
                    *slot = None;
                }
            }
        }

        // Several definitions may feed the same flag; they must agree on its value.
        let mut merged: BTreeMap<&str, Option<String>> = BTreeMap::new();
        for (def, slot) in self.definitions.iter().zip(active) {
            let Some(value) = slot else {
                continue;
            };
            match merged.get(def.flag.as_str()) {
                Some(existing) if *existing != value => {
                    return Err(FrameError::config(format!(
                        "flag '{}' receives conflicting values {existing:?} and {value:?}",
                        def.flag
                    )));
                }
                Some(_) => {}
                None => {
                    merged.insert(def.flag.as_str(), value);
                }
            }
        }

        let mut flags = FlagSet::with_capacity(merged.len());
        for (name, value) in &merged {
            flags.insert(name, value.as_deref());
        }

        Ok(FlagEvaluation { flags, uniforms })
    }

    fn survivors<'s, 'a>(
        &'s self,
        active: &'a [Option<Option<String>>],
    ) -> impl Iterator<Item = &'s FlagDefinition> + use<'s, 'a> {
        self.definitions
            .iter()
            .zip(active)
            .filter(|(_, slot)| slot.is_some())
            .map(|(d, _)| d)
    }

    /// Drops definitions whose required flag is not active, to a fixpoint.
    fn apply_requires(&self, active: &mut [Option<Option<String>>]) {
        loop {
            let names: FxHashSet<&str> = self.survivors(&*active).map(|d| d.flag.as_str()).collect();
            let mut changed = false;
            for (def, slot) in self.definitions.iter().zip(active.iter_mut()) {
                if slot.is_some()
                    && def
                        .options
                        .requires
                        .as_deref()
                        .is_some_and(|req| !names.contains(req))
                {
                    *slot = None;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Marks active definitions that an exclusion in `targets` removes,
    /// directly or through their `requires` chain.
    fn unstable(&self, active: &[Option<Option<String>>], targets: &FxHashSet<&str>) -> Vec<bool> {
        let mut unstable: Vec<bool> = self
            .definitions
            .iter()
            .zip(active)
            .map(|(d, slot)| slot.is_some() && targets.contains(d.flag.as_str()))
            .collect();

        loop {
            let mut changed = false;
            for (i, def) in self.definitions.iter().enumerate() {
                if active[i].is_none() || unstable[i] {
                    continue;
                }
                let Some(req) = def.options.requires.as_deref() else {
                    continue;
                };
                let supported = self
                    .definitions
                    .iter()
                    .enumerate()
                    .any(|(j, d)| active[j].is_some() && !unstable[j] && d.flag == req);
                if !supported {
                    unstable[i] = true;
                    changed = true;
                }
            }
            if !changed {
                return unstable;
            }
        }
    }
}
