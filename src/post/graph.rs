//! Typed post-processing graph.
//!
//! [`PostGraph::build`] flattens the authored effect groups into stages and
//! turns every string reference into a [`StageId`] once. Names survive only
//! as labels: per-frame execution follows the typed references.
//!
//! A reference must point at a stage declared strictly earlier. Forward and
//! unknown references are not errors: they are logged, recorded as
//! [`ResolutionWarning`]s, and degrade to the working color (or to a pooled
//! target for targets).

use std::fmt;
use std::ops::Range;

use rustc_hash::{FxHashMap, FxHashSet};

use super::effect::{EffectGroup, FrameInput, SharedTexture, SourceSpec, SubPass, TargetSpec};
use crate::backend::TextureHandle;
use crate::errors::{FrameError, Result};
use crate::resources::PassTarget;
use crate::state::StatePath;

/// Index of a stage in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

impl StageId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A resolved texture reference.
#[derive(Debug, Clone, PartialEq)]
pub enum StageInput {
    Working,
    Frame(FrameInput),
    Stage(StageId),
    Texture(TextureHandle),
    Shared(SharedTexture),
}

/// A resolved render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageTarget {
    Auto,
    Auxiliary,
    Screen,
    Pass(PassTarget),
    Stage(StageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WarningKind {
    /// The referenced stage is declared later (or is the stage itself).
    ForwardReference,
    UnknownReference,
    /// The referenced stage belongs to a group that did not run this frame.
    NotRun,
    /// The referenced stage did not render into a reusable target.
    NoTarget,
    /// The frame provides no texture for the referenced input.
    MissingInput,
}

/// A reference that could not be followed; the stage used a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionWarning {
    pub stage: String,
    pub reference: String,
    pub kind: WarningKind,
}

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            WarningKind::ForwardReference => "refers to a later stage",
            WarningKind::UnknownReference => "refers to an unknown stage",
            WarningKind::NotRun => "refers to a stage that did not run",
            WarningKind::NoTarget => "refers to a stage without a reusable target",
            WarningKind::MissingInput => "refers to a missing frame input",
        };
        write!(f, "stage '{}' {what} '{}'", self.stage, self.reference)
    }
}

/// One sub-pass with its references resolved.
#[derive(Debug, Clone)]
pub struct Stage {
    pub id: StageId,
    /// `"<effect>.<subpass>"`
    pub label: String,
    pub group: usize,
    pub pass: SubPass,
    pub source: StageInput,
    pub inputs: Vec<(String, StageInput)>,
    pub target: StageTarget,
}

/// A group header over a contiguous range of stages.
#[derive(Debug, Clone)]
pub struct GroupEntry {
    pub name: String,
    pub enable: Option<StatePath>,
    pub is_final: bool,
    pub stages: Range<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct PostGraph {
    groups: Vec<GroupEntry>,
    stages: Vec<Stage>,
    warnings: Vec<ResolutionWarning>,
}

struct Names {
    qualified: FxHashMap<String, StageId>,
    group_last: FxHashMap<String, StageId>,
}

impl Names {
    fn lookup(&self, reference: &str, group: &str) -> Option<StageId> {
        if reference.contains('.') {
            return self.qualified.get(reference).copied();
        }
        self.qualified
            .get(&format!("{group}.{reference}"))
            .or_else(|| self.group_last.get(reference))
            .copied()
    }

    /// Resolves to a stage declared strictly before `current`.
    fn resolve(
        &self,
        reference: &str,
        group: &str,
        current: StageId,
    ) -> std::result::Result<StageId, WarningKind> {
        match self.lookup(reference, group) {
            Some(id) if id < current => Ok(id),
            Some(_) => Err(WarningKind::ForwardReference),
            None => Err(WarningKind::UnknownReference),
        }
    }
}

impl PostGraph {
    /// Flattens `groups` and resolves every stage reference.
    ///
    /// Malformed names (empty, containing `.`, duplicated) are configuration
    /// errors; unresolvable references only produce warnings.
    pub fn build(groups: Vec<EffectGroup>) -> Result<Self> {
        let names = Self::collect_names(&groups)?;

        let mut graph = PostGraph::default();
        for (group_index, group) in groups.into_iter().enumerate() {
            let start = graph.stages.len();
            for pass in group.passes {
                let id = StageId(graph.stages.len());
                let label = format!("{}.{}", group.name, pass.name);

                let source = graph.resolve_source(&names, &group.name, &label, id, &pass.source);
                let inputs = pass
                    .inputs
                    .iter()
                    .map(|(uniform, spec)| {
                        let input = graph.resolve_source(&names, &group.name, &label, id, spec);
                        (uniform.clone(), input)
                    })
                    .collect();
                let target = graph.resolve_target(&names, &group.name, &label, id, &pass.target);

                graph.stages.push(Stage {
                    id,
                    label,
                    group: group_index,
                    pass,
                    source,
                    inputs,
                    target,
                });
            }
            graph.groups.push(GroupEntry {
                name: group.name,
                enable: group.enable,
                is_final: group.is_final,
                stages: start..graph.stages.len(),
            });
        }

        log::debug!(
            "PostGraph: {} groups, {} stages, {} warnings",
            graph.groups.len(),
            graph.stages.len(),
            graph.warnings.len()
        );
        Ok(graph)
    }

    fn collect_names(groups: &[EffectGroup]) -> Result<Names> {
        let mut qualified = FxHashMap::default();
        let mut group_last = FxHashMap::default();
        let mut group_names = FxHashSet::default();
        let mut next = 0;

        for group in groups {
            check_name(&group.name, "effect")?;
            if !group_names.insert(group.name.as_str()) {
                return Err(FrameError::config(format!(
                    "duplicate effect name '{}'",
                    group.name
                )));
            }
            for pass in &group.passes {
                check_name(&pass.name, "sub-pass")?;
                let label = format!("{}.{}", group.name, pass.name);
                if qualified.insert(label.clone(), StageId(next)).is_some() {
                    return Err(FrameError::config(format!("duplicate sub-pass '{label}'")));
                }
                next += 1;
            }
            if next > 0 && !group.passes.is_empty() {
                group_last.insert(group.name.clone(), StageId(next - 1));
            }
        }

        Ok(Names {
            qualified,
            group_last,
        })
    }

    fn warn(&mut self, stage: &str, reference: &str, kind: WarningKind) {
        let warning = ResolutionWarning {
            stage: stage.to_owned(),
            reference: reference.to_owned(),
            kind,
        };
        log::warn!("PostGraph: {warning}; falling back");
        self.warnings.push(warning);
    }

    fn resolve_source(
        &mut self,
        names: &Names,
        group: &str,
        label: &str,
        id: StageId,
        spec: &SourceSpec,
    ) -> StageInput {
        match spec {
            SourceSpec::Working => StageInput::Working,
            SourceSpec::Frame(input) => StageInput::Frame(*input),
            SourceSpec::Texture(t) => StageInput::Texture(*t),
            SourceSpec::Shared(s) => StageInput::Shared(s.clone()),
            SourceSpec::Named(reference) => match names.resolve(reference, group, id) {
                Ok(stage) => StageInput::Stage(stage),
                Err(kind) => {
                    self.warn(label, reference, kind);
                    StageInput::Working
                }
            },
        }
    }

    fn resolve_target(
        &mut self,
        names: &Names,
        group: &str,
        label: &str,
        id: StageId,
        spec: &TargetSpec,
    ) -> StageTarget {
        match spec {
            TargetSpec::Auto => StageTarget::Auto,
            TargetSpec::Auxiliary => StageTarget::Auxiliary,
            TargetSpec::Screen => StageTarget::Screen,
            TargetSpec::Pass(p) => StageTarget::Pass(*p),
            TargetSpec::Named(reference) => match names.resolve(reference, group, id) {
                Ok(stage) => StageTarget::Stage(stage),
                Err(kind) => {
                    self.warn(label, reference, kind);
                    StageTarget::Auto
                }
            },
        }
    }

    #[must_use]
    pub fn groups(&self) -> &[GroupEntry] {
        &self.groups
    }

    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    #[must_use]
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(id.0)
    }

    /// Looks a stage up by its `"<effect>.<subpass>"` label.
    #[must_use]
    pub fn find(&self, label: &str) -> Option<StageId> {
        self.stages.iter().find(|s| s.label == label).map(|s| s.id)
    }

    /// Warnings produced while resolving references.
    #[must_use]
    pub fn warnings(&self) -> &[ResolutionWarning] {
        &self.warnings
    }

    #[must_use]
    pub fn has_final(&self) -> bool {
        self.groups.iter().any(|g| g.is_final)
    }
}

fn check_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(FrameError::config(format!(
            "{what} name '{name}' must be non-empty and must not contain '.'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ShaderSource;

    fn frag() -> ShaderSource {
        ShaderSource::new("t.frag", "uniform sampler2D uTexture;\nvoid main() {}\n")
    }

    #[test]
    fn test_bare_and_qualified_references() {
        let graph = PostGraph::build(vec![
            EffectGroup::new("bloom")
                .pass(SubPass::new("threshold", frag()).source("color"))
                .pass(SubPass::new("main", frag()).source("threshold").target("screen")),
            EffectGroup::composite("final")
                .pass(SubPass::new("main", frag()).input("uBloom", "bloom.main"))
                .pass(SubPass::new("copy", frag()).input("uBloomLast", "bloom")),
        ])
        .unwrap();

        assert!(graph.warnings().is_empty());
        let threshold = graph.find("bloom.threshold").unwrap();
        let main = graph.find("bloom.main").unwrap();
        assert_eq!(graph.stage(main).unwrap().source, StageInput::Stage(threshold));
        assert_eq!(graph.stage(main).unwrap().target, StageTarget::Screen);

        let stages = graph.stages();
        assert_eq!(stages[2].inputs[0].1, StageInput::Stage(main));
        assert_eq!(stages[3].inputs[0].1, StageInput::Stage(main));
        assert!(graph.has_final());
    }

    #[test]
    fn test_forward_reference_degrades_to_working() {
        let graph = PostGraph::build(vec![
            EffectGroup::new("effectA").pass(SubPass::new("main", frag()).source("effectB.main")),
            EffectGroup::new("effectB").pass(SubPass::new("main", frag())),
        ])
        .unwrap();

        assert_eq!(graph.stages()[0].source, StageInput::Working);
        assert_eq!(
            graph.warnings(),
            [ResolutionWarning {
                stage: "effectA.main".to_owned(),
                reference: "effectB.main".to_owned(),
                kind: WarningKind::ForwardReference,
            }]
        );
    }

    #[test]
    fn test_self_and_unknown_references() {
        let graph = PostGraph::build(vec![
            EffectGroup::new("fx")
                .pass(SubPass::new("a", frag()).source("a"))
                .pass(SubPass::new("b", frag()).target("nope")),
        ])
        .unwrap();

        let kinds: Vec<_> = graph.warnings().iter().map(|w| w.kind).collect();
        assert_eq!(kinds, [WarningKind::ForwardReference, WarningKind::UnknownReference]);
        assert_eq!(graph.stages()[1].target, StageTarget::Auto);
    }

    #[test]
    fn test_malformed_names_rejected() {
        let dup = PostGraph::build(vec![
            EffectGroup::new("fx")
                .pass(SubPass::new("a", frag()))
                .pass(SubPass::new("a", frag())),
        ]);
        assert!(matches!(dup, Err(FrameError::Configuration(_))));

        let dotted = PostGraph::build(vec![EffectGroup::new("f.x")]);
        assert!(matches!(dotted, Err(FrameError::Configuration(_))));
    }
}
