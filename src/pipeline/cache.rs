//! Variant Cache
//!
//! Maps `(vertex source, fragment source, canonical flag set, props hash)`
//! to a compiled program. Entries are immutable once stored and live until
//! [`PipelineCache::invalidate_source`] or [`PipelineCache::dispose`].
//!
//! # Two levels
//!
//! - **Variants** are keyed by source identities plus the canonical
//!   [`FlagSet`]. A lookup costs one flag evaluation and one hash.
//! - **Programs** are keyed by the xxh3-128 hash of the *composed* text.
//!   Variants whose flags differ only in ways the sources never reference,
//!   or that differ only in fixed-function props, share one backend program.
//!
//! Uniform values are never cached: every [`resolve`](PipelineCache::resolve)
//! re-evaluates the flag table, so the uniform side table always reflects the
//! snapshot passed in, even on a hit.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::Xxh3;

use super::defines::FlagSet;
use super::flags::FlagTable;
use super::props::PipelineProps;
use super::shader_gen::{ShaderSource, compose};
use crate::backend::{GpuBackend, ProgramHandle, ProgramInfo};
use crate::command::UniformMap;
use crate::errors::{FrameError, Result};
use crate::state::StateSnapshot;
use crate::utils::FrameGuard;

/// Shared reference to a linked program and its uniform metadata.
pub type ProgramRef = Arc<ProgramInfo>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VariantKey {
    vertex: u128,
    fragment: u128,
    flags: FlagSet,
    props: u64,
}

#[derive(Debug)]
struct CompiledVariant {
    program_key: u128,
    program: ProgramRef,
}

/// Output of [`PipelineCache::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedPipeline {
    /// Canonical active flags (`NAME` or `NAME=VALUE`), sorted by name.
    pub flags: Vec<String>,
    pub flag_set: FlagSet,
    pub program: ProgramRef,
    pub props: PipelineProps,
    /// Uniform side table filled from the state snapshot.
    pub uniforms: UniformMap,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Variant lookups answered from the cache (this frame).
    pub hits: u32,
    /// Variant lookups that had to compose (this frame).
    pub misses: u32,
    /// Backend programs linked (this frame).
    pub compiles: u32,
    /// Failed compilations (this frame).
    pub failures: u32,
    /// Cached variants.
    pub variants: usize,
    /// Live backend programs.
    pub programs: usize,
}

/// Output of [`PipelineCache::invalidate_source`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invalidation {
    /// Variants dropped.
    pub variants: usize,
    /// Backend programs destroyed because no remaining variant used them.
    pub programs: Vec<ProgramHandle>,
}

/// Flag-driven program variant cache.
pub struct PipelineCache {
    variants: FxHashMap<VariantKey, CompiledVariant>,
    programs: FxHashMap<u128, ProgramRef>,
    guard: FrameGuard,
    stats: PipelineStats,
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            variants: FxHashMap::default(),
            programs: FxHashMap::default(),
            guard: FrameGuard::new("PipelineCache"),
            stats: PipelineStats::default(),
        }
    }

    // ========================================================================
    // Frame bookkeeping
    // ========================================================================

    /// Resets the per-frame hit/miss counters.
    pub fn begin_frame(&mut self) -> Result<()> {
        self.guard.begin()?;
        self.stats.hits = 0;
        self.stats.misses = 0;
        self.stats.compiles = 0;
        self.stats.failures = 0;
        Ok(())
    }

    pub fn end_frame(&mut self) -> Result<()> {
        self.guard.end()?;
        if self.stats.misses > 0 {
            log::debug!(
                "PipelineCache: {} hits, {} misses, {} programs linked this frame",
                self.stats.hits,
                self.stats.misses,
                self.stats.compiles
            );
        }
        Ok(())
    }

    pub(crate) fn lock(&mut self) {
        self.guard.lock();
    }

    pub(crate) fn unlock(&mut self) {
        self.guard.unlock();
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Resolves the variant of `vertex`/`fragment` selected by `state`, with
    /// default (full-screen) fixed-function props.
    pub fn resolve(
        &mut self,
        backend: &mut dyn GpuBackend,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        table: &FlagTable,
        state: &StateSnapshot,
    ) -> Result<ResolvedPipeline> {
        self.resolve_with_props(backend, vertex, fragment, table, state, PipelineProps::default())
    }

    /// Like [`resolve`](Self::resolve), with explicit fixed-function props
    /// folded into the variant key.
    pub fn resolve_with_props(
        &mut self,
        backend: &mut dyn GpuBackend,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        table: &FlagTable,
        state: &StateSnapshot,
        props: PipelineProps,
    ) -> Result<ResolvedPipeline> {
        let evaluation = table.evaluate(state)?;
        let key = VariantKey {
            vertex: vertex.id(),
            fragment: fragment.id(),
            flags: evaluation.flags,
            props: Self::get_hash_from_props(&props),
        };

        if let Some(variant) = self.variants.get(&key) {
            self.stats.hits += 1;
            return Ok(ResolvedPipeline {
                flags: key.flags.to_strings(),
                program: variant.program.clone(),
                flag_set: key.flags,
                props,
                uniforms: evaluation.uniforms,
                cache_hit: true,
            });
        }

        self.stats.misses += 1;
        let (program_key, program) = self.link(backend, vertex, fragment, &key.flags)?;
        log::debug!(
            "PipelineCache: new variant of '{}' + '{}' [{}]",
            vertex.label(),
            fragment.label(),
            key.flags.to_strings().join(", ")
        );

        let resolved = ResolvedPipeline {
            flags: key.flags.to_strings(),
            flag_set: key.flags.clone(),
            program: program.clone(),
            props,
            uniforms: evaluation.uniforms,
            cache_hit: false,
        };
        self.variants.insert(
            key,
            CompiledVariant {
                program_key,
                program,
            },
        );
        Ok(resolved)
    }

    /// Composes both stages and links them, reusing an identical program.
    fn link(
        &mut self,
        backend: &mut dyn GpuBackend,
        vertex: &ShaderSource,
        fragment: &ShaderSource,
        flags: &FlagSet,
    ) -> Result<(u128, ProgramRef)> {
        let label = format!("{}+{}", vertex.label(), fragment.label());

        let composed = compose(vertex, flags).and_then(|v| compose(fragment, flags).map(|f| (v, f)));
        let (vertex_text, fragment_text) = match composed {
            Ok(pair) => pair,
            Err(message) => {
                self.stats.failures += 1;
                return Err(FrameError::Compilation {
                    label,
                    flags: flags.to_strings(),
                    vertex: vertex.text().to_owned(),
                    fragment: fragment.text().to_owned(),
                    message,
                });
            }
        };

        let mut hasher = Xxh3::new();
        hasher.update(vertex_text.as_bytes());
        hasher.update(&[0]);
        hasher.update(fragment_text.as_bytes());
        let program_key = hasher.digest128();

        if let Some(program) = self.programs.get(&program_key) {
            return Ok((program_key, program.clone()));
        }

        match backend.create_program(&vertex_text, &fragment_text, &label) {
            Ok(info) => {
                self.stats.compiles += 1;
                let program = Arc::new(info);
                self.programs.insert(program_key, program.clone());
                Ok((program_key, program))
            }
            Err(e) => {
                self.stats.failures += 1;
                log::debug!("PipelineCache: '{label}' failed to compile: {e}");
                Err(FrameError::Compilation {
                    label,
                    flags: flags.to_strings(),
                    vertex: vertex_text,
                    fragment: fragment_text,
                    message: e.0,
                })
            }
        }
    }

    /// Hash of fixed-function props as used in variant keys.
    #[must_use]
    pub fn get_hash_from_props(props: &PipelineProps) -> u64 {
        props.compute_hash()
    }

    // ========================================================================
    // Invalidation & disposal
    // ========================================================================

    /// Drops every variant built from the source with identity `source_id`
    /// (shader reload) and destroys programs nothing references anymore.
    pub fn invalidate_source(
        &mut self,
        backend: &mut dyn GpuBackend,
        source_id: u128,
    ) -> Invalidation {
        let before = self.variants.len();
        self.variants
            .retain(|key, _| key.vertex != source_id && key.fragment != source_id);
        let mut invalidation = Invalidation {
            variants: before - self.variants.len(),
            programs: Vec::new(),
        };

        if invalidation.variants > 0 {
            let referenced: rustc_hash::FxHashSet<u128> =
                self.variants.values().map(|v| v.program_key).collect();
            self.programs.retain(|program_key, program| {
                let keep = referenced.contains(program_key);
                if !keep {
                    backend.destroy_program(program.handle);
                    invalidation.programs.push(program.handle);
                }
                keep
            });
            log::debug!(
                "PipelineCache: invalidated {} variants and {} programs of source {source_id:032x}",
                invalidation.variants,
                invalidation.programs.len()
            );
        }
        invalidation
    }

    /// Destroys every program and forgets every variant.
    pub fn dispose(&mut self, backend: &mut dyn GpuBackend) {
        for (_, program) in self.programs.drain() {
            backend.destroy_program(program.handle);
        }
        self.variants.clear();
    }

    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.variants.len()
    }

    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            variants: self.variants.len(),
            programs: self.programs.len(),
            ..self.stats
        }
    }
}
