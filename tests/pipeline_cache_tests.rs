//! Pipeline Cache Tests
//!
//! Tests for:
//! - Flag evaluation: tuple notation, requires/excludes gating, flag types
//! - Canonicalization: every ordering of a table selects the same variant
//! - Variant cache: hits, misses, fixed-function props in the key
//! - Compilation failures: full context, never cached, clean retry
//! - Invalidation (shader reload) and schema validation

use serde_json::json;

use myth_frame::backend::HeadlessBackend;
use myth_frame::pipeline::{FlagDefinition, FlagTable, FlagType, PipelineCache, PipelineProps, ShaderSource};
use myth_frame::{FrameError, StateSchema, StateSnapshot};

const VERT: &str = "void main() { gl_Position = vec4(0.0); }\n";
const FRAG: &str = "uniform sampler2D uTexture;\nvoid main() {}\n";

fn sources() -> (ShaderSource, ShaderSource) {
    (
        ShaderSource::new("quad.vert", VERT),
        ShaderSource::new("quad.frag", FRAG),
    )
}

fn active(table: &FlagTable, state: &StateSnapshot) -> Vec<String> {
    table.evaluate(state).unwrap().flags.to_strings()
}

/// Every ordering of `items`.
fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
    if items.len() <= 1 {
        return vec![items.to_vec()];
    }
    let mut out = Vec::new();
    for i in 0..items.len() {
        let mut rest = items.to_vec();
        let head = rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head.clone());
            out.push(tail);
        }
    }
    out
}

/// Every combination of boolean values for `paths`.
fn boolean_states(paths: &[&str]) -> Vec<StateSnapshot> {
    (0..1u32 << paths.len())
        .map(|bits| {
            let mut state = StateSnapshot::new();
            for (i, path) in paths.iter().enumerate() {
                state.set(*path, bits & (1 << i) != 0);
            }
            state
        })
        .collect()
}

// ============================================================================
// Flag evaluation
// ============================================================================

#[test]
fn requires_scenario_from_tuple_notation() {
    let table = FlagTable::from_json(
        &json!([
            [["a", "b"], "FOO"],
            [["a", "c"], "BAR", { "requires": "FOO" }]
        ]),
        None,
    )
    .unwrap();

    let on = StateSnapshot::from_json(json!({ "a": { "b": true, "c": false } }));
    assert_eq!(active(&table, &on), ["FOO"]);

    let gated = StateSnapshot::from_json(json!({ "a": { "b": false, "c": true } }));
    assert!(active(&table, &gated).is_empty());

    let both = StateSnapshot::from_json(json!({ "a": { "b": true, "c": true } }));
    assert_eq!(active(&table, &both), ["BAR", "FOO"]);
}

#[test]
fn requires_gating_holds_for_every_ordering_and_state() {
    let definitions = vec![
        FlagDefinition::new("a.b", "FOO"),
        FlagDefinition::new("a.c", "BAR").requires("FOO"),
        FlagDefinition::new("a.d", "BAZ").requires("BAR"),
        FlagDefinition::new("a.e", "QUX").excludes("FOO"),
    ];

    for ordering in permutations(&definitions) {
        let table = FlagTable::new(ordering, None).unwrap();
        for state in boolean_states(&["a.b", "a.c", "a.d", "a.e"]) {
            let flags = table.evaluate(&state).unwrap().flags;
            if flags.contains("BAR") {
                assert!(flags.contains("FOO"), "BAR without FOO: {:?}", flags.to_strings());
            }
            if flags.contains("BAZ") {
                assert!(flags.contains("BAR"), "BAZ without BAR: {:?}", flags.to_strings());
            }
            assert!(!(flags.contains("QUX") && flags.contains("FOO")));
        }
    }
}

#[test]
fn excluded_flag_cascades_to_its_dependents() {
    let table = FlagTable::new(
        vec![
            FlagDefinition::new("fx.fast", "FAST_PATH"),
            FlagDefinition::new("fx.blur", "USE_BLUR").excludes("FAST_PATH"),
            FlagDefinition::new("fx.wide", "WIDE_BLUR").requires("USE_BLUR"),
        ],
        None,
    )
    .unwrap();

    let state = StateSnapshot::new()
        .with("fx.fast", true)
        .with("fx.blur", true)
        .with("fx.wide", true);
    // USE_BLUR is active and excludes FAST_PATH; WIDE_BLUR follows USE_BLUR.
    assert_eq!(active(&table, &state), ["USE_BLUR", "WIDE_BLUR"]);
}

#[test]
fn gated_out_flag_does_not_apply_its_exclusion() {
    let definitions = vec![
        FlagDefinition::new("x", "X"),
        FlagDefinition::new("y", "Y").requires("Z").excludes("X"),
        FlagDefinition::new("z", "Z"),
    ];
    let state = StateSnapshot::new()
        .with("x", true)
        .with("y", true)
        .with("z", false);

    for ordering in permutations(&definitions) {
        let table = FlagTable::new(ordering, None).unwrap();
        assert_eq!(active(&table, &state), ["X"]);
    }
}

#[test]
fn exclusion_cascade_only_follows_surviving_excluders() {
    // E removes D, which A requires; A therefore never gets to remove B.
    let definitions = vec![
        FlagDefinition::new("a", "A").requires("D").excludes("B"),
        FlagDefinition::new("b", "B"),
        FlagDefinition::new("d", "D"),
        FlagDefinition::new("e", "E").excludes("D"),
    ];
    let state = StateSnapshot::new()
        .with("a", true)
        .with("b", true)
        .with("d", true)
        .with("e", true);

    for ordering in permutations(&definitions) {
        let table = FlagTable::new(ordering, None).unwrap();
        assert_eq!(active(&table, &state), ["B", "E"]);
    }
}

#[test]
fn mutually_exclusive_flags_both_drop() {
    let definitions = vec![
        FlagDefinition::new("fx.fxaa", "USE_FXAA").excludes("USE_TAA"),
        FlagDefinition::new("fx.taa", "USE_TAA").excludes("USE_FXAA"),
        FlagDefinition::new("fx.dither", "USE_DITHER"),
    ];

    for ordering in permutations(&definitions) {
        let table = FlagTable::new(ordering, None).unwrap();
        for state in boolean_states(&["fx.fxaa", "fx.taa", "fx.dither"]) {
            let flags = table.evaluate(&state).unwrap().flags;
            let fxaa = state.get(&"fx.fxaa".into()).is_some_and(|v| v.is_truthy());
            let taa = state.get(&"fx.taa".into()).is_some_and(|v| v.is_truthy());
            // Alone, either flag survives; together, neither does.
            assert_eq!(flags.contains("USE_FXAA"), fxaa && !taa);
            assert_eq!(flags.contains("USE_TAA"), taa && !fxaa);
        }
    }
}

#[test]
fn typed_flags_produce_values() {
    let table = FlagTable::new(
        vec![
            FlagDefinition::new("post.toneMapping", "TONE_MAPPING_MODE").typed(FlagType::Value),
            FlagDefinition::new("lights.count", "NUM_LIGHTS").typed(FlagType::Counter),
            FlagDefinition::new("material.side", "DOUBLE_SIDED").compare("double"),
        ],
        None,
    )
    .unwrap();

    let state = StateSnapshot::from_json(json!({
        "post": { "toneMapping": "ACES_FILMIC" },
        "lights": { "count": 0 },
        "material": { "side": "front" }
    }));
    assert_eq!(
        active(&table, &state),
        ["NUM_LIGHTS=0", "TONE_MAPPING_MODE=ACES_FILMIC"]
    );
}

#[test]
fn malformed_definitions_are_configuration_errors() {
    for bad in [
        json!([["a"]]),
        json!([[["a"], "1NOT_IDENT"]]),
        json!([[["a"], "FOO", { "requires": "MISSING" }]]),
        json!([[["a"], "FOO", { "bogus": true }]]),
        json!({ "a": "FOO" }),
    ] {
        assert!(
            matches!(FlagTable::from_json(&bad, None), Err(FrameError::Configuration(_))),
            "{bad} should be rejected"
        );
    }
}

#[test]
fn unknown_state_path_rejected_against_schema() {
    let schema = StateSchema::from_snapshot(&StateSnapshot::from_json(json!({
        "material": { "map": null, "color": [1.0, 1.0, 1.0] }
    })));

    assert!(FlagTable::new(vec![FlagDefinition::new("material.map", "USE_MAP")], Some(&schema)).is_ok());
    let err = FlagTable::new(vec![FlagDefinition::new("material.mpa", "USE_MAP")], Some(&schema))
        .unwrap_err();
    assert!(err.to_string().contains("material.mpa"));
}

// ============================================================================
// Variant cache
// ============================================================================

#[test]
fn every_ordering_of_a_table_hits_the_same_variant() {
    let mut backend = HeadlessBackend::new();
    let mut cache = PipelineCache::new();
    let (vert, frag) = sources();

    let definitions = vec![
        FlagDefinition::new("a.fog", "USE_FOG"),
        FlagDefinition::new("a.shadow", "USE_SHADOW"),
        FlagDefinition::new("a.pcf", "USE_PCF").requires("USE_SHADOW"),
        FlagDefinition::new("a.samples", "NUM_SAMPLES").typed(FlagType::Counter),
    ];
    let state = StateSnapshot::from_json(json!({
        "a": { "fog": true, "shadow": true, "pcf": true, "samples": 4 }
    }));

    let mut handles = Vec::new();
    for ordering in permutations(&definitions) {
        let table = FlagTable::new(ordering, None).unwrap();
        let resolved = cache.resolve(&mut backend, &vert, &frag, &table, &state).unwrap();
        assert_eq!(resolved.flags, ["NUM_SAMPLES=4", "USE_FOG", "USE_PCF", "USE_SHADOW"]);
        handles.push(resolved.program.handle);
    }

    handles.dedup();
    assert_eq!(handles.len(), 1);
    assert_eq!(cache.variant_count(), 1);
    assert_eq!(backend.counters().programs_created, 1);
}

#[test]
fn hit_and_miss_counters_reset_per_frame() {
    let mut backend = HeadlessBackend::new();
    let mut cache = PipelineCache::new();
    let (vert, frag) = sources();
    let table = FlagTable::new(vec![FlagDefinition::new("fx.on", "USE_FX")], None).unwrap();

    cache.begin_frame().unwrap();
    for on in [false, true, false, true] {
        cache
            .resolve(&mut backend, &vert, &frag, &table, &StateSnapshot::new().with("fx.on", on))
            .unwrap();
    }
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.compiles), (2, 2, 2));
    cache.end_frame().unwrap();

    cache.begin_frame().unwrap();
    let resolved = cache
        .resolve(&mut backend, &vert, &frag, &table, &StateSnapshot::new())
        .unwrap();
    assert!(resolved.cache_hit);
    assert_eq!((cache.stats().hits, cache.stats().misses), (1, 0));
    assert_eq!(cache.stats().variants, 2);
    cache.end_frame().unwrap();
}

#[test]
fn props_are_part_of_the_variant_key() {
    let mut backend = HeadlessBackend::new();
    let mut cache = PipelineCache::new();
    let (vert, frag) = sources();
    let table = FlagTable::empty();
    let state = StateSnapshot::new();

    assert_ne!(
        PipelineCache::get_hash_from_props(&PipelineProps::opaque()),
        PipelineCache::get_hash_from_props(&PipelineProps::fullscreen())
    );
    assert_eq!(
        PipelineCache::get_hash_from_props(&PipelineProps::opaque()),
        PipelineCache::get_hash_from_props(&PipelineProps::opaque())
    );

    let opaque = cache
        .resolve_with_props(&mut backend, &vert, &frag, &table, &state, PipelineProps::opaque())
        .unwrap();
    let fullscreen = cache
        .resolve_with_props(&mut backend, &vert, &frag, &table, &state, PipelineProps::fullscreen())
        .unwrap();

    assert!(!fullscreen.cache_hit);
    assert_eq!(cache.variant_count(), 2);
    // Same composed text: both variants share one linked program.
    assert_eq!(opaque.program.handle, fullscreen.program.handle);
    assert_eq!(cache.program_count(), 1);
}

// ============================================================================
// Compilation failures
// ============================================================================

#[test]
fn failed_variant_is_reported_with_context_and_not_cached() {
    let mut backend = HeadlessBackend::new();
    let mut cache = PipelineCache::new();
    let vert = ShaderSource::new("quad.vert", VERT);
    let frag = ShaderSource::new(
        "broken.frag",
        "#ifdef USE_BROKEN\n#error unsupported path\n#endif\nvoid main() {}\n",
    );
    let table = FlagTable::new(vec![FlagDefinition::new("fx.broken", "USE_BROKEN")], None).unwrap();
    let broken = StateSnapshot::new().with("fx.broken", true);

    let err = cache.resolve(&mut backend, &vert, &frag, &table, &broken).unwrap_err();
    match &err {
        FrameError::Compilation {
            label,
            flags,
            fragment,
            message,
            ..
        } => {
            assert_eq!(label, "quad.vert+broken.frag");
            assert_eq!(flags, &["USE_BROKEN"]);
            assert!(fragment.contains("#define USE_BROKEN"));
            assert!(message.contains("unsupported path"));
        }
        other => panic!("expected a compilation error, got {other:?}"),
    }
    assert_eq!(cache.variant_count(), 0);
    assert_eq!(cache.stats().failures, 1);

    // Retrying the same state compiles again instead of replaying a cached failure.
    assert!(cache.resolve(&mut backend, &vert, &frag, &table, &broken).is_err());
    assert_eq!(backend.counters().compile_attempts, 2);

    // A corrected state succeeds cleanly.
    let fixed = cache
        .resolve(&mut backend, &vert, &frag, &table, &StateSnapshot::new())
        .unwrap();
    assert!(!fixed.cache_hit);
    assert_eq!(cache.variant_count(), 1);
}

#[test]
fn template_errors_surface_as_compilation_errors() {
    let mut backend = HeadlessBackend::new();
    let mut cache = PipelineCache::new();
    let vert = ShaderSource::new("quad.vert", VERT);
    let frag = ShaderSource::new("bad.frag", "{$ if $}\nvoid main() {}\n");

    let err = cache
        .resolve(&mut backend, &vert, &frag, &FlagTable::empty(), &StateSnapshot::new())
        .unwrap_err();
    assert!(matches!(err, FrameError::Compilation { .. }));
    assert_eq!(backend.counters().compile_attempts, 0);
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn invalidate_source_drops_its_variants_and_programs() {
    let mut backend = HeadlessBackend::new();
    let mut cache = PipelineCache::new();
    let vert = ShaderSource::new("quad.vert", VERT);
    let frag_a = ShaderSource::new("a.frag", FRAG);
    let frag_b = ShaderSource::new("b.frag", "void main() {}\n");
    let table = FlagTable::new(vec![FlagDefinition::new("fx.on", "USE_FX")], None).unwrap();

    for on in [false, true] {
        let state = StateSnapshot::new().with("fx.on", on);
        cache.resolve(&mut backend, &vert, &frag_a, &table, &state).unwrap();
        cache.resolve(&mut backend, &vert, &frag_b, &table, &state).unwrap();
    }
    assert_eq!(cache.variant_count(), 4);

    let invalidation = cache.invalidate_source(&mut backend, frag_a.id());
    assert_eq!(invalidation.variants, 2);
    assert_eq!(invalidation.programs.len(), 2);
    assert_eq!(cache.variant_count(), 2);
    assert_eq!(cache.program_count(), 2);
    assert_eq!(backend.counters().programs_destroyed, 2);

    // Invalidating the shared vertex stage drops everything left.
    assert_eq!(cache.invalidate_source(&mut backend, vert.id()).variants, 2);
    assert_eq!(cache.program_count(), 0);
}

#[test]
fn source_identity_follows_content() {
    let a = ShaderSource::new("a.frag", FRAG);
    let renamed = ShaderSource::new("other.frag", FRAG);
    let edited = ShaderSource::new("a.frag", "void main() { }\n");

    assert_eq!(a.id(), renamed.id());
    assert_ne!(a.id(), edited.id());
}
