//! Post-Processing Tests
//!
//! Tests for:
//! - Graph building: name validation, forward and unknown references
//! - Recording: auto targets, working color promotion, stage-to-stage reads
//! - Built-in chain: every effect in strict mode, disabled effects, variants
//! - Shared textures: SSAO noise reference counting across instances
//! - Fallbacks: missing depth, integer state feeding float uniforms

use myth_frame::backend::{GpuBackend, GpuCall, HeadlessBackend, TextureDesc, TextureHandle, Viewport};
use myth_frame::command::UniformValue;
use myth_frame::graph::GraphResource;
use myth_frame::post::effects::SSAO_NOISE;
use myth_frame::post::{
    BuiltinEffects, PostFrame, StageInput, StageTarget, ToneMappingMode, WarningKind,
    standard_chain,
};
use myth_frame::{
    EffectGroup, FrameError, FrameSettings, PostGraph, PostProcessing, Renderer, ShaderSource,
    StateSnapshot, SubPass,
};

const VERT: &str = "void main() {}\n";
const FRAG: &str = "uniform sampler2D uTexture;\nuniform vec2 uTexelSize;\nvoid main() {}\n";

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn frag() -> ShaderSource {
    ShaderSource::new("pass.frag", FRAG)
}

fn post(groups: Vec<EffectGroup>) -> PostProcessing {
    PostProcessing::with_vertex(
        PostGraph::build(groups).unwrap(),
        ShaderSource::new("fullscreen.vert", VERT),
    )
}

fn renderer(settings: FrameSettings) -> Renderer<HeadlessBackend> {
    Renderer::new(HeadlessBackend::recording(), settings).unwrap()
}

fn scene_texture(renderer: &mut Renderer<HeadlessBackend>, size: u32) -> TextureHandle {
    renderer
        .backend_mut()
        .create_texture(
            &TextureDesc::new_2d(size, size, wgpu::TextureFormat::Rgba16Float),
            Some("scene"),
        )
        .unwrap()
}

fn all_enabled() -> StateSnapshot {
    StateSnapshot::new()
        .with("post.ssao.enabled", true)
        .with("post.dof.enabled", true)
        .with("post.bloom.enabled", true)
        .with("post.toneMapping", ToneMappingMode::ACESFilmic)
}

// ============================================================================
// Graph Building
// ============================================================================

#[test]
fn malformed_names_are_configuration_errors() {
    let cases = [
        vec![EffectGroup::new("bad.name").pass(SubPass::new("main", frag()))],
        vec![EffectGroup::new("fx").pass(SubPass::new("", frag()))],
        vec![
            EffectGroup::new("fx").pass(SubPass::new("main", frag())),
            EffectGroup::new("fx").pass(SubPass::new("other", frag())),
        ],
        vec![
            EffectGroup::new("fx")
                .pass(SubPass::new("main", frag()))
                .pass(SubPass::new("main", frag())),
        ],
    ];
    for groups in cases {
        assert!(matches!(
            PostGraph::build(groups),
            Err(FrameError::Configuration(_))
        ));
    }
}

#[test]
fn forward_reference_warns_and_falls_back_to_working_color() {
    init_logger();
    let graph = PostGraph::build(vec![
        EffectGroup::new("effectA")
            .pass(SubPass::new("main", frag()).input("uExtra", "effectB.main")),
        EffectGroup::new("effectB").pass(SubPass::new("main", frag())),
    ])
    .unwrap();

    assert_eq!(graph.warnings().len(), 1);
    let warning = &graph.warnings()[0];
    assert_eq!(warning.kind, WarningKind::ForwardReference);
    assert_eq!(warning.stage, "effectA.main");
    assert_eq!(warning.reference, "effectB.main");

    let stage = graph.stage(graph.find("effectA.main").unwrap()).unwrap();
    assert_eq!(stage.inputs[0].1, StageInput::Working);
}

#[test]
fn forward_reference_still_renders() {
    init_logger();
    let mut renderer = renderer(FrameSettings::default());
    let scene = scene_texture(&mut renderer, 64);
    let mut post = post(vec![
        EffectGroup::new("effectA")
            .pass(SubPass::new("main", frag()).input("uExtra", "effectB.main")),
        EffectGroup::new("effectB").pass(SubPass::new("main", frag()).target("screen")),
    ]);
    let state = StateSnapshot::new();

    renderer.begin_frame().unwrap();
    let report = renderer
        .recorder()
        .record_post(&mut post, &PostFrame::new(Viewport::new(64, 64), scene, &state))
        .unwrap();
    assert_eq!(report.pass_count(), 2);
    assert_eq!(renderer.end_frame().unwrap().passes, 2);
}

#[test]
fn unknown_references_degrade_with_warnings() {
    init_logger();
    let graph = PostGraph::build(vec![
        EffectGroup::new("bloom").pass(
            SubPass::new("main", frag())
                .source("blom.main")
                .target("nowhere"),
        ),
    ])
    .unwrap();

    let kinds: Vec<_> = graph.warnings().iter().map(|w| w.kind).collect();
    assert_eq!(
        kinds,
        [WarningKind::UnknownReference, WarningKind::UnknownReference]
    );
    let stage = &graph.stages()[0];
    assert_eq!(stage.source, StageInput::Working);
    assert_eq!(stage.target, StageTarget::Auto);
}

#[test]
fn effect_name_reference_resolves_to_its_last_sub_pass() {
    let graph = PostGraph::build(vec![
        EffectGroup::new("blur")
            .pass(SubPass::new("h", frag()))
            .pass(SubPass::new("v", frag())),
        EffectGroup::new("final").pass(SubPass::new("main", frag()).source("blur")),
    ])
    .unwrap();

    assert!(graph.warnings().is_empty());
    let last = graph.find("blur.v").unwrap();
    let main = graph.stage(graph.find("final.main").unwrap()).unwrap();
    assert_eq!(main.source, StageInput::Stage(last));
}

// ============================================================================
// Recording
// ============================================================================

#[test]
fn threshold_then_screen_reads_the_previous_output() {
    let mut renderer = renderer(FrameSettings::default());
    let scene = scene_texture(&mut renderer, 256);
    let mut post = post(vec![
        EffectGroup::new("bloom")
            .pass(SubPass::new("threshold", frag()).source("color"))
            .pass(
                SubPass::new("main", frag())
                    .source("threshold")
                    .target("screen"),
            ),
    ]);
    let state = StateSnapshot::new();

    renderer.begin_frame().unwrap();
    let report = renderer
        .recorder()
        .record_post(&mut post, &PostFrame::new(Viewport::new(256, 256), scene, &state))
        .unwrap();

    assert_eq!(report.pass_count(), 2);
    assert!(report.warnings.is_empty());

    let threshold = report
        .output(post.graph().find("bloom.threshold").unwrap())
        .copied()
        .unwrap();
    let color = threshold.color.unwrap();
    let desc = renderer.backend().texture_desc(color).unwrap();
    assert_eq!((desc.width, desc.height), (256, 256));
    assert_eq!(report.working, Some(color));

    let passes = renderer.graph().passes();
    assert_eq!(passes[0].reads(), [GraphResource::Texture(scene)]);
    assert_eq!(passes[1].reads(), [GraphResource::Texture(color)]);

    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.passes, 2);
    assert_eq!(renderer.backend().counters().draws, 2);
    assert!(renderer
        .backend()
        .calls()
        .iter()
        .any(|c| matches!(c, GpuCall::BindTexture { texture, .. } if *texture == color)));
}

#[test]
fn transient_targets_are_reused_across_frames() {
    let mut renderer = renderer(FrameSettings::default());
    let scene = scene_texture(&mut renderer, 128);
    let mut post = post(vec![
        EffectGroup::new("fx")
            .pass(SubPass::new("a", frag()))
            .pass(SubPass::new("b", frag()).target("screen")),
    ]);
    let state = StateSnapshot::new();
    let frame = PostFrame::new(Viewport::new(128, 128), scene, &state);

    renderer.begin_frame().unwrap();
    renderer.recorder().record_post(&mut post, &frame).unwrap();
    renderer.end_frame().unwrap();
    let created = renderer.backend().counters().textures_created;

    renderer.begin_frame().unwrap();
    renderer.recorder().record_post(&mut post, &frame).unwrap();
    let stats = renderer.end_frame().unwrap();

    assert_eq!(renderer.backend().counters().textures_created, created);
    assert_eq!(stats.reclaimed, 0);
}

#[test]
fn integer_state_feeds_float_uniforms() {
    let mut renderer = renderer(FrameSettings::default().with_strict_uniforms(true));
    let scene = scene_texture(&mut renderer, 32);
    let fragment = ShaderSource::new(
        "strength.frag",
        "uniform sampler2D uTexture;\nuniform float uStrength;\nvoid main() {}\n",
    );
    let mut post = post(vec![
        EffectGroup::new("fx").pass(
            SubPass::new("main", fragment)
                .uniform_from_state("uStrength", "fx.strength")
                .target("screen"),
        ),
    ]);
    let state = StateSnapshot::new().with("fx.strength", 2_i32);

    renderer.begin_frame().unwrap();
    renderer
        .recorder()
        .record_post(&mut post, &PostFrame::new(Viewport::new(32, 32), scene, &state))
        .unwrap();
    renderer.end_frame().unwrap();

    assert!(renderer.backend().calls().iter().any(|c| matches!(
        c,
        GpuCall::SetUniform { name, value: UniformValue::Float(v), .. }
            if name == "uStrength" && *v == 2.0
    )));
}

// ============================================================================
// Built-in Chain
// ============================================================================

#[test]
fn standard_chain_runs_every_effect_in_strict_mode() {
    let mut renderer = renderer(FrameSettings::default().with_strict_uniforms(true));
    let scene = scene_texture(&mut renderer, 256);
    let depth = renderer
        .backend_mut()
        .create_texture(
            &TextureDesc::new_2d(256, 256, wgpu::TextureFormat::Depth24Plus),
            Some("depth"),
        )
        .unwrap();
    let mut post =
        PostProcessing::new(PostGraph::build(standard_chain(BuiltinEffects::all()).unwrap()).unwrap())
            .unwrap();
    assert!(post.graph().warnings().is_empty());

    let state = all_enabled();
    renderer.begin_frame().unwrap();
    let report = renderer
        .recorder()
        .record_post(
            &mut post,
            &PostFrame::new(Viewport::new(256, 256), scene, &state).with_depth(depth),
        )
        .unwrap();
    assert!(report.skipped.is_empty());
    assert!(report.warnings.is_empty());
    assert_eq!(report.pass_count(), 8);

    let stats = renderer.end_frame().unwrap();
    assert_eq!(stats.passes, 8);
    let variants = renderer.pipelines().variant_count();

    // A different tone mapping operator is a different final variant.
    let state = all_enabled().with("post.toneMapping", ToneMappingMode::Reinhard);
    renderer.begin_frame().unwrap();
    renderer
        .recorder()
        .record_post(
            &mut post,
            &PostFrame::new(Viewport::new(256, 256), scene, &state).with_depth(depth),
        )
        .unwrap();
    renderer.end_frame().unwrap();
    assert_eq!(renderer.pipelines().variant_count(), variants + 1);
}

#[test]
fn disabled_effects_leave_only_the_final_composite() {
    let mut renderer = renderer(FrameSettings::default());
    let scene = scene_texture(&mut renderer, 64);
    let mut post =
        PostProcessing::new(PostGraph::build(standard_chain(BuiltinEffects::all()).unwrap()).unwrap())
            .unwrap();
    let state = StateSnapshot::new();

    renderer.begin_frame().unwrap();
    let report = renderer
        .recorder()
        .record_post(&mut post, &PostFrame::new(Viewport::new(64, 64), scene, &state))
        .unwrap();

    assert_eq!(report.skipped, ["ssao", "dof", "bloom"]);
    assert_eq!(report.pass_count(), 1);
    assert_eq!(report.working, Some(scene));
    assert_eq!(renderer.graph().passes()[0].name(), "final.main");
    assert_eq!(renderer.end_frame().unwrap().passes, 1);
}

#[test]
fn final_composite_reads_the_bloom_result() {
    let mut renderer = renderer(FrameSettings::default());
    let scene = scene_texture(&mut renderer, 128);
    let mut post =
        PostProcessing::new(PostGraph::build(standard_chain(BuiltinEffects::BLOOM).unwrap()).unwrap())
            .unwrap();
    let state = StateSnapshot::new().with("post.bloom.enabled", true);

    renderer.begin_frame().unwrap();
    let report = renderer
        .recorder()
        .record_post(&mut post, &PostFrame::new(Viewport::new(128, 128), scene, &state))
        .unwrap();
    let graph = post.graph();
    let output = |label: &str| report.output(graph.find(label).unwrap()).copied().unwrap();

    // The vertical blur renders back into the threshold target.
    assert_eq!(output("bloom.blur_v").color, output("bloom.threshold").color);
    assert_eq!(output("bloom.threshold").size.width, 64);

    let bloom = output("bloom.main").color.unwrap();
    assert_eq!(report.working, Some(bloom));
    let passes = renderer.graph().passes();
    assert_eq!(passes.len(), 5);
    assert_eq!(passes[4].reads(), [GraphResource::Texture(bloom)]);
    renderer.end_frame().unwrap();
}

#[test]
fn ssao_without_depth_warns_missing_input() {
    init_logger();
    let mut renderer = renderer(FrameSettings::default());
    let scene = scene_texture(&mut renderer, 64);
    let mut post =
        PostProcessing::new(PostGraph::build(standard_chain(BuiltinEffects::SSAO).unwrap()).unwrap())
            .unwrap();
    let state = StateSnapshot::new().with("post.ssao.enabled", true);

    renderer.begin_frame().unwrap();
    let report = renderer
        .recorder()
        .record_post(&mut post, &PostFrame::new(Viewport::new(64, 64), scene, &state))
        .unwrap();

    assert!(report.warnings.iter().any(|w| w.kind == WarningKind::MissingInput
        && w.stage == "ssao.occlusion"
        && w.reference == "depth"));
    assert_eq!(report.pass_count(), 3);
    renderer.end_frame().unwrap();
}

// ============================================================================
// Shared Textures
// ============================================================================

#[test]
fn ssao_noise_is_shared_between_instances() {
    let mut renderer = renderer(FrameSettings::default());
    let scene = scene_texture(&mut renderer, 64);
    let depth = scene_texture(&mut renderer, 64);
    let chain = || {
        PostProcessing::new(PostGraph::build(standard_chain(BuiltinEffects::SSAO).unwrap()).unwrap())
            .unwrap()
    };
    let mut first = chain();
    let mut second = chain();
    let state = StateSnapshot::new().with("post.ssao.enabled", true);
    let frame = PostFrame::new(Viewport::new(64, 64), scene, &state).with_depth(depth);

    renderer.begin_frame().unwrap();
    let uploads = renderer.backend().counters().texture_updates;
    renderer.recorder().record_post(&mut first, &frame).unwrap();
    renderer.recorder().record_post(&mut second, &frame).unwrap();
    renderer.end_frame().unwrap();

    // Created and uploaded once, held by both instances.
    assert_eq!(renderer.backend().counters().texture_updates, uploads + 1);
    assert_eq!(renderer.resources().shared_ref_count(SSAO_NOISE), 2);
    assert_eq!(first.shared_count(), 1);

    let destroyed = renderer.backend().counters().textures_destroyed;
    {
        let mut recorder = renderer.recorder();
        first.dispose(&mut *recorder.backend, &mut *recorder.resources).unwrap();
    }
    assert_eq!(renderer.resources().shared_ref_count(SSAO_NOISE), 1);
    assert_eq!(renderer.backend().counters().textures_destroyed, destroyed);

    {
        let mut recorder = renderer.recorder();
        second.dispose(&mut *recorder.backend, &mut *recorder.resources).unwrap();
    }
    assert_eq!(renderer.resources().shared_ref_count(SSAO_NOISE), 0);
    assert_eq!(renderer.backend().counters().textures_destroyed, destroyed + 1);
    assert_eq!(second.shared_count(), 0);
}
