//! Command Queue Tests
//!
//! Tests for:
//! - State diffing: a repeated command issues no binding calls at all
//! - Uniform bookkeeping: per-program values, texture units shared across programs
//! - Program lifetime: forgetting destroyed programs, reloading a shader source
//! - Scopes: nested overrides, restoration, scopes that never draw
//! - Deferred submission: enqueue / flush ordering and failure handling
//! - Strict mode and configuration errors

use std::sync::Arc;

use glam::Mat4;

use myth_frame::backend::{
    ClearValues, DepthState, DrawCall, FramebufferHandle, GpuBackend, GpuCall, HeadlessBackend,
    ProgramInfo, RenderTarget, TextureHandle, Viewport,
};
use myth_frame::command::{Command, CommandQueue, StateOverrides, UniformValue};
use myth_frame::pipeline::ProgramRef;
use myth_frame::{
    FlagTable, FrameError, FrameSettings, Renderer, ShaderSource, StateSnapshot,
};

const VERT: &str = "uniform mat4 uModelMatrix;\nvoid main() {}\n";
const FRAG: &str = "uniform float uExposure;\nuniform vec2 uTexelSize;\nuniform sampler2D uTexture;\nvoid main() {}\n";

fn program(backend: &mut HeadlessBackend, fragment: &str) -> ProgramRef {
    let info: ProgramInfo = backend.create_program(VERT, fragment, "test").unwrap();
    Arc::new(info)
}

fn draw(program: &ProgramRef, texture: TextureHandle, exposure: f32) -> Command {
    Command::draw(DrawCall::fullscreen_triangle())
        .with_state(
            &StateOverrides::new()
                .with_program(program.clone())
                .with_viewport(Viewport::new(256, 256))
                .with_matrices(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY),
        )
        .with_uniform("uExposure", exposure)
        .with_uniform("uTexelSize", [1.0_f32 / 256.0, 1.0 / 256.0])
        .with_uniform("uTexture", texture)
}

// ============================================================================
// State diffing
// ============================================================================

#[test]
fn identical_command_twice_issues_no_redundant_calls() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, FRAG);
    let cmd = draw(&prog, TextureHandle::from_raw(11), 1.0);

    queue.submit(&mut backend, &cmd).unwrap();
    let first = backend.counters();
    assert_eq!(first.uniform_sets, 4);
    assert_eq!(first.texture_binds, 1);
    assert_eq!(first.program_binds, 1);

    backend.reset_counters();
    queue.submit(&mut backend, &cmd).unwrap();
    let second = backend.counters();

    assert_eq!(second.uniform_sets, 0);
    assert_eq!(second.texture_binds, 0);
    assert_eq!(second.state_calls(), 0);
    assert_eq!(second.draws, 1);
}

#[test]
fn only_changed_uniforms_are_uploaded() {
    let mut backend = HeadlessBackend::recording();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, FRAG);
    let texture = TextureHandle::from_raw(11);

    queue.submit(&mut backend, &draw(&prog, texture, 1.0)).unwrap();
    backend.take_calls();
    queue.submit(&mut backend, &draw(&prog, texture, 2.0)).unwrap();

    let uploads: Vec<_> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            GpuCall::SetUniform { name, value, .. } => Some((name.as_str(), value.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(uploads, [("uExposure", UniformValue::Float(2.0))]);
}

#[test]
fn switching_texture_rebinds_the_same_unit() {
    let mut backend = HeadlessBackend::recording();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, FRAG);

    queue
        .submit(&mut backend, &draw(&prog, TextureHandle::from_raw(1), 1.0))
        .unwrap();
    backend.take_calls();
    queue
        .submit(&mut backend, &draw(&prog, TextureHandle::from_raw(2), 1.0))
        .unwrap();

    let calls = backend.take_calls();
    assert!(calls.contains(&GpuCall::BindTexture {
        unit: 0,
        texture: TextureHandle::from_raw(2),
    }));
    // The unit index itself was uploaded on the first draw only.
    assert!(!calls.iter().any(|c| matches!(c, GpuCall::SetUniform { .. })));
}

#[test]
fn texture_units_are_tracked_across_programs() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();
    let a = program(&mut backend, FRAG);
    let b = program(&mut backend, "uniform sampler2D uTexture;\nvoid main() {}\n");
    let tex_a = TextureHandle::from_raw(1);
    let tex_b = TextureHandle::from_raw(2);
    let draw_b = Command::draw(DrawCall::fullscreen_triangle())
        .with_state(&StateOverrides::new().with_program(b.clone()))
        .with_uniform("uTexture", tex_b);

    queue.submit(&mut backend, &draw(&a, tex_a, 1.0)).unwrap();
    queue.submit(&mut backend, &draw_b).unwrap();
    backend.reset_counters();

    // Program B overwrote unit 0, so program A must rebind its texture.
    queue.submit(&mut backend, &draw(&a, tex_a, 1.0)).unwrap();
    assert_eq!(backend.counters().texture_binds, 1);
    assert_eq!(backend.counters().program_binds, 1);
    assert_eq!(backend.counters().uniform_sets, 0);
}

#[test]
fn invalidate_forces_a_full_resync() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, FRAG);
    let cmd = draw(&prog, TextureHandle::from_raw(3), 1.0);

    queue.submit(&mut backend, &cmd).unwrap();
    let first = backend.counters();
    backend.reset_counters();

    queue.invalidate();
    queue.submit(&mut backend, &cmd).unwrap();
    let again = backend.counters();
    assert_eq!(again.uniform_sets, first.uniform_sets);
    assert_eq!(again.state_calls(), first.state_calls());
}

#[test]
fn submit_stats_count_skips() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, FRAG);
    let cmd = draw(&prog, TextureHandle::from_raw(3), 1.0);

    queue.begin_frame().unwrap();
    queue.submit(&mut backend, &cmd).unwrap();
    queue.submit(&mut backend, &cmd).unwrap();
    let stats = queue.stats();

    assert_eq!(stats.draws, 2);
    assert_eq!(stats.uniform_sets, 4);
    assert_eq!(stats.uniform_skips, 4);
    assert_eq!(stats.texture_binds, 1);
    assert_eq!(stats.texture_skips, 1);
    assert!(stats.state_skips >= stats.state_calls);

    queue.begin_frame().unwrap();
    assert_eq!(queue.stats().draws, 0);
}

// ============================================================================
// Program lifetime
// ============================================================================

#[test]
fn forgotten_program_uploads_its_uniforms_again() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, FRAG);
    let cmd = draw(&prog, TextureHandle::from_raw(11), 1.0);

    queue.submit(&mut backend, &cmd).unwrap();
    queue.forget_program(prog.handle);
    backend.reset_counters();
    queue.submit(&mut backend, &cmd).unwrap();

    let counters = backend.counters();
    assert_eq!(counters.program_binds, 1);
    assert_eq!(counters.uniform_sets, 4);
}

#[test]
fn separate_queues_keep_separate_diff_state() {
    let mut backend = HeadlessBackend::new();
    let prog = program(&mut backend, FRAG);
    let cmd = draw(&prog, TextureHandle::from_raw(11), 1.0);

    let mut first = CommandQueue::default();
    first.submit(&mut backend, &cmd).unwrap();
    backend.reset_counters();

    let mut second = CommandQueue::default();
    second.submit(&mut backend, &cmd).unwrap();
    assert_eq!(backend.counters().uniform_sets, 4);
}

#[test]
fn reloading_one_source_keeps_other_programs_diffed() {
    let mut renderer = Renderer::new(HeadlessBackend::new(), FrameSettings::default()).unwrap();
    let vertex = ShaderSource::new("quad.vert", VERT);
    let reloaded = ShaderSource::new("a.frag", FRAG);
    let untouched = ShaderSource::new("b.frag", format!("{FRAG}// b\n"));
    let texture = TextureHandle::from_raw(11);

    let kept = {
        let mut recorder = renderer.recorder();
        let state = StateSnapshot::new();
        let a = recorder
            .pipelines
            .resolve(&mut *recorder.backend, &vertex, &reloaded, &FlagTable::empty(), &state)
            .unwrap();
        let b = recorder
            .pipelines
            .resolve(&mut *recorder.backend, &vertex, &untouched, &FlagTable::empty(), &state)
            .unwrap();
        recorder
            .queue
            .submit(&mut *recorder.backend, &draw(&a.program, texture, 1.0))
            .unwrap();
        let kept = draw(&b.program, texture, 2.0);
        recorder.queue.submit(&mut *recorder.backend, &kept).unwrap();
        kept
    };

    assert_eq!(renderer.invalidate_source(reloaded.id()), 1);
    assert_eq!(renderer.backend().counters().programs_destroyed, 1);

    renderer.backend_mut().reset_counters();
    {
        let mut recorder = renderer.recorder();
        recorder.queue.submit(&mut *recorder.backend, &kept).unwrap();
    }
    let counters = renderer.backend().counters();
    assert_eq!(counters.uniform_sets, 0);
    assert_eq!(counters.state_calls(), 0);
    assert_eq!(counters.draws, 1);
}

// ============================================================================
// Scopes
// ============================================================================

#[test]
fn scope_without_draw_issues_nothing() {
    let mut backend = HeadlessBackend::recording();
    let mut queue = CommandQueue::default();
    let fb = FramebufferHandle::from_raw(7);

    queue.begin_scope(
        &StateOverrides::new()
            .with_target(RenderTarget::Framebuffer(fb))
            .with_viewport(Viewport::new(64, 64))
            .with_depth(DepthState::LESS_EQUAL),
    );
    queue.end_scope().unwrap();

    assert!(backend.calls().is_empty());
    assert_eq!(queue.scope_depth(), 0);
}

#[test]
fn closing_a_scope_restores_the_parent_state_for_the_next_draw() {
    let mut backend = HeadlessBackend::recording();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, FRAG);
    let cmd = draw(&prog, TextureHandle::from_raw(1), 1.0);
    let offscreen = RenderTarget::Framebuffer(FramebufferHandle::from_raw(9));

    let parent = StateOverrides::new().with_viewport(Viewport::new(128, 128));
    let child = StateOverrides::new()
        .with_target(offscreen)
        .with_viewport(Viewport::new(32, 32));

    queue
        .with_scope(&mut backend, &parent, |queue, backend| {
            queue.with_scope(backend, &child, |queue, backend| {
                queue.submit_with(backend, &cmd, Some(&child))
            })?;
            queue.submit_with(backend, &cmd, Some(&parent))
        })
        .unwrap();

    let fixed: Vec<_> = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, GpuCall::BindFramebuffer(_) | GpuCall::SetViewport(_)))
        .cloned()
        .collect();
    assert_eq!(
        fixed,
        [
            GpuCall::BindFramebuffer(offscreen),
            GpuCall::SetViewport(Viewport::new(32, 32)),
            GpuCall::BindFramebuffer(RenderTarget::Screen),
            GpuCall::SetViewport(Viewport::new(128, 128)),
        ]
    );
}

#[test]
fn inner_uniform_layer_shadows_outer() {
    let mut backend = HeadlessBackend::recording();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, "uniform float uExposure;\nvoid main() {}\n");

    let outer = StateOverrides::new()
        .with_program(prog)
        .with_uniform("uExposure", 1.0_f32);
    let inner = Command::draw(DrawCall::fullscreen_triangle()).with_uniform("uExposure", 4.0_f32);
    let fallback = Command::draw(DrawCall::fullscreen_triangle());

    queue
        .with_scope(&mut backend, &outer, |queue, backend| {
            queue.submit(backend, &inner)?;
            queue.submit(backend, &fallback)
        })
        .unwrap();

    let values: Vec<_> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            GpuCall::SetUniform { value, .. } => Some(value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(values, [UniformValue::Float(4.0), UniformValue::Float(1.0)]);
}

#[test]
fn depth_clear_temporarily_enables_depth_writes() {
    let mut backend = HeadlessBackend::recording();
    let mut queue = CommandQueue::default();
    let read_only = DepthState {
        write: false,
        ..DepthState::LESS_EQUAL
    };

    queue
        .with_scope(
            &mut backend,
            &StateOverrides::new().with_depth(read_only),
            |queue, backend| {
                queue.clear(backend, ClearValues::default().with_depth(1.0));
                Ok(())
            },
        )
        .unwrap();

    let depth_writes: Vec<bool> = backend
        .calls()
        .iter()
        .filter_map(|c| match c {
            GpuCall::SetDepthState(d) => Some(d.write),
            _ => None,
        })
        .collect();
    assert_eq!(depth_writes, [true]);
    assert_eq!(backend.counters().clears, 1);
}

// ============================================================================
// Deferred submission
// ============================================================================

#[test]
fn flush_submits_in_order_then_flushes_backend() {
    let mut backend = HeadlessBackend::recording();
    let mut queue = CommandQueue::default();
    let a = RenderTarget::Framebuffer(FramebufferHandle::from_raw(1));
    let b = RenderTarget::Framebuffer(FramebufferHandle::from_raw(2));

    queue.enqueue(Command::clear(ClearValues::color([0.0; 4])).with_target(a));
    queue.enqueue(Command::clear(ClearValues::color([1.0; 4])).with_target(b));
    assert_eq!(queue.pending(), 2);

    queue.flush(&mut backend).unwrap();
    assert_eq!(queue.pending(), 0);

    let order: Vec<_> = backend
        .calls()
        .iter()
        .filter(|c| matches!(c, GpuCall::Clear { .. } | GpuCall::Flush))
        .cloned()
        .collect();
    assert_eq!(
        order,
        [
            GpuCall::Clear {
                target: a,
                values: ClearValues::color([0.0; 4]),
            },
            GpuCall::Clear {
                target: b,
                values: ClearValues::color([1.0; 4]),
            },
            GpuCall::Flush,
        ]
    );
}

#[test]
fn failing_command_drops_the_rest_of_the_queue() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();

    queue.enqueue(Command::draw(DrawCall::fullscreen_triangle()).with_label("no-program"));
    queue.enqueue(Command::clear(ClearValues::color([0.0; 4])));

    let err = queue.flush(&mut backend).unwrap_err();
    assert!(matches!(err, FrameError::Configuration(ref m) if m.contains("no-program")));
    assert_eq!(queue.pending(), 0);
    assert_eq!(backend.counters().clears, 0);
    assert_eq!(backend.counters().flushes, 0);
    assert_eq!(queue.scope_depth(), 0);
}

// ============================================================================
// Strict mode & configuration errors
// ============================================================================

#[test]
fn missing_uniform_is_silent_unless_strict() {
    let mut backend = HeadlessBackend::new();
    let prog = program(&mut backend, FRAG);
    let partial = Command::draw(DrawCall::fullscreen_triangle())
        .with_state(&StateOverrides::new().with_program(prog))
        .with_uniform("uExposure", 1.0_f32);

    let mut lenient = CommandQueue::default();
    lenient.submit(&mut backend, &partial).unwrap();
    lenient.submit(&mut backend, &partial).unwrap();
    assert_eq!(backend.counters().draws, 2);

    let mut strict = CommandQueue::new(&FrameSettings::default().with_strict_uniforms(true));
    assert!(strict.is_strict());
    let err = strict.submit(&mut backend, &partial).unwrap_err();
    assert!(matches!(err, FrameError::MissingUniform { .. }));
    assert_eq!(backend.counters().draws, 2);
}

#[test]
fn uniform_kind_mismatch_is_configuration_error() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();
    let prog = program(&mut backend, "uniform float uExposure;\nvoid main() {}\n");
    let cmd = Command::draw(DrawCall::fullscreen_triangle())
        .with_state(&StateOverrides::new().with_program(prog))
        .with_uniform("uExposure", TextureHandle::from_raw(1));

    assert!(matches!(
        queue.submit(&mut backend, &cmd),
        Err(FrameError::Configuration(_))
    ));
    assert_eq!(queue.scope_depth(), 0);
}

#[test]
fn clear_without_values_is_a_configuration_error() {
    let mut backend = HeadlessBackend::new();
    let mut queue = CommandQueue::default();

    let empty = Command::parse("clear").unwrap().with_label("empty");
    match queue.submit(&mut backend, &empty) {
        Err(FrameError::Configuration(msg)) => assert!(msg.contains("empty")),
        other => panic!("expected a configuration error, got {other:?}"),
    }
    assert!(matches!(
        queue.submit(&mut backend, &Command::clear(ClearValues::default())),
        Err(FrameError::Configuration(_))
    ));

    queue
        .submit(&mut backend, &Command::clear(ClearValues::color([0.0; 4])))
        .unwrap();
    assert_eq!(backend.counters().clears, 1);
}

#[test]
fn unknown_command_kind_is_rejected() {
    assert!(Command::parse("draw").is_ok());
    assert!(Command::parse("clear").is_ok());
    assert!(matches!(
        Command::parse("dispatch"),
        Err(FrameError::Configuration(_))
    ));
}
