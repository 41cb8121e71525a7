//! Built-in effect stack.
//!
//! Every effect reads its parameters from the state snapshot under `post.*`:
//!
//! | Path | Effect |
//! |---|---|
//! | `post.ssao.enabled`, `.radius`, `.intensity` | ambient occlusion |
//! | `post.dof.enabled`, `.focusDistance`, `.focusRange`, `.maxBlur` | depth of field |
//! | `post.bloom.enabled`, `.threshold`, `.knee`, `.strength`, `.radius` | bloom |
//! | `post.toneMapping`, `post.exposure`, `post.dither`, `post.ditherStrength` | final composite |
//!
//! The final composite always runs, so a chain with every effect disabled
//! still tone-maps the scene color onto the output target.

use std::sync::Arc;

use bitflags::bitflags;
use glam::{Vec3, Vec4};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use super::effect::{EffectGroup, SharedTexture, SizeSpec, SubPass};
use crate::backend::TextureDesc;
use crate::command::UniformValue;
use crate::errors::Result;
use crate::pipeline::{FlagDefinition, FlagTable, FlagType, ShaderSource};
use crate::state::StateValue;

/// Kernel size baked into `post/ssao.frag`.
pub const SSAO_KERNEL_SIZE: u32 = 16;

/// Registry name of the SSAO rotation noise texture.
pub const SSAO_NOISE: &str = "post.ssao.noise";

bitflags! {
    /// Optional effects of [`standard_chain`]; the final composite is always included.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BuiltinEffects: u32 {
        const SSAO = 1 << 0;
        const DOF = 1 << 1;
        const BLOOM = 1 << 2;
    }
}

impl Default for BuiltinEffects {
    fn default() -> Self {
        Self::all()
    }
}

/// Tone mapping operator of the final composite, applied as the
/// `TONE_MAPPING_MODE` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToneMappingMode {
    /// No tone mapping (linear passthrough)
    Linear,
    #[default]
    Neutral,
    Reinhard,
    Cineon,
    ACESFilmic,
}

impl ToneMappingMode {
    #[must_use]
    pub fn as_define(self) -> &'static str {
        match self {
            Self::Linear => "LINEAR",
            Self::Neutral => "NEUTRAL",
            Self::Reinhard => "REINHARD",
            Self::Cineon => "CINEON",
            Self::ACESFilmic => "ACES_FILMIC",
        }
    }
}

impl From<ToneMappingMode> for StateValue {
    fn from(mode: ToneMappingMode) -> Self {
        StateValue::Str(mode.as_define().to_owned())
    }
}

// ============================================================================
// Effects
// ============================================================================

/// Ambient occlusion: an occlusion mask at half resolution, then a multiply
/// onto the working color.
pub fn ssao() -> Result<EffectGroup> {
    let kernel: Vec<f32> = generate_ssao_kernel(SSAO_KERNEL_SIZE)
        .iter()
        .flat_map(|s| [s.x, s.y, s.z])
        .collect();

    Ok(EffectGroup::new("ssao")
        .enabled_when("post.ssao.enabled")
        .pass(
            SubPass::new("occlusion", ShaderSource::embedded("post/ssao.frag")?)
                .source("depth")
                .input("uDepthTexture", "depth")
                .input("uNoiseTexture", ssao_noise_texture())
                .uniform("uKernel", UniformValue::FloatArray(kernel))
                .uniform("uRadius", 0.5_f32)
                .uniform("uIntensity", 1.0_f32)
                .uniform_from_state("uRadius", "post.ssao.radius")
                .uniform_from_state("uIntensity", "post.ssao.intensity")
                .target("aux")
                .size(SizeSpec::Scale(0.5))
                .format(wgpu::TextureFormat::R8Unorm),
        )
        .pass(
            SubPass::new("apply", ShaderSource::embedded("post/ssao_apply.frag")?)
                .input("uSsaoTexture", "occlusion"),
        ))
}

/// Depth of field driven by the scene depth.
pub fn dof() -> Result<EffectGroup> {
    Ok(EffectGroup::new("dof").enabled_when("post.dof.enabled").pass(
        SubPass::new("main", ShaderSource::embedded("post/dof.frag")?)
            .input("uDepthTexture", "depth")
            .uniform("uFocusDistance", 0.5_f32)
            .uniform("uFocusRange", 0.1_f32)
            .uniform("uMaxBlur", 2.0_f32)
            .uniform_from_state("uFocusDistance", "post.dof.focusDistance")
            .uniform_from_state("uFocusRange", "post.dof.focusRange")
            .uniform_from_state("uMaxBlur", "post.dof.maxBlur"),
    ))
}

/// Bloom: bright-pass, separable blur ping-ponged through the threshold
/// target, then an additive composite onto the working color.
pub fn bloom() -> Result<EffectGroup> {
    let blur = ShaderSource::embedded("post/blur.frag")?;
    let blur_flags = FlagTable::new(
        vec![FlagDefinition::new("post.bloom.radius", "BLUR_RADIUS").typed(FlagType::Counter)],
        None,
    )?;

    Ok(EffectGroup::new("bloom")
        .enabled_when("post.bloom.enabled")
        .pass(
            SubPass::new("threshold", ShaderSource::embedded("post/bloom_threshold.frag")?)
                .uniform("uThreshold", 1.0_f32)
                .uniform("uKnee", 0.5_f32)
                .uniform_from_state("uThreshold", "post.bloom.threshold")
                .uniform_from_state("uKnee", "post.bloom.knee")
                .target("aux")
                .size(SizeSpec::Scale(0.5)),
        )
        .pass(
            SubPass::new("blur_h", blur.clone())
                .flags(blur_flags.clone())
                .source("threshold")
                .uniform("uDirection", [1.0_f32, 0.0])
                .target("aux")
                .size(SizeSpec::Scale(0.5)),
        )
        .pass(
            SubPass::new("blur_v", blur)
                .flags(blur_flags)
                .source("blur_h")
                .uniform("uDirection", [0.0_f32, 1.0])
                .target("threshold"),
        )
        .pass(
            SubPass::new("main", ShaderSource::embedded("post/bloom_composite.frag")?)
                .input("uBloomTexture", "blur_v")
                .uniform("uStrength", 0.04_f32)
                .uniform_from_state("uStrength", "post.bloom.strength"),
        ))
}

/// Tone mapping, exposure and optional dithering onto the screen.
pub fn final_composite() -> Result<EffectGroup> {
    let flags = FlagTable::new(
        vec![
            FlagDefinition::new("post.toneMapping", "TONE_MAPPING_MODE").typed(FlagType::Value),
            FlagDefinition::new("post.dither", "USE_DITHER"),
        ],
        None,
    )?;

    Ok(EffectGroup::composite("final").pass(
        SubPass::new("main", ShaderSource::embedded("post/final.frag")?)
            .flags(flags)
            .uniform("uExposure", 1.0_f32)
            .uniform("uDitherStrength", 1.0_f32)
            .uniform_from_state("uExposure", "post.exposure")
            .uniform_from_state("uDitherStrength", "post.ditherStrength")
            .target("screen"),
    ))
}

/// The selected effects in their canonical order, followed by the final composite.
pub fn standard_chain(effects: BuiltinEffects) -> Result<Vec<EffectGroup>> {
    let mut groups = Vec::with_capacity(4);
    if effects.contains(BuiltinEffects::SSAO) {
        groups.push(ssao()?);
    }
    if effects.contains(BuiltinEffects::DOF) {
        groups.push(dof()?);
    }
    if effects.contains(BuiltinEffects::BLOOM) {
        groups.push(bloom()?);
    }
    groups.push(final_composite()?);
    Ok(groups)
}

// ============================================================================
// SSAO data
// ============================================================================

/// Generates a hemisphere sample kernel with importance-weighted distribution.
///
/// Uses a fixed seed, so every instance (and every run) samples the same kernel.
#[must_use]
pub fn generate_ssao_kernel(samples: u32) -> Vec<Vec4> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut kernel = Vec::with_capacity(samples as usize);

    for i in 0..samples {
        let mut sample = Vec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(0.01..1.0),
        )
        .normalize();
        sample *= rng.random_range(0.0..1.0f32);

        // Concentrate samples near the origin.
        let t = i as f32 / samples as f32;
        sample *= lerp(0.1, 1.0, t * t);

        kernel.push(sample.extend(0.0));
    }
    kernel
}

/// Generates a 4×4 rotation noise texture (16 RGBA8 pixels, XY rotation, Z = 0).
#[must_use]
pub fn generate_ssao_noise() -> Vec<[u8; 4]> {
    let mut rng = StdRng::seed_from_u64(12345);
    (0..16)
        .map(|_| {
            let xy = Vec3::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0), 0.0)
                .normalize();
            [
                ((xy.x * 0.5 + 0.5) * 255.0) as u8,
                ((xy.y * 0.5 + 0.5) * 255.0) as u8,
                0,
                255,
            ]
        })
        .collect()
}

/// The noise texture shared by every SSAO effect instance.
#[must_use]
pub fn ssao_noise_texture() -> SharedTexture {
    let data: Vec<u8> = generate_ssao_noise().into_iter().flatten().collect();
    SharedTexture {
        name: Arc::from(SSAO_NOISE),
        desc: TextureDesc::new_2d(4, 4, wgpu::TextureFormat::Rgba8Unorm)
            .with_filter(wgpu::FilterMode::Nearest)
            .with_address_mode(wgpu::AddressMode::Repeat),
        data: Arc::from(data),
    }
}

fn lerp(a: f32, b: f32, f: f32) -> f32 {
    a + f * (b - a)
}
