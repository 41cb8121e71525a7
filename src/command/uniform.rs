//! Uniform values as submitted with commands.

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::backend::{TextureHandle, UniformKind};

/// Uniform name → value.
pub type UniformMap = FxHashMap<String, UniformValue>;

/// A single uniform value.
#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    FloatArray(Vec<f32>),
    /// Sampler uniform; bound to a texture unit by the command queue.
    Texture(TextureHandle),
}

impl UniformValue {
    #[inline]
    #[must_use]
    pub fn as_texture(&self) -> Option<TextureHandle> {
        match self {
            UniformValue::Texture(t) => Some(*t),
            _ => None,
        }
    }

    /// Raw bit pattern of every scalar component.
    ///
    /// Diffing compares these instead of `f32` values so that a `NaN` that
    /// was already uploaded is not re-sent on every frame.
    fn component_bits(&self) -> SmallVec<[u32; 16]> {
        match self {
            UniformValue::Float(v) => SmallVec::from_slice(&[v.to_bits()]),
            UniformValue::Int(v) => SmallVec::from_slice(&[*v as u32]),
            UniformValue::Bool(v) => SmallVec::from_slice(&[u32::from(*v)]),
            UniformValue::Vec2(v) => SmallVec::from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec3(v) => SmallVec::from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Vec4(v) => SmallVec::from_slice(bytemuck::cast_slice(&v.to_array())),
            UniformValue::Mat3(m) => {
                SmallVec::from_slice(bytemuck::cast_slice(&m.to_cols_array()))
            }
            UniformValue::Mat4(m) => {
                SmallVec::from_slice(bytemuck::cast_slice(&m.to_cols_array()))
            }
            UniformValue::FloatArray(values) => {
                SmallVec::from_slice(bytemuck::cast_slice(values.as_slice()))
            }
            UniformValue::Texture(t) => {
                let raw = t.raw();
                SmallVec::from_slice(&[raw as u32, (raw >> 32) as u32])
            }
        }
    }

    /// Element-wise exact comparison used by uniform diffing.
    #[must_use]
    pub fn same_as(&self, other: &UniformValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.component_bits() == other.component_bits()
    }

    /// Whether this value can be uploaded to a uniform of `kind`.
    #[must_use]
    pub fn fits(&self, kind: UniformKind) -> bool {
        matches!(
            (self, kind),
            (UniformValue::Float(_), UniformKind::Float)
                | (UniformValue::Int(_), UniformKind::Int | UniformKind::Bool)
                | (UniformValue::Bool(_), UniformKind::Bool | UniformKind::Int)
                | (UniformValue::Vec2(_), UniformKind::Vec2)
                | (UniformValue::Vec3(_), UniformKind::Vec3)
                | (UniformValue::Vec4(_), UniformKind::Vec4)
                | (UniformValue::Mat3(_), UniformKind::Mat3)
                | (UniformValue::Mat4(_), UniformKind::Mat4)
                | (UniformValue::FloatArray(_), UniformKind::FloatArray)
                | (
                    UniformValue::Texture(_),
                    UniformKind::Sampler2D | UniformKind::SamplerCube
                )
        )
    }
}

macro_rules! impl_uniform_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for UniformValue {
                #[inline]
                fn from(v: $ty) -> Self {
                    UniformValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_uniform_from!(
    f32 => Float,
    i32 => Int,
    bool => Bool,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    [f32; 2] => Vec2,
    [f32; 3] => Vec3,
    [f32; 4] => Vec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
    Vec<f32> => FloatArray,
    TextureHandle => Texture,
);
