use std::collections::BTreeMap;
use std::fmt;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use crate::backend::TextureHandle;
use crate::command::UniformValue;

/// Tagged value stored in a [`StateSnapshot`](super::StateSnapshot).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum StateValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
    Texture(TextureHandle),
}

impl StateValue {
    /// Predicate value of a flag without an explicit `compare`.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            StateValue::Null => false,
            StateValue::Bool(b) => *b,
            StateValue::Int(i) => *i != 0,
            StateValue::Float(f) => *f != 0.0 && !f.is_nan(),
            StateValue::Str(s) => !s.is_empty(),
            StateValue::List(_) | StateValue::Map(_) | StateValue::Texture(_) => true,
        }
    }

    /// Equality used by `compare`: numbers compare by value across int/float.
    #[must_use]
    pub fn loose_eq(&self, other: &StateValue) -> bool {
        match (self, other) {
            (StateValue::Int(a), StateValue::Float(b)) | (StateValue::Float(b), StateValue::Int(a)) => {
                (*a as f64) == *b
            }
            _ => self == other,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Int(i) => Some(*i as f64),
            StateValue::Float(f) => Some(*f),
            StateValue::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            StateValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Text spliced into a `#define NAME VALUE` line.
    ///
    /// Floats always carry a decimal point so GLSL parses them as floats.
    #[must_use]
    pub fn define_text(&self) -> Option<String> {
        match self {
            StateValue::Bool(b) => Some(u8::from(*b).to_string()),
            StateValue::Int(i) => Some(i.to_string()),
            StateValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(format!("{f:.1}")),
            StateValue::Float(f) => Some(f.to_string()),
            StateValue::Str(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Converts to a uniform value, if the shape has a uniform counterpart.
    ///
    /// Numeric lists map by length: 2/3/4 → vectors, 9 → `mat3`, 16 → `mat4`,
    /// anything else → float array.
    #[must_use]
    pub fn to_uniform(&self) -> Option<UniformValue> {
        match self {
            StateValue::Bool(b) => Some(UniformValue::Bool(*b)),
            StateValue::Int(i) => Some(UniformValue::Int(*i as i32)),
            StateValue::Float(f) => Some(UniformValue::Float(*f as f32)),
            StateValue::Texture(t) => Some(UniformValue::Texture(*t)),
            StateValue::List(items) => {
                let floats: SmallVec<[f32; 16]> = items
                    .iter()
                    .map(|v| v.as_f64().map(|f| f as f32))
                    .collect::<Option<_>>()?;
                Some(match floats.len() {
                    2 => UniformValue::Vec2(Vec2::from_slice(&floats)),
                    3 => UniformValue::Vec3(Vec3::from_slice(&floats)),
                    4 => UniformValue::Vec4(Vec4::from_slice(&floats)),
                    9 => UniformValue::Mat3(Mat3::from_cols_slice(&floats)),
                    16 => UniformValue::Mat4(Mat4::from_cols_slice(&floats)),
                    _ => UniformValue::FloatArray(floats.to_vec()),
                })
            }
            StateValue::Null | StateValue::Str(_) | StateValue::Map(_) => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateValue::Null => f.write_str("null"),
            StateValue::Bool(b) => write!(f, "{b}"),
            StateValue::Int(i) => write!(f, "{i}"),
            StateValue::Float(v) => write!(f, "{v}"),
            StateValue::Str(s) => write!(f, "{s:?}"),
            StateValue::List(items) => write!(f, "[{} items]", items.len()),
            StateValue::Map(m) => write!(f, "{{{} keys}}", m.len()),
            StateValue::Texture(t) => fmt::Display::fmt(t, f),
        }
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => StateValue::Null,
            serde_json::Value::Bool(b) => StateValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => StateValue::Int(i),
                None => StateValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => StateValue::Str(s),
            serde_json::Value::Array(items) => {
                StateValue::List(items.into_iter().map(StateValue::from).collect())
            }
            serde_json::Value::Object(map) => StateValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, StateValue::from(v)))
                    .collect(),
            ),
        }
    }
}

macro_rules! impl_state_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for StateValue {
                #[inline]
                fn from(v: $ty) -> Self {
                    StateValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_state_from!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f32 => Float,
    f64 => Float,
    String => Str,
    &str => Str,
    TextureHandle => Texture,
);
