//! Named attribute setters and getters exposed to configuration.

use super::ShaderProgram;
use crate::device::GraphicsDevice;
use crate::types::{FillMode, Sideness, UnknownVariant};
use crate::value::{Value, ValueError};

pub const ATTRIBUTES: [&str; 7] = [
    "fill", "color", "scale", "sideness", "layout", "blending", "uniform",
];

#[derive(Debug, thiserror::Error)]
pub enum AttributeError {
    #[error("unknown attribute '{0}'")]
    Unknown(String),
    #[error("attribute '{name}' takes {expected}, got {got} value(s)")]
    Arity {
        name: &'static str,
        expected: &'static str,
        got: usize,
    },
    #[error("attribute '{name}': {source}")]
    Value {
        name: &'static str,
        #[source]
        source: ValueError,
    },
    #[error(transparent)]
    Variant(#[from] UnknownVariant),
    #[error("sideness must be 0, 1 or 2, got {0}")]
    Sideness(i32),
    #[error("'{0}' is not a valid uniform name")]
    UniformName(String),
}

fn expect_len(
    name: &'static str,
    args: &[Value],
    allowed: &[usize],
    expected: &'static str,
) -> Result<(), AttributeError> {
    if allowed.contains(&args.len()) {
        Ok(())
    } else {
        Err(AttributeError::Arity {
            name,
            expected,
            got: args.len(),
        })
    }
}

fn floats(name: &'static str, args: &[Value]) -> Result<Vec<f32>, AttributeError> {
    args.iter()
        .map(|arg| arg.as_float().map_err(|source| AttributeError::Value { name, source }))
        .collect()
}

fn ints(name: &'static str, args: &[Value]) -> Result<Vec<i32>, AttributeError> {
    args.iter()
        .map(|arg| arg.as_int().map_err(|source| AttributeError::Value { name, source }))
        .collect()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
        && chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

impl ShaderProgram {
    /// Applies a named attribute. Arguments are validated before any state
    /// changes.
    pub fn set_attribute(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        name: &str,
        args: &[Value],
    ) -> Result<(), AttributeError> {
        match name {
            "fill" => {
                expect_len("fill", args, &[1], "one mode name")?;
                let mode = args[0]
                    .as_str()
                    .map_err(|source| AttributeError::Value { name: "fill", source })?
                    .parse::<FillMode>()?;
                self.set_fill(gpu, mode);
            }
            "color" => {
                expect_len("color", args, &[4], "four numbers")?;
                let color = floats("color", args)?;
                self.set_uniform("_color", color.into_iter().map(Value::Float).collect());
            }
            "scale" => {
                expect_len("scale", args, &[1, 3], "one or three numbers")?;
                let mut scale = floats("scale", args)?;
                if scale.len() == 1 {
                    scale = vec![scale[0]; 3];
                }
                self.set_uniform("_scale", scale.into_iter().map(Value::Float).collect());
            }
            "sideness" => {
                expect_len("sideness", args, &[1], "one integer")?;
                let index = ints("sideness", args)?[0];
                let sideness = Sideness::from_index(index).ok_or(AttributeError::Sideness(index))?;
                self.sideness = sideness;
                self.set_uniform("_sideness", vec![Value::Int(index)]);
            }
            "layout" => {
                expect_len("layout", args, &[1, 2, 3, 4], "one to four integers")?;
                let mut layout = [0; 4];
                for (slot, value) in layout.iter_mut().zip(ints("layout", args)?) {
                    *slot = value;
                }
                self.layout = layout;
                self.set_uniform("_layout", layout.iter().copied().map(Value::Int).collect());
            }
            "blending" => {
                expect_len("blending", args, &[1], "one value")?;
                self.set_uniform("_texBlendingMap", vec![args[0].clone()]);
            }
            "uniform" => {
                if args.len() < 2 {
                    return Err(AttributeError::Arity {
                        name: "uniform",
                        expected: "a name followed by at least one value",
                        got: args.len(),
                    });
                }
                let uniform = args[0]
                    .as_str()
                    .map_err(|source| AttributeError::Value { name: "uniform", source })?;
                if !is_identifier(uniform) {
                    return Err(AttributeError::UniformName(uniform.to_owned()));
                }
                if !self.set_uniform(uniform, args[1..].to_vec()) {
                    tracing::trace!(uniform, "uniform unchanged; nothing queued");
                }
            }
            other => return Err(AttributeError::Unknown(other.to_owned())),
        }
        Ok(())
    }

    /// Current value of a named attribute, if it has one.
    pub fn attribute(&self, name: &str) -> Option<Vec<Value>> {
        match name {
            "fill" => Some(vec![Value::from(self.fill().as_str())]),
            "sideness" => Some(vec![Value::Int(self.sideness.index())]),
            "layout" => Some(self.layout.iter().copied().map(Value::Int).collect()),
            "color" => self.uniforms().values("_color").map(<[Value]>::to_vec),
            "scale" => self.uniforms().values("_scale").map(<[Value]>::to_vec),
            "blending" => self.uniforms().values("_texBlendingMap").map(<[Value]>::to_vec),
            _ => None,
        }
    }
}
