//! Maps configuration values onto shader attributes.

use anyhow::{Context, Result};
use lumiere_config::{ShaderSettings, UniformSetting};
use lumiere_renderer::{FillMode, GraphicsDevice, ShaderProgram, Value};

pub fn uniform_value(setting: &UniformSetting) -> Value {
    match setting {
        UniformSetting::Int(value) => {
            Value::Int((*value).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32)
        }
        UniformSetting::Float(value) => Value::Float(*value as f32),
        UniformSetting::Text(value) => Value::Str(value.clone()),
        UniformSetting::List(items) => Value::Seq(items.iter().map(uniform_value).collect()),
    }
}

/// A top-level list holds the components of one uniform; nested lists stay
/// sequences for buffer-backed uniforms.
pub fn uniform_values(setting: &UniformSetting) -> Vec<Value> {
    match setting {
        UniformSetting::List(items) => items.iter().map(uniform_value).collect(),
        scalar => vec![uniform_value(scalar)],
    }
}

pub fn fill_mode(settings: &ShaderSettings) -> Result<FillMode> {
    settings
        .fill
        .as_str()
        .parse::<FillMode>()
        .context("invalid fill mode in configuration")
}

/// Applies every configured attribute. `fill` overrides the configured mode.
pub fn apply_shader_settings(
    program: &mut ShaderProgram,
    gpu: &mut dyn GraphicsDevice,
    settings: &ShaderSettings,
    fill: Option<FillMode>,
) -> Result<()> {
    let fill = match fill {
        Some(fill) => fill,
        None => fill_mode(settings)?,
    };
    program
        .set_attribute(gpu, "fill", &[Value::from(fill.as_str())])
        .context("failed to apply shader.fill")?;

    if let Some(color) = settings.color {
        let args: Vec<Value> = color.iter().copied().map(Value::Float).collect();
        program
            .set_attribute(gpu, "color", &args)
            .context("failed to apply shader.color")?;
    }
    if let Some(scale) = &settings.scale {
        let args: Vec<Value> = scale.iter().copied().map(Value::Float).collect();
        program
            .set_attribute(gpu, "scale", &args)
            .context("failed to apply shader.scale")?;
    }
    if let Some(sideness) = settings.sideness {
        program
            .set_attribute(gpu, "sideness", &[Value::Int(sideness)])
            .context("failed to apply shader.sideness")?;
    }
    if let Some(layout) = &settings.layout {
        let args: Vec<Value> = layout.iter().copied().map(Value::Int).collect();
        program
            .set_attribute(gpu, "layout", &args)
            .context("failed to apply shader.layout")?;
    }

    for (name, setting) in &settings.uniforms {
        let mut args = vec![Value::from(name.as_str())];
        args.extend(uniform_values(setting));
        program
            .set_attribute(gpu, "uniform", &args)
            .with_context(|| format!("failed to apply shader.uniforms.{name}"))?;
        tracing::debug!(uniform = %name, "configured uniform applied");
    }
    Ok(())
}
