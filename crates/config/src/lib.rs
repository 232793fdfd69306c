use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;
pub const DEFAULT_COPY_CHUNKS: usize = 4;
const MAX_COPY_CHUNKS: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LumiereConfig {
    pub version: u32,
    #[serde(default)]
    pub shader: ShaderSettings,
    #[serde(default)]
    pub texture: TextureSettings,
    #[serde(default)]
    pub workers: WorkerSettings,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FillSetting {
    #[default]
    Texture,
    Color,
    Uv,
    Wireframe,
    Window,
}

impl FillSetting {
    pub fn as_str(self) -> &'static str {
        match self {
            FillSetting::Texture => "texture",
            FillSetting::Color => "color",
            FillSetting::Uv => "uv",
            FillSetting::Wireframe => "wireframe",
            FillSetting::Window => "window",
        }
    }
}

/// Attribute values applied to every shader program at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ShaderSettings {
    #[serde(default)]
    pub fill: FillSetting,
    #[serde(default)]
    pub color: Option<[f32; 4]>,
    #[serde(default)]
    pub scale: Option<Vec<f32>>,
    #[serde(default)]
    pub sideness: Option<i32>,
    #[serde(default)]
    pub layout: Option<Vec<i32>>,
    #[serde(default)]
    pub uniforms: BTreeMap<String, UniformSetting>,
}

/// Raw uniform value as written in TOML.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum UniformSetting {
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<UniformSetting>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TextureSettings {
    #[serde(default = "default_filtering")]
    pub filtering: bool,
    #[serde(default = "default_copy_chunks")]
    pub copy_chunks: usize,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            filtering: default_filtering(),
            copy_chunks: default_copy_chunks(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WorkerSettings {
    #[serde(default)]
    pub threads: Option<usize>,
}

fn default_filtering() -> bool {
    true
}

fn default_copy_chunks() -> usize {
    DEFAULT_COPY_CHUNKS
}

impl Default for LumiereConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            shader: ShaderSettings::default(),
            texture: TextureSettings::default(),
            workers: WorkerSettings::default(),
        }
    }
}

impl LumiereConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: LumiereConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != CONFIG_VERSION {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            )));
        }

        if let Some(scale) = &self.shader.scale {
            if scale.len() != 1 && scale.len() != 3 {
                return Err(ConfigError::Invalid(format!(
                    "shader.scale takes 1 or 3 values, got {}",
                    scale.len()
                )));
            }
        }

        if let Some(sideness) = self.shader.sideness {
            if !(0..=2).contains(&sideness) {
                return Err(ConfigError::Invalid(format!(
                    "shader.sideness must be 0, 1 or 2, got {sideness}"
                )));
            }
        }

        if let Some(layout) = &self.shader.layout {
            if layout.is_empty() || layout.len() > 4 {
                return Err(ConfigError::Invalid(format!(
                    "shader.layout takes 1 to 4 values, got {}",
                    layout.len()
                )));
            }
        }

        for name in self.shader.uniforms.keys() {
            let valid = name
                .chars()
                .next()
                .is_some_and(|first| first == '_' || first.is_ascii_alphabetic())
                && name.chars().all(|ch| ch == '_' || ch.is_ascii_alphanumeric());
            if !valid {
                return Err(ConfigError::Invalid(format!(
                    "shader.uniforms key '{name}' is not a valid identifier"
                )));
            }
        }

        if self.texture.copy_chunks == 0 || self.texture.copy_chunks > MAX_COPY_CHUNKS {
            return Err(ConfigError::Invalid(format!(
                "texture.copy_chunks must be between 1 and {MAX_COPY_CHUNKS}, got {}",
                self.texture.copy_chunks
            )));
        }

        if self.workers.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "workers.threads must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
