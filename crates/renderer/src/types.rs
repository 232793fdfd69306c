use std::fmt;
use std::str::FromStr;

/// Programmable pipeline stage a shader source is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Geometry,
    Fragment,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Vertex, Stage::Geometry, Stage::Fragment];

    pub(crate) fn index(self) -> usize {
        match self {
            Stage::Vertex => 0,
            Stage::Geometry => 1,
            Stage::Fragment => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Geometry => "geometry",
            Stage::Fragment => "fragment",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "vertex" => Ok(Stage::Vertex),
            "geometry" => Ok(Stage::Geometry),
            "fragment" => Ok(Stage::Fragment),
            other => Err(UnknownVariant {
                kind: "stage",
                value: other.to_owned(),
            }),
        }
    }
}

/// Shading strategy deciding which built-in sources a program compiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    /// Textured surface, the default for projected content.
    #[default]
    Texture,
    /// Flat `_color` fill.
    Color,
    /// Texture coordinates visualised as colors.
    Uv,
    /// Edges only, drawn through a geometry stage.
    Wireframe,
    /// Window compositing with up to four layered textures.
    Window,
}

impl FillMode {
    pub const ALL: [FillMode; 5] = [
        FillMode::Texture,
        FillMode::Color,
        FillMode::Uv,
        FillMode::Wireframe,
        FillMode::Window,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FillMode::Texture => "texture",
            FillMode::Color => "color",
            FillMode::Uv => "uv",
            FillMode::Wireframe => "wireframe",
            FillMode::Window => "window",
        }
    }
}

impl fmt::Display for FillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FillMode {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FillMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == value)
            .ok_or_else(|| UnknownVariant {
                kind: "fill mode",
                value: value.to_owned(),
            })
    }
}

/// Which faces of a surface get drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sideness {
    #[default]
    DoubleSided,
    SingleSided,
    Inverted,
}

impl Sideness {
    pub fn from_index(value: i32) -> Option<Self> {
        match value {
            0 => Some(Sideness::DoubleSided),
            1 => Some(Sideness::SingleSided),
            2 => Some(Sideness::Inverted),
            _ => None,
        }
    }

    pub fn index(self) -> i32 {
        match self {
            Sideness::DoubleSided => 0,
            Sideness::SingleSided => 1,
            Sideness::Inverted => 2,
        }
    }
}

/// Sampling filter applied to a streamed texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFilter {
    Linear,
    Nearest,
}

impl TextureFilter {
    pub fn from_enabled(filtering: bool) -> Self {
        if filtering {
            TextureFilter::Linear
        } else {
            TextureFilter::Nearest
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}
