//! Built-in GLSL sources, one set per [`FillMode`].

use crate::types::FillMode;

/// Stage sources compiled for a fill mode. `geometry` is `None` when the
/// mode draws without a geometry stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSources {
    pub vertex: &'static str,
    pub geometry: Option<&'static str>,
    pub fragment: &'static str,
}

pub fn sources_for(mode: FillMode) -> StageSources {
    match mode {
        FillMode::Texture => StageSources {
            vertex: DEFAULT_VERTEX,
            geometry: None,
            fragment: TEXTURE_FRAGMENT,
        },
        FillMode::Color => StageSources {
            vertex: DEFAULT_VERTEX,
            geometry: None,
            fragment: COLOR_FRAGMENT,
        },
        FillMode::Uv => StageSources {
            vertex: DEFAULT_VERTEX,
            geometry: None,
            fragment: UV_FRAGMENT,
        },
        FillMode::Wireframe => StageSources {
            vertex: WIREFRAME_VERTEX,
            geometry: Some(WIREFRAME_GEOMETRY),
            fragment: WIREFRAME_FRAGMENT,
        },
        FillMode::Window => StageSources {
            vertex: WINDOW_VERTEX,
            geometry: None,
            fragment: WINDOW_FRAGMENT,
        },
    }
}

pub const DEFAULT_VERTEX: &str = r#"#version 330 core

layout(location = 0) in vec4 _vertex;
layout(location = 1) in vec2 _texcoord;
layout(location = 2) in vec4 _normal;
uniform mat4 _modelViewProjectionMatrix;
uniform mat4 _normalMatrix;
uniform vec3 _scale;

out VertexData
{
    vec4 position;
    vec2 texCoord;
    vec4 normal;
} vertexOut;

void main(void)
{
    vertexOut.position = _modelViewProjectionMatrix * vec4(_vertex.xyz * _scale, 1.0);
    gl_Position = vertexOut.position;
    vertexOut.normal = normalize(_normalMatrix * _normal);
    vertexOut.texCoord = _texcoord;
}
"#;

pub const TEXTURE_FRAGMENT: &str = r#"#version 330 core

#define PI 3.14159265359

uniform sampler2D _tex0;
uniform int _sideness;
uniform int _textureNbr;
uniform int _texBlendingMap;
uniform int YCoCg;

in VertexData
{
    vec4 position;
    vec2 texCoord;
    vec4 normal;
} vertexIn;

out vec4 fragColor;

void main(void)
{
    if ((_sideness == 1 && !gl_FrontFacing) || (_sideness == 2 && gl_FrontFacing))
        discard;

    vec4 color = texture(_tex0, vertexIn.texCoord);
    if (YCoCg == 1)
    {
        float scale = (color.z * (255.0 / 8.0)) + 1.0;
        float Co = (color.x - (0.5 * 256.0 / 255.0)) / scale;
        float Cg = (color.y - (0.5 * 256.0 / 255.0)) / scale;
        float Y = color.w;
        color = vec4(Y + Co - Cg, Y + Cg, Y - Co - Cg, 1.0);
    }
    if (_texBlendingMap == 1)
        color.a = 1.0;
    fragColor = _textureNbr > 0 ? color : vec4(0.0, 0.0, 0.0, 1.0);
}
"#;

pub const COLOR_FRAGMENT: &str = r#"#version 330 core

uniform int _sideness;
uniform vec4 _color;

out vec4 fragColor;

void main(void)
{
    if ((_sideness == 1 && !gl_FrontFacing) || (_sideness == 2 && gl_FrontFacing))
        discard;
    fragColor = _color;
}
"#;

pub const UV_FRAGMENT: &str = r#"#version 330 core

uniform int _sideness;

in VertexData
{
    vec4 position;
    vec2 texCoord;
    vec4 normal;
} vertexIn;

out vec4 fragColor;

void main(void)
{
    if ((_sideness == 1 && !gl_FrontFacing) || (_sideness == 2 && gl_FrontFacing))
        discard;
    fragColor = vec4(vertexIn.texCoord.x, vertexIn.texCoord.y, 1.0, 1.0);
}
"#;

pub const WIREFRAME_VERTEX: &str = r#"#version 330 core

layout(location = 0) in vec4 _vertex;
layout(location = 1) in vec2 _texcoord;
layout(location = 2) in vec4 _normal;
uniform mat4 _modelViewProjectionMatrix;
uniform vec3 _scale;

out VertexData
{
    vec4 position;
    vec2 texCoord;
} vertexOut;

void main(void)
{
    vertexOut.position = _modelViewProjectionMatrix * vec4(_vertex.xyz * _scale, 1.0);
    vertexOut.texCoord = _texcoord;
}
"#;

pub const WIREFRAME_GEOMETRY: &str = r#"#version 330 core

layout(triangles) in;
layout(triangle_strip, max_vertices = 3) out;

in VertexData
{
    vec4 position;
    vec2 texCoord;
} vertexIn[];

out VertexData
{
    vec4 position;
    vec2 texCoord;
    vec3 bcoord;
} vertexOut;

void main(void)
{
    for (int i = 0; i < 3; ++i)
    {
        gl_Position = vertexIn[i].position;
        vertexOut.position = vertexIn[i].position;
        vertexOut.texCoord = vertexIn[i].texCoord;
        vertexOut.bcoord = vec3(i == 0, i == 1, i == 2);
        EmitVertex();
    }
    EndPrimitive();
}
"#;

pub const WIREFRAME_FRAGMENT: &str = r#"#version 330 core

uniform vec4 _wireframeColor;

in VertexData
{
    vec4 position;
    vec2 texCoord;
    vec3 bcoord;
} vertexIn;

out vec4 fragColor;

void main(void)
{
    float edge = min(vertexIn.bcoord.x, min(vertexIn.bcoord.y, vertexIn.bcoord.z));
    float width = fwidth(edge);
    float alpha = smoothstep(0.0, 1.5 * width, edge);
    fragColor = vec4(_wireframeColor.rgb, 1.0 - alpha);
}
"#;

pub const WINDOW_VERTEX: &str = r#"#version 330 core

layout(location = 0) in vec4 _vertex;
layout(location = 1) in vec2 _texcoord;

out VertexData
{
    vec4 position;
    vec2 texCoord;
} vertexOut;

void main(void)
{
    vertexOut.position = vec4(_vertex.x, _vertex.y, 0.0, 1.0);
    gl_Position = vertexOut.position;
    vertexOut.texCoord = _texcoord;
}
"#;

pub const WINDOW_FRAGMENT: &str = r#"#version 330 core

uniform sampler2D _tex0;
uniform sampler2D _tex1;
uniform sampler2D _tex2;
uniform sampler2D _tex3;
uniform int _textureNbr;
uniform ivec4 _layout;

in VertexData
{
    vec4 position;
    vec2 texCoord;
} vertexIn;

out vec4 fragColor;

vec4 sampleLayer(int index, vec2 coords)
{
    if (index == 0) return texture(_tex0, coords);
    if (index == 1) return texture(_tex1, coords);
    if (index == 2) return texture(_tex2, coords);
    return texture(_tex3, coords);
}

void main(void)
{
    fragColor = vec4(0.0, 0.0, 0.0, 1.0);
    for (int i = 0; i < 4 && i < _textureNbr; ++i)
    {
        vec4 layer = sampleLayer(_layout[i], vertexIn.texCoord);
        fragColor.rgb = mix(fragColor.rgb, layer.rgb, layer.a);
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::declarations::scan_declarations;

    #[test]
    fn only_wireframe_has_a_geometry_stage() {
        for mode in FillMode::ALL {
            let sources = sources_for(mode);
            assert_eq!(sources.geometry.is_some(), mode == FillMode::Wireframe);
            assert!(sources.vertex.contains("main"));
            assert!(sources.fragment.contains("main"));
        }
    }

    #[test]
    fn window_mode_declares_layout_and_texture_count() {
        let names: Vec<_> = scan_declarations(WINDOW_FRAGMENT).map(|d| d.name()).collect();
        assert!(names.contains(&"_layout"));
        assert!(names.contains(&"_textureNbr"));
        assert!(names.contains(&"_tex3"));
    }
}
