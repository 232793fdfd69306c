//! Renderer crate for Lumiere.
//!
//! Two pieces sit on top of a [`GraphicsDevice`]:
//!
//! ```text
//!   Image (producer) ──▶ TextureStream::update ──▶ transfer buffer A ─▶ texture
//!                              │                         ▲
//!                              └─▶ worker tasks ──▶ transfer buffer B (next frame)
//!
//!   ShaderProgram::activate ──▶ ActiveShader ──▶ bind_stream / push_uniforms ─▶ draw
//! ```
//!
//! [`ShaderProgram`] discovers uniforms from its stage sources after every
//! link and only uploads values that changed. [`TextureStream`] keeps a GPU
//! texture in sync with an [`Image`], reallocating storage only when the
//! frame format changes. The [`device::HeadlessDevice`] backend keeps
//! everything in host memory; the OpenGL backend lives behind the `glow`
//! feature.

pub mod device;
pub mod shader;
pub mod texture;
pub mod types;
pub mod value;

pub use device::{DeviceError, GraphicsDevice, HeadlessDevice};
#[cfg(feature = "glow")]
pub use device::GlDevice;
pub use shader::{
    ActiveShader, AttributeError, ShaderError, ShaderProgram, UniformEntry, UniformRegistry,
    UniformSlot, UniformType,
};
pub use texture::{Image, ImageError, ImageSpec, SampleFormat, StreamStats, TextureStream};
pub use types::{FillMode, Sideness, Stage, TextureFilter, UnknownVariant};
pub use value::{Value, ValueError, ValueKind};
