//! Graphics capability interface consumed by shaders and texture streams.
//!
//! Everything above this module talks to the GPU through [`GraphicsDevice`]
//! using plain integer handles:
//! - `headless` implements the trait in memory and records what it was asked
//!   to do, which is what the tests and the CLI run against.
//! - `gl` (cargo feature `glow`) forwards the same calls to an OpenGL context.
//!
//! Transfer buffers are written from worker threads through [`MappedBuffer`],
//! which hands out disjoint [`MappedChunk`] windows onto mapped memory.

use std::any::Any;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::types::{Stage, TextureFilter};

#[cfg(feature = "glow")]
mod gl;
mod headless;

#[cfg(feature = "glow")]
pub use gl::GlDevice;
pub use headless::{HeadlessDevice, HeadlessStats, RecordedData, RecordedUpload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UniformLocation(pub u32);

impl fmt::Display for UniformLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a compile or link request, including the driver log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileStatus {
    pub success: bool,
    pub log: String,
}

impl CompileStatus {
    pub fn ok() -> Self {
        Self {
            success: true,
            log: String::new(),
        }
    }

    pub fn failed(log: impl Into<String>) -> Self {
        Self {
            success: false,
            log: log.into(),
        }
    }
}

/// Binding target a buffer is used through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferTarget {
    Uniform,
    PixelUnpack,
}

/// Typed payload for a single uniform upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformData<'a> {
    /// One to four integer components (`int` .. `ivec4`).
    Int(&'a [i32]),
    /// One to four float components (`float` .. `vec4`).
    Float(&'a [f32]),
    /// Array upload; `values.len() / arity` elements.
    IntArray { arity: usize, values: &'a [i32] },
    FloatArray { arity: usize, values: &'a [f32] },
    /// Column-major 4x4 matrices, sixteen floats each.
    Matrix4(&'a [f32]),
}

impl UniformData<'_> {
    /// Number of array elements the upload covers.
    pub fn element_count(&self) -> usize {
        match self {
            UniformData::Int(_) | UniformData::Float(_) => 1,
            UniformData::IntArray { arity, values } => values.len() / (*arity).max(1),
            UniformData::FloatArray { arity, values } => values.len() / (*arity).max(1),
            UniformData::Matrix4(values) => values.len() / 16,
        }
    }
}

/// Channel order of uncompressed pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    Rgb,
    Rgba,
    Bgr,
    Bgra,
}

impl PixelOrder {
    pub fn channels(self) -> u32 {
        match self {
            PixelOrder::Rgb | PixelOrder::Bgr => 3,
            PixelOrder::Rgba | PixelOrder::Bgra => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternalFormat {
    Rgba8,
    Srgb8Alpha8,
}

impl InternalFormat {
    pub fn for_srgb(srgb: bool) -> Self {
        if srgb {
            InternalFormat::Srgb8Alpha8
        } else {
            InternalFormat::Rgba8
        }
    }
}

/// S3TC block compression formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressedFormat {
    Dxt1 { srgb: bool },
    Dxt5 { srgb: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUpload {
    Uncompressed {
        internal: InternalFormat,
        order: PixelOrder,
    },
    Compressed {
        format: CompressedFormat,
        byte_size: usize,
    },
}

/// Storage shape used for allocation and content updates of a 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub width: u32,
    pub height: u32,
    pub upload: TextureUpload,
}

impl TextureDescriptor {
    /// Bytes one full image occupies in client memory.
    pub fn byte_size(&self) -> usize {
        match self.upload {
            TextureUpload::Uncompressed { order, .. } => {
                self.width as usize * self.height as usize * order.channels() as usize
            }
            TextureUpload::Compressed { byte_size, .. } => byte_size,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.upload, TextureUpload::Compressed { .. })
    }

    /// Rejects client pixel slices shorter than one tightly packed image.
    /// Rows carry no padding, whatever the row width.
    pub fn check_pixels(&self, len: usize) -> Result<(), DeviceError> {
        let expected = self.byte_size();
        if len < expected {
            return Err(DeviceError::PixelSize {
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u32 },
    #[error("buffer {0} is currently mapped")]
    BufferMapped(u32),
    #[error("write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("pixel data holds {actual} bytes; texture expects {expected}")]
    PixelSize { expected: usize, actual: usize },
    #[error("failed to map buffer {0}")]
    MapFailed(u32),
    #[error("graphics backend error: {0}")]
    Backend(String),
}

/// Driver capabilities used by [`crate::ShaderProgram`] and
/// [`crate::TextureStream`].
///
/// Methods mirror the underlying API closely; failures that a real driver
/// only reports through its error queue are not surfaced.
pub trait GraphicsDevice {
    fn create_shader(&mut self, stage: Stage) -> Result<ShaderId, DeviceError>;
    fn delete_shader(&mut self, shader: ShaderId);
    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> CompileStatus;

    fn create_program(&mut self) -> Result<ProgramId, DeviceError>;
    fn delete_program(&mut self, program: ProgramId);
    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId);
    fn link_program(&mut self, program: ProgramId) -> CompileStatus;
    fn use_program(&mut self, program: Option<ProgramId>);

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation>;
    fn uniform_block_index(&self, program: ProgramId, name: &str) -> Option<u32>;
    fn uniform_block_binding(&mut self, program: ProgramId, block: u32, binding: u32);
    fn read_uniform_i32(&self, program: ProgramId, location: UniformLocation, out: &mut [i32]);
    fn read_uniform_f32(&self, program: ProgramId, location: UniformLocation, out: &mut [f32]);
    fn upload_uniform(&mut self, location: UniformLocation, data: UniformData<'_>);

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError>;
    fn delete_buffer(&mut self, buffer: BufferId);
    /// (Re)allocates storage; previous contents are discarded.
    fn allocate_buffer(
        &mut self,
        target: BufferTarget,
        buffer: BufferId,
        size: usize,
    ) -> Result<(), DeviceError>;
    fn write_buffer(
        &mut self,
        target: BufferTarget,
        buffer: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError>;
    fn bind_buffer_range(&mut self, binding: u32, buffer: BufferId, offset: usize, size: usize);
    fn buffer_size(&self, buffer: BufferId) -> Option<usize>;
    /// Maps the whole buffer for writing until [`GraphicsDevice::unmap_buffer`].
    fn map_buffer(&mut self, buffer: BufferId) -> Result<MappedBuffer, DeviceError>;
    fn unmap_buffer(&mut self, buffer: BufferId);

    fn create_texture(&mut self) -> Result<TextureId, DeviceError>;
    fn delete_texture(&mut self, texture: TextureId);
    fn set_texture_filtering(&mut self, texture: TextureId, filter: TextureFilter);
    /// Allocates storage and optionally fills it from client memory.
    fn allocate_texture(
        &mut self,
        texture: TextureId,
        descriptor: &TextureDescriptor,
        pixels: Option<&[u8]>,
    ) -> Result<(), DeviceError>;
    /// Replaces the full image from a pixel-unpack buffer.
    fn update_texture_from_buffer(
        &mut self,
        texture: TextureId,
        descriptor: &TextureDescriptor,
        buffer: BufferId,
    ) -> Result<(), DeviceError>;
    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);
    fn read_texture(
        &mut self,
        texture: TextureId,
        descriptor: &TextureDescriptor,
        out: &mut [u8],
    ) -> Result<(), DeviceError>;
    fn generate_mipmap(&mut self, texture: TextureId);
}

type Lease = Arc<dyn Any + Send + Sync>;

/// Writable view of a mapped transfer buffer.
///
/// The view stays valid until the owning device unmaps the buffer; callers
/// must finish every write before calling `unmap_buffer`.
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    lease: Option<Lease>,
}

// SAFETY: the mapping is plain memory; writers receive disjoint ranges.
unsafe impl Send for MappedBuffer {}

impl MappedBuffer {
    /// Wraps mapped memory handed out by a driver.
    ///
    /// # Safety
    /// `ptr` must be valid for writes of `len` bytes until the buffer is
    /// unmapped, and `lease` (if any) must keep that memory alive.
    pub unsafe fn from_raw(ptr: *mut u8, len: usize, lease: Option<Lease>) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, len, lease })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies as much of `src` as fits, returning the number of bytes written.
    pub fn write_all(&mut self, src: &[u8]) -> usize {
        let count = src.len().min(self.len);
        // SAFETY: `count <= len` and the mapping is valid for `len` bytes.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr(), count);
        }
        count
    }

    /// Splits the mapping into `count` contiguous windows; the last one takes
    /// the remainder.
    pub fn split(self, count: usize) -> Vec<MappedChunk> {
        let count = count.max(1);
        let stride = self.len / count;
        (0..count)
            .map(|index| {
                let offset = stride * index;
                let len = if index + 1 == count {
                    self.len - offset
                } else {
                    stride
                };
                MappedChunk {
                    // SAFETY: `offset <= len`, so the pointer stays in bounds.
                    ptr: unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) },
                    offset,
                    len,
                    _lease: self.lease.clone(),
                }
            })
            .collect()
    }
}

impl fmt::Debug for MappedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedBuffer").field("len", &self.len).finish()
    }
}

/// Disjoint window onto a [`MappedBuffer`], movable to a worker thread.
pub struct MappedChunk {
    ptr: NonNull<u8>,
    offset: usize,
    len: usize,
    _lease: Option<Lease>,
}

// SAFETY: chunks never overlap and are written by one owner at a time.
unsafe impl Send for MappedChunk {}

impl MappedChunk {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies as much of `src` as fits, returning the number of bytes written.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let count = src.len().min(self.len);
        // SAFETY: `count <= len`; the window is exclusively ours.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr(), count);
        }
        count
    }
}

impl fmt::Debug for MappedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedChunk")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
