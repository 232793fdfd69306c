use std::num::NonZeroU32;

use glow::HasContext;

use super::{
    BufferId, BufferTarget, CompileStatus, CompressedFormat, DeviceError, GraphicsDevice,
    InternalFormat, MappedBuffer, PixelOrder, ProgramId, ShaderId, TextureDescriptor, TextureId,
    TextureUpload, UniformData, UniformLocation,
};
use crate::types::{Stage, TextureFilter};

/// [`GraphicsDevice`] over a current OpenGL 3.3+ context.
///
/// The context must stay current on the calling thread for as long as the
/// device is used.
pub struct GlDevice {
    gl: glow::Context,
}

impl GlDevice {
    /// Wraps `gl` and switches pixel transfers to byte alignment, so RGB
    /// rows of any width match the tightly packed client layout.
    pub fn new(gl: glow::Context) -> Self {
        unsafe {
            gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
        }
        Self { gl }
    }

    pub fn context(&self) -> &glow::Context {
        &self.gl
    }
}

fn native<T>(id: u32, wrap: impl FnOnce(NonZeroU32) -> T) -> Option<T> {
    NonZeroU32::new(id).map(wrap)
}

fn shader(id: ShaderId) -> Option<glow::NativeShader> {
    native(id.0, glow::NativeShader)
}

fn program(id: ProgramId) -> Option<glow::NativeProgram> {
    native(id.0, glow::NativeProgram)
}

fn buffer(id: BufferId) -> Option<glow::NativeBuffer> {
    native(id.0, glow::NativeBuffer)
}

fn texture(id: TextureId) -> Option<glow::NativeTexture> {
    native(id.0, glow::NativeTexture)
}

fn location(id: UniformLocation) -> glow::NativeUniformLocation {
    glow::NativeUniformLocation(id.0)
}

fn target(target: BufferTarget) -> u32 {
    match target {
        BufferTarget::Uniform => glow::UNIFORM_BUFFER,
        BufferTarget::PixelUnpack => glow::PIXEL_UNPACK_BUFFER,
    }
}

fn pixel_order(order: PixelOrder) -> u32 {
    match order {
        PixelOrder::Rgb => glow::RGB,
        PixelOrder::Rgba => glow::RGBA,
        PixelOrder::Bgr => glow::BGR,
        PixelOrder::Bgra => glow::BGRA,
    }
}

fn internal_format(format: InternalFormat) -> i32 {
    match format {
        InternalFormat::Rgba8 => glow::RGBA8 as i32,
        InternalFormat::Srgb8Alpha8 => glow::SRGB8_ALPHA8 as i32,
    }
}

fn compressed_format(format: CompressedFormat) -> u32 {
    match format {
        CompressedFormat::Dxt1 { srgb: false } => glow::COMPRESSED_RGB_S3TC_DXT1_EXT,
        CompressedFormat::Dxt1 { srgb: true } => glow::COMPRESSED_SRGB_S3TC_DXT1_EXT,
        CompressedFormat::Dxt5 { srgb: false } => glow::COMPRESSED_RGBA_S3TC_DXT5_EXT,
        CompressedFormat::Dxt5 { srgb: true } => glow::COMPRESSED_SRGB_ALPHA_S3TC_DXT5_EXT,
    }
}

fn unknown(kind: &'static str, id: u32) -> DeviceError {
    DeviceError::UnknownHandle { kind, id }
}

impl GraphicsDevice for GlDevice {
    fn create_shader(&mut self, stage: Stage) -> Result<ShaderId, DeviceError> {
        let kind = match stage {
            Stage::Vertex => glow::VERTEX_SHADER,
            Stage::Geometry => glow::GEOMETRY_SHADER,
            Stage::Fragment => glow::FRAGMENT_SHADER,
        };
        let created = unsafe { self.gl.create_shader(kind) }.map_err(DeviceError::Backend)?;
        Ok(ShaderId(created.0.get()))
    }

    fn delete_shader(&mut self, id: ShaderId) {
        if let Some(object) = shader(id) {
            unsafe { self.gl.delete_shader(object) };
        }
    }

    fn compile_shader(&mut self, id: ShaderId, source: &str) -> CompileStatus {
        let Some(object) = shader(id) else {
            return CompileStatus::failed(format!("unknown shader object {}", id.0));
        };
        unsafe {
            self.gl.shader_source(object, source);
            self.gl.compile_shader(object);
            if self.gl.get_shader_compile_status(object) {
                CompileStatus::ok()
            } else {
                CompileStatus::failed(self.gl.get_shader_info_log(object))
            }
        }
    }

    fn create_program(&mut self) -> Result<ProgramId, DeviceError> {
        let created = unsafe { self.gl.create_program() }.map_err(DeviceError::Backend)?;
        Ok(ProgramId(created.0.get()))
    }

    fn delete_program(&mut self, id: ProgramId) {
        if let Some(object) = program(id) {
            unsafe { self.gl.delete_program(object) };
        }
    }

    fn attach_shader(&mut self, program_id: ProgramId, shader_id: ShaderId) {
        if let (Some(program), Some(shader)) = (program(program_id), shader(shader_id)) {
            unsafe { self.gl.attach_shader(program, shader) };
        }
    }

    fn link_program(&mut self, id: ProgramId) -> CompileStatus {
        let Some(object) = program(id) else {
            return CompileStatus::failed(format!("unknown program object {}", id.0));
        };
        unsafe {
            self.gl.link_program(object);
            if self.gl.get_program_link_status(object) {
                CompileStatus::ok()
            } else {
                CompileStatus::failed(self.gl.get_program_info_log(object))
            }
        }
    }

    fn use_program(&mut self, id: Option<ProgramId>) {
        unsafe { self.gl.use_program(id.and_then(program)) };
    }

    fn uniform_location(&self, id: ProgramId, name: &str) -> Option<UniformLocation> {
        let object = program(id)?;
        unsafe { self.gl.get_uniform_location(object, name) }.map(|loc| UniformLocation(loc.0))
    }

    fn uniform_block_index(&self, id: ProgramId, name: &str) -> Option<u32> {
        let object = program(id)?;
        unsafe { self.gl.get_uniform_block_index(object, name) }
    }

    fn uniform_block_binding(&mut self, id: ProgramId, block: u32, binding: u32) {
        if let Some(object) = program(id) {
            unsafe { self.gl.uniform_block_binding(object, block, binding) };
        }
    }

    fn read_uniform_i32(&self, id: ProgramId, loc: UniformLocation, out: &mut [i32]) {
        if let Some(object) = program(id) {
            unsafe { self.gl.get_uniform_i32(object, &location(loc), out) };
        }
    }

    fn read_uniform_f32(&self, id: ProgramId, loc: UniformLocation, out: &mut [f32]) {
        if let Some(object) = program(id) {
            unsafe { self.gl.get_uniform_f32(object, &location(loc), out) };
        }
    }

    fn upload_uniform(&mut self, loc: UniformLocation, data: UniformData<'_>) {
        let loc = location(loc);
        let loc = Some(&loc);
        unsafe {
            match data {
                UniformData::Int(values) => match *values {
                    [x] => self.gl.uniform_1_i32(loc, x),
                    [x, y] => self.gl.uniform_2_i32(loc, x, y),
                    [x, y, z] => self.gl.uniform_3_i32(loc, x, y, z),
                    [x, y, z, w] => self.gl.uniform_4_i32(loc, x, y, z, w),
                    _ => tracing::debug!(len = values.len(), "int upload skipped"),
                },
                UniformData::Float(values) => match *values {
                    [x] => self.gl.uniform_1_f32(loc, x),
                    [x, y] => self.gl.uniform_2_f32(loc, x, y),
                    [x, y, z] => self.gl.uniform_3_f32(loc, x, y, z),
                    [x, y, z, w] => self.gl.uniform_4_f32(loc, x, y, z, w),
                    _ => tracing::debug!(len = values.len(), "float upload skipped"),
                },
                UniformData::IntArray { arity, values } => match arity {
                    1 => self.gl.uniform_1_i32_slice(loc, values),
                    2 => self.gl.uniform_2_i32_slice(loc, values),
                    3 => self.gl.uniform_3_i32_slice(loc, values),
                    4 => self.gl.uniform_4_i32_slice(loc, values),
                    _ => tracing::debug!(arity, "int array upload skipped"),
                },
                UniformData::FloatArray { arity, values } => match arity {
                    1 => self.gl.uniform_1_f32_slice(loc, values),
                    2 => self.gl.uniform_2_f32_slice(loc, values),
                    3 => self.gl.uniform_3_f32_slice(loc, values),
                    4 => self.gl.uniform_4_f32_slice(loc, values),
                    _ => tracing::debug!(arity, "float array upload skipped"),
                },
                UniformData::Matrix4(values) => {
                    self.gl.uniform_matrix_4_f32_slice(loc, false, values)
                }
            }
        }
    }

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        let created = unsafe { self.gl.create_buffer() }.map_err(DeviceError::Backend)?;
        Ok(BufferId(created.0.get()))
    }

    fn delete_buffer(&mut self, id: BufferId) {
        if let Some(object) = buffer(id) {
            unsafe { self.gl.delete_buffer(object) };
        }
    }

    fn allocate_buffer(
        &mut self,
        kind: BufferTarget,
        id: BufferId,
        size: usize,
    ) -> Result<(), DeviceError> {
        let object = buffer(id).ok_or_else(|| unknown("buffer", id.0))?;
        let usage = match kind {
            BufferTarget::Uniform => glow::STATIC_DRAW,
            BufferTarget::PixelUnpack => glow::DYNAMIC_DRAW,
        };
        unsafe {
            self.gl.bind_buffer(target(kind), Some(object));
            self.gl.buffer_data_size(target(kind), size as i32, usage);
            self.gl.bind_buffer(target(kind), None);
        }
        Ok(())
    }

    fn write_buffer(
        &mut self,
        kind: BufferTarget,
        id: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let object = buffer(id).ok_or_else(|| unknown("buffer", id.0))?;
        unsafe {
            self.gl.bind_buffer(target(kind), Some(object));
            self.gl
                .buffer_sub_data_u8_slice(target(kind), offset as i32, data);
            self.gl.bind_buffer(target(kind), None);
        }
        Ok(())
    }

    fn bind_buffer_range(&mut self, binding: u32, id: BufferId, offset: usize, size: usize) {
        unsafe {
            self.gl.bind_buffer_range(
                glow::UNIFORM_BUFFER,
                binding,
                buffer(id),
                offset as i32,
                size as i32,
            )
        };
    }

    fn buffer_size(&self, id: BufferId) -> Option<usize> {
        let object = buffer(id)?;
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(object));
            let size = self
                .gl
                .get_buffer_parameter_i32(glow::PIXEL_UNPACK_BUFFER, glow::BUFFER_SIZE);
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            usize::try_from(size).ok()
        }
    }

    fn map_buffer(&mut self, id: BufferId) -> Result<MappedBuffer, DeviceError> {
        let len = self.buffer_size(id).ok_or_else(|| unknown("buffer", id.0))?;
        let object = buffer(id).ok_or_else(|| unknown("buffer", id.0))?;
        unsafe {
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(object));
            let ptr = self.gl.map_buffer_range(
                glow::PIXEL_UNPACK_BUFFER,
                0,
                len as i32,
                glow::MAP_WRITE_BIT | glow::MAP_INVALIDATE_BUFFER_BIT,
            );
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            MappedBuffer::from_raw(ptr, len, None).ok_or(DeviceError::MapFailed(id.0))
        }
    }

    fn unmap_buffer(&mut self, id: BufferId) {
        if let Some(object) = buffer(id) {
            unsafe {
                self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, Some(object));
                self.gl.unmap_buffer(glow::PIXEL_UNPACK_BUFFER);
                self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            }
        }
    }

    fn create_texture(&mut self) -> Result<TextureId, DeviceError> {
        let created = unsafe { self.gl.create_texture() }.map_err(DeviceError::Backend)?;
        Ok(TextureId(created.0.get()))
    }

    fn delete_texture(&mut self, id: TextureId) {
        if let Some(object) = texture(id) {
            unsafe { self.gl.delete_texture(object) };
        }
    }

    fn set_texture_filtering(&mut self, id: TextureId, filter: TextureFilter) {
        let mode = match filter {
            TextureFilter::Linear => glow::LINEAR,
            TextureFilter::Nearest => glow::NEAREST,
        } as i32;
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, texture(id));
            let clamp = glow::CLAMP_TO_EDGE as i32;
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, clamp);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, clamp);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, mode);
            self.gl
                .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, mode);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
    }

    fn allocate_texture(
        &mut self,
        id: TextureId,
        descriptor: &TextureDescriptor,
        pixels: Option<&[u8]>,
    ) -> Result<(), DeviceError> {
        let object = texture(id).ok_or_else(|| unknown("texture", id.0))?;
        if let Some(pixels) = pixels {
            descriptor.check_pixels(pixels.len())?;
        }
        let pixels = pixels.map(|pixels| &pixels[..descriptor.byte_size()]);
        let (width, height) = (descriptor.width as i32, descriptor.height as i32);
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(object));
            match descriptor.upload {
                TextureUpload::Uncompressed { internal, order } => self.gl.tex_image_2d(
                    glow::TEXTURE_2D,
                    0,
                    internal_format(internal),
                    width,
                    height,
                    0,
                    pixel_order(order),
                    glow::UNSIGNED_BYTE,
                    glow::PixelUnpackData::Slice(pixels),
                ),
                TextureUpload::Compressed { format, byte_size } => {
                    let zeroed;
                    let data = match pixels {
                        Some(pixels) => pixels,
                        None => {
                            zeroed = vec![0u8; byte_size];
                            &zeroed
                        }
                    };
                    self.gl.compressed_tex_image_2d(
                        glow::TEXTURE_2D,
                        0,
                        compressed_format(format) as i32,
                        width,
                        height,
                        0,
                        byte_size as i32,
                        data,
                    )
                }
            }
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(())
    }

    fn update_texture_from_buffer(
        &mut self,
        id: TextureId,
        descriptor: &TextureDescriptor,
        source: BufferId,
    ) -> Result<(), DeviceError> {
        let object = texture(id).ok_or_else(|| unknown("texture", id.0))?;
        let (width, height) = (descriptor.width as i32, descriptor.height as i32);
        unsafe {
            self.gl.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(object));
            self.gl
                .bind_buffer(glow::PIXEL_UNPACK_BUFFER, buffer(source));
            match descriptor.upload {
                TextureUpload::Uncompressed { order, .. } => self.gl.tex_sub_image_2d(
                    glow::TEXTURE_2D,
                    0,
                    0,
                    0,
                    width,
                    height,
                    pixel_order(order),
                    glow::UNSIGNED_BYTE,
                    glow::PixelUnpackData::BufferOffset(0),
                ),
                TextureUpload::Compressed { format, byte_size } => {
                    self.gl.compressed_tex_sub_image_2d(
                        glow::TEXTURE_2D,
                        0,
                        0,
                        0,
                        width,
                        height,
                        compressed_format(format),
                        glow::CompressedPixelUnpackData::BufferRange(0..byte_size as u32),
                    )
                }
            }
            self.gl.bind_buffer(glow::PIXEL_UNPACK_BUFFER, None);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, id: Option<TextureId>) {
        unsafe {
            self.gl.active_texture(glow::TEXTURE0 + unit);
            self.gl.bind_texture(glow::TEXTURE_2D, id.and_then(texture));
        }
    }

    fn read_texture(
        &mut self,
        id: TextureId,
        descriptor: &TextureDescriptor,
        out: &mut [u8],
    ) -> Result<(), DeviceError> {
        let object = texture(id).ok_or_else(|| unknown("texture", id.0))?;
        let TextureUpload::Uncompressed { order, .. } = descriptor.upload else {
            return Err(DeviceError::Backend(
                "compressed textures cannot be read back".into(),
            ));
        };
        descriptor.check_pixels(out.len())?;
        let out = &mut out[..descriptor.byte_size()];
        unsafe {
            self.gl.pixel_store_i32(glow::PACK_ALIGNMENT, 1);
            self.gl.bind_texture(glow::TEXTURE_2D, Some(object));
            self.gl.get_tex_image(
                glow::TEXTURE_2D,
                0,
                pixel_order(order),
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(out)),
            );
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
        Ok(())
    }

    fn generate_mipmap(&mut self, id: TextureId) {
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, texture(id));
            self.gl.generate_mipmap(glow::TEXTURE_2D);
            self.gl.bind_texture(glow::TEXTURE_2D, None);
        }
    }
}
