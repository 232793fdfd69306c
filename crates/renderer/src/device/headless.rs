use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    BufferId, BufferTarget, CompileStatus, DeviceError, GraphicsDevice, MappedBuffer, ProgramId,
    ShaderId, TextureDescriptor, TextureId, UniformData, UniformLocation,
};
use crate::shader::declarations::{scan_declarations, Declaration};
use crate::types::{Stage, TextureFilter};

/// Owned copy of an upload, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedData {
    Int(Vec<i32>),
    Float(Vec<f32>),
    IntArray { arity: usize, values: Vec<i32> },
    FloatArray { arity: usize, values: Vec<f32> },
    Matrix4(Vec<f32>),
}

impl From<UniformData<'_>> for RecordedData {
    fn from(data: UniformData<'_>) -> Self {
        match data {
            UniformData::Int(values) => RecordedData::Int(values.to_vec()),
            UniformData::Float(values) => RecordedData::Float(values.to_vec()),
            UniformData::IntArray { arity, values } => RecordedData::IntArray {
                arity,
                values: values.to_vec(),
            },
            UniformData::FloatArray { arity, values } => RecordedData::FloatArray {
                arity,
                values: values.to_vec(),
            },
            UniformData::Matrix4(values) => RecordedData::Matrix4(values.to_vec()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpload {
    /// Uniform name in the program that was current at upload time.
    pub name: Option<String>,
    pub location: UniformLocation,
    pub data: RecordedData,
}

/// Counters describing the work a [`HeadlessDevice`] has been asked to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct HeadlessStats {
    pub texture_allocations: u64,
    pub texture_updates: u64,
    pub buffer_allocations: u64,
    pub buffer_writes: u64,
    pub maps: u64,
    pub unmaps: u64,
    pub links: u64,
}

struct ShaderObject {
    source: String,
    compiled: bool,
    stage: Stage,
}

#[derive(Default)]
struct ProgramObject {
    attached: Vec<ShaderId>,
    uniforms: BTreeMap<String, UniformLocation>,
    blocks: BTreeMap<String, u32>,
    block_bindings: BTreeMap<u32, u32>,
}

struct BufferObject {
    data: Arc<Mutex<Vec<u8>>>,
    mapped: bool,
}

#[derive(Default)]
struct TextureObject {
    descriptor: Option<TextureDescriptor>,
    filter: Option<TextureFilter>,
    pixels: Vec<u8>,
    mipmaps: u32,
}

/// In-memory driver.
///
/// Compiles any source with a `main` entry point and without `#error`,
/// resolves uniforms from the declarations of attached sources and stores
/// buffer and texture contents in host memory.
#[derive(Default)]
pub struct HeadlessDevice {
    next_handle: u32,
    shaders: HashMap<u32, ShaderObject>,
    programs: HashMap<u32, ProgramObject>,
    buffers: HashMap<u32, BufferObject>,
    textures: HashMap<u32, TextureObject>,
    current_program: Option<ProgramId>,
    bound_units: BTreeMap<u32, TextureId>,
    buffer_ranges: BTreeMap<u32, (BufferId, usize, usize)>,
    uploads: Vec<RecordedUpload>,
    stats: HeadlessStats,
    fail_next_link: bool,
    fail_next_map: bool,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Every uniform upload since creation (or the last [`Self::clear_uploads`]).
    pub fn uploads(&self) -> &[RecordedUpload] {
        &self.uploads
    }

    pub fn uploads_named(&self, name: &str) -> Vec<&RecordedUpload> {
        self.uploads
            .iter()
            .filter(|upload| upload.name.as_deref() == Some(name))
            .collect()
    }

    pub fn clear_uploads(&mut self) {
        self.uploads.clear();
    }

    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    pub fn current_program(&self) -> Option<ProgramId> {
        self.current_program
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.bound_units.get(&unit).copied()
    }

    pub fn bound_units(&self) -> usize {
        self.bound_units.len()
    }

    pub fn bound_range(&self, binding: u32) -> Option<(BufferId, usize, usize)> {
        self.buffer_ranges.get(&binding).copied()
    }

    pub fn block_binding(&self, program: ProgramId, block: u32) -> Option<u32> {
        self.programs
            .get(&program.0)
            .and_then(|object| object.block_bindings.get(&block).copied())
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<Vec<u8>> {
        self.buffers
            .get(&buffer.0)
            .map(|object| object.data.lock().clone())
    }

    pub fn texture_pixels(&self, texture: TextureId) -> Option<&[u8]> {
        self.textures
            .get(&texture.0)
            .map(|object| object.pixels.as_slice())
    }

    pub fn texture_descriptor(&self, texture: TextureId) -> Option<TextureDescriptor> {
        self.textures
            .get(&texture.0)
            .and_then(|object| object.descriptor)
    }

    pub fn texture_filter(&self, texture: TextureId) -> Option<TextureFilter> {
        self.textures.get(&texture.0).and_then(|object| object.filter)
    }

    pub fn texture_mipmaps(&self, texture: TextureId) -> u32 {
        self.textures
            .get(&texture.0)
            .map_or(0, |object| object.mipmaps)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Makes the next `link_program` call fail.
    pub fn fail_next_link(&mut self) {
        self.fail_next_link = true;
    }

    /// Makes the next `map_buffer` call fail.
    pub fn fail_next_map(&mut self) {
        self.fail_next_map = true;
    }

    fn uniform_name(&self, location: UniformLocation) -> Option<String> {
        let program = self.programs.get(&self.current_program?.0)?;
        program
            .uniforms
            .iter()
            .find(|(_, candidate)| **candidate == location)
            .map(|(name, _)| name.clone())
    }

    fn buffer(&self, buffer: BufferId) -> Result<&BufferObject, DeviceError> {
        self.buffers.get(&buffer.0).ok_or(DeviceError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })
    }

    fn texture_mut(&mut self, texture: TextureId) -> Result<&mut TextureObject, DeviceError> {
        self.textures
            .get_mut(&texture.0)
            .ok_or(DeviceError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })
    }
}

impl GraphicsDevice for HeadlessDevice {
    fn create_shader(&mut self, stage: Stage) -> Result<ShaderId, DeviceError> {
        let id = self.next_handle();
        self.shaders.insert(
            id,
            ShaderObject {
                source: String::new(),
                compiled: false,
                stage,
            },
        );
        Ok(ShaderId(id))
    }

    fn delete_shader(&mut self, shader: ShaderId) {
        self.shaders.remove(&shader.0);
    }

    fn compile_shader(&mut self, shader: ShaderId, source: &str) -> CompileStatus {
        let Some(object) = self.shaders.get_mut(&shader.0) else {
            return CompileStatus::failed(format!("unknown shader object {}", shader.0));
        };
        object.source = source.to_owned();
        let status = if let Some(line) = source
            .lines()
            .position(|line| line.trim_start().starts_with("#error"))
        {
            CompileStatus::failed(format!("0:{}: error: #error directive", line + 1))
        } else if !source.contains("main") {
            CompileStatus::failed("0:0: error: missing entry point 'main'")
        } else {
            CompileStatus::ok()
        };
        object.compiled = status.success;
        status
    }

    fn create_program(&mut self) -> Result<ProgramId, DeviceError> {
        let id = self.next_handle();
        self.programs.insert(id, ProgramObject::default());
        Ok(ProgramId(id))
    }

    fn delete_program(&mut self, program: ProgramId) {
        self.programs.remove(&program.0);
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn attach_shader(&mut self, program: ProgramId, shader: ShaderId) {
        if let Some(object) = self.programs.get_mut(&program.0) {
            object.attached.push(shader);
        }
    }

    fn link_program(&mut self, program: ProgramId) -> CompileStatus {
        self.stats.links += 1;
        if std::mem::take(&mut self.fail_next_link) {
            return CompileStatus::failed("error: link failure requested");
        }
        let Some(attached) = self.programs.get(&program.0).map(|p| p.attached.clone()) else {
            return CompileStatus::failed(format!("unknown program object {}", program.0));
        };

        let mut has_vertex = false;
        let mut has_fragment = false;
        let mut uniforms = BTreeMap::new();
        let mut blocks = BTreeMap::new();
        for shader in &attached {
            let Some(object) = self.shaders.get(&shader.0) else {
                continue;
            };
            if !object.compiled {
                return CompileStatus::failed(format!(
                    "error: attached {} shader is not compiled",
                    object.stage
                ));
            }
            has_vertex |= object.stage == Stage::Vertex;
            has_fragment |= object.stage == Stage::Fragment;
            for declaration in scan_declarations(&object.source) {
                match declaration {
                    Declaration::Block { name } => {
                        let next = blocks.len() as u32;
                        blocks.entry(name.to_owned()).or_insert(next);
                    }
                    Declaration::Uniform { name, .. } => {
                        let next = UniformLocation(uniforms.len() as u32);
                        uniforms.entry(name.to_owned()).or_insert(next);
                    }
                }
            }
        }

        if !has_vertex || !has_fragment {
            return CompileStatus::failed("error: program needs a vertex and a fragment stage");
        }

        if let Some(object) = self.programs.get_mut(&program.0) {
            object.uniforms = uniforms;
            object.blocks = blocks;
        }
        CompileStatus::ok()
    }

    fn use_program(&mut self, program: Option<ProgramId>) {
        self.current_program = program;
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<UniformLocation> {
        self.programs.get(&program.0)?.uniforms.get(name).copied()
    }

    fn uniform_block_index(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program.0)?.blocks.get(name).copied()
    }

    fn uniform_block_binding(&mut self, program: ProgramId, block: u32, binding: u32) {
        if let Some(object) = self.programs.get_mut(&program.0) {
            object.block_bindings.insert(block, binding);
        }
    }

    fn read_uniform_i32(&self, _program: ProgramId, _location: UniformLocation, out: &mut [i32]) {
        out.fill(0);
    }

    fn read_uniform_f32(&self, _program: ProgramId, _location: UniformLocation, out: &mut [f32]) {
        out.fill(0.0);
    }

    fn upload_uniform(&mut self, location: UniformLocation, data: UniformData<'_>) {
        let name = self.uniform_name(location);
        tracing::trace!(location = location.0, name = ?name, "uniform upload");
        self.uploads.push(RecordedUpload {
            name,
            location,
            data: data.into(),
        });
    }

    fn create_buffer(&mut self) -> Result<BufferId, DeviceError> {
        let id = self.next_handle();
        self.buffers.insert(
            id,
            BufferObject {
                data: Arc::new(Mutex::new(Vec::new())),
                mapped: false,
            },
        );
        Ok(BufferId(id))
    }

    fn delete_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer.0);
    }

    fn allocate_buffer(
        &mut self,
        _target: BufferTarget,
        buffer: BufferId,
        size: usize,
    ) -> Result<(), DeviceError> {
        let object = self.buffer(buffer)?;
        if object.mapped {
            return Err(DeviceError::BufferMapped(buffer.0));
        }
        *object.data.lock() = vec![0; size];
        self.stats.buffer_allocations += 1;
        Ok(())
    }

    fn write_buffer(
        &mut self,
        _target: BufferTarget,
        buffer: BufferId,
        offset: usize,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let object = self.buffer(buffer)?;
        if object.mapped {
            return Err(DeviceError::BufferMapped(buffer.0));
        }
        {
            let mut storage = object.data.lock();
            let size = storage.len();
            let end = offset + data.len();
            if end > size {
                return Err(DeviceError::OutOfRange {
                    offset,
                    len: data.len(),
                    size,
                });
            }
            storage[offset..end].copy_from_slice(data);
        }
        self.stats.buffer_writes += 1;
        Ok(())
    }

    fn bind_buffer_range(&mut self, binding: u32, buffer: BufferId, offset: usize, size: usize) {
        self.buffer_ranges.insert(binding, (buffer, offset, size));
    }

    fn buffer_size(&self, buffer: BufferId) -> Option<usize> {
        self.buffers
            .get(&buffer.0)
            .map(|object| object.data.lock().len())
    }

    fn map_buffer(&mut self, buffer: BufferId) -> Result<MappedBuffer, DeviceError> {
        if std::mem::take(&mut self.fail_next_map) {
            return Err(DeviceError::MapFailed(buffer.0));
        }
        let object = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or(DeviceError::UnknownHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        if object.mapped {
            return Err(DeviceError::BufferMapped(buffer.0));
        }
        let (ptr, len) = {
            let mut storage = object.data.lock();
            (storage.as_mut_ptr(), storage.len())
        };
        let lease: Arc<dyn std::any::Any + Send + Sync> = object.data.clone();
        // SAFETY: the Vec is neither resized nor read while `mapped` is set,
        // and the lease keeps its allocation alive.
        let mapped = unsafe { MappedBuffer::from_raw(ptr, len, Some(lease)) }
            .ok_or(DeviceError::MapFailed(buffer.0))?;
        object.mapped = true;
        self.stats.maps += 1;
        Ok(mapped)
    }

    fn unmap_buffer(&mut self, buffer: BufferId) {
        if let Some(object) = self.buffers.get_mut(&buffer.0) {
            if std::mem::take(&mut object.mapped) {
                self.stats.unmaps += 1;
            }
        }
    }

    fn create_texture(&mut self) -> Result<TextureId, DeviceError> {
        let id = self.next_handle();
        self.textures.insert(id, TextureObject::default());
        Ok(TextureId(id))
    }

    fn delete_texture(&mut self, texture: TextureId) {
        self.textures.remove(&texture.0);
        self.bound_units.retain(|_, bound| *bound != texture);
    }

    fn set_texture_filtering(&mut self, texture: TextureId, filter: TextureFilter) {
        if let Some(object) = self.textures.get_mut(&texture.0) {
            object.filter = Some(filter);
        }
    }

    fn allocate_texture(
        &mut self,
        texture: TextureId,
        descriptor: &TextureDescriptor,
        pixels: Option<&[u8]>,
    ) -> Result<(), DeviceError> {
        let expected = descriptor.byte_size();
        let contents = match pixels {
            Some(pixels) => {
                descriptor.check_pixels(pixels.len())?;
                pixels[..expected].to_vec()
            }
            None => vec![0; expected],
        };
        let object = self.texture_mut(texture)?;
        object.descriptor = Some(*descriptor);
        object.pixels = contents;
        object.mipmaps = 0;
        self.stats.texture_allocations += 1;
        Ok(())
    }

    fn update_texture_from_buffer(
        &mut self,
        texture: TextureId,
        descriptor: &TextureDescriptor,
        buffer: BufferId,
    ) -> Result<(), DeviceError> {
        let source = self.buffer(buffer)?;
        if source.mapped {
            return Err(DeviceError::BufferMapped(buffer.0));
        }
        let contents = source.data.lock().clone();
        let expected = descriptor.byte_size();
        descriptor.check_pixels(contents.len())?;
        let object = self.texture_mut(texture)?;
        object.pixels = contents[..expected].to_vec();
        self.stats.texture_updates += 1;
        Ok(())
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        match texture {
            Some(texture) => {
                self.bound_units.insert(unit, texture);
            }
            None => {
                self.bound_units.remove(&unit);
            }
        }
    }

    fn read_texture(
        &mut self,
        texture: TextureId,
        _descriptor: &TextureDescriptor,
        out: &mut [u8],
    ) -> Result<(), DeviceError> {
        let object = self.texture_mut(texture)?;
        if out.len() != object.pixels.len() {
            return Err(DeviceError::PixelSize {
                expected: object.pixels.len(),
                actual: out.len(),
            });
        }
        out.copy_from_slice(&object.pixels);
        Ok(())
    }

    fn generate_mipmap(&mut self, texture: TextureId) {
        if let Some(object) = self.textures.get_mut(&texture.0) {
            object.mipmaps += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "#version 330 core\nuniform mat4 _mvp;\nvoid main() {}\n";
    const FRAGMENT: &str =
        "#version 330 core\nuniform vec4 _color;\nlayout(std140) uniform Params\n{\n vec4 v;\n};\nvoid main() {}\n";

    fn linked(device: &mut HeadlessDevice) -> ProgramId {
        let program = device.create_program().unwrap();
        for (stage, source) in [(Stage::Vertex, VERTEX), (Stage::Fragment, FRAGMENT)] {
            let shader = device.create_shader(stage).unwrap();
            assert!(device.compile_shader(shader, source).success);
            device.attach_shader(program, shader);
        }
        assert!(device.link_program(program).success);
        program
    }

    #[test]
    fn compile_requires_main_and_rejects_error_directives() {
        let mut device = HeadlessDevice::new();
        let shader = device.create_shader(Stage::Fragment).unwrap();
        assert!(!device.compile_shader(shader, "uniform int a;").success);
        let status = device.compile_shader(shader, "void main() {}\n#error nope\n");
        assert!(!status.success);
        assert!(status.log.contains("0:2"));
    }

    #[test]
    fn link_resolves_declared_names() {
        let mut device = HeadlessDevice::new();
        let program = linked(&mut device);
        assert!(device.uniform_location(program, "_mvp").is_some());
        assert!(device.uniform_location(program, "_color").is_some());
        assert_eq!(device.uniform_block_index(program, "Params"), Some(0));
        assert!(device.uniform_location(program, "missing").is_none());
    }

    #[test]
    fn link_needs_vertex_and_fragment() {
        let mut device = HeadlessDevice::new();
        let program = device.create_program().unwrap();
        let shader = device.create_shader(Stage::Fragment).unwrap();
        device.compile_shader(shader, FRAGMENT);
        device.attach_shader(program, shader);
        assert!(!device.link_program(program).success);
    }

    #[test]
    fn uploads_are_recorded_with_names() {
        let mut device = HeadlessDevice::new();
        let program = linked(&mut device);
        device.use_program(Some(program));
        let location = device.uniform_location(program, "_color").unwrap();
        device.upload_uniform(location, UniformData::Float(&[1.0, 0.0, 0.0, 1.0]));
        let uploads = device.uploads_named("_color");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].data, RecordedData::Float(vec![1.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn mapped_buffers_reject_writes_until_unmapped() {
        let mut device = HeadlessDevice::new();
        let buffer = device.create_buffer().unwrap();
        device
            .allocate_buffer(BufferTarget::PixelUnpack, buffer, 4)
            .unwrap();
        let mut mapped = device.map_buffer(buffer).unwrap();
        mapped.write_all(&[1, 2, 3, 4]);
        assert!(matches!(
            device.write_buffer(BufferTarget::PixelUnpack, buffer, 0, &[0]),
            Err(DeviceError::BufferMapped(_))
        ));
        drop(mapped);
        device.unmap_buffer(buffer);
        assert_eq!(device.buffer_contents(buffer), Some(vec![1, 2, 3, 4]));
        assert_eq!(device.stats().unmaps, 1);
    }
}
