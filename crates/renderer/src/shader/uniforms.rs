//! Uniform discovery and dirty tracking for one shader program.
//!
//! After every successful link the program feeds each stage source through
//! [`UniformRegistry::parse_declarations`] and then calls
//! [`UniformRegistry::refresh_slots`]. Entries are never removed: a uniform
//! that disappears from the linked program keeps its values and becomes
//! [`UniformSlot::Unbound`] until a later link finds it again, at which point
//! the stored values are queued for upload.

use std::collections::BTreeMap;
use std::fmt;

use crate::device::{BufferId, BufferTarget, GraphicsDevice, ProgramId, UniformData, UniformLocation};
use crate::shader::declarations::{scan_declarations, Declaration};
use crate::value::Value;

/// Binding point shared by every `layout(std140)` block.
pub const UNIFORM_BLOCK_BINDING: u32 = 1;

/// Entries holding more scalar values than this are never uploaded.
const MAX_SCALAR_VALUES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniformType {
    Int,
    Float,
    Vec2,
    Vec3,
    Vec4,
    IVec2,
    IVec3,
    IVec4,
    Mat4,
    Sampler2D,
    Buffer,
    /// Created by a setter before any source declared it.
    Undeclared,
    Unsupported(String),
}

impl UniformType {
    fn from_token(token: &str) -> Self {
        match token {
            "int" => UniformType::Int,
            "float" => UniformType::Float,
            "vec2" => UniformType::Vec2,
            "vec3" => UniformType::Vec3,
            "vec4" => UniformType::Vec4,
            "ivec2" => UniformType::IVec2,
            "ivec3" => UniformType::IVec3,
            "ivec4" => UniformType::IVec4,
            "mat4" => UniformType::Mat4,
            "sampler2D" => UniformType::Sampler2D,
            other => UniformType::Unsupported(other.to_owned()),
        }
    }

    /// Components per element for vector and scalar types.
    pub fn arity(&self) -> Option<usize> {
        match self {
            UniformType::Int | UniformType::Float => Some(1),
            UniformType::Vec2 | UniformType::IVec2 => Some(2),
            UniformType::Vec3 | UniformType::IVec3 => Some(3),
            UniformType::Vec4 | UniformType::IVec4 => Some(4),
            UniformType::Mat4 => Some(16),
            _ => None,
        }
    }

    fn is_integer(&self) -> bool {
        matches!(
            self,
            UniformType::Int | UniformType::IVec2 | UniformType::IVec3 | UniformType::IVec4
        )
    }

    fn is_float(&self) -> bool {
        matches!(
            self,
            UniformType::Float | UniformType::Vec2 | UniformType::Vec3 | UniformType::Vec4
        )
    }

    fn default_values(&self) -> Vec<Value> {
        match self {
            UniformType::Sampler2D => Vec::new(),
            ty if ty.is_integer() => vec![Value::Int(0); ty.arity().unwrap_or(1)],
            ty => ty
                .arity()
                .map(|arity| vec![Value::Float(0.0); arity])
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniformType::Int => "int",
            UniformType::Float => "float",
            UniformType::Vec2 => "vec2",
            UniformType::Vec3 => "vec3",
            UniformType::Vec4 => "vec4",
            UniformType::IVec2 => "ivec2",
            UniformType::IVec3 => "ivec3",
            UniformType::IVec4 => "ivec4",
            UniformType::Mat4 => "mat4",
            UniformType::Sampler2D => "sampler2D",
            UniformType::Buffer => "buffer",
            UniformType::Undeclared => "undeclared",
            UniformType::Unsupported(token) => token,
        };
        f.write_str(name)
    }
}

/// Where an entry lives in the currently linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformSlot {
    Unbound,
    Location(UniformLocation),
    Block(u32),
}

impl fmt::Display for UniformSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniformSlot::Unbound => f.write_str("unbound"),
            UniformSlot::Location(location) => write!(f, "location {}", location.0),
            UniformSlot::Block(index) => write!(f, "block {index}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UniformEntry {
    ty: UniformType,
    slot: UniformSlot,
    values: Vec<Value>,
    buffer: Option<BufferId>,
    buffer_ready: bool,
}

impl UniformEntry {
    fn new(ty: UniformType) -> Self {
        Self {
            ty,
            slot: UniformSlot::Unbound,
            values: Vec::new(),
            buffer: None,
            buffer_ready: false,
        }
    }

    pub fn ty(&self) -> &UniformType {
        &self.ty
    }

    pub fn slot(&self) -> UniformSlot {
        self.slot
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Backing object of a `buffer` entry.
    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    pub fn is_bound(&self) -> bool {
        self.slot != UniformSlot::Unbound
    }
}

#[derive(Debug, Default)]
pub struct UniformRegistry {
    entries: BTreeMap<String, UniformEntry>,
    pending: Vec<String>,
}

impl UniformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn entry(&self, name: &str) -> Option<&UniformEntry> {
        self.entries.get(name)
    }

    pub fn values(&self, name: &str) -> Option<&[Value]> {
        self.entries.get(name).map(|entry| entry.values.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformEntry)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry))
    }

    /// Names resolved in the currently linked program.
    pub fn active_names(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, entry)| entry.is_bound())
            .map(|(name, _)| name)
            .collect()
    }

    /// Names waiting for the next upload, in queue order.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// Stores `values` and queues the uniform for upload.
    pub fn set_values(&mut self, name: &str, values: Vec<Value>) {
        self.entries
            .entry(name.to_owned())
            .or_insert_with(|| UniformEntry::new(UniformType::Undeclared))
            .values = values;
        self.queue(name);
    }

    /// Like [`Self::set_values`], but leaves the queue alone when nothing
    /// changed. Returns whether the uniform was queued.
    pub fn set_if_changed(&mut self, name: &str, values: Vec<Value>) -> bool {
        if self
            .entries
            .get(name)
            .is_some_and(|entry| entry.values == values)
        {
            return false;
        }
        self.set_values(name, values);
        true
    }

    fn queue(&mut self, name: &str) {
        if !self.pending.iter().any(|queued| queued == name) {
            self.pending.push(name.to_owned());
        }
    }

    /// Registers every declaration found in `source` against `program`.
    pub fn parse_declarations(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        program: ProgramId,
        source: &str,
    ) {
        for declaration in scan_declarations(source) {
            match declaration {
                Declaration::Block { name } => self.register_block(gpu, program, name),
                Declaration::Uniform { type_name, name } => {
                    self.register_uniform(gpu, program, type_name, name)
                }
            }
        }
    }

    fn register_block(&mut self, gpu: &mut dyn GraphicsDevice, program: ProgramId, name: &str) {
        let slot = gpu
            .uniform_block_index(program, name)
            .map_or(UniformSlot::Unbound, UniformSlot::Block);
        let entry = self
            .entries
            .entry(name.to_owned())
            .or_insert_with(|| UniformEntry::new(UniformType::Buffer));
        entry.ty = UniformType::Buffer;
        entry.slot = slot;
        entry.buffer_ready = false;
        if entry.buffer.is_none() {
            match gpu.create_buffer() {
                Ok(buffer) => entry.buffer = Some(buffer),
                Err(error) => {
                    tracing::warn!(uniform = name, %error, "failed to create uniform block buffer")
                }
            }
        }
        let requeue = !entry.values.is_empty();
        if requeue {
            self.queue(name);
        }
    }

    fn register_uniform(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        program: ProgramId,
        type_name: &str,
        name: &str,
    ) {
        let ty = UniformType::from_token(type_name);
        let previous = self
            .entries
            .get(name)
            .map(|entry| entry.values.clone())
            .filter(|values| !values.is_empty());

        let slot = match &ty {
            UniformType::Unsupported(token) => {
                tracing::warn!(uniform = name, ty = %token, "unsupported uniform type; uniform will not be uploaded");
                UniformSlot::Unbound
            }
            _ => gpu
                .uniform_location(program, name)
                .map_or(UniformSlot::Unbound, UniformSlot::Location),
        };

        let values = match previous {
            Some(values) => {
                self.queue(name);
                values
            }
            None => read_default(gpu, program, &ty, slot),
        };

        let entry = self
            .entries
            .entry(name.to_owned())
            .or_insert_with(|| UniformEntry::new(ty.clone()));
        entry.ty = ty;
        entry.slot = slot;
        entry.values = values;
    }

    /// Re-resolves every known entry against `program`; names the program no
    /// longer exposes become unbound.
    pub fn refresh_slots(&mut self, gpu: &dyn GraphicsDevice, program: ProgramId) {
        for (name, entry) in &mut self.entries {
            let slot = match entry.ty {
                UniformType::Unsupported(_) => UniformSlot::Unbound,
                UniformType::Buffer => gpu
                    .uniform_block_index(program, name)
                    .map_or(UniformSlot::Unbound, UniformSlot::Block),
                _ => gpu
                    .uniform_location(program, name)
                    .map_or(UniformSlot::Unbound, UniformSlot::Location),
            };
            if slot == UniformSlot::Unbound && entry.slot != UniformSlot::Unbound {
                tracing::debug!(uniform = %name, "uniform no longer present in linked program");
            }
            entry.slot = slot;
        }
    }

    /// Points every resolved block at [`UNIFORM_BLOCK_BINDING`].
    pub(crate) fn bind_blocks(&self, gpu: &mut dyn GraphicsDevice, program: ProgramId) {
        for entry in self.entries.values() {
            if let (UniformType::Buffer, UniformSlot::Block(index)) = (&entry.ty, entry.slot) {
                gpu.uniform_block_binding(program, index, UNIFORM_BLOCK_BINDING);
            }
        }
    }

    /// Uploads every queued uniform and clears the queue. Only called while
    /// the owning program is current. Returns the number of uploads issued.
    pub(crate) fn push_pending(&mut self, gpu: &mut dyn GraphicsDevice) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let mut uploaded = 0;
        for name in pending {
            let Some(entry) = self.entries.get_mut(&name) else {
                continue;
            };
            if entry.slot == UniformSlot::Unbound {
                tracing::trace!(uniform = %name, "uniform unbound; upload deferred to next link");
                continue;
            }
            if entry.values.len() > MAX_SCALAR_VALUES {
                tracing::trace!(uniform = %name, len = entry.values.len(), "uniform holds too many values; skipped");
                continue;
            }
            if push_entry(gpu, &name, entry) {
                uploaded += 1;
            }
        }
        uploaded
    }

    /// Releases backing buffers owned by block entries.
    pub(crate) fn release(&mut self, gpu: &mut dyn GraphicsDevice) {
        for entry in self.entries.values_mut() {
            if let Some(buffer) = entry.buffer.take() {
                gpu.delete_buffer(buffer);
            }
        }
    }
}

fn read_default(
    gpu: &dyn GraphicsDevice,
    program: ProgramId,
    ty: &UniformType,
    slot: UniformSlot,
) -> Vec<Value> {
    let (UniformSlot::Location(location), Some(arity)) = (slot, ty.arity()) else {
        return ty.default_values();
    };
    if *ty == UniformType::Mat4 {
        return ty.default_values();
    }
    if ty.is_integer() {
        let mut out = vec![0i32; arity];
        gpu.read_uniform_i32(program, location, &mut out);
        out.into_iter().map(Value::Int).collect()
    } else {
        let mut out = vec![0f32; arity];
        gpu.read_uniform_f32(program, location, &mut out);
        out.into_iter().map(Value::Float).collect()
    }
}

enum Flat {
    Ints(Vec<i32>),
    Floats(Vec<f32>),
}

/// Converts numeric values to the declared component type, or to the type
/// of the first value when the declaration does not say.
fn flatten(name: &str, ty: &UniformType, values: &[Value]) -> Option<Flat> {
    let integer = if ty.is_integer() {
        true
    } else if ty.is_float() {
        false
    } else {
        match values.first()? {
            Value::Int(_) => true,
            Value::Float(_) => false,
            Value::Str(_) | Value::Seq(_) => return None,
        }
    };
    let result = if integer {
        values.iter().map(Value::as_int).collect::<Result<_, _>>().map(Flat::Ints)
    } else {
        values
            .iter()
            .map(Value::as_float)
            .collect::<Result<_, _>>()
            .map(Flat::Floats)
    };
    match result {
        Ok(flat) => Some(flat),
        Err(error) => {
            tracing::warn!(uniform = name, %error, "uniform values are not numeric; skipped");
            None
        }
    }
}

fn push_entry(gpu: &mut dyn GraphicsDevice, name: &str, entry: &mut UniformEntry) -> bool {
    let Some(first) = entry.values.first() else {
        return false;
    };

    let flat = match first {
        Value::Seq(items) => flatten(name, &entry.ty, items),
        Value::Str(_) => {
            tracing::debug!(uniform = name, "string values cannot be uploaded");
            None
        }
        _ => flatten(name, &entry.ty, &entry.values),
    };
    let Some(flat) = flat else {
        return false;
    };
    let nested = matches!(first, Value::Seq(_));

    match (entry.slot, nested) {
        (UniformSlot::Block(_), true) if entry.ty == UniformType::Buffer => {
            let bytes: Vec<u8> = match &flat {
                Flat::Ints(data) => bytemuck::cast_slice(data).to_vec(),
                Flat::Floats(data) => bytemuck::cast_slice(data).to_vec(),
            };
            upload_block(gpu, name, entry, &bytes)
        }
        (UniformSlot::Location(location), false) => {
            match &flat {
                Flat::Ints(data) => gpu.upload_uniform(location, UniformData::Int(data)),
                Flat::Floats(data) => gpu.upload_uniform(location, UniformData::Float(data)),
            }
            true
        }
        (UniformSlot::Location(location), true) => {
            let arity = entry.ty.arity().filter(|arity| *arity <= 4);
            match (&flat, arity) {
                (Flat::Ints(values), Some(arity)) if entry.ty.is_integer() => {
                    gpu.upload_uniform(location, UniformData::IntArray { arity, values });
                    true
                }
                (Flat::Floats(values), Some(arity)) if entry.ty.is_float() => {
                    gpu.upload_uniform(location, UniformData::FloatArray { arity, values });
                    true
                }
                _ => {
                    tracing::debug!(uniform = name, ty = %entry.ty, "array values do not match declared type");
                    false
                }
            }
        }
        _ => {
            tracing::debug!(uniform = name, ty = %entry.ty, "values do not fit uniform slot");
            false
        }
    }
}

fn upload_block(
    gpu: &mut dyn GraphicsDevice,
    name: &str,
    entry: &mut UniformEntry,
    bytes: &[u8],
) -> bool {
    let Some(buffer) = entry.buffer else {
        tracing::warn!(uniform = name, "uniform block has no backing buffer");
        return false;
    };
    if !entry.buffer_ready || gpu.buffer_size(buffer) != Some(bytes.len()) {
        if let Err(error) = gpu.allocate_buffer(BufferTarget::Uniform, buffer, bytes.len()) {
            tracing::warn!(uniform = name, %error, "failed to allocate uniform block storage");
            return false;
        }
        entry.buffer_ready = true;
    }
    if let Err(error) = gpu.write_buffer(BufferTarget::Uniform, buffer, 0, bytes) {
        tracing::warn!(uniform = name, %error, "failed to update uniform block");
        return false;
    }
    gpu.bind_buffer_range(UNIFORM_BLOCK_BINDING, buffer, 0, bytes.len());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, RecordedData};
    use crate::types::Stage;

    const VERTEX: &str = "#version 330 core\nvoid main() {}\n";

    fn link(gpu: &mut HeadlessDevice, fragment: &str) -> ProgramId {
        let program = gpu.create_program().unwrap();
        for (stage, source) in [(Stage::Vertex, VERTEX), (Stage::Fragment, fragment)] {
            let shader = gpu.create_shader(stage).unwrap();
            assert!(gpu.compile_shader(shader, source).success);
            gpu.attach_shader(program, shader);
        }
        assert!(gpu.link_program(program).success);
        program
    }

    fn parse(registry: &mut UniformRegistry, gpu: &mut HeadlessDevice, fragment: &str) -> ProgramId {
        let program = link(gpu, fragment);
        registry.parse_declarations(gpu, program, fragment);
        registry.refresh_slots(gpu, program);
        gpu.use_program(Some(program));
        program
    }

    #[test]
    fn declarations_create_typed_entries_with_defaults() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(
            &mut registry,
            &mut gpu,
            "uniform float foo;\nuniform vec3 bar;\nvoid main() {}\n",
        );

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.entry("foo").unwrap().ty(), &UniformType::Float);
        assert_eq!(registry.entry("bar").unwrap().ty(), &UniformType::Vec3);
        assert_eq!(registry.values("foo").unwrap().len(), 1);
        assert_eq!(registry.values("bar").unwrap().len(), 3);
        assert!(registry.pending().is_empty());
    }

    #[test]
    fn mat4_and_sampler_defaults() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(
            &mut registry,
            &mut gpu,
            "uniform mat4 m;\nuniform sampler2D tex;\nvoid main() {}\n",
        );
        assert_eq!(registry.values("m").unwrap().len(), 16);
        assert!(registry.values("tex").unwrap().is_empty());
    }

    #[test]
    fn unchanged_values_are_queued_once() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(&mut registry, &mut gpu, "uniform float foo;\nvoid main() {}\n");

        assert!(registry.set_if_changed("foo", vec![Value::Float(0.5)]));
        assert!(!registry.set_if_changed("foo", vec![Value::Float(0.5)]));
        assert_eq!(registry.pending().len(), 1);

        assert_eq!(registry.push_pending(&mut gpu), 1);
        assert_eq!(gpu.uploads_named("foo").len(), 1);
        assert!(registry.pending().is_empty());
    }

    #[test]
    fn more_than_four_values_never_reach_the_device() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(&mut registry, &mut gpu, "uniform float weights[8];\nvoid main() {}\n");

        registry.set_values("weights", (0..8).map(|i| Value::Float(i as f32)).collect());
        assert_eq!(registry.push_pending(&mut gpu), 0);
        assert!(gpu.uploads().is_empty());
        assert_eq!(registry.values("weights").unwrap().len(), 8);
    }

    #[test]
    fn unbound_values_survive_relinks_and_are_requeued() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        let with_foo = "uniform float foo;\nvoid main() {}\n";
        parse(&mut registry, &mut gpu, with_foo);
        registry.set_values("foo", vec![Value::Float(2.0)]);

        parse(&mut registry, &mut gpu, "uniform int other;\nvoid main() {}\n");
        assert_eq!(registry.entry("foo").unwrap().slot(), UniformSlot::Unbound);
        assert_eq!(registry.push_pending(&mut gpu), 0);
        assert_eq!(registry.values("foo"), Some(&[Value::Float(2.0)][..]));

        parse(&mut registry, &mut gpu, with_foo);
        assert_eq!(registry.pending(), &["foo".to_owned()]);
        registry.push_pending(&mut gpu);
        let uploads = gpu.uploads_named("foo");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].data, RecordedData::Float(vec![2.0]));
    }

    #[test]
    fn vector_arrays_divide_by_arity() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(&mut registry, &mut gpu, "uniform vec2 offsets[3];\nvoid main() {}\n");

        let flat = (0..6).map(|i| Value::Float(i as f32)).collect();
        registry.set_values("offsets", vec![Value::Seq(flat)]);
        registry.push_pending(&mut gpu);

        let uploads = gpu.uploads_named("offsets");
        assert_eq!(
            uploads[0].data,
            RecordedData::FloatArray {
                arity: 2,
                values: vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
            }
        );
    }

    #[test]
    fn blocks_allocate_once_and_bind_the_shared_range() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(
            &mut registry,
            &mut gpu,
            "layout(std140) uniform Params\n{\n vec4 data;\n};\nvoid main() {}\n",
        );
        let entry = registry.entry("Params").unwrap();
        assert_eq!(entry.ty(), &UniformType::Buffer);
        let buffer = entry.buffer().expect("block owns a buffer");

        let payload = vec![Value::Seq(vec![
            Value::Float(1.0),
            Value::Float(2.0),
            Value::Float(3.0),
            Value::Float(4.0),
        ])];
        registry.set_values("Params", payload.clone());
        registry.push_pending(&mut gpu);
        registry.set_values("Params", payload);
        registry.push_pending(&mut gpu);

        assert_eq!(gpu.stats().buffer_allocations, 1);
        assert_eq!(gpu.stats().buffer_writes, 2);
        assert_eq!(gpu.bound_range(UNIFORM_BLOCK_BINDING), Some((buffer, 0, 16)));
        let expected: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 2.0, 3.0, 4.0]).to_vec();
        assert_eq!(gpu.buffer_contents(buffer), Some(expected));
    }

    #[test]
    fn unsupported_types_stay_unbound() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(&mut registry, &mut gpu, "uniform sampler3D volume;\nvoid main() {}\n");
        let entry = registry.entry("volume").unwrap();
        assert_eq!(entry.ty(), &UniformType::Unsupported("sampler3D".into()));
        assert_eq!(entry.slot(), UniformSlot::Unbound);
        assert!(registry.active_names().is_empty());
    }

    #[test]
    fn values_follow_the_declared_component_type() {
        let mut gpu = HeadlessDevice::new();
        let mut registry = UniformRegistry::new();
        parse(
            &mut registry,
            &mut gpu,
            "uniform int count;\nuniform vec2 size;\nvoid main() {}\n",
        );
        registry.set_values("count", vec![Value::Float(3.0)]);
        registry.set_values("size", vec![Value::Int(4), Value::Int(2)]);
        assert_eq!(registry.push_pending(&mut gpu), 2);
        assert_eq!(gpu.uploads_named("count")[0].data, RecordedData::Int(vec![3]));
        assert_eq!(
            gpu.uploads_named("size")[0].data,
            RecordedData::Float(vec![4.0, 2.0])
        );
    }

    #[test]
    fn setters_before_parse_create_undeclared_entries() {
        let mut registry = UniformRegistry::new();
        registry.set_values("_color", vec![Value::Float(1.0); 4]);
        let entry = registry.entry("_color").unwrap();
        assert_eq!(entry.ty(), &UniformType::Undeclared);
        assert!(!entry.is_bound());
    }
}
