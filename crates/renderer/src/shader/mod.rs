//! Shader programs built from up to three stages.
//!
//! A [`ShaderProgram`] owns its stage objects, the linked program and a
//! [`UniformRegistry`]. Drawing goes through [`ShaderProgram::activate`],
//! which links on demand and returns an [`ActiveShader`] guard. The guard
//! holds the program and the device mutably, so no other activation can start
//! until it is dropped, and dropping it releases every texture unit bound
//! through it before unbinding the program.

use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use glam::Mat4;

use crate::device::{DeviceError, GraphicsDevice, ProgramId, ShaderId, TextureId, UniformData};
use crate::texture::TextureStream;
use crate::types::{FillMode, Sideness, Stage};
use crate::value::Value;

mod attributes;
pub(crate) mod declarations;
pub mod sources;
pub mod uniforms;

pub use attributes::{AttributeError, ATTRIBUTES};
pub use uniforms::{UniformEntry, UniformRegistry, UniformSlot, UniformType, UNIFORM_BLOCK_BINDING};

pub(crate) const TEXTURE_COUNT_UNIFORM: &str = "_textureNbr";
const MVP_UNIFORM: &str = "_modelViewProjectionMatrix";
const NORMAL_MATRIX_UNIFORM: &str = "_normalMatrix";

#[derive(Debug, thiserror::Error)]
pub enum ShaderError {
    #[error("failed to read shader source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[derive(Debug, Default)]
struct StageSlot {
    shader: Option<ShaderId>,
    source: String,
    compiled: bool,
}

pub struct ShaderProgram {
    stages: [StageSlot; 3],
    program: Option<ProgramId>,
    linked: bool,
    fill: FillMode,
    pub(crate) sideness: Sideness,
    pub(crate) layout: [i32; 4],
    uniforms: UniformRegistry,
}

impl fmt::Debug for ShaderProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgram")
            .field("program", &self.program)
            .field("linked", &self.linked)
            .field("fill", &self.fill)
            .field("uniforms", &self.uniforms.len())
            .finish()
    }
}

impl ShaderProgram {
    /// Creates the stage objects and loads the `texture` sources. The
    /// program links on first activation.
    pub fn new(gpu: &mut dyn GraphicsDevice) -> Result<Self, ShaderError> {
        let mut stages: [StageSlot; 3] = Default::default();
        for stage in Stage::ALL {
            stages[stage.index()].shader = Some(gpu.create_shader(stage)?);
        }

        let mut program = Self {
            stages,
            program: None,
            linked: false,
            fill: FillMode::Texture,
            sideness: Sideness::default(),
            layout: [0, 1, 2, 3],
            uniforms: UniformRegistry::new(),
        };
        program.load_fill(gpu, FillMode::Texture);
        program
            .uniforms
            .set_values("_scale", vec![Value::Float(1.0); 3]);
        program.uniforms.set_values(
            "_layout",
            program.layout.iter().copied().map(Value::Int).collect(),
        );
        program
            .uniforms
            .set_values("_sideness", vec![Value::Int(program.sideness.index())]);
        Ok(program)
    }

    pub fn fill(&self) -> FillMode {
        self.fill
    }

    pub fn sideness(&self) -> Sideness {
        self.sideness
    }

    pub fn layout(&self) -> [i32; 4] {
        self.layout
    }

    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn program_id(&self) -> Option<ProgramId> {
        self.program
    }

    pub fn uniforms(&self) -> &UniformRegistry {
        &self.uniforms
    }

    pub fn source(&self, stage: Stage) -> &str {
        &self.stages[stage.index()].source
    }

    pub fn is_compiled(&self, stage: Stage) -> bool {
        self.stages[stage.index()].compiled
    }

    /// Sets a uniform, queueing it only when the values changed.
    pub fn set_uniform(&mut self, name: &str, values: Vec<Value>) -> bool {
        self.uniforms.set_if_changed(name, values)
    }

    /// Compiles `source` for `stage` and stores it. Compile failures are
    /// logged and leave the stage detached from the next link. Returns
    /// whether the stage compiled.
    pub fn set_source(&mut self, gpu: &mut dyn GraphicsDevice, source: &str, stage: Stage) -> bool {
        self.linked = false;
        let slot = &mut self.stages[stage.index()];
        slot.source = source.to_owned();
        slot.compiled = false;

        let shader = match slot.shader {
            Some(shader) => shader,
            None => match gpu.create_shader(stage) {
                Ok(shader) => *slot.shader.insert(shader),
                Err(error) => {
                    tracing::error!(%stage, %error, "failed to create shader object");
                    return false;
                }
            },
        };

        let status = gpu.compile_shader(shader, source);
        if !status.success {
            tracing::warn!(%stage, log = %status.log.trim_end(), "shader compilation failed");
        } else {
            tracing::debug!(%stage, bytes = source.len(), "shader stage compiled");
        }
        slot.compiled = status.success;
        status.success
    }

    pub fn set_source_from_file(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        path: &Path,
        stage: Stage,
    ) -> Result<bool, ShaderError> {
        let source = fs::read_to_string(path).map_err(|source| ShaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.set_source(gpu, &source, stage))
    }

    /// Discards and recreates the stage object, clearing its source.
    pub fn reset_stage(&mut self, gpu: &mut dyn GraphicsDevice, stage: Stage) {
        self.linked = false;
        let slot = &mut self.stages[stage.index()];
        if let Some(shader) = slot.shader.take() {
            gpu.delete_shader(shader);
        }
        slot.source.clear();
        slot.compiled = false;
        match gpu.create_shader(stage) {
            Ok(shader) => slot.shader = Some(shader),
            Err(error) => tracing::error!(%stage, %error, "failed to recreate shader object"),
        }
    }

    /// Swaps in the built-in sources for `mode`. Returns false when `mode`
    /// is already active.
    pub fn set_fill(&mut self, gpu: &mut dyn GraphicsDevice, mode: FillMode) -> bool {
        if mode == self.fill {
            return false;
        }
        tracing::debug!(from = %self.fill, to = %mode, "switching fill mode");
        self.load_fill(gpu, mode);
        true
    }

    fn load_fill(&mut self, gpu: &mut dyn GraphicsDevice, mode: FillMode) {
        let sources = sources::sources_for(mode);
        self.set_source(gpu, sources.vertex, Stage::Vertex);
        match sources.geometry {
            Some(geometry) => {
                self.set_source(gpu, geometry, Stage::Geometry);
            }
            None => self.reset_stage(gpu, Stage::Geometry),
        }
        self.set_source(gpu, sources.fragment, Stage::Fragment);
        self.fill = mode;
    }

    /// Links every compiled stage into a fresh program object. On failure
    /// the previous program object is kept and the program stays unlinked.
    pub fn link(&mut self, gpu: &mut dyn GraphicsDevice) -> bool {
        let program = match gpu.create_program() {
            Ok(program) => program,
            Err(error) => {
                tracing::error!(%error, "failed to create program object");
                return false;
            }
        };

        for slot in &self.stages {
            if let (Some(shader), true) = (slot.shader, slot.compiled) {
                gpu.attach_shader(program, shader);
            }
        }

        let status = gpu.link_program(program);
        if !status.success {
            tracing::warn!(log = %status.log.trim_end(), fill = %self.fill, "shader program link failed");
            gpu.delete_program(program);
            self.linked = false;
            return false;
        }

        if let Some(previous) = self.program.replace(program) {
            gpu.delete_program(previous);
        }
        for slot in self.stages.iter().filter(|slot| slot.compiled) {
            self.uniforms.parse_declarations(gpu, program, &slot.source);
        }
        self.uniforms.refresh_slots(gpu, program);
        self.linked = true;
        tracing::debug!(
            program = program.0,
            fill = %self.fill,
            uniforms = self.uniforms.len(),
            "shader program linked"
        );
        true
    }

    /// Makes the program current, linking first when needed. Returns `None`
    /// when linking fails.
    pub fn activate<'a>(
        &'a mut self,
        gpu: &'a mut dyn GraphicsDevice,
    ) -> Option<ActiveShader<'a>> {
        if !self.linked && !self.link(gpu) {
            return None;
        }
        let program = self.program?;
        self.uniforms.bind_blocks(gpu, program);
        gpu.use_program(Some(program));
        Some(ActiveShader {
            shader: self,
            gpu,
            bound_units: Vec::new(),
        })
    }

    /// Deletes every GPU object owned by the program.
    pub fn destroy(mut self, gpu: &mut dyn GraphicsDevice) {
        for slot in &mut self.stages {
            if let Some(shader) = slot.shader.take() {
                gpu.delete_shader(shader);
            }
        }
        if let Some(program) = self.program.take() {
            gpu.delete_program(program);
        }
        self.uniforms.release(gpu);
    }
}

/// A program bound for drawing.
pub struct ActiveShader<'a> {
    shader: &'a mut ShaderProgram,
    gpu: &'a mut dyn GraphicsDevice,
    bound_units: Vec<u32>,
}

impl ActiveShader<'_> {
    /// Uploads queued uniforms, returning how many uploads were issued.
    pub fn push_uniforms(&mut self) -> usize {
        self.shader.uniforms.push_pending(self.gpu)
    }

    pub fn set_uniform(&mut self, name: &str, values: Vec<Value>) -> bool {
        self.shader.uniforms.set_if_changed(name, values)
    }

    /// Binds `texture` to `unit` and points the sampler `uniform` at it.
    /// Unknown uniforms are ignored.
    pub fn bind_texture(&mut self, texture: TextureId, unit: u32, uniform: &str) -> bool {
        let Some(entry) = self.shader.uniforms.entry(uniform) else {
            return false;
        };
        let slot = entry.slot();

        self.gpu.bind_texture(unit, Some(texture));
        if let UniformSlot::Location(location) = slot {
            self.gpu
                .upload_uniform(location, UniformData::Int(&[unit as i32]));
        }
        self.bound_units.push(unit);

        if self.shader.uniforms.contains(TEXTURE_COUNT_UNIFORM) {
            let count = self.bound_units.len() as i32;
            self.shader
                .uniforms
                .set_if_changed(TEXTURE_COUNT_UNIFORM, vec![Value::Int(count)]);
        }
        true
    }

    /// Binds a streamed texture and forwards the uniforms it derives from
    /// its source.
    pub fn bind_stream(&mut self, stream: &TextureStream, unit: u32, uniform: &str) -> bool {
        if !self.bind_texture(stream.texture(), unit, uniform) {
            return false;
        }
        for (name, values) in stream.shader_uniforms() {
            self.shader.uniforms.set_if_changed(name, values.clone());
        }
        true
    }

    /// Uploads the combined projection and the normal matrix derived from
    /// `model_view`.
    pub fn set_model_view_projection(&mut self, model_view: Mat4, projection: Mat4) {
        let mvp = projection * model_view;
        let normal = model_view.inverse().transpose();
        for (name, matrix) in [(MVP_UNIFORM, mvp), (NORMAL_MATRIX_UNIFORM, normal)] {
            if let Some(UniformSlot::Location(location)) =
                self.shader.uniforms.entry(name).map(UniformEntry::slot)
            {
                self.gpu
                    .upload_uniform(location, UniformData::Matrix4(&matrix.to_cols_array()));
            }
        }
    }

    /// Texture units bound during this activation.
    pub fn bound_units(&self) -> &[u32] {
        &self.bound_units
    }

    /// Releases the activation; same as dropping the guard.
    pub fn deactivate(self) {}
}

impl Deref for ActiveShader<'_> {
    type Target = ShaderProgram;

    fn deref(&self) -> &ShaderProgram {
        self.shader
    }
}

impl Drop for ActiveShader<'_> {
    fn drop(&mut self) {
        for unit in self.bound_units.drain(..) {
            self.gpu.bind_texture(unit, None);
        }
        self.gpu.use_program(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{HeadlessDevice, RecordedData};

    #[test]
    fn activation_links_on_demand_and_unbinds_on_drop() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        assert!(!shader.is_linked());

        {
            let active = shader.activate(&mut gpu).expect("activation");
            assert!(active.is_linked());
        }
        assert_eq!(gpu.current_program(), None);
        assert!(shader.program_id().is_some());
        assert!(shader.uniforms().contains("_tex0"));
    }

    #[test]
    fn queued_defaults_reach_the_device_after_link() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        let mut active = shader.activate(&mut gpu).unwrap();
        active.push_uniforms();
        drop(active);
        assert_eq!(
            gpu.uploads_named("_scale")[0].data,
            RecordedData::Float(vec![1.0, 1.0, 1.0])
        );
        assert_eq!(gpu.uploads_named("_sideness").len(), 1);
    }

    #[test]
    fn failed_link_keeps_previous_program() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        assert!(shader.link(&mut gpu));
        let first = shader.program_id();

        shader.set_source(&mut gpu, sources::COLOR_FRAGMENT, Stage::Fragment);
        gpu.fail_next_link();
        assert!(shader.activate(&mut gpu).is_none());
        assert_eq!(shader.program_id(), first);
        assert!(!shader.is_linked());
        assert_eq!(gpu.current_program(), None);
        assert_eq!(gpu.live_programs(), 1);
    }

    #[test]
    fn compile_failure_is_not_fatal() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        assert!(!shader.set_source(&mut gpu, "#error broken\nvoid main() {}", Stage::Fragment));
        assert!(!shader.is_compiled(Stage::Fragment));
        assert!(shader.activate(&mut gpu).is_none());

        assert!(shader.set_source(&mut gpu, sources::UV_FRAGMENT, Stage::Fragment));
        assert!(shader.activate(&mut gpu).is_some());
    }

    #[test]
    fn fill_round_trip_matches_fresh_program() {
        let mut gpu = HeadlessDevice::new();
        let mut switched = ShaderProgram::new(&mut gpu).unwrap();
        assert!(switched.set_fill(&mut gpu, FillMode::Wireframe));
        assert!(switched.is_compiled(Stage::Geometry));
        drop(switched.activate(&mut gpu).unwrap());
        assert!(switched.set_fill(&mut gpu, FillMode::Texture));
        assert!(switched.source(Stage::Geometry).is_empty());
        drop(switched.activate(&mut gpu).unwrap());

        let mut fresh = ShaderProgram::new(&mut gpu).unwrap();
        drop(fresh.activate(&mut gpu).unwrap());

        assert_eq!(
            switched.uniforms().active_names(),
            fresh.uniforms().active_names()
        );
        assert!(switched.uniforms().contains("_wireframeColor"));
        assert!(!switched
            .uniforms()
            .entry("_wireframeColor")
            .unwrap()
            .is_bound());
    }

    #[test]
    fn same_fill_is_a_no_op() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        assert!(shader.link(&mut gpu));
        assert!(!shader.set_fill(&mut gpu, FillMode::Texture));
        assert!(shader.is_linked());
    }

    #[test]
    fn window_fill_uses_its_own_vertex_stage() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        shader.set_fill(&mut gpu, FillMode::Window);
        assert_eq!(shader.source(Stage::Vertex), sources::WINDOW_VERTEX);
        assert!(shader.source(Stage::Geometry).is_empty());
    }

    #[test]
    fn texture_bindings_are_released_with_the_guard() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        let texture = gpu.create_texture().unwrap();
        {
            let mut active = shader.activate(&mut gpu).unwrap();
            assert!(!active.bind_texture(texture, 3, "_missing"));
            assert!(active.bind_texture(texture, 0, "_tex0"));
            assert_eq!(active.bound_units(), &[0]);
            assert_eq!(
                active.uniforms().values(TEXTURE_COUNT_UNIFORM),
                Some(&[Value::Int(1)][..])
            );
            active.deactivate();
        }
        assert_eq!(gpu.bound_units(), 0);
        assert_eq!(gpu.uploads_named("_tex0")[0].data, RecordedData::Int(vec![0]));
    }

    #[test]
    fn model_view_projection_uploads_both_matrices() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        let mut active = shader.activate(&mut gpu).unwrap();
        let model_view = Mat4::from_translation(glam::Vec3::new(0.0, 0.0, -5.0));
        active.set_model_view_projection(model_view, Mat4::IDENTITY);
        drop(active);

        let mvp = gpu.uploads_named(MVP_UNIFORM);
        assert_eq!(mvp.len(), 1);
        assert_eq!(mvp[0].data, RecordedData::Matrix4(model_view.to_cols_array().to_vec()));
        assert_eq!(gpu.uploads_named(NORMAL_MATRIX_UNIFORM).len(), 1);
    }

    #[test]
    fn sources_load_from_files() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.frag");
        fs::write(&path, "uniform float _gain;\nvoid main() {}\n").unwrap();

        assert!(shader
            .set_source_from_file(&mut gpu, &path, Stage::Fragment)
            .unwrap());
        assert!(shader.link(&mut gpu));
        assert!(shader.uniforms().contains("_gain"));

        let missing =
            shader.set_source_from_file(&mut gpu, &dir.path().join("nope.frag"), Stage::Fragment);
        assert!(matches!(missing, Err(ShaderError::Io { .. })));
    }

    #[test]
    fn destroy_releases_programs() {
        let mut gpu = HeadlessDevice::new();
        let mut shader = ShaderProgram::new(&mut gpu).unwrap();
        assert!(shader.link(&mut gpu));
        shader.destroy(&mut gpu);
        assert_eq!(gpu.live_programs(), 0);
    }
}
