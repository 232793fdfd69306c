//! Streams CPU-side [`Image`] frames into a GPU texture.
//!
//! A [`TextureStream`] owns one texture and two pixel-unpack transfer
//! buffers. Each frame the texture is refreshed from the buffer filled on the
//! previous frame while worker tasks copy the new frame into the other one,
//! so the render thread only waits for copies that are still running when
//! the next update (or an explicit flush) comes around.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lumiere_scheduler::{TaskHandle, TaskScheduler};

use crate::device::{
    BufferId, BufferTarget, DeviceError, GraphicsDevice, InternalFormat, PixelOrder,
    TextureDescriptor, TextureId, TextureUpload,
};
use crate::types::TextureFilter;
use crate::value::Value;

pub mod image;
mod layout;

pub use image::{Image, ImageError, ImageFrame, ImageGuard, ImageSpec, SampleFormat};

pub const DEFAULT_COPY_CHUNKS: usize = 4;
const YCOCG_UNIFORM: &str = "YCoCg";

/// Counters describing what a stream did so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StreamStats {
    pub reallocations: u64,
    pub content_updates: u64,
    pub background_copies: u64,
    pub skipped_frames: u64,
}

/// Background copy into a mapped transfer buffer. Holds the source lock
/// until flushed.
struct PendingCopy {
    buffer: BufferId,
    handles: Vec<TaskHandle>,
    _source: ImageGuard,
}

impl Drop for PendingCopy {
    fn drop(&mut self) {
        // Writers must be done before the mapping can go away.
        for handle in self.handles.drain(..) {
            handle.wait();
        }
    }
}

pub struct TextureStream {
    texture: TextureId,
    buffers: [BufferId; 2],
    ready: usize,
    spec: Option<ImageSpec>,
    descriptor: Option<TextureDescriptor>,
    source: Option<Image>,
    last_timestamp: Option<u64>,
    pending: Option<PendingCopy>,
    filtering: bool,
    copy_chunks: usize,
    scheduler: Arc<dyn TaskScheduler>,
    uniforms: BTreeMap<String, Vec<Value>>,
    stats: StreamStats,
}

impl fmt::Debug for TextureStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureStream")
            .field("texture", &self.texture)
            .field("spec", &self.spec)
            .field("ready", &self.ready)
            .field("pending", &self.pending.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl TextureStream {
    /// Creates the texture and both transfer buffers.
    pub fn new(
        gpu: &mut dyn GraphicsDevice,
        scheduler: Arc<dyn TaskScheduler>,
    ) -> Result<Self, DeviceError> {
        let texture = gpu.create_texture()?;
        let buffers = [gpu.create_buffer()?, gpu.create_buffer()?];
        Ok(Self {
            texture,
            buffers,
            ready: 0,
            spec: None,
            descriptor: None,
            source: None,
            last_timestamp: None,
            pending: None,
            filtering: true,
            copy_chunks: DEFAULT_COPY_CHUNKS,
            scheduler,
            uniforms: BTreeMap::from([(YCOCG_UNIFORM.to_owned(), vec![Value::Int(0)])]),
            stats: StreamStats::default(),
        })
    }

    /// Number of background tasks a frame copy is split into.
    pub fn with_copy_chunks(mut self, chunks: usize) -> Self {
        self.copy_chunks = chunks.max(1);
        self
    }

    pub fn with_filtering(mut self, filtering: bool) -> Self {
        self.filtering = filtering;
        self
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn transfer_buffers(&self) -> [BufferId; 2] {
        self.buffers
    }

    /// Buffer the next steady-state update reads from.
    pub fn ready_buffer(&self) -> BufferId {
        self.buffers[self.ready]
    }

    /// Descriptor of the frame the storage was last allocated for.
    pub fn spec(&self) -> Option<&ImageSpec> {
        self.spec.as_ref()
    }

    pub fn descriptor(&self) -> Option<&TextureDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn filtering(&self) -> bool {
        self.filtering
    }

    pub fn has_pending_copy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Uniforms a shader sampling this texture should receive.
    pub fn shader_uniforms(&self) -> &BTreeMap<String, Vec<Value>> {
        &self.uniforms
    }

    /// Sets the frame source. Nothing reaches the GPU before [`Self::update`].
    pub fn attach_source(&mut self, image: Image) {
        self.source = Some(image);
        self.last_timestamp = None;
    }

    pub fn source(&self) -> Option<&Image> {
        self.source.as_ref()
    }

    /// Brings the texture up to date with its source. Call once per frame on
    /// the render thread.
    ///
    /// In the steady state the source stays locked until the next update or
    /// [`Self::flush_pending_copy`], so producers on the same thread must
    /// flush before writing. Returns whether the texture changed.
    pub fn update(&mut self, gpu: &mut dyn GraphicsDevice) -> bool {
        self.flush_pending_copy(gpu);

        let Some(source) = self.source.clone() else {
            return false;
        };
        if self.last_timestamp == Some(source.timestamp()) {
            return false;
        }

        let frame = source.lock();
        let timestamp = source.timestamp();
        let spec = frame.spec().clone();
        if spec.width == 0 || spec.height == 0 {
            tracing::warn!(%spec, "source image has no pixels; skipping");
            self.skip(timestamp);
            return false;
        }

        let layout = match layout::resolve(&spec, frame.srgb(), frame.pixels().len()) {
            Ok(layout) => layout,
            Err(error) => {
                tracing::warn!(%spec, %error, "unsupported pixel layout; keeping previous content");
                self.skip(timestamp);
                return false;
            }
        };

        let spec = layout.storage_spec(&spec);
        let needs_storage = self
            .spec
            .as_ref()
            .map_or(true, |stored| !stored.same_storage(&spec))
            || self.descriptor != Some(layout.descriptor);

        let result = if needs_storage {
            self.reallocate(gpu, &frame, spec, layout.descriptor)
        } else {
            self.stream(gpu, frame, layout.descriptor)
        };
        if let Err(error) = result {
            tracing::error!(texture = self.texture.0, %error, "texture update failed");
            return false;
        }

        self.uniforms.insert(
            YCOCG_UNIFORM.to_owned(),
            vec![Value::Int(i32::from(layout.ycocg))],
        );
        self.last_timestamp = Some(timestamp);
        true
    }

    fn skip(&mut self, timestamp: u64) {
        self.last_timestamp = Some(timestamp);
        self.stats.skipped_frames += 1;
    }

    fn reallocate(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        frame: &ImageFrame,
        spec: ImageSpec,
        descriptor: TextureDescriptor,
    ) -> Result<(), DeviceError> {
        gpu.set_texture_filtering(self.texture, TextureFilter::from_enabled(self.filtering));
        gpu.allocate_texture(self.texture, &descriptor, Some(frame.pixels()))?;
        self.resize_buffers(gpu, frame.pixels().len())?;
        gpu.write_buffer(
            BufferTarget::PixelUnpack,
            self.buffers[self.ready],
            0,
            frame.pixels(),
        )?;

        tracing::debug!(
            texture = self.texture.0,
            %spec,
            bytes = frame.pixels().len(),
            "texture storage reallocated"
        );
        self.spec = Some(spec);
        self.descriptor = Some(descriptor);
        self.stats.reallocations += 1;
        Ok(())
    }

    fn resize_buffers(&mut self, gpu: &mut dyn GraphicsDevice, size: usize) -> Result<(), DeviceError> {
        for buffer in self.buffers {
            gpu.allocate_buffer(BufferTarget::PixelUnpack, buffer, size)?;
        }
        Ok(())
    }

    fn stream(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        frame: ImageGuard,
        descriptor: TextureDescriptor,
    ) -> Result<(), DeviceError> {
        gpu.update_texture_from_buffer(self.texture, &descriptor, self.buffers[self.ready])?;
        self.stats.content_updates += 1;

        let next = self.ready ^ 1;
        let buffer = self.buffers[next];
        let mapped = gpu.map_buffer(buffer)?;
        self.ready = next;
        let pixels = frame.shared_pixels();
        let handles: Vec<TaskHandle> = mapped
            .split(self.copy_chunks)
            .into_iter()
            .map(|mut chunk| {
                let pixels = Arc::clone(&pixels);
                self.scheduler.submit(Box::new(move || {
                    let start = chunk.offset().min(pixels.len());
                    let end = (chunk.offset() + chunk.len()).min(pixels.len());
                    chunk.write(&pixels[start..end]);
                }))
            })
            .collect();

        self.stats.background_copies += handles.len() as u64;
        self.pending = Some(PendingCopy {
            buffer,
            handles,
            _source: frame,
        });
        Ok(())
    }

    /// Waits for the background copy, unmaps its buffer and releases the
    /// source. Returns false when nothing was pending.
    pub fn flush_pending_copy(&mut self, gpu: &mut dyn GraphicsDevice) -> bool {
        let Some(mut pending) = self.pending.take() else {
            return false;
        };
        self.scheduler
            .wait_all(std::mem::take(&mut pending.handles));
        gpu.unmap_buffer(pending.buffer);
        true
    }

    /// Allocates empty (or `pixels`-filled) storage directly, e.g. for a
    /// render target. Returns false for a zero-sized request.
    pub fn reset(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
        order: PixelOrder,
        pixels: Option<&[u8]>,
    ) -> Result<bool, DeviceError> {
        if width == 0 || height == 0 {
            tracing::warn!(width, height, "refusing to allocate a zero-sized texture");
            return Ok(false);
        }
        self.flush_pending_copy(gpu);

        let names: &[&str] = match order {
            PixelOrder::Rgb => &["R", "G", "B"],
            PixelOrder::Rgba => &["R", "G", "B", "A"],
            PixelOrder::Bgr => &["B", "G", "R"],
            PixelOrder::Bgra => &["B", "G", "R", "A"],
        };
        let spec = ImageSpec::new(width, height, order.channels(), SampleFormat::U8)
            .with_channel_names(names.iter().copied());
        let srgb = self
            .source
            .as_ref()
            .is_some_and(|source| source.lock().srgb());
        let descriptor = TextureDescriptor {
            width,
            height,
            upload: TextureUpload::Uncompressed {
                internal: InternalFormat::for_srgb(srgb),
                order,
            },
        };

        gpu.set_texture_filtering(self.texture, TextureFilter::from_enabled(self.filtering));
        gpu.allocate_texture(self.texture, &descriptor, pixels)?;
        self.resize_buffers(gpu, descriptor.byte_size())?;
        self.spec = Some(spec);
        self.descriptor = Some(descriptor);
        self.stats.reallocations += 1;
        tracing::debug!(texture = self.texture.0, width, height, ?order, "texture reset");
        Ok(true)
    }

    /// Reallocates empty storage when the size changes, keeping the pixel
    /// order. Unallocated streams become RGBA.
    pub fn resize(
        &mut self,
        gpu: &mut dyn GraphicsDevice,
        width: u32,
        height: u32,
    ) -> Result<bool, DeviceError> {
        let order = match self.descriptor {
            Some(TextureDescriptor {
                width: current_width,
                height: current_height,
                ..
            }) if current_width == width && current_height == height => return Ok(false),
            Some(TextureDescriptor {
                upload: TextureUpload::Uncompressed { order, .. },
                ..
            }) => order,
            _ => PixelOrder::Rgba,
        };
        self.reset(gpu, width, height, order, None)
    }

    pub fn generate_mipmap(&mut self, gpu: &mut dyn GraphicsDevice) {
        gpu.generate_mipmap(self.texture);
    }

    /// Reads the texture back into a new image. `None` when the storage is
    /// unallocated or block-compressed.
    pub fn read(&mut self, gpu: &mut dyn GraphicsDevice) -> Result<Option<Image>, DeviceError> {
        let (Some(spec), Some(descriptor)) = (self.spec.as_ref(), self.descriptor) else {
            return Ok(None);
        };
        if descriptor.is_compressed() {
            return Ok(None);
        }
        let mut pixels = vec![0; descriptor.byte_size()];
        gpu.read_texture(self.texture, &descriptor, &mut pixels)?;
        match Image::new(spec.clone(), pixels) {
            Ok(image) => Ok(Some(image)),
            Err(error) => Err(DeviceError::Backend(error.to_string())),
        }
    }

    /// Changes the sampling filter, applying it now when storage exists.
    pub fn set_filtering(&mut self, gpu: &mut dyn GraphicsDevice, filtering: bool) {
        self.filtering = filtering;
        if self.descriptor.is_some() {
            gpu.set_texture_filtering(self.texture, TextureFilter::from_enabled(filtering));
        }
    }

    /// Finishes pending work and deletes the GPU objects.
    pub fn destroy(mut self, gpu: &mut dyn GraphicsDevice) {
        self.flush_pending_copy(gpu);
        for buffer in self.buffers {
            gpu.delete_buffer(buffer);
        }
        gpu.delete_texture(self.texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use lumiere_scheduler::{InlineScheduler, WorkerPool};

    fn inline_stream(gpu: &mut HeadlessDevice) -> TextureStream {
        TextureStream::new(gpu, Arc::new(InlineScheduler)).unwrap()
    }

    fn gradient(width: u32, height: u32) -> Vec<u8> {
        (0..width * height * 4).map(|index| (index % 251) as u8).collect()
    }

    #[test]
    fn update_without_source_is_a_no_op() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        assert!(!stream.update(&mut gpu));
        assert_eq!(gpu.stats().texture_allocations, 0);
    }

    #[test]
    fn small_rgba_frame_sizes_both_buffers() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        stream.attach_source(Image::new(ImageSpec::rgba8(2, 2), gradient(2, 2)).unwrap());
        assert!(stream.update(&mut gpu));
        assert!(!stream.flush_pending_copy(&mut gpu));

        for buffer in stream.transfer_buffers() {
            assert_eq!(gpu.buffer_size(buffer), Some(16));
        }
        let spec = stream.spec().unwrap();
        assert_eq!((spec.width, spec.height, spec.channels), (2, 2, 4));
        assert_eq!(gpu.texture_pixels(stream.texture()), Some(&gradient(2, 2)[..]));
        assert_eq!(
            gpu.texture_filter(stream.texture()),
            Some(TextureFilter::Linear)
        );
    }

    #[test]
    fn unchanged_format_reallocates_once() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::blank(ImageSpec::rgba8(4, 4));
        stream.attach_source(image.clone());

        for frame in 0..5u8 {
            image.modify(|pixels| pixels.pixels_mut().fill(frame));
            assert!(stream.update(&mut gpu));
            stream.flush_pending_copy(&mut gpu);
        }
        assert_eq!(stream.stats().reallocations, 1);
        assert_eq!(stream.stats().content_updates, 4);
        assert_eq!(gpu.stats().texture_allocations, 1);
        assert_eq!(gpu.stats().texture_updates, 4);
    }

    #[test]
    fn same_timestamp_skips_the_frame() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        stream.attach_source(Image::blank(ImageSpec::rgba8(2, 2)));
        assert!(stream.update(&mut gpu));
        assert!(!stream.update(&mut gpu));
        assert_eq!(stream.stats().content_updates, 0);
    }

    #[test]
    fn second_flush_is_a_no_op() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::blank(ImageSpec::rgba8(2, 2));
        stream.attach_source(image.clone());
        stream.update(&mut gpu);
        image.modify(|frame| frame.pixels_mut().fill(7));
        stream.update(&mut gpu);

        assert!(stream.has_pending_copy());
        assert!(image.try_lock().is_none());
        assert!(stream.flush_pending_copy(&mut gpu));
        assert!(!stream.flush_pending_copy(&mut gpu));
        assert!(image.try_lock().is_some());
        assert_eq!(gpu.stats().maps, 1);
        assert_eq!(gpu.stats().unmaps, 1);
    }

    #[test]
    fn texture_lags_one_frame_behind_the_copy() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::blank(ImageSpec::rgba8(2, 2));
        stream.attach_source(image.clone());
        stream.update(&mut gpu);

        image.modify(|frame| frame.pixels_mut().fill(1));
        stream.update(&mut gpu);
        stream.flush_pending_copy(&mut gpu);
        assert_eq!(gpu.texture_pixels(stream.texture()), Some(&[0u8; 16][..]));
        assert_eq!(gpu.buffer_contents(stream.ready_buffer()), Some(vec![1; 16]));

        image.modify(|frame| frame.pixels_mut().fill(2));
        stream.update(&mut gpu);
        assert_eq!(gpu.texture_pixels(stream.texture()), Some(&[1u8; 16][..]));
    }

    #[test]
    fn format_change_reallocates_and_resizes_buffers() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::blank(ImageSpec::rgba8(2, 2));
        stream.attach_source(image.clone());
        stream.update(&mut gpu);

        image
            .set_pixels(ImageSpec::rgb8(4, 2), vec![3; 24])
            .unwrap();
        assert!(stream.update(&mut gpu));
        assert_eq!(stream.stats().reallocations, 2);
        for buffer in stream.transfer_buffers() {
            assert_eq!(gpu.buffer_size(buffer), Some(24));
        }
    }

    #[test]
    fn unsupported_layout_keeps_previous_content() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::new(ImageSpec::rgba8(2, 2), gradient(2, 2)).unwrap();
        stream.attach_source(image.clone());
        stream.update(&mut gpu);

        image
            .set_pixels(ImageSpec::new(2, 2, 2, SampleFormat::U8), vec![0; 8])
            .unwrap();
        assert!(!stream.update(&mut gpu));
        assert_eq!(stream.stats().skipped_frames, 1);
        assert_eq!(stream.spec().map(|spec| spec.channels), Some(4));
        assert_eq!(gpu.texture_pixels(stream.texture()), Some(&gradient(2, 2)[..]));
    }

    #[test]
    fn zero_sized_source_is_skipped() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        stream.attach_source(Image::blank(ImageSpec::rgba8(0, 4)));
        assert!(!stream.update(&mut gpu));
        assert_eq!(gpu.stats().texture_allocations, 0);
    }

    #[test]
    fn odd_width_rgb_frames_read_back_exactly() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let pixels: Vec<u8> = (0..27).collect();
        stream.attach_source(Image::new(ImageSpec::rgb8(3, 3), pixels.clone()).unwrap());
        assert!(stream.update(&mut gpu));

        for buffer in stream.transfer_buffers() {
            assert_eq!(gpu.buffer_size(buffer), Some(27));
        }
        let copy = stream.read(&mut gpu).unwrap().unwrap();
        assert_eq!(copy.lock().pixels(), &pixels[..]);
    }

    #[test]
    fn dxt1_storage_reports_doubled_height() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::new(ImageSpec::compressed(8, 4, 4, "RGB_DXT1"), vec![0; 32]).unwrap();
        stream.attach_source(image.clone());
        assert!(stream.update(&mut gpu));

        let spec = stream.spec().unwrap();
        assert_eq!((spec.width, spec.height, spec.channels), (8, 8, 3));
        assert_eq!(stream.descriptor().unwrap().height, 8);

        image.modify(|frame| frame.pixels_mut().fill(7));
        assert!(stream.update(&mut gpu));
        assert_eq!(stream.stats().reallocations, 1);
        assert_eq!(stream.stats().content_updates, 1);
    }

    #[test]
    fn failed_map_keeps_the_ready_buffer() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::new(ImageSpec::rgba8(2, 2), vec![1; 16]).unwrap();
        stream.attach_source(image.clone());
        assert!(stream.update(&mut gpu));
        let ready = stream.ready_buffer();

        image.modify(|frame| frame.pixels_mut().fill(2));
        gpu.fail_next_map();
        assert!(!stream.update(&mut gpu));
        assert_eq!(stream.ready_buffer(), ready);
        assert!(!stream.has_pending_copy());
        assert_eq!(gpu.buffer_contents(ready), Some(vec![1; 16]));
    }

    #[test]
    fn ycocg_sources_set_the_derived_uniform() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image =
            Image::new(ImageSpec::compressed(4, 4, 4, "YCoCg_DXT5"), vec![0; 16]).unwrap();
        stream.attach_source(image.clone());
        assert!(stream.update(&mut gpu));
        assert_eq!(stream.shader_uniforms()["YCoCg"], vec![Value::Int(1)]);
        assert!(stream.descriptor().unwrap().is_compressed());
        assert!(stream.read(&mut gpu).unwrap().is_none());

        image
            .set_pixels(ImageSpec::rgba8(2, 2), vec![0; 16])
            .unwrap();
        stream.update(&mut gpu);
        assert_eq!(stream.shader_uniforms()["YCoCg"], vec![Value::Int(0)]);
    }

    #[test]
    fn worker_pool_copies_match_the_source() {
        let mut gpu = HeadlessDevice::new();
        let pool = Arc::new(WorkerPool::new(3).unwrap());
        let mut stream = TextureStream::new(&mut gpu, pool).unwrap().with_copy_chunks(4);
        let image = Image::blank(ImageSpec::rgba8(7, 3));
        stream.attach_source(image.clone());
        stream.update(&mut gpu);

        let frame: Vec<u8> = (0..7 * 3 * 4).map(|index| index as u8).collect();
        image
            .set_pixels(ImageSpec::rgba8(7, 3), frame.clone())
            .unwrap();
        stream.update(&mut gpu);
        assert_eq!(stream.stats().background_copies, 4);
        assert!(stream.flush_pending_copy(&mut gpu));
        assert_eq!(gpu.buffer_contents(stream.ready_buffer()), Some(frame));
    }

    #[test]
    fn reset_and_resize_allocate_directly() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        assert!(!stream
            .reset(&mut gpu, 0, 8, PixelOrder::Rgba, None)
            .unwrap());
        assert!(stream
            .reset(&mut gpu, 4, 4, PixelOrder::Bgra, None)
            .unwrap());
        assert_eq!(gpu.buffer_size(stream.ready_buffer()), Some(64));

        assert!(!stream.resize(&mut gpu, 4, 4).unwrap());
        assert!(stream.resize(&mut gpu, 8, 4).unwrap());
        let descriptor = gpu.texture_descriptor(stream.texture()).unwrap();
        assert_eq!((descriptor.width, descriptor.height), (8, 4));
        assert_eq!(stream.spec().unwrap().channel_names, ["B", "G", "R", "A"]);
    }

    #[test]
    fn read_back_returns_a_new_image() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        stream.attach_source(Image::new(ImageSpec::rgba8(2, 2), gradient(2, 2)).unwrap());
        stream.update(&mut gpu);

        let copy = stream.read(&mut gpu).unwrap().unwrap();
        assert_eq!(copy.lock().pixels(), &gradient(2, 2)[..]);
        assert_eq!(copy.spec(), ImageSpec::rgba8(2, 2));
    }

    #[test]
    fn filtering_and_mipmaps_reach_the_texture() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu).with_filtering(false);
        stream.attach_source(Image::blank(ImageSpec::rgb8(2, 2)));
        stream.update(&mut gpu);
        assert_eq!(
            gpu.texture_filter(stream.texture()),
            Some(TextureFilter::Nearest)
        );

        stream.set_filtering(&mut gpu, true);
        stream.generate_mipmap(&mut gpu);
        assert_eq!(
            gpu.texture_filter(stream.texture()),
            Some(TextureFilter::Linear)
        );
        assert_eq!(gpu.texture_mipmaps(stream.texture()), 1);
    }

    #[test]
    fn destroy_releases_gpu_objects() {
        let mut gpu = HeadlessDevice::new();
        let mut stream = inline_stream(&mut gpu);
        let image = Image::blank(ImageSpec::rgba8(2, 2));
        stream.attach_source(image.clone());
        stream.update(&mut gpu);
        image.modify(|frame| frame.pixels_mut().fill(5));
        stream.update(&mut gpu);

        stream.destroy(&mut gpu);
        assert_eq!(gpu.live_textures(), 0);
        assert_eq!(gpu.live_buffers(), 0);
        assert!(image.try_lock().is_some());
    }
}
