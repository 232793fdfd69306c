//! Shared CPU-side frames consumed by [`super::TextureStream`].

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

/// Storage type of a single channel sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    #[default]
    U8,
    U16,
    F32,
}

impl SampleFormat {
    pub fn bytes(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::U16 => 2,
            SampleFormat::F32 => 4,
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SampleFormat::U8 => "u8",
            SampleFormat::U16 => "u16",
            SampleFormat::F32 => "f32",
        })
    }
}

/// Pixel descriptor of a frame.
///
/// Compressed frames carry a single channel name such as `RGB_DXT1`; their
/// byte size is whatever the encoder produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub format: SampleFormat,
    pub channel_names: Vec<String>,
}

const COMPRESSED_SUFFIXES: [&str; 2] = ["_DXT1", "_DXT5"];

impl ImageSpec {
    /// Uncompressed spec with `R,G,B,A`-prefix channel names.
    pub fn new(width: u32, height: u32, channels: u32, format: SampleFormat) -> Self {
        let channel_names = ["R", "G", "B", "A"]
            .iter()
            .take(channels as usize)
            .map(|name| (*name).to_owned())
            .collect();
        Self {
            width,
            height,
            channels,
            format,
            channel_names,
        }
    }

    pub fn with_channel_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channel_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn rgba8(width: u32, height: u32) -> Self {
        Self::new(width, height, 4, SampleFormat::U8)
    }

    pub fn rgb8(width: u32, height: u32) -> Self {
        Self::new(width, height, 3, SampleFormat::U8)
    }

    pub fn bgra8(width: u32, height: u32) -> Self {
        Self::new(width, height, 4, SampleFormat::U8).with_channel_names(["B", "G", "R", "A"])
    }

    pub fn bgr8(width: u32, height: u32) -> Self {
        Self::new(width, height, 3, SampleFormat::U8).with_channel_names(["B", "G", "R"])
    }

    /// Block-compressed spec; `layout` is e.g. `RGB_DXT1` or `YCoCg_DXT5`.
    pub fn compressed(width: u32, height: u32, channels: u32, layout: &str) -> Self {
        Self::new(width, height, channels, SampleFormat::U8).with_channel_names([layout])
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.channel_names.as_slice(), [name] if COMPRESSED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)))
    }

    /// Byte size of an uncompressed frame; `None` for compressed layouts.
    pub fn byte_size(&self) -> Option<usize> {
        if self.is_compressed() {
            return None;
        }
        Some(
            self.width as usize
                * self.height as usize
                * self.channels as usize
                * self.format.bytes(),
        )
    }

    /// Whether two specs need different texture storage.
    pub fn same_storage(&self, other: &ImageSpec) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.channels == other.channels
            && self.format == other.format
    }
}

impl fmt::Display for ImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{} {} [{}]",
            self.width,
            self.height,
            self.channels,
            self.format,
            self.channel_names.join(",")
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("{spec} needs {expected} bytes, got {actual}")]
    Size {
        spec: ImageSpec,
        expected: usize,
        actual: usize,
    },
}

fn check_size(spec: &ImageSpec, pixels: &[u8]) -> Result<(), ImageError> {
    match spec.byte_size() {
        Some(expected) if expected != pixels.len() => Err(ImageError::Size {
            spec: spec.clone(),
            expected,
            actual: pixels.len(),
        }),
        _ => Ok(()),
    }
}

/// One frame: descriptor, pixels and colour space.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    spec: ImageSpec,
    pixels: Arc<Vec<u8>>,
    srgb: bool,
}

impl ImageFrame {
    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Shared handle to the pixels, readable off the locking thread.
    pub fn shared_pixels(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.pixels)
    }

    /// Mutable pixels; the length is fixed by the `ImageSpec`.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.pixels).as_mut_slice()
    }

    pub fn srgb(&self) -> bool {
        self.srgb
    }
}

/// Shared handle to a frame updated by a producer and read by streams.
///
/// Every write bumps a monotonic timestamp that consumers compare against
/// the last value they saw.
#[derive(Clone)]
pub struct Image {
    frame: Arc<Mutex<ImageFrame>>,
    timestamp: Arc<AtomicU64>,
}

/// Exclusive lock on an [`Image`]; owns its reference so it can be held
/// across calls.
pub struct ImageGuard {
    guard: ArcMutexGuard<RawMutex, ImageFrame>,
}

impl Deref for ImageGuard {
    type Target = ImageFrame;

    fn deref(&self) -> &ImageFrame {
        &self.guard
    }
}

impl DerefMut for ImageGuard {
    fn deref_mut(&mut self) -> &mut ImageFrame {
        &mut self.guard
    }
}

impl fmt::Debug for ImageGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageGuard")
            .field("spec", &self.guard.spec)
            .finish()
    }
}

impl Image {
    pub fn new(spec: ImageSpec, pixels: Vec<u8>) -> Result<Self, ImageError> {
        check_size(&spec, &pixels)?;
        Ok(Self {
            frame: Arc::new(Mutex::new(ImageFrame {
                spec,
                pixels: Arc::new(pixels),
                srgb: false,
            })),
            timestamp: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Zero-filled uncompressed image.
    pub fn blank(spec: ImageSpec) -> Self {
        let size = spec.byte_size().unwrap_or(0);
        Self {
            frame: Arc::new(Mutex::new(ImageFrame {
                spec,
                pixels: Arc::new(vec![0; size]),
                srgb: false,
            })),
            timestamp: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub fn spec(&self) -> ImageSpec {
        self.frame.lock().spec.clone()
    }

    /// Blocks until the frame is free.
    pub fn lock(&self) -> ImageGuard {
        ImageGuard {
            guard: self.frame.lock_arc(),
        }
    }

    pub fn try_lock(&self) -> Option<ImageGuard> {
        self.frame.try_lock_arc().map(|guard| ImageGuard { guard })
    }

    /// Replaces the frame contents.
    pub fn set_pixels(&self, spec: ImageSpec, pixels: Vec<u8>) -> Result<(), ImageError> {
        check_size(&spec, &pixels)?;
        let mut frame = self.frame.lock();
        frame.spec = spec;
        frame.pixels = Arc::new(pixels);
        self.bump();
        Ok(())
    }

    pub fn set_srgb(&self, srgb: bool) {
        let mut frame = self.frame.lock();
        if frame.srgb != srgb {
            frame.srgb = srgb;
            self.bump();
        }
    }

    /// Edits the frame in place and marks it as new.
    pub fn modify<R>(&self, edit: impl FnOnce(&mut ImageFrame) -> R) -> R {
        let mut frame = self.frame.lock();
        let result = edit(&mut frame);
        self.bump();
        result
    }

    fn bump(&self) {
        self.timestamp.fetch_add(1, Ordering::AcqRel);
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("timestamp", &self.timestamp())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncompressed_size_is_checked() {
        let err = Image::new(ImageSpec::rgba8(2, 2), vec![0; 15]).unwrap_err();
        assert!(matches!(err, ImageError::Size { expected: 16, actual: 15, .. }));
        assert!(Image::new(ImageSpec::compressed(4, 4, 3, "RGB_DXT1"), vec![0; 8]).is_ok());
    }

    #[test]
    fn writes_bump_the_timestamp() {
        let image = Image::blank(ImageSpec::rgb8(1, 1));
        let first = image.timestamp();
        image.modify(|frame| frame.pixels_mut()[0] = 9);
        image.set_pixels(ImageSpec::rgb8(1, 1), vec![1, 2, 3]).unwrap();
        assert_eq!(image.timestamp(), first + 2);

        image.set_srgb(false);
        assert_eq!(image.timestamp(), first + 2);
    }

    #[test]
    fn guard_excludes_other_lockers() {
        let image = Image::blank(ImageSpec::rgba8(1, 1));
        let guard = image.lock();
        assert!(image.clone().try_lock().is_none());
        drop(guard);
        assert!(image.try_lock().is_some());
    }

    #[test]
    fn shared_pixels_survive_replacement() {
        let image = Image::new(ImageSpec::rgb8(1, 1), vec![1, 2, 3]).unwrap();
        let held = image.lock().shared_pixels();
        image.set_pixels(ImageSpec::rgb8(1, 1), vec![4, 5, 6]).unwrap();
        assert_eq!(held.as_slice(), &[1, 2, 3]);
        assert_eq!(image.lock().pixels(), &[4, 5, 6]);
    }

    #[test]
    fn compressed_layouts_are_detected() {
        assert!(ImageSpec::compressed(4, 4, 4, "YCoCg_DXT5").is_compressed());
        assert!(!ImageSpec::bgra8(4, 4).is_compressed());
        assert_eq!(ImageSpec::bgra8(4, 4).channel_names, ["B", "G", "R", "A"]);
    }
}
