use crate::device::{CompressedFormat, InternalFormat, PixelOrder, TextureDescriptor, TextureUpload};

use super::image::{ImageSpec, SampleFormat};

/// GPU storage chosen for a source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResolvedLayout {
    pub descriptor: TextureDescriptor,
    pub channels: u32,
    pub ycocg: bool,
}

impl ResolvedLayout {
    /// The source descriptor as the texture stores it: DXT1 frames report
    /// the doubled height and three channels.
    pub fn storage_spec(&self, source: &ImageSpec) -> ImageSpec {
        ImageSpec {
            height: self.descriptor.height,
            channels: self.channels,
            ..source.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum LayoutError {
    #[error("unsupported channel layout [{names}] with {channels} channel(s)")]
    Channels { names: String, channels: u32 },
    #[error("uncompressed textures need 8-bit samples, got {0}")]
    SampleFormat(SampleFormat),
}

/// Maps a frame descriptor to texture storage. `byte_len` is the size of the
/// frame's pixel data and only matters for compressed layouts.
pub(crate) fn resolve(
    spec: &ImageSpec,
    srgb: bool,
    byte_len: usize,
) -> Result<ResolvedLayout, LayoutError> {
    let names: Vec<&str> = spec.channel_names.iter().map(String::as_str).collect();
    let compressed = |format, height, channels, ycocg| ResolvedLayout {
        descriptor: TextureDescriptor {
            width: spec.width,
            height,
            upload: TextureUpload::Compressed {
                format,
                byte_size: byte_len,
            },
        },
        channels,
        ycocg,
    };

    let order = match names.as_slice() {
        ["RGB_DXT1"] => {
            return Ok(compressed(
                CompressedFormat::Dxt1 { srgb },
                spec.height * 2,
                3,
                false,
            ))
        }
        ["RGBA_DXT5"] => {
            return Ok(compressed(CompressedFormat::Dxt5 { srgb }, spec.height, 4, false))
        }
        ["YCoCg_DXT5"] => {
            return Ok(compressed(CompressedFormat::Dxt5 { srgb }, spec.height, 4, true))
        }
        ["B", "G", "R"] => PixelOrder::Bgr,
        ["B", "G", "R", "A"] => PixelOrder::Bgra,
        ["R", "G", "B"] => PixelOrder::Rgb,
        ["R", "G", "B", "A"] => PixelOrder::Rgba,
        _ => match spec.channels {
            3 => PixelOrder::Rgb,
            4 => PixelOrder::Rgba,
            channels => {
                return Err(LayoutError::Channels {
                    names: names.join(","),
                    channels,
                })
            }
        },
    };

    if spec.format != SampleFormat::U8 {
        return Err(LayoutError::SampleFormat(spec.format));
    }
    Ok(ResolvedLayout {
        descriptor: TextureDescriptor {
            width: spec.width,
            height: spec.height,
            upload: TextureUpload::Uncompressed {
                internal: InternalFormat::for_srgb(srgb),
                order,
            },
        },
        channels: order.channels(),
        ycocg: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_orders_win_over_channel_count() {
        let layout = resolve(&ImageSpec::bgra8(4, 2), true, 32).unwrap();
        assert_eq!(
            layout.descriptor.upload,
            TextureUpload::Uncompressed {
                internal: InternalFormat::Srgb8Alpha8,
                order: PixelOrder::Bgra,
            }
        );
        assert_eq!(layout.descriptor.byte_size(), 32);
    }

    #[test]
    fn unnamed_channels_fall_back_by_count() {
        let spec = ImageSpec::rgb8(2, 2).with_channel_names(["Y", "U", "V"]);
        let layout = resolve(&spec, false, 12).unwrap();
        assert_eq!(layout.channels, 3);

        let gray = ImageSpec::new(2, 2, 1, SampleFormat::U8);
        assert!(matches!(
            resolve(&gray, false, 4),
            Err(LayoutError::Channels { channels: 1, .. })
        ));
    }

    #[test]
    fn dxt1_doubles_the_height() {
        let spec = ImageSpec::compressed(8, 4, 4, "RGB_DXT1");
        let layout = resolve(&spec, false, 64).unwrap();
        assert_eq!(layout.descriptor.height, 8);
        assert_eq!(layout.channels, 3);
        assert_eq!(layout.descriptor.byte_size(), 64);

        let stored = layout.storage_spec(&spec);
        assert_eq!((stored.width, stored.height, stored.channels), (8, 8, 3));
        assert_eq!(stored.channel_names, vec!["RGB_DXT1".to_owned()]);
    }

    #[test]
    fn only_ycocg_sets_the_flag() {
        let ycocg = resolve(&ImageSpec::compressed(4, 4, 4, "YCoCg_DXT5"), false, 16).unwrap();
        let rgba = resolve(&ImageSpec::compressed(4, 4, 4, "RGBA_DXT5"), false, 16).unwrap();
        assert!(ycocg.ycocg);
        assert!(!rgba.ycocg);
    }

    #[test]
    fn wide_samples_are_rejected() {
        let spec = ImageSpec::new(2, 2, 4, SampleFormat::U16);
        assert_eq!(
            resolve(&spec, false, 32),
            Err(LayoutError::SampleFormat(SampleFormat::U16))
        );
    }
}
