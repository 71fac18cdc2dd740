use image::{DynamicImage, ImageBuffer, Luma, Rgb, Rgba};

use crate::error::FrameError;
use crate::record::ImagePayload;

/// Pixel formats the decoder understands. Anything else is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    LInt8,
    LInt16,
    RgbInt8,
    RgbaInt8,
    BgrInt8,
    BgraInt8,
    RgbInt16,
}

impl PixelFormat {
    /// Maps a wire tag to a format.
    pub fn from_tag(tag: &str) -> Result<Self, FrameError> {
        match tag {
            "L_INT8" => Ok(Self::LInt8),
            "L_INT16" => Ok(Self::LInt16),
            "RGB_INT8" => Ok(Self::RgbInt8),
            "RGBA_INT8" => Ok(Self::RgbaInt8),
            "BGR_INT8" => Ok(Self::BgrInt8),
            "BGRA_INT8" => Ok(Self::BgraInt8),
            "RGB_INT16" => Ok(Self::RgbInt16),
            other => Err(FrameError::UnsupportedPixelFormat(other.to_string())),
        }
    }

    /// Layout of the decoded buffer. BGR orders are swizzled to RGB.
    pub const fn layout(&self) -> ChannelLayout {
        match self {
            Self::LInt8 => ChannelLayout::Luma8,
            Self::LInt16 => ChannelLayout::Luma16,
            Self::RgbInt8 | Self::BgrInt8 => ChannelLayout::Rgb8,
            Self::RgbaInt8 | Self::BgraInt8 => ChannelLayout::Rgba8,
            Self::RgbInt16 => ChannelLayout::Rgb16,
        }
    }
}

/// Interleaved channel layout of a decoded frame. 16-bit samples are little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelLayout {
    Luma8,
    Luma16,
    Rgb8,
    Rgba8,
    Rgb16,
}

impl ChannelLayout {
    pub const fn channels(&self) -> usize {
        match self {
            Self::Luma8 | Self::Luma16 => 1,
            Self::Rgb8 | Self::Rgb16 => 3,
            Self::Rgba8 => 4,
        }
    }

    pub const fn bytes_per_channel(&self) -> usize {
        match self {
            Self::Luma16 | Self::Rgb16 => 2,
            Self::Luma8 | Self::Rgb8 | Self::Rgba8 => 1,
        }
    }

    pub const fn has_alpha(&self) -> bool {
        matches!(self, Self::Rgba8)
    }

    pub const fn is_16bit(&self) -> bool {
        self.bytes_per_channel() == 2
    }
}

/// A decoded pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub layout: ChannelLayout,
    pub pixels: Vec<u8>,
}

/// Decodes one image payload. Pure: the same payload always yields the same bytes.
pub fn decode_frame(payload: &ImagePayload) -> Result<DecodedFrame, FrameError> {
    let format = PixelFormat::from_tag(&payload.pixel_format)?;
    let layout = format.layout();

    let expected = payload.width as usize
        * payload.height as usize
        * layout.channels()
        * layout.bytes_per_channel();
    if payload.data.len() != expected {
        return Err(FrameError::MalformedFrame {
            expected,
            actual: payload.data.len(),
        });
    }

    let mut pixels = payload.data.clone();
    match format {
        PixelFormat::BgrInt8 => pixels.chunks_exact_mut(3).for_each(|px| px.swap(0, 2)),
        PixelFormat::BgraInt8 => pixels.chunks_exact_mut(4).for_each(|px| px.swap(0, 2)),
        _ => {}
    }

    Ok(DecodedFrame {
        width: payload.width,
        height: payload.height,
        layout,
        pixels,
    })
}

impl DecodedFrame {
    /// Byte count implied by width, height and layout.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.layout.channels() * self.layout.bytes_per_channel()
    }

    /// Converts into an `image` buffer for encoding. Fails on a buffer whose
    /// length does not match its dimensions.
    pub fn to_dynamic_image(&self) -> Result<DynamicImage, FrameError> {
        let malformed = || FrameError::MalformedFrame {
            expected: self.expected_len(),
            actual: self.pixels.len(),
        };
        if self.pixels.len() != self.expected_len() {
            return Err(malformed());
        }

        let (w, h) = (self.width, self.height);
        let image = match self.layout {
            ChannelLayout::Luma8 => ImageBuffer::<Luma<u8>, _>::from_raw(w, h, self.pixels.clone())
                .map(DynamicImage::ImageLuma8),
            ChannelLayout::Rgb8 => ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, self.pixels.clone())
                .map(DynamicImage::ImageRgb8),
            ChannelLayout::Rgba8 => ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, self.pixels.clone())
                .map(DynamicImage::ImageRgba8),
            ChannelLayout::Luma16 => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, self.samples_u16())
                .map(DynamicImage::ImageLuma16),
            ChannelLayout::Rgb16 => ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, self.samples_u16())
                .map(DynamicImage::ImageRgb16),
        };
        image.ok_or_else(malformed)
    }

    fn samples_u16(&self) -> Vec<u16> {
        self.pixels
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect()
    }
}
