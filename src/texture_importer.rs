// src/texture_importer.rs
//! CPU-side image decoding.
//!
//! Decoders produce a [`RawImage`]: tightly packed RGB or RGBA rows, padded out to
//! power-of-two texture dimensions so the result can be uploaded to hardware that cannot
//! sample NPOT textures.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};

use crate::decode::{DecodeCapability, DecodeOptions, Decoded, DecoderList, FallbackDecodeChain};
use crate::error::Result;
use crate::source::DecodeSource;

// ============================================================================
// RawImage
// ============================================================================

/// Decoded pixels plus the geometry a texture needs.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    /// Power-of-two width of the pixel buffer.
    pub texture_width: u32,
    /// Power-of-two height of the pixel buffer.
    pub texture_height: u32,
    /// Bits per pixel: 24 (RGB) or 32 (RGBA).
    pub depth: u32,
    /// `texture_width * texture_height * depth / 8` bytes, row-major, top row first.
    pub pixels: Vec<u8>,
}

/// Geometry of a decoded image without its pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub texture_width: u32,
    pub texture_height: u32,
    pub depth: u32,
}

impl ImageInfo {
    #[inline]
    pub fn has_alpha(&self) -> bool {
        self.depth == 32
    }
}

impl RawImage {
    /// Builds a texture-ready image from a decoded one, applying `options`.
    ///
    /// With `edging` on, the last column and row are copied one texel into the padding so
    /// linear filtering at the border does not blend with black.
    pub fn assemble(image: DynamicImage, options: &DecodeOptions, edging: bool) -> Self {
        let (width, height) = (image.width(), image.height());
        let alpha = image.color().has_alpha() || options.force_alpha || options.transparent.is_some();

        let (mut packed, bpp) = if alpha {
            let mut rgba = image.into_rgba8().into_raw();
            if let Some(key) = options.transparent {
                apply_color_key(&mut rgba, key);
            }
            (rgba, 4usize)
        } else {
            (image.into_rgb8().into_raw(), 3usize)
        };

        if options.flipped {
            flip_vertical(&mut packed, width as usize * bpp);
        }

        let texture_width = width.max(1).next_power_of_two();
        let texture_height = height.max(1).next_power_of_two();
        let pixels = pad_to(
            &packed,
            (width as usize, height as usize),
            (texture_width as usize, texture_height as usize),
            bpp,
            edging,
        );

        Self {
            width,
            height,
            texture_width,
            texture_height,
            depth: (bpp * 8) as u32,
            pixels,
        }
    }

    #[inline]
    pub fn has_alpha(&self) -> bool {
        self.depth == 32
    }

    #[inline]
    pub fn bytes_per_pixel(&self) -> usize {
        self.depth as usize / 8
    }

    /// The texel at `(x, y)` in texture coordinates, or `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.texture_width || y >= self.texture_height {
            return None;
        }
        let bpp = self.bytes_per_pixel();
        let start = (y as usize * self.texture_width as usize + x as usize) * bpp;
        self.pixels.get(start..start + bpp)
    }
}

impl Decoded for RawImage {
    type Info = ImageInfo;

    fn info(&self) -> ImageInfo {
        ImageInfo {
            width: self.width,
            height: self.height,
            texture_width: self.texture_width,
            texture_height: self.texture_height,
            depth: self.depth,
        }
    }
}

impl std::fmt::Debug for RawImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("texture_width", &self.texture_width)
            .field("texture_height", &self.texture_height)
            .field("depth", &self.depth)
            .finish()
    }
}

// ============================================================================
// Post-processing helpers
// ============================================================================

/// Reverses row order in place.
pub fn flip_vertical(pixels: &mut [u8], row_bytes: usize) {
    if row_bytes == 0 {
        return;
    }
    let rows = pixels.len() / row_bytes;
    for top in 0..rows / 2 {
        let bottom = rows - 1 - top;
        let (head, tail) = pixels.split_at_mut(bottom * row_bytes);
        head[top * row_bytes..(top + 1) * row_bytes].swap_with_slice(&mut tail[..row_bytes]);
    }
}

/// Zeroes alpha on every RGBA texel whose colour equals `key`.
pub fn apply_color_key(rgba: &mut [u8], key: [u8; 3]) {
    for texel in rgba.chunks_exact_mut(4) {
        if texel[..3] == key {
            texel[3] = 0;
        }
    }
}

fn pad_to(
    packed: &[u8],
    (width, height): (usize, usize),
    (tex_width, tex_height): (usize, usize),
    bpp: usize,
    edging: bool,
) -> Vec<u8> {
    let row = width * bpp;
    let tex_row = tex_width * bpp;
    let mut out = vec![0u8; tex_row * tex_height];
    if row == 0 || height == 0 {
        return out;
    }

    for y in 0..height {
        let dst = y * tex_row;
        out[dst..dst + row].copy_from_slice(&packed[y * row..(y + 1) * row]);
        if edging && tex_width > width {
            let last = dst + row - bpp;
            out.copy_within(last..last + bpp, dst + row);
        }
    }
    if edging && tex_height > height {
        let last = (height - 1) * tex_row;
        out.copy_within(last..last + tex_row, height * tex_row);
    }
    out
}

// ============================================================================
// Chain queries
// ============================================================================

impl FallbackDecodeChain<RawImage> {
    pub fn width(&self) -> Result<u32> {
        Ok(self.info()?.width)
    }

    pub fn height(&self) -> Result<u32> {
        Ok(self.info()?.height)
    }

    pub fn depth(&self) -> Result<u32> {
        Ok(self.info()?.depth)
    }

    pub fn texture_width(&self) -> Result<u32> {
        Ok(self.info()?.texture_width)
    }

    pub fn texture_height(&self) -> Result<u32> {
        Ok(self.info()?.texture_height)
    }

    /// Answered from the winning decoder's output.
    pub fn has_alpha(&self) -> Result<bool> {
        Ok(self.info()?.has_alpha())
    }

    pub fn picked_decoder(&self) -> Result<&str> {
        self.picked_name()
    }
}

// ============================================================================
// Decoders backed by the `image` crate
// ============================================================================

/// Decodes one container format. Rejects anything else, which is what lets a chain of these
/// fall through to the right one.
pub struct ImageFormatDecoder {
    name: &'static str,
    format: ImageFormat,
    edging: AtomicBool,
}

impl ImageFormatDecoder {
    pub fn new(name: &'static str, format: ImageFormat) -> Self {
        Self {
            name,
            format,
            edging: AtomicBool::new(true),
        }
    }

    pub fn png() -> Self {
        Self::new("png", ImageFormat::Png)
    }

    pub fn jpeg() -> Self {
        Self::new("jpeg", ImageFormat::Jpeg)
    }

    pub fn gif() -> Self {
        Self::new("gif", ImageFormat::Gif)
    }

    pub fn bmp() -> Self {
        Self::new("bmp", ImageFormat::Bmp)
    }

    pub fn tga() -> Self {
        Self::new("tga", ImageFormat::Tga)
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn edging(&self) -> bool {
        self.edging.load(Ordering::Relaxed)
    }
}

impl DecodeCapability<RawImage> for ImageFormatDecoder {
    fn name(&self) -> &str {
        self.name
    }

    fn decode(&self, source: &mut DecodeSource, options: &DecodeOptions) -> anyhow::Result<RawImage> {
        let bytes = source.read_remaining()?;
        let image = image::load_from_memory_with_format(&bytes, self.format)?;
        Ok(RawImage::assemble(image, options, self.edging()))
    }

    fn configure_edging(&self, edging: bool) {
        self.edging.store(edging, Ordering::Relaxed);
    }
}

/// PNG first, then JPEG; TGA last since it has no signature to reject on.
pub fn default_image_decoders() -> DecoderList<RawImage> {
    vec![
        Arc::new(ImageFormatDecoder::png()),
        Arc::new(ImageFormatDecoder::jpeg()),
        Arc::new(ImageFormatDecoder::gif()),
        Arc::new(ImageFormatDecoder::bmp()),
        Arc::new(ImageFormatDecoder::tga()),
    ]
}
