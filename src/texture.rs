// src/texture.rs
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::decode::{DecodeOptions, DecoderList, DiagnosticsSink, FallbackDecodeChain, LogSink};
use crate::deferred::DeferredHandle;
use crate::error::{Error, Result};
use crate::resource_manager::{Loader, ResourceCache};
use crate::source::DecodeSource;
use crate::texture_importer::{default_image_decoders, RawImage};

// ─────────────────────────────────────────────────────────────────────────────
// Texture parameters
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Filter {
    #[default]
    Linear,
    Nearest,
}

/// Everything a texture request carries besides its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextureParams {
    pub flipped: bool,
    pub filter: Filter,
    pub transparent: Option<[u8; 3]>,
    pub force_alpha: bool,
}

impl TextureParams {
    pub fn pixel_art() -> Self {
        Self {
            filter: Filter::Nearest,
            ..Default::default()
        }
    }

    pub fn flipped(mut self, flipped: bool) -> Self {
        self.flipped = flipped;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn transparent(mut self, rgb: Option<[u8; 3]>) -> Self {
        self.transparent = rgb;
        self
    }

    pub fn force_alpha(mut self, force_alpha: bool) -> Self {
        self.force_alpha = force_alpha;
        self
    }

    pub fn decode_options(&self) -> DecodeOptions {
        DecodeOptions {
            flipped: self.flipped,
            force_alpha: self.force_alpha,
            transparent: self.transparent,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability surface
// ─────────────────────────────────────────────────────────────────────────────

/// A texture living in some graphics context.
pub trait Texture {
    fn bind(&self);
    fn texture_id(&self) -> u32;
    fn image_width(&self) -> u32;
    fn image_height(&self) -> u32;
    fn texture_width(&self) -> u32;
    fn texture_height(&self) -> u32;
    fn has_alpha(&self) -> bool;

    /// Frees the context object. Textures owned by a cache are released with
    /// `ResourceCache::unload` or `DeferredHandle::release`, which also drop the key.
    fn release(&self);

    /// Fraction of the texture width covered by the image.
    fn width_ratio(&self) -> f32 {
        self.image_width() as f32 / self.texture_width().max(1) as f32
    }

    fn height_ratio(&self) -> f32 {
        self.image_height() as f32 / self.texture_height().max(1) as f32
    }
}

/// Uploads decoded pixels. Only ever called on the thread that owns the context.
pub trait TextureFactory {
    type Texture: Texture;

    fn create(&self, key: &str, image: &RawImage, filter: Filter) -> Result<Self::Texture>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Decodes through a fallback chain, then hands the pixels to the factory.
pub struct TextureLoader<F> {
    factory: F,
    decoders: DecoderList<RawImage>,
    sink: Arc<dyn DiagnosticsSink>,
    edging: bool,
}

impl<F: TextureFactory> TextureLoader<F> {
    pub fn new(factory: F, decoders: DecoderList<RawImage>) -> Self {
        Self {
            factory,
            decoders,
            sink: Arc::new(LogSink),
            edging: true,
        }
    }

    /// PNG, JPEG, GIF, BMP and TGA, in that order.
    pub fn with_default_decoders(factory: F) -> Self {
        Self::new(factory, default_image_decoders())
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_edging(mut self, edging: bool) -> Self {
        self.edging = edging;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Runs the chain only; no texture is created.
    pub fn decode(&self, key: &str, source: &mut DecodeSource, params: &TextureParams) -> Result<RawImage> {
        let mut chain = FallbackDecodeChain::new(self.decoders.clone()).with_sink(self.sink.clone());
        chain.configure_edging(self.edging);
        let image = chain.attempt(source, &params.decode_options())?;
        log::debug!(
            "`{}` decoded by {}: {}x{} @ {}bpp",
            key,
            chain.picked_decoder()?,
            image.width,
            image.height,
            image.depth
        );
        Ok(image)
    }
}

impl<F: TextureFactory> Loader for TextureLoader<F> {
    type Resource = F::Texture;
    type Params = TextureParams;

    fn load(&self, key: &str, source: &mut DecodeSource, params: &TextureParams) -> Result<F::Texture> {
        let image = self.decode(key, source, params)?;
        self.factory.create(key, &image, params.filter)
    }

    fn release(&self, _key: &str, texture: &F::Texture) {
        texture.release();
    }
}

pub type TextureCache<F> = ResourceCache<TextureLoader<F>>;

// ─────────────────────────────────────────────────────────────────────────────
// Deferred forwarding
// ─────────────────────────────────────────────────────────────────────────────

impl<L> DeferredHandle<L>
where
    L: Loader,
    L::Resource: Texture,
{
    pub fn bind(&self) -> Result<()> {
        self.with(|t| t.bind())
    }

    pub fn texture_id(&self) -> Result<u32> {
        self.with(|t| t.texture_id())
    }

    pub fn image_width(&self) -> Result<u32> {
        self.with(|t| t.image_width())
    }

    pub fn image_height(&self) -> Result<u32> {
        self.with(|t| t.image_height())
    }

    pub fn texture_width(&self) -> Result<u32> {
        self.with(|t| t.texture_width())
    }

    pub fn texture_height(&self) -> Result<u32> {
        self.with(|t| t.texture_height())
    }

    pub fn width_ratio(&self) -> Result<f32> {
        self.with(|t| t.width_ratio())
    }

    pub fn height_ratio(&self) -> Result<f32> {
        self.with(|t| t.height_ratio())
    }

    pub fn has_alpha(&self) -> Result<bool> {
        self.with(|t| t.has_alpha())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Headless backend
// ─────────────────────────────────────────────────────────────────────────────

/// CPU-only stand-in for a GPU texture. Keeps its pixels so tests can inspect them.
pub struct HeadlessTexture {
    id: u32,
    image: RawImage,
    filter: Filter,
    binds: AtomicU64,
    released: AtomicBool,
    last_bound: Arc<AtomicU32>,
}

impl HeadlessTexture {
    pub fn filter(&self) -> Filter {
        self.filter
    }

    pub fn pixels(&self) -> &[u8] {
        &self.image.pixels
    }

    pub fn bind_count(&self) -> u64 {
        self.binds.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }
}

impl Texture for HeadlessTexture {
    fn bind(&self) {
        if self.is_released() {
            log::warn!("bind of released texture {}", self.id);
            return;
        }
        // Rebinding the current texture is free.
        if self.last_bound.swap(self.id, Ordering::Relaxed) != self.id {
            self.binds.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn texture_id(&self) -> u32 {
        self.id
    }

    fn image_width(&self) -> u32 {
        self.image.width
    }

    fn image_height(&self) -> u32 {
        self.image.height
    }

    fn texture_width(&self) -> u32 {
        self.image.texture_width
    }

    fn texture_height(&self) -> u32 {
        self.image.texture_height
    }

    fn has_alpha(&self) -> bool {
        self.image.has_alpha()
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::Relaxed) {
            let _ = self
                .last_bound
                .compare_exchange(self.id, 0, Ordering::Relaxed, Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for HeadlessTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessTexture")
            .field("id", &self.id)
            .field("image", &self.image)
            .field("filter", &self.filter)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Hands out ids from 1 upwards; 0 means "nothing bound".
pub struct HeadlessTextureFactory {
    next_id: AtomicU32,
    last_bound: Arc<AtomicU32>,
    max_dimension: Option<u32>,
}

impl Default for HeadlessTextureFactory {
    fn default() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            last_bound: Arc::new(AtomicU32::new(0)),
            max_dimension: None,
        }
    }
}

impl HeadlessTextureFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects textures larger than `max` on either axis, like a real device limit.
    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.max_dimension = Some(max);
        self
    }

    pub fn created(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed) - 1
    }

    pub fn last_bound(&self) -> Option<u32> {
        match self.last_bound.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }
}

impl TextureFactory for HeadlessTextureFactory {
    type Texture = HeadlessTexture;

    fn create(&self, key: &str, image: &RawImage, filter: Filter) -> Result<HeadlessTexture> {
        if let Some(max) = self.max_dimension {
            if image.texture_width > max || image.texture_height > max {
                return Err(Error::custom(format!(
                    "`{}` is {}x{}, device limit is {}",
                    key, image.texture_width, image.texture_height, max
                )));
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(HeadlessTexture {
            id,
            image: image.clone(),
            filter,
            binds: AtomicU64::new(0),
            released: AtomicBool::new(false),
            last_bound: self.last_bound.clone(),
        })
    }
}
