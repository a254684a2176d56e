// src/lib.rs

// ----------------------------------------------------------------------------
// Resource materialization: decode through fallback chains, hand out real or
// deferred handles, and drain the deferred ones when the context allows it.
// ----------------------------------------------------------------------------

pub mod audio;
pub mod context;
pub mod decode;
pub mod deferred;
pub mod error;
pub mod location;
pub mod pending;
pub mod resource_manager;
pub mod sound;
pub mod source;
pub mod texture;
pub mod texture_importer;

pub use audio::{Audio, AudioCache, AudioFactory, AudioLoader, AudioParams, HeadlessAudioFactory, NullAudio};
pub use context::{ContextScope, MaterializationContext, Mode};
pub use decode::{DecodeCapability, DecodeOptions, Decoded, DecoderList, DiagnosticsSink, FallbackDecodeChain, LogSink};
pub use deferred::DeferredHandle;
pub use error::{AggregateFailure, DecodeFailure, Error, Result};
pub use location::{FileSystemLocation, ResourceLocation, ResourceLocations};
pub use pending::{HandleId, PendingRegistry, Registrant};
pub use resource_manager::{CacheConfig, CacheStats, DrainReport, Handle, Loader, ResourceCache};
pub use sound::{RawAudio, SymphoniaDecoder, WavDecoder};
pub use source::{DecodeSource, SourceLocator};
pub use texture::{Filter, HeadlessTextureFactory, Texture, TextureCache, TextureFactory, TextureLoader, TextureParams};
pub use texture_importer::{ImageFormatDecoder, RawImage};

/// Crate version, as built.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
