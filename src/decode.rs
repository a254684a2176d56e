// src/decode.rs
//! Fallback decoding: try an ordered list of decoders against one rewindable source until one
//! of them accepts it.
//!
//! Individual rejections are reported to a [`DiagnosticsSink`] and folded into an
//! [`AggregateFailure`]; only that aggregate (or the winning result) leaves the chain. The
//! chain remembers which decoder won so derived properties are answered from that decoder's
//! output and not from some default.

use std::fmt;
use std::sync::Arc;

use crate::error::{AggregateFailure, DecodeFailure, Error, Result};
use crate::source::DecodeSource;

// ============================================================================
// Decoder contract
// ============================================================================

/// Per-request decode settings. Audio decoders ignore all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Flip the image vertically.
    pub flipped: bool,
    /// Always produce an alpha channel, even for RGB input.
    pub force_alpha: bool,
    /// RGB colour that becomes fully transparent.
    pub transparent: Option<[u8; 3]>,
}

impl DecodeOptions {
    pub fn flipped(mut self, flipped: bool) -> Self {
        self.flipped = flipped;
        self
    }

    pub fn force_alpha(mut self, force_alpha: bool) -> Self {
        self.force_alpha = force_alpha;
        self
    }

    pub fn transparent(mut self, rgb: Option<[u8; 3]>) -> Self {
        self.transparent = rgb;
        self
    }
}

/// Something a successful decode produces, able to describe itself cheaply.
pub trait Decoded {
    type Info: Copy + fmt::Debug;

    fn info(&self) -> Self::Info;
}

/// One way of turning bytes into `T`.
pub trait DecodeCapability<T>: Send + Sync {
    /// Identity used in diagnostics.
    fn name(&self) -> &str;

    /// Decodes from the current position of `source`. The chain rewinds before every call.
    fn decode(&self, source: &mut DecodeSource, options: &DecodeOptions) -> anyhow::Result<T>;

    /// Whether padding around the image should repeat the edge pixels.
    fn configure_edging(&self, _edging: bool) {}
}

pub type DecoderList<T> = Vec<Arc<dyn DecodeCapability<T>>>;

// ============================================================================
// Diagnostics
// ============================================================================

/// Receives structured failure events from decode chains.
pub trait DiagnosticsSink: Send + Sync {
    fn decoder_failed(&self, failure: &DecodeFailure);

    fn chain_failed(&self, failure: &AggregateFailure);
}

/// Default sink: forwards everything to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn decoder_failed(&self, failure: &DecodeFailure) {
        log::warn!(target: "slop_materialize::decode", "{}", failure);
    }

    fn chain_failed(&self, failure: &AggregateFailure) {
        log::error!(target: "slop_materialize::decode", "{}", failure);
    }
}

// ============================================================================
// FallbackDecodeChain
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Picked<I> {
    index: usize,
    info: I,
}

pub struct FallbackDecodeChain<T: Decoded> {
    decoders: DecoderList<T>,
    sink: Arc<dyn DiagnosticsSink>,
    picked: Option<Picked<T::Info>>,
}

impl<T: Decoded> FallbackDecodeChain<T> {
    pub fn new(decoders: DecoderList<T>) -> Self {
        Self {
            decoders,
            sink: Arc::new(LogSink),
            picked: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn push<D: DecodeCapability<T> + 'static>(&mut self, decoder: D) {
        self.decoders.push(Arc::new(decoder));
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    pub fn decoder_names(&self) -> Vec<&str> {
        self.decoders.iter().map(|d| d.name()).collect()
    }

    pub fn configure_edging(&self, edging: bool) {
        for decoder in &self.decoders {
            decoder.configure_edging(edging);
        }
    }

    /// Tries every decoder in order and returns the first success.
    ///
    /// Decoders after the winner are never invoked. When all of them fail the error is an
    /// [`AggregateFailure`] holding one cause per decoder, in order.
    pub fn attempt(&mut self, source: &mut DecodeSource, options: &DecodeOptions) -> Result<T> {
        self.picked = None;
        if self.decoders.is_empty() {
            return Err(Error::EmptyChain);
        }

        source.mark()?;
        let mut aggregate = AggregateFailure::new();

        for (index, decoder) in self.decoders.iter().enumerate() {
            source.reset()?;
            match decoder.decode(source, options) {
                Ok(value) => {
                    log::debug!(
                        target: "slop_materialize::decode",
                        "{} accepted the data after {} rejection(s)",
                        decoder.name(),
                        aggregate.len()
                    );
                    self.picked = Some(Picked {
                        index,
                        info: value.info(),
                    });
                    return Ok(value);
                }
                Err(cause) => {
                    let failure = DecodeFailure::new(decoder.name(), cause);
                    self.sink.decoder_failed(&failure);
                    aggregate.push(failure);
                }
            }
        }

        self.sink.chain_failed(&aggregate);
        Err(Error::Aggregate(aggregate))
    }

    /// The decoder that produced the last successful result.
    pub fn picked(&self) -> Result<&dyn DecodeCapability<T>> {
        let picked = self.picked.as_ref().ok_or(Error::NotReady("picked decoder"))?;
        Ok(self.decoders[picked.index].as_ref())
    }

    pub fn picked_name(&self) -> Result<&str> {
        Ok(self.picked()?.name())
    }

    /// Description of the last successful result.
    pub fn info(&self) -> Result<T::Info> {
        self.picked
            .as_ref()
            .map(|p| p.info)
            .ok_or(Error::NotReady("decoded info"))
    }

    pub fn is_ready(&self) -> bool {
        self.picked.is_some()
    }
}

impl<T: Decoded> fmt::Debug for FallbackDecodeChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackDecodeChain")
            .field("decoders", &self.decoder_names())
            .field("picked", &self.picked.as_ref().map(|p| p.index))
            .finish()
    }
}
