// src/audio.rs

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::decode::{DecodeOptions, DecoderList, DiagnosticsSink, FallbackDecodeChain, LogSink};
use crate::deferred::DeferredHandle;
use crate::error::Result;
use crate::resource_manager::{Loader, ResourceCache};
use crate::sound::{default_audio_decoders, RawAudio};
use crate::source::DecodeSource;

// --- Public API ---

/// Request parameters for an audio resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioParams {
    /// Music is streamed by real backends rather than uploaded whole.
    pub streaming: bool,
}

impl AudioParams {
    pub fn music() -> Self {
        Self { streaming: true }
    }

    pub fn effect() -> Self {
        Self { streaming: false }
    }
}

/// An audio buffer living in some audio context.
pub trait Audio {
    fn buffer_id(&self) -> u32;

    /// Plays on a free source. Returns the source index, or `None` if nothing could play.
    fn play_as_sound_effect(&self, pitch: f32, gain: f32, looping: bool) -> Option<u32>;

    fn play_as_music(&self, pitch: f32, gain: f32, looping: bool) -> Option<u32>;

    fn stop(&self);

    fn is_playing(&self) -> bool;

    /// Playback position in seconds.
    fn position(&self) -> f32;

    /// Seeks; returns false when the backend cannot.
    fn set_position(&self, seconds: f32) -> bool;

    fn duration(&self) -> Duration;

    fn release(&self);
}

/// Creates backend buffers from decoded PCM.
pub trait AudioFactory {
    type Audio: Audio;

    fn create(&self, key: &str, raw: &RawAudio, params: &AudioParams) -> Result<Self::Audio>;
}

// --- Loader ---

pub struct AudioLoader<F> {
    factory: F,
    decoders: DecoderList<RawAudio>,
    sink: Arc<dyn DiagnosticsSink>,
}

impl<F: AudioFactory> AudioLoader<F> {
    pub fn new(factory: F, decoders: DecoderList<RawAudio>) -> Self {
        Self {
            factory,
            decoders,
            sink: Arc::new(LogSink),
        }
    }

    pub fn with_default_decoders(factory: F) -> Self {
        Self::new(factory, default_audio_decoders())
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }
}

impl<F: AudioFactory> Loader for AudioLoader<F> {
    type Resource = F::Audio;
    type Params = AudioParams;

    fn load(&self, key: &str, source: &mut DecodeSource, params: &AudioParams) -> Result<F::Audio> {
        let mut chain = FallbackDecodeChain::new(self.decoders.clone()).with_sink(self.sink.clone());
        let raw = chain.attempt(source, &DecodeOptions::default())?;
        log::debug!(
            "`{}` decoded by {}: {} ch @ {} Hz, {:?}",
            key,
            chain.picked_name()?,
            raw.channels,
            raw.sample_rate,
            raw.duration()
        );
        self.factory.create(key, &raw, params)
    }

    fn release(&self, _key: &str, audio: &F::Audio) {
        audio.release();
    }
}

pub type AudioCache<F> = ResourceCache<AudioLoader<F>>;

// --- Deferred forwarding ---

impl<L> DeferredHandle<L>
where
    L: Loader,
    L::Resource: Audio,
{
    pub fn buffer_id(&self) -> Result<u32> {
        self.with(|a| a.buffer_id())
    }

    pub fn play_as_sound_effect(&self, pitch: f32, gain: f32, looping: bool) -> Result<Option<u32>> {
        self.with(|a| a.play_as_sound_effect(pitch, gain, looping))
    }

    pub fn play_as_music(&self, pitch: f32, gain: f32, looping: bool) -> Result<Option<u32>> {
        self.with(|a| a.play_as_music(pitch, gain, looping))
    }

    pub fn stop(&self) -> Result<()> {
        self.with(|a| a.stop())
    }

    /// A handle that was never loaded is not playing; asking does not load it.
    pub fn is_playing(&self) -> bool {
        self.get().map_or(false, |a| a.is_playing())
    }

    pub fn position(&self) -> Result<f32> {
        self.with(|a| a.position())
    }

    pub fn set_position(&self, seconds: f32) -> Result<bool> {
        self.with(|a| a.set_position(seconds))
    }

    pub fn duration(&self) -> Result<Duration> {
        self.with(|a| a.duration())
    }
}

// --- Null backend ---

/// Audio that never makes a sound. Used when sound is switched off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullAudio;

impl Audio for NullAudio {
    fn buffer_id(&self) -> u32 {
        0
    }

    fn play_as_sound_effect(&self, _pitch: f32, _gain: f32, _looping: bool) -> Option<u32> {
        None
    }

    fn play_as_music(&self, _pitch: f32, _gain: f32, _looping: bool) -> Option<u32> {
        None
    }

    fn stop(&self) {}

    fn is_playing(&self) -> bool {
        false
    }

    fn position(&self) -> f32 {
        0.0
    }

    fn set_position(&self, _seconds: f32) -> bool {
        false
    }

    fn duration(&self) -> Duration {
        Duration::ZERO
    }

    fn release(&self) {}
}

/// Produces [`NullAudio`] for every request, still running the decoders so bad data is
/// reported the same way.
#[derive(Debug, Default)]
pub struct NullAudioFactory;

impl AudioFactory for NullAudioFactory {
    type Audio = NullAudio;

    fn create(&self, _key: &str, _raw: &RawAudio, _params: &AudioParams) -> Result<NullAudio> {
        Ok(NullAudio)
    }
}

// --- Headless backend ---

/// Tracks playback state without an output device.
#[derive(Debug)]
pub struct HeadlessAudio {
    buffer_id: u32,
    duration: Duration,
    streaming: bool,
    sources: Arc<AtomicU32>,
    playing: AtomicBool,
    looping: AtomicBool,
    position: Mutex<f32>,
    released: AtomicBool,
}

impl HeadlessAudio {
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Relaxed)
    }

    fn start(&self, looping: bool) -> Option<u32> {
        if self.is_released() {
            log::warn!("play of released buffer {}", self.buffer_id);
            return None;
        }
        self.playing.store(true, Ordering::Relaxed);
        self.looping.store(looping, Ordering::Relaxed);
        *self.position.lock() = 0.0;
        Some(self.sources.fetch_add(1, Ordering::Relaxed))
    }
}

impl Audio for HeadlessAudio {
    fn buffer_id(&self) -> u32 {
        self.buffer_id
    }

    fn play_as_sound_effect(&self, _pitch: f32, _gain: f32, looping: bool) -> Option<u32> {
        self.start(looping)
    }

    fn play_as_music(&self, _pitch: f32, _gain: f32, looping: bool) -> Option<u32> {
        self.start(looping)
    }

    fn stop(&self) {
        self.playing.store(false, Ordering::Relaxed);
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    fn position(&self) -> f32 {
        *self.position.lock()
    }

    fn set_position(&self, seconds: f32) -> bool {
        if seconds < 0.0 || seconds > self.duration.as_secs_f32() {
            return false;
        }
        *self.position.lock() = seconds;
        true
    }

    fn duration(&self) -> Duration {
        self.duration
    }

    fn release(&self) {
        self.stop();
        self.released.store(true, Ordering::Relaxed);
    }
}

/// Buffer ids from 1 upwards; source indices shared across every buffer it created.
pub struct HeadlessAudioFactory {
    next_id: AtomicU32,
    sources: Arc<AtomicU32>,
}

impl Default for HeadlessAudioFactory {
    fn default() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            sources: Arc::new(AtomicU32::new(0)),
        }
    }
}

impl HeadlessAudioFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> u32 {
        self.next_id.load(Ordering::Relaxed) - 1
    }
}

impl AudioFactory for HeadlessAudioFactory {
    type Audio = HeadlessAudio;

    fn create(&self, _key: &str, raw: &RawAudio, params: &AudioParams) -> Result<HeadlessAudio> {
        Ok(HeadlessAudio {
            buffer_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            duration: raw.duration(),
            streaming: params.streaming,
            sources: self.sources.clone(),
            playing: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            position: Mutex::new(0.0),
            released: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_manager::CacheConfig;
    use crate::source::SourceLocator;
    use std::io::Cursor;

    fn tone(frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut out, spec).unwrap();
            for i in 0..frames {
                writer.write_sample(((i % 16) as i16 - 8) * 1000).unwrap();
            }
            writer.finalize().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn null_audio_is_silent() {
        let audio = NullAudio;
        assert_eq!(audio.play_as_sound_effect(1.0, 1.0, false), None);
        assert!(!audio.is_playing());
        assert!(!audio.set_position(1.0));
        audio.release();
    }

    #[test]
    fn deferred_play_materializes() {
        let loader = AudioLoader::with_default_decoders(HeadlessAudioFactory::new());
        let cache = ResourceCache::new(loader, CacheConfig::default().with_deferred(true));
        let handle = cache
            .request("jump", SourceLocator::from(tone(8_000)), AudioParams::effect())
            .unwrap();
        let jump = handle.as_deferred().unwrap();

        assert!(!jump.is_playing());
        assert_eq!(cache.loader().factory().created(), 0);

        assert_eq!(jump.play_as_sound_effect(1.0, 0.5, false).unwrap(), Some(0));
        assert!(jump.is_playing());
        assert_eq!(jump.duration().unwrap(), Duration::from_secs(1));
        assert!(jump.set_position(0.5).unwrap());
        assert!(!jump.set_position(2.0).unwrap());
        assert_eq!(cache.pending_count(), 0);
    }

    #[test]
    fn null_factory_still_decodes() {
        let cache: AudioCache<NullAudioFactory> =
            ResourceCache::with_loader(AudioLoader::with_default_decoders(NullAudioFactory));
        assert!(cache
            .request("music", SourceLocator::from(tone(100)), AudioParams::music())
            .is_ok());

        let err = cache
            .request("noise", SourceLocator::from(vec![1u8; 32]), AudioParams::music())
            .unwrap_err();
        assert!(err.is_aggregate());
    }

    #[test]
    fn release_stops_playback() {
        let loader = AudioLoader::with_default_decoders(HeadlessAudioFactory::new());
        let cache = ResourceCache::with_loader(loader);
        let music = cache
            .request("theme", SourceLocator::from(tone(800)), AudioParams::music())
            .unwrap()
            .resolve()
            .unwrap();
        assert!(music.is_streaming());

        music.play_as_music(1.0, 1.0, true).unwrap();
        assert!(music.is_looping());
        cache.unload("theme");
        assert!(!music.is_playing());
        assert_eq!(music.play_as_sound_effect(1.0, 1.0, false), None);
    }
}
