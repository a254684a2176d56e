// tests/materialize.rs
//
// End-to-end: real encoded bytes, real decoders, headless backends.

use std::fs;
use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use parking_lot::Mutex;

use slop_materialize::audio::HeadlessAudioFactory;
use slop_materialize::texture::{HeadlessTexture, HeadlessTextureFactory};
use slop_materialize::texture_importer::default_image_decoders;
use slop_materialize::{
    AggregateFailure, AudioLoader, AudioParams, CacheConfig, DecodeFailure, DecodeOptions, DecodeSource,
    DecoderList, DiagnosticsSink, FallbackDecodeChain, FileSystemLocation, Handle, ImageFormatDecoder, Mode,
    RawImage, ResourceCache, ResourceLocations, SourceLocator, Texture, TextureCache, TextureLoader, TextureParams,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([200, 100, 50, 255]))),
        ImageFormat::Png,
    )
}

fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([10, 120, 240]))),
        ImageFormat::Jpeg,
    )
}

fn wav_bytes(frames: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 11_025,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut out, spec).unwrap();
        for i in 0..frames {
            writer.write_sample((i as i16).wrapping_mul(37)).unwrap();
        }
        writer.finalize().unwrap();
    }
    out.into_inner()
}

fn textures(deferred: bool) -> TextureCache<HeadlessTextureFactory> {
    ResourceCache::new(
        TextureLoader::with_default_decoders(HeadlessTextureFactory::new()),
        CacheConfig::default().with_deferred(deferred),
    )
}

#[derive(Default)]
struct RecordingSink {
    failed: Mutex<Vec<String>>,
    aggregates: Mutex<Vec<usize>>,
}

impl DiagnosticsSink for RecordingSink {
    fn decoder_failed(&self, failure: &DecodeFailure) {
        self.failed.lock().push(failure.decoder.clone());
    }

    fn chain_failed(&self, aggregate: &AggregateFailure) {
        self.aggregates.lock().push(aggregate.len());
    }
}

// ---------- Decode chain ----------

#[test]
fn png_then_jpeg_decodes_jpeg_without_surfacing_png_failure() {
    init_logging();
    let sink = Arc::new(RecordingSink::default());
    let decoders: DecoderList<RawImage> =
        vec![Arc::new(ImageFormatDecoder::png()), Arc::new(ImageFormatDecoder::jpeg())];
    let mut chain = FallbackDecodeChain::new(decoders).with_sink(sink.clone());

    let mut source = DecodeSource::from_bytes(jpeg_bytes(12, 7).into());
    let image = chain.attempt(&mut source, &DecodeOptions::default()).unwrap();

    assert_eq!((image.width, image.height), (12, 7));
    assert_eq!(chain.picked_decoder().unwrap(), "jpeg");
    assert_eq!(*sink.failed.lock(), vec!["png"]);
    assert!(sink.aggregates.lock().is_empty());
}

#[test]
fn garbage_through_png_only_yields_one_cause() {
    let decoders: DecoderList<RawImage> = vec![Arc::new(ImageFormatDecoder::png())];
    let mut chain = FallbackDecodeChain::new(decoders);
    let mut source = DecodeSource::from_bytes(b"\x00\x01garbage garbage".to_vec().into());

    let err = chain.attempt(&mut source, &DecodeOptions::default()).unwrap_err();
    let aggregate = err.as_aggregate().unwrap();
    assert_eq!(aggregate.len(), 1);
    assert_eq!(aggregate.failures()[0].decoder, "png");
    assert!(chain.picked_decoder().unwrap_err().is_not_ready());
}

#[test]
fn aggregate_message_names_every_decoder() {
    let mut chain = FallbackDecodeChain::new(default_image_decoders());
    let mut source = DecodeSource::from_bytes(b"nope".to_vec().into());
    let message = chain
        .attempt(&mut source, &DecodeOptions::default())
        .unwrap_err()
        .to_string();

    for name in ["png", "jpeg", "gif", "bmp", "tga"] {
        assert!(message.contains(name), "{} missing from {}", name, message);
    }
}

// ---------- Deferred materialization ----------

#[test]
fn drain_creates_texture_once_then_is_a_no_op() {
    init_logging();
    let cache = textures(true);
    let handle = cache
        .request("wall", SourceLocator::from(png_bytes(5, 5)), TextureParams::default())
        .unwrap();
    assert!(!handle.is_ready());
    assert_eq!(cache.pending_count(), 1);

    let report = cache.drain();
    assert_eq!(report.materialized(), 1);
    assert_eq!(cache.loader().factory().created(), 1);
    assert_eq!(cache.pending_count(), 0);
    assert!(handle.is_ready());

    assert!(cache.drain().is_empty());
    assert_eq!(cache.loader().factory().created(), 1);
}

#[test]
fn bind_before_drain_materializes_synchronously() {
    let cache = textures(true);
    let handle = cache
        .request("wall", SourceLocator::from(png_bytes(5, 5)), TextureParams::default())
        .unwrap();

    handle.as_deferred().unwrap().bind().unwrap();
    assert_eq!(cache.loader().factory().created(), 1);
    assert_eq!(cache.pending_count(), 0);
    assert!(cache.drain().is_empty());
}

#[test]
fn repeated_deferred_requests_return_one_handle() {
    let cache = textures(true);
    let bytes = png_bytes(3, 3);
    let first = cache
        .get_or_create("wall", SourceLocator::from(bytes.clone()), TextureParams::default(), Mode::Deferred)
        .unwrap();
    let second = cache
        .get_or_create("wall", SourceLocator::from(bytes), TextureParams::default(), Mode::Deferred)
        .unwrap();

    assert!(first.as_deferred().unwrap().same_handle(second.as_deferred().unwrap()));
    assert_eq!(cache.pending_count(), 1);
}

#[test]
fn materialized_handle_is_stable() {
    let cache = textures(true);
    let handle = cache
        .request("wall", SourceLocator::from(png_bytes(3, 3)), TextureParams::default())
        .unwrap();
    let deferred = handle.as_deferred().unwrap();

    let a = deferred.ensure_materialized().unwrap();
    let b = deferred.ensure_materialized().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(cache.loader().factory().created(), 1);
}

#[test]
fn deferred_and_immediate_agree_on_properties() {
    let bytes = jpeg_bytes(33, 17);
    let params = TextureParams::default().flipped(true);

    let lazy = textures(true);
    let deferred = lazy
        .request("crate", SourceLocator::from(bytes.clone()), params.clone())
        .unwrap();
    let deferred = deferred.as_deferred().unwrap();

    let eager = textures(false);
    let direct: Arc<HeadlessTexture> = eager
        .request("crate", SourceLocator::from(bytes), params)
        .unwrap()
        .resolve()
        .unwrap();

    assert_eq!(deferred.image_width().unwrap(), direct.image_width());
    assert_eq!(deferred.image_height().unwrap(), direct.image_height());
    assert_eq!(deferred.texture_id().unwrap(), direct.texture_id());
    assert_eq!(deferred.has_alpha().unwrap(), direct.has_alpha());
    assert_eq!(deferred.get().unwrap().pixels(), direct.pixels());
}

#[test]
fn drain_reports_every_failure_and_finishes_the_rest() {
    let cache = textures(true);
    let params = TextureParams::default();
    cache.request("a", SourceLocator::from(png_bytes(2, 2)), params.clone()).unwrap();
    cache.request("broken", SourceLocator::from(&b"corrupt"[..]), params.clone()).unwrap();
    cache.request("c", SourceLocator::from(jpeg_bytes(2, 2)), params).unwrap();

    let report = cache.drain();
    assert_eq!(report.len(), 3);
    assert_eq!(report.materialized(), 2);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    let (handle, err) = failures[0];
    assert_eq!(handle.key(), "broken");
    assert!(err.is_loader());
    assert_eq!(err.as_aggregate().unwrap().len(), 5);

    assert_eq!(cache.pending_keys(), vec!["broken"]);
    assert!(cache.context().is_deferred());
}

#[test]
fn failed_immediate_request_can_be_retried() {
    let cache = textures(false);
    let params = TextureParams::default();
    let err = cache
        .request("late", SourceLocator::from(&b"not yet"[..]), params.clone())
        .unwrap_err();
    assert!(err.is_aggregate());
    assert!(cache.get("late").is_none());

    let handle = cache
        .request("late", SourceLocator::from(png_bytes(4, 2)), params)
        .unwrap();
    assert!(matches!(handle, Handle::Ready(_)));
}

// ---------- Locations and files ----------

#[test]
fn files_resolve_through_locations_and_load_lazily() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("sprites")).unwrap();
    fs::write(dir.path().join("sprites/hero.png"), png_bytes(6, 9)).unwrap();

    let locations = ResourceLocations::new().with_location(FileSystemLocation::new(dir.path()));
    let cache = textures(true);

    let handle = cache
        .request_located(&locations, "sprites/hero.png", TextureParams::default())
        .unwrap();
    assert!(!handle.is_ready());

    let texture = handle.resolve().unwrap();
    assert_eq!((texture.image_width(), texture.image_height()), (6, 9));
    assert_eq!((texture.texture_width(), texture.texture_height()), (8, 16));

    let missing = cache.request_located(&locations, "sprites/villain.png", TextureParams::default());
    assert!(missing.is_err());
}

#[test]
fn deleted_file_fails_at_materialization_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.png");
    fs::write(&path, png_bytes(2, 2)).unwrap();

    let cache = textures(true);
    let handle = cache
        .request("late", SourceLocator::from_path(&path), TextureParams::default())
        .unwrap();
    fs::remove_file(&path).unwrap();

    let err = handle.resolve().unwrap_err();
    assert!(err.is_loader());
    assert_eq!(cache.pending_count(), 1);

    fs::write(&path, png_bytes(2, 2)).unwrap();
    assert!(handle.resolve().is_ok());
    assert_eq!(cache.pending_count(), 0);
}

// ---------- Audio ----------

#[test]
fn deferred_sound_plays_after_tick() {
    let cfg = CacheConfig::default().with_deferred(true).with_max_per_tick(Some(1));
    let cache = ResourceCache::new(AudioLoader::with_default_decoders(HeadlessAudioFactory::new()), cfg);

    cache.request("step", SourceLocator::from(wav_bytes(1_000)), AudioParams::effect()).unwrap();
    cache.request("theme", SourceLocator::from(wav_bytes(22_050)), AudioParams::music()).unwrap();
    assert_eq!(cache.progress(), 0.0);

    let first = cache.tick();
    assert_eq!(first.len(), 1);
    assert_eq!(first.outcomes()[0].0.key(), "step");
    assert!((cache.progress() - 0.5).abs() < 1e-6);

    cache.tick();
    assert_eq!(cache.pending_count(), 0);

    let theme = cache.get("theme").unwrap();
    let theme = theme.as_deferred().unwrap();
    assert_eq!(theme.duration().unwrap().as_secs(), 2);
    assert!(theme.play_as_music(1.0, 1.0, true).unwrap().is_some());
    assert!(theme.is_playing());
}
