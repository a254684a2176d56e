#![cfg(not(target_arch = "wasm32"))]

use std::backtrace::Backtrace;
use std::panic;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use log::{error, info, LevelFilter};

use slop_materialize::audio::HeadlessAudioFactory;
use slop_materialize::texture::HeadlessTextureFactory;
use slop_materialize::{
    Audio, AudioLoader, AudioParams, CacheConfig, FileSystemLocation, ResourceCache, ResourceLocations, Texture,
    TextureLoader, TextureParams,
};

const USAGE: &str = "usage: slop-materialize [--deferred] [--root <dir>] <file>...";

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "tga"];
const AUDIO_EXTENSIONS: &[&str] = &["wav", "ogg", "flac", "mp3"];

struct Options {
    deferred: bool,
    root: Option<PathBuf>,
    files: Vec<String>,
}

fn main() -> ExitCode {
    setup_diagnostics();

    let options = match parse_args(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{}\n{}", msg, USAGE);
            return ExitCode::from(2);
        }
    };

    info!(
        "slop-materialize {} ({} mode)",
        slop_materialize::version(),
        if options.deferred { "deferred" } else { "immediate" }
    );

    if run(&options) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options, String> {
    let mut options = Options {
        deferred: false,
        root: None,
        files: Vec::new(),
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--deferred" => options.deferred = true,
            "--root" => {
                let dir = args.next().ok_or("--root needs a directory")?;
                options.root = Some(PathBuf::from(dir));
            }
            "-h" | "--help" => return Err(String::new()),
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            _ => options.files.push(arg),
        }
    }
    if options.files.is_empty() {
        return Err("no files given".to_string());
    }
    Ok(options)
}

fn extension(reference: &str) -> String {
    Path::new(reference)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

/// Requests every file, drains, and prints what happened. Returns false on any failure.
fn run(options: &Options) -> bool {
    let locations = ResourceLocations::new()
        .with_location(FileSystemLocation::new(options.root.clone().unwrap_or_else(|| PathBuf::from("."))));
    let cfg = CacheConfig::default().with_deferred(options.deferred);

    let textures = ResourceCache::new(TextureLoader::with_default_decoders(HeadlessTextureFactory::new()), cfg.clone());
    let sounds = ResourceCache::new(AudioLoader::with_default_decoders(HeadlessAudioFactory::new()), cfg);

    let mut ok = true;
    for file in &options.files {
        let ext = extension(file);
        let requested = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            textures
                .request_located(&locations, file, TextureParams::default())
                .map(|h| h.is_ready())
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            sounds
                .request_located(&locations, file, AudioParams::default())
                .map(|h| h.is_ready())
        } else {
            println!("{:<32} skipped (unknown extension)", file);
            continue;
        };

        match requested {
            Ok(true) => println!("{:<32} loaded", file),
            Ok(false) => println!("{:<32} deferred", file),
            Err(e) => {
                ok = false;
                println!("{:<32} FAILED\n{}", file, indent(&e.to_string()));
            }
        }
    }

    let texture_report = textures.drain();
    for (handle, outcome) in texture_report.outcomes() {
        match (outcome, handle.get()) {
            (Ok(()), Some(texture)) => {
                println!(
                    "{:<32} texture #{} {}x{} (padded {}x{})",
                    handle.key(),
                    texture.texture_id(),
                    texture.image_width(),
                    texture.image_height(),
                    texture.texture_width(),
                    texture.texture_height()
                );
            }
            (Err(e), _) => println!("{:<32} FAILED\n{}", handle.key(), indent(&e.to_string())),
            (Ok(()), None) => {}
        }
    }

    let sound_report = sounds.drain();
    for (handle, outcome) in sound_report.outcomes() {
        match outcome {
            Ok(()) => {
                if let Some(audio) = handle.get() {
                    println!("{:<32} buffer #{} {:?}", handle.key(), audio.buffer_id(), audio.duration());
                }
            }
            Err(e) => println!("{:<32} FAILED\n{}", handle.key(), indent(&e.to_string())),
        }
    }

    ok &= texture_report.is_clean() && sound_report.is_clean();
    println!("textures: {}", textures.stats());
    println!("sounds:   {}", sounds.stats());
    ok
}

fn indent(text: &str) -> String {
    text.lines().map(|l| format!("    {}", l)).collect::<Vec<_>>().join("\n")
}

/// Sets up logging and panic reporting
fn setup_diagnostics() {
    env_logger::Builder::new()
        .filter_level(if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Warn
        })
        .format_timestamp_millis()
        .format_target(false)
        .parse_default_env()
        .init();

    panic::set_hook(Box::new(|panic_info| {
        let backtrace = Backtrace::capture();

        let msg = match panic_info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match panic_info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<dyn Any>",
            },
        };

        let location = panic_info
            .location()
            .map_or("unknown location".to_string(), |loc| format!("{}:{}", loc.file(), loc.line()));

        error!("panic at {}: {}\n{}", location, msg, backtrace);
    }));
}
