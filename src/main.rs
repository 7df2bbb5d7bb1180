//! polyslot - multi-slot sampler and additive synth engine

use anyhow::{Context, Result};
use clap::Parser;
use polyslot::config::{self, EngineConfig};
use polyslot::engine::{default_device_name, list_output_devices, Engine, Player};
use polyslot::synth::SampleBuffer;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod cli;

use cli::{Cli, Commands};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            config: config_path,
            project,
            samples,
            output,
            duration,
        } => {
            let mut engine = build_engine(&config_path, project.as_deref(), samples)?;
            let block_size = engine.config().audio.block_size;
            let total_frames = (duration.max(0.0) * engine.sample_rate()) as usize;

            println!("Rendering {:.1} seconds to {:?}...", duration, output);
            engine.start_recording()?;

            let mut buffer = vec![0.0f32; block_size * 2];
            let mut rendered = 0;
            while rendered < total_frames {
                let frames = block_size.min(total_frames - rendered);
                engine.process_interleaved(&mut buffer[..frames * 2], 2);
                rendered += frames;
            }

            let size = {
                let bytes = engine.stop_recording()?;
                std::fs::write(&output, bytes)
                    .with_context(|| format!("failed to write {:?}", output))?;
                bytes.len()
            };
            println!(
                "Recorded {:.2}s ({} bytes) to {:?}",
                engine.recorder().duration_secs(),
                size,
                output
            );
        }

        Commands::Play {
            config: config_path,
            project,
            samples,
        } => {
            let engine = build_engine(&config_path, project.as_deref(), samples)?;
            let device = engine.config().audio.device.clone();
            let engine = Arc::new(Mutex::new(engine));

            let mut player = Player::new();
            player.start(Arc::clone(&engine), device.as_deref())?;

            let interrupted = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&interrupted);
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

            println!("Playing. Press Ctrl-C to stop.");
            while !interrupted.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(100));
            }

            if let Ok(mut engine) = engine.lock() {
                engine.stop_all();
            }
            // Let the release tails play out
            std::thread::sleep(Duration::from_millis(500));
            player.stop();
            println!("\nStopped.");
        }

        Commands::Devices => {
            println!("Available audio devices:\n");

            if let Some(name) = default_device_name() {
                println!("Default output: {}\n", name);
            }

            println!("Output devices:");
            for (name, config) in list_output_devices() {
                println!(
                    "  - {} ({} Hz, {} ch)",
                    name, config.sample_rate.0, config.channels
                );
            }
        }

        Commands::Check { config: config_path } => {
            println!("Checking configuration at {:?}...", config_path);

            match config::load_config(&config_path) {
                Ok(cfg) => {
                    println!("Configuration is valid!");
                    println!("  Sample rate: {} Hz", cfg.audio.sample_rate);
                    println!("  Block size: {}", cfg.audio.block_size);
                    println!("  Control rate: {} Hz", cfg.audio.control_rate);
                    println!("  Master volume: {:.0}%", cfg.master.volume * 100.0);
                    println!("  Recorder block: {}", cfg.recorder.block_size);
                    println!("  Slots: {}", cfg.slots);
                    if let Some(dir) = &cfg.sample_dir {
                        println!("  Samples: {:?}", dir);
                    }
                }
                Err(e) => {
                    println!("Configuration is invalid: {:#}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Init => {
            let example_config = include_str!("../polyslot.example.yaml");

            let path = "polyslot.yaml";
            if Path::new(path).exists() {
                println!("polyslot.yaml already exists. Not overwriting.");
            } else {
                std::fs::write(path, example_config)?;
                println!("Created polyslot.yaml with example configuration.");
            }
        }
    }

    Ok(())
}

/// Load config, samples and project, then trigger every loaded slot
fn build_engine(
    config_path: &Path,
    project_path: Option<&Path>,
    sample_dir: Option<PathBuf>,
) -> Result<Engine> {
    let mut cfg = if config_path.exists() {
        config::load_config(config_path)?
    } else {
        log::warn!("{:?} not found, using default configuration", config_path);
        EngineConfig::default()
    };
    if sample_dir.is_some() {
        cfg.sample_dir = sample_dir;
    }
    let dir = cfg.sample_dir.clone().unwrap_or_else(|| PathBuf::from("."));

    let mut engine = Engine::new(cfg);

    match project_path {
        Some(path) => {
            let project = config::load_project(path)?;
            for key in project.slots.iter().filter_map(|s| s.sample_key.as_deref()) {
                if key.is_empty() || engine.library().get(key).is_some() {
                    continue;
                }
                match SampleBuffer::from_wav_path(&dir.join(key)) {
                    Ok(buffer) => {
                        engine.library_mut().insert(key, buffer);
                    }
                    Err(e) => log::warn!("could not load sample {:?}: {}", key, e),
                }
            }
            engine.import_project(&project)?;
        }
        None => load_directory(&mut engine, &dir)?,
    }

    engine.init();
    let slots: Vec<usize> = engine.voices().iter().map(|v| v.slot_id()).collect();
    for slot in slots {
        engine.trigger(slot)?;
    }
    Ok(engine)
}

/// Put every WAV file in `dir` into its own slot, in name order
fn load_directory(engine: &mut Engine, dir: &Path) -> Result<()> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read sample directory {:?}", dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("wav")))
        .collect();
    files.sort();

    let mut slots = engine.voices().iter().map(|v| v.slot_id()).collect::<Vec<_>>().into_iter();
    for path in files {
        let Some(slot) = slots.next().or_else(|| engine.add_slot()) else {
            log::warn!("no free slot for {:?}", path);
            break;
        };
        let key = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let buffer = SampleBuffer::from_wav_path(&path)
            .with_context(|| format!("failed to decode {:?}", path))?;
        engine.library_mut().insert(key.as_str(), buffer);
        engine.load_sample(slot, &key)?;
        log::info!("slot {}: {}", slot, key);
    }
    Ok(())
}
