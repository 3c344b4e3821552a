//! Roomeq - room response measurement and parametric EQ audition
//!
//! Command line entry point.

use anyhow::{bail, Context, Result};
use roomeq::audio::device;
use roomeq::audio::output::{AudioOutput, CpalOutput};
use roomeq::config::AppConfig;
use roomeq::storage::aggregate::aggregate;
use roomeq::{
    AggregateMode, CalibrationCurve, CancelToken, CaptureBackend, CaptureController,
    CaptureOrchestrator, CaptureStorage, CpalCaptureBackend, Error, FilterParam, LoopbackBackend,
    PlaybackState, PlayerController, PlayerHandle, SignalType,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("roomeq=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_help();
        return Ok(());
    };
    let rest = &args[1..];

    match command.as_str() {
        "--list" | "-l" | "devices" => list_devices(),
        "--version" | "-v" => {
            println!("roomeq {} ({})", roomeq::VERSION, roomeq::BUILD_DATE);
            Ok(())
        }
        "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "measure" => measure(rest),
        "play" => play(rest),
        "records" => records(rest),
        "config" => show_config(),
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            Ok(())
        }
    }
}

fn print_help() {
    println!("Usage: roomeq <COMMAND> [OPTIONS]");
    println!();
    println!("Commands:");
    println!("  -l, --list                  List audio devices");
    println!("  measure [OPTIONS]           Measure the response of the output device");
    println!("      -i, --input NAME        Capture device");
    println!("      -o, --output NAME       Playback device");
    println!("      -c, --channel N         Logical output channel (0-based)");
    println!("      -s, --signal TYPE       log_sweep | white_noise | pink_noise | mls");
    println!("      -t, --duration SECS     Stimulus length");
    println!("      -r, --sample-rate RATE  Sample rate in Hz");
    println!("      -n, --name NAME         Record name");
    println!("      --calibration FILE      Microphone calibration file");
    println!("      --loopback              Simulated device pair, no hardware");
    println!("  play FILE [OPTIONS]         Play a file through the EQ");
    println!("      -f, --filter F,Q,G[,K]  Add a filter band (repeatable)");
    println!("      -o, --output NAME       Playback device");
    println!("      --bypass                Start with the EQ bypassed");
    println!("  records list                List stored measurements");
    println!("  records rename ID NAME      Rename a measurement");
    println!("  records delete ID           Delete a measurement");
    println!("  records export ID [FILE]    Write a measurement as CSV");
    println!("  records sum|average         Write the aggregate of all records as CSV");
    println!("  config                      Show the configuration file");
    println!("  -v, --version               Show version");
    println!();
    println!("Examples:");
    println!("  roomeq measure -o \"Studio Monitors\" -i \"UMIK-1\" -c 1");
    println!("  roomeq play song.flac -f 1000,1.0,6 -f 80,0.7,-4,low_shelf");
}

/// Value following an option flag
fn value<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str> {
    args.get(i + 1)
        .map(String::as_str)
        .with_context(|| format!("{flag} requires a value"))
}

fn report(e: &Error) {
    println!("Error: {}", e);
    if let Some(hint) = e.remediation() {
        println!("Hint: {}", hint);
    }
}

fn list_devices() -> Result<()> {
    println!("Scanning for audio devices...");
    println!();

    match device::list_devices() {
        Ok(devices) if devices.is_empty() => println!("No audio devices found."),
        Ok(devices) => {
            println!("Found {} device(s):", devices.len());
            println!();
            for (i, device) in devices.iter().enumerate() {
                let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
                println!("  {}. {}{}", i + 1, device.name, default_marker);
                println!("     Id: {}", device.id);
                println!(
                    "     Channels: {} in, {} out",
                    device.input_channels, device.output_channels
                );
                if !device.sample_rates.is_empty() {
                    println!("     Sample rates: {:?}", device.sample_rates);
                }
                println!();
            }
        }
        Err(e) => {
            error!("Failed to list devices: {}", e);
            report(&e);
        }
    }
    Ok(())
}

fn measure(args: &[String]) -> Result<()> {
    let config = AppConfig::load();
    let mut params = config.capture_parameters();
    let mut name: Option<String> = None;
    let mut calibration = config.calibration_file.clone();
    let mut loopback = false;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--input" | "-i" => params.input_device = Some(value(args, i, flag)?.to_string()),
            "--output" | "-o" => params.output_device = Some(value(args, i, flag)?.to_string()),
            "--channel" | "-c" => params.output_channel = value(args, i, flag)?.parse()?,
            "--signal" | "-s" => {
                params.signal_type = value(args, i, flag)?
                    .parse::<SignalType>()
                    .map_err(anyhow::Error::msg)?
            }
            "--duration" | "-t" => params.duration = value(args, i, flag)?.parse()?,
            "--sample-rate" | "-r" => params.sample_rate = value(args, i, flag)?.parse()?,
            "--name" | "-n" => name = Some(value(args, i, flag)?.to_string()),
            "--calibration" => calibration = Some(PathBuf::from(value(args, i, flag)?)),
            "--loopback" => {
                loopback = true;
                i += 1;
                continue;
            }
            other => bail!("Unknown measure option: {other}"),
        }
        i += 2;
    }

    let backend: Box<dyn CaptureBackend> = if loopback {
        Box::new(LoopbackBackend::new())
    } else {
        Box::new(CpalCaptureBackend::new(
            params.input_device.clone(),
            params.output_device.clone(),
        ))
    };
    let storage = CaptureStorage::open(config.storage_dir())?;
    let mut orchestrator =
        CaptureOrchestrator::new(backend, storage).with_settings(config.analysis_settings());
    if let Some(path) = &calibration {
        orchestrator.set_calibration(CalibrationCurve::load(path)?);
    }

    let mut controller = match CaptureController::new(orchestrator) {
        Ok(c) => c,
        Err(e) => {
            report(&e);
            return Ok(());
        }
    };

    let cancel = CancelToken::new();
    let c = cancel.clone();
    ctrlc::set_handler(move || c.cancel()).ok();

    println!(
        "Measuring with {} for {:.1} s at {} Hz. Press Ctrl+C to cancel.",
        params.signal_type, params.duration, params.sample_rate
    );
    match controller.measure(&params, &cancel) {
        Ok(mut record) => {
            if let Some(name) = name {
                controller.rename(&record.id, &name)?;
                record.name = name;
            }
            println!();
            println!("Stored {} ({})", record.name, record.id);
            for f in [50.0, 100.0, 1000.0, 10000.0] {
                let level =
                    roomeq::math::interp_log_freq(&record.frequencies, &record.smoothed_magnitude, f);
                println!("  {:>7.0} Hz: {:+6.1} dB", f, level);
            }
        }
        Err(Error::Cancelled) => println!("Measurement cancelled."),
        Err(e) => report(&e),
    }
    Ok(())
}

fn play(args: &[String]) -> Result<()> {
    let config = AppConfig::load();
    let mut file: Option<PathBuf> = None;
    let mut filters: Vec<FilterParam> = Vec::new();
    let mut output = config.output_device.clone();
    let mut bypass = false;

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--filter" | "-f" => filters.push(value(args, i, flag)?.parse()?),
            "--output" | "-o" => output = Some(value(args, i, flag)?.to_string()),
            "--bypass" => {
                bypass = true;
                i += 1;
                continue;
            }
            arg if arg.starts_with('-') => bail!("Unknown play option: {arg}"),
            path => {
                file = Some(PathBuf::from(path));
                i += 1;
                continue;
            }
        }
        i += 2;
    }
    let file = file.context("play requires a file")?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let handle = PlayerHandle::spawn(move || {
            CpalOutput::new(output.as_deref()).map(|o| Box::new(o) as Box<dyn AudioOutput>)
        })?;
        let mut player = PlayerController::new(handle);
        player.load(&file).await?;
        player.set_filters(filters).await?;
        if bypass {
            player.toggle_eq().await?;
        }

        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();
        ctrlc::set_handler(move || r.store(false, Ordering::SeqCst)).ok();

        player.play().await?;
        info!(file = %file.display(), bands = player.filters().len(), "Playing");
        println!("Playing {}. Press Ctrl+C to stop.", file.display());

        let status = player.subscribe();
        loop {
            tokio::time::sleep(Duration::from_millis(250)).await;
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let Some(current) = status.borrow().clone() else {
                continue;
            };
            print!(
                "\r  {:>6.1} / {:.1} s  EQ {}   ",
                current.position_secs,
                current.duration_secs,
                if current.filters_enabled { "on" } else { "off" }
            );
            std::io::stdout().flush().ok();
            if !matches!(current.state, PlaybackState::Playing | PlaybackState::Paused) {
                if let Some(err) = current.last_error {
                    println!();
                    println!("Error: {}", err);
                }
                break;
            }
        }
        println!();
        player.stop().await?;
        anyhow::Ok(())
    })
}

fn records(args: &[String]) -> Result<()> {
    let config = AppConfig::load();
    let mut storage = CaptureStorage::open(config.storage_dir())?;
    let sub = args.first().map(String::as_str).unwrap_or("list");

    match sub {
        "list" => {
            if storage.is_empty() {
                println!("No measurements stored in {}", config.storage_dir().display());
            }
            for r in storage.list() {
                println!(
                    "{}  {}  {}  {} ({:.1} s, {} Hz, ch {})",
                    r.id,
                    r.timestamp.format("%Y-%m-%d %H:%M"),
                    r.name,
                    r.signal_type,
                    r.duration,
                    r.sample_rate,
                    r.output_channel
                );
            }
        }
        "rename" => {
            let id = value(args, 0, "rename")?;
            let name = value(args, 1, "rename")?;
            if let Err(e) = storage.rename(id, name) {
                report(&e);
            }
        }
        "delete" => {
            let id = value(args, 0, "delete")?;
            storage.delete(id)?;
        }
        "export" => {
            let id = value(args, 0, "export")?;
            let Some(record) = storage.get(id) else {
                report(&Error::NotFound(id.to_string()));
                return Ok(());
            };
            match args.get(2) {
                Some(path) => {
                    let file = std::fs::File::create(path)?;
                    record.write_csv(std::io::BufWriter::new(file))?;
                    println!("Wrote {}", path);
                }
                None => record.write_csv(std::io::stdout().lock())?,
            }
        }
        "sum" | "average" => {
            let mode = if sub == "sum" {
                AggregateMode::Sum
            } else {
                AggregateMode::Average
            };
            match aggregate(storage.list(), mode) {
                Some(view) => {
                    if view.skipped > 0 {
                        eprintln!(
                            "{} record(s) with a different frequency grid were left out",
                            view.skipped
                        );
                    }
                    view.record.write_csv(std::io::stdout().lock())?;
                }
                None => println!("No measurements stored."),
            }
        }
        other => bail!("Unknown records command: {other}"),
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let path = AppConfig::path();
    let config = AppConfig::load();
    println!("Config file: {}", path.display());
    println!("Records:     {}", config.storage_dir().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    if !path.exists() {
        config.save(&path)?;
        println!();
        println!("Wrote defaults to {}", path.display());
    }
    Ok(())
}
