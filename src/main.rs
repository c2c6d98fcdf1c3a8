//! Spectrum monitor CLI
//!
//! Usage: `spectrum-monitor [config.json]` or `spectrum-monitor --list-devices`.
//! Set `RUST_LOG=debug` to see every frame.

use spectrum_monitor::audio::{list_input_devices, CpalCaptureSource, SystemClock};
use spectrum_monitor::{FrameScheduler, LatestSlot, MonitorConfig, PublishedFrame};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--list-devices") {
        return list_devices();
    }

    let config = match args.first() {
        Some(path) => match MonitorConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => MonitorConfig::default(),
    };

    let scheduler = match FrameScheduler::start(config.clone(), Arc::new(SystemClock), |cfg| {
        CpalCaptureSource::open(cfg.stream, cfg.device.as_deref(), cfg.buffer_frames)
    }) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            log::error!("Failed to start capture: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let stream = scheduler.stream_config();
    log::info!(
        "Recording {} Hz mono, {} bins per frame... press Ctrl-C to stop",
        stream.sample_rate,
        stream.bin_count()
    );
    run_consumer(scheduler.slot(), config.consumer_interval()).await;

    let stats = match tokio::task::spawn_blocking(move || {
        let mut scheduler = scheduler;
        scheduler.shutdown();
        scheduler.stats()
    })
    .await
    {
        Ok(stats) => stats,
        Err(e) => {
            log::error!("Capture shutdown failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    log::info!(
        "Analysis finished: {} frames, {} overflows",
        stats.frames,
        stats.overflows
    );
    ExitCode::SUCCESS
}

/// Poll the slot at our own pace until Ctrl-C or the stream ends
async fn run_consumer(slot: Arc<LatestSlot>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_peak: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match slot.take_fresh() {
                    Some(frame) => report(&frame, &mut last_peak),
                    None if slot.is_finished() => {
                        log::info!("Capture ended");
                        break;
                    }
                    None => {}
                }
            }
        }
    }
}

fn report(frame: &PublishedFrame, last_peak: &mut Option<Instant>) {
    if let Some((hz, db)) = frame.dominant() {
        log::debug!(
            "#{} dominant {:.0} Hz at {:.1} dB{}",
            frame.sequence,
            hz,
            db,
            if frame.overflowed { " (overflow)" } else { "" }
        );
    }

    // Only report when the held peak actually refreshed
    if *last_peak != Some(frame.peak.updated_at) {
        *last_peak = Some(frame.peak.updated_at);
        log::info!("Peak {:>6.1} dB", frame.peak.peak_db);
    }
}

fn list_devices() -> ExitCode {
    match list_input_devices() {
        Ok(devices) if devices.is_empty() => {
            println!("No input devices found");
            ExitCode::SUCCESS
        }
        Ok(devices) => {
            for device in devices {
                println!(
                    "{}{} ({} Hz, {} ch)",
                    if device.is_default { "* " } else { "  " },
                    device.name,
                    device
                        .default_sample_rate
                        .map_or_else(|| "?".to_string(), |r| r.to_string()),
                    device
                        .default_channels
                        .map_or_else(|| "?".to_string(), |c| c.to_string()),
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
