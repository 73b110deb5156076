use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

use ride_tracker_rs::sensors;
use ride_tracker_rs::{
    spawn_estimator, EstimatorConfig, FusionSnapshot, RideContext, SampleRecord,
};

#[derive(Parser, Debug)]
#[command(name = "ride_tracker")]
#[command(about = "Ride speed and cadence estimator (simulated sensors)", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(value_name = "SECONDS", default_value = "0")]
    duration: u64,

    /// Estimator configuration (JSON, missing fields use defaults)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Gear selected at start (1-based, 0 = coasting)
    #[arg(long, default_value = "1")]
    gear: u32,

    /// Print every record as a JSON line on stdout
    #[arg(long)]
    records: bool,

    /// Directory for the session summary (not written when omitted)
    #[arg(long)]
    output_dir: Option<String>,
}

#[derive(Serialize)]
struct SessionSummary {
    started: String,
    duration_secs: i64,
    records_seen: u64,
    peak_speed: f64,
    peak_cadence: Option<f64>,
    final_state: FusionSnapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.config.as_deref() {
        Some(path) => EstimatorConfig::from_json_file(path)
            .with_context(|| format!("loading estimator config from {}", path))?,
        None => EstimatorConfig::default(),
    };

    log::info!("[{}] Ride Tracker RS Starting", ts_now());
    log::info!("  Duration: {} seconds (0=continuous)", args.duration);
    log::info!("  Sample rate: {} Hz", config.sample_rate_hz);
    log::info!("  Gear: {} of {}", args.gear, config.cadence.gear_ratios.len());
    log::info!(
        "  Calibration: {}s window every {}s",
        config.calibration.sampling_duration_secs,
        config.calibration.recalibration_interval_secs
    );

    if let Some(dir) = args.output_dir.as_deref() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir))?;
    }

    let sample_rate = config.sample_rate_hz;
    let (records_tx, mut records_rx) = mpsc::channel::<SampleRecord>(500);
    let (handle, estimator) = spawn_estimator(config, Some(records_tx));

    handle
        .set_context(RideContext { gear: args.gear, ..RideContext::default() })
        .await;

    // Hold handles so the producers live as long as the session
    let motion_handle = tokio::spawn(sensors::motion_loop(handle.sender(), sample_rate));
    let fix_handle = tokio::spawn(sensors::fix_loop(handle.sender()));

    let start = Utc::now();
    let mut status_tick = interval(Duration::from_secs(2));
    let mut records_seen = 0u64;
    let mut peak_speed = 0.0f64;
    let mut peak_cadence: Option<f64> = None;

    log::info!("[{}] Starting data collection...", ts_now());

    loop {
        if args.duration > 0 {
            let elapsed = Utc::now().signed_duration_since(start);
            if elapsed.num_seconds() as u64 >= args.duration {
                log::info!("[{}] Duration reached, stopping...", ts_now());
                break;
            }
        }

        tokio::select! {
            record = records_rx.recv() => {
                let Some(record) = record else { break };
                records_seen += 1;
                peak_speed = peak_speed.max(record.speed);
                if let Some(rpm) = record.cadence {
                    peak_cadence = Some(peak_cadence.map_or(rpm, |p| p.max(rpm)));
                }
                if args.records {
                    println!("{}", serde_json::to_string(&record)?);
                }
            }
            _ = status_tick.tick() => {
                let snap = handle.snapshot();
                if snap.calibrating {
                    log::info!("[{}] calibrating ({} motion samples)", ts_now(), snap.motion_samples);
                } else {
                    log::info!(
                        "[{}] speed {:.2} m/s | cadence {} | P={:.3} | fixes {}/{} | records {}",
                        ts_now(),
                        snap.speed,
                        snap.cadence.map_or("-".to_string(), |c| format!("{:.0} rpm", c)),
                        snap.filter.covariance,
                        snap.fixes_applied,
                        snap.fixes_applied + snap.fixes_rejected,
                        records_seen
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
        }
    }

    // Closing the input channel ends the producers and the estimator task
    drop(handle);
    motion_handle.abort();
    fix_handle.abort();
    let fusion = estimator.await.context("estimator task failed")?;
    let final_state = fusion.snapshot();

    log::info!("=== Final Stats ===");
    log::info!("Motion samples: {}", final_state.motion_samples);
    log::info!("Records: {}", records_seen);
    log::info!(
        "Fixes applied/rejected: {}/{}",
        final_state.fixes_applied,
        final_state.fixes_rejected
    );
    log::info!("Stillness resets: {}", final_state.stillness_resets);
    log::info!("Peak speed: {:.2} m/s", peak_speed);

    if let Some(dir) = args.output_dir.as_deref() {
        let summary = SessionSummary {
            started: start.to_rfc3339(),
            duration_secs: Utc::now().signed_duration_since(start).num_seconds(),
            records_seen,
            peak_speed,
            peak_cadence,
            final_state,
        };
        let filename = format!("{}/ride_{}.json", dir, ts_now_clean());
        std::fs::write(&filename, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("writing {}", filename))?;
        log::info!("[{}] Session summary saved to {}", ts_now(), filename);
    }

    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
