use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use ride_tracker_rs::types::{MotionSample, PositionFix, RideContext};
use ride_tracker_rs::{EstimatorConfig, FusionEvent, SpeedFusion};
use serde::Deserialize;
use serde_json::json;

#[derive(Parser, Debug)]
struct Args {
    /// Path to a recorded ride log (.json or .json.gz)
    #[arg(long, conflicts_with = "golden_dir")]
    log: Option<PathBuf>,

    /// Directory of golden logs to batch replay (processes *.json[.gz])
    #[arg(long)]
    golden_dir: Option<PathBuf>,

    /// Estimator configuration (JSON); overrides below apply on top
    #[arg(long)]
    config: Option<PathBuf>,

    /// Kalman process noise Q
    #[arg(long)]
    process_noise: Option<f64>,

    /// Base measurement noise, scaled by fix accuracy
    #[arg(long)]
    gps_base_noise: Option<f64>,

    /// Confidence damping constant
    #[arg(long)]
    damping: Option<f64>,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    motion: Option<MotionSample>,
    fix: Option<PositionFix>,
    context: Option<RideContext>,
}

#[derive(Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn rmse_pairs(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::INFINITY;
    }
    let sum_sq: f64 = pairs.iter().map(|(a, b)| (a - b).powi(2)).sum();
    (sum_sq / pairs.len() as f64).sqrt()
}

fn build_config(args: &Args) -> anyhow::Result<EstimatorConfig> {
    let mut config = match args.config.as_ref() {
        Some(path) => EstimatorConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EstimatorConfig::default(),
    };
    if let Some(q) = args.process_noise {
        config.kalman.process_noise = q;
    }
    if let Some(r) = args.gps_base_noise {
        config.kalman.gps_base_noise = r;
    }
    if let Some(k) = args.damping {
        config.decay.damping_constant = k;
    }
    config.validate()?;
    Ok(config)
}

fn run_once(path: &Path, config: &EstimatorConfig) -> anyhow::Result<serde_json::Value> {
    let log = load_log(path)?;
    let mut fusion = SpeedFusion::new(config.clone());

    // (estimate just before the fix, fix speed)
    let mut paired = Vec::new();
    let mut records = 0u64;
    let mut max_speed_val = 0.0;
    let mut max_speed_ts = 0.0;
    let mut max_cadence: Option<f64> = None;
    let mut max_gap = 0.0f64;
    let mut out_of_order = 0u64;
    let mut calibrations = 0u64;
    let mut last_fix_ts: Option<f64> = None;
    let mut max_fix_gap = 0.0f64;

    for r in &log.readings {
        if let Some(context) = r.context {
            fusion.set_ride_context(context);
        }

        if let Some(fix) = r.fix.as_ref() {
            let before = fusion.speed();
            for event in fusion.feed_fix(fix) {
                if let FusionEvent::FixApplied { .. } = event {
                    paired.push((before, fix.speed));
                }
            }
            if let Some(last) = last_fix_ts {
                max_fix_gap = max_fix_gap.max(fix.timestamp - last);
            }
            last_fix_ts = Some(fix.timestamp);
        }

        if let Some(motion) = r.motion.as_ref() {
            let step = fusion.feed_motion(motion);
            for event in &step.events {
                match event {
                    FusionEvent::SampleGap { gap_secs } => {
                        println!("[GAP] t={:.2}s {:.2}s without motion", r.timestamp, gap_secs);
                        max_gap = max_gap.max(*gap_secs);
                    }
                    FusionEvent::SampleOutOfOrder { .. } => out_of_order += 1,
                    FusionEvent::CalibrationCompleted { .. } => calibrations += 1,
                    FusionEvent::StillnessReset { still_for_secs, speed_before } => {
                        println!(
                            "[STILL] t={:.2}s after {:.1}s, speed {:.2} -> 0",
                            r.timestamp, still_for_secs, speed_before
                        );
                    }
                    _ => {}
                }
            }
            if let Some(record) = step.record {
                records += 1;
                if record.speed > max_speed_val {
                    max_speed_val = record.speed;
                    max_speed_ts = record.timestamp;
                }
                if let Some(rpm) = record.cadence {
                    max_cadence = Some(max_cadence.map_or(rpm, |m: f64| m.max(rpm)));
                }
            }
        }
    }

    let snap = fusion.snapshot();
    let max_fix = paired.iter().map(|(_, f)| *f).fold(0.0_f64, f64::max);

    Ok(json!({
        "log": path.display().to_string(),
        "process_noise": config.kalman.process_noise,
        "gps_base_noise": config.kalman.gps_base_noise,
        "damping_constant": config.decay.damping_constant,
        "rmse": rmse_pairs(&paired),
        "pairs": paired.len(),
        "readings": log.readings.len(),
        "records": records,
        "max_speed": max_speed_val,
        "max_speed_ts": max_speed_ts,
        "max_fix_speed": max_fix,
        "max_cadence": max_cadence,
        "fixes_applied": snap.fixes_applied,
        "fixes_rejected": snap.fixes_rejected,
        "stillness_resets": snap.stillness_resets,
        "calibrations": calibrations,
        "out_of_order": out_of_order,
        "max_motion_gap": max_gap,
        "max_fix_gap": max_fix_gap,
        "final_speed": snap.speed,
        "final_covariance": snap.filter.covariance
    }))
}

fn is_ride_log(name: &str) -> bool {
    name.ends_with(".json") || name.ends_with(".json.gz")
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = build_config(&args)?;
    let mut results = Vec::new();

    if let Some(dir) = args.golden_dir.as_ref() {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if path.is_file() && is_ride_log(name) {
                paths.push(path);
            }
        }
        paths.sort();
        for path in paths {
            match run_once(&path, &config) {
                Ok(res) => results.push(res),
                Err(e) => log::warn!("Failed {}: {:#}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &config)?);
    } else {
        anyhow::bail!("Provide --log or --golden-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ride_replay_{}_{}", std::process::id(), name))
    }

    /// Still calibration, a fix, then a second of 0.5 m/s² push.
    fn ride_log() -> serde_json::Value {
        let mut readings = Vec::new();
        for i in 0..=100 {
            let t = i as f64 * 0.02;
            readings.push(json!({ "timestamp": t, "motion": MotionSample::level(t, (0.0, 0.0, 0.0), (0.0, 0.0, 0.0)) }));
        }
        readings.push(json!({
            "timestamp": 2.01,
            "fix": { "timestamp": 2.01, "speed": 4.0, "horizontal_accuracy": 2.0 },
            "context": { "gear": 2, "terrain": "flat", "stance": "seated" }
        }));
        for i in 101..=150 {
            let t = i as f64 * 0.02;
            readings.push(json!({ "timestamp": t, "motion": MotionSample::level(t, (0.5, 0.0, 0.0), (0.0, 0.0, 0.0)) }));
        }
        json!({ "readings": readings })
    }

    #[test]
    fn test_rmse_pairs() {
        assert_relative_eq!(rmse_pairs(&[(1.0, 2.0), (3.0, 6.0)]), 5f64.sqrt());
        assert_eq!(rmse_pairs(&[(2.0, 2.0)]), 0.0);
        assert!(rmse_pairs(&[]).is_infinite());
    }

    #[test]
    fn test_build_config_applies_overrides() {
        let args = Args::parse_from(["replay", "--log", "x.json", "--process-noise", "0.3", "--damping", "0.05"]);
        let config = build_config(&args).unwrap();
        assert_eq!(config.kalman.process_noise, 0.3);
        assert_eq!(config.decay.damping_constant, 0.05);
        assert_eq!(config.kalman.gps_base_noise, EstimatorConfig::default().kalman.gps_base_noise);

        let args = Args::parse_from(["replay", "--damping", "2.0"]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn test_load_plain_and_gzipped_logs() {
        let text = serde_json::to_string(&ride_log()).unwrap();

        let plain = temp_path("plain.json");
        std::fs::write(&plain, &text).unwrap();
        let gz = temp_path("log.json.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let a = load_log(&plain).unwrap();
        let b = load_log(&gz).unwrap();
        std::fs::remove_file(&plain).unwrap();
        std::fs::remove_file(&gz).unwrap();

        assert_eq!(a.readings.len(), 152);
        assert_eq!(b.readings.len(), a.readings.len());
        let fix_reading = &b.readings[101];
        assert_eq!(fix_reading.fix.as_ref().map(|f| f.speed), Some(4.0));
        assert_eq!(fix_reading.context.map(|c| c.gear), Some(2));
        assert!(fix_reading.motion.is_none());
    }

    #[test]
    fn test_run_once_reports_ride() {
        let path = temp_path("ride.json");
        std::fs::write(&path, serde_json::to_string(&ride_log()).unwrap()).unwrap();
        let result = run_once(&path, &EstimatorConfig::default()).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(result["pairs"], 1);
        assert_eq!(result["records"], 50);
        assert_eq!(result["calibrations"], 1);
        assert_eq!(result["fixes_applied"], 1);
        // The fix lands on a zero estimate before any motion is integrated.
        assert_relative_eq!(result["rmse"].as_f64().unwrap(), 4.0);
        assert!(result["max_speed"].as_f64().unwrap() > 1.9);
        assert!(result["max_cadence"].as_f64().is_some());
    }

    #[test]
    fn test_is_ride_log() {
        assert!(is_ride_log("ride_1.json"));
        assert!(is_ride_log("ride_1.json.gz"));
        assert!(!is_ride_log("notes.txt"));
    }
}
