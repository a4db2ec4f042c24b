//! sign_capture - capture-side controller over a local frame source
//!
//! Prints every published static and dynamic prediction as a JSON line.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::Write;
use std::sync::mpsc::RecvTimeoutError;
use std::time::{Duration, Instant};

use sign_relay::{
    classify,
    config::{CaptureSettings, RelayConfig},
    extract, frame, CaptureConfig, CaptureScheduler, ModelVariant,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Frame source: stub://<name> or a directory of images.
    #[arg(long, default_value = "stub://camera")]
    source: String,
    /// Run time in seconds.
    #[arg(long, default_value_t = 10)]
    seconds: u64,
    /// Detection cadence in milliseconds.
    #[arg(long)]
    detection_ms: Option<u64>,
    /// Static classification cadence in milliseconds.
    #[arg(long)]
    static_ms: Option<u64>,
    /// Dynamic classification cadence in milliseconds.
    #[arg(long)]
    dynamic_ms: Option<u64>,
    /// Delay before the first dynamic classification in milliseconds.
    #[arg(long)]
    warmup_ms: Option<u64>,
    /// Sequence model backbone (lstm or transformer).
    #[arg(long, env = "SIGN_RELAY_MODEL_VARIANT")]
    model: Option<ModelVariant>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.seconds == 0 {
        return Err(anyhow!("seconds must be >= 1"));
    }

    let config = RelayConfig::load()?;
    let defaults = &config.capture;
    let settings = CaptureSettings {
        detection: ms_or(args.detection_ms, defaults.detection),
        static_every: ms_or(args.static_ms, defaults.static_every),
        dynamic_every: ms_or(args.dynamic_ms, defaults.dynamic_every),
        warmup: ms_or(args.warmup_ms, defaults.warmup),
    };
    let variant = args.model.unwrap_or(config.classifier.model_variant);

    let source = frame::open_source(&args.source)?;
    let extractor = extract::build_extractor(&config.extractor)?;
    let static_classifier = classify::build_static(&config.classifier)?;
    let dynamic_classifier = classify::build_dynamic(&config.classifier)?;

    let scheduler = CaptureScheduler::new(
        CaptureConfig::from_settings(&settings, variant),
        source,
        extractor,
        static_classifier,
        dynamic_classifier,
    )?;
    let predictions = scheduler.subscribe();
    scheduler.start()?;

    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let stdout = std::io::stdout();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match predictions.recv_timeout(remaining) {
            Ok(prediction) => {
                let mut out = stdout.lock();
                serde_json::to_writer(&mut out, &prediction)?;
                writeln!(out)?;
            }
            Err(RecvTimeoutError::Timeout) => break,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let stats = scheduler.stats();
    scheduler.stop();
    log::info!(
        "capture finished: {} detection ticks ({} shed), {} dynamic ticks ({} shed), {} failures",
        stats.detection_ticks,
        stats.detection_skipped,
        stats.dynamic_ticks,
        stats.dynamic_skipped,
        stats.failures
    );
    Ok(())
}

fn ms_or(value: Option<u64>, fallback: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(fallback)
}
