use anyhow::Result;
use clap::Parser;
use ndarray::Array1;
use std::path::PathBuf;
use tracing::info;

use ssvep::io::{load_config, Recording, StWriter};
use ssvep::{difference, find_channel, first_difference, AnalysisConfig};
use ssvep::{detect_amplitude_triggers, detect_edge_triggers};

/// Run trigger detection only and dump the intermediate signals for timing
/// checks.
#[derive(Parser)]
#[command(name = "trigger-scan", about = "Photodiode trigger detection with diagnostic output")]
struct Args {
    /// Recording (.safetensors with data / sfreq / ch_names)
    #[arg(long)]
    input: PathBuf,

    /// Output (.safetensors): signal, derivative, base/sub triggers, markers
    #[arg(long)]
    output: PathBuf,

    /// Partial JSON configuration overriding the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "Photo")]
    trigger_channel: String,

    #[arg(long, default_value = "Ref")]
    reference_channel: String,

    /// Absolute-threshold detection on the trigger channel (no reference)
    #[arg(long)]
    threshold_mode: bool,

    /// Flip the photodiode polarity
    #[arg(long)]
    invert: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default = match args.verbose {
        0 => "ssvep=info",
        1 => "ssvep=debug",
        _ => "ssvep=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()),
        )
        .init();

    let rec = Recording::load(&args.input)?;
    let mut cfg = AnalysisConfig::for_sample_rate(rec.sfreq);
    if let Some(path) = &args.config {
        cfg = load_config(path, cfg)?;
    }
    cfg.trigger.invert |= args.invert;

    let trig_idx = find_channel(&rec.ch_names, &args.trigger_channel)?;
    let (signal, report) = if args.threshold_mode {
        let signal = rec.data.row(trig_idx).to_owned();
        let report = detect_amplitude_triggers(signal.view(), &cfg.trigger)?;
        (signal, report)
    } else {
        let ref_idx = find_channel(&rec.ch_names, &args.reference_channel)?;
        let (t, r) = (rec.data.row(trig_idx), rec.data.row(ref_idx));
        let report = detect_edge_triggers(t, r, &cfg.trigger)?;
        let mut signal = difference(t, r)?;
        if let Some(m) = signal.mean() {
            signal.mapv_inplace(|v| v - m);
        }
        if cfg.trigger.invert {
            signal.mapv_inplace(|v| -v);
        }
        (signal, report)
    };
    let derivative = first_difference(signal.view());

    // 1 at every sub-trigger, 0 elsewhere; overlay on the signal to check
    // alignment.
    let mut markers = Array1::<f64>::zeros(signal.len());
    for &t in &report.triggers {
        if t < markers.len() {
            markers[t] = 1.0;
        }
    }

    info!(
        base = report.base_triggers.len(),
        cycles = report.n_cycles,
        triggers = report.triggers.len(),
        error_rate_pct = report.error_rate_percent(),
        "trigger scan"
    );

    let to_i64 = |v: &[usize]| v.iter().map(|&x| x as i64).collect::<Vec<_>>();
    let mut w = StWriter::new();
    w.add_f64_arr1("signal", &signal);
    w.add_f64_arr1("derivative", &derivative);
    w.add_f64_arr1("markers", &markers);
    w.add_i64("base_triggers", &to_i64(&report.base_triggers), &[report.base_triggers.len()]);
    w.add_i64("triggers", &to_i64(&report.triggers), &[report.triggers.len()]);
    w.add_scalar("error_rate", report.error_rate);
    w.add_scalar("sfreq", rec.sfreq);
    w.write(&args.output)?;
    info!(path = %args.output.display(), "written");
    Ok(())
}
