use anyhow::{bail, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use ssvep::io::{add_contrast, add_report, load_config, load_hypnogram, Recording, StWriter};
use ssvep::pipeline::{analyze_stages, compare_conditions, detect_triggers, Contrast, Session};
use ssvep::{AnalysisConfig, Stage, TriggerSource};

#[derive(Parser)]
#[command(name = "ssvep-analyze", about = "Per-stage steady-state flicker response analysis")]
struct Args {
    /// Recording (.safetensors with data / sfreq / ch_names)
    #[arg(long)]
    input: PathBuf,

    /// Hypnogram JSON: [{"start": .., "stage": .., "confidence": ..}, ...]
    #[arg(long)]
    hypnogram: PathBuf,

    /// Report output path (.safetensors)
    #[arg(long)]
    output: PathBuf,

    /// Condition label; part of every derived seed
    #[arg(long, default_value = "flicker")]
    condition: String,

    /// Second recording of the same participant to contrast against
    #[arg(long, requires = "control_hypnogram")]
    control: Option<PathBuf>,

    /// Hypnogram of the control recording
    #[arg(long)]
    control_hypnogram: Option<PathBuf>,

    /// Condition label of the control recording
    #[arg(long, default_value = "control")]
    control_condition: String,

    /// Partial JSON configuration overriding the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Photodiode channel
    #[arg(long, default_value = "Photo")]
    trigger_channel: String,

    /// Reference channel subtracted from the photodiode channel
    #[arg(long, default_value = "Ref")]
    reference_channel: String,

    /// Use absolute-threshold detection on the trigger channel (no reference)
    #[arg(long)]
    threshold_mode: bool,

    /// Flip the photodiode polarity
    #[arg(long)]
    invert: bool,

    /// Channels averaged for the time-domain response (comma-separated)
    #[arg(long, default_value = "O1,Oz,O2")]
    roi: String,

    /// Channels used for the spectrum (comma-separated, empty = ROI)
    #[arg(long, default_value = "")]
    psd_channels: String,

    /// Channels to exclude (comma-separated)
    #[arg(long, default_value = "")]
    bad_channels: String,

    /// Run-level seed
    #[arg(long)]
    seed: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "ssvep=info",
        1 => "ssvep=debug",
        _ => "ssvep=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()),
        )
        .init();
}

struct Inputs {
    rec: Recording,
    hyp: ssvep::Hypnogram,
    cfg: AnalysisConfig,
}

fn load_inputs(recording: &Path, hypnogram: &Path, args: &Args) -> Result<Inputs> {
    let rec = Recording::load(recording)?;
    info!(
        path = %recording.display(),
        channels = rec.data.nrows(),
        samples = rec.n_samples(),
        sfreq = rec.sfreq,
        "recording loaded"
    );
    let mut cfg = AnalysisConfig::for_sample_rate(rec.sfreq);
    if let Some(path) = &args.config {
        cfg = load_config(path, cfg)?;
    }
    if args.invert {
        cfg.trigger.invert = true;
    }
    if let Some(seed) = args.seed {
        cfg.permutation.seed = seed;
    }
    cfg.validate()?;
    let hyp = load_hypnogram(hypnogram, cfg.staging.epoch_samples(rec.sfreq))?;
    Ok(Inputs { rec, hyp, cfg })
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let roi = split_list(&args.roi);
    let psd_channels = match split_list(&args.psd_channels) {
        v if v.is_empty() => roi.clone(),
        v => v,
    };
    let bad = split_list(&args.bad_channels);
    let source = if args.threshold_mode {
        TriggerSource::Amplitude { channel: args.trigger_channel.clone() }
    } else {
        TriggerSource::Edge { trigger: args.trigger_channel.clone(), reference: args.reference_channel.clone() }
    };

    let mut writer = StWriter::new();
    let mut reports = Vec::new();
    let mut runs = vec![(args.input.clone(), args.hypnogram.clone(), args.condition.clone())];
    match (&args.control, &args.control_hypnogram) {
        (Some(r), Some(h)) => {
            if args.control_condition == args.condition {
                bail!("--condition and --control-condition must differ (both {:?})", args.condition);
            }
            runs.push((r.clone(), h.clone(), args.control_condition.clone()))
        }
        (None, None) => {}
        _ => bail!("--control and --control-hypnogram must be given together"),
    }

    let mut cfg_used = None;
    for (recording, hypnogram, condition) in &runs {
        let Inputs { rec, hyp, cfg } = load_inputs(recording, hypnogram, &args)?;
        let trig = detect_triggers(rec.view(), &rec.ch_names, &source, &cfg)?;
        if trig.triggers.is_empty() {
            tracing::warn!(condition = %condition, "no triggers detected; every stage will report NaN");
        }
        let session = Session {
            condition,
            data: rec.view(),
            ch_names: &rec.ch_names,
            sfreq: rec.sfreq,
            roi: &roi,
            psd_channels: &psd_channels,
            bad_channels: &bad,
            exclude: None,
        };
        let report = analyze_stages(&session, &trig.triggers, &hyp, &cfg)?;
        add_report(&mut writer, &report, Some(&trig));
        reports.push(report);
        cfg_used = Some(cfg);
    }

    if let (Some(cfg), [a, b]) = (&cfg_used, reports.as_slice()) {
        for stage in Stage::SCORED {
            for contrast in [Contrast::Ssvep, Contrast::Psd, Contrast::InducedFft] {
                let r = compare_conditions(a, b, stage, contrast, cfg)?;
                info!(stage = %stage, contrast = %contrast, z = r.z, p = r.p, trials = r.n_trials, "condition contrast");
                add_contrast(&mut writer, &a.condition, &b.condition, stage, contrast, &r);
            }
        }
    }

    writer.write(&args.output)?;
    info!(path = %args.output.display(), tensors = writer.len(), "report written");
    Ok(())
}
