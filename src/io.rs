//! Boundary I/O: safetensors recordings and reports, JSON hypnograms and
//! configuration.
//!
//! Recording layout (read by [`Recording::load`], written by
//! [`Recording::save`]):
//!
//! | key        | dtype     | shape   |                              |
//! |------------|-----------|---------|------------------------------|
//! | `data`     | F32 / F64 | [C, T]  | samples, µV                  |
//! | `sfreq`    | F32 / F64 | [1]     | Hz                           |
//! | `ch_names` | U8        | [n]     | newline-joined UTF-8 names   |
//!
//! Reports are flat `name → tensor` safetensors files; see
//! [`add_report`] for the key scheme.
use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array1, Array2, ArrayView2};
use std::collections::HashMap;
use std::path::Path;

use crate::condition::ConditionResult;
use crate::config::AnalysisConfig;
use crate::pipeline::{Contrast, SessionReport};
use crate::stage::{Hypnogram, ScoredEpoch, Stage};
use crate::trigger::TriggerReport;

// ── Low-level safetensors parsing ─────────────────────────────────────────────

fn parse_header(bytes: &[u8]) -> Result<(HashMap<String, serde_json::Value>, usize)> {
    ensure!(bytes.len() >= 8, "safetensors file too small");
    let mut len = [0u8; 8];
    len.copy_from_slice(&bytes[..8]);
    let n = u64::from_le_bytes(len) as usize;
    ensure!(bytes.len() >= 8 + n, "safetensors header runs past the end of the file");
    let header: HashMap<String, serde_json::Value> =
        serde_json::from_slice(&bytes[8..8 + n]).context("failed to parse safetensors header")?;
    Ok((header, 8 + n))
}

fn tensor_bytes<'a>(bytes: &'a [u8], data_start: usize, entry: &serde_json::Value) -> Result<&'a [u8]> {
    let offsets = entry["data_offsets"].as_array().context("missing data_offsets")?;
    ensure!(offsets.len() == 2, "data_offsets must have two entries");
    let s = offsets[0].as_u64().context("bad data offset")? as usize;
    let e = offsets[1].as_u64().context("bad data offset")? as usize;
    ensure!(s <= e && data_start + e <= bytes.len(), "tensor data out of range");
    Ok(&bytes[data_start + s..data_start + e])
}

fn shape_of(entry: &serde_json::Value) -> Result<Vec<usize>> {
    entry["shape"]
        .as_array()
        .context("missing shape")?
        .iter()
        .map(|v| v.as_u64().map(|d| d as usize).context("bad shape entry"))
        .collect()
}

/// Numeric tensor converted to `f64`.
fn read_f64_tensor(bytes: &[u8], data_start: usize, entry: &serde_json::Value) -> Result<Vec<f64>> {
    let raw = tensor_bytes(bytes, data_start, entry)?;
    let dtype = entry["dtype"].as_str().context("missing dtype")?;
    Ok(match dtype {
        "F32" => raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect(),
        "F64" => raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect(),
        "I32" => raw
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
            .collect(),
        "I64" => raw
            .chunks_exact(8)
            .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64)
            .collect(),
        other => bail!("unsupported dtype {other} for a numeric tensor"),
    })
}

// ── Recording ─────────────────────────────────────────────────────────────────

/// Multichannel recording at a single sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    /// [C, T] samples.
    pub data: Array2<f64>,
    pub sfreq: f64,
    pub ch_names: Vec<String>,
}

impl Recording {
    pub fn new(data: Array2<f64>, sfreq: f64, ch_names: Vec<String>) -> Result<Self> {
        ensure!(sfreq > 0.0, "sample rate must be positive, got {sfreq}");
        ensure!(
            data.nrows() == ch_names.len(),
            "{} data rows but {} channel names",
            data.nrows(),
            ch_names.len()
        );
        Ok(Self { data, sfreq, ch_names })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let (header, data_start) = parse_header(&bytes)?;

        let data_entry = header.get("data").context("missing 'data' key")?;
        let shape = shape_of(data_entry)?;
        ensure!(shape.len() == 2, "'data' must be 2-D, got shape {shape:?}");
        let values = read_f64_tensor(&bytes, data_start, data_entry)?;
        let data = Array2::from_shape_vec((shape[0], shape[1]), values).context("'data' shape mismatch")?;

        let sfreq_entry = header.get("sfreq").context("missing 'sfreq' key")?;
        let sfreq = *read_f64_tensor(&bytes, data_start, sfreq_entry)?
            .first()
            .context("empty 'sfreq' tensor")?;

        let ch_names = match header.get("ch_names") {
            Some(e) => std::str::from_utf8(tensor_bytes(&bytes, data_start, e)?)
                .context("channel names are not UTF-8")?
                .split('\n')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => (0..data.nrows()).map(|i| format!("ch{i}")).collect(),
        };

        Self::new(data, sfreq, ch_names)
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Write in the layout [`Recording::load`] reads.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = StWriter::new();
        w.add_f64_arr2("data", &self.data);
        w.add_f64("sfreq", &[self.sfreq], &[1]);
        let names = self.ch_names.join("\n");
        w.add_u8("ch_names", names.as_bytes());
        w.write(path)
    }
}

// ── JSON inputs ───────────────────────────────────────────────────────────────

/// JSON array of `{"start": .., "stage": .., "confidence": ..}` objects;
/// `stage` is the integer code, `confidence` defaults to 1.
pub fn load_hypnogram(path: &Path, epoch_len: usize) -> Result<Hypnogram> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let epochs: Vec<ScoredEpoch> = serde_json::from_str(&text).context("parsing hypnogram JSON")?;
    Ok(Hypnogram::new(epochs, epoch_len)?)
}

/// Partial JSON configuration layered over `base`.
pub fn load_config(path: &Path, base: AnalysisConfig) -> Result<AnalysisConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let overrides: serde_json::Value = serde_json::from_str(&text).context("parsing config JSON")?;
    let mut merged = serde_json::to_value(base)?;
    merge_json(&mut merged, overrides);
    let cfg: AnalysisConfig = serde_json::from_value(merged).context("invalid config")?;
    cfg.validate()?;
    Ok(cfg)
}

fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(b), serde_json::Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(&k) {
                    Some(slot) => merge_json(slot, v),
                    None => {
                        b.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

// ── Safetensors writer ────────────────────────────────────────────────────────

/// Safetensors file writer for F32, F64, I32, I64 and U8 tensors.
///
/// ```rust,no_run
/// use ssvep::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_scalar("snr", 2.5);
/// w.add_f64("waveform", &[1.0, -1.0, 0.5], &[3]);
/// w.write(Path::new("/tmp/report.safetensors")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, ..)| n == name)
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_f64_arr1(&mut self, name: &str, arr: &Array1<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.len()]);
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    /// Single F64 value, shape `[1]`.
    pub fn add_scalar(&mut self, name: &str, value: f64) {
        self.add_f64(name, &[value], &[1]);
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_i64(&mut self, name: &str, data: &[i64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I64", shape.to_vec()));
    }

    /// Single I64 count, shape `[1]`.
    pub fn add_count(&mut self, name: &str, value: usize) {
        self.add_i64(name, &[value as i64], &[1]);
    }

    pub fn add_u8(&mut self, name: &str, data: &[u8]) {
        self.entries.push((name.to_string(), data.to_vec(), "U8", vec![data.len()]));
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        use std::io::Write;
        let mut header_map = serde_json::Map::new();
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(
                name.clone(),
                serde_json::json!({
                    "dtype": dtype,
                    "shape": shape,
                    "data_offsets": [offset, offset + data.len()],
                }),
            );
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes.into_iter().chain(std::iter::repeat(b' ').take(pad)).collect();
        let mut f = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Flatten a session report into `w`.
///
/// Every key starts with the condition label, so several reports share one
/// file: `"{condition}_{stage}_{metric}"` (e.g. `flicker_N2_ssvep_snr`,
/// `sham_REM_psd_db_mean`) plus session-level `{condition}_n_clipped`,
/// `{condition}_freqs`, `{condition}_fft_freqs` and, when given, the trigger
/// diagnostics `{condition}_trigger_*`.
pub fn add_report(w: &mut StWriter, report: &SessionReport, triggers: Option<&TriggerReport>) {
    let c = &report.condition;
    let g = |metric: &str| format!("{c}_{metric}");
    w.add_scalar(&g("sfreq"), report.sfreq);
    w.add_count(&g("n_clipped"), report.n_clipped);
    w.add_count(&g("n_unassigned"), report.n_unassigned);
    w.add_count(&g("n_excluded"), report.n_excluded);
    if let Some(t) = triggers {
        w.add_count(&g("trigger_n_base"), t.base_triggers.len());
        w.add_count(&g("trigger_n_cycles"), t.n_cycles);
        w.add_count(&g("trigger_n_sub"), t.triggers.len());
        w.add_scalar(&g("trigger_error_rate"), t.error_rate);
    }
    if let Some(first) = report.stages.first() {
        w.add_f64_arr1(&g("freqs"), &first.psd.spectrum.freqs);
        w.add_f64_arr1(&g("fft_freqs"), &first.fft.induced.freqs);
        w.add_f64_arr1(&g("evoked_fft_freqs"), &first.fft.evoked.freqs);
    }
    for s in &report.stages {
        let k = |metric: &str| format!("{c}_{}_{metric}", s.stage);
        w.add_count(&k("n_triggers"), s.n_triggers);

        let t = &s.ssvep;
        w.add_scalar(&k("ssvep_amplitude"), t.amplitude);
        w.add_scalar(&k("ssvep_snr"), t.permutation.snr);
        w.add_scalar(&k("ssvep_z"), t.permutation.z);
        w.add_scalar(&k("ssvep_p"), t.permutation.p);
        w.add_count(&k("ssvep_n_accepted"), t.n_accepted);
        w.add_count(&k("ssvep_n_rejected"), t.n_rejected);
        w.add_count(&k("ssvep_n_out_of_bounds"), t.n_out_of_bounds);
        w.add_f64_arr1(&k("ssvep_waveform"), &t.waveform);
        w.add_f64_arr1(&k("ssvep_sem"), &t.sem);
        w.add_scalar(&k("ssvep_split_half_r"), t.split_half);

        let p = &s.psd;
        w.add_scalar(&k("psd_peak_freq"), p.peak.freq);
        w.add_scalar(&k("psd_peak_db"), p.peak.psd_db);
        w.add_scalar(&k("psd_peak_snr"), p.peak.snr);
        w.add_scalar(&k("psd_target_db"), p.target.psd_db);
        w.add_scalar(&k("psd_target_snr"), p.target.snr);
        w.add_count(&k("psd_n_epochs"), p.spectrum.n_epochs);
        w.add_count(&k("psd_n_rejected"), p.n_epochs_rejected);
        w.add_f64_arr1(&k("psd_db_mean"), &p.spectrum.psd_db_mean);
        w.add_f64_arr1(&k("psd_db_std"), &p.spectrum.psd_db_std);
        w.add_f64_arr1(&k("snr_mean"), &p.spectrum.snr_mean);
        w.add_f64_arr1(&k("snr_std"), &p.spectrum.snr_std);

        let f = &s.fft;
        w.add_scalar(&k("fft_snr"), f.induced.band.snr);
        w.add_scalar(&k("fft_z"), f.induced.band.z);
        w.add_scalar(&k("fft_p"), f.induced.band.p);
        w.add_count(&k("fft_n_segments"), f.induced.n_segments);
        w.add_f64_arr1(&k("fft_spectrum"), &f.induced.spectrum);
        w.add_count(&k("evoked_fft_n_segments"), f.evoked.n_segments);
        w.add_f64_arr1(&k("evoked_fft_spectrum"), &f.evoked.spectrum);
    }
}

/// Add one condition contrast under `"{a}_vs_{b}_{stage}_{contrast}_*"`.
pub fn add_contrast(w: &mut StWriter, a: &str, b: &str, stage: Stage, contrast: Contrast, r: &ConditionResult) {
    let k = |metric: &str| format!("{a}_vs_{b}_{stage}_{contrast}_{metric}");
    w.add_scalar(&k("difference"), r.true_difference);
    w.add_scalar(&k("z"), r.z);
    w.add_scalar(&k("p"), r.p);
    w.add_count(&k("n_trials"), r.n_trials);
}

/// Write session reports (each with its optional trigger diagnostics) to
/// one file at `path`.
///
/// Condition labels must be distinct; their keys would collide otherwise.
pub fn write_report(reports: &[(&SessionReport, Option<&TriggerReport>)], path: &Path) -> Result<()> {
    let mut w = StWriter::new();
    for (i, (report, triggers)) in reports.iter().enumerate() {
        if reports[..i].iter().any(|(r, _)| r.condition == report.condition) {
            bail!("duplicate condition label {:?} in one report file", report.condition);
        }
        add_report(&mut w, report, *triggers);
    }
    w.write(path)
}

/// Read every numeric (F32, F64, I32, I64) tensor of a safetensors file as
/// `f64`, keyed by name.
pub fn read_tensors(path: &Path) -> Result<HashMap<String, (Vec<usize>, Vec<f64>)>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let (header, data_start) = parse_header(&bytes)?;
    let mut out = HashMap::new();
    for (key, entry) in &header {
        if key == "__metadata__" {
            continue;
        }
        if !matches!(entry["dtype"].as_str(), Some("F32" | "F64" | "I32" | "I64")) {
            continue;
        }
        let shape = shape_of(entry)?;
        out.insert(key.clone(), (shape, read_f64_tensor(&bytes, data_start, entry)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("ssvep-io-{}-{name}", std::process::id()))
    }

    #[test]
    fn recording_roundtrip() {
        let rec = Recording::new(
            Array2::from_shape_fn((2, 5), |(c, t)| (c * 10 + t) as f64),
            1000.0,
            vec!["Oz".into(), "Photo".into()],
        )
        .unwrap();
        let path = tmp("rec.safetensors");
        rec.save(&path).unwrap();
        let back = Recording::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back, rec);
    }

    #[test]
    fn config_override_keeps_other_defaults() {
        let path = tmp("cfg.json");
        std::fs::write(&path, r#"{ "segment": { "artifact_threshold": 150.0 } }"#).unwrap();
        let base = AnalysisConfig::for_sample_rate(5000.0);
        let cfg = load_config(&path, base).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.segment.artifact_threshold, 150.0);
        assert_eq!(cfg.segment.length, 125);
    }

    #[test]
    fn hypnogram_json() {
        let path = tmp("hyp.json");
        std::fs::write(
            &path,
            r#"[{"start": 0, "stage": 0, "confidence": 0.9}, {"start": 30000, "stage": 2}]"#,
        )
        .unwrap();
        let h = load_hypnogram(&path, 30_000).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(h.len(), 2);
        assert_eq!(h.epochs()[1].confidence, 1.0);
    }

    #[test]
    fn truncated_file_is_an_error() {
        assert!(parse_header(&[1, 2, 3]).is_err());
        let mut bytes = 100u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}");
        assert!(parse_header(&bytes).is_err());
    }
}
