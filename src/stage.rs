//! Sleep/wake stage labels and trigger-to-stage alignment.
//!
//! The hypnogram is produced by an external classifier and treated as an
//! opaque, validated input: an ordered list of `(start, stage, confidence)`
//! epochs with sample-index starts.
//!
//! Alignment rule: a trigger `t` belongs to the retained epoch with the
//! greatest `start ≤ t`, provided `t < start + epoch_len`.  Triggers outside
//! every retained epoch (before the first, after the last, or inside an
//! epoch dropped for low confidence) are reported as *unassigned*; triggers
//! in epochs labelled [`Stage::Excluded`] are reported as *excluded*.
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SsvepError};

/// Scored state of one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Stage {
    Wake,
    N1,
    N2,
    N3,
    Rem,
    /// Lights on, movement, or anything else that must not be analysed.
    Excluded,
}

impl Stage {
    /// The five analysable stages, in code order.
    pub const SCORED: [Stage; 5] = [Stage::Wake, Stage::N1, Stage::N2, Stage::N3, Stage::Rem];

    /// Integer code: 0 = W, 1 = N1, 2 = N2, 3 = N3, 4 = REM, 99 = excluded.
    pub fn code(self) -> i32 {
        match self {
            Stage::Wake => 0,
            Stage::N1 => 1,
            Stage::N2 => 2,
            Stage::N3 => 3,
            Stage::Rem => 4,
            Stage::Excluded => 99,
        }
    }

    /// Position in [`Stage::SCORED`]; `None` for `Excluded`.
    pub fn index(self) -> Option<usize> {
        match self {
            Stage::Excluded => None,
            s => Some(s.code() as usize),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Wake => "W",
            Stage::N1 => "N1",
            Stage::N2 => "N2",
            Stage::N3 => "N3",
            Stage::Rem => "REM",
            Stage::Excluded => "excluded",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<i32> for Stage {
    type Error = SsvepError;

    fn try_from(code: i32) -> Result<Self> {
        Ok(match code {
            0 => Stage::Wake,
            1 => Stage::N1,
            2 => Stage::N2,
            3 => Stage::N3,
            4 => Stage::Rem,
            99 | -1 => Stage::Excluded,
            other => return Err(SsvepError::InvalidHypnogram(format!("unknown stage code {other}"))),
        })
    }
}

impl From<Stage> for i32 {
    fn from(s: Stage) -> i32 {
        s.code()
    }
}

impl FromStr for Stage {
    type Err = SsvepError;

    /// Scorer labels: `W`, `N1`, `N2`, `N3`, `R`/`REM`; `L` (lights on) and
    /// `M` (movement) map to [`Stage::Excluded`].
    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "W" | "WAKE" => Stage::Wake,
            "N1" => Stage::N1,
            "N2" => Stage::N2,
            "N3" => Stage::N3,
            "R" | "REM" => Stage::Rem,
            "L" | "M" => Stage::Excluded,
            other => return Err(SsvepError::InvalidHypnogram(format!("unknown stage label {other:?}"))),
        })
    }
}

/// One scored epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredEpoch {
    /// First sample of the epoch.
    pub start: usize,
    pub stage: Stage,
    /// Classifier confidence in `[0, 1]`.
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

/// Validated, ordered hypnogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Hypnogram {
    epochs: Vec<ScoredEpoch>,
    epoch_len: usize,
}

impl Hypnogram {
    /// Epoch starts must be strictly increasing and at least `epoch_len`
    /// apart.
    pub fn new(epochs: Vec<ScoredEpoch>, epoch_len: usize) -> Result<Self> {
        if epoch_len == 0 {
            return Err(SsvepError::InvalidHypnogram("epoch length must be > 0".into()));
        }
        for w in epochs.windows(2) {
            if w[1].start < w[0].start + epoch_len {
                return Err(SsvepError::InvalidHypnogram(format!(
                    "epoch starting at {} overlaps or precedes the epoch at {}",
                    w[1].start, w[0].start
                )));
            }
        }
        if let Some(e) = epochs.iter().find(|e| !(0.0..=1.0).contains(&e.confidence)) {
            return Err(SsvepError::InvalidHypnogram(format!(
                "confidence {} at epoch {} is outside [0, 1]",
                e.confidence, e.start
            )));
        }
        Ok(Self { epochs, epoch_len })
    }

    /// Contiguous layout: epoch `i` starts at `i × epoch_len`, confidence 1.
    pub fn from_stages(stages: &[Stage], epoch_len: usize) -> Result<Self> {
        let epochs = stages
            .iter()
            .enumerate()
            .map(|(i, &stage)| ScoredEpoch { start: i * epoch_len, stage, confidence: 1.0 })
            .collect();
        Self::new(epochs, epoch_len)
    }

    pub fn epochs(&self) -> &[ScoredEpoch] {
        &self.epochs
    }

    pub fn epoch_len(&self) -> usize {
        self.epoch_len
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Sample range from the first epoch start to the last epoch end.
    pub fn span(&self) -> Option<Range<usize>> {
        let first = self.epochs.first()?;
        let last = self.epochs.last()?;
        Some(first.start..last.start + self.epoch_len)
    }

    /// Copy without epochs scored below `min_confidence`.
    pub fn confident(&self, min_confidence: f64) -> Hypnogram {
        let epochs: Vec<ScoredEpoch> =
            self.epochs.iter().copied().filter(|e| e.confidence >= min_confidence).collect();
        info!(
            dropped = self.epochs.len() - epochs.len(),
            total = self.epochs.len(),
            min_confidence,
            "uncertain epochs removed"
        );
        Hypnogram { epochs, epoch_len: self.epoch_len }
    }

    /// Retained epoch covering sample `t`, if any.
    pub fn epoch_at(&self, t: usize) -> Option<&ScoredEpoch> {
        // Number of epochs starting at or before t.
        let n = self.epochs.partition_point(|e| e.start <= t);
        let e = self.epochs.get(n.checked_sub(1)?)?;
        (t < e.start + self.epoch_len).then_some(e)
    }

    /// Partition `triggers` by stage.
    pub fn align(&self, triggers: &[usize]) -> StageTriggers {
        let mut out = StageTriggers::default();
        for &t in triggers {
            match self.epoch_at(t).map(|e| e.stage) {
                None => out.unassigned.push(t),
                Some(Stage::Excluded) => out.excluded.push(t),
                Some(s) => {
                    if let Some(i) = s.index() {
                        out.by_stage[i].push(t);
                    }
                }
            }
        }
        info!(
            wake = out.by_stage[0].len(),
            n1 = out.by_stage[1].len(),
            n2 = out.by_stage[2].len(),
            n3 = out.by_stage[3].len(),
            rem = out.by_stage[4].len(),
            excluded = out.excluded.len(),
            unassigned = out.unassigned.len(),
            "triggers sorted into stages"
        );
        out
    }

    /// Starts of `stage` epochs holding at least `min_triggers` triggers in
    /// `[start, start + epoch_len]`.
    ///
    /// `triggers` must be sorted.
    pub fn stimulated_epochs(&self, stage: Stage, triggers: &[usize], min_triggers: usize) -> Vec<usize> {
        self.epochs
            .iter()
            .filter(|e| e.stage == stage)
            .filter(|e| {
                let lo = triggers.partition_point(|&t| t < e.start);
                let hi = triggers.partition_point(|&t| t <= e.start + self.epoch_len);
                hi - lo >= min_triggers
            })
            .map(|e| e.start)
            .collect()
    }
}

/// Triggers partitioned by stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTriggers {
    /// Indexed by [`Stage::index`]: W, N1, N2, N3, REM.
    pub by_stage: [Vec<usize>; 5],
    /// Triggers inside epochs labelled [`Stage::Excluded`].
    pub excluded: Vec<usize>,
    /// Triggers outside every retained epoch.
    pub unassigned: Vec<usize>,
}

impl StageTriggers {
    /// Triggers of one stage; empty for [`Stage::Excluded`] (see `excluded`).
    pub fn get(&self, stage: Stage) -> &[usize] {
        match stage.index() {
            Some(i) => &self.by_stage[i],
            None => &[],
        }
    }

    pub fn total_assigned(&self) -> usize {
        self.by_stage.iter().map(Vec::len).sum()
    }
}

/// Keep triggers inside `range`.
pub fn clip_triggers(triggers: &[usize], range: Range<usize>) -> Vec<usize> {
    triggers.iter().copied().filter(|t| range.contains(t)).collect()
}

/// Drop triggers inside `range` (e.g. a period flagged during recording).
pub fn exclude_window(triggers: &[usize], range: Range<usize>) -> Vec<usize> {
    triggers.iter().copied().filter(|t| !range.contains(t)).collect()
}
