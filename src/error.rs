//! Error taxonomy.
//!
//! Two families share one enum:
//!
//! * **local** data conditions ([`InsufficientTriggers`](SsvepError::InsufficientTriggers),
//!   [`AllSegmentsRejected`](SsvepError::AllSegmentsRejected),
//!   [`SpectrumEdgeUndefined`](SsvepError::SpectrumEdgeUndefined)): a single
//!   stage/condition unit failed; batch drivers record NaN and continue.
//! * **structural** caller defects (everything else): abort immediately.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SsvepError {
    #[error("insufficient triggers: found {found}, need at least {required}")]
    InsufficientTriggers { found: usize, required: usize },

    #[error("all segments rejected: {rejected} over the artifact threshold, {out_of_bounds} past the end of the data")]
    AllSegmentsRejected { rejected: usize, out_of_bounds: usize },

    #[error(
        "spectrum undefined in requested bins {requested_lo}..={requested_hi} \
         (defined bins: {defined_lo}..={defined_hi})"
    )]
    SpectrumEdgeUndefined {
        requested_lo: usize,
        requested_hi: usize,
        defined_lo: usize,
        defined_hi: usize,
    },

    #[error("mismatched trial shapes: {left} vs {right} values per trial")]
    MismatchedTrialShapes { left: usize, right: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid hypnogram: {0}")]
    InvalidHypnogram(String),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("no good channels left after excluding bad channels")]
    NoGoodChannels,
}

impl SsvepError {
    /// `true` for per-unit data conditions that must not abort a batch run.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            SsvepError::InsufficientTriggers { .. }
                | SsvepError::AllSegmentsRejected { .. }
                | SsvepError::SpectrumEdgeUndefined { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SsvepError>;
