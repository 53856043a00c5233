mod analyzer;
mod comparator;
mod data;
mod season;
mod util;

pub use analyzer::{Analyzer, AudioBackend};
pub use comparator::Comparator;
pub use data::{find_contiguous, FingerprintData, Intro, IntroStore, TimeRange};
pub use season::{SeasonAnalyzer, SeasonIntros};

/// Seconds of audio covered by a single fingerprint point.
///
/// The raw Chromaprint fingerprint emits one 32-bit value for every 0.128 seconds
/// of input audio, which makes this the conversion factor between fingerprint
/// offsets and timestamps.
pub const SAMPLES_TO_SECONDS: f64 = 0.128;

/// Default maximum number of bits two fingerprint points may differ in while
/// still being treated as a match. The range is 0 (exact match) to 32 (no match).
pub const DEFAULT_MAX_POINT_DIFFERENCES: u32 = 6;

/// Default inverted index shift.
///
/// When enumerating candidate stream alignments, each fingerprint value is probed
/// against the other episode's index within this arithmetic neighborhood.
pub const DEFAULT_INVERTED_INDEX_SHIFT: u32 = 2;

/// Default maximum time skip (seconds).
///
/// Matching timestamps that are at most this far apart are considered part of the
/// same contiguous region. This tolerates short dropouts and mismatched frames.
pub const DEFAULT_MAX_TIME_SKIP: f64 = 3.5;

/// Default minimum silence duration (seconds).
///
/// Only silent regions that run at least this long are eligible when snapping an
/// intro's end to silence.
pub const DEFAULT_SILENCE_MIN_DURATION: f64 = 0.33;

/// Default minimum intro duration (seconds).
///
/// A shared region shorter than this is not considered an intro.
pub const DEFAULT_MIN_INTRO_DURATION: f64 = 15.0;

/// Default maximum intro duration (seconds).
///
/// Matches longer than this are stored but do not stop the pairwise search,
/// since they usually indicate a shared scene rather than the opening.
pub const DEFAULT_MAX_INTRO_DURATION: f64 = 120.0;

/// Default amount of audio to fingerprint from the start of each episode (seconds).
///
/// Intros live in the episode prefix, so fingerprinting the full file would only
/// add decode time and false-positive surface.
pub const DEFAULT_ANALYSIS_DURATION: f64 = 600.0;

/// Default noise floor for silence detection (dBFS).
pub const DEFAULT_SILENCE_NOISE_FLOOR_DB: f64 = -50.0;

/// Default number of seasons analyzed concurrently.
pub const DEFAULT_MAX_PARALLELISM: usize = 2;

static FINGERPRINT_DATA_FILE_EXT: &str = "overture.bin";

/// Tuning parameters for the season analysis pipeline.
///
/// The parameters are fixed for the lifetime of a scan and passed by value into
/// the pure comparison routines.
#[derive(Clone, Copy, Debug)]
pub struct AnalysisParams {
    /// Hamming distance threshold between two fingerprint points.
    pub max_point_differences: u32,
    /// Neighborhood radius used during candidate shift discovery.
    pub inverted_index_shift: u32,
    /// Largest gap (seconds) allowed inside a contiguous region.
    pub max_time_skip: f64,
    /// Minimum duration (seconds) for a silent region to move an intro end.
    pub silence_min_duration: f64,
    /// Minimum duration (seconds) for a shared region to count as an intro.
    pub min_intro_duration: f64,
    /// Upper bound (seconds) on intro durations accepted during the search.
    pub max_intro_duration: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            max_point_differences: DEFAULT_MAX_POINT_DIFFERENCES,
            inverted_index_shift: DEFAULT_INVERTED_INDEX_SHIFT,
            max_time_skip: DEFAULT_MAX_TIME_SKIP,
            silence_min_duration: DEFAULT_SILENCE_MIN_DURATION,
            min_intro_duration: DEFAULT_MIN_INTRO_DURATION,
            max_intro_duration: DEFAULT_MAX_INTRO_DURATION,
        }
    }
}

impl AnalysisParams {
    /// Returns a new [AnalysisParams] with the provided `max_point_differences`.
    pub fn with_max_point_differences(mut self, max_point_differences: u32) -> Self {
        self.max_point_differences = max_point_differences;
        self
    }

    /// Returns a new [AnalysisParams] with the provided `inverted_index_shift`.
    pub fn with_inverted_index_shift(mut self, inverted_index_shift: u32) -> Self {
        self.inverted_index_shift = inverted_index_shift;
        self
    }

    /// Returns a new [AnalysisParams] with the provided `max_time_skip`.
    pub fn with_max_time_skip(mut self, max_time_skip: f64) -> Self {
        self.max_time_skip = max_time_skip;
        self
    }

    /// Returns a new [AnalysisParams] with the provided `silence_min_duration`.
    pub fn with_silence_min_duration(mut self, silence_min_duration: f64) -> Self {
        self.silence_min_duration = silence_min_duration;
        self
    }

    /// Returns a new [AnalysisParams] with the provided `min_intro_duration`.
    pub fn with_min_intro_duration(mut self, min_intro_duration: f64) -> Self {
        self.min_intro_duration = min_intro_duration;
        self
    }

    /// Returns a new [AnalysisParams] with the provided `max_intro_duration`.
    pub fn with_max_intro_duration(mut self, max_intro_duration: f64) -> Self {
        self.max_intro_duration = max_intro_duration;
        self
    }
}
