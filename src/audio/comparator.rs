use std::collections::{BTreeSet, HashMap};

use crate::library::EpisodeId;

use super::data::{find_contiguous, Intro, TimeRange};
use super::{AnalysisParams, SAMPLES_TO_SECONDS};

/// Intros that start at or before this timestamp (seconds) snap to the episode start.
const EARLY_START_SNAP: f64 = 5.0;

/// Shared regions at least this long (seconds) get their end trimmed by twice the
/// maximum time skip; regions at least [MEDIUM_TRIM_THRESHOLD] long get a single
/// trim. The contiguous search extends a region up to one full gap past the last
/// real match, so the true end sits slightly before the extended boundary.
const LONG_TRIM_THRESHOLD: f64 = 90.0;
const MEDIUM_TRIM_THRESHOLD: f64 = 30.0;

/// Builds an inverted index from a fingerprint stream: each point value maps to
/// the offset of its first occurrence. Later duplicates are not recorded.
fn create_inverted_index(points: &[u32]) -> HashMap<u32, usize> {
    let mut index = HashMap::with_capacity(points.len());
    for (offset, &point) in points.iter().enumerate() {
        index.entry(point).or_insert(offset);
    }
    index
}

/// Compares the fingerprint streams of two episodes and extracts the longest
/// audio region they share.
///
/// The search aligns the two streams at every candidate shift discovered through
/// their inverted indexes, XORs the overlapping points, and keeps timestamps
/// whose Hamming distance stays within the configured threshold. The longest
/// contiguous run of such timestamps on each side becomes that episode's intro
/// candidate.
#[derive(Clone, Copy, Debug, Default)]
pub struct Comparator {
    params: AnalysisParams,
}

impl Comparator {
    pub fn new(params: AnalysisParams) -> Self {
        Self { params }
    }

    /// Compares two episodes and returns an [Intro] per side.
    ///
    /// Episodes are only comparable when both have non-empty fingerprints; an
    /// incomparable pair returns unmatched intros for both ids.
    pub fn compare(
        &self,
        lhs_id: EpisodeId,
        lhs: &[u32],
        rhs_id: EpisodeId,
        rhs: &[u32],
    ) -> (Intro, Intro) {
        if lhs.is_empty() || rhs.is_empty() {
            return (Intro::unmatched(lhs_id), Intro::unmatched(rhs_id));
        }

        let (lhs_ranges, rhs_ranges) = self.find_shared_ranges(lhs, rhs);
        self.longest_time_range(lhs_id, lhs_ranges, rhs_id, rhs_ranges)
    }

    /// Enumerates candidate shifts between the two streams and collects the
    /// shared region discovered at each of them.
    ///
    /// The returned lists are parallel: entry `i` of both sides came from the
    /// same shift.
    fn find_shared_ranges(&self, lhs: &[u32], rhs: &[u32]) -> (Vec<TimeRange>, Vec<TimeRange>) {
        let lhs_index = create_inverted_index(lhs);
        let rhs_index = create_inverted_index(rhs);

        // A fingerprint point rarely survives encoding twice with the exact same
        // value, so each LHS point probes a small arithmetic neighborhood in the
        // RHS index. Every hit proposes an alignment between the two streams.
        // The ordered set keeps reruns bit-for-bit identical.
        let radius = self.params.inverted_index_shift as i64;
        let mut shifts: BTreeSet<i64> = BTreeSet::new();
        for (&point, &lhs_first) in &lhs_index {
            for delta in -radius..=radius {
                let probe = point as i64 + delta;
                if probe < 0 || probe > u32::MAX as i64 {
                    continue;
                }
                let neighbor = probe as u32;
                if let Some(&rhs_first) = rhs_index.get(&neighbor) {
                    shifts.insert(rhs_first as i64 - lhs_first as i64);
                }
            }
        }

        tracing::trace!(shifts = shifts.len(), "enumerated candidate shifts");

        let mut lhs_ranges = Vec::new();
        let mut rhs_ranges = Vec::new();
        for &shift in &shifts {
            if let Some((lhs_range, rhs_range)) = self.find_contiguous_match(lhs, rhs, shift) {
                lhs_ranges.push(lhs_range);
                rhs_ranges.push(rhs_range);
            }
        }

        (lhs_ranges, rhs_ranges)
    }

    /// Aligns `rhs` against `lhs` at the given shift and searches the overlap for
    /// the longest contiguous run of matching points.
    fn find_contiguous_match(
        &self,
        lhs: &[u32],
        rhs: &[u32],
        shift: i64,
    ) -> Option<(TimeRange, TimeRange)> {
        let left_offset = if shift < 0 { (-shift) as usize } else { 0 };
        let right_offset = if shift > 0 { shift as usize } else { 0 };
        let overlap = lhs
            .len()
            .min(rhs.len())
            .saturating_sub(shift.unsigned_abs() as usize);

        let mut lhs_times = Vec::new();
        let mut rhs_times = Vec::new();
        for i in 0..overlap {
            let diff = lhs[left_offset + i] ^ rhs[right_offset + i];
            if u32::count_ones(diff) > self.params.max_point_differences {
                continue;
            }
            lhs_times.push((left_offset + i) as f64 * SAMPLES_TO_SECONDS);
            rhs_times.push((right_offset + i) as f64 * SAMPLES_TO_SECONDS);
        }

        if lhs_times.is_empty() {
            return None;
        }

        // The sentinel forces the final run closed.
        lhs_times.push(f64::INFINITY);
        rhs_times.push(f64::INFINITY);

        let mut lhs_range = find_contiguous(&lhs_times, self.params.max_time_skip)?;
        if lhs_range.duration() < self.params.min_intro_duration {
            return None;
        }
        // The two timestamp lists are built in lockstep, so a qualifying run on
        // the left guarantees one on the right.
        let mut rhs_range = find_contiguous(&rhs_times, self.params.max_time_skip)?;

        if lhs_range.duration() >= LONG_TRIM_THRESHOLD {
            lhs_range.end -= 2.0 * self.params.max_time_skip;
            rhs_range.end -= 2.0 * self.params.max_time_skip;
        } else if lhs_range.duration() >= MEDIUM_TRIM_THRESHOLD {
            lhs_range.end -= self.params.max_time_skip;
            rhs_range.end -= self.params.max_time_skip;
        }

        Some((lhs_range, rhs_range))
    }

    /// Picks the longest shared region for each side and wraps them as intros.
    ///
    /// The two lists are sorted independently: when multiple shifts survive, each
    /// side keeps its own longest region even if the winners came from different
    /// shifts. Starts close to the episode beginning snap to zero.
    fn longest_time_range(
        &self,
        lhs_id: EpisodeId,
        mut lhs_ranges: Vec<TimeRange>,
        rhs_id: EpisodeId,
        mut rhs_ranges: Vec<TimeRange>,
    ) -> (Intro, Intro) {
        if lhs_ranges.is_empty() || rhs_ranges.is_empty() {
            return (Intro::unmatched(lhs_id), Intro::unmatched(rhs_id));
        }

        lhs_ranges.sort_by(|a, b| b.duration().total_cmp(&a.duration()));
        rhs_ranges.sort_by(|a, b| b.duration().total_cmp(&a.duration()));

        let mut lhs_range = lhs_ranges[0];
        let mut rhs_range = rhs_ranges[0];
        if lhs_range.start <= EARLY_START_SNAP {
            lhs_range.start = 0.0;
        }
        if rhs_range.start <= EARLY_START_SNAP {
            rhs_range.start = 0.0;
        }

        (Intro::new(lhs_id, lhs_range), Intro::new(rhs_id, rhs_range))
    }
}
