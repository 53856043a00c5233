use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::library::EpisodeId;
use crate::{Error, Result};

/// A time range `[start, end)` in seconds.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Returns the length of this range in seconds.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Returns true if this range overlaps `other` (open-interval semantics).
    pub fn intersects(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Finds the longest contiguous run of timestamps in `times` where consecutive
/// entries differ by at most `max_gap` seconds.
///
/// `times` must be sorted in ascending order. A run is only recorded once it is
/// closed by a larger gap, so callers append an `f64::INFINITY` sentinel to force
/// the final run closed. Returns `None` if `times` has fewer than two entries.
pub fn find_contiguous(times: &[f64], max_gap: f64) -> Option<TimeRange> {
    if times.len() < 2 {
        return None;
    }

    let mut best: Option<TimeRange> = None;
    let (mut run_start, mut run_end) = (times[0], times[0]);

    for &t in &times[1..] {
        if t - run_end <= max_gap {
            run_end = t;
            continue;
        }

        let run = TimeRange::new(run_start, run_end);
        if best.map_or(true, |b| run.duration() > b.duration()) {
            best = Some(run);
        }
        run_start = t;
        run_end = t;
    }

    best
}

/// A detected intro sequence for a single episode.
///
/// The unmatched default covers `[0, 0]`; any range with a positive duration is
/// considered valid.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Intro {
    pub episode_id: EpisodeId,
    pub start: f64,
    pub end: f64,
}

impl Intro {
    pub fn new(episode_id: EpisodeId, range: TimeRange) -> Self {
        Self {
            episode_id,
            start: range.start,
            end: range.end,
        }
    }

    /// Returns an unmatched intro for the given episode.
    pub fn unmatched(episode_id: EpisodeId) -> Self {
        Self {
            episode_id,
            start: 0.0,
            end: 0.0,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub enum FingerprintDataVersion {
    V1 = 20481,
}

#[derive(Debug, Deserialize, Serialize)]
struct FingerprintDataV1 {
    points: Vec<u32>,
    md5: String,
}

#[derive(Debug, Deserialize, Serialize)]
enum FingerprintDataInner {
    // IMPORTANT: Removing or modifying any of these variants is a breaking change.
    V1(FingerprintDataV1),
}

/// Cached fingerprint stream for a single media file.
///
/// Stored on disk alongside the file it was computed from and keyed by the MD5
/// hash of the file header, so edits to the media invalidate the cache. The
/// struct is versioned to allow for future format upgrades without breaking
/// previously written data.
#[derive(Debug, Deserialize, Serialize)]
pub struct FingerprintData {
    /// Magic number for the version.
    pub version: FingerprintDataVersion,
    /// Data for the given version.
    data: FingerprintDataInner,
}

impl FingerprintData {
    pub(crate) fn new_v1(points: Vec<u32>, md5: String) -> Self {
        Self {
            version: FingerprintDataVersion::V1,
            data: FingerprintDataInner::V1(FingerprintDataV1 { points, md5 }),
        }
    }

    /// Ensures that the version magic number matches the version of the data.
    fn is_version_valid(&self) -> bool {
        match self.data {
            FingerprintDataInner::V1(_) => self.version == FingerprintDataVersion::V1,
        }
    }

    /// Loads fingerprint data from a path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FingerprintDataNotFound(path.to_owned()));
        }
        let f = std::fs::File::open(path)?;
        let data: Self = bincode::deserialize_from(&f)?;
        if !data.is_version_valid() {
            return Err(Error::FingerprintDataInvalidVersion);
        }
        Ok(data)
    }

    /// Writes this fingerprint data to a path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = std::fs::File::create(path.as_ref())?;
        bincode::serialize_into(&mut f, self)?;
        Ok(())
    }

    /// Returns the fingerprint stream.
    pub fn points(&self) -> &[u32] {
        match &self.data {
            FingerprintDataInner::V1(d) => &d.points,
        }
    }

    /// Consumes this cache entry and returns the fingerprint stream.
    pub fn into_points(self) -> Vec<u32> {
        match self.data {
            FingerprintDataInner::V1(d) => d.points,
        }
    }

    /// Returns the MD5 hash of the media file header this data was computed from.
    pub fn md5(&self) -> &str {
        match &self.data {
            FingerprintDataInner::V1(d) => &d.md5,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub enum IntroStoreVersion {
    V1 = 31876,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct IntroStoreV1 {
    intros: HashMap<EpisodeId, Intro>,
}

#[derive(Debug, Deserialize, Serialize)]
enum IntroStoreInner {
    // IMPORTANT: Removing or modifying any of these variants is a breaking change.
    V1(IntroStoreV1),
}

/// The canonical set of detected intros, keyed by episode id.
///
/// One instance is shared across all season runs behind a mutex; season results
/// are merged in and persisted inside that critical section.
#[derive(Debug, Deserialize, Serialize)]
pub struct IntroStore {
    /// Magic number for the version.
    pub version: IntroStoreVersion,
    /// Data for the given version.
    data: IntroStoreInner,
}

impl Default for IntroStore {
    fn default() -> Self {
        Self {
            version: IntroStoreVersion::V1,
            data: IntroStoreInner::V1(IntroStoreV1::default()),
        }
    }
}

impl IntroStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensures that the version magic number matches the version of the data.
    fn is_version_valid(&self) -> bool {
        match self.data {
            IntroStoreInner::V1(_) => self.version == IntroStoreVersion::V1,
        }
    }

    /// Loads an intro store from a path.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let f = std::fs::File::open(path.as_ref())?;
        let store: Self = bincode::deserialize_from(&f)?;
        if !store.is_version_valid() {
            return Err(Error::IntroDataInvalidVersion);
        }
        Ok(store)
    }

    /// Writes this store to a path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut f = std::fs::File::create(path.as_ref())?;
        bincode::serialize_into(&mut f, self)?;
        Ok(())
    }

    /// Returns the intro recorded for the given episode, if any.
    pub fn get(&self, episode_id: &EpisodeId) -> Option<&Intro> {
        match &self.data {
            IntroStoreInner::V1(d) => d.intros.get(episode_id),
        }
    }

    /// Merges a season's results into the store, replacing existing entries.
    pub fn merge(&mut self, intros: HashMap<EpisodeId, Intro>) {
        match &mut self.data {
            IntroStoreInner::V1(d) => d.intros.extend(intros),
        }
    }

    /// Returns all recorded intros.
    pub fn intros(&self) -> &HashMap<EpisodeId, Intro> {
        match &self.data {
            IntroStoreInner::V1(d) => &d.intros,
        }
    }

    pub fn len(&self) -> usize {
        self.intros().len()
    }

    pub fn is_empty(&self) -> bool {
        self.intros().is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_time_range_duration_and_intersects() {
        let a = TimeRange::new(10.0, 20.0);
        let b = TimeRange::new(19.0, 25.0);
        let c = TimeRange::new(20.0, 25.0);

        assert_eq!(a.duration(), 10.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        // Open intervals: touching endpoints do not intersect.
        assert!(!a.intersects(&c));
        assert!(!c.intersects(&a));
    }

    #[test]
    fn test_find_contiguous_needs_two_entries() {
        assert_eq!(find_contiguous(&[], 3.5), None);
        assert_eq!(find_contiguous(&[1.0], 3.5), None);
    }

    #[test]
    fn test_find_contiguous_single_run() {
        let times = [0.0, 1.0, 2.0, 3.0, f64::INFINITY];
        let run = find_contiguous(&times, 3.5).unwrap();
        assert_eq!(run, TimeRange::new(0.0, 3.0));
    }

    #[test]
    fn test_find_contiguous_picks_longest_run() {
        // Two runs separated by a 10 second gap; the second one is longer.
        let times = [0.0, 1.0, 2.0, 12.0, 13.0, 14.0, 15.0, 16.0, f64::INFINITY];
        let run = find_contiguous(&times, 3.5).unwrap();
        assert_eq!(run, TimeRange::new(12.0, 16.0));
    }

    #[test]
    fn test_find_contiguous_tolerates_gaps_up_to_max() {
        let times = [0.0, 3.5, 7.0, f64::INFINITY];
        let run = find_contiguous(&times, 3.5).unwrap();
        assert_eq!(run, TimeRange::new(0.0, 7.0));

        // The same spacing with a tighter limit splits into single points.
        let run = find_contiguous(&times, 3.0).unwrap();
        assert_eq!(run.duration(), 0.0);
    }

    #[test]
    fn test_intro_validity() {
        let id = EpisodeId::new([7u8; 16]);
        assert!(!Intro::unmatched(id).is_valid());
        assert!(Intro::new(id, TimeRange::new(0.0, 90.0)).is_valid());
        assert_eq!(Intro::new(id, TimeRange::new(10.0, 40.0)).duration(), 30.0);
    }

    #[test]
    fn test_fingerprint_data_roundtrip() {
        let data = FingerprintData::new_v1(vec![1, 2, 3, 4], "abcd".to_string());
        let bytes = bincode::serialize(&data).unwrap();
        let data: FingerprintData = bincode::deserialize(&bytes).unwrap();
        assert!(data.is_version_valid());
        assert_eq!(data.points(), &[1, 2, 3, 4]);
        assert_eq!(data.md5(), "abcd");
    }

    #[test]
    fn test_intro_store_merge_and_roundtrip() {
        let id = EpisodeId::new([3u8; 16]);
        let mut store = IntroStore::new();
        assert!(store.is_empty());

        let mut intros = HashMap::new();
        intros.insert(id, Intro::new(id, TimeRange::new(0.0, 88.5)));
        store.merge(intros);
        assert_eq!(store.len(), 1);

        let bytes = bincode::serialize(&store).unwrap();
        let store: IntroStore = bincode::deserialize(&bytes).unwrap();
        assert_eq!(store.get(&id).unwrap().end, 88.5);
    }
}
