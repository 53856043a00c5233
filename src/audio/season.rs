use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use rayon::prelude::*;

use crate::edl::{self, EdlAction};
use crate::library::{Episode, EpisodeId, Season};
use crate::{Error, Result};

use super::comparator::Comparator;
use super::data::{Intro, IntroStore, TimeRange};
use super::{AnalysisParams, AudioBackend};

/// Per-season mapping from episode id to the best intro found for it so far.
pub type SeasonIntros = HashMap<EpisodeId, Intro>;

/// Seconds before the detected intro end in which a silence may claim the boundary.
const SILENCE_WINDOW: f64 = 15.0;

/// Extra seconds of audio scanned past the detected intro end.
const SILENCE_SCAN_PADDING: f64 = 2.0;

/// Detects intros across the seasons of a media library.
///
/// Seasons are analyzed independently on a bounded worker pool. Within a season,
/// every episode is fingerprinted through the [AudioBackend], episodes are
/// compared pairwise with a [Comparator], the intro end boundaries are snapped
/// to silence, and the results are merged into the shared [IntroStore].
pub struct SeasonAnalyzer<A> {
    backend: A,
    params: AnalysisParams,
    analyze_season_zero: bool,
    max_parallelism: usize,
    edl_action: EdlAction,
    regenerate_edl: bool,
}

impl<A> SeasonAnalyzer<A> {
    /// Constructs a [SeasonAnalyzer] on top of the given audio backend.
    pub fn new(backend: A) -> Self {
        Self {
            backend,
            params: AnalysisParams::default(),
            analyze_season_zero: false,
            max_parallelism: super::DEFAULT_MAX_PARALLELISM,
            edl_action: EdlAction::None,
            regenerate_edl: false,
        }
    }

    /// Returns a new [SeasonAnalyzer] with the provided [AnalysisParams].
    pub fn with_params(mut self, params: AnalysisParams) -> Self {
        self.params = params;
        self
    }

    /// Returns a new [SeasonAnalyzer] with `analyze_season_zero` set to the provided value.
    pub fn with_analyze_season_zero(mut self, analyze_season_zero: bool) -> Self {
        self.analyze_season_zero = analyze_season_zero;
        self
    }

    /// Returns a new [SeasonAnalyzer] with the provided `max_parallelism`.
    pub fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism.max(1);
        self
    }

    /// Returns a new [SeasonAnalyzer] with the provided [EdlAction].
    pub fn with_edl_action(mut self, edl_action: EdlAction) -> Self {
        self.edl_action = edl_action;
        self
    }

    /// Returns a new [SeasonAnalyzer] with `regenerate_edl` set to the provided value.
    pub fn with_regenerate_edl(mut self, regenerate_edl: bool) -> Self {
        self.regenerate_edl = regenerate_edl;
        self
    }
}

fn record_if_longer(intros: &mut SeasonIntros, candidate: Intro) {
    match intros.get(&candidate.episode_id) {
        Some(existing) if existing.duration() >= candidate.duration() => {}
        _ => {
            intros.insert(candidate.episode_id, candidate);
        }
    }
}

impl<A: AudioBackend + Sync> SeasonAnalyzer<A> {
    /// Runs the analysis over all seasons.
    ///
    /// Progress is reported as a percentage of queued episodes after each season
    /// completes. Cancellation is cooperative: workers poll the flag between
    /// fingerprint computations and before silence adjustment, and a cancelled
    /// season returns its episode count without writing results. Per-season
    /// failures are logged and skipped; they do not abort the run.
    ///
    /// Returns the total number of episodes processed.
    pub fn run(
        &self,
        seasons: &[Season],
        store: &Mutex<IntroStore>,
        store_path: Option<&Path>,
        progress: Option<&(dyn Fn(f64) + Sync)>,
        cancel: &AtomicBool,
    ) -> Result<usize> {
        let total: usize = seasons.iter().map(|s| s.episodes.len()).sum();
        if total == 0 {
            return Err(Error::NoWork);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_parallelism)
            .build()?;
        let processed = AtomicUsize::new(0);

        let count = pool.install(|| {
            seasons
                .par_iter()
                .map(|season| {
                    let n = match self.analyze_season(season, store, store_path, cancel) {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::warn!(
                                series = %season.series,
                                season = season.number,
                                error = %e,
                                "season analysis failed, skipping"
                            );
                            0
                        }
                    };
                    let done = processed.fetch_add(n, Ordering::SeqCst) + n;
                    if let Some(report) = progress {
                        report(done as f64 * 100.0 / total as f64);
                    }
                    n
                })
                .sum()
        });

        Ok(count)
    }

    /// Analyzes a single season and merges its results into the shared store.
    ///
    /// Returns the number of episodes this season contributed to the processed
    /// count.
    fn analyze_season(
        &self,
        season: &Season,
        store: &Mutex<IntroStore>,
        store_path: Option<&Path>,
        cancel: &AtomicBool,
    ) -> Result<usize> {
        let count = season.episodes.len();

        if season.number == 0 && !self.analyze_season_zero {
            tracing::debug!(series = %season.series, "skipping specials season");
            return Ok(0);
        }
        if count <= 1 {
            tracing::debug!(
                series = %season.series,
                season = season.number,
                episodes = count,
                "not enough episodes to analyze"
            );
            return Ok(count);
        }

        let span = tracing::span!(
            tracing::Level::DEBUG,
            "analyze_season",
            series = %season.series,
            season = season.number
        );
        let _enter = span.enter();

        // Fingerprint every episode up front. A fingerprinting failure downgrades
        // the episode to an empty stream, which makes it incomparable and leaves
        // the rest of the season intact.
        let mut fingerprints: HashMap<EpisodeId, Vec<u32>> = HashMap::with_capacity(count);
        for episode in &season.episodes {
            let points = match self.backend.fingerprint(episode) {
                Ok(points) => points,
                Err(e) => {
                    tracing::warn!(
                        series = %episode.series,
                        season = episode.season,
                        error = %e,
                        "failed to fingerprint {}, continuing without it",
                        episode.path.display()
                    );
                    Vec::new()
                }
            };
            fingerprints.insert(episode.id, points);

            if cancel.load(Ordering::Relaxed) {
                tracing::debug!("cancelled during fingerprinting");
                return Ok(count);
            }
        }

        let mut intros = self.pairwise_scan(season, &fingerprints)?;

        if cancel.load(Ordering::Relaxed) {
            tracing::debug!("cancelled before silence adjustment");
            return Ok(count);
        }

        self.adjust_intro_end_times(season, &mut intros);

        // Merge and persist under the store lock so the canonical set is never
        // observed half-written.
        {
            let mut store = store.lock().unwrap();
            store.merge(intros.clone());
            if let Some(path) = store_path {
                store.save(path)?;
            }
        }

        if self.edl_action != EdlAction::None && !intros.is_empty() {
            if let Err(e) = edl::update_edl_files(
                &season.episodes,
                &intros,
                self.edl_action,
                self.regenerate_edl,
            ) {
                tracing::warn!(
                    series = %season.series,
                    season = season.number,
                    error = %e,
                    "failed to write EDL files"
                );
            }
        }

        Ok(count)
    }

    /// Compares episodes pairwise and keeps the longest intro found per episode.
    fn pairwise_scan(
        &self,
        season: &Season,
        fingerprints: &HashMap<EpisodeId, Vec<u32>>,
    ) -> Result<SeasonIntros> {
        let comparator = Comparator::new(self.params);
        let mut intros = SeasonIntros::new();

        let mut queue: VecDeque<&Episode> = season.episodes.iter().collect();
        while let Some(current) = queue.pop_front() {
            let current_points = fingerprints
                .get(&current.id)
                .ok_or(Error::FingerprintCacheMiss(current.id))?;

            for other in &queue {
                let other_points = fingerprints
                    .get(&other.id)
                    .ok_or(Error::FingerprintCacheMiss(other.id))?;

                let (current_intro, other_intro) =
                    comparator.compare(current.id, current_points, other.id, other_points);
                if !current_intro.is_valid() {
                    continue;
                }

                record_if_longer(&mut intros, current_intro);
                record_if_longer(&mut intros, other_intro);

                // The first match inside the duration limit settles this episode.
                // An over-long match is kept but the scan continues looking.
                if current_intro.duration() <= self.params.max_intro_duration {
                    break;
                }
            }
        }

        Ok(intros)
    }

    /// Shortens each intro so that it ends on the nearest qualifying silence.
    ///
    /// The auto-skip should hand playback back on natural silence instead of
    /// clipping the first line of dialogue, so the end boundary moves to the
    /// start of the first silence that overlaps the tail of the intro, runs at
    /// least the configured minimum, and does not precede the intro start.
    fn adjust_intro_end_times(&self, season: &Season, intros: &mut SeasonIntros) {
        for episode in &season.episodes {
            let Some(intro) = intros.get_mut(&episode.id) else {
                continue;
            };

            let original_end = TimeRange::new(intro.end - SILENCE_WINDOW, intro.end);
            let silences = match self
                .backend
                .detect_silence(episode, intro.end + SILENCE_SCAN_PADDING)
            {
                Ok(silences) => silences,
                Err(e) => {
                    tracing::warn!(
                        series = %episode.series,
                        season = episode.season,
                        error = %e,
                        "silence detection failed for {}, keeping detected end",
                        episode.path.display()
                    );
                    continue;
                }
            };

            for silence in silences {
                if silence.intersects(&original_end)
                    && silence.duration() >= self.params.silence_min_duration
                    && silence.start >= intro.start
                {
                    tracing::debug!(
                        from = intro.end,
                        to = silence.start,
                        "snapped intro end to silence for {}",
                        episode.name
                    );
                    intro.end = silence.start;
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::path::PathBuf;

    struct MockBackend {
        fingerprints: HashMap<EpisodeId, Vec<u32>>,
        silences: HashMap<EpisodeId, Vec<TimeRange>>,
        fingerprint_calls: AtomicUsize,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                fingerprints: HashMap::new(),
                silences: HashMap::new(),
                fingerprint_calls: AtomicUsize::new(0),
            }
        }
    }

    impl AudioBackend for MockBackend {
        fn fingerprint(&self, episode: &Episode) -> Result<Vec<u32>> {
            self.fingerprint_calls.fetch_add(1, Ordering::SeqCst);
            self.fingerprints
                .get(&episode.id)
                .cloned()
                .ok_or_else(|| Error::Fingerprint("no audio".to_string()))
        }

        fn detect_silence(&self, episode: &Episode, _scan_duration: f64) -> Result<Vec<TimeRange>> {
            Ok(self
                .silences
                .get(&episode.id)
                .cloned()
                .unwrap_or_default())
        }
    }

    fn episode(n: u8) -> Episode {
        Episode {
            id: EpisodeId::new([n; 16]),
            series: "Show".to_string(),
            season: 1,
            name: format!("e{:02}", n),
            path: PathBuf::from(format!("/tv/Show/Season 1/e{:02}.mkv", n)),
        }
    }

    fn season(number: u32, episodes: Vec<Episode>) -> Season {
        Season {
            series: "Show".to_string(),
            number,
            episodes,
        }
    }

    // Deterministic xorshift stream; the seed must be non-zero.
    fn stream(seed: u32, len: usize) -> Vec<u32> {
        let mut x = seed;
        (0..len)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                x
            })
            .collect()
    }

    fn run_simple(
        analyzer: &SeasonAnalyzer<MockBackend>,
        seasons: &[Season],
        store: &Mutex<IntroStore>,
    ) -> Result<usize> {
        analyzer.run(seasons, store, None, None, &AtomicBool::new(false))
    }

    #[test]
    fn test_empty_queue_is_no_work() {
        let analyzer = SeasonAnalyzer::new(MockBackend::new());
        let store = Mutex::new(IntroStore::new());
        let result = run_simple(&analyzer, &[], &store);
        assert!(matches!(result, Err(Error::NoWork)));
    }

    #[test]
    fn test_single_episode_season_counts_without_analysis() {
        let backend = MockBackend::new();
        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());

        let seasons = vec![season(1, vec![episode(1)])];
        let processed = run_simple(&analyzer, &seasons, &store).unwrap();

        assert_eq!(processed, 1);
        assert!(store.lock().unwrap().is_empty());
        assert_eq!(analyzer.backend.fingerprint_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_specials_season_is_skipped_by_default() {
        let mut backend = MockBackend::new();
        let points = stream(0x517e_c0de, 700);
        backend.fingerprints.insert(episode(1).id, points.clone());
        backend.fingerprints.insert(episode(2).id, points);

        let seasons = vec![season(0, vec![episode(1), episode(2)])];

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let processed = run_simple(&analyzer, &seasons, &store).unwrap();
        assert_eq!(processed, 0);
        assert!(store.lock().unwrap().is_empty());

        let analyzer = analyzer.with_analyze_season_zero(true);
        let processed = run_simple(&analyzer, &seasons, &store).unwrap();
        assert_eq!(processed, 2);
        assert_eq!(store.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_identical_episodes_share_full_prefix() {
        let mut backend = MockBackend::new();
        let points = stream(0x1234_5678, 1000);
        backend.fingerprints.insert(episode(1).id, points.clone());
        backend.fingerprints.insert(episode(2).id, points);

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let seasons = vec![season(1, vec![episode(1), episode(2)])];

        let processed = run_simple(&analyzer, &seasons, &store).unwrap();
        assert_eq!(processed, 2);

        let store = store.lock().unwrap();
        for n in [1, 2] {
            let intro = *store.get(&episode(n).id).unwrap();
            assert_eq!(intro.start, 0.0);
            assert!((intro.end - (999.0 * super::super::SAMPLES_TO_SECONDS - 7.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn test_empty_fingerprints_yield_no_intros() {
        let mut backend = MockBackend::new();
        backend.fingerprints.insert(episode(1).id, Vec::new());
        backend.fingerprints.insert(episode(2).id, Vec::new());

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let seasons = vec![season(1, vec![episode(1), episode(2)])];

        let processed = run_simple(&analyzer, &seasons, &store).unwrap();
        assert_eq!(processed, 2);
        assert!(store.lock().unwrap().is_empty());
    }

    #[test]
    fn test_fingerprint_failure_only_affects_that_episode() {
        let mut backend = MockBackend::new();
        let points = stream(0xcafe_f00d, 700);
        backend.fingerprints.insert(episode(1).id, points.clone());
        backend.fingerprints.insert(episode(2).id, points);
        // Episode 3 has no fingerprint entry, so the backend errors for it.

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let seasons = vec![season(1, vec![episode(1), episode(2), episode(3)])];

        let processed = run_simple(&analyzer, &seasons, &store).unwrap();
        assert_eq!(processed, 3);

        let store = store.lock().unwrap();
        assert!(store.get(&episode(1).id).is_some());
        assert!(store.get(&episode(2).id).is_some());
        assert!(store.get(&episode(3).id).is_none());
    }

    #[test]
    fn test_longest_intro_is_kept_per_episode() {
        // Episodes 1 and 2 are identical; episode 3 only shares the first 200
        // points. Episode 2 must keep the long match from its pairing with
        // episode 1 even though it is later compared against episode 3.
        let base = stream(0x0dd5_eed5, 700);
        let mut short = base[..200].to_vec();
        short.extend(vec![u32::MAX; 500]);

        let mut backend = MockBackend::new();
        backend.fingerprints.insert(episode(1).id, base.clone());
        backend.fingerprints.insert(episode(2).id, base);
        backend.fingerprints.insert(episode(3).id, short);

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let seasons = vec![season(1, vec![episode(1), episode(2), episode(3)])];
        run_simple(&analyzer, &seasons, &store).unwrap();

        let store = store.lock().unwrap();
        let long_end = 699.0 * super::super::SAMPLES_TO_SECONDS - 3.5;
        let short_end = 199.0 * super::super::SAMPLES_TO_SECONDS;
        assert!((store.get(&episode(1).id).unwrap().end - long_end).abs() < 1e-9);
        assert!((store.get(&episode(2).id).unwrap().end - long_end).abs() < 1e-9);
        assert!((store.get(&episode(3).id).unwrap().end - short_end).abs() < 1e-9);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let mut backend = MockBackend::new();
        let points = stream(0x600d_cafe, 700);
        backend.fingerprints.insert(episode(1).id, points.clone());
        backend.fingerprints.insert(episode(2).id, points);

        let analyzer = SeasonAnalyzer::new(backend);
        let seasons = vec![season(1, vec![episode(1), episode(2)])];

        let first = Mutex::new(IntroStore::new());
        run_simple(&analyzer, &seasons, &first).unwrap();
        let second = Mutex::new(IntroStore::new());
        run_simple(&analyzer, &seasons, &second).unwrap();

        assert_eq!(
            first.lock().unwrap().intros(),
            second.lock().unwrap().intros()
        );
    }

    #[test]
    fn test_silence_snaps_intro_end() {
        let mut backend = MockBackend::new();
        let points = stream(0x7007_1234, 700);
        backend.fingerprints.insert(episode(1).id, points.clone());
        backend.fingerprints.insert(episode(2).id, points);
        // End before adjustment is 699 * 0.128 - 3.5 = 85.972. A short silence
        // and one outside the window must be passed over; the qualifying one
        // claims the boundary.
        backend.silences.insert(
            episode(1).id,
            vec![
                TimeRange::new(50.0, 51.0),
                TimeRange::new(71.5, 71.6),
                TimeRange::new(78.2, 79.1),
            ],
        );

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let seasons = vec![season(1, vec![episode(1), episode(2)])];
        run_simple(&analyzer, &seasons, &store).unwrap();

        let store = store.lock().unwrap();
        let unadjusted = 699.0 * super::super::SAMPLES_TO_SECONDS - 3.5;
        assert!((store.get(&episode(1).id).unwrap().end - 78.2).abs() < 1e-9);
        assert!((store.get(&episode(2).id).unwrap().end - unadjusted).abs() < 1e-9);
    }

    #[test]
    fn test_silence_before_intro_start_is_rejected() {
        let mut backend = MockBackend::new();
        backend.silences.insert(
            episode(1).id,
            vec![TimeRange::new(66.0, 67.0), TimeRange::new(72.0, 72.5)],
        );

        let analyzer = SeasonAnalyzer::new(backend);
        let mut intros = SeasonIntros::new();
        let id = episode(1).id;
        intros.insert(id, Intro::new(id, TimeRange::new(70.0, 80.0)));

        let s = season(1, vec![episode(1)]);
        analyzer.adjust_intro_end_times(&s, &mut intros);

        // The 66s silence intersects the window but starts before the intro.
        let intro = intros[&id];
        assert_eq!(intro.start, 70.0);
        assert_eq!(intro.end, 72.0);
    }

    #[test]
    fn test_silence_adjustment_never_extends() {
        let mut backend = MockBackend::new();
        backend
            .silences
            .insert(episode(1).id, vec![TimeRange::new(79.5, 81.0)]);

        let analyzer = SeasonAnalyzer::new(backend);
        let mut intros = SeasonIntros::new();
        let id = episode(1).id;
        intros.insert(id, Intro::new(id, TimeRange::new(0.0, 80.0)));

        let s = season(1, vec![episode(1)]);
        analyzer.adjust_intro_end_times(&s, &mut intros);

        let intro = intros[&id];
        assert!(intro.end <= 80.0);
        assert_eq!(intro.end, 79.5);
    }

    #[test]
    fn test_cancellation_returns_without_writing() {
        let mut backend = MockBackend::new();
        let points = stream(0xbeef_beef, 700);
        backend.fingerprints.insert(episode(1).id, points.clone());
        backend.fingerprints.insert(episode(2).id, points);

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let seasons = vec![season(1, vec![episode(1), episode(2)])];

        let cancel = AtomicBool::new(true);
        let processed = analyzer
            .run(&seasons, &store, None, None, &cancel)
            .unwrap();

        assert_eq!(processed, 2);
        assert!(store.lock().unwrap().is_empty());
    }

    #[test]
    fn test_progress_reaches_one_hundred_percent() {
        let mut backend = MockBackend::new();
        let points = stream(0xaaaa_1111, 700);
        backend.fingerprints.insert(episode(1).id, points.clone());
        backend.fingerprints.insert(episode(2).id, points);

        let analyzer = SeasonAnalyzer::new(backend);
        let store = Mutex::new(IntroStore::new());
        let seasons = vec![
            season(1, vec![episode(1), episode(2)]),
            season(2, vec![episode(3)]),
        ];

        let reports = Mutex::new(Vec::new());
        let report = |pct: f64| reports.lock().unwrap().push(pct);
        analyzer
            .run(&seasons, &store, None, Some(&report), &AtomicBool::new(false))
            .unwrap();

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(*reports.last().unwrap(), 100.0);
    }
}
