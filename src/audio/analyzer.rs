extern crate chromaprint_rust;
extern crate ffmpeg_next;
extern crate rayon;

use chromaprint_rust as chromaprint;

use std::path::Path;

use rayon::prelude::*;

use crate::library::Episode;
use crate::{Error, Result};

use super::data::{FingerprintData, TimeRange};

/// Sample rate the audio is resampled to before fingerprinting.
const FINGERPRINT_SAMPLE_RATE: u32 = 11025;
const FINGERPRINT_CHANNELS: u16 = 2;

/// Sample rate the audio is resampled to for silence scanning.
const SILENCE_SAMPLE_RATE: u32 = 16000;

/// Source of audio-derived data for episodes.
///
/// The season analysis pipeline only talks to this trait, which keeps the
/// comparison logic independent of FFmpeg and testable with synthetic streams.
pub trait AudioBackend {
    /// Produces the fingerprint stream for an episode.
    ///
    /// Each element summarizes [super::SAMPLES_TO_SECONDS] of audio and the
    /// order corresponds to time.
    fn fingerprint(&self, episode: &Episode) -> Result<Vec<u32>>;

    /// Returns the silent regions within the first `scan_duration` seconds of
    /// an episode, in ascending start order.
    fn detect_silence(&self, episode: &Episode, scan_duration: f64) -> Result<Vec<TimeRange>>;
}

/// Extracts fingerprints and silent regions from episode audio.
///
/// At a high level, fingerprinting a given episode:
///
/// 1. Extracts the most suitable audio stream
/// 2. Decodes the prefix of the stream frame-by-frame and resamples it
/// 3. Feeds the samples to Chromaprint and collects the raw fingerprint
/// 4. Caches the result on disk alongside the episode, keyed by the MD5 hash of
///    the file header
///
/// Only the first `analysis_duration` seconds are decoded: intros live in the
/// episode prefix, and fingerprinting entire files would multiply the decode
/// cost. If `force` is set, any existing fingerprint data on disk is ignored.
/// If `persist` is unset, fresh fingerprints are not written back to disk.
#[derive(Debug)]
pub struct Analyzer {
    analysis_duration: f64,
    silence_noise_floor_db: f64,
    threaded_decoding: bool,
    force: bool,
    persist: bool,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self {
            analysis_duration: super::DEFAULT_ANALYSIS_DURATION,
            silence_noise_floor_db: super::DEFAULT_SILENCE_NOISE_FLOOR_DB,
            threaded_decoding: false,
            force: false,
            persist: true,
        }
    }
}

// Converts a dBFS noise floor into a peak amplitude threshold for S16 samples.
fn noise_floor_amplitude(db: f64) -> i32 {
    (f64::from(i16::MAX) * 10f64.powf(db / 20.0)) as i32
}

impl Analyzer {
    /// Returns a new [Analyzer] with the provided `analysis_duration`.
    pub fn with_analysis_duration(mut self, analysis_duration: f64) -> Self {
        self.analysis_duration = analysis_duration;
        self
    }

    /// Returns a new [Analyzer] with the provided silence noise floor, in dBFS.
    pub fn with_silence_noise_floor_db(mut self, silence_noise_floor_db: f64) -> Self {
        self.silence_noise_floor_db = silence_noise_floor_db;
        self
    }

    /// Returns a new [Analyzer] with `threaded_decoding` set to the provided value.
    pub fn with_threaded_decoding(mut self, threaded_decoding: bool) -> Self {
        self.threaded_decoding = threaded_decoding;
        self
    }

    /// Returns a new [Analyzer] with `force` set to the provided value.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Returns a new [Analyzer] with `persist` set to the provided value.
    pub fn with_persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    // Decodes the audio stream prefix of `path`, resamples it to packed S16 in
    // the requested layout and rate, and hands each resampled chunk to `sink`.
    fn decode_samples(
        path: &Path,
        layout: ffmpeg_next::ChannelLayout,
        target_sample_rate: u32,
        limit: Option<f64>,
        threaded: bool,
        mut sink: impl FnMut(&[i16]) -> Result<()>,
    ) -> Result<()> {
        let span = tracing::span!(tracing::Level::TRACE, "decode_samples");
        let _enter = span.enter();

        let mut ctx = ffmpeg_next::format::input(&path)?;
        let stream = super::util::find_best_audio_stream(&ctx)
            .ok_or_else(|| Error::NoAudioStream(path.to_owned()))?;
        let stream_idx = stream.index();
        let time_base = stream.time_base();

        let codec_ctx = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())?;
        let mut decoder = codec_ctx.decoder();
        if threaded {
            // One frame-level decoding thread per available core.
            let mut config = ffmpeg_next::codec::threading::Config::default();
            config.count = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            config.kind = ffmpeg_next::codec::threading::Type::Frame;
            decoder.set_threading(config);
        }
        let mut decoder = decoder.audio()?;

        let mut frame = ffmpeg_next::frame::Audio::empty();
        let mut frame_resampled = ffmpeg_next::frame::Audio::empty();

        let mut resampler = decoder.resampler(
            ffmpeg_next::format::Sample::I16(ffmpeg_next::format::sample::Type::Packed),
            layout,
            target_sample_rate,
        )?;

        // Compute the end timestamp in time base units. This allows for quick
        // comparison with the PTS.
        let end_timestamp = limit.map(|secs| super::util::seconds_to_timestamp(time_base, secs));

        // Build an iterator over packets in the stream.
        //
        // We are only interested in packets for the selected stream, and only as
        // long as we haven't reached the target end timestamp.
        let audio_packets = ctx
            .packets()
            .filter(|(s, _)| s.index() == stream_idx)
            .map(|(_, p)| p)
            .take_while(|p| match (end_timestamp, p.pts()) {
                (Some(end), Some(pts)) => pts < end,
                _ => true,
            });

        for p in audio_packets {
            if p.pts().map_or(true, |pts| pts < 0) {
                // Skip packets with an invalid PTS. This can happen if, e.g., the
                // video was trimmed.
                // See: https://stackoverflow.com/a/41032346/845275
                continue;
            }

            decoder.send_packet(&p)?;
            while decoder.receive_frame(&mut frame).is_ok() {
                // Resample the frame and return the frame delay.
                let mut delay = match resampler.run(&frame, &mut frame_resampled) {
                    Ok(v) => v,
                    // If resampling fails due to changed input, construct a new local
                    // resampler for this frame and swap out the global resampler.
                    Err(ffmpeg_next::Error::InputChanged) => {
                        let mut local_resampler = frame.resampler(
                            ffmpeg_next::format::Sample::I16(
                                ffmpeg_next::format::sample::Type::Packed,
                            ),
                            layout,
                            target_sample_rate,
                        )?;
                        let delay = local_resampler.run(&frame, &mut frame_resampled)?;

                        resampler = local_resampler;

                        delay
                    }
                    Err(e) => return Err(e.into()),
                };

                loop {
                    // Obtain a slice of raw bytes in interleaved format. `data` is a
                    // fixed-size buffer, so the slice is limited to the actual sample
                    // bytes: sample count x channel count x bytes per S16 sample.
                    let raw_samples = &frame_resampled.data(0)
                        [..frame_resampled.samples() * frame_resampled.channels() as usize * 2];

                    // SAFETY: The resampler was explicitly configured to emit packed
                    // S16, so the buffer contains i16 samples.
                    let (_, samples, _) = unsafe { raw_samples.align_to::<i16>() };

                    sink(samples)?;

                    if delay.is_none() {
                        break;
                    } else {
                        delay = resampler.flush(&mut frame_resampled)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn fingerprint_uncached(&self, episode: &Episode) -> Result<Vec<u32>> {
        let mut fingerprinter = chromaprint::Context::default();
        fingerprinter
            .start(FINGERPRINT_SAMPLE_RATE, FINGERPRINT_CHANNELS)
            .map_err(|e| Error::Fingerprint(format!("{:?}", e)))?;

        Self::decode_samples(
            &episode.path,
            ffmpeg_next::ChannelLayout::STEREO,
            FINGERPRINT_SAMPLE_RATE,
            Some(self.analysis_duration),
            self.threaded_decoding,
            |samples| {
                fingerprinter
                    .feed(samples)
                    .map_err(|e| Error::Fingerprint(format!("{:?}", e)))
            },
        )?;

        fingerprinter
            .finish()
            .map_err(|e| Error::Fingerprint(format!("{:?}", e)))?;
        let raw = fingerprinter
            .get_fingerprint_raw()
            .map_err(|e| Error::Fingerprint(format!("{:?}", e)))?;

        Ok(raw.get().to_vec())
    }

    /// Fingerprints every episode up front, priming the on-disk cache.
    ///
    /// Episodes that fail to fingerprint are logged and skipped. Returns the
    /// number of episodes that produced a non-empty fingerprint.
    pub fn run(&self, episodes: &[Episode], threading: bool) -> Result<usize> {
        if episodes.is_empty() {
            return Err(Error::NoWork);
        }

        let fingerprint_one = |episode: &Episode| match self.fingerprint(episode) {
            Ok(points) if !points.is_empty() => 1,
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!(
                    series = %episode.series,
                    season = episode.season,
                    error = %e,
                    "failed to fingerprint {}",
                    episode.path.display()
                );
                0
            }
        };

        let count = if threading {
            episodes.par_iter().map(fingerprint_one).sum()
        } else {
            episodes.iter().map(fingerprint_one).sum()
        };

        Ok(count)
    }
}

impl AudioBackend for Analyzer {
    fn fingerprint(&self, episode: &Episode) -> Result<Vec<u32>> {
        let span = tracing::span!(tracing::Level::TRACE, "fingerprint");
        let _enter = span.enter();

        let path = &episode.path;
        let data_path = path.with_extension(super::FINGERPRINT_DATA_FILE_EXT);

        // Check for cached fingerprint data by comparing MD5 hashes.
        let md5 = crate::util::compute_header_md5sum(path)?;
        if !self.force {
            if let Ok(data) = FingerprintData::from_path(&data_path) {
                if data.md5() == md5 {
                    tracing::debug!("using cached fingerprint for {}", path.display());
                    return Ok(data.into_points());
                }
            }
        }

        tracing::debug!("starting fingerprinting for {}", path.display());
        let points = self.fingerprint_uncached(episode)?;
        tracing::debug!(
            points = points.len(),
            "completed fingerprinting for {}",
            path.display()
        );

        if self.persist {
            FingerprintData::new_v1(points.clone(), md5).save(&data_path)?;
        }

        Ok(points)
    }

    fn detect_silence(&self, episode: &Episode, scan_duration: f64) -> Result<Vec<TimeRange>> {
        let span = tracing::span!(tracing::Level::TRACE, "detect_silence");
        let _enter = span.enter();

        let threshold = noise_floor_amplitude(self.silence_noise_floor_db);
        let sample_rate = f64::from(SILENCE_SAMPLE_RATE);

        let mut silences = Vec::new();
        let mut silence_start: Option<f64> = None;
        let mut position: u64 = 0;

        Self::decode_samples(
            &episode.path,
            ffmpeg_next::ChannelLayout::MONO,
            SILENCE_SAMPLE_RATE,
            Some(scan_duration),
            self.threaded_decoding,
            |samples| {
                for &sample in samples {
                    let t = position as f64 / sample_rate;
                    if i32::from(sample).abs() > threshold {
                        if let Some(start) = silence_start.take() {
                            if t > start {
                                silences.push(TimeRange::new(start, t));
                            }
                        }
                    } else if silence_start.is_none() {
                        silence_start = Some(t);
                    }
                    position += 1;
                }
                Ok(())
            },
        )?;

        // Close a silent region still open at the end of the scanned window.
        if let Some(start) = silence_start {
            let end = (position as f64 / sample_rate).min(scan_duration);
            if end > start {
                silences.push(TimeRange::new(start, end));
            }
        }

        tracing::debug!(
            silences = silences.len(),
            "completed silence detection for {}",
            episode.path.display()
        );

        Ok(silences)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_noise_floor_amplitude() {
        // 0 dBFS is full scale; every -20 dB divides the amplitude by 10.
        assert_eq!(noise_floor_amplitude(0.0), 32767);
        assert_eq!(noise_floor_amplitude(-20.0), 3276);
        assert_eq!(noise_floor_amplitude(-50.0), 103);
    }
}
