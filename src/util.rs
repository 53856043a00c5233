use std::io::Read;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Formats a timestamp in seconds as "MM:SSs".
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let minutes = total / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}s", minutes, seconds)
}

/// Checks if the given path points to a valid video file.
///
/// If `full` is set to **false**, only the file header will be checked. This is a very cheap
/// operation, but it does not guarantee validity. If set to **true**, FFmpeg will be used to
/// check the video contents - note that this is more expensive, but much more accurate.
///
/// If `audio` is set to true, this function will ensure that the video contains *at least* one audio stream.
/// This flag is only used when `full` is set to **true**.
pub fn is_valid_video_file(path: impl AsRef<Path>, full: bool, audio: bool) -> bool {
    if !full {
        let mut buf = [0u8; 8192];
        let mut f = match std::fs::File::open(path.as_ref()) {
            Ok(f) => f,
            Err(_) => return false,
        };
        if f.read(&mut buf).is_err() {
            return false;
        }
        return infer::is_video(&buf);
    }

    if let Ok(input) = ffmpeg_next::format::input(&path.as_ref()) {
        let num_video_streams = input
            .streams()
            .filter(|s| s.parameters().medium() == ffmpeg_next::util::media::Type::Video)
            .count();
        let num_audio_streams = input
            .streams()
            .filter(|s| s.parameters().medium() == ffmpeg_next::util::media::Type::Audio)
            .count();
        num_video_streams > 0 && (!audio || num_audio_streams > 0)
    } else {
        false
    }
}

/// Recursively collects all valid video files under the given paths.
///
/// Episodes are compared by audio, so files without an audio stream are dropped
/// when `full_validation` is set. The result is sorted for deterministic
/// processing order.
pub fn find_video_files(paths: &[impl AsRef<Path>], full_validation: bool) -> Result<Vec<PathBuf>> {
    let mut videos = Vec::new();

    for path in paths {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::InvalidLibraryPath(path.to_owned()));
        }
        if path.is_dir() {
            visit_dir(path, full_validation, &mut videos)?;
        } else if is_valid_video_file(path, full_validation, true) {
            videos.push(path.to_owned());
        }
    }

    videos.sort();
    Ok(videos)
}

fn visit_dir(dir: &Path, full_validation: bool, videos: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            visit_dir(&path, full_validation, videos)?;
        } else if is_valid_video_file(&path, full_validation, true) {
            videos.push(path);
        }
    }
    Ok(())
}

pub(crate) fn compute_header_md5(video: impl AsRef<Path>) -> Result<md5::Digest> {
    let mut buf = [0u8; 8192];
    let mut f = std::fs::File::open(video.as_ref())?;
    f.read_exact(&mut buf)?;
    Ok(md5::compute(buf))
}

pub(crate) fn compute_header_md5sum(video: impl AsRef<Path>) -> Result<String> {
    Ok(format!("{:x}", compute_header_md5(video)?))
}

/// Returns the underlying FFmpeg version integer used by overture.
pub fn ffmpeg_version() -> u32 {
    ffmpeg_next::util::version()
}

/// Returns the underlying FFmpeg version string used by overture.
pub fn ffmpeg_version_string() -> String {
    let version_int = ffmpeg_version();

    // Reference: https://github.com/FFmpeg/FFmpeg/blob/130d19bf2044ac76372d1b97ab87ab283c8b37f8/libavutil/version.h#L64
    format!(
        "{}.{}.{}",
        version_int >> 16, // MAJOR
        (version_int & 0x00FF00) >> 8, // MINOR
        version_int & 0xFF // MICRO
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "00:00s");
        assert_eq!(format_time(59.9), "00:59s");
        assert_eq!(format_time(90.0), "01:30s");
        assert_eq!(format_time(754.3), "12:34s");
        assert_eq!(format_time(-3.0), "00:00s");
    }
}
