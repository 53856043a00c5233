use std::path::PathBuf;

pub mod audio;
pub mod edl;
pub mod library;
pub mod util;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("fingerprint error: {0}")]
    Fingerprint(String),
    #[error("fingerprint missing from season cache for episode: {0}")]
    FingerprintCacheMiss(library::EpisodeId),
    #[error("fingerprint data not found at: {0:?}")]
    FingerprintDataNotFound(PathBuf),
    #[error("fingerprint data has an invalid version")]
    FingerprintDataInvalidVersion,
    #[error("intro data has an invalid version")]
    IntroDataInvalidVersion,
    #[error("no suitable audio stream found in: {0:?}")]
    NoAudioStream(PathBuf),
    #[error("library path does not exist or is not accessible: {0:?}")]
    InvalidLibraryPath(PathBuf),
    #[error("no episodes are queued for analysis; provide at least one season with two or more valid episodes")]
    NoWork,
    #[error("FFmpeg error: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),
    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),
    #[error("serde_json error: {0}")]
    SerdeJSONError(#[from] serde_json::Error),
    #[error("thread pool error: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
