use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Opaque 128-bit episode identifier.
///
/// Derived from the MD5 hash of the media file header, so the id is stable
/// across scans as long as the file is untouched. Serialized as lowercase hex.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct EpisodeId([u8; 16]);

impl EpisodeId {
    pub fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl Serialize for EpisodeId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EpisodeId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_hex_id(&s)
            .map(Self)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid episode id: {:?}", s)))
    }
}

fn parse_hex_id(s: &str) -> Option<[u8; 16]> {
    if s.len() != 32 || !s.is_ascii() {
        return None;
    }
    let mut bytes = [0u8; 16];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        bytes[i] = ((hi << 4) | lo) as u8;
    }
    Some(bytes)
}

/// A single episode of a series, ready for analysis.
#[derive(Clone, Debug)]
pub struct Episode {
    pub id: EpisodeId,
    pub series: String,
    pub season: u32,
    pub name: String,
    pub path: PathBuf,
}

impl Episode {
    /// Builds an episode descriptor from a media file path.
    ///
    /// The season number is taken from the containing directory name and the
    /// series name from the directory above it. A file that does not sit inside
    /// a recognizable season directory is treated as season 1 of whatever
    /// directory it lives in.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let digest = crate::util::compute_header_md5(path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let parent_name = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|s| s.to_string_lossy().into_owned());
        let (series, season) = match parent_name.as_deref().and_then(parse_season_number) {
            Some(number) => {
                let series = path
                    .parent()
                    .and_then(|p| p.parent())
                    .and_then(|p| p.file_name())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "Unknown".to_string());
                (series, number)
            }
            None => (parent_name.unwrap_or_else(|| "Unknown".to_string()), 1),
        };

        Ok(Self {
            id: EpisodeId::new(digest.0),
            series,
            season,
            name,
            path: path.to_owned(),
        })
    }
}

/// An ordered group of episodes belonging to one season of one series.
#[derive(Clone, Debug)]
pub struct Season {
    pub series: String,
    pub number: u32,
    pub episodes: Vec<Episode>,
}

/// Parses a season number from a directory name.
///
/// Recognizes "Season 2", "S02", a bare number, and "Specials" (season 0).
fn parse_season_number(name: &str) -> Option<u32> {
    let lower = name.trim().to_lowercase();
    if lower == "specials" {
        return Some(0);
    }
    if let Some(rest) = lower.strip_prefix("season") {
        return rest.trim().parse().ok();
    }
    if let Some(rest) = lower.strip_prefix('s') {
        if !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()) {
            return rest.parse().ok();
        }
    }
    if !lower.is_empty() && lower.chars().all(|c| c.is_ascii_digit()) {
        return lower.parse().ok();
    }
    None
}

/// Groups episodes by (series, season number), ordering seasons and the
/// episodes within each season deterministically.
fn group_into_seasons(episodes: Vec<Episode>) -> Vec<Season> {
    let mut groups: BTreeMap<(String, u32), Vec<Episode>> = BTreeMap::new();
    for episode in episodes {
        groups
            .entry((episode.series.clone(), episode.season))
            .or_default()
            .push(episode);
    }

    groups
        .into_iter()
        .map(|((series, number), mut episodes)| {
            episodes.sort_by(|a, b| a.path.cmp(&b.path));
            Season {
                series,
                number,
                episodes,
            }
        })
        .collect()
}

/// Scans the given library roots and returns the seasons found in them.
///
/// Only valid video files are kept; see [crate::util::is_valid_video_file] for
/// what `full_validation` controls.
pub fn scan(paths: &[PathBuf], full_validation: bool) -> Result<Vec<Season>> {
    let videos = crate::util::find_video_files(paths, full_validation)?;

    let mut episodes = Vec::with_capacity(videos.len());
    for path in videos {
        let episode = Episode::from_path(&path)?;
        tracing::debug!(
            id = %episode.id,
            series = %episode.series,
            season = episode.season,
            "found episode: {}",
            episode.path.display()
        );
        episodes.push(episode);
    }

    Ok(group_into_seasons(episodes))
}

#[cfg(test)]
mod test {
    use super::*;

    fn episode(series: &str, season: u32, path: &str) -> Episode {
        Episode {
            id: EpisodeId::new(md5::compute(path.as_bytes()).0),
            series: series.to_string(),
            season,
            name: PathBuf::from(path)
                .file_stem()
                .unwrap()
                .to_string_lossy()
                .into_owned(),
            path: PathBuf::from(path),
        }
    }

    #[test]
    fn test_parse_season_number() {
        assert_eq!(parse_season_number("Season 2"), Some(2));
        assert_eq!(parse_season_number("season 10"), Some(10));
        assert_eq!(parse_season_number("S02"), Some(2));
        assert_eq!(parse_season_number("3"), Some(3));
        assert_eq!(parse_season_number("Specials"), Some(0));
        assert_eq!(parse_season_number("Firefly"), None);
        assert_eq!(parse_season_number("Series Finale"), None);
    }

    #[test]
    fn test_group_into_seasons_orders_episodes() {
        let episodes = vec![
            episode("Show", 1, "/tv/Show/Season 1/e02.mkv"),
            episode("Show", 2, "/tv/Show/Season 2/e01.mkv"),
            episode("Show", 1, "/tv/Show/Season 1/e01.mkv"),
        ];

        let seasons = group_into_seasons(episodes);
        assert_eq!(seasons.len(), 2);
        assert_eq!(seasons[0].number, 1);
        assert_eq!(seasons[0].episodes.len(), 2);
        assert_eq!(seasons[0].episodes[0].name, "e01");
        assert_eq!(seasons[1].number, 2);
        assert_eq!(seasons[1].episodes.len(), 1);
    }

    #[test]
    fn test_episode_id_display_and_serde() {
        let id = EpisodeId::new([
            0x00, 0x01, 0x0a, 0x10, 0xab, 0xcd, 0xef, 0xff, 0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc,
            0xde, 0xf0,
        ]);
        let hex = id.to_string();
        assert_eq!(hex, "00010a10abcdefff123456789abcdef0");

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", hex));
        let parsed: EpisodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);

        assert!(serde_json::from_str::<EpisodeId>("\"zz\"").is_err());
    }
}
