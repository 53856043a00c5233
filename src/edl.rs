use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::audio::Intro;
use crate::library::{Episode, EpisodeId};
use crate::Result;

static EDL_FILE_EXT: &str = "edl";

/// Action players should take over a detected intro, encoded into generated EDL
/// lines using the MPlayer EDL action codes.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Eq, PartialEq)]
pub enum EdlAction {
    /// Do not generate EDL files.
    None,
    /// Skip the intro entirely.
    Cut,
    /// Mute the intro audio.
    Mute,
    /// Insert a scene marker at the intro boundaries.
    SceneMarker,
    /// Mark the intro as a commercial break.
    CommercialBreak,
}

impl EdlAction {
    fn code(&self) -> Option<u8> {
        match self {
            EdlAction::None => None,
            EdlAction::Cut => Some(0),
            EdlAction::Mute => Some(1),
            EdlAction::SceneMarker => Some(2),
            EdlAction::CommercialBreak => Some(3),
        }
    }
}

fn edl_path(video: &Path) -> PathBuf {
    video.with_extension(EDL_FILE_EXT)
}

fn render(intro: &Intro, code: u8) -> String {
    format!("{:.2} {:.2} {}\n", intro.start, intro.end, code)
}

/// Writes an EDL file next to each episode that has a valid intro.
///
/// Existing EDL files are left untouched unless `regenerate` is set, which keeps
/// manual edits alive across scans.
pub fn update_edl_files(
    episodes: &[Episode],
    intros: &HashMap<EpisodeId, Intro>,
    action: EdlAction,
    regenerate: bool,
) -> Result<()> {
    let Some(code) = action.code() else {
        return Ok(());
    };

    for episode in episodes {
        let Some(intro) = intros.get(&episode.id) else {
            continue;
        };
        if !intro.is_valid() {
            continue;
        }

        let path = edl_path(&episode.path);
        if path.exists() && !regenerate {
            tracing::debug!("EDL file already exists for {}", episode.path.display());
            continue;
        }

        let mut f = std::fs::File::create(&path)?;
        f.write_all(render(intro, code).as_bytes())?;
        tracing::info!(
            start = intro.start,
            end = intro.end,
            "wrote EDL file: {}",
            path.display()
        );
    }

    Ok(())
}
