//! Audio segments: one unit of narrated text with its synthesized clip.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::timing::sidecar_path;

/// Which part of the source post a segment narrates. The role determines the
/// conventional file stem of the audio asset (`title`, `postaudio-N`, `N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentRole {
    /// The post title, always first on the timeline.
    Title,
    /// Chunk N of a story-mode post body.
    Post(usize),
    /// Comment N of the post.
    Comment(usize),
}

impl SegmentRole {
    /// Conventional file stem for this role's audio asset.
    pub fn file_stem(&self) -> String {
        match self {
            Self::Title => "title".to_string(),
            Self::Post(idx) => format!("postaudio-{idx}"),
            Self::Comment(idx) => idx.to_string(),
        }
    }
}

impl fmt::Display for SegmentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

/// One synthesized clip: role, audio asset path, the text that was spoken,
/// and the probed duration.
///
/// The duration is absent until the prober fills it in and is never changed
/// afterwards; a segment belongs to exactly one pipeline run.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    pub role: SegmentRole,
    pub path: PathBuf,
    pub text: String,
    duration: Option<f64>,
}

impl AudioSegment {
    pub fn new(role: SegmentRole, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            role,
            path: path.into(),
            text: text.into(),
            duration: None,
        }
    }

    /// Probed playback duration in seconds, if the prober has run.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub(crate) fn set_duration(&mut self, seconds: f64) {
        self.duration = Some(seconds);
    }
}

/// Remove a segment's audio asset together with its timing sidecar.
///
/// The sidecar's lifecycle matches the audio file: they are created together
/// and deleted together. Returns the number of files removed.
pub fn remove_segment_artifacts(audio_path: &Path) -> Result<usize> {
    let mut removed = 0;
    for path in [audio_path.to_path_buf(), sidecar_path(audio_path)] {
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("removed {}", path.display());
            removed += 1;
        }
    }
    Ok(removed)
}

/// Remove every segment's artifacts, returning the total file count removed.
pub fn cleanup_segments(segments: &[AudioSegment]) -> Result<usize> {
    let mut removed = 0;
    for segment in segments {
        removed += remove_segment_artifacts(&segment.path)?;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{save_word_timings, WordTiming};

    #[test]
    fn role_file_stems_follow_the_naming_scheme() {
        assert_eq!(SegmentRole::Title.file_stem(), "title");
        assert_eq!(SegmentRole::Post(3).file_stem(), "postaudio-3");
        assert_eq!(SegmentRole::Comment(0).file_stem(), "0");
    }

    #[test]
    fn duration_starts_unset() {
        let segment = AudioSegment::new(SegmentRole::Title, "mp3/title.mp3", "Hello");
        assert!(segment.duration().is_none());
    }

    #[test]
    fn cleanup_removes_audio_and_sidecar_together() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("title.mp3");
        fs::write(&audio, b"fake audio").unwrap();
        let timings = vec![WordTiming {
            word: "Hello".to_string(),
            start: 0.0,
            end: 1.0,
        }];
        save_word_timings(&timings, &sidecar_path(&audio)).unwrap();

        let removed = remove_segment_artifacts(&audio).unwrap();
        assert_eq!(removed, 2);
        assert!(!audio.exists());
        assert!(!sidecar_path(&audio).exists());
    }

    #[test]
    fn cleanup_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let segment = AudioSegment::new(
            SegmentRole::Comment(1),
            dir.path().join("1.mp3"),
            "never synthesized",
        );
        assert_eq!(cleanup_segments(&[segment]).unwrap(), 0);
    }
}
