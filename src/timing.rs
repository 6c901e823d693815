//! Word-level timing estimation and its on-disk sidecar format.
//!
//! Timing records are estimated from the aggregate audio duration and the
//! word count (equal split). This is a documented approximation, not
//! phoneme-accurate; the [`TimingSource`] trait is the seam through which a
//! synthesis provider's native word timestamps can be dropped in later
//! without changing any downstream contract.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};

/// Suffix appended to the audio file stem to form the sidecar file name.
pub const SIDECAR_SUFFIX: &str = "_timings.json";

/// Timing record for a single spoken word, in seconds relative to the start
/// of the owning audio segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// A source of word timings for a synthesized clip.
///
/// Implementations must return records covering `[0, audio_duration]` in
/// non-decreasing start order, one per spoken word. Callers must not assume
/// the shipped equal-split behavior.
#[async_trait]
pub trait TimingSource: Send + Sync {
    async fn word_timings(&self, text: &str, audio_duration: f64) -> Result<Vec<WordTiming>>;
}

/// Equal-split estimator: distributes the total duration evenly over the
/// whitespace-delimited word tokens.
pub struct EqualSplitTiming;

#[async_trait]
impl TimingSource for EqualSplitTiming {
    async fn word_timings(&self, text: &str, audio_duration: f64) -> Result<Vec<WordTiming>> {
        estimate_word_timings(text, audio_duration)
    }
}

/// Estimate word timings by splitting `audio_duration` evenly across the
/// word tokens of `text` (punctuation stays attached to its word).
///
/// Each word's end is the next word's start; the final word ends at exactly
/// `audio_duration` so floating-point drift never leaves a gap at the tail.
/// Empty text yields an empty sequence. A non-positive duration is rejected:
/// there is no time to distribute.
pub fn estimate_word_timings(text: &str, audio_duration: f64) -> Result<Vec<WordTiming>> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Ok(Vec::new());
    }
    if !audio_duration.is_finite() || audio_duration <= 0.0 {
        return Err(PipelineError::InputValidation(format!(
            "audio duration must be positive, got {audio_duration}"
        )));
    }

    let per_word = audio_duration / words.len() as f64;
    let count = words.len();
    let timings = words
        .into_iter()
        .enumerate()
        .map(|(i, word)| WordTiming {
            word: word.to_string(),
            start: i as f64 * per_word,
            end: if i + 1 == count {
                audio_duration
            } else {
                (i + 1) as f64 * per_word
            },
        })
        .collect();
    Ok(timings)
}

/// Sidecar path for an audio asset: the audio extension is replaced by
/// `_timings.json` (`mp3/title.mp3` -> `mp3/title_timings.json`).
pub fn sidecar_path(audio_path: &Path) -> PathBuf {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    audio_path.with_file_name(format!("{stem}{SIDECAR_SUFFIX}"))
}

/// Write a timing sequence to its sidecar file atomically.
///
/// The JSON is written to a temporary file in the same directory and renamed
/// into place, so a crash never leaves a truncated sidecar that a later
/// stage would parse successfully but incorrectly.
pub fn save_word_timings(timings: &[WordTiming], path: &Path) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut tmp = match dir {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new_in(".")?,
    };
    serde_json::to_writer_pretty(&mut tmp, timings)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| PipelineError::Io(e.error))?;
    Ok(())
}

/// Read a timing sequence back from a sidecar file.
///
/// Malformed JSON is an input validation error: the sidecar is an input to
/// the timeline stage and a bad one must stop the run before compositing.
pub fn load_word_timings(path: &Path) -> Result<Vec<WordTiming>> {
    let data = fs::read_to_string(path)?;
    serde_json::from_str(&data).map_err(|e| {
        PipelineError::InputValidation(format!(
            "malformed timing sidecar {}: {e}",
            path.display()
        ))
    })
}

/// Merge per-part timing sequences from a split clip into one sequence,
/// shifting each part by the running offset plus `gap` seconds of silence
/// between parts.
pub fn merge_word_timings(parts: &[Vec<WordTiming>], gap: f64) -> Vec<WordTiming> {
    let mut merged: Vec<WordTiming> = Vec::new();
    let mut offset = 0.0;
    for part in parts {
        if part.is_empty() {
            continue;
        }
        for timing in part {
            merged.push(WordTiming {
                word: timing.word.clone(),
                start: timing.start + offset,
                end: timing.end + offset,
            });
        }
        // Next part starts after this one's last word plus the silence gap.
        offset = merged.last().map(|t| t.end).unwrap_or(0.0) + gap;
    }
    merged
}
