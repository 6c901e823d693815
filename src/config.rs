//! Configuration surface consumed by the pipeline.
//!
//! The crate does not load configuration files itself; callers deserialize
//! these structures from whatever source they own and pass them in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default ceiling on concurrent ffprobe invocations.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 10;

/// Caption layout and styling.
///
/// All values are resolution-independent: pixel positions and font sizes are
/// derived from the target frame height at overlay-generation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptionStyle {
    /// Vertical anchor of the caption line as a fraction of frame height
    /// (0.0 = top, 1.0 = bottom).
    pub position_fraction: f64,
    /// Font size as a fraction of frame height. A floor of 30px is applied
    /// so captions stay legible at low resolutions.
    pub font_scale: f64,
    /// Opacity of the contrast box drawn behind the caption text (0.0 - 1.0).
    pub box_opacity: f64,
    /// Text color, any ffmpeg color name or hex value.
    pub font_color: String,
    /// Optional font file forwarded to the drawtext filter.
    pub font_file: Option<PathBuf>,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            position_fraction: 0.70,
            font_scale: 1.0 / 30.0,
            box_opacity: 0.70,
            font_color: "white".to_string(),
            font_file: None,
        }
    }
}

/// Encoding parameters forwarded to ffmpeg unmodified.
///
/// The pipeline treats this as an opaque bundle; it does not interpret the
/// values beyond turning them into command-line arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeParams {
    /// Video codec (`-c:v`).
    pub video_codec: String,
    /// Video bitrate (`-b:v`).
    pub video_bitrate: String,
    /// Audio bitrate (`-b:a`).
    pub audio_bitrate: String,
    /// Encoder thread count (`-threads`); 0 lets ffmpeg decide.
    pub threads: usize,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            video_bitrate: "20M".to_string(),
            audio_bitrate: "192k".to_string(),
            threads: 0,
        }
    }
}

impl EncodeParams {
    /// Render the bundle as ffmpeg output arguments.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-c:v".to_string(),
            self.video_codec.clone(),
            "-b:v".to_string(),
            self.video_bitrate.clone(),
            "-b:a".to_string(),
            self.audio_bitrate.clone(),
        ];
        if self.threads > 0 {
            args.push("-threads".to_string());
            args.push(self.threads.to_string());
        }
        args
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Generate word-synced caption overlays and timing sidecars.
    pub captions_enabled: bool,
    /// Caption styling, used only when captions are enabled.
    pub caption_style: CaptionStyle,
    /// Encoding parameter bundle, forwarded unmodified.
    pub encode: EncodeParams,
    /// Fixed silence inserted between segments on the timeline, in seconds.
    pub inter_segment_gap: f64,
    /// Ceiling on concurrent duration probes.
    pub probe_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            captions_enabled: true,
            caption_style: CaptionStyle::default(),
            encode: EncodeParams::default(),
            inter_segment_gap: 0.0,
            probe_concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }
}
