//! Caption overlay generation: compiles the overlay schedule into ffmpeg
//! drawtext filters with explicit enable/disable windows.
//!
//! The output is a finite ordered list; the renderer never evaluates
//! per-frame logic for captions.

use serde::{Deserialize, Serialize};

use crate::config::CaptionStyle;
use crate::timeline::OverlayEvent;
use crate::timing::WordTiming;

/// Floor on the computed caption font size, in pixels.
const MIN_FONT_SIZE: u32 = 30;

/// One declarative timed text-draw instruction, resolved against a concrete
/// frame size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawTextInstruction {
    /// Caption text state (unescaped).
    pub text: String,
    pub enable_from: f64,
    pub enable_until: f64,
    /// Horizontal position expression; captions are centered.
    pub x: String,
    /// Vertical position in pixels.
    pub y: u32,
    pub font_size: u32,
}

/// Resolve the overlay schedule against a target resolution.
///
/// Layout policy is deterministic: horizontal center, vertical anchor at
/// `position_fraction` of the frame height, font size scaled by `font_scale`
/// with a 30px floor so low resolutions stay legible.
pub fn compile_overlay(
    events: &[OverlayEvent],
    width: u32,
    height: u32,
    style: &CaptionStyle,
) -> Vec<DrawTextInstruction> {
    let _ = width; // captions are centered; only height drives the layout
    let font_size = ((height as f64 * style.font_scale) as u32).max(MIN_FONT_SIZE);
    let y = (height as f64 * style.position_fraction) as u32;

    events
        .iter()
        .map(|event| DrawTextInstruction {
            text: event.text.clone(),
            enable_from: event.visible_from,
            enable_until: event.visible_until,
            x: "(w-text_w)/2".to_string(),
            y,
            font_size,
        })
        .collect()
}

/// Render the instructions as ffmpeg `drawtext` filter strings, in schedule
/// order.
pub fn drawtext_filters(
    events: &[OverlayEvent],
    width: u32,
    height: u32,
    style: &CaptionStyle,
) -> Vec<String> {
    compile_overlay(events, width, height, style)
        .iter()
        .map(|instruction| {
            let mut filter = format!(
                "drawtext=text='{}':fontsize={}:fontcolor={}:x={}:y={}",
                escape_drawtext(&instruction.text),
                instruction.font_size,
                style.font_color,
                instruction.x,
                instruction.y,
            );
            if let Some(font_file) = &style.font_file {
                filter.push_str(&format!(":fontfile={}", font_file.display()));
            }
            filter.push_str(&format!(
                ":box=1:boxcolor=black@{:.2}:boxborderw=10:enable='between(t,{:.3},{:.3})'",
                style.box_opacity, instruction.enable_from, instruction.enable_until,
            ));
            filter
        })
        .collect()
}

/// The caption text visible at playback time `t`: every word whose start
/// time has passed, joined in order.
pub fn visible_text_at(timings: &[WordTiming], t: f64) -> String {
    timings
        .iter()
        .filter(|timing| timing.start <= t)
        .map(|timing| timing.word.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape characters that break out of a quoted drawtext text value.
fn escape_drawtext(text: &str) -> String {
    text.replace('\'', r"'\\''")
        .replace(':', r"\:")
        .replace('%', r"\%")
}
