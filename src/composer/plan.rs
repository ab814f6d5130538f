//! Timing decisions for a render, kept free of I/O.

use std::path::PathBuf;

use crate::records::{SubtitleSegment, SubtitleTrack, TIMING_EPSILON};

/// Share of the background a random start may fall into
const BACKGROUND_START_WINDOW: f64 = 0.8;

/// Everything the renderer needs to produce one video
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub title: String,
    pub background: PathBuf,
    pub audio: PathBuf,
    pub duration_secs: f64,

    /// Seek into the background before the first frame
    pub background_offset: f64,

    /// Background is shorter than the output and has to repeat
    pub loop_background: bool,
    pub images: Vec<ImageWindow>,
    pub captions: Vec<SubtitleSegment>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub font: Option<PathBuf>,
}

/// An overlay image and the window it is shown in
#[derive(Debug, Clone, PartialEq)]
pub struct ImageWindow {
    pub path: PathBuf,
    pub start: f64,
    pub end: f64,
}

/// Output length: the audio (or the configured minimum, if longer) rounded
/// up to a whole frame
pub fn output_duration(audio_secs: f64, min_secs: f64, fps: u32) -> f64 {
    let fps = f64::from(fps.max(1));
    let wanted = audio_secs.max(min_secs);
    let frames = (wanted * fps - TIMING_EPSILON).ceil().max(1.0);
    frames / fps
}

/// Where to start in the background, and whether it has to loop.
///
/// A background longer than the output starts at `fraction` of the way into
/// its allowed window (the first 80%, leaving room for the whole output).
/// A shorter one starts at zero and loops.
pub fn background_start(background_secs: f64, output_secs: f64, fraction: f64) -> (f64, bool) {
    if background_secs < output_secs {
        return (0.0, true);
    }

    let window = (background_secs * BACKGROUND_START_WINDOW).min(background_secs - output_secs);
    (window.max(0.0) * fraction.clamp(0.0, 1.0), false)
}

/// Consecutive equal windows covering `[0, duration)`, one per image
pub fn image_windows(paths: Vec<PathBuf>, duration: f64) -> Vec<ImageWindow> {
    if paths.is_empty() {
        return Vec::new();
    }

    let count = paths.len();
    let slot = duration / count as f64;
    paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| ImageWindow {
            path,
            start: slot * i as f64,
            end: if i + 1 == count { duration } else { slot * (i + 1) as f64 },
        })
        .collect()
}

/// First caption that falls outside `[0, duration]`, if any
pub fn out_of_bounds(track: &SubtitleTrack, duration: f64) -> Option<(usize, &SubtitleSegment)> {
    track.segments.iter().enumerate().find(|(_, s)| {
        !(s.start.is_finite() && s.end.is_finite())
            || s.start < -TIMING_EPSILON
            || s.end > duration + TIMING_EPSILON
            || s.start > s.end + TIMING_EPSILON
    })
}

/// Greedy word wrap at `width` characters
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + word.chars().count() + 1 > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
