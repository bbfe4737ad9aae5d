//! Derives the video frame plan for one story part: how many frames the
//! narration covers and where each one sits on the global timeline.
//!
//! Timing is defined by pure functions over the prefix of prior part
//! durations rather than a mutated counter, so the arithmetic is testable
//! in isolation. Frame counts truncate (`floor`), losing up to `1/fps`
//! seconds per part; that drift is accepted by design and never corrected.

use std::sync::Arc;

use storyreel_common::VideoFrameData;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// `floor(duration * fps)`. A part shorter than `1/fps` yields zero frames
/// and its image never appears; its audio still runs for its full length.
pub fn frame_count(duration_seconds: f64, fps: u32) -> u64 {
    if duration_seconds <= 0.0 {
        return 0;
    }
    (duration_seconds * fps as f64).floor() as u64
}

pub fn frame_duration_micros(fps: u32) -> u64 {
    (MICROS_PER_SECOND / fps as f64).round() as u64
}

/// Timestamp of frame `index` relative to the start of its part.
pub fn frame_timestamp_micros(index: u64, fps: u32) -> u64 {
    (index as f64 / fps as f64 * MICROS_PER_SECOND).round() as u64
}

/// Cumulative timeline offset for a part, from the durations of all parts
/// before it.
pub fn part_offset_micros(prior_durations_seconds: &[f64]) -> u64 {
    let total: f64 = prior_durations_seconds.iter().sum();
    (total * MICROS_PER_SECOND).round() as u64
}

/// A restartable, lazy sequence of frames for one part. Every yielded
/// frame shares the same pixel buffer.
pub struct FrameSource {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    fps: u32,
    count: u64,
    offset_micros: u64,
}

impl FrameSource {
    pub fn new(
        pixels: Arc<[u8]>,
        width: u32,
        height: u32,
        duration_seconds: f64,
        fps: u32,
        offset_micros: u64,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            fps,
            count: frame_count(duration_seconds, fps),
            offset_micros,
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.count
    }

    pub fn frames(&self) -> impl Iterator<Item = VideoFrameData> + '_ {
        let duration = frame_duration_micros(self.fps);
        (0..self.count).map(move |index| VideoFrameData {
            pixels: Arc::clone(&self.pixels),
            width: self.width,
            height: self.height,
            timestamp_micros: self.offset_micros + frame_timestamp_micros(index, self.fps),
            duration_micros: duration,
        })
    }
}
