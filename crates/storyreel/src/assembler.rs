//! The assembly orchestrator: fetch and decode every part, replay each
//! image for the length of its narration, encode both tracks, and mux
//! them into one MP4. Parts are processed in submission order and both
//! encoders are flushed before anything reaches the muxer.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use storyreel_common::{
    AssemblyResult, AudioEncoderOptions, AudioSamples, CompletionHandle, ContainerMuxer,
    Encoder, EncoderInput, EncoderOutput, EncodingSystem, Error, MediaKind, ResourceGauge,
    Result, TrackInput, VideoEncoderOptions,
};

use crate::SoftwareEncodingSystem;
use crate::audio::resample::{interleave_i16, resample_linear};
use crate::decode::{decode_audio, decode_image};
use crate::fetch::{MediaFetcher, MediaRef};
use crate::frames::{FrameSource, part_offset_micros};

/// One ordered story part: an illustration shown for as long as its
/// narration plays. `text` is the narration transcript, carried through
/// untouched for callers that subtitle or log the result.
#[derive(Clone, Debug)]
pub struct StoryPart {
    pub image: MediaRef,
    pub audio: MediaRef,
    pub text: String,
}

#[derive(Clone, Copy, Debug)]
pub struct AssemblyOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate: u32,
    pub audio_bitrate: u32,
    pub sample_rate: u32,
    pub channel_count: u32,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 24,
            video_bitrate: 2_000_000,
            audio_bitrate: 128_000,
            sample_rate: 44_100,
            channel_count: 1,
        }
    }
}

impl AssemblyOptions {
    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(Error::Configuration { reason });
        if self.width == 0 || self.height == 0 || self.width % 2 != 0 || self.height % 2 != 0 {
            return invalid(format!(
                "dimensions must be positive and even, got {}x{}",
                self.width, self.height
            ));
        }
        if self.fps == 0 {
            return invalid("fps must be positive".to_string());
        }
        if self.video_bitrate == 0 || self.audio_bitrate == 0 {
            return invalid("bitrates must be positive".to_string());
        }
        if self.sample_rate == 0 {
            return invalid("sample rate must be positive".to_string());
        }
        if !(1..=2).contains(&self.channel_count) {
            return invalid(format!(
                "channel count must be 1 or 2, got {}",
                self.channel_count
            ));
        }
        Ok(())
    }

    fn video_encoder_options(&self) -> VideoEncoderOptions {
        VideoEncoderOptions {
            width: self.width,
            height: self.height,
            fps: self.fps,
            bitrate: self.video_bitrate,
        }
    }

    fn audio_encoder_options(&self) -> AudioEncoderOptions {
        AudioEncoderOptions {
            sample_rate: self.sample_rate,
            channels: self.channel_count,
            bitrate: self.audio_bitrate,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssemblyState {
    Idle,
    Fetching,
    Encoding,
    Muxing,
    Done,
    Failed,
}

/// Cooperative cancellation flag, checked between parts and between
/// frames. Cloned freely; any clone can cancel.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct PreparedPart {
    pixels: Arc<[u8]>,
    /// Mono PCM already at the output sample rate.
    samples: Vec<f32>,
    duration_seconds: f64,
}

#[derive(Debug)]
pub struct VideoAssembler<S: EncodingSystem = SoftwareEncodingSystem> {
    options: AssemblyOptions,
    cancel: CancelToken,
    gauge: ResourceGauge,
    state: Mutex<AssemblyState>,
    _system: PhantomData<S>,
}

impl<S: EncodingSystem> VideoAssembler<S> {
    /// Validates the options up front; no media work starts with a bad
    /// configuration.
    pub fn new(options: AssemblyOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            cancel: CancelToken::new(),
            gauge: ResourceGauge::new(),
            state: Mutex::new(AssemblyState::Idle),
            _system: PhantomData,
        })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn resource_gauge(&self) -> &ResourceGauge {
        &self.gauge
    }

    pub fn state(&self) -> AssemblyState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: AssemblyState) {
        tracing::debug!(?state, "assembly state");
        *self.state.lock().unwrap() = state;
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Assemble `parts` into a single MP4. The same assembler may run
    /// repeatedly; each call builds and tears down its own codecs.
    pub async fn assemble(&self, parts: &[StoryPart]) -> Result<AssemblyResult> {
        let result = self.run(parts).await;
        match &result {
            Ok(out) => {
                self.set_state(AssemblyState::Done);
                tracing::info!(
                    video_chunks = out.stats.video_chunks,
                    audio_chunks = out.stats.audio_chunks,
                    duration_secs = out.stats.duration_secs,
                    bytes = out.container.len(),
                    "assembly finished"
                );
            }
            Err(err) => {
                self.set_state(AssemblyState::Failed);
                tracing::warn!(%err, "assembly failed");
            }
        }
        result
    }

    async fn run(&self, parts: &[StoryPart]) -> Result<AssemblyResult> {
        if parts.is_empty() {
            return Err(Error::EmptyInput);
        }

        let video_options = self.options.video_encoder_options();
        let audio_options = self.options.audio_encoder_options();
        let system = S::new(&video_options, &audio_options)?;
        let (mut video_in, mut video_out) = system.new_video_encoder(&self.gauge)?.split()?;
        let (mut audio_in, mut audio_out) = system.new_audio_encoder(&self.gauge)?.split()?;
        let (mut video_track, mut audio_track, completion) =
            system.new_muxer(&self.gauge)?.split()?;

        self.set_state(AssemblyState::Fetching);
        tracing::info!(parts = parts.len(), "assembly started");
        let fetcher = MediaFetcher::new(&self.gauge);
        let mut prepared = Vec::with_capacity(parts.len());
        for (index, part) in parts.iter().enumerate() {
            self.check_cancelled()?;
            let image_bytes = fetcher.fetch(index, MediaKind::Image, &part.image).await?;
            let audio_bytes = fetcher.fetch(index, MediaKind::Audio, &part.audio).await?;

            let pixels = decode_image(index, &image_bytes, self.options.width, self.options.height)?;
            let decoded = decode_audio(index, &audio_bytes)?;
            let samples =
                resample_linear(&decoded.samples, decoded.sample_rate, self.options.sample_rate);
            // Duration is measured after resampling, which is what the
            // encoder actually consumes.
            let duration_seconds = samples.len() as f64 / self.options.sample_rate as f64;
            tracing::debug!(part = index, duration_seconds, "part prepared");
            prepared.push(PreparedPart {
                pixels,
                samples,
                duration_seconds,
            });
        }
        drop(fetcher);

        self.set_state(AssemblyState::Encoding);
        let mut prior_durations = Vec::with_capacity(prepared.len());
        let mut submitted_samples = 0u64;
        let mut frames_emitted = 0u64;
        for (index, part) in prepared.iter().enumerate() {
            self.check_cancelled()?;
            // The first frame-bearing part is anchored at zero: its image
            // extends backward over any leading frameless audio, since
            // video must not start after audio in the container.
            let offset_micros = if frames_emitted == 0 {
                0
            } else {
                part_offset_micros(&prior_durations)
            };
            let source = FrameSource::new(
                Arc::clone(&part.pixels),
                self.options.width,
                self.options.height,
                part.duration_seconds,
                self.options.fps,
                offset_micros,
            );
            tracing::debug!(
                part = index,
                frames = source.frame_count(),
                offset_micros,
                "encoding part"
            );
            for frame in source.frames() {
                self.check_cancelled()?;
                video_in.push(frame).await?;
            }
            frames_emitted += source.frame_count();
            audio_in
                .push(AudioSamples {
                    data: interleave_i16(&part.samples, self.options.channel_count),
                    timestamp_in_samples: submitted_samples,
                })
                .await?;
            submitted_samples += part.samples.len() as u64;
            prior_durations.push(part.duration_seconds);
        }

        video_in.finish().await?;
        audio_in.finish().await?;

        self.set_state(AssemblyState::Muxing);
        self.check_cancelled()?;
        while let Some(chunk) = video_out.pull().await? {
            video_track.push(chunk).await?;
        }
        video_track.finish().await?;
        while let Some(chunk) = audio_out.pull().await? {
            audio_track.push(chunk).await?;
        }
        audio_track.finish().await?;

        completion.finish().await
    }
}
