//! Codec-agnostic seams of the story-video assembly pipeline.
//!
//! Encoders are split into an input half (accepts raw frames or samples)
//! and an output half (yields compressed chunks); the muxer is split into
//! one input per track plus a completion handle that finalizes the
//! container. An [`EncodingSystem`] ties a matching set of implementations
//! together so the orchestrator can be tested against mock codecs.

use std::future::Future;
use std::sync::Arc;

pub mod error;
pub mod gauge;

pub use error::{Error, ErrorCategory, MediaKind, Result, TrackKind};
pub use gauge::{ResourceGauge, ResourceGuard};

/// One raw video frame. All frames derived from the same story part share
/// one pixel buffer; encoders must treat it as read-only.
#[derive(Clone)]
pub struct VideoFrameData {
    /// RGBA, exactly `width * height * 4` bytes.
    pub pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub timestamp_micros: u64,
    pub duration_micros: u64,
}

/// A run of interleaved PCM at the configured output rate and channel
/// count. `timestamp_in_samples` is the cumulative per-channel sample
/// count of everything submitted before this run.
#[derive(Clone)]
pub struct AudioSamples {
    pub data: Vec<i16>,
    pub timestamp_in_samples: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct VideoEncoderOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct AudioEncoderOptions {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: u32,
}

/// Terminal artifact of one assembly run. Ownership transfers to the
/// caller; the pipeline keeps nothing.
#[derive(Clone, Debug)]
pub struct AssemblyResult {
    pub container: Vec<u8>,
    pub mime_type: String,
    pub stats: AssemblyStats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AssemblyStats {
    pub video_chunks: u64,
    pub audio_chunks: u64,
    pub duration_secs: f64,
}

/// A unit of compressed output with timing metadata.
pub trait EncodedChunk {
    fn timestamp_micros(&self) -> u64;
    fn duration_micros(&self) -> u64;
    fn is_key(&self) -> bool;
}

pub trait Encoder {
    type InputType: EncoderInput + 'static;
    type OutputType: EncoderOutput + 'static;

    fn split(self) -> Result<(Self::InputType, Self::OutputType)>;
}

pub trait EncoderInput: Send + 'static {
    type Data: Send;

    /// Submit one unit of raw media. Submission order defines stream order.
    fn push(&mut self, data: Self::Data) -> impl Future<Output = Result<()>> + Send;

    /// Flush buffered state. After this resolves, the matching output half
    /// drains its remaining chunks and then yields `None`. Dropping the
    /// input half without calling `finish` discards in-flight state
    /// instead, which is the cancellation path.
    fn finish(self) -> impl Future<Output = Result<()>> + Send;
}

pub trait EncoderOutput: Send + 'static {
    type Data: EncodedChunk + Send;

    /// `None` means the encoder has flushed and no more chunks will come.
    fn pull(&mut self) -> impl Future<Output = Result<Option<Self::Data>>> + Send;
}

pub trait TrackInput: Send + 'static {
    type Data: Send;

    fn push(&mut self, data: Self::Data) -> impl Future<Output = Result<()>> + Send;
    fn finish(self) -> impl Future<Output = Result<()>> + Send;
}

pub trait CompletionHandle: Send + 'static {
    /// Must only be called after both track inputs have finished.
    fn finish(self) -> impl Future<Output = Result<AssemblyResult>> + Send;
}

pub trait ContainerMuxer {
    type VideoInputType: TrackInput + 'static;
    type AudioInputType: TrackInput + 'static;
    type CompletionHandleType: CompletionHandle + 'static;

    fn split(
        self,
    ) -> Result<(
        Self::VideoInputType,
        Self::AudioInputType,
        Self::CompletionHandleType,
    )>;
}

pub trait EncodingSystem: Sized {
    type VideoEncoderType: Encoder<InputType: EncoderInput<Data = VideoFrameData>>;
    type AudioEncoderType: Encoder<InputType: EncoderInput<Data = AudioSamples>>;
    type MuxerType: ContainerMuxer<
            VideoInputType: TrackInput<
                Data = <<Self::VideoEncoderType as Encoder>::OutputType as EncoderOutput>::Data,
            >,
            AudioInputType: TrackInput<
                Data = <<Self::AudioEncoderType as Encoder>::OutputType as EncoderOutput>::Data,
            >,
        >;

    fn new(video_options: &VideoEncoderOptions, audio_options: &AudioEncoderOptions)
    -> Result<Self>;
    fn new_video_encoder(&self, gauge: &ResourceGauge) -> Result<Self::VideoEncoderType>;
    fn new_audio_encoder(&self, gauge: &ResourceGauge) -> Result<Self::AudioEncoderType>;
    fn new_muxer(&self, gauge: &ResourceGauge) -> Result<Self::MuxerType>;
}
