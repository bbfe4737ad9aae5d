//! Turns an ordered list of illustrated, narrated story parts into a
//! single MP4: each part's image is held on screen for exactly as long as
//! its narration plays, the narration clips are concatenated into one
//! audio track, and both tracks are muxed into a faststart container held
//! in memory.
//!
//! [`VideoAssembler`] is the entry point. It is generic over an
//! [`EncodingSystem`] so the orchestration can be exercised without real
//! codecs; [`SoftwareEncodingSystem`] is the production implementation
//! built on openh264, fdk-aac and muxide.

pub mod assembler;
pub mod audio;
pub mod decode;
pub mod fetch;
pub mod frames;
pub mod mux;
pub mod video;

pub use assembler::{AssemblyOptions, AssemblyState, CancelToken, StoryPart, VideoAssembler};
pub use fetch::{MediaFetcher, MediaRef};
pub use storyreel_common::{
    AssemblyResult, AssemblyStats, AudioEncoderOptions, EncodingSystem, Error, ErrorCategory,
    MediaKind, ResourceGauge, Result, TrackKind, VideoEncoderOptions,
};

use crate::audio::AacEncoder;
use crate::mux::Mp4Muxer;
use crate::video::H264Encoder;

/// The software codec stack: H.264 via openh264, AAC-LC via fdk-aac, MP4
/// via muxide. Everything runs in-process with no hardware dependencies.
pub struct SoftwareEncodingSystem {
    video_options: VideoEncoderOptions,
    audio_options: AudioEncoderOptions,
}

impl EncodingSystem for SoftwareEncodingSystem {
    type VideoEncoderType = H264Encoder;
    type AudioEncoderType = AacEncoder;
    type MuxerType = Mp4Muxer;

    fn new(
        video_options: &VideoEncoderOptions,
        audio_options: &AudioEncoderOptions,
    ) -> Result<Self> {
        Ok(Self {
            video_options: *video_options,
            audio_options: *audio_options,
        })
    }

    fn new_video_encoder(&self, gauge: &ResourceGauge) -> Result<H264Encoder> {
        H264Encoder::new(&self.video_options, gauge)
    }

    fn new_audio_encoder(&self, gauge: &ResourceGauge) -> Result<AacEncoder> {
        AacEncoder::new(&self.audio_options, gauge)
    }

    fn new_muxer(&self, gauge: &ResourceGauge) -> Result<Mp4Muxer> {
        Mp4Muxer::new(&self.video_options, &self.audio_options, gauge)
    }
}
