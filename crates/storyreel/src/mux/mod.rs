//! MP4 muxing over an in-memory target. Chunks are appended to their
//! track in arrival order; the completion handle waits for both track
//! inputs to finish, rejects empty tracks, and only then finalizes the
//! container.

use std::io::Write;
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;
use muxide::api::{AacProfile, AudioCodec, Muxer, MuxerBuilder, VideoCodec};
use storyreel_common::{
    AssemblyResult, AssemblyStats, AudioEncoderOptions, CompletionHandle, ContainerMuxer, Error,
    ResourceGauge, ResourceGuard, Result, TrackInput, TrackKind, VideoEncoderOptions,
};

use crate::audio::AudioChunk;
use crate::video::VideoChunk;

const OUTPUT_MIME_TYPE: &str = "video/mp4";

/// Accumulates the serialized container; shared between the muxer and
/// the completion handle.
#[derive(Clone, Default)]
struct BlobTarget {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl BlobTarget {
    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.inner.lock().unwrap())
    }
}

impl Write for BlobTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

type SharedMuxer = Arc<Mutex<Option<Muxer<BlobTarget>>>>;

pub struct Mp4Muxer {
    video: Mp4VideoInput,
    audio: Mp4AudioInput,
    completion: Mp4CompletionHandle,
}

pub struct Mp4VideoInput {
    muxer: SharedMuxer,
    chunks: u64,
    finish_tx: Option<oneshot::Sender<u64>>,
}

pub struct Mp4AudioInput {
    muxer: SharedMuxer,
    chunks: u64,
    finish_tx: Option<oneshot::Sender<u64>>,
}

pub struct Mp4CompletionHandle {
    muxer: SharedMuxer,
    target: BlobTarget,
    video_done: oneshot::Receiver<u64>,
    audio_done: oneshot::Receiver<u64>,
    _guard: ResourceGuard,
}

impl Mp4Muxer {
    pub fn new(
        video_options: &VideoEncoderOptions,
        audio_options: &AudioEncoderOptions,
        gauge: &ResourceGauge,
    ) -> Result<Self> {
        let target = BlobTarget::default();
        let muxer = MuxerBuilder::new(target.clone())
            .video(
                VideoCodec::H264,
                video_options.width,
                video_options.height,
                video_options.fps as f64,
            )
            .audio(
                AudioCodec::Aac(AacProfile::Lc),
                audio_options.sample_rate,
                audio_options.channels as u16,
            )
            .with_fast_start(true)
            .build()
            .map_err(|e| Error::Configuration {
                reason: format!("muxer: {e}"),
            })?;
        let muxer: SharedMuxer = Arc::new(Mutex::new(Some(muxer)));

        let (video_finish_tx, video_done) = oneshot::channel();
        let (audio_finish_tx, audio_done) = oneshot::channel();

        Ok(Self {
            video: Mp4VideoInput {
                muxer: Arc::clone(&muxer),
                chunks: 0,
                finish_tx: Some(video_finish_tx),
            },
            audio: Mp4AudioInput {
                muxer: Arc::clone(&muxer),
                chunks: 0,
                finish_tx: Some(audio_finish_tx),
            },
            completion: Mp4CompletionHandle {
                muxer,
                target,
                video_done,
                audio_done,
                _guard: gauge.acquire("mp4-muxer"),
            },
        })
    }
}

impl ContainerMuxer for Mp4Muxer {
    type VideoInputType = Mp4VideoInput;
    type AudioInputType = Mp4AudioInput;
    type CompletionHandleType = Mp4CompletionHandle;

    fn split(
        self,
    ) -> Result<(
        Self::VideoInputType,
        Self::AudioInputType,
        Self::CompletionHandleType,
    )> {
        Ok((self.video, self.audio, self.completion))
    }
}

fn with_muxer<T, E: std::fmt::Display>(
    muxer: &SharedMuxer,
    f: impl FnOnce(&mut Muxer<BlobTarget>) -> std::result::Result<T, E>,
) -> Result<T> {
    let mut guard = muxer.lock().unwrap();
    let Some(muxer) = guard.as_mut() else {
        return Err(Error::Mux {
            reason: "muxer already finalized".to_string(),
        });
    };
    f(muxer).map_err(|e| Error::Mux {
        reason: e.to_string(),
    })
}

impl TrackInput for Mp4VideoInput {
    type Data = VideoChunk;

    async fn push(&mut self, chunk: VideoChunk) -> Result<()> {
        with_muxer(&self.muxer, |muxer| {
            muxer.write_video(
                chunk.timestamp_micros as f64 / 1e6,
                &chunk.data,
                chunk.is_key,
            )
        })?;
        self.chunks += 1;
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        if let Some(tx) = self.finish_tx.take() {
            let _ = tx.send(self.chunks);
        }
        Ok(())
    }
}

impl TrackInput for Mp4AudioInput {
    type Data = AudioChunk;

    async fn push(&mut self, chunk: AudioChunk) -> Result<()> {
        with_muxer(&self.muxer, |muxer| {
            muxer.write_audio(chunk.timestamp_micros as f64 / 1e6, &chunk.data)
        })?;
        self.chunks += 1;
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        if let Some(tx) = self.finish_tx.take() {
            let _ = tx.send(self.chunks);
        }
        Ok(())
    }
}

impl CompletionHandle for Mp4CompletionHandle {
    async fn finish(self) -> Result<AssemblyResult> {
        let track_dropped = |track: TrackKind| {
            move |_| Error::Mux {
                reason: format!("{track} track dropped before finishing"),
            }
        };
        let video_chunks = self
            .video_done
            .await
            .map_err(track_dropped(TrackKind::Video))?;
        let audio_chunks = self
            .audio_done
            .await
            .map_err(track_dropped(TrackKind::Audio))?;

        if video_chunks == 0 {
            return Err(Error::EmptyTrack {
                track: TrackKind::Video,
            });
        }
        if audio_chunks == 0 {
            return Err(Error::EmptyTrack {
                track: TrackKind::Audio,
            });
        }

        let muxer = self.muxer.lock().unwrap().take().ok_or(Error::Mux {
            reason: "muxer already finalized".to_string(),
        })?;
        let stats = muxer.finish_with_stats().map_err(|e| Error::Mux {
            reason: e.to_string(),
        })?;
        tracing::debug!(
            video_chunks,
            audio_chunks,
            duration_secs = stats.duration_secs,
            bytes = stats.bytes_written,
            "container finalized"
        );

        Ok(AssemblyResult {
            container: self.target.take(),
            mime_type: OUTPUT_MIME_TYPE.to_string(),
            stats: AssemblyStats {
                video_chunks,
                audio_chunks,
                duration_secs: stats.duration_secs,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_common::ErrorCategory;

    fn muxer() -> (Mp4Muxer, ResourceGauge) {
        let gauge = ResourceGauge::new();
        let muxer = Mp4Muxer::new(
            &VideoEncoderOptions {
                width: 64,
                height: 64,
                fps: 24,
                bitrate: 500_000,
            },
            &AudioEncoderOptions {
                sample_rate: 44_100,
                channels: 1,
                bitrate: 128_000,
            },
            &gauge,
        )
        .unwrap();
        (muxer, gauge)
    }

    #[tokio::test]
    async fn finalize_with_empty_tracks_is_rejected() {
        let (muxer, gauge) = muxer();
        let (video, audio, completion) = muxer.split().unwrap();
        video.finish().await.unwrap();
        audio.finish().await.unwrap();

        let err = completion.finish().await.unwrap_err();
        assert_eq!(
            err,
            Error::EmptyTrack {
                track: TrackKind::Video
            }
        );
        assert_eq!(gauge.live(), 0);
    }

    #[tokio::test]
    async fn dropped_track_surfaces_as_mux_error() {
        let (muxer, gauge) = muxer();
        let (video, audio, completion) = muxer.split().unwrap();
        drop(video);
        audio.finish().await.unwrap();

        let err = completion.finish().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Muxing);
        assert_eq!(gauge.live(), 0);
    }

    #[tokio::test]
    async fn dropping_the_completion_handle_releases_the_muxer() {
        let (muxer, gauge) = muxer();
        let (video, audio, completion) = muxer.split().unwrap();
        assert_eq!(gauge.live(), 1);
        drop((video, audio, completion));
        assert_eq!(gauge.live(), 0);
    }
}
