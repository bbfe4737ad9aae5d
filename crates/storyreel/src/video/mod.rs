//! H.264 video encoding on a dedicated worker thread.
//!
//! The codec never crosses threads: frames go in through a channel to the
//! thread that owns the encoder, compressed chunks come back through
//! another. Dropping the input half without `finish` discards in-flight
//! state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use futures::StreamExt;
use futures::channel::mpsc as futures_mpsc;
use openh264::encoder::{
    Encoder as Openh264Encoder, EncoderConfig, FrameType, RateControlMode,
};
use storyreel_common::{
    EncodedChunk, Encoder, EncoderInput, EncoderOutput, Error, ResourceGauge, Result, TrackKind,
    VideoEncoderOptions, VideoFrameData,
};

use self::yuv::I420Frame;

mod yuv;

#[derive(Clone, Debug)]
pub struct VideoChunk {
    /// Annex-B H.264.
    pub data: Vec<u8>,
    pub timestamp_micros: u64,
    pub duration_micros: u64,
    pub is_key: bool,
}

impl EncodedChunk for VideoChunk {
    fn timestamp_micros(&self) -> u64 {
        self.timestamp_micros
    }

    fn duration_micros(&self) -> u64 {
        self.duration_micros
    }

    fn is_key(&self) -> bool {
        self.is_key
    }
}

#[derive(Debug)]
pub struct H264Encoder {
    input: H264EncoderInput,
    output: H264EncoderOutput,
}

#[derive(Debug)]
pub struct H264EncoderInput {
    frame_tx: Option<std_mpsc::Sender<VideoFrameData>>,
    worker: Option<JoinHandle<Result<()>>>,
    discard: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct H264EncoderOutput {
    chunk_rx: futures_mpsc::UnboundedReceiver<Result<VideoChunk>>,
}

impl H264Encoder {
    /// Builds the codec up front so unsupported parameters surface as a
    /// `Configuration` error before any media work starts.
    pub fn new(options: &VideoEncoderOptions, gauge: &ResourceGauge) -> Result<Self> {
        if options.width == 0 || options.height == 0 || options.width % 2 != 0
            || options.height % 2 != 0
        {
            return Err(Error::Configuration {
                reason: format!(
                    "video dimensions must be positive and even, got {}x{}",
                    options.width, options.height
                ),
            });
        }
        if options.fps == 0 {
            return Err(Error::Configuration {
                reason: "fps must be positive".to_string(),
            });
        }

        let (frame_tx, frame_rx) = std_mpsc::channel();
        let (chunk_tx, chunk_rx) = futures_mpsc::unbounded();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let discard = Arc::new(AtomicBool::new(false));
        let worker_discard = Arc::clone(&discard);
        let guard = gauge.acquire("h264-encoder");
        let options = *options;

        let worker = std::thread::Builder::new()
            .name("storyreel-h264".to_string())
            .spawn(move || {
                let _guard = guard;
                let encoder = match build_encoder(&options) {
                    Ok(encoder) => {
                        let _ = ready_tx.send(Ok(()));
                        encoder
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.clone()));
                        return Err(err);
                    }
                };
                let result = encode_loop(encoder, &frame_rx, &chunk_tx, &worker_discard);
                if let Err(err) = &result {
                    let _ = chunk_tx.unbounded_send(Err(err.clone()));
                }
                result
            })
            .map_err(|e| Error::Configuration {
                reason: format!("failed to spawn h264 worker: {e}"),
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(Error::Configuration {
                    reason: "h264 worker exited during startup".to_string(),
                });
            }
        }

        Ok(Self {
            input: H264EncoderInput {
                frame_tx: Some(frame_tx),
                worker: Some(worker),
                discard,
            },
            output: H264EncoderOutput { chunk_rx },
        })
    }
}

fn build_encoder(options: &VideoEncoderOptions) -> Result<Openh264Encoder> {
    // Skip-frames disabled so every submitted frame yields a chunk and the
    // muxed frame count stays equal to the computed one.
    let config = EncoderConfig::new(options.width, options.height)
        .set_bitrate_bps(options.bitrate)
        .max_frame_rate(options.fps as f32)
        .rate_control_mode(RateControlMode::Bitrate)
        .enable_skip_frame(false);
    Openh264Encoder::with_config(config).map_err(|e| Error::Configuration {
        reason: format!("h264 encoder: {e}"),
    })
}

fn encode_loop(
    mut encoder: Openh264Encoder,
    frame_rx: &std_mpsc::Receiver<VideoFrameData>,
    chunk_tx: &futures_mpsc::UnboundedSender<Result<VideoChunk>>,
    discard: &AtomicBool,
) -> Result<()> {
    while let Ok(frame) = frame_rx.recv() {
        if discard.load(Ordering::SeqCst) {
            return Ok(());
        }
        let yuv = I420Frame::from_rgba(&frame.pixels, frame.width, frame.height);
        let bitstream = encoder.encode(&yuv).map_err(|e| Error::Encode {
            track: TrackKind::Video,
            reason: e.to_string(),
        })?;
        let is_key = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = bitstream.to_vec();
        if data.is_empty() {
            continue;
        }
        let chunk = VideoChunk {
            data,
            timestamp_micros: frame.timestamp_micros,
            duration_micros: frame.duration_micros,
            is_key,
        };
        if chunk_tx.unbounded_send(Ok(chunk)).is_err() {
            // Output half is gone; nothing left to deliver to.
            return Ok(());
        }
    }
    Ok(())
}

impl Encoder for H264Encoder {
    type InputType = H264EncoderInput;
    type OutputType = H264EncoderOutput;

    fn split(self) -> Result<(Self::InputType, Self::OutputType)> {
        Ok((self.input, self.output))
    }
}

impl H264EncoderInput {
    fn worker_error(&mut self) -> Error {
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(err))) => err,
            Some(Err(_)) => Error::Encode {
                track: TrackKind::Video,
                reason: "encoder worker panicked".to_string(),
            },
            _ => Error::Encode {
                track: TrackKind::Video,
                reason: "encoder worker stopped unexpectedly".to_string(),
            },
        }
    }
}

impl EncoderInput for H264EncoderInput {
    type Data = VideoFrameData;

    async fn push(&mut self, data: VideoFrameData) -> Result<()> {
        let Some(tx) = self.frame_tx.as_ref() else {
            return Err(Error::Encode {
                track: TrackKind::Video,
                reason: "encoder input already finished".to_string(),
            });
        };
        if tx.send(data).is_err() {
            return Err(self.worker_error());
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        // Closing the channel lets the worker drain queued frames and exit.
        self.frame_tx = None;
        match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(Error::Encode {
                    track: TrackKind::Video,
                    reason: "encoder worker panicked".to_string(),
                }),
            },
            None => Ok(()),
        }
    }
}

impl Drop for H264EncoderInput {
    fn drop(&mut self) {
        self.discard.store(true, Ordering::SeqCst);
        self.frame_tx = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl EncoderOutput for H264EncoderOutput {
    type Data = VideoChunk;

    async fn pull(&mut self) -> Result<Option<VideoChunk>> {
        match self.chunk_rx.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyreel_common::ErrorCategory;

    fn options() -> VideoEncoderOptions {
        VideoEncoderOptions {
            width: 16,
            height: 16,
            fps: 24,
            bitrate: 200_000,
        }
    }

    fn solid_frame(timestamp_micros: u64) -> VideoFrameData {
        let pixels: Arc<[u8]> = [64u8, 128, 192, 255]
            .iter()
            .copied()
            .cycle()
            .take(16 * 16 * 4)
            .collect::<Vec<u8>>()
            .into();
        VideoFrameData {
            pixels,
            width: 16,
            height: 16,
            timestamp_micros,
            duration_micros: 41_667,
        }
    }

    #[test]
    fn odd_dimensions_are_a_configuration_error() {
        let gauge = ResourceGauge::new();
        let err = H264Encoder::new(
            &VideoEncoderOptions {
                width: 15,
                height: 16,
                fps: 24,
                bitrate: 200_000,
            },
            &gauge,
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(gauge.live(), 0);
    }

    #[tokio::test]
    async fn one_chunk_per_frame_with_timestamps_preserved() {
        let gauge = ResourceGauge::new();
        let encoder = H264Encoder::new(&options(), &gauge).unwrap();
        let (mut input, mut output) = encoder.split().unwrap();

        for i in 0..3u64 {
            input.push(solid_frame(i * 41_667)).await.unwrap();
        }
        input.finish().await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = output.pull().await.unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].is_key, "first frame must be an IDR");
        assert_eq!(
            chunks.iter().map(|c| c.timestamp_micros).collect::<Vec<_>>(),
            vec![0, 41_667, 83_334]
        );
        assert!(chunks.iter().all(|c| !c.data.is_empty()));

        drop(output);
        assert_eq!(gauge.live(), 0);
    }

    #[tokio::test]
    async fn dropping_the_input_discards_and_releases() {
        let gauge = ResourceGauge::new();
        let encoder = H264Encoder::new(&options(), &gauge).unwrap();
        let (mut input, output) = encoder.split().unwrap();
        input.push(solid_frame(0)).await.unwrap();

        drop(input);
        drop(output);
        assert_eq!(gauge.live(), 0);
    }
}
