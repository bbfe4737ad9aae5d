//! AAC-LC encoding on a dedicated worker thread, mirroring the video
//! side: interleaved PCM in, ADTS-framed access units out. Each unit
//! covers exactly 1024 per-channel samples, so the n-th unit sits at
//! `n * 1024 / sample_rate` regardless of how the input was batched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use fdk_aac::enc::{
    AudioObjectType, BitRate, ChannelMode, Encoder as FdkEncoder, EncoderParams, Transport,
};
use futures::StreamExt;
use futures::channel::mpsc as futures_mpsc;
use storyreel_common::{
    AudioEncoderOptions, AudioSamples, EncodedChunk, Encoder, EncoderInput, EncoderOutput, Error,
    ResourceGauge, Result, TrackKind,
};

pub mod resample;

/// Per-channel samples covered by one AAC access unit.
const SAMPLES_PER_AU: usize = 1024;

/// Upper bound on silent units fed at end of stream to drain the codec's
/// delay line.
const MAX_FLUSH_UNITS: u64 = 8;

#[derive(Clone, Debug)]
pub struct AudioChunk {
    /// One ADTS-framed AAC-LC access unit.
    pub data: Vec<u8>,
    pub timestamp_micros: u64,
    pub duration_micros: u64,
}

impl EncodedChunk for AudioChunk {
    fn timestamp_micros(&self) -> u64 {
        self.timestamp_micros
    }

    fn duration_micros(&self) -> u64 {
        self.duration_micros
    }

    fn is_key(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct AacEncoder {
    input: AacEncoderInput,
    output: AacEncoderOutput,
}

#[derive(Debug)]
pub struct AacEncoderInput {
    sample_tx: Option<std_mpsc::Sender<AudioSamples>>,
    worker: Option<JoinHandle<Result<()>>>,
    discard: Arc<AtomicBool>,
}

#[derive(Debug)]
pub struct AacEncoderOutput {
    chunk_rx: futures_mpsc::UnboundedReceiver<Result<AudioChunk>>,
}

impl AacEncoder {
    pub fn new(options: &AudioEncoderOptions, gauge: &ResourceGauge) -> Result<Self> {
        let channel_mode = match options.channels {
            1 => ChannelMode::Mono,
            2 => ChannelMode::Stereo,
            other => {
                return Err(Error::Configuration {
                    reason: format!("unsupported channel count {other}"),
                });
            }
        };
        if options.sample_rate == 0 {
            return Err(Error::Configuration {
                reason: "sample rate must be positive".to_string(),
            });
        }

        let (sample_tx, sample_rx) = std_mpsc::channel();
        let (chunk_tx, chunk_rx) = futures_mpsc::unbounded();
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let discard = Arc::new(AtomicBool::new(false));
        let worker_discard = Arc::clone(&discard);
        let guard = gauge.acquire("aac-encoder");
        let options = *options;

        let worker = std::thread::Builder::new()
            .name("storyreel-aac".to_string())
            .spawn(move || {
                let _guard = guard;
                let encoder = match build_encoder(&options, channel_mode) {
                    Ok(encoder) => {
                        let _ = ready_tx.send(Ok(()));
                        encoder
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.clone()));
                        return Err(err);
                    }
                };
                let mut worker = AacWorker {
                    encoder,
                    pending: Vec::new(),
                    submitted_units: 0,
                    emitted: 0,
                    sample_rate: options.sample_rate,
                    channels: options.channels,
                    chunk_tx,
                };
                let result = worker.run(&sample_rx, &worker_discard);
                if let Err(err) = &result {
                    let _ = worker.chunk_tx.unbounded_send(Err(err.clone()));
                }
                result
            })
            .map_err(|e| Error::Configuration {
                reason: format!("failed to spawn aac worker: {e}"),
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
                    reason: "aac worker exited during startup".to_string(),
                });
            }
        }

        Ok(Self {
            input: AacEncoderInput {
                sample_tx: Some(sample_tx),
                worker: Some(worker),
                discard,
            },
            output: AacEncoderOutput { chunk_rx },
        })
    }
}

fn build_encoder(options: &AudioEncoderOptions, channels: ChannelMode) -> Result<FdkEncoder> {
    // ADTS framing: the muxer validates the syncword on every audio frame.
    FdkEncoder::new(EncoderParams {
        bit_rate: BitRate::Cbr(options.bitrate),
        sample_rate: options.sample_rate,
        transport: Transport::Adts,
        channels,
        audio_object_type: AudioObjectType::Mpeg4LowComplexity,
    })
    .map_err(|e| Error::Configuration {
        reason: format!("aac encoder: {e:?}"),
    })
}

struct AacWorker {
    encoder: FdkEncoder,
    /// Interleaved samples not yet grouped into a full access unit.
    pending: Vec<i16>,
    submitted_units: u64,
    emitted: u64,
    sample_rate: u32,
    channels: u32,
    chunk_tx: futures_mpsc::UnboundedSender<Result<AudioChunk>>,
}

impl AacWorker {
    fn run(
        &mut self,
        sample_rx: &std_mpsc::Receiver<AudioSamples>,
        discard: &AtomicBool,
    ) -> Result<()> {
        while let Ok(samples) = sample_rx.recv() {
            if discard.load(Ordering::SeqCst) {
                return Ok(());
            }
            self.pending.extend_from_slice(&samples.data);
            self.drain_full_units()?;
        }
        if discard.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.flush_tail()
    }

    fn au_len(&self) -> usize {
        SAMPLES_PER_AU * self.channels as usize
    }

    fn drain_full_units(&mut self) -> Result<()> {
        let au_len = self.au_len();
        while self.pending.len() >= au_len {
            let unit: Vec<i16> = self.pending.drain(..au_len).collect();
            self.encode_unit(&unit)?;
        }
        Ok(())
    }

    fn flush_tail(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            let au_len = self.au_len();
            self.pending.resize(au_len, 0);
            self.drain_full_units()?;
        }
        // The codec holds a couple of units of lookahead. Feed silence
        // until everything submitted so far has come back out.
        let target = self.submitted_units;
        let silence = vec![0i16; self.au_len()];
        for _ in 0..MAX_FLUSH_UNITS {
            if self.emitted >= target {
                break;
            }
            self.encode_unit(&silence)?;
        }
        Ok(())
    }

    fn encode_unit(&mut self, unit: &[i16]) -> Result<()> {
        self.submitted_units += 1;
        let mut out = vec![0u8; 2048 * self.channels as usize];
        let mut consumed = 0;
        while consumed < unit.len() {
            let info = self
                .encoder
                .encode(&unit[consumed..], &mut out)
                .map_err(|e| Error::Encode {
                    track: TrackKind::Audio,
                    reason: format!("{e:?}"),
                })?;
            if info.input_consumed == 0 && info.output_size == 0 {
                break;
            }
            consumed += info.input_consumed;
            if info.output_size > 0 {
                self.emit(out[..info.output_size].to_vec());
            }
        }
        Ok(())
    }

    fn emit(&mut self, data: Vec<u8>) {
        let rate = self.sample_rate as u64;
        let start = self.emitted * SAMPLES_PER_AU as u64;
        let chunk = AudioChunk {
            data,
            timestamp_micros: start * 1_000_000 / rate,
            duration_micros: SAMPLES_PER_AU as u64 * 1_000_000 / rate,
        };
        self.emitted += 1;
        // A closed receiver just means the run is being torn down.
        let _ = self.chunk_tx.unbounded_send(Ok(chunk));
    }
}

impl Encoder for AacEncoder {
    type InputType = AacEncoderInput;
    type OutputType = AacEncoderOutput;

    fn split(self) -> Result<(Self::InputType, Self::OutputType)> {
        Ok((self.input, self.output))
    }
}

impl AacEncoderInput {
    fn worker_error(&mut self) -> Error {
        match self.worker.take().map(JoinHandle::join) {
            Some(Ok(Err(err))) => err,
            Some(Err(_)) => Error::Encode {
                track: TrackKind::Audio,
                reason: "encoder worker panicked".to_string(),
            },
            _ => Error::Encode {
                track: TrackKind::Audio,
                reason: "encoder worker stopped unexpectedly".to_string(),
            },
        }
    }
}

impl EncoderInput for AacEncoderInput {
    type Data = AudioSamples;

    async fn push(&mut self, data: AudioSamples) -> Result<()> {
        let Some(tx) = self.sample_tx.as_ref() else {
            return Err(Error::Encode {
                track: TrackKind::Audio,
                reason: "encoder input already finished".to_string(),
            });
        };
        if tx.send(data).is_err() {
            return Err(self.worker_error());
        }
        Ok(())
    }

    async fn finish(mut self) -> Result<()> {
        self.sample_tx = None;
        match self.worker.take() {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(Error::Encode {
                    track: TrackKind::Audio,
                    reason: "encoder worker panicked".to_string(),
                }),
            },
            None => Ok(()),
        }
    }
}

impl Drop for AacEncoderInput {
    fn drop(&mut self) {
        self.discard.store(true, Ordering::SeqCst);
        self.sample_tx = None;
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl EncoderOutput for AacEncoderOutput {
    type Data = AudioChunk;

    async fn pull(&mut self) -> Result<Option<AudioChunk>> {
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

    fn options() -> AudioEncoderOptions {
        AudioEncoderOptions {
            sample_rate: 44_100,
            channels: 1,
            bitrate: 128_000,
        }
    }

    fn sine(samples: usize) -> Vec<i16> {
        (0..samples)
            .map(|i| {
                let t = i as f32 / 44_100.0;
                ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 16_000.0) as i16
            })
            .collect()
    }

    #[test]
    fn three_channels_are_a_configuration_error() {
        let gauge = ResourceGauge::new();
        let err = AacEncoder::new(
            &AudioEncoderOptions {
                sample_rate: 44_100,
                channels: 3,
                bitrate: 128_000,
            },
            &gauge,
        )
        .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert_eq!(gauge.live(), 0);
    }

    #[tokio::test]
    async fn one_second_of_audio_covers_one_second_of_chunks() {
        let gauge = ResourceGauge::new();
        let encoder = AacEncoder::new(&options(), &gauge).unwrap();
        let (mut input, mut output) = encoder.split().unwrap();

        input
            .push(AudioSamples {
                data: sine(44_100),
                timestamp_in_samples: 0,
            })
            .await
            .unwrap();
        input.finish().await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = output.pull().await.unwrap() {
            chunks.push(chunk);
        }
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| !c.data.is_empty()));
        // Every access unit carries an ADTS header.
        assert!(
            chunks
                .iter()
                .all(|c| c.data[0] == 0xFF && c.data[1] & 0xF0 == 0xF0)
        );

        // Timestamps advance by exactly one access unit.
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(
                chunk.timestamp_micros,
                i as u64 * 1024 * 1_000_000 / 44_100
            );
        }
        // The covered span reaches the full second; padding may overshoot
        // by up to two units.
        let covered = chunks.len() as u64 * 1024;
        assert!(covered >= 44_100, "covered only {covered} samples");
        assert!(covered < 44_100 + 3 * 1024);

        drop(output);
        assert_eq!(gauge.live(), 0);
    }

    #[tokio::test]
    async fn batching_does_not_change_chunk_timing() {
        let gauge = ResourceGauge::new();
        let pcm = sine(10_000);

        let mut runs = Vec::new();
        for batch in [1_000usize, 10_000] {
            let encoder = AacEncoder::new(&options(), &gauge).unwrap();
            let (mut input, mut output) = encoder.split().unwrap();
            let mut submitted = 0u64;
            for slice in pcm.chunks(batch) {
                input
                    .push(AudioSamples {
                        data: slice.to_vec(),
                        timestamp_in_samples: submitted,
                    })
                    .await
                    .unwrap();
                submitted += slice.len() as u64;
            }
            input.finish().await.unwrap();

            let mut timestamps = Vec::new();
            while let Some(chunk) = output.pull().await.unwrap() {
                timestamps.push(chunk.timestamp_micros);
            }
            runs.push(timestamps);
        }
        assert_eq!(runs[0], runs[1]);
        assert_eq!(gauge.live(), 0);
    }

    #[tokio::test]
    async fn dropping_the_input_discards_and_releases() {
        let gauge = ResourceGauge::new();
        let encoder = AacEncoder::new(&options(), &gauge).unwrap();
        let (mut input, output) = encoder.split().unwrap();
        input
            .push(AudioSamples {
                data: sine(4096),
                timestamp_in_samples: 0,
            })
            .await
            .unwrap();

        drop(input);
        drop(output);
        assert_eq!(gauge.live(), 0);
    }
}
