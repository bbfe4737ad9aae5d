use std::io::Cursor;
use std::sync::Arc;

use image::imageops::FilterType;
use storyreel_common::{Error, MediaKind, Result};

/// Mono PCM decoded from a part's narration clip, at the source rate.
#[derive(Debug)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Rasterize an image payload into an RGBA buffer of exactly
/// `width * height * 4` bytes. The resize stretches to fill; aspect ratio
/// is intentionally not preserved.
pub fn decode_image(part: usize, bytes: &[u8], width: u32, height: u32) -> Result<Arc<[u8]>> {
    let decode_err = |reason: String| Error::Decode {
        part,
        kind: MediaKind::Image,
        reason,
    };

    let decoded = image::load_from_memory(bytes).map_err(|e| decode_err(e.to_string()))?;
    let rgba = decoded
        .resize_exact(width, height, FilterType::Triangle)
        .to_rgba8()
        .into_raw();
    debug_assert_eq!(rgba.len(), (width * height * 4) as usize);
    Ok(rgba.into())
}

/// Decode a WAV payload into mono f32 PCM. Multi-channel input is averaged
/// down to one channel; integer sample formats are normalized to [-1, 1].
pub fn decode_audio(part: usize, bytes: &[u8]) -> Result<DecodedAudio> {
    let decode_err = |reason: String| Error::Decode {
        part,
        kind: MediaKind::Audio,
        reason,
    };

    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| decode_err(e.to_string()))?;
    let spec = reader.spec();
    if spec.channels == 0 {
        return Err(decode_err("zero channels".to_string()));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| decode_err(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| decode_err(e.to_string()))?
        }
    };

    let channels = spec.channels as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}
