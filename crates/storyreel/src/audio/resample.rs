/// Linear-interpolation resampler. Decoded narration arrives at whatever
/// rate the generation backend produced; everything submitted to the AAC
/// encoder must be at the configured output rate, otherwise chunk timing
/// silently drifts.
pub fn resample_linear(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len =
        ((samples.len() as f64) * dst_rate as f64 / src_rate as f64).round() as usize;
    let step = src_rate as f64 / dst_rate as f64;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let base = (pos.floor() as usize).min(last);
            let next = (base + 1).min(last);
            let frac = (pos - base as f64) as f32;
            samples[base] + (samples[next] - samples[base]) * frac
        })
        .collect()
}

/// Convert mono f32 PCM to interleaved i16 for the encoder, duplicating
/// the channel when stereo output is configured.
pub fn interleave_i16(mono: &[f32], channels: u32) -> Vec<i16> {
    let mut out = Vec::with_capacity(mono.len() * channels as usize);
    for &sample in mono {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        for _ in 0..channels {
            out.push(value);
        }
    }
    out
}
