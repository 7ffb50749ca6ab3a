//! Sample-rate and channel-layout conversion.

/// Remap interleaved samples from `from` channels to `to` channels.
///
/// Mono is duplicated to every output channel; downmixing to mono averages;
/// other layouts copy matching channels and zero-fill or drop the rest.
pub fn map_channels(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return samples.to_vec();
    }
    let frames = samples.len() / from;
    let mut out = Vec::with_capacity(frames * to);
    for frame in samples.chunks_exact(from) {
        if from == 1 {
            out.extend(std::iter::repeat(frame[0]).take(to));
        } else if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for c in 0..to {
                out.push(frame.get(c).copied().unwrap_or(0.0));
            }
        }
    }
    out
}

/// Linear-interpolation resampling of interleaved samples.
pub fn resample_linear(samples: &[f32], channels: u16, from_rate: u32, to_rate: u32) -> Vec<f32> {
    let channels = channels.max(1) as usize;
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }
    let in_frames = samples.len() / channels;
    if in_frames == 0 {
        return Vec::new();
    }
    let out_frames = ((in_frames as u64 * to_rate as u64) / from_rate as u64) as usize;
    let step = from_rate as f64 / to_rate as f64;
    let mut out = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        let pos = i as f64 * step;
        let i0 = (pos.floor() as usize).min(in_frames - 1);
        let i1 = (i0 + 1).min(in_frames - 1);
        let frac = (pos - i0 as f64) as f32;
        for c in 0..channels {
            let a = samples[i0 * channels + c];
            let b = samples[i1 * channels + c];
            out.push(a + (b - a) * frac);
        }
    }
    out
}

/// Convert interleaved samples to the given rate and channel count.
pub fn conform(
    samples: &[f32],
    channels: u16,
    sample_rate: u32,
    to_channels: u16,
    to_rate: u32,
) -> Vec<f32> {
    let mapped = map_channels(samples, channels, to_channels);
    resample_linear(&mapped, to_channels, sample_rate, to_rate)
}
