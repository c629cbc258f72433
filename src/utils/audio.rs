use anyhow::{anyhow, Result};

/// Decoded PCM clip: mono f32 samples in [-1, 1] plus the source rate.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PcmClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

struct WavFormat {
    audio_format: u16,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

fn parse_fmt(content: &[u8]) -> Result<WavFormat> {
    if content.len() < 16 {
        return Err(anyhow!("fmt chunk too short"));
    }
    Ok(WavFormat {
        audio_format: u16::from_le_bytes([content[0], content[1]]),
        channels: u16::from_le_bytes([content[2], content[3]]),
        sample_rate: u32::from_le_bytes([content[4], content[5], content[6], content[7]]),
        bits_per_sample: u16::from_le_bytes([content[14], content[15]]),
    })
}

/// Decodes a PCM WAV payload into mono f32 samples. Stereo input is downmixed
/// by channel averaging; only 16-bit PCM is accepted, matching what the
/// generation service emits.
pub fn decode_wav(bytes: &[u8]) -> Result<PcmClip> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(anyhow!("Not a RIFF/WAVE payload"));
    }

    let mut fmt: Option<WavFormat> = None;
    let mut data: Option<&[u8]> = None;
    let mut pos = 12usize;

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = u32::from_le_bytes([
            bytes[pos + 4],
            bytes[pos + 5],
            bytes[pos + 6],
            bytes[pos + 7],
        ]) as usize;
        let body_start = pos + 8;
        let body_end = (body_start + chunk_size).min(bytes.len());

        if chunk_id == b"fmt " {
            fmt = Some(parse_fmt(&bytes[body_start..body_end])?);
        } else if chunk_id == b"data" {
            data = Some(&bytes[body_start..body_end]);
            break;
        }

        // Chunks are word-aligned.
        pos = body_start + chunk_size + (chunk_size & 1);
    }

    let fmt = fmt.ok_or_else(|| anyhow!("Missing fmt chunk"))?;
    let data = data.ok_or_else(|| anyhow!("Missing data chunk"))?;

    if fmt.audio_format != 1 || fmt.bits_per_sample != 16 {
        return Err(anyhow!(
            "Unsupported WAV format: format {} / {} bits (expected 16-bit PCM)",
            fmt.audio_format,
            fmt.bits_per_sample
        ));
    }
    if fmt.channels == 0 || fmt.channels > 2 {
        return Err(anyhow!("Unsupported channel count: {}", fmt.channels));
    }

    let frame_bytes = 2 * fmt.channels as usize;
    let frames = data.len() / frame_bytes;
    let mut samples = Vec::with_capacity(frames);

    for frame in 0..frames {
        let base = frame * frame_bytes;
        let mut acc = 0.0f32;
        for ch in 0..fmt.channels as usize {
            let offset = base + ch * 2;
            let value = i16::from_le_bytes([data[offset], data[offset + 1]]);
            acc += value as f32 / 32768.0;
        }
        samples.push(acc / fmt.channels as f32);
    }

    Ok(PcmClip {
        samples,
        sample_rate: fmt.sample_rate,
    })
}

/// Encodes mono f32 samples as a 16-bit PCM WAV payload.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_size = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + samples.len() * 2);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_size).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());

    for &sample in samples {
        let clamped = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }

    out
}

pub fn ms_to_samples(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

pub fn samples_to_ms(len: usize, sample_rate: u32) -> u64 {
    len as u64 * 1000 / sample_rate as u64
}

/// Linear-interpolation resampler. Quality is fine for speech clips; callers
/// needing no-op behavior get it when rates already match.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio) as usize;
    let mut resampled = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let fraction = (src_pos - src_idx as f64) as f32;

        if src_idx + 1 < samples.len() {
            let a = samples[src_idx];
            let b = samples[src_idx + 1];
            resampled.push(a + (b - a) * fraction);
        } else if src_idx < samples.len() {
            resampled.push(samples[src_idx]);
        }
    }

    resampled
}

pub fn apply_fade_in(samples: &mut [f32], duration_samples: usize) {
    let n = duration_samples.min(samples.len());
    if n == 0 {
        return;
    }
    for i in 0..n {
        samples[i] *= i as f32 / n as f32;
    }
}

pub fn apply_fade_out(samples: &mut [f32], duration_samples: usize) {
    let n = duration_samples.min(samples.len());
    if n == 0 {
        return;
    }
    let start = samples.len() - n;
    for i in 0..n {
        samples[start + i] *= (n - i) as f32 / n as f32;
    }
}

/// Sums `src` into `dst` starting at `offset`, dropping whatever would land
/// past the end of `dst`.
pub fn mix_into(dst: &mut [f32], src: &[f32], offset: usize, gain: f32) {
    if offset >= dst.len() {
        return;
    }
    let n = src.len().min(dst.len() - offset);
    for i in 0..n {
        dst[offset + i] += src[i] * gain;
    }
}

/// Uniformly scales the buffer so the peak lands on `ceiling`. Near-silent
/// buffers are left untouched.
pub fn normalize_peak(samples: &mut [f32], ceiling: f32) {
    let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
    if peak < 1e-6 {
        return;
    }
    let gain = ceiling / peak;
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

/// Mild soft-knee compression applied as a static per-sample curve, so the
/// result is reproducible regardless of buffer chunking.
pub fn soft_knee_compress(samples: &mut [f32], threshold_db: f32, ratio: f32, knee_db: f32) {
    for sample in samples.iter_mut() {
        let magnitude = sample.abs();
        if magnitude < 1e-6 {
            continue;
        }
        let level_db = 20.0 * magnitude.log10();
        let over = level_db - threshold_db;

        let compressed_db = if 2.0 * over < -knee_db {
            level_db
        } else if 2.0 * over.abs() <= knee_db {
            let t = over + knee_db / 2.0;
            level_db + (1.0 / ratio - 1.0) * t * t / (2.0 * knee_db)
        } else {
            threshold_db + over / ratio
        };

        let gain = 10.0f32.powf((compressed_db - level_db) / 20.0);
        *sample *= gain;
    }
}
