//! # Input Audio Decoding
//!
//! Turns an uploaded media file into mono f32 PCM at the 16 kHz rate the
//! Whisper models expect. WAV files are parsed in-process; every other
//! container is handed to an `ffmpeg` subprocess, which is what actually
//! understands video formats.

use anyhow::{anyhow, Context, Result};
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;
use std::process::Command;

/// Sample rate required by the transcription models.
pub const SAMPLE_RATE: u32 = 16_000;

/// Decode a media file to mono f32 samples at [`SAMPLE_RATE`].
pub fn decode_to_pcm(path: &Path) -> Result<Vec<f32>> {
    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);

    if is_wav {
        decode_wav(path)
    } else {
        decode_with_ffmpeg(path)
    }
}

fn decode_wav(path: &Path) -> Result<Vec<f32>> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let (header, data) = wav::read(&mut file)
        .map_err(|e| anyhow!("Failed to parse WAV {}: {}", path.display(), e))?;

    let samples: Vec<f32> = match data {
        wav::BitDepth::Eight(v) => v
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(v) => v.into_iter().map(|s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(v) => v
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(v) => v,
        wav::BitDepth::Empty => Vec::new(),
    };

    if samples.is_empty() {
        return Err(anyhow!("WAV file {} contains no samples", path.display()));
    }

    let mono = mix_to_mono(&samples, header.channel_count as usize);
    Ok(resample(&mono, header.sampling_rate, SAMPLE_RATE))
}

/// Decode via ffmpeg: raw little-endian f32, one channel, 16 kHz on stdout.
fn decode_with_ffmpeg(path: &Path) -> Result<Vec<f32>> {
    let output = Command::new("ffmpeg")
        .arg("-nostdin")
        .arg("-i")
        .arg(path)
        .args(["-f", "f32le", "-ac", "1", "-ar"])
        .arg(SAMPLE_RATE.to_string())
        .args(["-loglevel", "error", "pipe:1"])
        .output()
        .context("Failed to run ffmpeg (is it installed?)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "ffmpeg failed to decode {}: {}",
            path.display(),
            stderr.trim()
        ));
    }

    let bytes = output.stdout;
    if bytes.len() < 4 {
        return Err(anyhow!("No audio stream found in {}", path.display()));
    }

    let mut samples = vec![0f32; bytes.len() / 4];
    LittleEndian::read_f32_into(&bytes[..samples.len() * 4], &mut samples);
    Ok(samples)
}

/// Average interleaved channels down to one.
fn mix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler. Fine for speech input; the engine does
/// not need audiophile fidelity.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src = i as f64 * ratio;
        let idx = src.floor() as usize;
        let frac = (src - idx as f64) as f32;
        let a = samples[idx];
        let b = if idx + 1 < samples.len() {
            samples[idx + 1]
        } else {
            a
        };
        out.push(a + (b - a) * frac);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_to_mono_averages_channels() {
        let stereo = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let mono = mix_to_mono(&stereo, 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_mix_to_mono_passthrough() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(mix_to_mono(&samples, 1), samples);
    }

    #[test]
    fn test_resample_halves_rate() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let out = resample(&samples, 32_000, 16_000);
        assert_eq!(out.len(), 50);
        // Every other sample, linearly interpolated
        assert!((out[1] - 2.0).abs() < 1e-6);
        assert!((out[10] - 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn test_decode_wav_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, SAMPLE_RATE, 16);
        let samples: Vec<i16> = (0..SAMPLE_RATE)
            .map(|i| ((i as f32 * 0.01).sin() * 16000.0) as i16)
            .collect();
        let mut file = std::fs::File::create(&path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file).unwrap();

        let pcm = decode_to_pcm(&path).unwrap();
        assert_eq!(pcm.len(), SAMPLE_RATE as usize);
        assert!(pcm.iter().all(|s| s.abs() <= 1.0));
    }
}
