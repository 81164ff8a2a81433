//! Conversions between little-endian PCM bytes and internal float samples.

use dasp::Sample as _;
use dasp::sample::I24;
use kplay_core::{Sample, SampleFormat};

const I24_SCALE: f32 = 8_388_608.0;

/// Decode interleaved PCM bytes into float samples.
///
/// Decodes `min(bytes / sample_size, out.len())` samples.
pub fn decode(format: SampleFormat, bytes: &[u8], out: &mut [Sample]) {
    match format {
        SampleFormat::S16 => {
            for (chunk, sample) in bytes.chunks_exact(2).zip(out.iter_mut()) {
                *sample = i16::from_le_bytes([chunk[0], chunk[1]]).to_sample::<f32>();
            }
        }
        SampleFormat::S24Packed => {
            for (chunk, sample) in bytes.chunks_exact(3).zip(out.iter_mut()) {
                // Sign-extend by placing the 24 bits in the top of an i32
                let raw = i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8;
                *sample = I24::new_unchecked(raw).to_sample::<f32>();
            }
        }
        SampleFormat::S32 => {
            for (chunk, sample) in bytes.chunks_exact(4).zip(out.iter_mut()) {
                *sample = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
                    .to_sample::<f32>();
            }
        }
        SampleFormat::Float => {
            for (chunk, sample) in bytes.chunks_exact(4).zip(out.iter_mut()) {
                *sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
        }
    }
}

/// Encode float samples into interleaved PCM bytes, clipping to full scale.
pub fn encode(format: SampleFormat, samples: &[Sample], out: &mut [u8]) {
    match format {
        SampleFormat::S16 => {
            for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(2)) {
                let value = sample.clamp(-1.0, 1.0).to_sample::<i16>();
                chunk.copy_from_slice(&value.to_le_bytes());
            }
        }
        SampleFormat::S24Packed => {
            for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(3)) {
                let value = (sample.clamp(-1.0, 1.0) * I24_SCALE)
                    .round()
                    .clamp(-I24_SCALE, I24_SCALE - 1.0) as i32;
                chunk.copy_from_slice(&value.to_le_bytes()[..3]);
            }
        }
        SampleFormat::S32 => {
            for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(4)) {
                let value = sample.clamp(-1.0, 1.0).to_sample::<i32>();
                chunk.copy_from_slice(&value.to_le_bytes());
            }
        }
        SampleFormat::Float => {
            for (sample, chunk) in samples.iter().zip(out.chunks_exact_mut(4)) {
                chunk.copy_from_slice(&sample.to_le_bytes());
            }
        }
    }
}
