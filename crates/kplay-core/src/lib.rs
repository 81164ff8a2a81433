//! Core types and constants shared across the kplay crates.
//!
//! This crate provides the fundamental vocabulary every other kplay crate
//! depends on: sample scalar types, on-the-wire sample formats and the reasons
//! a playback run can end.

use std::fmt;

/// Sample rate in Hz
pub type SampleRate = u32;

/// Number of audio frames (samples per channel)
pub type Frames = usize;

/// Internal processing sample type
pub type Sample = f32;

/// Number of audio channels
pub type ChannelCount = usize;

/// Duration of one processing block in milliseconds.
pub const FRAME_DURATION_MS: u32 = 20;

/// Number of frames in one processing block at `sample_rate`.
pub fn block_frames(sample_rate: SampleRate) -> Frames {
    (u64::from(FRAME_DURATION_MS) * u64::from(sample_rate) / 1000) as Frames
}

/// Sample representation carried across a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM
    S16,
    /// Signed 24-bit little-endian PCM packed in 3 bytes
    S24Packed,
    /// Signed 32-bit little-endian PCM
    S32,
    /// Native 32-bit float (internal processing format)
    Float,
}

impl SampleFormat {
    /// Map a container bit depth onto its PCM format.
    pub fn from_bits(bits_per_sample: u16) -> Option<Self> {
        match bits_per_sample {
            16 => Some(Self::S16),
            24 => Some(Self::S24Packed),
            32 => Some(Self::S32),
            _ => None,
        }
    }

    /// Bytes used by one sample of one channel
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S24Packed => 3,
            Self::S32 | Self::Float => 4,
        }
    }

    /// Whether blocks in this format carry raw bytes rather than floats
    pub const fn is_pcm(self) -> bool {
        !matches!(self, Self::Float)
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::S16 => "s16le",
            Self::S24Packed => "s24le (packed)",
            Self::S32 => "s32le",
            Self::Float => "f32",
        };
        f.write_str(name)
    }
}

/// Why the engine stopped producing audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A stop was asked for (stop primitive or a completed fade-out)
    UserRequested,
    /// The source ran out of samples
    EndOfStream,
    /// A stage failed while processing
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UserRequested => "user request",
            Self::EndOfStream => "end of stream",
            Self::Error => "engine error",
        };
        f.write_str(name)
    }
}
