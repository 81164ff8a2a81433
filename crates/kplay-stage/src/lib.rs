//! Stage abstraction layer.
//!
//! This crate defines the `Stage` trait that every processing unit in a
//! playback graph implements, together with the blocks that travel across
//! links and the contracts two stages agree on before a link exists. The graph
//! and engine only ever talk to stages through this interface.

use std::fmt;
use std::sync::Arc;

use kplay_core::{ChannelCount, Frames, Sample, SampleFormat, SampleRate};

/// Data contract negotiated for one link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkContract {
    pub sample_rate: SampleRate,
    pub format: SampleFormat,
    pub channels: ChannelCount,
    pub frames: Frames,
}

impl LinkContract {
    /// Number of interleaved samples in one block
    pub const fn samples(&self) -> usize {
        self.frames * self.channels
    }

    /// Number of bytes in one PCM block
    pub const fn byte_len(&self) -> usize {
        self.samples() * self.format.bytes_per_sample()
    }
}

impl fmt::Display for LinkContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Hz {} x{} / {} frames",
            self.sample_rate, self.format, self.channels, self.frames
        )
    }
}

/// A fixed-size batch of interleaved samples moved across one link per tick.
///
/// PCM formats live in `bytes`, the float format lives in `samples`; the other
/// buffer stays empty.
#[derive(Debug, Clone, Default)]
pub struct Block {
    bytes: Vec<u8>,
    samples: Vec<Sample>,
}

impl Block {
    /// Allocate a silent block sized for `contract`
    pub fn for_contract(contract: &LinkContract) -> Self {
        if contract.format.is_pcm() {
            Self {
                bytes: vec![0; contract.byte_len()],
                samples: Vec::new(),
            }
        } else {
            Self {
                bytes: Vec::new(),
                samples: vec![0.0; contract.samples()],
            }
        }
    }

    pub fn pcm(&self) -> &[u8] {
        &self.bytes
    }

    pub fn pcm_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// Copy the payload of `other` into this block (same contract assumed)
    pub fn copy_from(&mut self, other: &Self) {
        self.bytes.copy_from_slice(&other.bytes);
        self.samples.copy_from_slice(&other.samples);
    }

    /// Fill the block with silence
    pub fn clear(&mut self) {
        self.bytes.fill(0);
        self.samples.fill(0.0);
    }
}

/// One side of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    Input(usize),
    Output(usize),
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(index) => write!(f, "in#{index}"),
            Self::Output(index) => write!(f, "out#{index}"),
        }
    }
}

/// What the engine should do after a stage has processed a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep streaming
    Continue,
    /// Nothing was produced; the stream ended before this block
    EndOfStream,
    /// This block is the last one; finish the tick, then stop
    Drained,
}

/// Source of raw PCM bytes pulled by an entry stage
pub trait Producer: Send + Sync {
    /// Fill `buf` completely, zero-padding a short tail.
    fn produce(&self, buf: &mut [u8]) -> Result<(), ProduceError>;
}

/// Failure to produce a block
#[derive(Debug, thiserror::Error)]
pub enum ProduceError {
    #[error("end of stream")]
    EndOfStream,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Constructor arguments handed to a stage factory
#[derive(Clone, Default)]
pub struct StageArgs {
    /// String-encoded arguments, interpreted by each stage
    pub params: Vec<String>,
    /// Data source for entry stages
    pub producer: Option<Arc<dyn Producer>>,
}

impl StageArgs {
    pub fn new<I, S>(params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            params: params.into_iter().map(Into::into).collect(),
            producer: None,
        }
    }

    pub fn with_producer(mut self, producer: Arc<dyn Producer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Parse the positional argument `index`, if present
    pub fn parse<T: std::str::FromStr>(&self, index: usize) -> Result<Option<T>, StageError> {
        self.params
            .get(index)
            .map(|raw| {
                raw.parse().map_err(|_| {
                    StageError::InvalidArgument(format!("argument {index} is not valid: {raw:?}"))
                })
            })
            .transpose()
    }
}

impl fmt::Debug for StageArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageArgs")
            .field("params", &self.params)
            .field("producer", &self.producer.is_some())
            .finish()
    }
}

/// Main trait that every processing stage implements
pub trait Stage: Send {
    /// Stage identifier used in logs
    fn name(&self) -> &str;

    /// Number of input ports
    fn input_ports(&self) -> usize;

    /// Number of output ports
    fn output_ports(&self) -> usize;

    /// Accept or reject the contract proposed for a link on `port`
    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError>;

    /// Set a runtime parameter from its string-encoded argument list
    fn configure(&mut self, param: u32, args: &[String]) -> Result<(), StageError>;

    /// Return to the state the stage had before the first block of a run
    fn reset(&mut self) {}

    /// Process one block per port
    fn process(&mut self, inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError>;
}

/// Stage-related errors
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("Stage not found: {0}")]
    NotFound(String),

    #[error("Stage creation failed: {0}")]
    CreationFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Contract rejected on {port}: {reason}")]
    ContractRejected { port: Port, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Stage processing failed: {0}")]
    ProcessingFailed(String),
}

impl StageError {
    pub fn rejected(port: Port, reason: impl Into<String>) -> Self {
        Self::ContractRejected {
            port,
            reason: reason.into(),
        }
    }
}
