//! File writer - terminal stage that stores every block.
//!
//! `args[0]` selects the target:
//! - `--` writes raw PCM to standard output
//! - `null` discards everything
//! - a path ending in `.wav` gets a WAV container matching the link contract
//! - any other path receives raw PCM

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use kplay_core::SampleFormat;
use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageArgs, StageError};

/// Argument selecting standard output
pub const STDOUT_TARGET: &str = "--";

/// Argument selecting the discarding sink
pub const NULL_TARGET: &str = "null";

type WavFileWriter = hound::WavWriter<BufWriter<File>>;

enum Target {
    Raw(Box<dyn Write + Send>),
    /// Opened once the contract is known
    Wav {
        path: PathBuf,
        writer: Option<WavFileWriter>,
    },
}

pub struct FileWriter {
    target: Target,
    contract: Option<LinkContract>,
}

impl FileWriter {
    pub fn new(args: &StageArgs) -> Result<Self, StageError> {
        let name = args.params.first().ok_or_else(|| {
            StageError::InvalidArgument("file-writer needs a target".to_string())
        })?;

        let target = match name.as_str() {
            STDOUT_TARGET => Target::Raw(Box::new(BufWriter::new(io::stdout()))),
            NULL_TARGET => Target::Raw(Box::new(io::sink())),
            path if is_wav(Path::new(path)) => Target::Wav {
                path: PathBuf::from(path),
                writer: None,
            },
            path => {
                let file = File::create(path).map_err(|err| {
                    StageError::CreationFailed(format!("cannot create {path}: {err}"))
                })?;
                Target::Raw(Box::new(BufWriter::new(file)))
            }
        };

        Ok(Self {
            target,
            contract: None,
        })
    }

    fn open_wav(path: &Path, contract: &LinkContract) -> Result<WavFileWriter, StageError> {
        let (bits_per_sample, sample_format) = match contract.format {
            SampleFormat::S16 => (16, hound::SampleFormat::Int),
            SampleFormat::S24Packed => (24, hound::SampleFormat::Int),
            SampleFormat::S32 => (32, hound::SampleFormat::Int),
            SampleFormat::Float => (32, hound::SampleFormat::Float),
        };
        let spec = hound::WavSpec {
            channels: u16::try_from(contract.channels).map_err(|_| {
                StageError::CreationFailed(format!("too many channels: {}", contract.channels))
            })?,
            sample_rate: contract.sample_rate,
            bits_per_sample,
            sample_format,
        };
        hound::WavWriter::create(path, spec).map_err(|err| {
            StageError::CreationFailed(format!("cannot create {}: {err}", path.display()))
        })
    }

    fn write_wav(
        writer: &mut WavFileWriter,
        format: SampleFormat,
        block: &Block,
    ) -> Result<(), hound::Error> {
        match format {
            SampleFormat::S16 => {
                for chunk in block.pcm().chunks_exact(2) {
                    writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
                }
            }
            SampleFormat::S24Packed => {
                for chunk in block.pcm().chunks_exact(3) {
                    writer.write_sample(i32::from_le_bytes([0, chunk[0], chunk[1], chunk[2]]) >> 8)?;
                }
            }
            SampleFormat::S32 => {
                for chunk in block.pcm().chunks_exact(4) {
                    writer.write_sample(i32::from_le_bytes([
                        chunk[0], chunk[1], chunk[2], chunk[3],
                    ]))?;
                }
            }
            SampleFormat::Float => {
                for &sample in block.samples() {
                    writer.write_sample(sample)?;
                }
            }
        }
        Ok(())
    }

    fn write_raw(out: &mut dyn Write, format: SampleFormat, block: &Block) -> io::Result<()> {
        if format.is_pcm() {
            return out.write_all(block.pcm());
        }
        for sample in block.samples() {
            out.write_all(&sample.to_le_bytes())?;
        }
        Ok(())
    }
}

fn is_wav(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

impl Stage for FileWriter {
    fn name(&self) -> &str {
        super::FILE_WRITER
    }

    fn input_ports(&self) -> usize {
        1
    }

    fn output_ports(&self) -> usize {
        0
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        if let Target::Wav { path, writer } = &mut self.target {
            if writer.is_some() {
                return Err(StageError::rejected(port, "file-writer is already linked"));
            }
            *writer = Some(Self::open_wav(path, contract)?);
        }
        self.contract = Some(*contract);
        Ok(())
    }

    fn configure(&mut self, param: u32, _args: &[String]) -> Result<(), StageError> {
        Err(StageError::InvalidParameter(format!(
            "Unknown parameter ID: {param}"
        )))
    }

    fn process(&mut self, inputs: &[&Block], _outputs: &mut [Block]) -> Result<Flow, StageError> {
        let (Some(input), Some(contract)) = (inputs.first(), self.contract) else {
            return Err(StageError::ProcessingFailed(
                "file-writer is not linked".to_string(),
            ));
        };

        match &mut self.target {
            Target::Raw(out) => Self::write_raw(out.as_mut(), contract.format, input)
                .map_err(|err| StageError::ProcessingFailed(err.to_string()))?,
            Target::Wav {
                writer: Some(writer),
                ..
            } => Self::write_wav(writer, contract.format, input)
                .map_err(|err| StageError::ProcessingFailed(err.to_string()))?,
            Target::Wav { writer: None, .. } => {
                return Err(StageError::ProcessingFailed(
                    "wav target was never opened".to_string(),
                ));
            }
        }
        Ok(Flow::Continue)
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        match &mut self.target {
            Target::Raw(out) => {
                if let Err(err) = out.flush() {
                    tracing::error!("Failed to flush output: {}", err);
                }
            }
            Target::Wav { path, writer } => {
                if let Some(writer) = writer.take() {
                    if let Err(err) = writer.finalize() {
                        tracing::error!("Failed to finalize {}: {}", path.display(), err);
                    }
                }
            }
        }
    }
}
