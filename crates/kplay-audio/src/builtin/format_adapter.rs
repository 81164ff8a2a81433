//! Format adapter - converts between sample formats at equal rate and layout.

use kplay_core::SampleFormat;
use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageError};

use crate::pcm;

/// One input, one output; channel count and rate must match on both sides
#[derive(Default)]
pub struct FormatAdapter {
    input: Option<LinkContract>,
    output: Option<LinkContract>,
    /// Intermediate floats for PCM-to-PCM conversion
    scratch: Vec<f32>,
}

impl FormatAdapter {
    fn check_pair(&self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        let other = match port {
            Port::Input(_) => self.output,
            Port::Output(_) => self.input,
        };
        if let Some(other) = other {
            if other.channels != contract.channels || other.sample_rate != contract.sample_rate {
                return Err(StageError::rejected(
                    port,
                    format!("cannot adapt {other} to {contract}"),
                ));
            }
        }
        Ok(())
    }
}

impl Stage for FormatAdapter {
    fn name(&self) -> &str {
        super::FORMAT_ADAPTER
    }

    fn input_ports(&self) -> usize {
        1
    }

    fn output_ports(&self) -> usize {
        1
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        self.check_pair(port, contract)?;
        match port {
            Port::Input(_) => self.input = Some(*contract),
            Port::Output(_) => self.output = Some(*contract),
        }
        self.scratch = vec![0.0; contract.samples()];
        Ok(())
    }

    fn configure(&mut self, param: u32, _args: &[String]) -> Result<(), StageError> {
        Err(StageError::InvalidParameter(format!(
            "Unknown parameter ID: {param}"
        )))
    }

    fn process(&mut self, inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError> {
        let (Some(input), Some(output)) = (self.input, self.output) else {
            return Err(StageError::ProcessingFailed(
                "format-adapter is not linked".to_string(),
            ));
        };
        let (Some(src), Some(dst)) = (inputs.first(), outputs.first_mut()) else {
            return Err(StageError::ProcessingFailed(
                "format-adapter needs one input and one output".to_string(),
            ));
        };

        match (input.format, output.format) {
            (from, to) if from == to => dst.copy_from(src),
            (from, SampleFormat::Float) => pcm::decode(from, src.pcm(), dst.samples_mut()),
            (SampleFormat::Float, to) => pcm::encode(to, src.samples(), dst.pcm_mut()),
            (from, to) => {
                pcm::decode(from, src.pcm(), &mut self.scratch);
                pcm::encode(to, &self.scratch, dst.pcm_mut());
            }
        }
        Ok(Flow::Continue)
    }
}
