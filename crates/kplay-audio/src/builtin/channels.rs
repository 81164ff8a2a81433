//! Splitting interleaved frames into mono ports and back.

use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageArgs, StageError};

fn channel_count(args: &StageArgs) -> Result<usize, StageError> {
    match args.parse::<usize>(0)? {
        Some(count) if count > 0 => Ok(count),
        _ => Err(StageError::InvalidArgument(
            "channel count must be a positive integer".to_string(),
        )),
    }
}

fn check_float(port: Port, contract: &LinkContract, channels: usize) -> Result<(), StageError> {
    if contract.format.is_pcm() {
        return Err(StageError::rejected(port, "float samples required"));
    }
    if contract.channels != channels {
        return Err(StageError::rejected(
            port,
            format!("expected {channels} channel(s), got {}", contract.channels),
        ));
    }
    Ok(())
}

/// One interleaved input, one mono output per channel
pub struct Deinterleave {
    channels: usize,
}

impl Deinterleave {
    pub fn new(args: &StageArgs) -> Result<Self, StageError> {
        Ok(Self {
            channels: channel_count(args)?,
        })
    }
}

impl Stage for Deinterleave {
    fn name(&self) -> &str {
        super::DEINTERLEAVE
    }

    fn input_ports(&self) -> usize {
        1
    }

    fn output_ports(&self) -> usize {
        self.channels
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        match port {
            Port::Input(_) => check_float(port, contract, self.channels),
            Port::Output(_) => check_float(port, contract, 1),
        }
    }

    fn configure(&mut self, param: u32, _args: &[String]) -> Result<(), StageError> {
        Err(StageError::InvalidParameter(format!(
            "Unknown parameter ID: {param}"
        )))
    }

    fn process(&mut self, inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError> {
        let input = inputs
            .first()
            .ok_or_else(|| StageError::ProcessingFailed("deinterleave has no input".to_string()))?;

        for (frame_index, frame) in input.samples().chunks_exact(self.channels).enumerate() {
            for (output, &sample) in outputs.iter_mut().zip(frame) {
                output.samples_mut()[frame_index] = sample;
            }
        }
        Ok(Flow::Continue)
    }
}

/// One mono input per channel, one interleaved output
pub struct Interleave {
    channels: usize,
}

impl Interleave {
    pub fn new(args: &StageArgs) -> Result<Self, StageError> {
        Ok(Self {
            channels: channel_count(args)?,
        })
    }
}

impl Stage for Interleave {
    fn name(&self) -> &str {
        super::INTERLEAVE
    }

    fn input_ports(&self) -> usize {
        self.channels
    }

    fn output_ports(&self) -> usize {
        1
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        match port {
            Port::Input(_) => check_float(port, contract, 1),
            Port::Output(_) => check_float(port, contract, self.channels),
        }
    }

    fn configure(&mut self, param: u32, _args: &[String]) -> Result<(), StageError> {
        Err(StageError::InvalidParameter(format!(
            "Unknown parameter ID: {param}"
        )))
    }

    fn process(&mut self, inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError> {
        let output = outputs
            .first_mut()
            .ok_or_else(|| StageError::ProcessingFailed("interleave has no output".to_string()))?;

        for (frame_index, frame) in output
            .samples_mut()
            .chunks_exact_mut(self.channels)
            .enumerate()
        {
            for (sample, input) in frame.iter_mut().zip(inputs) {
                *sample = input.samples()[frame_index];
            }
        }
        Ok(Flow::Continue)
    }
}
