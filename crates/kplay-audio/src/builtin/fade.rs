//! Linear fade-in / fade-out ramps on float samples.

use kplay_core::SampleRate;
use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageArgs, StageError};

/// Parameter that arms a fade-out; takes no arguments
pub const FADE_TRIGGER: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeDirection {
    /// Ramp 0 to 1 from the first frame of a run
    In,
    /// Pass through until triggered, then ramp 1 to 0 and report `Drained`
    Out,
}

pub struct Fade {
    direction: FadeDirection,
    duration_ms: u32,
    sample_rate: SampleRate,
    channels: usize,
    /// Frames into the ramp
    position: usize,
    triggered: bool,
}

impl Fade {
    /// `args[0]` is the ramp duration in milliseconds
    pub fn new(direction: FadeDirection, args: &StageArgs) -> Result<Self, StageError> {
        let duration_ms = args.parse::<u32>(0)?.ok_or_else(|| {
            StageError::InvalidArgument("fade needs a duration in milliseconds".to_string())
        })?;
        Ok(Self {
            direction,
            duration_ms,
            sample_rate: 0,
            channels: 0,
            position: 0,
            triggered: false,
        })
    }

    fn ramp_frames(&self) -> usize {
        (u64::from(self.duration_ms) * u64::from(self.sample_rate) / 1000) as usize
    }

    /// Gain at the current ramp position
    fn gain(&self, ramp: usize) -> f32 {
        if ramp == 0 || self.position >= ramp {
            return match self.direction {
                FadeDirection::In => 1.0,
                FadeDirection::Out => 0.0,
            };
        }
        let progress = self.position as f32 / ramp as f32;
        match self.direction {
            FadeDirection::In => progress,
            FadeDirection::Out => 1.0 - progress,
        }
    }
}

impl Stage for Fade {
    fn name(&self) -> &str {
        match self.direction {
            FadeDirection::In => super::FADE_IN,
            FadeDirection::Out => super::FADE_OUT,
        }
    }

    fn input_ports(&self) -> usize {
        1
    }

    fn output_ports(&self) -> usize {
        1
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        if contract.format.is_pcm() {
            return Err(StageError::rejected(port, "fade works on float samples"));
        }
        if self.channels != 0 && self.channels != contract.channels {
            return Err(StageError::rejected(port, "channel count differs across ports"));
        }
        self.sample_rate = contract.sample_rate;
        self.channels = contract.channels;
        Ok(())
    }

    fn configure(&mut self, param: u32, _args: &[String]) -> Result<(), StageError> {
        match (self.direction, param) {
            (FadeDirection::Out, FADE_TRIGGER) => {
                self.triggered = true;
                Ok(())
            }
            _ => Err(StageError::InvalidParameter(format!(
                "Unknown parameter ID: {param}"
            ))),
        }
    }

    fn reset(&mut self) {
        self.position = 0;
        self.triggered = false;
    }

    fn process(&mut self, inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError> {
        let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) else {
            return Err(StageError::ProcessingFailed(
                "fade needs one input and one output".to_string(),
            ));
        };
        output.copy_from(input);

        if self.direction == FadeDirection::Out && !self.triggered {
            return Ok(Flow::Continue);
        }

        let ramp = self.ramp_frames();
        let channels = self.channels.max(1);
        for frame in output.samples_mut().chunks_mut(channels) {
            let gain = self.gain(ramp);
            for sample in frame {
                *sample *= gain;
            }
            if self.position < ramp {
                self.position += 1;
            }
        }

        if self.direction == FadeDirection::Out && self.position >= ramp {
            tracing::debug!("Fade-out complete");
            return Ok(Flow::Drained);
        }
        Ok(Flow::Continue)
    }
}
