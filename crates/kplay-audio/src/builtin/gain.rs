//! Gain stage - per-channel volume control.

use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageArgs, StageError};
use smallvec::SmallVec;

/// Parameter carrying `(index, value)` pairs, e.g. `["0", "0.5", "1", "1.0"]`
pub const GAIN_PARAM: u32 = 1;

/// Upper bound for a single channel gain
pub const MAX_GAIN: f32 = 1.0;

/// Gain processor with one mono input and one mono output per channel
///
/// Port `i` is scaled by gain `i`.
///
/// ## Parameter Range
///
/// Gain: 0.0 to 1.0 (linear)
/// - 0.0 = silence
/// - 1.0 = unity gain (default)
pub struct Gain {
    gains: SmallVec<[f32; 2]>,
}

impl Gain {
    /// `args[0]` is the number of channels
    pub fn new(args: &StageArgs) -> Result<Self, StageError> {
        let channels = match args.parse::<usize>(0)? {
            Some(count) if count > 0 => count,
            _ => {
                return Err(StageError::InvalidArgument(
                    "gain needs a positive channel count".to_string(),
                ));
            }
        };
        Ok(Self {
            gains: SmallVec::from_elem(1.0, channels),
        })
    }

    pub fn gain(&self, index: usize) -> Option<f32> {
        self.gains.get(index).copied()
    }

    fn parse_pairs(&self, args: &[String]) -> Result<SmallVec<[(usize, f32); 2]>, StageError> {
        if args.is_empty() || args.len() % 2 != 0 {
            return Err(StageError::InvalidArgument(format!(
                "gain expects (index, value) pairs, got {} argument(s)",
                args.len()
            )));
        }

        args.chunks_exact(2)
            .map(|pair| {
                let index: usize = pair[0].parse().map_err(|_| {
                    StageError::InvalidArgument(format!("bad channel index {:?}", pair[0]))
                })?;
                let value: f32 = pair[1].parse().map_err(|_| {
                    StageError::InvalidArgument(format!("bad gain value {:?}", pair[1]))
                })?;
                if index >= self.gains.len() {
                    return Err(StageError::InvalidArgument(format!(
                        "channel index {index} out of range"
                    )));
                }
                if value.is_nan() {
                    return Err(StageError::InvalidArgument("gain is NaN".to_string()));
                }
                Ok((index, value))
            })
            .collect()
    }
}

impl Stage for Gain {
    fn name(&self) -> &str {
        super::GAIN
    }

    fn input_ports(&self) -> usize {
        self.gains.len()
    }

    fn output_ports(&self) -> usize {
        self.gains.len()
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        if contract.format.is_pcm() || contract.channels != 1 {
            return Err(StageError::rejected(port, "gain ports carry mono float"));
        }
        Ok(())
    }

    fn configure(&mut self, param: u32, args: &[String]) -> Result<(), StageError> {
        match param {
            GAIN_PARAM => {
                // Validate everything before applying anything
                for (index, value) in self.parse_pairs(args)? {
                    self.gains[index] = value.clamp(0.0, MAX_GAIN);
                }
                Ok(())
            }
            _ => Err(StageError::InvalidParameter(format!(
                "Unknown parameter ID: {param}"
            ))),
        }
    }

    fn process(&mut self, inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError> {
        if inputs.len() != self.gains.len() || outputs.len() != self.gains.len() {
            return Err(StageError::ProcessingFailed(format!(
                "Gain requires {} inputs and outputs, got {} and {}",
                self.gains.len(),
                inputs.len(),
                outputs.len()
            )));
        }

        for ((input, output), &gain) in inputs.iter().zip(outputs.iter_mut()).zip(&self.gains) {
            for (out, &sample) in output.samples_mut().iter_mut().zip(input.samples()) {
                *out = sample * gain;
            }
        }
        Ok(Flow::Continue)
    }
}
