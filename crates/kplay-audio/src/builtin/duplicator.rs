//! Duplicator - copies one input to two outputs.

use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageError};

#[derive(Default)]
pub struct Duplicator {
    contract: Option<LinkContract>,
}

impl Stage for Duplicator {
    fn name(&self) -> &str {
        super::DUPLICATOR
    }

    fn input_ports(&self) -> usize {
        1
    }

    fn output_ports(&self) -> usize {
        2
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        match self.contract {
            Some(existing) if existing != *contract => Err(StageError::rejected(
                port,
                format!("duplicator already carries {existing}"),
            )),
            _ => {
                self.contract = Some(*contract);
                Ok(())
            }
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
            .ok_or_else(|| StageError::ProcessingFailed("duplicator has no input".to_string()))?;
        for output in outputs {
            output.copy_from(input);
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kplay_core::SampleFormat;

    fn contract(format: SampleFormat) -> LinkContract {
        LinkContract {
            sample_rate: 8000,
            format,
            channels: 1,
            frames: 2,
        }
    }

    #[test]
    fn test_copies_to_both_outputs() {
        let mut stage = Duplicator::default();
        let pcm = contract(SampleFormat::S16);
        stage.negotiate(Port::Input(0), &pcm).unwrap();
        stage.negotiate(Port::Output(0), &pcm).unwrap();
        stage.negotiate(Port::Output(1), &pcm).unwrap();

        let mut input = Block::for_contract(&pcm);
        input.pcm_mut().copy_from_slice(&[1, 2, 3, 4]);
        let mut outputs = [Block::for_contract(&pcm), Block::for_contract(&pcm)];
        stage.process(&[&input], &mut outputs).unwrap();

        assert_eq!(outputs[0].pcm(), &[1, 2, 3, 4]);
        assert_eq!(outputs[1].pcm(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_all_ports_share_one_contract() {
        let mut stage = Duplicator::default();
        stage
            .negotiate(Port::Input(0), &contract(SampleFormat::S16))
            .unwrap();
        assert!(
            stage
                .negotiate(Port::Output(0), &contract(SampleFormat::Float))
                .is_err()
        );
    }
}
