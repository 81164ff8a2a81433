//! Pass-through stage.
//!
//! Stands in for an optional processor that is not registered, so a topology
//! keeps its shape. Parameters are accepted and ignored.

use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageError};

#[derive(Default)]
pub struct PassThrough {
    input: Option<LinkContract>,
    output: Option<LinkContract>,
}

impl Stage for PassThrough {
    fn name(&self) -> &str {
        super::PASS_THROUGH
    }

    fn input_ports(&self) -> usize {
        1
    }

    fn output_ports(&self) -> usize {
        1
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        let other = match port {
            Port::Input(_) => self.output,
            Port::Output(_) => self.input,
        };
        if other.is_some_and(|other| other != *contract) {
            return Err(StageError::rejected(port, "pass-through cannot convert"));
        }
        match port {
            Port::Input(_) => self.input = Some(*contract),
            Port::Output(_) => self.output = Some(*contract),
        }
        Ok(())
    }

    fn configure(&mut self, param: u32, args: &[String]) -> Result<(), StageError> {
        tracing::debug!("pass-through ignoring parameter {} {:?}", param, args);
        Ok(())
    }

    fn process(&mut self, inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError> {
        if let (Some(input), Some(output)) = (inputs.first(), outputs.first_mut()) {
            output.copy_from(input);
        }
        Ok(Flow::Continue)
    }
}
