//! Entry stage - pulls PCM blocks from a producer.

use std::sync::Arc;

use kplay_stage::{
    Block, Flow, LinkContract, Port, ProduceError, Producer, Stage, StageArgs, StageError,
};

/// Entry stage with no inputs and one PCM output
pub struct StreamIn {
    producer: Arc<dyn Producer>,
}

impl StreamIn {
    pub fn new(args: &StageArgs) -> Result<Self, StageError> {
        let producer = args
            .producer
            .clone()
            .ok_or_else(|| StageError::CreationFailed("stream-in needs a producer".to_string()))?;
        Ok(Self { producer })
    }
}

impl Stage for StreamIn {
    fn name(&self) -> &str {
        super::STREAM_IN
    }

    fn input_ports(&self) -> usize {
        0
    }

    fn output_ports(&self) -> usize {
        1
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        if !contract.format.is_pcm() {
            return Err(StageError::rejected(port, "stream-in emits PCM only"));
        }
        Ok(())
    }

    fn configure(&mut self, param: u32, _args: &[String]) -> Result<(), StageError> {
        Err(StageError::InvalidParameter(format!(
            "Unknown parameter ID: {param}"
        )))
    }

    fn process(&mut self, _inputs: &[&Block], outputs: &mut [Block]) -> Result<Flow, StageError> {
        let output = outputs
            .first_mut()
            .ok_or_else(|| StageError::ProcessingFailed("stream-in has no output".to_string()))?;

        match self.producer.produce(output.pcm_mut()) {
            Ok(()) => Ok(Flow::Continue),
            Err(ProduceError::EndOfStream) => Ok(Flow::EndOfStream),
            Err(ProduceError::Io(err)) => Err(StageError::ProcessingFailed(err.to_string())),
        }
    }
}
