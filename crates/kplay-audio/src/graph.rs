//! Processing graph - stages wired by negotiated links.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use kplay_core::{Frames, SampleRate};
use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageError};
use smallvec::SmallVec;

/// Index of a stage inside its graph
pub type StageId = usize;

/// Index of a link inside its graph
pub type LinkId = usize;

type PortLinks = SmallVec<[Option<LinkId>; 4]>;

/// A stage plus the links attached to each of its ports
struct StageNode {
    stage: Box<dyn Stage>,
    inputs: PortLinks,
    outputs: PortLinks,
}

/// Directed connection between an output port and an input port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub from: StageId,
    pub from_port: usize,
    pub to: StageId,
    pub to_port: usize,
    pub contract: LinkContract,
}

/// The processing graph
///
/// Structure is fixed once `finalize` succeeds; only stage parameters change
/// afterwards.
pub struct ProcessingGraph {
    stages: Vec<StageNode>,
    links: Vec<Link>,
    /// One block per link, reused every tick
    blocks: Vec<Block>,
    /// Topological processing order, computed by `finalize`
    order: Vec<StageId>,
    sample_rate: SampleRate,
    frames: Frames,
    finalized: bool,
}

impl ProcessingGraph {
    /// Create an empty graph whose links all run at `sample_rate` with blocks of `frames`
    pub fn new(sample_rate: SampleRate, frames: Frames) -> Self {
        Self {
            stages: Vec::new(),
            links: Vec::new(),
            blocks: Vec::new(),
            order: Vec::new(),
            sample_rate,
            frames,
            finalized: false,
        }
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn frames(&self) -> Frames {
        self.frames
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Processing order (empty until finalized)
    pub fn order(&self) -> &[StageId] {
        &self.order
    }

    pub fn stage_name(&self, id: StageId) -> Option<&str> {
        self.stages.get(id).map(|node| node.stage.name())
    }

    /// Ids of every stage called `name`
    pub fn find(&self, name: &str) -> Vec<StageId> {
        self.stages
            .iter()
            .enumerate()
            .filter(|(_, node)| node.stage.name() == name)
            .map(|(id, _)| id)
            .collect()
    }

    /// Add a stage to the graph
    pub fn add_stage(&mut self, stage: Box<dyn Stage>) -> StageId {
        let id = self.stages.len();
        let inputs = stage.input_ports();
        let outputs = stage.output_ports();
        tracing::debug!(
            "Added stage {} '{}' ({} inputs, {} outputs)",
            id,
            stage.name(),
            inputs,
            outputs
        );

        self.stages.push(StageNode {
            stage,
            inputs: SmallVec::from_elem(None, inputs),
            outputs: SmallVec::from_elem(None, outputs),
        });
        self.finalized = false;
        id
    }

    /// Connect an output port to an input port under `contract`
    ///
    /// Both ports must exist and be free, the contract must match the graph's
    /// rate and block size, and both stages must accept it.
    pub fn connect(
        &mut self,
        contract: LinkContract,
        from: StageId,
        from_port: usize,
        to: StageId,
        to_port: usize,
    ) -> Result<LinkId, GraphError> {
        if contract.sample_rate != self.sample_rate || contract.frames != self.frames {
            return Err(GraphError::ContractMismatch {
                expected: format!("{} Hz / {} frames", self.sample_rate, self.frames),
                found: contract.to_string(),
            });
        }
        if contract.channels == 0 || contract.frames == 0 {
            return Err(GraphError::ContractMismatch {
                expected: "at least one channel and one frame".to_string(),
                found: contract.to_string(),
            });
        }

        self.check_free(from, Port::Output(from_port))?;
        self.check_free(to, Port::Input(to_port))?;

        for (id, port) in [(from, Port::Output(from_port)), (to, Port::Input(to_port))] {
            let node = &mut self.stages[id];
            node.stage
                .negotiate(port, &contract)
                .map_err(|source| GraphError::Negotiation {
                    stage: node.stage.name().to_string(),
                    source,
                })?;
        }

        let id = self.links.len();
        self.links.push(Link {
            from,
            from_port,
            to,
            to_port,
            contract,
        });
        self.blocks.push(Block::for_contract(&contract));
        self.stages[from].outputs[from_port] = Some(id);
        self.stages[to].inputs[to_port] = Some(id);
        self.finalized = false;

        tracing::debug!(
            "Linked {}:{} -> {}:{} ({})",
            self.stages[from].stage.name(),
            from_port,
            self.stages[to].stage.name(),
            to_port,
            contract
        );
        Ok(id)
    }

    fn check_free(&self, id: StageId, port: Port) -> Result<(), GraphError> {
        let node = self.stages.get(id).ok_or(GraphError::UnknownStage(id))?;
        let slot = match port {
            Port::Input(index) => node.inputs.get(index),
            Port::Output(index) => node.outputs.get(index),
        };
        match slot {
            None => Err(GraphError::PortOutOfRange {
                stage: node.stage.name().to_string(),
                port,
            }),
            Some(Some(_)) => Err(GraphError::PortInUse {
                stage: node.stage.name().to_string(),
                port,
            }),
            Some(None) => Ok(()),
        }
    }

    /// Verify every port is wired and fix the processing order
    pub fn finalize(&mut self) -> Result<(), GraphError> {
        for node in &self.stages {
            let unwired = node
                .inputs
                .iter()
                .position(Option::is_none)
                .map(Port::Input)
                .or_else(|| node.outputs.iter().position(Option::is_none).map(Port::Output));
            if let Some(port) = unwired {
                return Err(GraphError::Unconnected {
                    stage: node.stage.name().to_string(),
                    port,
                });
            }
        }

        self.order = self.topological_sort().map_err(GraphError::Cycle)?;
        self.finalized = true;
        tracing::debug!("Processing order: {:?}", self.order);
        Ok(())
    }

    /// Perform topological sort using Kahn's algorithm
    ///
    /// Returns `Err(remaining_stages)` if the links form a cycle.
    fn topological_sort(&self) -> Result<Vec<StageId>, Vec<StageId>> {
        let mut in_degree = vec![0_usize; self.stages.len()];
        let mut adjacency: Vec<Vec<StageId>> = vec![Vec::new(); self.stages.len()];
        for link in &self.links {
            in_degree[link.to] += 1;
            adjacency[link.from].push(link.to);
        }

        // Min-heap keeps the order deterministic
        let mut queue: BinaryHeap<Reverse<StageId>> = in_degree
            .iter()
            .enumerate()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(id, _)| Reverse(id))
            .collect();

        let mut result = Vec::with_capacity(self.stages.len());
        while let Some(Reverse(id)) = queue.pop() {
            result.push(id);
            for &to in &adjacency[id] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    queue.push(Reverse(to));
                }
            }
        }

        if result.len() == self.stages.len() {
            Ok(result)
        } else {
            let processed: HashSet<StageId> = result.into_iter().collect();
            Err((0..self.stages.len())
                .filter(|id| !processed.contains(id))
                .collect())
        }
    }

    /// Forward a runtime parameter to one stage
    pub fn set_parameter(
        &mut self,
        id: StageId,
        param: u32,
        args: &[String],
    ) -> Result<(), GraphError> {
        let node = self
            .stages
            .get_mut(id)
            .ok_or(GraphError::UnknownStage(id))?;
        node.stage
            .configure(param, args)
            .map_err(|source| GraphError::Stage {
                stage: node.stage.name().to_string(),
                source,
            })
    }

    /// Reset every stage and silence every link
    pub fn reset(&mut self) {
        for node in &mut self.stages {
            node.stage.reset();
        }
        for block in &mut self.blocks {
            block.clear();
        }
    }

    /// Run one block through every stage in processing order
    pub fn tick(&mut self) -> Result<Flow, GraphError> {
        if !self.finalized {
            return Err(GraphError::NotFinalized);
        }

        let Self {
            stages,
            blocks,
            order,
            ..
        } = self;

        let mut flow = Flow::Continue;
        for &id in order.iter() {
            let node = &mut stages[id];

            let mut outputs: SmallVec<[Block; 4]> = node
                .outputs
                .iter()
                .flatten()
                .map(|&link| std::mem::take(&mut blocks[link]))
                .collect();

            let result = {
                let inputs: SmallVec<[&Block; 4]> =
                    node.inputs.iter().flatten().map(|&link| &blocks[link]).collect();
                node.stage.process(&inputs, &mut outputs)
            };

            for (&link, block) in node.outputs.iter().flatten().zip(outputs) {
                blocks[link] = block;
            }

            match result {
                Ok(Flow::Continue) => {}
                Ok(Flow::EndOfStream) => return Ok(Flow::EndOfStream),
                Ok(Flow::Drained) => flow = Flow::Drained,
                Err(source) => {
                    return Err(GraphError::Stage {
                        stage: node.stage.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(flow)
    }
}

impl std::fmt::Debug for ProcessingGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|node| node.stage.name()).collect();
        f.debug_struct("ProcessingGraph")
            .field("stages", &names)
            .field("links", &self.links.len())
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames)
            .finish()
    }
}

/// Errors raised while building or running a graph
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Unknown stage {0}")]
    UnknownStage(StageId),

    #[error("Stage '{stage}' has no port {port}")]
    PortOutOfRange { stage: String, port: Port },

    #[error("Port {port} of stage '{stage}' is already linked")]
    PortInUse { stage: String, port: Port },

    #[error("Link contract mismatch: expected {expected}, found {found}")]
    ContractMismatch { expected: String, found: String },

    #[error("Stage '{stage}' rejected link: {source}")]
    Negotiation {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Port {port} of stage '{stage}' is not linked")]
    Unconnected { stage: String, port: Port },

    #[error("Graph contains a cycle involving stages {0:?}")]
    Cycle(Vec<StageId>),

    #[error("Graph has not been finalized")]
    NotFinalized,

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageError,
    },
}
