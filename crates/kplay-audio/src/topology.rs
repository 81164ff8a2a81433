//! Playback topology construction.
//!
//! Builds the fixed chain that plays one source:
//!
//! ```text
//! stream-in -> format-adapter -> fade-in -> [deinterleave -> gain -> interleave]
//!           -> pitch-tempo -> fade-out -> format-adapter -> [duplicator] -> sink(s)
//! ```
//!
//! Mono sources skip the split and merge around the gain stage. When no
//! `pitch-tempo` stage is registered a pass-through takes its place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kplay_core::{SampleFormat, block_frames};
use kplay_stage::{LinkContract, Producer, StageArgs, StageError};

use crate::builtin::{self, StageRegistry};
use crate::graph::{GraphError, ProcessingGraph, StageId};
use crate::source::StreamHeader;

/// Fade-in duration at the start of every run
pub const FADE_IN_MS: u32 = 500;

/// Fade-out duration when the user stops playback
pub const FADE_OUT_MS: u32 = 200;

/// Pitch multiplier parameter of the pitch/tempo stage (one argument)
pub const PITCH_PARAM: u32 = 1;

/// Tempo multiplier parameter of the pitch/tempo stage (one argument)
pub const TEMPO_PARAM: u32 = 2;

/// Where the rendered stream goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputKind {
    /// Default playback device
    Device,
    /// Raw PCM on standard output
    Stdout,
    /// Discard everything
    Null,
    /// Raw PCM file, or a WAV file when the path ends in `.wav`
    File(PathBuf),
}

/// Stages the control layer addresses at runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphHandles {
    pub gain: StageId,
    pub fade_out: StageId,
    pub pitch_tempo: StageId,
    /// False when a pass-through stands in for pitch/tempo
    pub pitch_tempo_available: bool,
    /// Channel count of the source, and of the gain stage
    pub channels: usize,
}

/// A finalized graph plus its runtime handles
#[derive(Debug)]
pub struct Topology {
    pub graph: ProcessingGraph,
    pub handles: GraphHandles,
}

/// Builds playback topologies from a stage registry
#[derive(Debug)]
pub struct TopologyBuilder<'a> {
    registry: &'a StageRegistry,
}

impl<'a> TopologyBuilder<'a> {
    pub fn new(registry: &'a StageRegistry) -> Self {
        Self { registry }
    }

    /// Build and finalize the playback graph for `header`
    ///
    /// On failure nothing survives: every stage created so far is dropped with
    /// the partial graph.
    pub fn build(
        &self,
        header: &StreamHeader,
        producer: Arc<dyn Producer>,
        output: &OutputKind,
        record: Option<&Path>,
    ) -> Result<Topology, BuildError> {
        let result = self.assemble(header, producer, output, record);
        match &result {
            Ok(topology) => tracing::info!(
                "Built playback graph: {} stages, {} links",
                topology.graph.stage_count(),
                topology.graph.links().len()
            ),
            Err(err) => tracing::warn!("Failed to build playback graph: {}", err),
        }
        result
    }

    fn assemble(
        &self,
        header: &StreamHeader,
        producer: Arc<dyn Producer>,
        output: &OutputKind,
        record: Option<&Path>,
    ) -> Result<Topology, BuildError> {
        let channels = usize::from(header.channels);
        let frames = block_frames(header.sample_rate);
        let mut graph = ProcessingGraph::new(header.sample_rate, frames);

        let pcm = LinkContract {
            sample_rate: header.sample_rate,
            format: header.format,
            channels,
            frames,
        };
        let float = LinkContract {
            format: SampleFormat::Float,
            ..pcm
        };
        let mono = LinkContract {
            channels: 1,
            ..float
        };

        let channel_arg = channels.to_string();

        let entry = self.add(
            &mut graph,
            builtin::STREAM_IN,
            StageArgs::default().with_producer(producer),
        )?;
        let adapt_in = self.add(&mut graph, builtin::FORMAT_ADAPTER, StageArgs::default())?;
        let fade_in = self.add(
            &mut graph,
            builtin::FADE_IN,
            StageArgs::new([FADE_IN_MS.to_string()]),
        )?;
        link(&mut graph, pcm, entry, 0, adapt_in, 0)?;
        link(&mut graph, float, adapt_in, 0, fade_in, 0)?;

        let gain = self.add(
            &mut graph,
            builtin::GAIN,
            StageArgs::new([channel_arg.as_str()]),
        )?;

        // Last stage of the volume section
        let volume_out = if channels > 1 {
            let split = self.add(
                &mut graph,
                builtin::DEINTERLEAVE,
                StageArgs::new([channel_arg.as_str()]),
            )?;
            let merge = self.add(
                &mut graph,
                builtin::INTERLEAVE,
                StageArgs::new([channel_arg.as_str()]),
            )?;
            link(&mut graph, float, fade_in, 0, split, 0)?;
            for channel in 0..channels {
                link(&mut graph, mono, split, channel, gain, channel)?;
                link(&mut graph, mono, gain, channel, merge, channel)?;
            }
            merge
        } else {
            link(&mut graph, float, fade_in, 0, gain, 0)?;
            gain
        };

        let pitch_tempo_available = self.registry.contains(builtin::PITCH_TEMPO);
        let pitch_tempo = if pitch_tempo_available {
            self.add(&mut graph, builtin::PITCH_TEMPO, StageArgs::default())?
        } else {
            tracing::warn!("No pitch/tempo stage registered; pitch and tempo changes are inaudible");
            self.add(&mut graph, builtin::PASS_THROUGH, StageArgs::default())?
        };
        let fade_out = self.add(
            &mut graph,
            builtin::FADE_OUT,
            StageArgs::new([FADE_OUT_MS.to_string()]),
        )?;
        let adapt_out = self.add(&mut graph, builtin::FORMAT_ADAPTER, StageArgs::default())?;
        link(&mut graph, float, volume_out, 0, pitch_tempo, 0)?;
        link(&mut graph, float, pitch_tempo, 0, fade_out, 0)?;
        link(&mut graph, float, fade_out, 0, adapt_out, 0)?;

        let sink_args = match output {
            OutputKind::Device => {
                StageArgs::new([channel_arg.clone(), header.sample_rate.to_string()])
            }
            OutputKind::Stdout => StageArgs::new([builtin::file_writer::STDOUT_TARGET]),
            OutputKind::Null => StageArgs::new([builtin::file_writer::NULL_TARGET]),
            OutputKind::File(path) => StageArgs::new([path.to_string_lossy().into_owned()]),
        };
        let sink_id = match output {
            OutputKind::Device => builtin::DEVICE_PLAYBACK,
            _ => builtin::FILE_WRITER,
        };

        if let Some(record) = record {
            let split = self.add(&mut graph, builtin::DUPLICATOR, StageArgs::default())?;
            let sink = self.add(&mut graph, sink_id, sink_args)?;
            let recorder = self.add(
                &mut graph,
                builtin::FILE_WRITER,
                StageArgs::new([record.to_string_lossy().into_owned()]),
            )?;
            link(&mut graph, pcm, adapt_out, 0, split, 0)?;
            link(&mut graph, pcm, split, 0, sink, 0)?;
            link(&mut graph, pcm, split, 1, recorder, 0)?;
        } else {
            let sink = self.add(&mut graph, sink_id, sink_args)?;
            link(&mut graph, pcm, adapt_out, 0, sink, 0)?;
        }

        graph.finalize()?;

        Ok(Topology {
            graph,
            handles: GraphHandles {
                gain,
                fade_out,
                pitch_tempo,
                pitch_tempo_available,
                channels,
            },
        })
    }

    fn add(
        &self,
        graph: &mut ProcessingGraph,
        id: &str,
        args: StageArgs,
    ) -> Result<StageId, BuildError> {
        let stage = self
            .registry
            .create(id, &args)
            .map_err(|source| BuildError::StageCreation {
                stage: id.to_string(),
                source,
            })?;
        Ok(graph.add_stage(stage))
    }
}

fn link(
    graph: &mut ProcessingGraph,
    contract: LinkContract,
    from: StageId,
    from_port: usize,
    to: StageId,
    to_port: usize,
) -> Result<(), BuildError> {
    graph
        .connect(contract, from, from_port, to, to_port)
        .map(|_| ())
        .map_err(|source| BuildError::Link {
            from: graph.stage_name(from).unwrap_or("?").to_string(),
            to: graph.stage_name(to).unwrap_or("?").to_string(),
            source,
        })
}

/// Topology build failures
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Failed to create stage '{stage}': {source}")]
    StageCreation {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Failed to link '{from}' to '{to}': {source}")]
    Link {
        from: String,
        to: String,
        #[source]
        source: GraphError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),
}
