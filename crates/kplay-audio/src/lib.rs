//! PCM source, processing graph and audio engine.
//!
//! This crate reads WAV payloads, assembles the stage graph that renders
//! them, and runs that graph on a dedicated engine thread feeding either the
//! default output device (via cpal) or a file.

pub mod builtin;
pub mod engine;
pub mod graph;
pub mod pcm;
pub mod source;
pub mod topology;

pub use builtin::StageRegistry;
pub use engine::{AudioEngine, EngineCommand, EngineError, LifecycleListener};
pub use graph::{GraphError, ProcessingGraph, StageId};
pub use source::{OpenError, PcmSource, StreamHeader};
pub use topology::{BuildError, GraphHandles, OutputKind, Topology, TopologyBuilder};
