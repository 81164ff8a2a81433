//! Audio engine - runs a processing graph on its own thread.
//!
//! The engine owns the graph. Commands arrive over a channel; lifecycle
//! transitions are reported through a [`LifecycleListener`]. While running,
//! the worker ticks the graph as fast as the terminal stage accepts blocks.

use std::ops::ControlFlow;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use kplay_core::StopReason;
use kplay_stage::Flow;

use crate::graph::{ProcessingGraph, StageId};

/// Receives engine lifecycle notifications, on the engine thread
pub trait LifecycleListener: Send + 'static {
    /// The first block of a run is about to be produced
    fn on_started(&self);

    /// No further blocks will be produced until the next start
    fn on_stopped(&self, reason: StopReason);
}

/// Commands sent to the engine thread
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Start,
    Stop,
    SetParameter {
        stage: StageId,
        param: u32,
        args: Vec<String>,
    },
    Shutdown,
}

/// Handle to the engine thread
pub struct AudioEngine {
    command_tx: Sender<EngineCommand>,
    worker: Option<JoinHandle<()>>,
}

impl AudioEngine {
    /// Move `graph` onto a new engine thread, initially stopped
    pub fn spawn(
        graph: ProcessingGraph,
        listener: impl LifecycleListener,
    ) -> Result<Self, EngineError> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();

        let worker = std::thread::Builder::new()
            .name("kplay-engine".to_string())
            .spawn(move || run(graph, &listener, &command_rx))
            .map_err(EngineError::Spawn)?;

        tracing::info!("Audio engine spawned");
        Ok(Self {
            command_tx,
            worker: Some(worker),
        })
    }

    /// Begin producing from the start of the stream; ignored while running
    pub fn start(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Start)
    }

    /// Stop producing; ignored while stopped
    pub fn stop(&self) -> Result<(), EngineError> {
        self.send(EngineCommand::Stop)
    }

    /// Forward a parameter to one stage, applied between blocks
    pub fn set_parameter(
        &self,
        stage: StageId,
        param: u32,
        args: Vec<String>,
    ) -> Result<(), EngineError> {
        self.send(EngineCommand::SetParameter { stage, param, args })
    }

    /// Stop the thread and release the graph
    pub fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.command_tx.send(EngineCommand::Shutdown);
            if worker.join().is_err() {
                tracing::error!("Audio engine thread panicked");
            }
            tracing::info!("Audio engine shut down");
        }
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.command_tx
            .send(command)
            .map_err(|_| EngineError::Disconnected)
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("running", &self.worker.is_some())
            .finish()
    }
}

/// Engine thread body
fn run(
    mut graph: ProcessingGraph,
    listener: &dyn LifecycleListener,
    commands: &Receiver<EngineCommand>,
) {
    let mut running = false;

    loop {
        if running {
            // Apply everything queued, then produce one block
            loop {
                match commands.try_recv() {
                    Ok(command) => {
                        if handle(command, &mut graph, listener, &mut running).is_break() {
                            return;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }
            if running {
                if let Some(reason) = tick(&mut graph) {
                    running = false;
                    listener.on_stopped(reason);
                }
            }
        } else {
            let Ok(command) = commands.recv() else {
                return;
            };
            if handle(command, &mut graph, listener, &mut running).is_break() {
                return;
            }
        }
    }
}

fn handle(
    command: EngineCommand,
    graph: &mut ProcessingGraph,
    listener: &dyn LifecycleListener,
    running: &mut bool,
) -> ControlFlow<()> {
    match command {
        EngineCommand::Start => {
            if !*running {
                graph.reset();
                *running = true;
                tracing::info!("Playback started");
                listener.on_started();
            }
        }
        EngineCommand::Stop => {
            if *running {
                *running = false;
                tracing::info!("Playback stopped");
                listener.on_stopped(StopReason::UserRequested);
            }
        }
        EngineCommand::SetParameter { stage, param, args } => {
            tracing::debug!("Parameter {} {:?} -> stage {}", param, args, stage);
            if let Err(err) = graph.set_parameter(stage, param, &args) {
                tracing::warn!("Rejected parameter: {}", err);
            }
        }
        EngineCommand::Shutdown => {
            if *running {
                *running = false;
                listener.on_stopped(StopReason::UserRequested);
            }
            return ControlFlow::Break(());
        }
    }
    ControlFlow::Continue(())
}

/// Produce one block; `Some` when the run is over
fn tick(graph: &mut ProcessingGraph) -> Option<StopReason> {
    match graph.tick() {
        Ok(Flow::Continue) => None,
        Ok(Flow::EndOfStream) => {
            tracing::info!("End of stream");
            Some(StopReason::EndOfStream)
        }
        Ok(Flow::Drained) => {
            tracing::info!("Fade-out complete");
            Some(StopReason::UserRequested)
        }
        Err(err) => {
            tracing::error!("Playback failed: {}", err);
            Some(StopReason::Error)
        }
    }
}

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Engine thread is gone")]
    Disconnected,
}
