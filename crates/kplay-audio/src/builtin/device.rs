//! Device playback - terminal stage feeding the default output device.
//!
//! The cpal stream lives on its own thread. Decoded blocks travel to the
//! device callback over a bounded channel; `process` blocks while that channel
//! is full, which paces the engine to the device clock. Played buffers come
//! back over a second channel for reuse.

use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};
use kplay_core::{SampleFormat, SampleRate};
use kplay_stage::{Block, Flow, LinkContract, Port, Stage, StageArgs, StageError};

use crate::pcm;

/// Blocks queued ahead of the device
const QUEUED_BLOCKS: usize = 4;

/// Errors raised while opening the output device
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("No output device available")]
    NoDevice,

    #[error("Failed to build output stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    #[error("Failed to start output stream: {0}")]
    Play(#[from] cpal::PlayStreamError),
}

pub struct DevicePlayback {
    channels: u16,
    sample_rate: SampleRate,
    format: Option<SampleFormat>,
    filled_tx: Option<Sender<Vec<f32>>>,
    free_rx: Receiver<Vec<f32>>,
    shutdown_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl DevicePlayback {
    /// `args` are `[channels, sample_rate]`; the device is opened immediately
    pub fn new(args: &StageArgs) -> Result<Self, StageError> {
        let channels = args.parse::<u16>(0)?.filter(|&c| c > 0).ok_or_else(|| {
            StageError::InvalidArgument("device-playback needs a channel count".to_string())
        })?;
        let sample_rate = args.parse::<u32>(1)?.filter(|&r| r > 0).ok_or_else(|| {
            StageError::InvalidArgument("device-playback needs a sample rate".to_string())
        })?;

        let (filled_tx, filled_rx) = crossbeam_channel::bounded(QUEUED_BLOCKS);
        let (free_tx, free_rx) = crossbeam_channel::bounded(QUEUED_BLOCKS + 2);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let worker = std::thread::Builder::new()
            .name("kplay-device".to_string())
            .spawn(move || {
                let stream = match open_stream(channels, sample_rate, filled_rx, free_tx) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns once the stage drops its sender
                let _ = shutdown_rx.recv();
                if let Err(err) = stream.pause() {
                    tracing::warn!("Failed to pause output stream: {}", err);
                }
                tracing::info!("Output stream closed");
            })
            .map_err(|err| StageError::CreationFailed(format!("cannot spawn device thread: {err}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(StageError::CreationFailed(err.to_string()));
            }
            Err(_) => {
                let _ = worker.join();
                return Err(StageError::CreationFailed(
                    "device thread exited during startup".to_string(),
                ));
            }
        }

        Ok(Self {
            channels,
            sample_rate,
            format: None,
            filled_tx: Some(filled_tx),
            free_rx,
            shutdown_tx: Some(shutdown_tx),
            worker: Some(worker),
        })
    }
}

fn open_stream(
    channels: u16,
    sample_rate: SampleRate,
    filled_rx: Receiver<Vec<f32>>,
    free_tx: Sender<Vec<f32>>,
) -> Result<cpal::Stream, DeviceError> {
    let host = cpal::default_host();
    tracing::debug!("Using audio host: {}", host.id().name());

    let device = host.default_output_device().ok_or(DeviceError::NoDevice)?;
    tracing::info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "unknown".to_string())
    );

    let config = cpal::StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    tracing::debug!("Stream config: {:?}", config);

    let mut current: Vec<f32> = Vec::new();
    let mut position = 0;

    // The callback only moves samples; no logging or allocation in here
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for sample in data.iter_mut() {
                if position >= current.len() {
                    match filled_rx.try_recv() {
                        Ok(next) => {
                            let played = std::mem::replace(&mut current, next);
                            if played.capacity() > 0 {
                                let _ = free_tx.try_send(played);
                            }
                            position = 0;
                        }
                        Err(_) => {
                            // Underrun
                            *sample = 0.0;
                            continue;
                        }
                    }
                }
                *sample = current.get(position).copied().unwrap_or(0.0);
                position += 1;
            }
        },
        move |err| {
            tracing::error!("Audio stream error: {}", err);
        },
        None,
    )?;

    stream.play()?;
    tracing::info!("Audio stream started");
    Ok(stream)
}

impl Stage for DevicePlayback {
    fn name(&self) -> &str {
        super::DEVICE_PLAYBACK
    }

    fn input_ports(&self) -> usize {
        1
    }

    fn output_ports(&self) -> usize {
        0
    }

    fn negotiate(&mut self, port: Port, contract: &LinkContract) -> Result<(), StageError> {
        if contract.channels != usize::from(self.channels) || contract.sample_rate != self.sample_rate
        {
            return Err(StageError::rejected(
                port,
                format!(
                    "device opened for {} Hz x{}, got {contract}",
                    self.sample_rate, self.channels
                ),
            ));
        }
        self.format = Some(contract.format);
        Ok(())
    }

    fn configure(&mut self, param: u32, _args: &[String]) -> Result<(), StageError> {
        Err(StageError::InvalidParameter(format!(
            "Unknown parameter ID: {param}"
        )))
    }

    fn process(&mut self, inputs: &[&Block], _outputs: &mut [Block]) -> Result<Flow, StageError> {
        let (Some(input), Some(format), Some(filled_tx)) =
            (inputs.first(), self.format, self.filled_tx.as_ref())
        else {
            return Err(StageError::ProcessingFailed(
                "device-playback is not linked".to_string(),
            ));
        };

        let mut buffer = self.free_rx.try_recv().unwrap_or_default();
        if format.is_pcm() {
            buffer.resize(input.pcm().len() / format.bytes_per_sample(), 0.0);
            pcm::decode(format, input.pcm(), &mut buffer);
        } else {
            buffer.clear();
            buffer.extend_from_slice(input.samples());
        }

        filled_tx
            .send(buffer)
            .map_err(|_| StageError::ProcessingFailed("output device is gone".to_string()))?;
        Ok(Flow::Continue)
    }
}

impl Drop for DevicePlayback {
    fn drop(&mut self) {
        self.filled_tx.take();
        self.shutdown_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("Device thread panicked");
            }
        }
    }
}
