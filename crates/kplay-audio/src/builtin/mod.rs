//! Built-in stages.
//!
//! Everything a playback topology needs except pitch/tempo shifting lives
//! here. Additional stages (such as a real pitch/tempo processor) are added to
//! a [`StageRegistry`] at runtime under their identifier.

pub mod channels;
pub mod device;
pub mod duplicator;
pub mod fade;
pub mod file_writer;
pub mod format_adapter;
pub mod gain;
pub mod stream_in;
pub mod through;

use std::collections::HashMap;

use kplay_stage::{Stage, StageArgs, StageError};

pub const STREAM_IN: &str = "stream-in";
pub const FORMAT_ADAPTER: &str = "format-adapter";
pub const FADE_IN: &str = "fade-in";
pub const FADE_OUT: &str = "fade-out";
pub const DEINTERLEAVE: &str = "deinterleave";
pub const INTERLEAVE: &str = "interleave";
pub const GAIN: &str = "gain";
pub const PITCH_TEMPO: &str = "pitch-tempo";
pub const PASS_THROUGH: &str = "pass-through";
pub const DUPLICATOR: &str = "duplicator";
pub const FILE_WRITER: &str = "file-writer";
pub const DEVICE_PLAYBACK: &str = "device-playback";

/// Create a built-in stage by identifier
///
/// Returns `None` if the identifier doesn't match any built-in stage.
///
/// # Examples
///
/// ```
/// use kplay_audio::builtin;
/// use kplay_stage::StageArgs;
///
/// let gain = builtin::create_builtin("gain", &StageArgs::new(["2"]));
/// assert!(matches!(gain, Some(Ok(_))));
/// ```
pub fn create_builtin(id: &str, args: &StageArgs) -> Option<Result<Box<dyn Stage>, StageError>> {
    let stage = match id {
        STREAM_IN => stream_in::StreamIn::new(args).map(boxed),
        FORMAT_ADAPTER => Ok(boxed(format_adapter::FormatAdapter::default())),
        FADE_IN => fade::Fade::new(fade::FadeDirection::In, args).map(boxed),
        FADE_OUT => fade::Fade::new(fade::FadeDirection::Out, args).map(boxed),
        DEINTERLEAVE => channels::Deinterleave::new(args).map(boxed),
        INTERLEAVE => channels::Interleave::new(args).map(boxed),
        GAIN => gain::Gain::new(args).map(boxed),
        PASS_THROUGH => Ok(boxed(through::PassThrough::default())),
        DUPLICATOR => Ok(boxed(duplicator::Duplicator::default())),
        FILE_WRITER => file_writer::FileWriter::new(args).map(boxed),
        DEVICE_PLAYBACK => device::DevicePlayback::new(args).map(boxed),
        _ => return None,
    };
    Some(stage)
}

fn boxed<S: Stage + 'static>(stage: S) -> Box<dyn Stage> {
    Box::new(stage)
}

type StageFactory = Box<dyn Fn(&StageArgs) -> Result<Box<dyn Stage>, StageError> + Send + Sync>;

/// Stage identifiers mapped to factories
///
/// Built once, before any topology is built, then only read.
pub struct StageRegistry {
    factories: HashMap<String, StageFactory>,
}

impl StageRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in stage
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for id in [
            STREAM_IN,
            FORMAT_ADAPTER,
            FADE_IN,
            FADE_OUT,
            DEINTERLEAVE,
            INTERLEAVE,
            GAIN,
            PASS_THROUGH,
            DUPLICATOR,
            FILE_WRITER,
            DEVICE_PLAYBACK,
        ] {
            registry.register(id, move |args| {
                create_builtin(id, args).unwrap_or_else(|| Err(StageError::NotFound(id.to_string())))
            });
        }
        registry
    }

    /// Register (or replace) the factory for `id`
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&StageArgs) -> Result<Box<dyn Stage>, StageError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Box::new(factory));
    }

    /// Remove the factory for `id`, returning whether one was present
    pub fn unregister(&mut self, id: &str) -> bool {
        self.factories.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Instantiate the stage registered under `id`
    pub fn create(&self, id: &str, args: &StageArgs) -> Result<Box<dyn Stage>, StageError> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| StageError::NotFound(id.to_string()))?;
        factory(args)
    }
}

impl Default for StageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("StageRegistry").field("ids", &ids).finish()
    }
}
