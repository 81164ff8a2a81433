//! Interactive control layer.
//!
//! Owns the playback state and everything that changes it: the key map, the
//! keyboard reader, the control actor and the console status line.

pub mod actor;
pub mod display;
pub mod keyboard;
pub mod keymap;
pub mod state;

pub use actor::{ControlActor, EngineControl, QueueListener};
pub use display::{ConsoleStatus, StatusView};
pub use keyboard::RawModeGuard;
pub use state::{Mode, PlaybackState, TransportState};
