//! Playback state owned by the control actor.
//!
//! Every mutator returns whether it changed anything, so the caller only
//! pushes parameters that actually moved.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

pub const PITCH_MIN: f32 = 0.1;
pub const PITCH_MAX: f32 = 100.0;
pub const TEMPO_MIN: f32 = 0.1;
pub const TEMPO_MAX: f32 = 30.0;

/// Multiplier applied by one "up" step of pitch or tempo
pub const STEP_UP: f32 = 1.01;

/// Multiplier applied by one "down" step of pitch or tempo
pub const STEP_DOWN: f32 = 0.99;

/// Increment of one volume or balance step
pub const LEVEL_STEP: f32 = 0.01;

/// What happens when the stream ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Mode {
    /// Rewind and stay stopped
    #[default]
    Normal,
    /// Rewind and play again
    Repeat,
    /// Rewind and leave the session
    NonInteractive,
}

impl TryFrom<String> for Mode {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "repeat" => Ok(Self::Repeat),
            "non-interactive" | "noninteractive" | "once" => Ok(Self::NonInteractive),
            other => Err(format!(
                "unknown mode '{other}' (expected normal, repeat or non-interactive)"
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Repeat => write!(f, "repeat"),
            Self::NonInteractive => write!(f, "non-interactive"),
        }
    }
}

/// Whether the engine is producing audio, as last confirmed by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub pitch: f32,
    pub tempo: f32,
    /// Balance multiplier of the left channel
    pub volume_left: f32,
    /// Balance multiplier of the right channel
    pub volume_right: f32,
    pub master_volume: f32,
    pub muted: bool,
    pub mode: Mode,
    pub transport: TransportState,
    /// Fraction of the payload consumed, in `[0, 1]`
    pub progress: f32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            tempo: 1.0,
            volume_left: 1.0,
            volume_right: 1.0,
            master_volume: 1.0,
            muted: false,
            mode: Mode::Normal,
            transport: TransportState::Stopped,
            progress: 0.0,
        }
    }
}

/// Round to the nearest hundredth so stepping lands exactly on 0 and 1
fn round_cents(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

fn scale(value: &mut f32, factor: f32, min: f32, max: f32) -> bool {
    let next = (*value * factor).clamp(min, max);
    let changed = next != *value;
    *value = next;
    changed
}

fn assign(value: &mut f32, next: f32) -> bool {
    let changed = next != *value;
    *value = next;
    changed
}

impl PlaybackState {
    pub fn pitch_up(&mut self) -> bool {
        scale(&mut self.pitch, STEP_UP, PITCH_MIN, PITCH_MAX)
    }

    pub fn pitch_down(&mut self) -> bool {
        scale(&mut self.pitch, STEP_DOWN, PITCH_MIN, PITCH_MAX)
    }

    pub fn pitch_reset(&mut self) -> bool {
        assign(&mut self.pitch, 1.0)
    }

    pub fn tempo_up(&mut self) -> bool {
        scale(&mut self.tempo, STEP_UP, TEMPO_MIN, TEMPO_MAX)
    }

    pub fn tempo_down(&mut self) -> bool {
        scale(&mut self.tempo, STEP_DOWN, TEMPO_MIN, TEMPO_MAX)
    }

    pub fn tempo_reset(&mut self) -> bool {
        assign(&mut self.tempo, 1.0)
    }

    /// Shift the balance one step towards the left channel
    ///
    /// Raises the left multiplier while it is below unity, then lowers the
    /// right one.
    pub fn balance_left(&mut self) -> bool {
        if self.volume_left < 1.0 {
            let level = round_cents(self.volume_left + LEVEL_STEP).min(1.0);
            assign(&mut self.volume_left, level)
        } else {
            let level = round_cents(self.volume_right - LEVEL_STEP).max(0.0);
            assign(&mut self.volume_right, level)
        }
    }

    /// Shift the balance one step towards the right channel
    pub fn balance_right(&mut self) -> bool {
        if self.volume_right < 1.0 {
            let level = round_cents(self.volume_right + LEVEL_STEP).min(1.0);
            assign(&mut self.volume_right, level)
        } else {
            let level = round_cents(self.volume_left - LEVEL_STEP).max(0.0);
            assign(&mut self.volume_left, level)
        }
    }

    pub fn balance_mid(&mut self) -> bool {
        let left = assign(&mut self.volume_left, 1.0);
        let right = assign(&mut self.volume_right, 1.0);
        left || right
    }

    pub fn volume_up(&mut self) -> bool {
        self.set_master(round_cents(self.master_volume + LEVEL_STEP))
    }

    pub fn volume_down(&mut self) -> bool {
        self.set_master(round_cents(self.master_volume - LEVEL_STEP))
    }

    /// Set the master volume; the mute flag follows whether it reached zero
    pub fn set_master(&mut self, volume: f32) -> bool {
        let changed = assign(&mut self.master_volume, volume.clamp(0.0, 1.0));
        if changed {
            self.muted = self.master_volume == 0.0;
        }
        changed
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        true
    }

    /// Per-channel gains to push into the graph
    ///
    /// Mono streams ignore the balance multipliers.
    pub fn effective_gains(&self, channels: usize) -> Vec<f32> {
        let master = if self.muted { 0.0 } else { self.master_volume };
        if channels < 2 {
            vec![master]
        } else {
            vec![self.volume_left * master, self.volume_right * master]
        }
    }

    pub fn is_playing(&self) -> bool {
        self.transport == TransportState::Playing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = PlaybackState::default();
        assert_eq!(state.pitch, 1.0);
        assert_eq!(state.tempo, 1.0);
        assert_eq!(state.effective_gains(2), vec![1.0, 1.0]);
        assert_eq!(state.mode, Mode::Normal);
        assert!(!state.is_playing());
    }

    #[test]
    fn test_balance_right_drains_left_channel() {
        let mut state = PlaybackState::default();
        for _ in 0..100 {
            assert!(state.balance_right());
            assert!(state.volume_left == 1.0 || state.volume_right == 1.0);
        }
        assert_eq!(state.volume_left, 0.0);
        assert_eq!(state.volume_right, 1.0);

        for _ in 0..10 {
            assert!(!state.balance_right());
        }
        assert_eq!(state.volume_left, 0.0);
        assert_eq!(state.volume_right, 1.0);
    }

    #[test]
    fn test_balance_left_first_restores_left() {
        let mut state = PlaybackState::default();
        for _ in 0..3 {
            state.balance_right();
        }
        assert_eq!(state.volume_left, 0.97);

        for _ in 0..3 {
            state.balance_left();
        }
        assert_eq!(state.volume_left, 1.0);
        assert_eq!(state.volume_right, 1.0);

        state.balance_left();
        assert_eq!(state.volume_left, 1.0);
        assert_eq!(state.volume_right, 0.99);

        assert!(state.balance_mid());
        assert!(!state.balance_mid());
        assert_eq!(state.effective_gains(2), vec![1.0, 1.0]);
    }

    #[test]
    fn test_mute_keeps_levels() {
        let mut state = PlaybackState::default();
        for _ in 0..5 {
            state.balance_left();
            state.volume_down();
        }
        let before = state.clone();

        state.toggle_mute();
        assert_eq!(state.effective_gains(2), vec![0.0, 0.0]);
        assert_eq!(state.volume_left, before.volume_left);
        assert_eq!(state.volume_right, before.volume_right);
        assert_eq!(state.master_volume, before.master_volume);

        state.toggle_mute();
        assert_eq!(state.effective_gains(2), before.effective_gains(2));
    }

    #[test]
    fn test_volume_reaching_zero_mutes() {
        let mut state = PlaybackState::default();
        for _ in 0..100 {
            assert!(state.volume_down());
        }
        assert_eq!(state.master_volume, 0.0);
        assert!(state.muted);
        assert!(!state.volume_down());

        assert!(state.volume_up());
        assert_eq!(state.master_volume, 0.01);
        assert!(!state.muted);
    }

    #[test]
    fn test_volume_key_unmutes() {
        let mut state = PlaybackState::default();
        state.toggle_mute();
        assert!(state.volume_down());
        assert!(!state.muted);
        assert_eq!(state.effective_gains(1), vec![0.99]);
    }

    #[test]
    fn test_volume_up_is_idempotent_at_unity() {
        let mut state = PlaybackState::default();
        state.toggle_mute();
        assert!(!state.volume_up());
        assert_eq!(state.master_volume, 1.0);
        assert!(state.muted);
    }

    #[test]
    fn test_pitch_and_tempo_clamp() {
        let mut state = PlaybackState::default();
        for _ in 0..1000 {
            state.pitch_up();
            state.tempo_up();
        }
        assert_eq!(state.pitch, PITCH_MAX);
        assert_eq!(state.tempo, TEMPO_MAX);
        assert!(!state.pitch_up());
        assert!(!state.tempo_up());

        for _ in 0..1000 {
            state.pitch_down();
            state.tempo_down();
        }
        assert_eq!(state.pitch, PITCH_MIN);
        assert_eq!(state.tempo, TEMPO_MIN);
        assert!(!state.pitch_down());
        assert!(!state.tempo_down());

        assert!(state.pitch_reset());
        assert!(state.tempo_reset());
        assert!(!state.pitch_reset());
        assert_eq!(state.pitch, 1.0);
        assert_eq!(state.tempo, 1.0);
    }

    #[test]
    fn test_pitch_step() {
        let mut state = PlaybackState::default();
        state.pitch_up();
        assert!((state.pitch - 1.01).abs() < 1e-6);
        state.pitch_reset();
        state.pitch_down();
        assert!((state.pitch - 0.99).abs() < 1e-6);
    }

    #[test]
    fn test_mono_gain_ignores_balance() {
        let mut state = PlaybackState::default();
        state.balance_right();
        state.volume_down();
        assert_eq!(state.effective_gains(1), vec![0.99]);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("repeat".parse::<Mode>().unwrap(), Mode::Repeat);
        assert_eq!("once".parse::<Mode>().unwrap(), Mode::NonInteractive);
        assert_eq!("Normal".parse::<Mode>().unwrap(), Mode::Normal);
        assert!("shuffle".parse::<Mode>().is_err());
        assert_eq!(Mode::NonInteractive.to_string(), "non-interactive");
    }
}
