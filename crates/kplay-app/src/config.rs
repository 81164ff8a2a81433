//! Startup configuration: command-line values over settings file over defaults.

use std::path::{Path, PathBuf};

use kplay_audio::OutputKind;
use kplay_control::state::{PITCH_MAX, PITCH_MIN, TEMPO_MAX, TEMPO_MIN};
use kplay_control::{Mode, PlaybackState};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid settings file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Pitch must be a positive number, got {0}")]
    Pitch(f32),

    #[error("Tempo must be a positive number, got {0}")]
    Tempo(f32),
}

/// Optional session settings, from a RON file or the command line
///
/// ```ron
/// (
///     output: "null",
///     mode: "repeat",
///     volume: 0.8,
/// )
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub output: Option<String>,
    pub record: Option<PathBuf>,
    pub mode: Option<Mode>,
    pub volume: Option<f32>,
    pub pitch: Option<f32>,
    pub tempo: Option<f32>,
    pub quiet: Option<bool>,
}

impl Settings {
    /// Load settings from a RON file; bare values need no `Some(...)`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(&text)
            .map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })
    }

    /// Fill every unset field from `fallback`
    #[must_use]
    pub fn or(self, fallback: Self) -> Self {
        Self {
            output: self.output.or(fallback.output),
            record: self.record.or(fallback.record),
            mode: self.mode.or(fallback.mode),
            volume: self.volume.or(fallback.volume),
            pitch: self.pitch.or(fallback.pitch),
            tempo: self.tempo.or(fallback.tempo),
            quiet: self.quiet.or(fallback.quiet),
        }
    }

    /// Validate and apply defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let mut state = PlaybackState {
            mode: self.mode.unwrap_or_default(),
            ..PlaybackState::default()
        };

        if let Some(volume) = self.volume.and_then(validate_volume) {
            state.master_volume = volume;
            state.muted = volume == 0.0;
        }
        if let Some(pitch) = self.pitch {
            state.pitch = validate_ratio(pitch, "pitch", PITCH_MIN, PITCH_MAX)
                .ok_or(ConfigError::Pitch(pitch))?;
        }
        if let Some(tempo) = self.tempo {
            state.tempo = validate_ratio(tempo, "tempo", TEMPO_MIN, TEMPO_MAX)
                .ok_or(ConfigError::Tempo(tempo))?;
        }

        Ok(Config {
            output: self
                .output
                .as_deref()
                .map_or(OutputKind::Device, parse_output),
            record: self.record,
            state,
            quiet: self.quiet.unwrap_or(false),
        })
    }
}

/// Everything a session needs besides the input file
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub output: OutputKind,
    pub record: Option<PathBuf>,
    pub state: PlaybackState,
    pub quiet: bool,
}

/// Parse a numeric argument leniently; garbage is ignored with a warning
pub fn parse_number(name: &str, raw: &str) -> Option<f32> {
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {} {:?}", name, raw);
            None
        }
    }
}

/// Map an output name to a sink; unknown names are file paths
pub fn parse_output(name: &str) -> OutputKind {
    match name {
        "device" | "default" | "portaudio" | "alsa" | "tinyalsa" => OutputKind::Device,
        "stdout" | "-" => OutputKind::Stdout,
        "null" => OutputKind::Null,
        path => OutputKind::File(PathBuf::from(path)),
    }
}

/// Clamp into `[0, 1]`; `None` keeps the default
fn validate_volume(volume: f32) -> Option<f32> {
    if volume.is_nan() {
        tracing::warn!("Volume is not a number, using the default");
        return None;
    }
    let clamped = volume.clamp(0.0, 1.0);
    if clamped != volume {
        tracing::warn!("Volume {} out of range, using {}", volume, clamped);
    }
    Some(clamped)
}

/// `None` for zero or negative ratios; clamps the rest
fn validate_ratio(value: f32, name: &str, min: f32, max: f32) -> Option<f32> {
    if value <= 0.0 {
        return None;
    }
    if value.is_nan() {
        tracing::warn!("{} is not a number, using 1.0", name);
        return Some(1.0);
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        tracing::warn!("{} {} out of range, using {}", name, value, clamped);
    }
    Some(clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Settings::default().resolve().unwrap();
        assert_eq!(config.output, OutputKind::Device);
        assert_eq!(config.record, None);
        assert_eq!(config.state, PlaybackState::default());
        assert!(!config.quiet);
    }

    #[test]
    fn test_output_names() {
        assert_eq!(parse_output("alsa"), OutputKind::Device);
        assert_eq!(parse_output("-"), OutputKind::Stdout);
        assert_eq!(parse_output("null"), OutputKind::Null);
        assert_eq!(
            parse_output("out.raw"),
            OutputKind::File(PathBuf::from("out.raw"))
        );
    }

    #[test]
    fn test_volume_rules() {
        let resolve = |volume| {
            Settings {
                volume: Some(volume),
                ..Settings::default()
            }
            .resolve()
        };

        let config = resolve(0.0).unwrap();
        assert!(config.state.muted);
        assert_eq!(config.state.master_volume, 0.0);

        assert_eq!(resolve(3.0).unwrap().state.master_volume, 1.0);
        assert!(!resolve(0.5).unwrap().state.muted);

        let negative = resolve(-0.1).unwrap();
        assert_eq!(negative.state.master_volume, 0.0);
        assert!(negative.state.muted);

        let nan = resolve(f32::NAN).unwrap();
        assert_eq!(nan.state.master_volume, 1.0);
        assert!(!nan.state.muted);
    }

    #[test]
    fn test_pitch_and_tempo_rules() {
        let settings = Settings {
            pitch: Some(500.0),
            tempo: Some(0.01),
            ..Settings::default()
        };
        let state = settings.resolve().unwrap().state;
        assert_eq!(state.pitch, PITCH_MAX);
        assert_eq!(state.tempo, TEMPO_MIN);

        let zero_pitch = Settings {
            pitch: Some(0.0),
            ..Settings::default()
        };
        assert!(matches!(zero_pitch.resolve(), Err(ConfigError::Pitch(_))));

        let negative_tempo = Settings {
            tempo: Some(-1.0),
            ..Settings::default()
        };
        assert!(matches!(
            negative_tempo.resolve(),
            Err(ConfigError::Tempo(_))
        ));
    }

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(parse_number("volume", " 0.5"), Some(0.5));
        assert_eq!(parse_number("pitch", "fast"), None);
    }

    #[test]
    fn test_command_line_overrides_file() {
        let cli = Settings {
            mode: Some(Mode::Repeat),
            ..Settings::default()
        };
        let file = Settings {
            mode: Some(Mode::NonInteractive),
            output: Some("null".to_string()),
            ..Settings::default()
        };
        let config = cli.or(file).resolve().unwrap();
        assert_eq!(config.state.mode, Mode::Repeat);
        assert_eq!(config.output, OutputKind::Null);
    }

    #[test]
    fn test_load_ron_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kplay.ron");
        std::fs::write(
            &path,
            "(output: \"stdout\", mode: \"once\", volume: 0.25, quiet: true)",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.mode, Some(Mode::NonInteractive));
        assert_eq!(settings.volume, Some(0.25));

        let config = settings.resolve().unwrap();
        assert_eq!(config.output, OutputKind::Stdout);
        assert!(config.quiet);
    }

    #[test]
    fn test_load_rejects_unknown_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kplay.ron");
        std::fs::write(&path, "(speed: 2.0)").unwrap();
        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Settings::load("/nonexistent/kplay.ron"),
            Err(ConfigError::Read { .. })
        ));
    }
}
