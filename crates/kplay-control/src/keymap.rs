//! Single-key command map.

use kplay_comms::Command;

/// Keys with their commands and help text, in display order
pub const KEY_BINDINGS: &[(char, Command, &str)] = &[
    ('q', Command::BalanceLeft, "balance left"),
    ('w', Command::BalanceMid, "balance center"),
    ('e', Command::BalanceRight, "balance right"),
    ('r', Command::PitchUp, "pitch up"),
    ('f', Command::PitchDown, "pitch down"),
    ('v', Command::PitchReset, "pitch reset"),
    ('t', Command::TempoUp, "tempo up"),
    ('g', Command::TempoDown, "tempo down"),
    ('b', Command::TempoReset, "tempo reset"),
    ('a', Command::VolumeDown, "volume down"),
    ('s', Command::VolumeUp, "volume up"),
    ('d', Command::ToggleMute, "mute on/off"),
    ('z', Command::SeekToBegin, "seek to begin"),
    ('x', Command::TogglePlay, "play/stop"),
    ('c', Command::Exit, "exit"),
];

/// Balance only applies to stereo streams
pub const fn is_balance(command: Command) -> bool {
    matches!(
        command,
        Command::BalanceLeft | Command::BalanceMid | Command::BalanceRight
    )
}

/// Command bound to `key`, if any
pub fn command_for(key: char, channels: usize) -> Option<Command> {
    let key = key.to_ascii_lowercase();
    KEY_BINDINGS
        .iter()
        .find(|(bound, _, _)| *bound == key)
        .map(|&(_, command, _)| command)
        .filter(|&command| channels > 1 || !is_balance(command))
}
