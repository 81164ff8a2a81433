//! Keyboard input thread.
//!
//! On a terminal, keys are read unbuffered and without echo (raw mode) and
//! Ctrl-C becomes a shutdown request. Piped stdin is read byte by byte.

use std::io::{self, IsTerminal, Read};
use std::thread::JoinHandle;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use kplay_comms::{ControlEvent, EventSender};

/// Keeps the terminal in raw mode until dropped
#[derive(Debug)]
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    /// Enter raw mode if stdin is a terminal
    pub fn enable() -> io::Result<Self> {
        let enabled = io::stdin().is_terminal();
        if enabled {
            enable_raw_mode()?;
        }
        Ok(Self { enabled })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            if let Err(err) = disable_raw_mode() {
                tracing::error!("Failed to restore terminal: {}", err);
            }
        }
    }
}

/// Translate a terminal key event into a control event
pub fn translate(key: &KeyEvent) -> Option<ControlEvent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(ControlEvent::ShutdownRequested)
        }
        KeyCode::Char(c) => Some(ControlEvent::KeyPress(c)),
        _ => None,
    }
}

/// Spawn the thread that forwards keys into the control queue
///
/// The thread ends when input ends or the queue is closed. It may stay
/// blocked on input after the session is over; it is not joined.
pub fn spawn_reader(events: EventSender, raw: bool) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("kplay-keyboard".to_string())
        .spawn(move || {
            if raw {
                read_terminal(&events);
            } else {
                read_bytes(io::stdin().lock(), &events);
            }
            tracing::debug!("Keyboard reader finished");
        })
}

fn read_terminal(events: &EventSender) {
    loop {
        match event::read() {
            Ok(Event::Key(key)) => {
                if let Some(event) = translate(&key) {
                    let shutdown = event == ControlEvent::ShutdownRequested;
                    if events.send(event).is_err() || shutdown {
                        return;
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!("Failed to read keyboard: {}", err);
                return;
            }
        }
    }
}

/// Forward every byte of `input` as a key press until EOF
pub fn read_bytes(input: impl Read, events: &EventSender) {
    for byte in input.bytes() {
        match byte {
            Ok(byte) if byte.is_ascii() => {
                if events.send(ControlEvent::KeyPress(char::from(byte))).is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!("Failed to read stdin: {}", err);
                return;
            }
        }
    }
}
