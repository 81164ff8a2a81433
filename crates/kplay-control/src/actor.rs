//! Control actor - the single owner of playback state.
//!
//! Keyboard input and engine lifecycle notifications arrive on one queue.
//! The actor handles them strictly one at a time, mutates [`PlaybackState`],
//! and pushes the resulting parameters into the running graph. Follow-up
//! events it synthesizes itself (rewind, repeat, exit at end of stream) go
//! through a local queue that is drained before the next receive.

use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::{Context, Result};
use kplay_audio::builtin::fade::FADE_TRIGGER;
use kplay_audio::builtin::gain::GAIN_PARAM;
use kplay_audio::topology::{PITCH_PARAM, TEMPO_PARAM};
use kplay_audio::{AudioEngine, GraphHandles, LifecycleListener, PcmSource, StageId};
use kplay_comms::{Command, ControlEvent, EventReceiver, EventSender};
use kplay_core::StopReason;

use crate::display::StatusView;
use crate::keymap::command_for;
use crate::state::{Mode, PlaybackState, TransportState};

/// Engine operations the actor drives
pub trait EngineControl {
    fn start(&self) -> Result<()>;

    fn stop(&self) -> Result<()>;

    fn set_parameter(&self, stage: StageId, param: u32, args: Vec<String>) -> Result<()>;
}

impl EngineControl for AudioEngine {
    fn start(&self) -> Result<()> {
        Ok(Self::start(self)?)
    }

    fn stop(&self) -> Result<()> {
        Ok(Self::stop(self)?)
    }

    fn set_parameter(&self, stage: StageId, param: u32, args: Vec<String>) -> Result<()> {
        Ok(Self::set_parameter(self, stage, param, args)?)
    }
}

/// Forwards engine lifecycle callbacks into the control queue
#[derive(Debug, Clone)]
pub struct QueueListener {
    events: EventSender,
}

impl QueueListener {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

impl LifecycleListener for QueueListener {
    fn on_started(&self) {
        if self.events.send(ControlEvent::EngineStarted).is_err() {
            tracing::debug!("Control queue closed; start not delivered");
        }
    }

    fn on_stopped(&self, reason: StopReason) {
        if self.events.send(ControlEvent::EngineStopped(reason)).is_err() {
            tracing::debug!("Control queue closed; stop not delivered");
        }
    }
}

pub struct ControlActor<E: EngineControl> {
    state: PlaybackState,
    handles: GraphHandles,
    engine: E,
    source: Arc<PcmSource>,
    events: EventReceiver,
    pending: VecDeque<ControlEvent>,
    view: Box<dyn StatusView>,
    /// A start was sent and not yet confirmed
    start_pending: bool,
    /// The fade-out was triggered for this run
    stop_requested: bool,
    /// Waiting for the engine to confirm a stop before leaving
    exiting: bool,
}

impl<E: EngineControl> ControlActor<E> {
    pub fn new(
        state: PlaybackState,
        handles: GraphHandles,
        engine: E,
        source: Arc<PcmSource>,
        events: EventReceiver,
        view: Box<dyn StatusView>,
    ) -> Self {
        Self {
            state,
            handles,
            engine,
            source,
            events,
            pending: VecDeque::new(),
            view,
            start_pending: false,
            stop_requested: false,
            exiting: false,
        }
    }

    /// Push the initial parameters, start playback and process events until
    /// the session ends
    ///
    /// Returns the final state. The engine has confirmed it is stopped by the
    /// time this returns.
    pub fn run(mut self) -> Result<PlaybackState> {
        self.push_gains()?;
        self.push_pitch()?;
        self.push_tempo()?;
        self.request_start()?;
        self.view.refresh(&self.state);

        loop {
            let event = match self.pending.pop_front() {
                Some(event) => event,
                None => self.events.recv().context("Control queue closed")?,
            };
            if self.handle(event)?.is_break() {
                break;
            }
        }

        tracing::info!("Control actor finished");
        Ok(self.state)
    }

    fn handle(&mut self, event: ControlEvent) -> Result<ControlFlow<()>> {
        match event {
            ControlEvent::KeyPress(key) => match command_for(key, self.handles.channels) {
                Some(command) => self.execute(command),
                None => Ok(ControlFlow::Continue(())),
            },
            ControlEvent::Command(command) => self.execute(command),
            ControlEvent::EngineStarted => {
                self.start_pending = false;
                self.state.transport = TransportState::Playing;
                self.view.refresh(&self.state);
                Ok(ControlFlow::Continue(()))
            }
            ControlEvent::EngineStopped(reason) => Ok(self.on_stopped(reason)),
            ControlEvent::Progress(progress) => {
                // Reports queued before a rewind never run ahead of the source
                let before = (self.state.progress * 100.0).floor();
                self.state.progress = progress.clamp(0.0, 1.0).min(self.source.progress());
                if (self.state.progress * 100.0).floor() != before {
                    self.view.refresh(&self.state);
                }
                Ok(ControlFlow::Continue(()))
            }
            ControlEvent::ShutdownRequested => self.exit(true),
        }
    }

    fn on_stopped(&mut self, reason: StopReason) -> ControlFlow<()> {
        match reason {
            StopReason::Error => tracing::warn!("Playback stopped by an engine error"),
            _ => tracing::debug!("Playback stopped: {}", reason),
        }
        let stopping = self.stop_requested;
        self.state.transport = TransportState::Stopped;
        self.start_pending = false;
        self.stop_requested = false;
        self.view.refresh(&self.state);

        if self.exiting {
            return ControlFlow::Break(());
        }

        if reason == StopReason::EndOfStream {
            self.pending.push_back(ControlEvent::Command(Command::SeekToBegin));
            match self.state.mode {
                Mode::Normal => {}
                Mode::Repeat if stopping => {
                    tracing::debug!("Stop requested before the stream ended; not repeating");
                }
                Mode::Repeat => self.pending.push_back(ControlEvent::Command(Command::Play)),
                Mode::NonInteractive => {
                    self.pending.push_back(ControlEvent::Command(Command::Exit));
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn execute(&mut self, command: Command) -> Result<ControlFlow<()>> {
        if self.exiting {
            return Ok(ControlFlow::Continue(()));
        }

        let mut gains = false;
        match command {
            Command::PitchUp | Command::PitchDown | Command::PitchReset => {
                let changed = match command {
                    Command::PitchUp => self.state.pitch_up(),
                    Command::PitchDown => self.state.pitch_down(),
                    _ => self.state.pitch_reset(),
                };
                if changed {
                    self.push_pitch()?;
                }
            }
            Command::TempoUp | Command::TempoDown | Command::TempoReset => {
                let changed = match command {
                    Command::TempoUp => self.state.tempo_up(),
                    Command::TempoDown => self.state.tempo_down(),
                    _ => self.state.tempo_reset(),
                };
                if changed {
                    self.push_tempo()?;
                }
            }
            Command::BalanceLeft => gains = self.state.balance_left(),
            Command::BalanceMid => gains = self.state.balance_mid(),
            Command::BalanceRight => gains = self.state.balance_right(),
            Command::ToggleMute => gains = self.state.toggle_mute(),
            Command::VolumeUp => gains = self.state.volume_up(),
            Command::VolumeDown => gains = self.state.volume_down(),
            Command::SeekToBegin => {
                self.source
                    .seek_to_begin()
                    .context("Failed to rewind the source")?;
                self.state.progress = 0.0;
            }
            Command::TogglePlay => match self.state.transport {
                TransportState::Stopped => self.request_start()?,
                TransportState::Playing => self.request_fade_out()?,
            },
            Command::Play => {
                if self.state.transport == TransportState::Stopped {
                    self.request_start()?;
                }
            }
            Command::Exit => return self.exit(false),
        }

        if gains {
            self.push_gains()?;
        }
        self.view.refresh(&self.state);
        Ok(ControlFlow::Continue(()))
    }

    /// Leave the session once the engine is confirmed idle
    ///
    /// A graceful exit fades out first; an immediate one stops the engine
    /// at the next block.
    fn exit(&mut self, immediate: bool) -> Result<ControlFlow<()>> {
        let active = self.state.is_playing() || self.start_pending;
        if !active {
            return Ok(ControlFlow::Break(()));
        }

        self.exiting = true;
        if immediate {
            self.engine.stop()?;
        } else {
            self.request_fade_out()?;
        }
        Ok(ControlFlow::Continue(()))
    }

    fn request_start(&mut self) -> Result<()> {
        if self.start_pending {
            return Ok(());
        }
        tracing::debug!("Requesting start");
        self.engine.start()?;
        self.start_pending = true;
        Ok(())
    }

    fn request_fade_out(&mut self) -> Result<()> {
        if self.stop_requested {
            return Ok(());
        }
        tracing::debug!("Requesting fade-out");
        self.engine
            .set_parameter(self.handles.fade_out, FADE_TRIGGER, Vec::new())?;
        self.stop_requested = true;
        Ok(())
    }

    fn push_gains(&self) -> Result<()> {
        let args = self
            .state
            .effective_gains(self.handles.channels)
            .iter()
            .enumerate()
            .flat_map(|(index, gain)| [index.to_string(), gain.to_string()])
            .collect();
        self.engine
            .set_parameter(self.handles.gain, GAIN_PARAM, args)
    }

    fn push_pitch(&self) -> Result<()> {
        self.engine.set_parameter(
            self.handles.pitch_tempo,
            PITCH_PARAM,
            vec![self.state.pitch.to_string()],
        )
    }

    fn push_tempo(&self) -> Result<()> {
        self.engine.set_parameter(
            self.handles.pitch_tempo,
            TEMPO_PARAM,
            vec![self.state.tempo.to_string()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kplay_audio::StreamHeader;
    use kplay_comms::create_event_queue;
    use std::cell::RefCell;
    use std::io::Write;
    use std::rc::Rc;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Start,
        Stop,
        Param(StageId, u32, Vec<String>),
    }

    /// Engine double that records calls; tests script the confirmations
    struct FakeEngine {
        calls: Rc<RefCell<Vec<Call>>>,
    }

    impl EngineControl for FakeEngine {
        fn start(&self) -> Result<()> {
            self.calls.borrow_mut().push(Call::Start);
            Ok(())
        }

        fn stop(&self) -> Result<()> {
            self.calls.borrow_mut().push(Call::Stop);
            Ok(())
        }

        fn set_parameter(&self, stage: StageId, param: u32, args: Vec<String>) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(Call::Param(stage, param, args));
            Ok(())
        }
    }

    const HANDLES: GraphHandles = GraphHandles {
        gain: 5,
        fade_out: 8,
        pitch_tempo: 7,
        pitch_tempo_available: false,
        channels: 2,
    };

    struct Snapshots(Rc<RefCell<Vec<PlaybackState>>>);

    impl StatusView for Snapshots {
        fn refresh(&mut self, state: &PlaybackState) {
            self.0.borrow_mut().push(state.clone());
        }
    }

    struct Harness {
        actor: ControlActor<FakeEngine>,
        source: Arc<PcmSource>,
        calls: Rc<RefCell<Vec<Call>>>,
        snapshots: Rc<RefCell<Vec<PlaybackState>>>,
        events: EventSender,
        _dir: tempfile::TempDir,
    }

    fn harness(mode: Mode) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        let header = StreamHeader::new(2, 8000, 16, 8).unwrap();
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&header.to_bytes()).unwrap();
        file.write_all(&[0; 8]).unwrap();
        let source = Arc::new(PcmSource::open(&path).unwrap());

        let (tx, rx) = create_event_queue(64);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let snapshots = Rc::new(RefCell::new(Vec::new()));
        let engine = FakeEngine {
            calls: calls.clone(),
        };
        let state = PlaybackState {
            mode,
            ..PlaybackState::default()
        };
        let actor = ControlActor::new(
            state,
            HANDLES,
            engine,
            source.clone(),
            rx,
            Box::new(Snapshots(snapshots.clone())),
        );
        Harness {
            actor,
            source,
            calls,
            snapshots,
            events: tx,
            _dir: dir,
        }
    }

    /// Queue a script: characters are key presses, `+` confirms a start,
    /// `-` a user stop, `$` end of stream, `!` an engine error, `^` Ctrl-C
    fn script(events: &EventSender, script: &str) {
        for c in script.chars() {
            let event = match c {
                '+' => ControlEvent::EngineStarted,
                '-' => ControlEvent::EngineStopped(StopReason::UserRequested),
                '$' => ControlEvent::EngineStopped(StopReason::EndOfStream),
                '!' => ControlEvent::EngineStopped(StopReason::Error),
                '^' => ControlEvent::ShutdownRequested,
                key => ControlEvent::KeyPress(key),
            };
            events.send(event).unwrap();
        }
    }

    fn starts(calls: &[Call]) -> usize {
        calls.iter().filter(|call| **call == Call::Start).count()
    }

    fn fades(calls: &[Call]) -> usize {
        calls
            .iter()
            .filter(|call| **call == Call::Param(HANDLES.fade_out, FADE_TRIGGER, Vec::new()))
            .count()
    }

    #[test]
    fn test_initial_parameters_then_start() {
        let h = harness(Mode::Normal);
        script(&h.events, "+c-");
        let state = h.actor.run().unwrap();

        let calls = h.calls.borrow();
        assert_eq!(
            calls[0],
            Call::Param(
                HANDLES.gain,
                GAIN_PARAM,
                vec!["0".into(), "1".into(), "1".into(), "1".into()]
            )
        );
        assert_eq!(
            calls[1],
            Call::Param(HANDLES.pitch_tempo, PITCH_PARAM, vec!["1".into()])
        );
        assert_eq!(
            calls[2],
            Call::Param(HANDLES.pitch_tempo, TEMPO_PARAM, vec!["1".into()])
        );
        assert_eq!(calls[3], Call::Start);
        // Exit while playing fades out and waits for the confirmation
        assert_eq!(
            calls[4],
            Call::Param(HANDLES.fade_out, FADE_TRIGGER, Vec::new())
        );
        assert_eq!(calls.len(), 5);
        assert_eq!(state.transport, TransportState::Stopped);
    }

    #[test]
    fn test_key_changes_push_parameters() {
        let h = harness(Mode::Normal);
        script(&h.events, "+erdyc-");
        let state = h.actor.run().unwrap();

        let calls = h.calls.borrow();
        assert!(calls.contains(&Call::Param(
            HANDLES.gain,
            GAIN_PARAM,
            vec!["0".into(), "0.99".into(), "1".into(), "1".into()]
        )));
        assert!(calls.contains(&Call::Param(
            HANDLES.pitch_tempo,
            PITCH_PARAM,
            vec![1.01_f32.to_string()]
        )));
        assert!(calls.contains(&Call::Param(
            HANDLES.gain,
            GAIN_PARAM,
            vec!["0".into(), "0".into(), "1".into(), "0".into()]
        )));
        assert!(state.muted);
        assert_eq!(state.volume_left, 0.99);
    }

    #[test]
    fn test_toggle_play_fades_out_then_restarts() {
        let h = harness(Mode::Normal);
        script(&h.events, "+x-x+c-");
        let state = h.actor.run().unwrap();

        let calls = h.calls.borrow();
        assert_eq!(starts(&calls), 2);
        assert_eq!(fades(&calls), 2);
        assert_eq!(state.transport, TransportState::Stopped);
    }

    #[test]
    fn test_toggle_play_waits_for_confirmation() {
        let h = harness(Mode::Normal);
        // Presses before the start is confirmed do not issue a second start
        script(&h.events, "xx+xx-c");
        h.actor.run().unwrap();

        let calls = h.calls.borrow();
        assert_eq!(starts(&calls), 1);
        assert_eq!(fades(&calls), 1);
    }

    #[test]
    fn test_end_of_stream_in_normal_mode_stays_stopped() {
        let h = harness(Mode::Normal);
        script(&h.events, "+$c");
        let state = h.actor.run().unwrap();

        assert_eq!(starts(&h.calls.borrow()), 1);
        assert_eq!(state.transport, TransportState::Stopped);
        assert_eq!(state.progress, 0.0);
    }

    #[test]
    fn test_end_of_stream_in_repeat_mode_restarts() {
        let h = harness(Mode::Repeat);
        script(&h.events, "+$^+-");
        let state = h.actor.run().unwrap();

        let calls = h.calls.borrow();
        assert_eq!(starts(&calls), 2);
        // Ctrl-C stops at once instead of fading
        assert_eq!(calls.last(), Some(&Call::Stop));
        assert_eq!(fades(&calls), 0);
        assert_eq!(state.transport, TransportState::Stopped);
    }

    #[test]
    fn test_stop_near_end_of_stream_is_not_repeated() {
        let h = harness(Mode::Repeat);
        // The fade-out is still running when the stream runs dry
        script(&h.events, "+x$c");
        let state = h.actor.run().unwrap();

        let calls = h.calls.borrow();
        assert_eq!(starts(&calls), 1);
        assert_eq!(fades(&calls), 1);
        assert_eq!(state.transport, TransportState::Stopped);
        assert_eq!(h.source.progress(), 0.0);
    }

    #[test]
    fn test_end_of_stream_in_non_interactive_mode_exits() {
        let h = harness(Mode::NonInteractive);
        script(&h.events, "+$");
        let state = h.actor.run().unwrap();

        assert_eq!(starts(&h.calls.borrow()), 1);
        assert_eq!(state.transport, TransportState::Stopped);
        assert!(h.snapshots.borrow().iter().any(PlaybackState::is_playing));
    }

    #[test]
    fn test_engine_error_behaves_like_stop() {
        let h = harness(Mode::Repeat);
        script(&h.events, "+!c");
        let state = h.actor.run().unwrap();

        // No automatic restart after an error, even in repeat mode
        assert_eq!(starts(&h.calls.borrow()), 1);
        assert_eq!(state.transport, TransportState::Stopped);
    }

    #[test]
    fn test_keys_while_exiting_are_ignored() {
        let h = harness(Mode::Normal);
        script(&h.events, "+crx-");
        let state = h.actor.run().unwrap();

        assert_eq!(state.pitch, 1.0);
        assert_eq!(starts(&h.calls.borrow()), 1);
    }

    #[test]
    fn test_progress_is_tracked() {
        let h = harness(Mode::Normal);
        // One of two frames read
        h.source.produce(1).unwrap();
        script(&h.events, "+");
        h.events.send(ControlEvent::Progress(0.495)).unwrap();
        h.events.send(ControlEvent::Progress(0.499)).unwrap();
        h.events.send(ControlEvent::Progress(0.5)).unwrap();
        script(&h.events, "c-");
        let state = h.actor.run().unwrap();

        assert_eq!(state.progress, 0.5);
        let snapshots = h.snapshots.borrow();
        // The second update stays within the same percent
        assert_eq!(snapshots.iter().filter(|s| s.progress == 0.495).count(), 1);
        assert!(!snapshots.iter().any(|s| s.progress == 0.499));
        assert_eq!(
            snapshots
                .iter()
                .filter(|s| s.progress == 0.5 && s.is_playing())
                .count(),
            1
        );
    }

    #[test]
    fn test_progress_reported_before_a_rewind_is_discarded() {
        let h = harness(Mode::Normal);
        h.source.produce(1).unwrap();
        script(&h.events, "+");
        h.events.send(ControlEvent::Progress(0.5)).unwrap();
        script(&h.events, "z");
        // Computed before the rewind, dequeued after it
        h.events.send(ControlEvent::Progress(0.5)).unwrap();
        script(&h.events, "c-");
        let state = h.actor.run().unwrap();

        assert_eq!(state.progress, 0.0);
        assert_eq!(h.source.progress(), 0.0);
        let snapshots = h.snapshots.borrow();
        assert_eq!(snapshots.iter().filter(|s| s.progress == 0.5).count(), 1);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let h = harness(Mode::Normal);
        script(&h.events, "+yu1c-");
        let state = h.actor.run().unwrap();

        assert_eq!(state.pitch, 1.0);
        // three initial parameters, the start, the fade trigger
        assert_eq!(h.calls.borrow().len(), 5);
    }
}
