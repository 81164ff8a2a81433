//! Communication primitives between the input, engine and control threads.
//!
//! Every producer (keyboard reader, engine lifecycle callbacks, the PCM
//! source's progress observer) pushes into one bounded queue; the control
//! actor is its only consumer.

use crossbeam_channel::{Receiver, RecvError, SendError, Sender, TrySendError};
use kplay_core::StopReason;

/// Default capacity of the control event queue
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Player commands, either decoded from a key or synthesized by the actor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    PitchUp,
    PitchDown,
    PitchReset,
    TempoUp,
    TempoDown,
    TempoReset,
    BalanceLeft,
    BalanceMid,
    BalanceRight,
    ToggleMute,
    VolumeUp,
    VolumeDown,
    SeekToBegin,
    /// Start if stopped, fade out and stop if playing
    TogglePlay,
    /// Start if stopped
    Play,
    Exit,
}

/// Events consumed by the control actor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlEvent {
    /// A raw key read from the terminal
    KeyPress(char),
    /// A command injected without going through the key map
    Command(Command),
    /// The engine began producing to the sink
    EngineStarted,
    /// The engine stopped producing
    EngineStopped(StopReason),
    /// Fraction of the payload consumed by the source, in `[0, 1]`
    Progress(f32),
    /// Leave the session (e.g. Ctrl-C)
    ShutdownRequested,
}

/// Producer side of the control queue. Cheap to clone, one per producer.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<ControlEvent>,
}

impl EventSender {
    /// Enqueue an event, blocking while the queue is full
    pub fn send(&self, event: ControlEvent) -> Result<(), SendError<ControlEvent>> {
        self.tx.send(event)
    }

    /// Enqueue an event unless the queue is full or closed
    pub fn try_send(&self, event: ControlEvent) -> Result<(), TrySendError<ControlEvent>> {
        self.tx.try_send(event)
    }
}

/// Consumer side of the control queue, owned by the control actor
#[derive(Debug)]
pub struct EventReceiver {
    rx: Receiver<ControlEvent>,
}

impl EventReceiver {
    /// Block until the next event arrives
    pub fn recv(&self) -> Result<ControlEvent, RecvError> {
        self.rx.recv()
    }
}

/// Create the bounded control queue
pub fn create_event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = crossbeam_channel::bounded(capacity);
    (EventSender { tx }, EventReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_preserves_per_producer_order() {
        let (tx, rx) = create_event_queue(8);
        tx.send(ControlEvent::KeyPress('r')).unwrap();
        tx.send(ControlEvent::EngineStarted).unwrap();
        tx.send(ControlEvent::EngineStopped(StopReason::EndOfStream))
            .unwrap();

        assert_eq!(rx.recv().unwrap(), ControlEvent::KeyPress('r'));
        assert_eq!(rx.recv().unwrap(), ControlEvent::EngineStarted);
        assert_eq!(
            rx.recv().unwrap(),
            ControlEvent::EngineStopped(StopReason::EndOfStream)
        );
        drop(tx);
        assert!(rx.recv().is_err());
    }

    #[test]
    fn test_try_send_on_full_queue() {
        let (tx, _rx) = create_event_queue(1);
        assert!(tx.try_send(ControlEvent::Progress(0.1)).is_ok());
        assert!(tx.try_send(ControlEvent::Progress(0.2)).is_err());
    }

    #[test]
    fn test_recv_fails_once_all_senders_are_gone() {
        let (tx, rx) = create_event_queue(4);
        let tx2 = tx.clone();
        drop(tx);
        tx2.send(ControlEvent::ShutdownRequested).unwrap();
        drop(tx2);
        assert_eq!(rx.recv().unwrap(), ControlEvent::ShutdownRequested);
        assert!(rx.recv().is_err());
    }
}
