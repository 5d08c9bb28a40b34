//! Cassette recorder - lifecycle of a tape in front of a hardware link.
//!
//! The recorder owns the current tape and drives the link. `play()` and
//! `stop()` only send requests; the state switches to `Playing`/`Stopped`
//! when the link's acknowledgement arrives on the event channel and is
//! handled by `process_events()` or `wait_event()`.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::RecorderConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{TapError, TapResult};
use crate::event::{DeckEvent, EventSender};
use crate::link::HardwareLink;
use crate::tape::{SharedTape, Tape};

/// Recorder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Ejected,
    Stopped,
    Playing,
    /// Reserved; nothing drives the recorder into this state yet.
    Recording,
}

/// Receives recorder notifications on the caller's thread.
pub trait RecorderObserver: Send {
    fn state_changed(&mut self, state: RecorderState);

    fn position_changed(&mut self, _position: usize, _length: usize) {}
}

/// Cassette deck state machine.
pub struct CassetteRecorder<L: HardwareLink> {
    link: Arc<L>,
    tape: Option<SharedTape>,
    state: RecorderState,
    events_tx: EventSender,
    events_rx: Receiver<DeckEvent>,
    observer: Option<Box<dyn RecorderObserver>>,
    diag: Arc<dyn Diagnostics>,
    config: RecorderConfig,
}

impl<L: HardwareLink> CassetteRecorder<L> {
    /// Create an empty recorder in front of `link`.
    ///
    /// The link is not connected here; it stays under the caller's control.
    pub fn new(link: Arc<L>, config: RecorderConfig, diag: Arc<dyn Diagnostics>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        link.set_event_sender(events_tx.clone());
        Self {
            link,
            tape: None,
            state: RecorderState::Ejected,
            events_tx,
            events_rx,
            observer: None,
            diag,
            config,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn RecorderObserver>) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn link(&self) -> &Arc<L> {
        &self.link
    }

    /// Shared handle on the current tape, if any.
    pub fn tape(&self) -> Option<&SharedTape> {
        self.tape.as_ref()
    }

    /// Insert a tape read from `path`.
    ///
    /// Returns `Ok(false)` without touching the file when a tape is already
    /// inserted.
    pub fn load(&mut self, path: &Path) -> TapResult<bool> {
        if !self.can_insert() {
            return Ok(false);
        }
        let tape = Tape::from_path(path)?;
        self.diag.write(&format!("Inserted {}", path.display()));
        Ok(self.insert(tape))
    }

    /// Insert a tape from an in-memory image.
    pub fn load_bytes(&mut self, data: Vec<u8>) -> TapResult<bool> {
        if !self.can_insert() {
            return Ok(false);
        }
        let tape = Tape::from_bytes(data)?;
        Ok(self.insert(tape))
    }

    fn can_insert(&self) -> bool {
        if self.state != RecorderState::Ejected {
            self.diag
                .write("Tried to put another cassette in but the old one is not ejected!");
            return false;
        }
        true
    }

    fn insert(&mut self, mut tape: Tape) -> bool {
        tape.set_event_sender(Some(self.events_tx.clone()));
        let shared = tape.into_shared();
        self.link.bind_data_source(Some(Arc::clone(&shared)));
        self.tape = Some(shared);
        self.set_state(RecorderState::Stopped);
        true
    }

    /// Release the tape. Only allowed while stopped.
    pub fn eject(&mut self) -> bool {
        if self.state != RecorderState::Stopped {
            self.diag
                .write("A cassette must be inserted and stopped in order to eject it!");
            return false;
        }
        self.link.bind_data_source(None);
        self.tape = None;
        self.set_state(RecorderState::Ejected);
        true
    }

    /// Ask the hardware to start playing.
    pub fn play(&mut self) -> bool {
        if self.state != RecorderState::Stopped {
            self.diag
                .write("A cassette must be inserted and stopped in order to play it!");
            return false;
        }
        self.link.play();
        true
    }

    /// Ask the hardware to stop.
    pub fn stop(&mut self) -> bool {
        if self.state != RecorderState::Playing {
            self.diag
                .write("A cassette must be inserted and playing in order to stop it!");
            return false;
        }
        self.link.stop();
        true
    }

    /// Stop if playing, then move the cursor back to the first pulse.
    ///
    /// The cursor is reset right away, without waiting for the stop to be
    /// acknowledged.
    pub fn rewind(&mut self) -> bool {
        if self.state == RecorderState::Ejected {
            self.diag
                .write("A cassette must be inserted in order to rewind it!");
            return false;
        }
        if self.state == RecorderState::Playing {
            self.stop();
        }
        match self.with_tape(|tape| tape.rewind()) {
            Ok(()) => true,
            Err(e) => {
                self.diag.write(&format!("Rewind failed: {}", e));
                false
            }
        }
    }

    /// Move the cursor to `time` seconds into the tape.
    pub fn seek(&mut self, time: f64) -> TapResult<()> {
        self.with_tape(|tape| tape.set_time(time))
    }

    /// Cursor position in bytes, header included.
    pub fn position(&self) -> TapResult<usize> {
        self.with_tape(|tape| tape.position())
    }

    /// Elapsed time at the cursor.
    pub fn time(&self) -> TapResult<f64> {
        self.with_tape(|tape| tape.time())
    }

    /// Tape image size in bytes.
    pub fn length(&self) -> TapResult<usize> {
        self.with_tape(|tape| tape.size())
    }

    fn with_tape<T>(&self, f: impl FnOnce(&mut Tape) -> T) -> TapResult<T> {
        let tape = self.tape.as_ref().ok_or(TapError::NoTape)?;
        let mut guard = tape.lock().map_err(|_| TapError::LockPoisoned)?;
        Ok(f(&mut *guard))
    }

    /// Handle every event already queued. Returns how many were handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Block up to `timeout` for one event, then drain the rest.
    ///
    /// Returns `false` if nothing arrived in time.
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        match self.events_rx.recv_timeout(timeout) {
            Ok(event) => {
                self.handle_event(event);
                self.process_events();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn handle_event(&mut self, event: DeckEvent) {
        match event {
            DeckEvent::PlayStateChanged(playing) => {
                if self.tape.is_none() {
                    self.diag
                        .write("Hardware changed play state with no cassette inserted");
                    return;
                }
                let state = if playing {
                    RecorderState::Playing
                } else {
                    RecorderState::Stopped
                };
                self.set_state(state);
            }
            DeckEvent::PositionChanged { position, length } => {
                if let Some(observer) = self.observer.as_mut() {
                    observer.position_changed(position, length);
                }
            }
        }
    }

    fn set_state(&mut self, state: RecorderState) {
        self.state = state;
        if let Some(observer) = self.observer.as_mut() {
            observer.state_changed(state);
        }
    }

    /// Stop, eject and disconnect, in that order.
    ///
    /// Waits at most the configured dispose timeout for the hardware to
    /// acknowledge the stop. On timeout the tape stays inserted, the link
    /// stays connected and `TeardownTimeout` is returned.
    pub fn dispose(&mut self) -> TapResult<()> {
        self.process_events();
        if self.state == RecorderState::Playing {
            self.stop();
        }

        let deadline = Instant::now() + self.config.dispose_timeout();
        while self.state == RecorderState::Playing {
            let now = Instant::now();
            if now >= deadline {
                self.diag.write("Hardware did not acknowledge stop");
                return Err(TapError::TeardownTimeout);
            }
            self.wait_event((deadline - now).min(self.config.poll_interval()));
        }

        if self.state == RecorderState::Stopped {
            self.eject();
        }
        self.link.disconnect();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryDiagnostics;
    use crate::link::Command;
    use crate::tape::HEADER_END;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Link double: records requests, acknowledges on demand.
    #[derive(Default)]
    struct FakeLink {
        commands: Mutex<Vec<Command>>,
        playing: AtomicBool,
        connected: AtomicBool,
        auto_ack: bool,
        events: Mutex<Option<EventSender>>,
        source: Mutex<Option<SharedTape>>,
    }

    impl FakeLink {
        fn auto_ack() -> Self {
            Self {
                auto_ack: true,
                ..Self::default()
            }
        }

        fn commands(&self) -> Vec<Command> {
            self.commands.lock().unwrap().clone()
        }

        /// Pretend the hardware switched.
        fn acknowledge(&self, playing: bool) {
            self.playing.store(playing, Ordering::SeqCst);
            if let Some(events) = self.events.lock().unwrap().as_ref() {
                events.send(DeckEvent::PlayStateChanged(playing)).unwrap();
            }
        }

        fn has_source(&self) -> bool {
            self.source.lock().unwrap().is_some()
        }
    }

    impl HardwareLink for FakeLink {
        fn connect(&self) -> TapResult<()> {
            if self.connected.swap(true, Ordering::SeqCst) {
                return Err(TapError::AlreadyConnected);
            }
            Ok(())
        }

        fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn play(&self) {
            if self.is_playing() {
                return;
            }
            self.commands
                .lock()
                .unwrap()
                .extend([Command::SenseOn, Command::Play]);
            if self.auto_ack {
                self.acknowledge(true);
            }
        }

        fn stop(&self) {
            if !self.is_playing() {
                return;
            }
            self.commands
                .lock()
                .unwrap()
                .extend([Command::Stop, Command::SenseOff]);
            if self.auto_ack {
                self.acknowledge(false);
            }
        }

        fn is_playing(&self) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        fn bind_data_source(&self, source: Option<SharedTape>) {
            *self.source.lock().unwrap() = source;
        }

        fn set_event_sender(&self, events: EventSender) {
            *self.events.lock().unwrap() = Some(events);
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Note {
        State(RecorderState),
        Position(usize, usize),
    }

    struct NoteObserver(Arc<Mutex<Vec<Note>>>);

    impl RecorderObserver for NoteObserver {
        fn state_changed(&mut self, state: RecorderState) {
            self.0.lock().unwrap().push(Note::State(state));
        }

        fn position_changed(&mut self, position: usize, length: usize) {
            self.0.lock().unwrap().push(Note::Position(position, length));
        }
    }

    fn tap_image(pulses: usize) -> Vec<u8> {
        let mut data = b"C64-TAPE-RAW".to_vec();
        data.extend_from_slice(&[1, 0, 0, 0]);
        data.extend_from_slice(&(pulses as u32).to_le_bytes());
        data.extend(std::iter::repeat(0x30).take(pulses));
        data
    }

    fn recorder(link: FakeLink) -> (CassetteRecorder<FakeLink>, Arc<MemoryDiagnostics>) {
        let diag = Arc::new(MemoryDiagnostics::new());
        let config = RecorderConfig {
            dispose_timeout_ms: 50,
            poll_interval_ms: 5,
        };
        let recorder = CassetteRecorder::new(Arc::new(link), config, diag.clone());
        (recorder, diag)
    }

    #[test]
    fn test_play_when_ejected_is_noop() {
        let (mut rec, diag) = recorder(FakeLink::default());
        assert!(!rec.play());
        assert_eq!(rec.state(), RecorderState::Ejected);
        assert!(rec.link().commands().is_empty());
        assert!(diag.contains("in order to play it"));
    }

    #[test]
    fn test_play_when_playing_is_noop() {
        let (mut rec, _diag) = recorder(FakeLink::default());
        rec.load_bytes(tap_image(100)).unwrap();
        assert!(rec.play());
        rec.link().acknowledge(true);
        rec.process_events();
        assert_eq!(rec.state(), RecorderState::Playing);

        let before = rec.link().commands();
        assert!(!rec.play());
        assert_eq!(rec.link().commands(), before);
        assert_eq!(rec.state(), RecorderState::Playing);
    }

    #[test]
    fn test_full_lifecycle() {
        let (mut rec, _diag) = recorder(FakeLink::default());
        let notes = Arc::new(Mutex::new(Vec::new()));
        rec.set_observer(Box::new(NoteObserver(Arc::clone(&notes))));

        assert!(rec.load_bytes(tap_image(100)).unwrap());
        assert_eq!(rec.state(), RecorderState::Stopped);
        assert!(rec.link().has_source());

        assert!(rec.play());
        // Request only: no state change before the hardware confirms.
        assert_eq!(rec.state(), RecorderState::Stopped);
        rec.link().acknowledge(true);
        assert_eq!(rec.process_events(), 1);
        assert_eq!(rec.state(), RecorderState::Playing);

        assert!(rec.stop());
        assert_eq!(rec.state(), RecorderState::Playing);
        rec.link().acknowledge(false);
        rec.process_events();
        assert_eq!(rec.state(), RecorderState::Stopped);

        assert!(rec.eject());
        assert_eq!(rec.state(), RecorderState::Ejected);
        assert!(rec.tape().is_none());
        assert!(!rec.link().has_source());

        assert_eq!(
            rec.link().commands(),
            vec![Command::SenseOn, Command::Play, Command::Stop, Command::SenseOff]
        );
        assert_eq!(
            *notes.lock().unwrap(),
            vec![
                Note::State(RecorderState::Stopped),
                Note::State(RecorderState::Playing),
                Note::State(RecorderState::Stopped),
                Note::State(RecorderState::Ejected),
            ]
        );
    }

    #[test]
    fn test_load_twice_is_refused() {
        let (mut rec, diag) = recorder(FakeLink::default());
        assert!(rec.load_bytes(tap_image(10)).unwrap());
        assert!(!rec.load_bytes(tap_image(20)).unwrap());
        assert_eq!(rec.length().unwrap(), HEADER_END + 10);
        assert!(diag.contains("not ejected"));
    }

    #[test]
    fn test_bad_image_leaves_recorder_ejected() {
        let (mut rec, _diag) = recorder(FakeLink::default());
        assert!(matches!(
            rec.load_bytes(vec![0; 5]),
            Err(TapError::TooShort(5))
        ));
        assert_eq!(rec.state(), RecorderState::Ejected);
        assert!(rec.tape().is_none());
    }

    #[test]
    fn test_eject_requires_stopped() {
        let (mut rec, _diag) = recorder(FakeLink::default());
        assert!(!rec.eject());

        rec.load_bytes(tap_image(10)).unwrap();
        rec.play();
        rec.link().acknowledge(true);
        rec.process_events();
        assert!(!rec.eject());
        assert_eq!(rec.state(), RecorderState::Playing);
        assert!(rec.tape().is_some());
    }

    #[test]
    fn test_tape_access_needs_cassette() {
        let (mut rec, _diag) = recorder(FakeLink::default());
        assert!(matches!(rec.position(), Err(TapError::NoTape)));
        assert!(matches!(rec.seek(1.0), Err(TapError::NoTape)));
        assert!(matches!(rec.time(), Err(TapError::NoTape)));
        assert!(!rec.rewind());
    }

    #[test]
    fn test_rewind_while_playing_requests_stop() {
        let (mut rec, _diag) = recorder(FakeLink::default());
        rec.load_bytes(tap_image(500)).unwrap();
        rec.seek(0.05).unwrap();
        assert!(rec.position().unwrap() > HEADER_END);

        rec.play();
        rec.link().acknowledge(true);
        rec.process_events();

        assert!(rec.rewind());
        assert_eq!(rec.position().unwrap(), HEADER_END);
        // Stop requested, not yet confirmed.
        assert_eq!(rec.state(), RecorderState::Playing);
        assert_eq!(
            rec.link().commands()[2..],
            [Command::Stop, Command::SenseOff]
        );
    }

    #[test]
    fn test_seek_reports_position() {
        let (mut rec, _diag) = recorder(FakeLink::default());
        let notes = Arc::new(Mutex::new(Vec::new()));
        rec.set_observer(Box::new(NoteObserver(Arc::clone(&notes))));
        rec.load_bytes(tap_image(100)).unwrap();

        // 0x30 * 8 cycles per record; 9.5 records lands after the tenth.
        rec.seek(384.0 * 9.5 / crate::tape::CLOCK_HZ).unwrap();
        rec.process_events();

        assert_eq!(rec.position().unwrap(), HEADER_END + 10);
        assert!(notes
            .lock()
            .unwrap()
            .contains(&Note::Position(HEADER_END + 10, HEADER_END + 100)));
    }

    #[test]
    fn test_dispose_stops_ejects_and_disconnects() {
        let (mut rec, _diag) = recorder(FakeLink::auto_ack());
        rec.link().connect().unwrap();
        rec.load_bytes(tap_image(10)).unwrap();
        rec.play();
        rec.process_events();
        assert_eq!(rec.state(), RecorderState::Playing);

        rec.dispose().unwrap();
        assert_eq!(rec.state(), RecorderState::Ejected);
        assert!(!rec.link().is_connected());

        // Second teardown is harmless.
        rec.dispose().unwrap();
    }

    #[test]
    fn test_dispose_times_out_without_ack() {
        let (mut rec, diag) = recorder(FakeLink::default());
        rec.link().connect().unwrap();
        rec.load_bytes(tap_image(10)).unwrap();
        rec.play();
        rec.link().acknowledge(true);
        rec.process_events();

        assert!(matches!(rec.dispose(), Err(TapError::TeardownTimeout)));
        assert_eq!(rec.state(), RecorderState::Playing);
        assert!(rec.link().is_connected());
        assert!(diag.contains("did not acknowledge"));
    }
}
