//! Serial tape-port link.
//!
//! The link owns a FIFO of single-byte commands. Callers append to it from
//! any thread; a dedicated communication thread drains it one command per
//! iteration, answers the device's data requests with tape chunks, and flips
//! the playing flag only once PLAY or STOP has actually been written.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::port::{open_serial_port, Port};
use super::protocol::{Command, DeviceEvent, CHUNK_SIZE, PAD_BYTE};
use super::HardwareLink;
use crate::config::LinkConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{TapError, TapResult};
use crate::event::{DeckEvent, EventSender};
use crate::tape::SharedTape;

/// Outbound commands waiting for the communication thread.
#[derive(Default)]
struct CommandQueue {
    inner: Mutex<VecDeque<Command>>,
}

impl CommandQueue {
    fn push(&self, command: Command) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.push_back(command);
        }
    }

    /// Put a command back at the head after a failed write.
    fn push_front(&self, command: Command) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.push_front(command);
        }
    }

    fn pop(&self) -> Option<Command> {
        self.inner.lock().ok()?.pop_front()
    }

    fn snapshot(&self) -> Vec<Command> {
        self.inner
            .lock()
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }
}

/// State shared between the link handle and its communication thread.
struct LinkState {
    connected: AtomicBool,
    playing: AtomicBool,
    motor_on: AtomicBool,
    queue: CommandQueue,
    source: Mutex<Option<SharedTape>>,
    events: Mutex<Option<EventSender>>,
    diag: Arc<dyn Diagnostics>,
}

impl LinkState {
    fn new(diag: Arc<dyn Diagnostics>) -> Self {
        Self {
            connected: AtomicBool::new(false),
            playing: AtomicBool::new(false),
            motor_on: AtomicBool::new(false),
            queue: CommandQueue::default(),
            source: Mutex::new(None),
            events: Mutex::new(None),
            diag,
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn send_command(&self, command: Command) {
        self.queue.push(command);
    }

    fn request_play(&self) {
        if self.is_playing() {
            return;
        }
        self.send_command(Command::SenseOn);
        self.send_command(Command::Play);
    }

    fn request_stop(&self) {
        if !self.is_playing() {
            return;
        }
        self.send_command(Command::Stop);
        self.send_command(Command::SenseOff);
    }

    /// Record an acknowledged play-state change and report it.
    fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
        if let Ok(events) = self.events.lock() {
            if let Some(events) = events.as_ref() {
                let _ = events.send(DeckEvent::PlayStateChanged(playing));
            }
        }
    }

    fn source(&self) -> Option<SharedTape> {
        self.source.lock().ok()?.clone()
    }
}

/// One end of the communication thread: owns the port.
struct CommLoop<P: Port> {
    port: P,
    state: Arc<LinkState>,
    config: LinkConfig,
    idle_iterations: u32,
}

impl<P: Port> CommLoop<P> {
    fn new(port: P, state: Arc<LinkState>, config: LinkConfig) -> Self {
        Self {
            port,
            state,
            config,
            idle_iterations: 0,
        }
    }

    fn run(mut self) {
        self.state.diag.write("Communication thread started.");
        while self.state.is_connected() {
            if let Err(e) = self.step() {
                log::warn!("Serial link iteration failed: {}", e);
                sleep(self.config.error_backoff());
            }
        }
        self.state.diag.write("Communication thread terminated.");
        // Dropping self closes the port.
    }

    /// One loop iteration: inbound bytes first, then at most one command.
    fn step(&mut self) -> io::Result<()> {
        self.process_input()?;
        self.communicate_commands()
    }

    fn process_input(&mut self) -> io::Result<()> {
        let mut byte = [0u8; 1];
        while self.port.bytes_available()? > 0 {
            if self.port.read(&mut byte)? != 1 {
                self.state.diag.write("No char received!");
                return Ok(());
            }

            match DeviceEvent::from_byte(byte[0]) {
                DeviceEvent::DataRequest => self.send_tape_chunk()?,
                DeviceEvent::MotorOn => {
                    self.state.diag.write("Cassette motor on");
                    self.state.motor_on.store(true, Ordering::SeqCst);
                }
                DeviceEvent::MotorOff => {
                    self.state.diag.write("Cassette motor off");
                    self.state.motor_on.store(false, Ordering::SeqCst);
                }
                DeviceEvent::PingAck => self.state.diag.write("Ping response received"),
                DeviceEvent::Error => self.state.diag.write("Error"),
                DeviceEvent::Unknown(other) => self
                    .state
                    .diag
                    .write(&format!("Unrecognised command: {:#04x}", other)),
            }
        }
        Ok(())
    }

    fn communicate_commands(&mut self) -> io::Result<()> {
        if let Some(command) = self.state.queue.pop() {
            log::debug!("Sending command {}...", command.as_byte() as char);

            // While playing the device expects every write to fill a chunk.
            let mut frame = vec![command.as_byte()];
            if self.state.is_playing() {
                frame.resize(CHUNK_SIZE, 0);
            }
            if let Err(e) = self.write_frame(&frame) {
                self.state.queue.push_front(command);
                return Err(e);
            }

            match command {
                Command::Play => self.state.set_playing(true),
                Command::Stop => self.state.set_playing(false),
                _ => {}
            }
        }

        if !self.state.is_playing() {
            self.idle_iterations += 1;
            if self.idle_iterations > self.config.keepalive_iterations {
                self.state.send_command(Command::SenseOff);
                self.idle_iterations = 0;
            }
            sleep(self.config.idle_sleep());
        }
        Ok(())
    }

    /// Answer a data request with NOP plus up to 47 tape bytes, space padded.
    fn send_tape_chunk(&mut self) -> io::Result<()> {
        let Some(source) = self.state.source() else {
            self.state.diag.write("Data requested but no cassette is inserted");
            return Ok(());
        };

        let frame = {
            let mut tape = source
                .lock()
                .map_err(|_| io::Error::other("tape lock poisoned"))?;
            if tape.remaining() == 0 {
                None
            } else {
                let mut frame = Vec::with_capacity(CHUNK_SIZE);
                frame.push(Command::Nop.as_byte());
                frame.extend_from_slice(tape.next_chunk(CHUNK_SIZE - 1));
                frame.resize(CHUNK_SIZE, PAD_BYTE);
                Some(frame)
            }
        };

        match frame {
            Some(frame) => {
                log::trace!("Sending tape chunk ({} bytes)", frame.len());
                self.write_frame(&frame)
            }
            None => {
                self.state.diag.write("Tape end reached");
                sleep(self.config.end_of_tape_pause());
                self.state.request_stop();
                source
                    .lock()
                    .map_err(|_| io::Error::other("tape lock poisoned"))?
                    .rewind();
                Ok(())
            }
        }
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.port.write_all(frame)?;
        self.port.flush()
    }
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}

/// Link to a tape-port emulator over a serial device.
pub struct SerialHardwareLink {
    device_name: String,
    config: LinkConfig,
    state: Arc<LinkState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialHardwareLink {
    pub fn new(device_name: impl Into<String>, config: LinkConfig, diag: Arc<dyn Diagnostics>) -> Self {
        Self {
            device_name: device_name.into(),
            config,
            state: Arc::new(LinkState::new(diag)),
            worker: Mutex::new(None),
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Start the communication thread on an already open port.
    pub fn attach<P: Port + 'static>(&self, port: P) -> TapResult<()> {
        if self.state.connected.swap(true, Ordering::SeqCst) {
            return Err(TapError::AlreadyConnected);
        }

        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("tapdeck-link".to_string())
            .spawn(move || CommLoop::new(port, state, config).run());

        match spawned {
            Ok(handle) => {
                if let Ok(mut worker) = self.worker.lock() {
                    *worker = Some(handle);
                }
                self.state
                    .diag
                    .write(&format!("Connected to serial device: {}", self.device_name));
                self.state.send_command(Command::SenseOff);
                Ok(())
            }
            Err(e) => {
                self.state.connected.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Commands queued but not written yet, oldest first.
    pub fn pending_commands(&self) -> Vec<Command> {
        self.state.queue.snapshot()
    }

    /// Motor line as last reported by the device.
    pub fn is_motor_on(&self) -> bool {
        self.state.motor_on.load(Ordering::SeqCst)
    }

    /// Queue a ping; the answer shows up as a diagnostic line.
    pub fn ping(&self) {
        self.state.send_command(Command::Ping);
    }
}

impl HardwareLink for SerialHardwareLink {
    fn connect(&self) -> TapResult<()> {
        if self.is_connected() {
            return Err(TapError::AlreadyConnected);
        }

        match open_serial_port(&self.device_name, &self.config) {
            Ok(port) => self.attach(port),
            Err(e) => {
                self.state
                    .diag
                    .write(&format!("Could not open serial port {}: {}", self.device_name, e));
                Err(e)
            }
        }
    }

    fn disconnect(&self) {
        if !self.state.connected.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = self.worker.lock().ok().and_then(|mut worker| worker.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Communication thread panicked");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    fn play(&self) {
        self.state.request_play();
    }

    fn stop(&self) {
        self.state.request_stop();
    }

    fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    fn bind_data_source(&self, source: Option<SharedTape>) {
        if let Ok(mut slot) = self.state.source.lock() {
            *slot = source;
        }
    }

    fn set_event_sender(&self, events: EventSender) {
        if let Ok(mut slot) = self.state.events.lock() {
            *slot = Some(events);
        }
    }
}

impl Drop for SerialHardwareLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}
