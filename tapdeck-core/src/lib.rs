//! TAP cassette deck core
//!
//! This crate streams C64 TAP tape images to a tape-port emulator attached
//! over a serial line:
//! - TAP pulse-stream timing and chunked reading
//! - Serial command protocol with on-demand tape streaming
//! - Cassette lifecycle state machine
//!
//! # Architecture
//!
//! The deck uses a layered design:
//! - `Tape`: owns the image bytes and the read cursor
//! - `HardwareLink` trait: play/stop requests, acknowledged asynchronously
//! - `SerialHardwareLink`: command queue plus a communication thread
//! - `CassetteRecorder`: drives the link and republishes state changes
//!
//! Acknowledgements and position updates travel back to the recorder as
//! `DeckEvent`s over a channel and are handled on the caller's thread.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod link;
pub mod recorder;
pub mod tape;

pub use config::{DeckConfig, LinkConfig, RecorderConfig};
pub use diagnostics::{Diagnostics, LogDiagnostics, MemoryDiagnostics};
pub use error::{TapError, TapResult};
pub use event::{DeckEvent, EventSender};
pub use link::{
    available_ports, open_serial_port, Command, DeviceEvent, HardwareLink, MemoryPort, Port,
    SerialHardwareLink, CHUNK_SIZE,
};
pub use recorder::{CassetteRecorder, RecorderObserver, RecorderState};
pub use tape::{SharedTape, TapHeader, Tape, CLOCK_HZ, HEADER_END};
