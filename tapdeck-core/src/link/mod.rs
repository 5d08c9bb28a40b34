//! Hardware link abstraction.
//!
//! This module provides the transport layers between the recorder and the
//! tape-port hardware:
//! - `HardwareLink`: capability trait the recorder drives
//! - `SerialHardwareLink`: the serial protocol engine
//! - `Port`: byte transport under the engine (`MemoryPort` for tests)

mod port;
mod protocol;
mod serial;

pub use port::{available_ports, open_serial_port, MemoryPort, Port};
pub use protocol::{Command, DeviceEvent, CHUNK_SIZE, PAD_BYTE};
pub use serial::SerialHardwareLink;

use crate::error::TapResult;
use crate::event::EventSender;
use crate::tape::SharedTape;

/// Operations a concrete tape-port link must provide.
///
/// `play()` and `stop()` only request a change. Implementations report the
/// change through the registered event sender once the hardware actually
/// switched, as `DeckEvent::PlayStateChanged`.
pub trait HardwareLink: Send + Sync {
    /// Open the transport. Fails with `AlreadyConnected` if already open.
    fn connect(&self) -> TapResult<()>;

    /// Close the transport. No-op when not connected.
    fn disconnect(&self);

    fn is_connected(&self) -> bool;

    /// Request playback. No-op when already playing.
    fn play(&self);

    /// Request stop. No-op when not playing.
    fn stop(&self);

    fn is_playing(&self) -> bool;

    /// Tape to stream from when the hardware asks for data.
    fn bind_data_source(&self, source: Option<SharedTape>);

    /// Register where play-state changes are reported.
    fn set_event_sender(&self, events: EventSender);
}
