//! Single-byte wire vocabulary of the tape-port device.

/// Bytes per data exchange: one command byte plus the payload.
pub const CHUNK_SIZE: usize = 48;

/// Filler appended to a short final data chunk.
pub const PAD_BYTE: u8 = 0x20;

/// Host to device commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// No-op, also the marker in front of tape data
    Nop = b'Z',
    Ping = b'P',
    Play = b'R',
    /// Start recording (not used by the host yet)
    Record = b'W',
    Stop = b'r',
    SenseOn = b'S',
    SenseOff = b's',
}

impl Command {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Device to host notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Device wants the next data chunk
    DataRequest,
    MotorOn,
    MotorOff,
    PingAck,
    Error,
    Unknown(u8),
}

impl DeviceEvent {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'N' => DeviceEvent::DataRequest,
            b'M' => DeviceEvent::MotorOn,
            b'm' => DeviceEvent::MotorOff,
            b'P' => DeviceEvent::PingAck,
            b'E' => DeviceEvent::Error,
            other => DeviceEvent::Unknown(other),
        }
    }
}
