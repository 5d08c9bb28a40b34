//! Byte transports under the protocol engine.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::config::LinkConfig;
use crate::error::{TapError, TapResult};

/// Bidirectional byte stream with a non-blocking readable count.
pub trait Port: Read + Write + Send {
    /// Bytes that can be read right now without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;
}

impl Port for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> TapResult<Vec<String>> {
    Ok(serialport::available_ports()?
        .into_iter()
        .map(|info| info.port_name)
        .collect())
}

/// Open `name` as 8-N-1 at the configured baud rate.
///
/// The device must show up in the port enumeration.
pub fn open_serial_port(name: &str, config: &LinkConfig) -> TapResult<Box<dyn SerialPort>> {
    if !available_ports()?.iter().any(|port| port == name) {
        return Err(TapError::PortNotFound(name.to_string()));
    }

    let port = serialport::new(name, config.baud_rate)
        .data_bits(DataBits::Eight)
        .stop_bits(StopBits::One)
        .parity(Parity::None)
        .flow_control(FlowControl::None)
        .timeout(config.open_timeout())
        .open()?;
    Ok(port)
}

#[derive(Default)]
struct MemoryPortInner {
    input: VecDeque<u8>,
    output: Vec<u8>,
}

/// In-memory port: queued input, captured output.
///
/// Clones share the same buffers, so a test can keep one handle while the
/// link owns the other.
#[derive(Clone, Default)]
pub struct MemoryPort {
    inner: Arc<Mutex<MemoryPortInner>>,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, MemoryPortInner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("memory port lock poisoned"))
    }

    /// Queue bytes as if the device had sent them.
    pub fn queue_input(&self, bytes: &[u8]) {
        if let Ok(mut inner) = self.lock() {
            inner.input.extend(bytes.iter().copied());
        }
    }

    /// Input bytes not consumed yet.
    pub fn pending_input(&self) -> usize {
        self.lock().map(|inner| inner.input.len()).unwrap_or(0)
    }

    /// Everything written by the host so far.
    pub fn output(&self) -> Vec<u8> {
        self.lock().map(|inner| inner.output.clone()).unwrap_or_default()
    }

    /// Return and clear the captured output.
    pub fn take_output(&self) -> Vec<u8> {
        self.lock()
            .map(|mut inner| std::mem::take(&mut inner.output))
            .unwrap_or_default()
    }
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.lock()?;
        if inner.input.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no input queued"));
        }
        let n = buf.len().min(inner.input.len());
        for (slot, byte) in buf.iter_mut().zip(inner.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MemoryPort {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.lock()?.input.len())
    }
}
