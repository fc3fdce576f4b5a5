//! Serialized event output.
//!
//! Every worker shares one [`EventSink`]; the sink's mutex guarantees that
//! concurrent emissions never interleave partial JSON lines on stdout.

use crate::protocol::OutputEvent;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Writes one compact JSON document per line to the wrapped writer.
///
/// Emission is fire-and-forget: a failed write means the consumer is gone,
/// and the process will exit on the next stdin decode cycle anyway.
pub struct EventSink {
    out: Mutex<Box<dyn Write + Send>>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(writer),
        }
    }

    pub fn emit(&self, event: &OutputEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        // Poisoned lock means another emitter panicked mid-write; the stream
        // is already corrupt, so stop writing to it.
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let _ = out.write_all(line.as_bytes());
        let _ = out.write_all(b"\n");
        let _ = out.flush();
    }
}

/// Cloneable in-memory writer for asserting on emitted events in tests.
#[derive(Clone, Default)]
pub struct EventCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl EventCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> EventSink {
        EventSink::with_writer(Box::new(self.clone()))
    }

    /// All emitted events, decoded back from the line protocol.
    pub fn events(&self) -> Vec<serde_json::Value> {
        let buf = self.buf.lock().expect("capture lock");
        String::from_utf8_lossy(&buf)
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("captured event is valid JSON"))
            .collect()
    }
}

impl Write for EventCapture {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().expect("capture lock").extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
