//! In-memory capture of log output.
//!
//! The development bundler hands its accumulated build logs to the host on
//! every handoff poll. [`LogCapture`] is installed as an additional tracing
//! layer writer; it buffers formatted log lines only while started and never
//! replaces the regular stderr output. Past [`MAX_CAPTURE_BYTES`] the oldest
//! output is discarded.

use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Largest amount of undrained output kept.
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Default)]
struct CaptureState {
    active: bool,
    buffer: Vec<u8>,
}

/// Shared log buffer with start/stop/drain operations.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    state: Arc<Mutex<CaptureState>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin buffering output.
    pub fn start(&self) {
        self.lock().active = true;
    }

    /// Stop buffering output. Already buffered content is kept.
    pub fn stop(&self) {
        self.lock().active = false;
    }

    /// Take everything buffered so far, leaving the buffer empty.
    pub fn drain(&self) -> String {
        let bytes = std::mem::take(&mut self.lock().buffer);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Writer handed out to the fmt layer for each event.
pub struct CaptureWriter {
    state: Arc<Mutex<CaptureState>>,
}

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.active {
            state.buffer.extend_from_slice(buf);
            let excess = state.buffer.len().saturating_sub(MAX_CAPTURE_BYTES);
            if excess > 0 {
                state.buffer.drain(..excess);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter {
            state: self.state.clone(),
        }
    }
}
