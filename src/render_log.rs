//! Render-thread logging.
//!
//! The audio callback cannot call into the `log` facade (the installed logger may lock,
//! allocate or do I/O). Messages are formatted into fixed-size entries and pushed into a
//! ring; the control plane drains the ring on every tick and forwards entries to `log`.
//! A full ring drops the message.

use log::Level;
use ringbuf::{Consumer, Producer, RingBuffer};
use std::fmt;

const MSG_MAX: usize = 120;

#[derive(Copy, Clone)]
struct LogEntry {
    level: Level,
    len: u8,
    bytes: [u8; MSG_MAX],
}

struct FixedBuf {
    buf: [u8; MSG_MAX],
    len: usize,
}

impl fmt::Write for FixedBuf {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let avail = MSG_MAX - self.len;
        if avail == 0 {
            return Ok(());
        }
        // Truncate on a char boundary so the drained entry stays valid UTF-8.
        let mut n = s.len().min(avail);
        while !s.is_char_boundary(n) {
            n -= 1;
        }
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        Ok(())
    }
}

/// Creates a connected writer/reader pair holding up to `capacity` messages.
pub fn render_log(capacity: usize) -> (RenderLogWriter, RenderLogReader) {
    let (prod, cons) = RingBuffer::<LogEntry>::new(capacity.max(1)).split();
    (RenderLogWriter { prod }, RenderLogReader { cons })
}

/// Render-side handle. Never blocks, never allocates.
pub struct RenderLogWriter {
    prod: Producer<LogEntry>,
}

impl RenderLogWriter {
    pub fn log(&mut self, level: Level, args: fmt::Arguments) {
        if self.prod.is_full() {
            return;
        }
        let mut buf = FixedBuf {
            buf: [0; MSG_MAX],
            len: 0,
        };
        let _ = fmt::write(&mut buf, args);
        let _ = self.prod.push(LogEntry {
            level,
            len: buf.len as u8,
            bytes: buf.buf,
        });
    }

    pub fn info(&mut self, args: fmt::Arguments) {
        self.log(Level::Info, args);
    }

    pub fn warn(&mut self, args: fmt::Arguments) {
        self.log(Level::Warn, args);
    }
}

pub struct RenderLogReader {
    cons: Consumer<LogEntry>,
}

impl RenderLogReader {
    /// Forwards every pending entry to the `log` facade. Returns how many were drained.
    pub fn drain(&mut self) -> usize {
        self.drain_with(|level, msg| log::log!(target: "speechboost::render", level, "{}", msg))
    }

    pub fn drain_with(&mut self, mut sink: impl FnMut(Level, &str)) -> usize {
        let mut n = 0;
        while let Some(entry) = self.cons.pop() {
            let msg = std::str::from_utf8(&entry.bytes[..entry.len as usize]).unwrap_or("<invalid>");
            sink(entry.level, msg);
            n += 1;
        }
        n
    }
}
