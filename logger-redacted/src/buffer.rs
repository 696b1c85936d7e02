use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

use crate::entry::{LogEntry, LogFormat};

/// Destination for drained log entries.
pub trait LogSink: Send + Sync {
    fn write_entry(&self, rendered: &str) -> std::io::Result<()>;
}

/// Sink writing one rendered entry per line to stderr.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_entry(&self, rendered: &str) -> std::io::Result<()> {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "{rendered}")
    }
}

/// Bounded ring buffer in front of a sink.
///
/// When the buffer is full the oldest entry is dropped. `flush()` drains to
/// the sink; entries the sink rejects fall back to stderr with an error
/// annotation so nothing is silently lost.
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    format: LogFormat,
}

impl LogBuffer {
    pub fn new(capacity: usize, format: LogFormat) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            format,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().expect("log buffer poisoned");
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("log buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the buffer into the sink. Returns the number of entries the sink
    /// accepted; rejected entries go to stderr annotated with the failure.
    pub fn flush(&self, sink: &dyn LogSink) -> usize {
        let drained: Vec<LogEntry> = {
            let mut entries = self.entries.lock().expect("log buffer poisoned");
            entries.drain(..).collect()
        };

        let mut delivered = 0;
        for entry in drained {
            let rendered = entry.render(self.format);
            match sink.write_entry(&rendered) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    let fallback = StderrSink;
                    let _ = fallback
                        .write_entry(&format!("[sink-failed: {err}] {rendered}"));
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::entry::LogLevel;

    struct CountingSink {
        accepted: AtomicUsize,
        fail: bool,
    }

    impl LogSink for CountingSink {
        fn write_entry(&self, _rendered: &str) -> std::io::Result<()> {
            if self.fail {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "sink down"))
            } else {
                self.accepted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    #[test]
    fn test_ring_buffer_drops_oldest() {
        let buffer = LogBuffer::new(2, LogFormat::Json);
        buffer.push(LogEntry::new(LogLevel::Info, "one"));
        buffer.push(LogEntry::new(LogLevel::Info, "two"));
        buffer.push(LogEntry::new(LogLevel::Info, "three"));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_flush_drains_to_sink() {
        let buffer = LogBuffer::new(10, LogFormat::Json);
        buffer.push(LogEntry::new(LogLevel::Info, "a"));
        buffer.push(LogEntry::new(LogLevel::Warn, "b"));

        let sink = CountingSink {
            accepted: AtomicUsize::new(0),
            fail: false,
        };
        let delivered = buffer.flush(&sink);

        assert_eq!(delivered, 2);
        assert_eq!(sink.accepted.load(Ordering::SeqCst), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_flush_degrades_on_sink_failure() {
        let buffer = LogBuffer::new(10, LogFormat::Text);
        buffer.push(LogEntry::new(LogLevel::Error, "important"));

        let sink = CountingSink {
            accepted: AtomicUsize::new(0),
            fail: true,
        };
        let delivered = buffer.flush(&sink);

        // Nothing delivered to the sink, but the buffer is drained (entries
        // went to the stderr fallback rather than being retained).
        assert_eq!(delivered, 0);
        assert!(buffer.is_empty());
    }
}
