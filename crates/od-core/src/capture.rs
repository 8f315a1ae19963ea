//! Output interception
//!
//! [`OutputInterceptor`] sits between a job and its log. Every complete line
//! is forwarded to the log unchanged and, when the job declares an encoding,
//! decoded into the job's buffer in the process-wide
//! [`CapturedOutputRegistry`]. The reporting step takes that buffer at
//! teardown.
//!
//! A trailing line without terminator is held back until one arrives. On
//! close it is forwarded to the log so nothing is lost there, but it is not
//! captured: only terminated lines reach the buffer.

use dashmap::DashMap;
use encoding_rs::Encoding;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::JobId;

/// Captured lines of one job
pub type CaptureBuffer = Arc<Mutex<Vec<String>>>;

struct CaptureEntry {
    lines: CaptureBuffer,
    attached_at: Instant,
}

/// Process-wide map from job to captured output
pub struct CapturedOutputRegistry {
    entries: DashMap<JobId, CaptureEntry>,
}

impl CapturedOutputRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Buffer for a job, created on first attach
    pub fn attach(&self, job: &JobId) -> CaptureBuffer {
        self.entries
            .entry(job.clone())
            .or_insert_with(|| CaptureEntry {
                lines: Arc::new(Mutex::new(Vec::new())),
                attached_at: Instant::now(),
            })
            .lines
            .clone()
    }

    /// Copy of a job's lines so far
    pub fn lines(&self, job: &JobId) -> Option<Vec<String>> {
        self.entries.get(job).map(|e| e.lines.lock().clone())
    }

    /// Remove a job's buffer and return its lines
    pub fn take(&self, job: &JobId) -> Option<Vec<String>> {
        self.entries
            .remove(job)
            .map(|(_, entry)| std::mem::take(&mut *entry.lines.lock()))
    }

    /// Whether a job has a buffer
    pub fn contains(&self, job: &JobId) -> bool {
        self.entries.contains_key(job)
    }

    /// Drop buffers attached longer ago than `max_age`
    ///
    /// Returns how many were evicted.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.attached_at.elapsed() <= max_age);
        before.saturating_sub(self.entries.len())
    }

    /// Number of jobs with a buffer
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no job has a buffer
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CapturedOutputRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Line-splitting pass-through writer
pub struct OutputInterceptor<W: Write> {
    sink: Option<W>,
    encoding: Option<&'static Encoding>,
    capture: CaptureBuffer,
    pending: Vec<u8>,
    closed: bool,
}

impl<W: Write> OutputInterceptor<W> {
    /// Wrap `sink`
    ///
    /// Without a sink only capture happens; without an encoding only
    /// forwarding happens.
    pub fn new(sink: Option<W>, encoding: Option<&'static Encoding>, capture: CaptureBuffer) -> Self {
        Self {
            sink,
            encoding,
            capture,
            pending: Vec::new(),
            closed: false,
        }
    }

    /// Whether `close` already ran
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flush the held-back tail to the sink and close the sink
    ///
    /// Safe to call repeatedly; only the first call touches the sink.
    pub fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let tail = std::mem::take(&mut self.pending);
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };

        let result = if tail.is_empty() {
            sink.flush()
        } else {
            sink.write_all(&tail).and_then(|_| sink.flush())
        };
        drop(sink);

        match result {
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
            other => other,
        }
    }

    fn capture_line(&self, line: &[u8]) {
        if let Some(encoding) = self.encoding {
            let text = line
                .strip_suffix(b"\n")
                .map(|l| l.strip_suffix(b"\r").unwrap_or(l))
                .unwrap_or(line);
            let (decoded, _) = encoding.decode_without_bom_handling(text);
            self.capture.lock().push(decoded.into_owned());
        }
    }

    fn forward(&mut self, line: &[u8]) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.write_all(line),
            None => Ok(()),
        }
    }
}

impl<W: Write> Write for OutputInterceptor<W> {
    /// Capture and forward every complete line of `buf`
    ///
    /// When forwarding fails, the remaining complete lines are still
    /// captured and the unterminated tail is still held back; only
    /// forwarding stops, and the first error is returned.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "output interceptor is closed",
            ));
        }

        let mut forwarded: io::Result<()> = Ok(());
        let mut rest = buf;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos + 1);
            let line: Cow<'_, [u8]> = if self.pending.is_empty() {
                Cow::Borrowed(head)
            } else {
                let mut line = std::mem::take(&mut self.pending);
                line.extend_from_slice(head);
                Cow::Owned(line)
            };
            self.capture_line(&line);
            if forwarded.is_ok() {
                forwarded = self.forward(&line);
            }
            rest = tail;
        }
        self.pending.extend_from_slice(rest);

        forwarded.map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for OutputInterceptor<W> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("Closing output sink failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records writes and counts closes (drops)
    #[derive(Clone, Default)]
    struct RecordingSink {
        written: Arc<Mutex<Vec<u8>>>,
        closes: Arc<Mutex<u32>>,
        broken: bool,
        capacity: Option<usize>,
    }

    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            let mut written = self.written.lock();
            if self.capacity.is_some_and(|cap| written.len() + buf.len() > cap) {
                return Err(io::Error::new(io::ErrorKind::Other, "sink full"));
            }
            written.extend_from_slice(buf);
            drop(written);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if self.broken {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            Ok(())
        }
    }

    impl Drop for RecordingSink {
        fn drop(&mut self) {
            *self.closes.lock() += 1;
        }
    }

    fn interceptor(sink: Option<RecordingSink>) -> (OutputInterceptor<RecordingSink>, CaptureBuffer) {
        let buffer: CaptureBuffer = Arc::default();
        let interceptor = OutputInterceptor::new(sink, Some(encoding_rs::UTF_8), buffer.clone());
        (interceptor, buffer)
    }

    #[test]
    fn test_partial_tail_is_forwarded_but_not_captured() {
        let sink = RecordingSink::default();
        let (mut out, captured) = interceptor(Some(sink.clone()));

        out.write_all(b"line1\nline2").unwrap();
        out.close().unwrap();

        assert_eq!(*captured.lock(), vec!["line1".to_string()]);
        assert_eq!(&*sink.written.lock(), b"line1\nline2");
    }

    #[test]
    fn test_lines_split_across_writes() {
        let sink = RecordingSink::default();
        let (mut out, captured) = interceptor(Some(sink.clone()));

        out.write_all(b"hel").unwrap();
        assert!(sink.written.lock().is_empty());
        out.write_all(b"lo\r\nwor").unwrap();
        out.write_all(b"ld\n\n").unwrap();

        assert_eq!(*captured.lock(), vec!["hello", "world", ""]);
        assert_eq!(&*sink.written.lock(), b"hello\r\nworld\n\n");
    }

    #[test]
    fn test_decoding_only_mode() {
        let (mut out, captured) = interceptor(None);
        out.write_all(b"a\nb\n").unwrap();
        out.close().unwrap();
        assert_eq!(*captured.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_forwarding_only_mode() {
        let sink = RecordingSink::default();
        let captured: CaptureBuffer = Arc::default();
        let mut out = OutputInterceptor::new(Some(sink.clone()), None, captured.clone());

        out.write_all(b"a\nb\n").unwrap();
        out.close().unwrap();

        assert!(captured.lock().is_empty());
        assert_eq!(&*sink.written.lock(), b"a\nb\n");
    }

    #[test]
    fn test_forwarding_failure_still_captures_rest_of_buffer() {
        let mut sink = RecordingSink::default();
        sink.capacity = Some(4);
        let (mut out, captured) = interceptor(Some(sink.clone()));

        assert!(out.write(b"one\ntwo\nthree\npar").is_err());
        assert_eq!(*captured.lock(), vec!["one", "two", "three"]);
        assert_eq!(&*sink.written.lock(), b"one\n");

        // the unterminated tail was held back
        assert!(out.write(b"t\n").is_err());
        assert_eq!(*captured.lock(), vec!["one", "two", "three", "part"]);
    }

    #[test]
    fn test_declared_encoding_is_used() {
        let captured: CaptureBuffer = Arc::default();
        let mut out: OutputInterceptor<Vec<u8>> =
            OutputInterceptor::new(Some(Vec::new()), Some(encoding_rs::WINDOWS_1252), captured.clone());

        out.write_all(b"caf\xe9\n").unwrap();
        assert_eq!(*captured.lock(), vec!["café"]);
    }

    #[test]
    fn test_close_closes_sink_exactly_once() {
        let sink = RecordingSink::default();
        let closes = sink.closes.clone();
        let (mut out, _) = interceptor(Some(sink));

        out.close().unwrap();
        out.close().unwrap();
        drop(out);

        assert_eq!(*closes.lock(), 1);
    }

    #[test]
    fn test_close_tolerates_closed_sink() {
        let mut sink = RecordingSink::default();
        sink.broken = true;
        let (mut out, _) = interceptor(Some(sink));
        out.close().unwrap();
        assert!(out.is_closed());
    }

    #[test]
    fn test_write_after_close_fails() {
        let (mut out, _) = interceptor(Some(RecordingSink::default()));
        out.close().unwrap();
        assert!(out.write_all(b"late\n").is_err());
    }

    #[test]
    fn test_registry_attach_take() {
        let registry = CapturedOutputRegistry::new();
        let job = JobId::new("p", 1);

        let first = registry.attach(&job);
        let second = registry.attach(&job);
        first.lock().push("one".to_string());
        second.lock().push("two".to_string());

        assert_eq!(registry.lines(&job).unwrap(), vec!["one", "two"]);
        assert_eq!(registry.take(&job).unwrap(), vec!["one", "two"]);
        assert!(!registry.contains(&job));
        assert!(registry.take(&job).is_none());
    }

    #[test]
    fn test_concurrent_jobs_do_not_mix() {
        let registry = Arc::new(CapturedOutputRegistry::new());
        let jobs: Vec<JobId> = (1..=2).map(|n| JobId::new("shop", n)).collect();

        let handles: Vec<_> = jobs
            .iter()
            .cloned()
            .map(|job| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let buffer = registry.attach(&job);
                    let mut out: OutputInterceptor<Vec<u8>> =
                        OutputInterceptor::new(Some(Vec::new()), Some(encoding_rs::UTF_8), buffer);
                    for i in 0..100 {
                        writeln!(out, "{} line {}", job, i).unwrap();
                    }
                    out.close().unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for job in &jobs {
            let lines = registry.take(job).unwrap();
            assert_eq!(lines.len(), 100);
            assert!(lines.iter().all(|l| l.starts_with(&job.to_string())));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_evict_older_than() {
        let registry = CapturedOutputRegistry::new();
        registry.attach(&JobId::new("p", 1));

        assert_eq!(registry.evict_older_than(Duration::from_secs(3600)), 0);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(registry.evict_older_than(Duration::from_millis(1)), 1);
        assert!(registry.is_empty());
    }
}
