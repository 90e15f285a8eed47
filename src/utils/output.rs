/// Bounded output collection
///
/// Each stream is drained on its own thread until EOF. Bytes beyond the
/// per-stream cap are read and discarded so the child never stalls on a full
/// pipe; the stream is then marked `TruncatedByLimit` and cut back to a
/// character boundary.
use crate::config::types::{OutputIntegrity, Result, RunnerError};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::io::{ErrorKind, Read};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const CHUNK_SIZE: usize = 8192;

/// Output limits configuration
#[derive(Debug, Clone, Copy)]
pub struct OutputLimits {
    /// Per-stream stdout limit (bytes)
    pub stdout_limit: usize,
    /// Per-stream stderr limit (bytes)
    pub stderr_limit: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            stdout_limit: 1024 * 1024,
            stderr_limit: 256 * 1024,
        }
    }
}

/// Bytes captured from one stream
#[derive(Debug, Clone, Default)]
pub struct CapturedStream {
    pub data: Vec<u8>,
    /// Bytes the program wrote, including any discarded past the cap
    pub total_bytes: usize,
    pub integrity: OutputIntegrity,
}

impl CapturedStream {
    /// Decode as UTF-8, replacing invalid sequences. No newline normalization.
    pub fn into_string(self) -> String {
        match String::from_utf8(self.data) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        }
    }
}

/// Output collection result
#[derive(Debug, Clone, Default)]
pub struct OutputResult {
    pub stdout: CapturedStream,
    pub stderr: CapturedStream,
}

impl OutputResult {
    pub fn combined_integrity(&self) -> OutputIntegrity {
        self.stdout.integrity.merge(self.stderr.integrity)
    }
}

type SharedStream = Arc<Mutex<CapturedStream>>;

fn lock(shared: &SharedStream) -> MutexGuard<'_, CapturedStream> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct StreamReader {
    shared: SharedStream,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl StreamReader {
    fn spawn<R: Read + Send + 'static>(name: &str, stream: R, limit: usize) -> Result<Self> {
        let (tx, done) = bounded(1);
        let shared = SharedStream::default();
        let reader_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("nimble-{}", name))
            .spawn(move || collect_stream(stream, limit, &reader_shared, tx))
            .map_err(|e| RunnerError::Process(format!("spawn {} reader: {}", name, e)))?;
        Ok(StreamReader {
            shared,
            done,
            handle,
        })
    }

    fn wait_until(self, deadline: Instant) -> CapturedStream {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.done.recv_timeout(remaining) {
            Ok(()) => {
                let _ = self.handle.join();
                std::mem::take(&mut *lock(&self.shared))
            }
            // Keep what was read so far and detach: the thread exits once the
            // last writer closes the pipe.
            Err(RecvTimeoutError::Timeout) => {
                let mut captured = std::mem::take(&mut *lock(&self.shared));
                captured.integrity = captured.integrity.merge(OutputIntegrity::CollectorTimeout);
                captured
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
                let mut captured = std::mem::take(&mut *lock(&self.shared));
                captured.integrity = OutputIntegrity::ReadError;
                captured
            }
        }
    }
}

/// Output collector with bounded collection
pub struct OutputCollector {
    stdout: Option<StreamReader>,
    stderr: Option<StreamReader>,
}

impl OutputCollector {
    /// Start draining both streams. Either may be absent.
    pub fn spawn<O, E>(stdout: Option<O>, stderr: Option<E>, limits: OutputLimits) -> Result<Self>
    where
        O: Read + Send + 'static,
        E: Read + Send + 'static,
    {
        let stdout = stdout
            .map(|s| StreamReader::spawn("stdout", s, limits.stdout_limit))
            .transpose()?;
        let stderr = stderr
            .map(|s| StreamReader::spawn("stderr", s, limits.stderr_limit))
            .transpose()?;
        Ok(OutputCollector { stdout, stderr })
    }

    /// Wait up to `timeout` for both readers to reach EOF.
    /// A reader still blocked at the deadline yields what it has read so far,
    /// marked `CollectorTimeout`.
    pub fn finish(self, timeout: Duration) -> OutputResult {
        let deadline = Instant::now() + timeout;
        OutputResult {
            stdout: self
                .stdout
                .map(|r| r.wait_until(deadline))
                .unwrap_or_default(),
            stderr: self
                .stderr
                .map(|r| r.wait_until(deadline))
                .unwrap_or_default(),
        }
    }
}

/// Length of the longest prefix of `data` that does not end inside a
/// multi-byte UTF-8 sequence.
fn char_boundary(data: &[u8]) -> usize {
    let len = data.len();
    for back in 1..=len.min(4) {
        let byte = data[len - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            b if b < 0x80 => 1,
            b if b & 0xE0 == 0xC0 => 2,
            b if b & 0xF0 == 0xE0 => 3,
            b if b & 0xF8 == 0xF0 => 4,
            _ => return len,
        };
        return if back < width { len - back } else { len };
    }
    len
}

/// Collect from a single stream with limit
fn collect_stream<R: Read>(mut stream: R, limit: usize, shared: &SharedStream, done: Sender<()>) {
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let mut captured = lock(shared);
                captured.total_bytes += n;
                if captured.integrity == OutputIntegrity::TruncatedByLimit {
                    continue;
                }
                let room = limit.saturating_sub(captured.data.len());
                captured.data.extend_from_slice(&chunk[..n.min(room)]);
                if room < n {
                    captured.integrity = OutputIntegrity::TruncatedByLimit;
                    let keep = char_boundary(&captured.data);
                    captured.data.truncate(keep);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("output stream read failed: {}", e);
                lock(shared).integrity = OutputIntegrity::ReadError;
                break;
            }
        }
    }

    let _ = done.send(());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct NeverEnding;

    impl Read for NeverEnding {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            thread::sleep(Duration::from_secs(3600));
            Ok(0)
        }
    }

    /// Yields one chunk, then blocks like a pipe held open by a detached writer.
    struct ChunkThenBlock(Option<&'static [u8]>);

    impl Read for ChunkThenBlock {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.take() {
                Some(chunk) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                None => {
                    thread::sleep(Duration::from_secs(3600));
                    Ok(0)
                }
            }
        }
    }

    #[test]
    fn test_output_limits_default() {
        let limits = OutputLimits::default();
        assert_eq!(limits.stdout_limit, 1024 * 1024);
        assert_eq!(limits.stderr_limit, 256 * 1024);
    }

    #[test]
    fn collects_both_streams_independently() {
        let collector = OutputCollector::spawn(
            Some(Cursor::new(b"out\n".to_vec())),
            Some(Cursor::new(b"err\n".to_vec())),
            OutputLimits::default(),
        )
        .unwrap();

        let result = collector.finish(Duration::from_secs(1));
        assert_eq!(result.stdout.clone().into_string(), "out\n");
        assert_eq!(result.stderr.clone().into_string(), "err\n");
        assert_eq!(result.combined_integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn missing_streams_are_empty_and_complete() {
        let collector = OutputCollector::spawn(
            None::<Cursor<Vec<u8>>>,
            None::<Cursor<Vec<u8>>>,
            OutputLimits::default(),
        )
        .unwrap();

        let result = collector.finish(Duration::from_millis(100));
        assert!(result.stdout.data.is_empty());
        assert!(result.stderr.data.is_empty());
        assert_eq!(result.combined_integrity(), OutputIntegrity::Complete);
    }

    #[test]
    fn stream_past_limit_is_truncated_but_fully_drained() {
        let payload = vec![b'x'; 3 * CHUNK_SIZE + 17];
        let limits = OutputLimits {
            stdout_limit: 100,
            stderr_limit: 100,
        };
        let collector = OutputCollector::spawn(
            Some(Cursor::new(payload.clone())),
            None::<Cursor<Vec<u8>>>,
            limits,
        )
        .unwrap();

        let result = collector.finish(Duration::from_secs(1));
        assert_eq!(result.stdout.data.len(), 100);
        assert_eq!(result.stdout.total_bytes, payload.len());
        assert_eq!(result.stdout.integrity, OutputIntegrity::TruncatedByLimit);
        assert_eq!(result.combined_integrity(), OutputIntegrity::TruncatedByLimit);
    }

    #[test]
    fn output_exactly_at_limit_is_complete() {
        let limits = OutputLimits {
            stdout_limit: 5,
            stderr_limit: 5,
        };
        let collector = OutputCollector::spawn(
            Some(Cursor::new(b"hello".to_vec())),
            None::<Cursor<Vec<u8>>>,
            limits,
        )
        .unwrap();

        let result = collector.finish(Duration::from_secs(1));
        assert_eq!(result.stdout.integrity, OutputIntegrity::Complete);
        assert_eq!(result.stdout.into_string(), "hello");
    }

    #[test]
    fn blocked_reader_times_out() {
        let collector = OutputCollector::spawn(
            Some(NeverEnding),
            Some(Cursor::new(b"late".to_vec())),
            OutputLimits::default(),
        )
        .unwrap();

        let started = Instant::now();
        let result = collector.finish(Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.stdout.integrity, OutputIntegrity::CollectorTimeout);
        assert_eq!(
            result.combined_integrity(),
            OutputIntegrity::CollectorTimeout
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let stream = CapturedStream {
            data: vec![b'o', b'k', 0xff],
            total_bytes: 3,
            integrity: OutputIntegrity::Complete,
        };
        assert_eq!(stream.into_string(), "ok\u{fffd}");
    }

    #[test]
    fn blocked_reader_keeps_bytes_read_before_timeout() {
        let collector = OutputCollector::spawn(
            Some(ChunkThenBlock(Some(b"hello"))),
            None::<Cursor<Vec<u8>>>,
            OutputLimits::default(),
        )
        .unwrap();

        // Let the reader pick up the first chunk before the drain deadline.
        thread::sleep(Duration::from_millis(100));
        let result = collector.finish(Duration::from_millis(100));
        assert_eq!(result.stdout.integrity, OutputIntegrity::CollectorTimeout);
        assert_eq!(result.stdout.total_bytes, 5);
        assert_eq!(result.stdout.into_string(), "hello");
    }

    #[test]
    fn truncation_does_not_split_a_character() {
        let limits = OutputLimits {
            stdout_limit: 4,
            stderr_limit: 4,
        };
        let collector = OutputCollector::spawn(
            Some(Cursor::new("abc\u{20ac}def".as_bytes().to_vec())),
            None::<Cursor<Vec<u8>>>,
            limits,
        )
        .unwrap();

        let result = collector.finish(Duration::from_secs(1));
        assert_eq!(result.stdout.integrity, OutputIntegrity::TruncatedByLimit);
        assert_eq!(result.stdout.total_bytes, 9);
        assert_eq!(result.stdout.into_string(), "abc");
    }

    #[test]
    fn char_boundary_finds_last_complete_character() {
        assert_eq!(char_boundary(b""), 0);
        assert_eq!(char_boundary(b"ab"), 2);
        assert_eq!(char_boundary("ab\u{20ac}".as_bytes()), 5);
        assert_eq!(char_boundary(&"ab\u{20ac}".as_bytes()[..4]), 2);
        assert_eq!(char_boundary(&"\u{1f600}".as_bytes()[..3]), 0);
        assert_eq!(char_boundary(&[b'o', b'k', 0xff]), 3);
    }
}
