//! Background line reader for the server's output stream.
//!
//! One reader thread per supervised process drains the merged stdout/stderr
//! pipe into an unbounded channel. The control path pulls lines with
//! [`LineStreamer::poll`], which never waits longer than the timeout it is given.

use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use std::io::{BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// One line of server output, without its line terminator.
pub type LogLine = String;

/// Log target used when mirroring server output.
pub const SERVER_LOG_TARGET: &str = "pregen_bench::server";

/// Reads lines from a stream on a dedicated thread and queues them in order.
pub struct LineStreamer {
    rx: Receiver<LogLine>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl LineStreamer {
    /// Start reading `source` on a new thread.
    ///
    /// With `mirror` set, every line is also logged under [`SERVER_LOG_TARGET`].
    pub fn spawn<R>(source: R, mirror: bool) -> std::io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let reader = thread::Builder::new()
            .name("server-log-reader".to_string())
            .spawn(move || {
                let mut reader = BufReader::new(source);
                let mut buf = Vec::with_capacity(256);
                while !stop_flag.load(Ordering::Relaxed) {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = decode_line(&buf);
                            if mirror {
                                tracing::info!(target: SERVER_LOG_TARGET, "{line}");
                            }
                            if tx.send(line).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            tracing::debug!(error = %e, "server output closed");
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            rx,
            stop,
            reader: Some(reader),
        })
    }

    /// Next queued line, or `None` if nothing arrives within `timeout`.
    pub fn poll(&self, timeout: Duration) -> Option<LogLine> {
        match self.rx.recv_timeout(timeout) {
            Ok(line) => Some(line),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                // Reader is gone and the queue is drained; keep the caller's cadence.
                thread::sleep(timeout);
                None
            }
        }
    }

    /// Whether the reader has finished and every queued line has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.rx.is_empty() && self.reader.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Ask the reader to stop at its next line boundary.
    ///
    /// A reader blocked in `read` exits when the pipe closes, which happens once
    /// the process is gone. Safe to call any number of times.
    pub fn close(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.reader.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for LineStreamer {
    fn drop(&mut self) {
        self.close();
    }
}

fn decode_line(raw: &[u8]) -> LogLine {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::time::Instant;

    /// A `Read` fed by a channel so tests control when bytes arrive.
    struct ChannelReader {
        rx: std::sync::mpsc::Receiver<Vec<u8>>,
        buf: Cursor<Vec<u8>>,
    }

    impl Read for ChannelReader {
        fn read(&mut self, out: &mut [u8]) -> std::io::Result<usize> {
            loop {
                let n = self.buf.read(out)?;
                if n > 0 {
                    return Ok(n);
                }
                match self.rx.recv() {
                    Ok(chunk) => self.buf = Cursor::new(chunk),
                    Err(_) => return Ok(0),
                }
            }
        }
    }

    fn channel_reader() -> (std::sync::mpsc::Sender<Vec<u8>>, ChannelReader) {
        let (tx, rx) = std::sync::mpsc::channel();
        (
            tx,
            ChannelReader {
                rx,
                buf: Cursor::new(Vec::new()),
            },
        )
    }

    #[test]
    fn should_deliver_lines_in_order_without_loss() {
        let (tx, reader) = channel_reader();
        let streamer = LineStreamer::spawn(reader, false).unwrap();

        let producer = thread::spawn(move || {
            for i in 0..1000 {
                let mut chunk = Vec::new();
                writeln!(chunk, "line {i}").unwrap();
                tx.send(chunk).unwrap();
            }
        });

        let mut got = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(10);
        while got.len() < 1000 && Instant::now() < deadline {
            if let Some(line) = streamer.poll(Duration::from_millis(50)) {
                got.push(line);
            }
        }
        producer.join().unwrap();

        let expected: Vec<_> = (0..1000).map(|i| format!("line {i}")).collect();
        assert_eq!(got, expected);
        assert!(streamer.poll(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn should_split_lines_across_chunk_boundaries() {
        let (tx, reader) = channel_reader();
        let streamer = LineStreamer::spawn(reader, false).unwrap();

        tx.send(b"Generated rad".to_vec()).unwrap();
        tx.send(b"ius: 42%\r\nDone (3.1s)!\n".to_vec()).unwrap();
        drop(tx);

        assert_eq!(
            streamer.poll(Duration::from_secs(2)).as_deref(),
            Some("Generated radius: 42%")
        );
        assert_eq!(
            streamer.poll(Duration::from_secs(2)).as_deref(),
            Some("Done (3.1s)!")
        );
    }

    #[test]
    fn should_return_none_within_timeout_when_idle() {
        let (_tx, reader) = channel_reader();
        let streamer = LineStreamer::spawn(reader, false).unwrap();

        let start = Instant::now();
        assert!(streamer.poll(Duration::from_millis(100)).is_none());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(90));
        assert!(waited < Duration::from_secs(2));
    }

    #[test]
    fn should_report_exhausted_after_eof() {
        let streamer = LineStreamer::spawn(Cursor::new(b"only\n".to_vec()), false).unwrap();
        assert_eq!(streamer.poll(Duration::from_secs(2)).as_deref(), Some("only"));

        let deadline = Instant::now() + Duration::from_secs(2);
        while !streamer.is_exhausted() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(streamer.is_exhausted());
        assert!(streamer.poll(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn should_tolerate_repeated_close() {
        let (_tx, reader) = channel_reader();
        let mut streamer = LineStreamer::spawn(reader, true).unwrap();
        streamer.close();
        streamer.close();
    }

    #[test]
    fn should_decode_invalid_utf8_lossily() {
        assert_eq!(decode_line(b"ok \xff\n"), "ok \u{fffd}");
        assert_eq!(decode_line(b"\r\n"), "");
    }
}
