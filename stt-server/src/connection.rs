use std::io::{ErrorKind, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use shared_protocol::{decode_pcm16le, SAMPLE_RATE};

use crate::framer;

/// Socket timeout used only to let the read loop observe the shutdown flag
/// periodically; it never ends a session by itself.
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Read buffer capacity for a single `recv_audio` call. Independent of the
/// outgoing line-framer packet size.
const RECV_BUFFER_BYTES: usize = 1 << 20;

/// Outcome of a single audio read.
#[derive(Debug, PartialEq)]
pub enum RecvOutcome {
    Bytes(Vec<u8>),
    /// Timed out with no data; the socket is still open.
    NoDataYet,
    /// Orderly close or connection reset.
    StreamEnded,
}

/// Wraps a client TCP socket: reads audio with a shutdown-observing
/// timeout, writes output lines, and suppresses duplicate lines.
pub struct Connection {
    sock: TcpStream,
    last_sent: Option<String>,
    max_single_recv_bytes: usize,
    packet_size_bytes: usize,
}

impl Connection {
    pub fn new(
        sock: TcpStream,
        max_single_recv_bytes: usize,
        packet_size_bytes: usize,
    ) -> std::io::Result<Self> {
        sock.set_read_timeout(Some(RECV_TIMEOUT))?;
        Ok(Self {
            sock,
            last_sent: None,
            max_single_recv_bytes,
            packet_size_bytes,
        })
    }

    /// Reads up to one buffer's worth of audio bytes.
    pub fn recv_audio(&mut self) -> std::io::Result<RecvOutcome> {
        use std::io::Read;

        let mut buf = vec![0u8; RECV_BUFFER_BYTES];
        match self.sock.read(&mut buf) {
            Ok(0) => Ok(RecvOutcome::StreamEnded),
            Ok(n) => {
                buf.truncate(n);
                if n > self.max_single_recv_bytes {
                    tracing::warn!(
                        bytes = n,
                        threshold = self.max_single_recv_bytes,
                        "oversized audio packet received"
                    );
                }
                Ok(RecvOutcome::Bytes(buf))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(RecvOutcome::NoDataYet)
            }
            Err(e) if e.kind() == ErrorKind::ConnectionReset => Ok(RecvOutcome::StreamEnded),
            Err(e) => Err(e),
        }
    }

    /// Sends `line` unless it is byte-identical to the previous line.
    pub fn send(&mut self, line: &str) -> std::io::Result<()> {
        if self.last_sent.as_deref() == Some(line) {
            return Ok(());
        }
        framer::send_line(&mut self.sock, line, self.packet_size_bytes, false)?;
        self.last_sent = Some(line.to_string());
        Ok(())
    }

    pub fn shutdown(&self) {
        let _ = self.sock.shutdown(std::net::Shutdown::Both);
    }
}

/// Accumulates audio read from a connection until `min_chunk` seconds worth
/// of samples are available, or the stream ends.
pub struct ChunkAccumulator {
    min_chunk_samples: usize,
}

/// Outcome of one `ChunkAccumulator::poll` call.
pub enum ChunkOutcome {
    Ready(Vec<f32>),
    NoDataYet,
    StreamEnded,
}

impl ChunkAccumulator {
    pub fn new(min_chunk_seconds: f64) -> Self {
        Self {
            min_chunk_samples: (min_chunk_seconds * SAMPLE_RATE as f64) as usize,
        }
    }

    /// Reads from `conn` until at least `min_chunk` seconds of samples have
    /// accumulated or the stream ends. A `NO_DATA_YET` timeout with nothing
    /// accumulated yet is propagated so the caller can re-check shutdown.
    ///
    /// `shutdown` is rechecked every iteration of the inner wait loop (not
    /// just between calls), since a slow-dribbling client could otherwise
    /// keep this call inside the `while` loop indefinitely and starve the
    /// caller's own shutdown check. A flip mid-accumulation discards
    /// whatever partial audio this call has buffered so far and reports
    /// `NO_DATA_YET`, matching the fact that nothing has been committed yet.
    pub fn poll(&mut self, conn: &mut Connection, shutdown: &AtomicBool) -> std::io::Result<ChunkOutcome> {
        let mut out: Vec<f32> = Vec::new();

        while out.len() < self.min_chunk_samples {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(ChunkOutcome::NoDataYet);
            }
            match conn.recv_audio()? {
                RecvOutcome::NoDataYet => {
                    if out.is_empty() {
                        return Ok(ChunkOutcome::NoDataYet);
                    }
                    continue; // keep waiting to fill minlimit
                }
                RecvOutcome::StreamEnded => {
                    if out.is_empty() {
                        return Ok(ChunkOutcome::StreamEnded);
                    }
                    return Ok(ChunkOutcome::Ready(out)); // flush the partial chunk once
                }
                RecvOutcome::Bytes(bytes) => {
                    if let Some(samples) = decode_pcm16le(&bytes) {
                        out.extend(samples);
                    }
                }
            }
        }

        Ok(ChunkOutcome::Ready(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream as StdTcpStream};

    fn loopback_pair() -> (Connection, StdTcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = StdTcpStream::connect(addr).unwrap();
        let (server_sock, _) = listener.accept().unwrap();
        (
            Connection::new(server_sock, 5 * 1024 * 1024, 65536).unwrap(),
            client,
        )
    }

    #[test]
    fn recv_times_out_with_no_data_yet_when_socket_is_idle() {
        let (mut conn, _client) = loopback_pair();
        conn.sock.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let outcome = conn.recv_audio().unwrap();
        assert_eq!(outcome, RecvOutcome::NoDataYet);
    }

    #[test]
    fn orderly_close_is_stream_ended() {
        let (mut conn, client) = loopback_pair();
        drop(client);
        // Give the kernel a moment to deliver the close.
        std::thread::sleep(Duration::from_millis(50));
        let outcome = conn.recv_audio().unwrap();
        assert_eq!(outcome, RecvOutcome::StreamEnded);
    }

    #[test]
    fn duplicate_lines_are_suppressed() {
        let (mut conn, mut client) = loopback_pair();
        conn.send("hello").unwrap();
        conn.send("hello").unwrap();
        conn.send("world").unwrap();

        let mut buf = vec![0u8; 64];
        use std::io::Read;
        client.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let mut received = Vec::new();
        loop {
            match client.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
            if received.len() >= 12 {
                break;
            }
        }
        assert_eq!(received, b"hello\nworld\n");
    }

    #[test]
    fn chunk_accumulator_waits_for_minlimit_before_returning() {
        let (mut conn, mut client) = loopback_pair();
        let mut acc = ChunkAccumulator::new(0.001); // 16 samples @16kHz
        let shutdown = AtomicBool::new(false);

        // send fewer than 16 samples worth of bytes first
        client.write_all(&[0u8; 16]).unwrap(); // 8 samples
        match acc.poll(&mut conn, &shutdown).unwrap() {
            ChunkOutcome::Ready(samples) => assert!(samples.len() >= 16),
            ChunkOutcome::StreamEnded => panic!("should not end yet"),
            ChunkOutcome::NoDataYet => {
                // first read may have raced the write; send the rest and retry
                client.write_all(&[0u8; 16]).unwrap();
                match acc.poll(&mut conn, &shutdown).unwrap() {
                    ChunkOutcome::Ready(_) => {}
                    _ => panic!("expected ready after enough samples"),
                }
            }
        }
    }

    #[test]
    fn shutdown_flag_interrupts_accumulation_without_waiting_for_minlimit() {
        let (mut conn, _client) = loopback_pair();
        conn.sock.set_read_timeout(Some(Duration::from_millis(50))).unwrap();
        let mut acc = ChunkAccumulator::new(10.0); // large minlimit, never fills
        let shutdown = AtomicBool::new(true);

        match acc.poll(&mut conn, &shutdown).unwrap() {
            ChunkOutcome::NoDataYet => {}
            _ => panic!("expected shutdown to short-circuit as NoDataYet"),
        }
    }
}
