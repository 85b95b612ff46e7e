use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shared_protocol::TranscriptLine;

use crate::config::Config;
use crate::connection::{ChunkAccumulator, ChunkOutcome, Connection};
use crate::error::{ConnError, StartupError};
use crate::processor::{Flush, StreamingProcessor, SEGMENT_TRIM_SEC};
use crate::recognizer::Recognizer;

/// How often the accept loop wakes to check the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Binds `config.host:config.port` and serves connections one at a time
/// until a shutdown signal (Ctrl-C) arrives. `make_recognizer` is called
/// once per accepted connection, since a recognizer owns per-session
/// decoder state and is not shared across clients.
pub fn run<R, F>(config: Config, mut make_recognizer: F) -> Result<(), StartupError>
where
    R: Recognizer,
    F: FnMut() -> anyhow::Result<R>,
{
    if config.min_chunk_size > SEGMENT_TRIM_SEC {
        tracing::warn!(
            min_chunk_size = config.min_chunk_size,
            segment_trim_sec = SEGMENT_TRIM_SEC,
            "min_chunk_size exceeds the segment trim window; every chunk will trigger a trim"
        );
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).map_err(|source| StartupError::Bind {
        addr: addr.clone(),
        source,
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            tracing::info!("shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
        })
        .map_err(|e| StartupError::Config(format!("failed to install signal handler: {e}")))?;
    }

    tracing::info!(%addr, "listening");

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "connection accepted");
                let recognizer = match make_recognizer() {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to initialize recognizer for connection");
                        continue;
                    }
                };
                if let Err(e) = handle_connection(stream, &config, recognizer, &shutdown) {
                    tracing::warn!(%peer, error = %e, "connection ended with error");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
            }
        }
    }

    tracing::info!("server shutting down");
    Ok(())
}

/// Drives one client end to end: accumulate audio, transcribe, emit
/// non-overlapping transcript lines, until the stream ends or shutdown is
/// requested.
fn handle_connection<R: Recognizer>(
    stream: TcpStream,
    config: &Config,
    recognizer: R,
    shutdown: &Arc<AtomicBool>,
) -> Result<(), ConnError> {
    let mut conn = Connection::new(stream, config.max_single_recv_bytes, config.packet_size_bytes)?;
    let mut accumulator = ChunkAccumulator::new(config.min_chunk_size);
    let mut processor = StreamingProcessor::new(recognizer);
    let mut last_end = 0.0;
    let language = config.output_language();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("shutdown requested, closing connection without flushing");
            conn.shutdown();
            return Ok(());
        }

        match accumulator.poll(&mut conn, shutdown)? {
            ChunkOutcome::NoDataYet => continue,
            ChunkOutcome::StreamEnded => {
                if let Some(flush) = processor.finish() {
                    send_result(&mut conn, &language, &flush, &mut last_end)?;
                }
                return Ok(());
            }
            ChunkOutcome::Ready(samples) => {
                processor.insert_audio(&samples);
                match processor.process_iter() {
                    Ok(Some(flush)) => send_result(&mut conn, &language, &flush, &mut last_end)?,
                    Ok(None) => {}
                    Err(e) => return Err(ConnError::Transcribe(e)),
                }
            }
        }
    }
}

/// Clamps `flush` against `last_end` so overlapping re-transcriptions never
/// re-emit already-sent time, then sends the remainder as one JSON line.
fn send_result(
    conn: &mut Connection,
    language: &str,
    flush: &Flush,
    last_end: &mut f64,
) -> Result<(), ConnError> {
    let begin = flush.begin.max(*last_end);
    if begin >= flush.end {
        return Ok(());
    }
    *last_end = flush.end;

    let line = TranscriptLine {
        language: language.to_string(),
        start: begin,
        end: flush.end,
        text: flush.text.trim().to_string(),
    };
    conn.send(&line.to_json())?;
    Ok(())
}
