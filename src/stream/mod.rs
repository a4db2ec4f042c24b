//! Line-delimited JSON stream server.
//!
//! Every TCP connection becomes one session in the `SessionRegistry`. The server
//! sends `connected` on open, then reads one JSON message per line and answers with
//! prediction, error and settings_updated messages. Operator settings changes
//! made through the registry are pushed to the same socket. A connection ends on EOF, a
//! transport error, an explicit registry close, or idle timeout.

use anyhow::{anyhow, Result};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::config::StreamSettings;
use crate::now_millis;
use crate::protocol::{MessageSink, ServerMessage, TcpSink};
use crate::session::{
    ConnectionId, ConnectionSettings, PipelineOutcome, SessionError, SessionPipeline,
};

/// Frames are base64 images; anything larger is rejected and the connection closed.
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;
const READ_POLL: Duration = Duration::from_millis(200);
const REAP_EVERY: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct StreamConfig {
    pub addr: String,
    pub idle_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8789".to_string(),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

impl From<&StreamSettings> for StreamConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            addr: settings.addr.clone(),
            idle_timeout: settings.idle_timeout,
        }
    }
}

#[derive(Debug)]
pub struct StreamHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl StreamHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct StreamServer {
    cfg: StreamConfig,
    pipeline: Arc<SessionPipeline>,
}

impl StreamServer {
    pub fn new(cfg: StreamConfig, pipeline: Arc<SessionPipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<StreamHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        log::info!("stream server listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_stream(listener, self.cfg, self.pipeline, shutdown_thread) {
                log::error!("stream server stopped: {}", err);
            }
        });

        Ok(StreamHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_stream(
    listener: TcpListener,
    cfg: StreamConfig,
    pipeline: Arc<SessionPipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();
    let mut last_reap = Instant::now();
    let result = loop {
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
        if last_reap.elapsed() >= REAP_EVERY {
            pipeline
                .registry()
                .close_idle(now_millis(), cfg.idle_timeout);
            connections.retain(|handle| !handle.is_finished());
            last_reap = Instant::now();
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let pipeline = Arc::clone(&pipeline);
                let shutdown = Arc::clone(&shutdown);
                let spawned = std::thread::Builder::new()
                    .name(format!("stream-{}", peer))
                    .spawn(move || {
                        if let Err(err) = serve_connection(stream, &pipeline, &shutdown) {
                            log::warn!("stream connection {} ended: {:#}", peer, err);
                        }
                    });
                match spawned {
                    Ok(handle) => connections.push(handle),
                    Err(err) => log::warn!("stream connection {} rejected: {}", peer, err),
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => break Err(err.into()),
        }
    };
    shutdown.store(true, Ordering::SeqCst);
    for handle in connections {
        let _ = handle.join();
    }
    result
}

fn serve_connection(
    stream: TcpStream,
    pipeline: &SessionPipeline,
    shutdown: &AtomicBool,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_POLL))?;
    let sink = Arc::new(TcpSink::new(stream.try_clone()?));
    let registry = pipeline.registry();

    let (id, session) = match registry.open_with_sink(now_millis(), sink.clone()) {
        Ok(opened) => opened,
        Err(err @ SessionError::AtCapacity(_)) => {
            sink.send(&ServerMessage::error(err.to_string()))?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    let settings = session
        .lock()
        .map(|s| s.settings().clone())
        .unwrap_or_else(|_| registry.defaults().clone());
    drop(session);

    let result = read_loop(stream, pipeline, shutdown, &id, &sink, settings);
    registry.close(&id);
    result
}

fn read_loop(
    stream: TcpStream,
    pipeline: &SessionPipeline,
    shutdown: &AtomicBool,
    id: &ConnectionId,
    sink: &TcpSink,
    settings: ConnectionSettings,
) -> Result<()> {
    sink.send(&ServerMessage::connected(id.clone(), settings))?;
    let mut reader = BufReader::new(stream);
    let mut line: Vec<u8> = Vec::new();
    loop {
        if shutdown.load(Ordering::SeqCst) || !pipeline.registry().contains(id) {
            return Ok(());
        }
        let remaining = (MAX_LINE_BYTES + 1).saturating_sub(line.len()) as u64;
        match (&mut reader).take(remaining).read_until(b'\n', &mut line) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                continue;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
        if line.last() != Some(&b'\n') {
            if line.len() > MAX_LINE_BYTES {
                sink.send(&ServerMessage::error("message exceeds maximum line length"))?;
                return Ok(());
            }
            // EOF in the middle of a line.
            return Ok(());
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim();
        if !text.is_empty() {
            let outcome = pipeline.handle_line(id, text, sink)?;
            if outcome == PipelineOutcome::UnknownConnection {
                return Ok(());
            }
        }
        line.clear();
    }
}
