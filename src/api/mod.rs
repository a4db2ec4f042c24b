//! Operator HTTP API.
//!
//! - `GET /health`
//! - `GET /realtime/status`: registry stats and settings limits
//! - `PUT|POST /realtime/connections/{id}/settings`: partial settings update,
//!   pushed to the connection as `settings_updated`
//! - `POST /realtime/test`: one frame through extraction and classification

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::now_millis;
use crate::session::{
    ConnectionId, SessionError, SessionPipeline, SessionRegistry, SettingsUpdate,
    MAX_CONFIDENCE_THRESHOLD,
    MAX_FPS, MAX_PREDICTION_INTERVAL, MIN_CONFIDENCE_THRESHOLD, MIN_FPS, MIN_PREDICTION_INTERVAL,
};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8790".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<SessionPipeline>,
}

impl ApiServer {
    /// Serves the registry and collaborators of `pipeline`.
    pub fn new(cfg: ApiConfig, pipeline: Arc<SessionPipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;
        log::info!("operator api listening on {}", addr);

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let pipeline = self.pipeline;
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &pipeline, shutdown_thread) {
                log::error!("operator api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    pipeline: &SessionPipeline,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, pipeline) {
                    log::warn!("operator api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, pipeline: &SessionPipeline) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, r#"{"error":"forbidden"}"#)?;
        return Ok(());
    }

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            let body = json!({ "error": err.to_string() }).to_string();
            write_json_response(&mut stream, 400, &body)?;
            return Err(err);
        }
    };

    let segments: Vec<&str> = request
        .path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let registry = pipeline.registry();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["health"]) => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", ["realtime", "status"]) => {
            let body = json!({
                "status": "ok",
                "stats": registry.stats(),
                "limits": {
                    "max_connections": registry.max_connections(),
                    "confidence_threshold": [MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD],
                    "prediction_interval": [MIN_PREDICTION_INTERVAL, MAX_PREDICTION_INTERVAL],
                    "max_fps": [MIN_FPS, MAX_FPS],
                },
                "defaults": registry.defaults(),
                "timestamp": now_millis(),
            });
            write_response(&mut stream, 200, "application/json", &serde_json::to_vec(&body)?)
        }
        ("PUT" | "POST", ["realtime", "connections", id, "settings"]) => {
            let id = ConnectionId::from(*id);
            let (status, body) = update_settings(registry, &id, &request.body);
            write_json_response(&mut stream, status, &body.to_string())
        }
        ("POST", ["realtime", "test"]) => {
            let (status, body) = test_frame(pipeline, &request.body);
            write_json_response(&mut stream, status, &body.to_string())
        }
        (_, ["health"])
        | (_, ["realtime", "status"])
        | (_, ["realtime", "test"])
        | (_, ["realtime", "connections", _, "settings"]) => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn update_settings(
    registry: &SessionRegistry,
    id: &ConnectionId,
    body: &[u8],
) -> (u16, serde_json::Value) {
    let update: SettingsUpdate = match serde_json::from_slice(body) {
        Ok(update) => update,
        Err(err) => {
            log::warn!("settings update for {} has an invalid body: {}", id, err);
            return (400, json!({ "error": format!("invalid settings body: {}", err) }));
        }
    };
    match registry.push_settings(id, &update) {
        Ok(settings) => (
            200,
            json!({ "connectionId": id, "settings": settings, "timestamp": now_millis() }),
        ),
        Err(err) => {
            log::warn!("settings update for {} rejected: {}", id, err);
            let status = match err {
                SessionError::InvalidSettings(_) | SessionError::EmptyUpdate => 400,
                SessionError::NotFound(_) | SessionError::Closed(_) => 404,
                SessionError::AtCapacity(_) => 503,
            };
            (status, json!({ "error": err.to_string() }))
        }
    }
}

#[derive(Deserialize)]
struct TestFrameRequest {
    test_frame: Option<String>,
}

fn test_frame(pipeline: &SessionPipeline, body: &[u8]) -> (u16, serde_json::Value) {
    let frame = match serde_json::from_slice::<TestFrameRequest>(body) {
        Ok(TestFrameRequest {
            test_frame: Some(frame),
        }) if !frame.trim().is_empty() => frame,
        Ok(_) => return (400, json!({ "error": "test_frame (base64) is required" })),
        Err(err) => return (400, json!({ "error": format!("invalid test body: {}", err) })),
    };
    match pipeline.check_frame(&frame) {
        Ok(check) => (
            200,
            json!({
                "success": true,
                "message": "real-time processing test completed",
                "data": check,
                "timestamp": now_millis(),
            }),
        ),
        Err(err) => {
            log::warn!("test frame rejected: {:#}", err);
            (400, json!({ "error": format!("{:#}", err) }))
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break None;
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break Some(pos);
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request too large"));
        }
    };
    let header_end = header_end.ok_or_else(|| anyhow!("incomplete request"))?;
    let text = String::from_utf8_lossy(&data[..header_end]).into_owned();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("request body truncated"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        body,
    })
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_frame;
    use crate::session::ConnectionSettings;
    use crate::{StubExtractor, StubStaticClassifier};

    fn pipeline() -> SessionPipeline {
        SessionPipeline::new(
            Arc::new(SessionRegistry::new(ConnectionSettings::default(), 4)),
            Arc::new(StubExtractor::new()),
            Arc::new(StubStaticClassifier::new()),
        )
    }

    #[test]
    fn test_frame_status_codes() {
        let pipeline = pipeline();
        let body = json!({ "test_frame": encode_frame(b"jpeg") }).to_string();
        let (status, response) = test_frame(&pipeline, body.as_bytes());
        assert_eq!(status, 200);
        assert_eq!(response["data"]["processing_successful"], true);
        assert_eq!(response["data"]["landmarks_detected"], 1);

        let (status, response) = test_frame(&pipeline, b"{}");
        assert_eq!(status, 400);
        assert!(response["error"].as_str().unwrap().contains("test_frame"));

        let (status, _) = test_frame(&pipeline, br#"{"test_frame": "%%%"}"#);
        assert_eq!(status, 400);
        let (status, _) = test_frame(&pipeline, b"not json");
        assert_eq!(status, 400);
    }

    #[test]
    fn update_settings_status_codes() {
        let registry = SessionRegistry::new(ConnectionSettings::default(), 4);
        let (id, _) = registry.open(0).unwrap();

        let (status, body) = update_settings(&registry, &id, br#"{"max_fps": 20}"#);
        assert_eq!(status, 200);
        assert_eq!(body["settings"]["max_fps"], 20);

        let (status, body) = update_settings(&registry, &id, br#"{"confidence_threshold": 1.5}"#);
        assert_eq!(status, 400);
        assert!(body["error"].as_str().unwrap().contains("confidence_threshold"));

        let (status, _) = update_settings(&registry, &id, b"{}");
        assert_eq!(status, 400);

        let (status, _) = update_settings(&registry, &id, b"not json");
        assert_eq!(status, 400);

        let (status, _) =
            update_settings(&registry, &ConnectionId::from("ghost"), br#"{"max_fps": 20}"#);
        assert_eq!(status, 404);
    }
}
