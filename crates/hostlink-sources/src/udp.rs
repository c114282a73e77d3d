//! UDP record listener
//!
//! Accepts JSON datagrams of the form
//!
//! ```json
//! {"Timestamp": "2024-05-01T12:00:00Z", "Schema": "App.Metric", "Data": {"count": 3}}
//! ```
//!
//! Field names are matched case-insensitively and `Timestamp` is optional.
//! Nested objects and arrays inside `Data` are kept as raw JSON text.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hostlink_core::config::{SourceConfig, UdpListenerConfig};
use hostlink_core::record::clean_schema_name;
use hostlink_core::{AgentError, AgentResult, EventBuffer, Record, Service, Value};
use parking_lot::{Mutex, RwLock};
use serde_json::Map;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Largest payload a single UDP datagram can carry
const MAX_DATAGRAM: usize = 65_535;

pub struct UdpListenerService {
    buffer: Arc<dyn EventBuffer>,
    config: RwLock<UdpListenerConfig>,
    socket: Mutex<Option<Arc<UdpSocket>>>,
}

impl UdpListenerService {
    pub fn new(buffer: Arc<dyn EventBuffer>) -> Self {
        Self {
            buffer,
            config: RwLock::new(UdpListenerConfig::default()),
            socket: Mutex::new(None),
        }
    }

    /// Address of the bound socket, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket
            .lock()
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    fn handle_datagram(&self, payload: &[u8], peer: SocketAddr) {
        match parse_datagram(payload) {
            Ok(Some(record)) => self.buffer.add(record),
            Ok(None) => debug!(%peer, "Ignoring empty datagram"),
            Err(e) => error!(%peer, error = %e, "UDP client exception"),
        }
    }
}

fn field<'a>(
    object: &'a Map<String, serde_json::Value>,
    name: &str,
) -> Option<&'a serde_json::Value> {
    object
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

fn convert(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::String(s) => Some(Value::String(s.clone())),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_u64().map(Value::UInt))
            .or_else(|| n.as_f64().map(Value::Float)),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            Some(Value::raw_json(value.to_string()))
        }
    }
}

/// Turn one datagram into a record
///
/// Returns `Ok(None)` for datagrams that carry nothing to store: an empty
/// payload, a blank schema or an empty `Data` object.
pub fn parse_datagram(payload: &[u8]) -> AgentResult<Option<Record>> {
    if payload.is_empty() {
        return Ok(None);
    }

    let message: serde_json::Value = serde_json::from_slice(payload)?;
    let Some(message) = message.as_object() else {
        return Err(AgentError::service("datagram is not a JSON object"));
    };

    let schema = match field(message, "schema").and_then(|s| s.as_str()) {
        Some(schema) if !schema.trim().is_empty() => schema,
        _ => return Ok(None),
    };
    let data = match field(message, "data").and_then(|d| d.as_object()) {
        Some(data) if !data.is_empty() => data,
        _ => return Ok(None),
    };
    let timestamp = field(message, "timestamp")
        .and_then(|t| t.as_str())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let mut record = Record::with_timestamp(schema, timestamp);
    for (key, value) in data {
        if let Some(value) = convert(value) {
            record.insert(clean_schema_name(key, true), value);
        }
    }
    Ok(Some(record))
}

#[async_trait]
impl Service for UdpListenerService {
    fn name(&self) -> &str {
        "UdpListener"
    }

    fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    async fn on_start(&self, _token: &CancellationToken) -> AgentResult<()> {
        let port = self.config.read().port;
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
        info!(addr = ?socket.local_addr().ok(), "UDP listener bound");
        *self.socket.lock() = Some(Arc::new(socket));
        Ok(())
    }

    async fn execute(&self, token: &CancellationToken) -> AgentResult<()> {
        let Some(socket) = self.socket.lock().clone() else {
            return Err(AgentError::service("UDP listener executed before start"));
        };

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, peer)) => self.handle_datagram(&buf[..len], peer),
                    Err(e) => error!(error = %e, "UDP client exception"),
                },
            }
        }
        Ok(())
    }

    async fn on_stop(&self, _token: &CancellationToken) -> AgentResult<()> {
        self.socket.lock().take();
        Ok(())
    }

    fn update_configuration(&self, config: &SourceConfig) {
        if let SourceConfig::UdpListener(c) = config {
            *self.config.write() = c.clone();
        }
    }
}
