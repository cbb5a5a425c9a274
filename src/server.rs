//! Newline-delimited JSON over TCP.
//!
//! Each line is one of:
//! - a bare tool call `{"name": ..., "args": {...}}` (tenant `default`)
//! - `{"tenant": "...", "call": {tool call}}`
//! - `{"tenant": "...", "request": {"op": ..., ...}}`
//!
//! Each line gets exactly one JSON line back, in order.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};

use crate::api::{self, ApiRequest};
use crate::limits::MAX_LINE_BYTES;
use crate::observability::{api_label, tool_label, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::tenant::TenantManager;
use crate::webhook::{RawToolCall, ToolCall, ToolResponse, WebhookAdapter};

pub const DEFAULT_TENANT: &str = "default";

enum Inbound {
    Tool(RawToolCall),
    Api(ApiRequest),
}

pub async fn process_connection(socket: TcpStream, tm: Arc<TenantManager>) -> io::Result<()> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_BYTES));
    while let Some(frame) = framed.next().await {
        let reply = match frame {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&tm, &line).await,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                warn!("request line over {MAX_LINE_BYTES} bytes dropped");
                encode(&invalid("Request is too long."))
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        framed.send(reply).await.map_err(into_io)?;
    }
    Ok(())
}

fn into_io(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}

/// Run one request line and return the response line (no newline).
pub async fn handle_line(tm: &TenantManager, line: &str) -> String {
    let started = Instant::now();
    let (operation, status, body) = dispatch(tm, line).await;
    metrics::counter!(REQUESTS_TOTAL, "operation" => operation, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
    body
}

async fn dispatch(tm: &TenantManager, line: &str) -> (&'static str, &'static str, String) {
    let (tenant, inbound) = match parse_line(line) {
        Ok(parsed) => parsed,
        Err(message) => {
            debug!("unparseable request: {message}");
            let resp = invalid(&message);
            return ("invalid", resp.status(), encode(&resp));
        }
    };
    let engine = match tm.get_or_create(&tenant) {
        Ok(engine) => engine,
        Err(e) => {
            warn!(tenant = %tenant, "tenant unavailable: {e}");
            let resp = invalid(&format!("Tenant '{tenant}' is unavailable: {e}."));
            return ("invalid", resp.status(), encode(&resp));
        }
    };

    match inbound {
        Inbound::Tool(raw) => match ToolCall::from_raw(raw) {
            Ok(call) => {
                let label = tool_label(&call);
                let resp = WebhookAdapter::new(engine).handle(call).await;
                (label, resp.status(), encode(&resp))
            }
            Err(e) => {
                let resp = ToolResponse::from(e);
                ("invalid", resp.status(), encode(&resp))
            }
        },
        Inbound::Api(req) => {
            let label = api_label(&req);
            let resp = api::execute(&engine, req).await;
            let status = match &resp {
                api::ApiResponse::Ok { .. } => "ok",
                api::ApiResponse::Error { kind, .. } => *kind,
            };
            (label, status, encode(&resp))
        }
    }
}

fn parse_line(line: &str) -> Result<(String, Inbound), String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("Invalid JSON: {e}."))?;
    let Value::Object(mut obj) = value else {
        return Err("Expected a JSON object.".into());
    };
    let tenant = match obj.remove("tenant") {
        None | Some(Value::Null) => DEFAULT_TENANT.to_string(),
        Some(Value::String(s)) => s,
        Some(_) => return Err("Tenant must be a string.".into()),
    };
    let inbound = if obj.contains_key("name") {
        Inbound::Tool(from_value(Value::Object(obj))?)
    } else if let Some(call) = obj.remove("call") {
        Inbound::Tool(from_value(call)?)
    } else if let Some(req) = obj.remove("request") {
        Inbound::Api(from_value(req)?)
    } else {
        return Err("Expected a tool call, or an envelope with call or request.".into());
    };
    Ok((tenant, inbound))
}

fn from_value<T: serde::de::DeserializeOwned>(v: Value) -> Result<T, String> {
    serde_json::from_value(v).map_err(|e| format!("Malformed request: {e}."))
}

fn invalid(message: &str) -> ToolResponse {
    ToolResponse::InvalidRequest {
        message: message.to_string(),
    }
}

fn encode<T: Serialize>(resp: &T) -> String {
    serde_json::to_string(resp).unwrap_or_else(|e| {
        warn!("response serialization failed: {e}");
        r#"{"status":"error","message":"Something went wrong on our side."}"#.to_string()
    })
}
