// ── Realtime wire protocol ──
//
// Phoenix-channel style envelopes: every frame in either direction is
// `{ "event", "topic", "payload", "ref" }`. Change notifications arrive as
// `postgres_changes` events carrying a row-level payload.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use crate::error::Error;

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

const TOPIC_NAMESPACE: &str = "realtime";
const DEFAULT_SCHEMA: &str = "public";
const PROTOCOL_VERSION: &str = "1.0.0";
const WEBSOCKET_PATH: &str = "/realtime/v1/websocket";

// ── Envelope ─────────────────────────────────────────────────────────

/// One frame of the channel protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default, deserialize_with = "ref_as_string")]
    pub reference: Option<String>,
}

/// Servers send `ref` as a string, a number, or null.
fn ref_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl Envelope {
    /// Outbound join for a channel topic. The ref is a nanosecond
    /// timestamp so replies can be correlated in logs.
    pub fn join(topic: impl Into<String>) -> Self {
        Self {
            event: EVENT_JOIN.to_owned(),
            topic: topic.into(),
            payload: serde_json::json!({}),
            reference: Some(next_ref()),
        }
    }
}

fn next_ref() -> String {
    let now = chrono::Utc::now();
    now.timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros())
        .to_string()
}

// ── postgres_changes payload ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
    #[serde(other)]
    Other,
}

/// Payload of a `postgres_changes` event.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangePayload {
    #[serde(default)]
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

/// Payload of a `phx_reply` acknowledgment.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyPayload {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

impl ReplyPayload {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

// ── Topics and URLs ──────────────────────────────────────────────────

/// Channel topic for a table in the default schema,
/// e.g. `"tasks"` → `"realtime:public:tasks"`.
pub fn topic_for(table: &str) -> String {
    format!("{TOPIC_NAMESPACE}:{DEFAULT_SCHEMA}:{table}")
}

/// Derive the WebSocket endpoint from the service's HTTP base URL.
///
/// `https://host/anything` → `wss://host/realtime/v1/websocket?apikey=<key>&vsn=1.0.0`.
/// Explicit ports are preserved; `ws`/`wss` inputs are accepted as-is.
pub fn realtime_url(base: &Url, api_key: &SecretString) -> Result<Url, Error> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::WebSocketConnect(format!(
                "unsupported URL scheme '{other}'"
            )));
        }
    };

    let host = base
        .host_str()
        .ok_or_else(|| Error::WebSocketConnect(format!("URL has no host: {base}")))?;
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };

    let mut url = Url::parse(&format!("{scheme}://{authority}{WEBSOCKET_PATH}"))?;
    url.query_pairs_mut()
        .append_pair("apikey", api_key.expose_secret())
        .append_pair("vsn", PROTOCOL_VERSION);
    Ok(url)
}

/// `realtime_url` with the API key masked, for logging.
pub fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "apikey" { "***".into() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}
