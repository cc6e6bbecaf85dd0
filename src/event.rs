//! Production error events.
//!
//! Incoming payloads are Cloud Logging entries whose `jsonPayload` carries the error message,
//! a snapshot of local variables and a stack trace. Anything else is kept as opaque text.

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Local variables captured at the failure site
pub type Context = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorRecord {
    pub message: String,
    pub context: Context,
    pub stack_trace: String,
    /// Originating service, used to find the target repository
    pub service_id: Option<String>,
    pub insert_id: Option<String>,
    pub severity: Option<String>,
}

/// Payload which could not be decoded as a log entry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Error(ErrorRecord),
    Raw(RawRecord),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    json_payload: JsonPayload,
    #[serde(default)]
    resource: Option<Resource>,
    #[serde(default)]
    insert_id: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    log_name: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonPayload {
    #[serde(rename = "Error")]
    error: String,
    #[serde(rename = "Locals", default)]
    locals: Option<Context>,
    #[serde(rename = "Stack", default)]
    stack: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Resource {
    #[serde(default)]
    labels: Option<Labels>,
}

#[derive(Debug, Default, Deserialize)]
struct Labels {
    #[serde(default)]
    service_name: Option<String>,
}

impl From<LogEntry> for ErrorRecord {
    fn from(e: LogEntry) -> Self {
        let service_id = e
            .resource
            .and_then(|r| r.labels)
            .and_then(|l| l.service_name)
            .filter(|s| !s.is_empty());
        Self {
            message: e.json_payload.error,
            context: e.json_payload.locals.unwrap_or_default(),
            stack_trace: e.json_payload.stack.unwrap_or_default(),
            service_id,
            insert_id: e.insert_id,
            severity: e.severity,
        }
    }
}

impl Event {
    /// Decodes a raw message payload. Never fails: undecodable payloads become
    /// [`Event::Raw`].
    pub fn parse(payload: &[u8]) -> Self {
        match serde_json::from_slice::<LogEntry>(payload) {
            Ok(entry) => {
                debug!(
                    "decoded log entry from {} @ {}",
                    entry.log_name.as_deref().unwrap_or("-"),
                    entry.timestamp.as_deref().unwrap_or("-"),
                );
                Event::Error(entry.into())
            }
            Err(e) => {
                warn!("Payload is not a structured error event, keeping raw text: {}", e);
                Event::Raw(RawRecord {
                    text: String::from_utf8_lossy(payload).into_owned(),
                })
            }
        }
    }

    pub fn service_id(&self) -> Option<&str> {
        match self {
            Event::Error(rec) => rec.service_id.as_deref(),
            Event::Raw(_) => None,
        }
    }
}

// === Tests ===
