//! Pub/Sub delivery envelopes.
//!
//! Log sinks publish each entry as a Pub/Sub message with base64 encoded `data`. Push
//! subscriptions wrap that message once more into `{"message": {...}, "subscription": "..."}`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Not a Pub/Sub message envelope")]
    Envelope(#[source] serde_json::Error),
    #[error("Cannot decode base64 message data")]
    Data(#[source] base64::DecodeError),
}

#[derive(Debug, Deserialize)]
struct Message {
    data: String,
    #[serde(rename = "messageId", alias = "message_id", default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelope {
    Push { message: Message },
    Bare(Message),
}

/// Decoded message payload
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: Option<String>,
    pub payload: Vec<u8>,
}

pub fn unwrap(raw: &[u8]) -> Result<Delivery, Error> {
    let msg = match serde_json::from_slice(raw).map_err(Error::Envelope)? {
        Envelope::Push { message } => message,
        Envelope::Bare(message) => message,
    };
    let payload = BASE64.decode(msg.data.trim()).map_err(Error::Data)?;
    Ok(Delivery {
        id: msg.id,
        payload,
    })
}
