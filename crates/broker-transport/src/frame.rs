//! Wire frames exchanged with the broker.
//!
//! One JSON object per line, discriminated by `type`. Payloads travel as
//! standard base64.

use crate::BrokerResult;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use publish_pipeline::{CorrelationId, OutboundMessage};
use serde::{Deserialize, Serialize};

/// Frames sent by the publisher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Connect {
        username: String,
        vpn: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    Publish {
        id: CorrelationId,
        topic: String,
        payload: String,
        attempt: u32,
    },
}

impl ClientFrame {
    /// Encode an outbound message as a publish frame.
    pub fn publish(message: &OutboundMessage) -> Self {
        ClientFrame::Publish {
            id: message.correlation_id,
            topic: message.topic.to_string(),
            payload: STANDARD.encode(&message.payload),
            attempt: message.attempt,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Frames sent by the broker. `ack` and `nack` echo the publish attempt they
/// answer, so a late reply to an earlier attempt is not mistaken for the
/// current one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerFrame {
    Connected,
    Refused {
        reason: String,
    },
    Ack {
        id: CorrelationId,
        attempt: u32,
    },
    Nack {
        id: CorrelationId,
        attempt: u32,
        error: String,
    },
}

impl BrokerFrame {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Decode a base64 publish payload.
pub fn decode_payload(payload: &str) -> BrokerResult<Vec<u8>> {
    Ok(STANDARD.decode(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use publish_pipeline::Envelope;

    #[test]
    fn connect_frame_omits_missing_password() {
        let frame = ClientFrame::Connect {
            username: "default".to_string(),
            vpn: "default".to_string(),
            password: None,
        };
        assert_eq!(
            frame.to_json().unwrap(),
            r#"{"type":"connect","username":"default","vpn":"default"}"#
        );

        let parsed =
            ClientFrame::from_json(r#"{"type":"connect","username":"u","vpn":"v","password":"p"}"#)
                .unwrap();
        assert_eq!(
            parsed,
            ClientFrame::Connect {
                username: "u".to_string(),
                vpn: "v".to_string(),
                password: Some("p".to_string()),
            }
        );
    }

    #[test]
    fn publish_frame_carries_base64_payload() {
        let envelope = Envelope::new("tutorial/topic", b"Hello world!".to_vec());
        let frame = ClientFrame::publish(&envelope.to_outbound());

        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"publish""#));
        assert!(json.contains(&envelope.correlation_id().to_string()));

        let ClientFrame::Publish {
            topic,
            payload,
            attempt,
            ..
        } = ClientFrame::from_json(&json).unwrap()
        else {
            panic!("expected publish frame");
        };
        assert_eq!(topic, "tutorial/topic");
        assert_eq!(attempt, 1);
        assert_eq!(decode_payload(&payload).unwrap(), b"Hello world!");
    }

    #[test]
    fn broker_frames_parse() {
        let id = CorrelationId::new();
        assert_eq!(
            BrokerFrame::from_json(r#"{"type":"connected"}"#).unwrap(),
            BrokerFrame::Connected
        );
        assert_eq!(
            BrokerFrame::from_json(&format!(r#"{{"type":"ack","id":"{id}","attempt":1}}"#))
                .unwrap(),
            BrokerFrame::Ack { id, attempt: 1 }
        );
        assert_eq!(
            BrokerFrame::from_json(&format!(
                r#"{{"type":"nack","id":"{id}","attempt":2,"error":"no subscribers"}}"#
            ))
            .unwrap(),
            BrokerFrame::Nack {
                id,
                attempt: 2,
                error: "no subscribers".to_string()
            }
        );
        assert!(BrokerFrame::from_json(&format!(r#"{{"type":"ack","id":"{id}"}}"#)).is_err());
        assert!(BrokerFrame::from_json(r#"{"type":"teapot"}"#).is_err());
    }

    #[test]
    fn invalid_payload_is_rejected() {
        assert!(decode_payload("not base64!").is_err());
    }
}
