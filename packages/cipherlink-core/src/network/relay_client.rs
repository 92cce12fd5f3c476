//! # Relay Wire Messages
//!
//! Client-side mirror of the relay protocol. Every frame is one JSON object
//! tagged by `type`; field names are camelCase.
//!
//! The relay only ever sees public keys and opaque ciphertext strings.

use serde::{Deserialize, Serialize};

use crate::crypto::EncodedPublicKey;

/// Messages sent from client to relay server.
/// Must match the relay server's `ClientMessage` enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum RelayClientMessage {
    /// Bind this connection to a user id
    Register {
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// Publish our public key under a user id
    AnnouncePublicKey {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "publicKey")]
        public_key: EncodedPublicKey,
    },
    /// Look up a peer's public key
    RequestPublicKey {
        #[serde(rename = "targetUserId")]
        target_user_id: String,
    },
    /// Route ciphertext to a peer
    SendMessage {
        from: String,
        to: String,
        ciphertext: String,
    },
    /// Keep-alive
    Ping,
}

/// Messages received from the relay server.
/// Must match the relay server's `ServerMessage` enum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum RelayServerMessage {
    /// Answer to `requestPublicKey`; `None` when the peer is unknown
    PublicKey {
        #[serde(rename = "targetUserId")]
        target_user_id: String,
        #[serde(rename = "publicKey")]
        public_key: Option<EncodedPublicKey>,
    },
    /// Ciphertext forwarded from another user
    Message { from: String, ciphertext: String },
    /// Outcome of one `sendMessage`
    DeliveryStatus(DeliveryStatus),
    /// Keep-alive answer
    Pong,
}

/// Outcome of routing one message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryStatus {
    /// Whether the relay handed the message to a live connection
    pub ok: bool,
    /// Recipient the status refers to
    pub to: String,
    /// Failure reason, e.g. `"user offline"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DeliveryStatus {
    /// Successful delivery to `to`.
    pub fn delivered(to: impl Into<String>) -> Self {
        Self {
            ok: true,
            to: to.into(),
            reason: None,
        }
    }

    /// Failed delivery to `to`.
    pub fn failed(to: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            to: to.into(),
            reason: Some(reason.into()),
        }
    }
}

/// Ciphertext received from the relay, not yet decrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Claimed sender (not authenticated)
    pub from: String,
    /// Opaque ciphertext
    pub ciphertext: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EncodedPublicKey {
        EncodedPublicKey {
            n: "3233".into(),
            e: "17".into(),
        }
    }

    #[test]
    fn test_register_serialization() {
        let msg = RelayClientMessage::Register {
            user_id: "A".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"register","userId":"A"}"#);
    }

    #[test]
    fn test_announce_public_key_serialization() {
        let msg = RelayClientMessage::AnnouncePublicKey {
            user_id: "A".to_string(),
            public_key: key(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"announcePublicKey\""));
        assert!(json.contains("\"publicKey\":{\"n\":\"3233\",\"e\":\"17\"}"));
    }

    #[test]
    fn test_request_and_send_serialization() {
        let json = serde_json::to_string(&RelayClientMessage::RequestPublicKey {
            target_user_id: "B".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"requestPublicKey","targetUserId":"B"}"#);

        let json = serde_json::to_string(&RelayClientMessage::SendMessage {
            from: "B".to_string(),
            to: "A".to_string(),
            ciphertext: "Zm9v".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"sendMessage\""));
        assert!(json.contains("\"ciphertext\":\"Zm9v\""));

        let json = serde_json::to_string(&RelayClientMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn test_public_key_response_with_null() {
        let json = r#"{"type":"publicKey","targetUserId":"C","publicKey":null}"#;
        let msg: RelayServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            RelayServerMessage::PublicKey {
                target_user_id,
                public_key,
            } => {
                assert_eq!(target_user_id, "C");
                assert!(public_key.is_none());
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_public_key_response_with_key() {
        let json = r#"{"type":"publicKey","targetUserId":"A","publicKey":{"n":"3233","e":"17"}}"#;
        let msg: RelayServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            RelayServerMessage::PublicKey {
                target_user_id: "A".to_string(),
                public_key: Some(key()),
            }
        );
    }

    #[test]
    fn test_delivery_status_parsing() {
        let json = r#"{"type":"deliveryStatus","ok":false,"to":"C","reason":"user offline"}"#;
        let msg: RelayServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            RelayServerMessage::DeliveryStatus(DeliveryStatus::failed("C", "user offline"))
        );

        let json = r#"{"type":"deliveryStatus","ok":true,"to":"A"}"#;
        let msg: RelayServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            RelayServerMessage::DeliveryStatus(DeliveryStatus::delivered("A"))
        );
    }

    #[test]
    fn test_delivery_status_omits_empty_reason() {
        let json =
            serde_json::to_string(&RelayServerMessage::DeliveryStatus(DeliveryStatus::delivered("A")))
                .unwrap();
        assert_eq!(json, r#"{"type":"deliveryStatus","ok":true,"to":"A"}"#);
    }

    #[test]
    fn test_message_and_pong_parsing() {
        let json = r#"{"type":"message","from":"B","ciphertext":"abc"}"#;
        match serde_json::from_str::<RelayServerMessage>(json).unwrap() {
            RelayServerMessage::Message { from, ciphertext } => {
                assert_eq!(from, "B");
                assert_eq!(ciphertext, "abc");
            }
            _ => panic!("Wrong variant"),
        }

        let msg: RelayServerMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(msg, RelayServerMessage::Pong);
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<RelayServerMessage>(r#"{"type":"bogus"}"#).is_err());
    }
}
