//! Control messages exchanged over a peer transport.

use serde::{Deserialize, Serialize};
use swarmdrop_files::FileMetadata;

/// Control messages, tagged by a kebab-case `type` field
///
/// Optional fields decode with defaults so a sparse message from an older
/// peer still gets through; the receiver substitutes sensible fallbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    /// First message after a transport connects
    Handshake {
        /// Sender's peer id
        peer_id: String,
        /// Sender's display name
        #[serde(default)]
        display_name: String,
        /// Whether the sender brought files into the room
        #[serde(default)]
        is_host: bool,
    },

    /// The sender's full file catalogue
    FileOffer {
        /// All files the sender shares
        files: Vec<FileMetadata>,
    },

    /// The sender finished pushing a file
    FileComplete {
        /// File identifier
        file_id: String,
    },

    /// The sender's queue drained
    TransferComplete,

    /// Chat message
    TextMessage {
        /// Message id
        #[serde(default)]
        id: String,
        /// Message text
        text: String,
        /// Sender's display name
        #[serde(default)]
        sender_name: String,
        /// Unix millis
        #[serde(default)]
        timestamp: u64,
    },
}

impl ControlMessage {
    /// Wire tag of the message
    #[must_use]
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::Handshake { .. } => "handshake",
            Self::FileOffer { .. } => "file-offer",
            Self::FileComplete { .. } => "file-complete",
            Self::TransferComplete => "transfer-complete",
            Self::TextMessage { .. } => "text-message",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_handshake_wire_shape() {
        let msg = ControlMessage::Handshake {
            peer_id: "0a1b2c3d4e5f6071".into(),
            display_name: "Host".into(),
            is_host: true,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "handshake",
                "peerId": "0a1b2c3d4e5f6071",
                "displayName": "Host",
                "isHost": true
            })
        );
    }

    #[test]
    fn test_file_offer_decodes_metadata() {
        let value = json!({
            "type": "file-offer",
            "files": [{
                "id": "a.txt-5-1-abcd",
                "name": "a.txt",
                "size": 5,
                "type": "text/plain",
                "totalChunks": 1
            }]
        });
        let msg: ControlMessage = serde_json::from_value(value).unwrap();
        match msg {
            ControlMessage::FileOffer { files } => {
                assert_eq!(files.len(), 1);
                assert_eq!(files[0].mime_type, "text/plain");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unit_variant_and_sparse_fields() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"transfer-complete"}"#).unwrap();
        assert_eq!(msg, ControlMessage::TransferComplete);

        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"handshake","peerId":"p"}"#).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Handshake {
                peer_id: "p".into(),
                display_name: String::new(),
                is_host: false
            }
        );

        let value: Value = serde_json::to_value(ControlMessage::TransferComplete).unwrap();
        assert_eq!(value, json!({ "type": "transfer-complete" }));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"bitfield"}"#).is_err());
    }
}
