//! Viewer socket protocol. Every message is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};
use subwatch_core::{BlockRecord, ChainId, ChainMetadata, ChainSummary, NetworkStats};

/// Per-chain event kinds a viewer can subscribe to individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Stats,
    NewBlock,
    #[serde(other)]
    Unknown,
}

/// Messages sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ViewerRequest {
    Subscribe {
        chain_id: ChainId,
        #[serde(default)]
        events: Vec<EventKind>,
    },
    /// Without `events`, leaves every topic of the chain.
    Unsubscribe {
        chain_id: ChainId,
        #[serde(default)]
        events: Vec<EventKind>,
    },
    Connect {
        ws_url: String,
        #[serde(default)]
        name: Option<String>,
    },
    Disconnect {
        chain_id: ChainId,
    },
}

/// Messages pushed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Stats {
        chain_id: ChainId,
        stats: NetworkStats,
    },
    NewBlock {
        chain_id: ChainId,
        block: BlockRecord,
    },
    /// The whole rolling window, sent once on subscribe.
    Blocks {
        chain_id: ChainId,
        blocks: Vec<BlockRecord>,
    },
    Connected {
        chain_id: ChainId,
        metadata: ChainMetadata,
    },
    Disconnected {
        chain_id: ChainId,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        chain_id: Option<ChainId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        ws_url: Option<String>,
        message: String,
    },
    ChainList {
        chains: Vec<ChainSummary>,
    },
}

impl ServerEvent {
    pub fn chain_error(chain_id: ChainId, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            chain_id: Some(chain_id),
            ws_url: None,
            message: message.into(),
        }
    }

    pub fn endpoint_error(ws_url: impl Into<String>, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            chain_id: None,
            ws_url: Some(ws_url.into()),
            message: message.into(),
        }
    }

    /// Error for a message that could not be parsed.
    pub fn request_error(message: impl Into<String>) -> Self {
        ServerEvent::Error {
            chain_id: None,
            ws_url: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe_with_events() {
        let req: ViewerRequest = serde_json::from_str(
            r#"{"type":"subscribe","chainId":"rpc.example_443_1","events":["stats","newBlock"]}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            ViewerRequest::Subscribe {
                chain_id: ChainId::from("rpc.example_443_1"),
                events: vec![EventKind::Stats, EventKind::NewBlock],
            }
        );
    }

    #[test]
    fn test_unknown_event_kind_is_tolerated() {
        let req: ViewerRequest = serde_json::from_str(
            r#"{"type":"unsubscribe","chainId":"c","events":["extrinsics"]}"#,
        )
        .unwrap();
        assert_eq!(
            req,
            ViewerRequest::Unsubscribe {
                chain_id: ChainId::from("c"),
                events: vec![EventKind::Unknown],
            }
        );
    }

    #[test]
    fn test_parse_connect_without_name() {
        let req: ViewerRequest =
            serde_json::from_str(r#"{"type":"connect","wsUrl":"wss://rpc.example"}"#).unwrap();
        assert_eq!(
            req,
            ViewerRequest::Connect {
                ws_url: "wss://rpc.example".into(),
                name: None,
            }
        );
    }

    #[test]
    fn test_events_are_tagged_camel_case() {
        let json = serde_json::to_value(ServerEvent::Disconnected {
            chain_id: ChainId::from("c"),
        })
        .unwrap();
        assert_eq!(json["type"], "disconnected");
        assert_eq!(json["chainId"], "c");

        let json = serde_json::to_value(ServerEvent::ChainList { chains: vec![] }).unwrap();
        assert_eq!(json["type"], "chainList");

        let json = serde_json::to_value(ServerEvent::endpoint_error("ws://x", "boom")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["wsUrl"], "ws://x");
        assert!(json.get("chainId").is_none());
    }
}
