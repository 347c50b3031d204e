//! Wire message shapes for the two HTTP-based signaling dialects this
//! harness speaks: SRS's `/rtc/v1/{publish,play}` API and Janus's
//! long-poll `/janus` API. Mirrors the teacher's `SignalingMessage` /
//! `AgentCommand` style: plain serde structs/enums, no hand-rolled parsing.

use serde::{Deserialize, Serialize};

/// `POST http://{host}:1985/rtc/v1/{publish|play}/`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrsApiRequest {
    pub api: String,
    pub clientip: String,
    pub sdp: String,
    pub streamurl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrsApiResponse {
    pub code: i64,
    #[serde(default)]
    pub sessionid: String,
    #[serde(default)]
    pub sdp: String,
}

/// Every Janus request body carries a `janus` verb and a `transaction` id;
/// `body`/`jsep` are present only on some verbs, so this is modeled as a
/// free-form envelope built with `serde_json::json!` at the call site
/// (matching the teacher's preference for light message types over deep
/// enum trees when the wire shape is this irregular) rather than one
/// giant tagged enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanusEnvelope {
    pub janus: String,
    pub transaction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsep: Option<JanusJsep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanusJsep {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
}

/// The ack Janus returns immediately from a `POST`, before the async event
/// arrives on the long-poll.
#[derive(Debug, Clone, Deserialize)]
pub struct JanusAck {
    pub janus: String,
    #[serde(default)]
    pub session_id: u64,
    #[serde(default)]
    pub data: Option<JanusAckData>,
    #[serde(default)]
    pub transaction: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JanusAckData {
    pub id: u64,
}

/// One message read off the long-poll `GET /janus/{session}?maxev=1`.
/// `janus` distinguishes `event` (transaction-matched), `keepalive`,
/// `webrtcup`, and `media`.
#[derive(Debug, Clone, Deserialize)]
pub struct JanusPollEvent {
    pub janus: String,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub sender: Option<u64>,
    #[serde(default)]
    pub plugindata: Option<JanusPluginData>,
    #[serde(default)]
    pub jsep: Option<JanusJsep>,
    #[serde(default)]
    pub media: Option<String>,
    #[serde(default)]
    pub receiving: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JanusPluginData {
    pub plugin: String,
    pub data: JanusVideoRoomData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JanusVideoRoomData {
    #[serde(default)]
    pub videoroom: String,
    #[serde(default)]
    pub room: i64,
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub private_id: u64,
    #[serde(default)]
    pub publishers: Vec<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srs_request_roundtrip() {
        let req = SrsApiRequest {
            api: "http://localhost:1985/rtc/v1/publish/".into(),
            clientip: "".into(),
            sdp: "v=0\r\n".into(),
            streamurl: "webrtc://localhost/live/livestream".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        let back: SrsApiRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.streamurl, req.streamurl);
    }

    #[test]
    fn srs_response_nonzero_code_parses() {
        let raw = r#"{"code":100,"sessionid":"","sdp":""}"#;
        let resp: SrsApiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.code, 100);
    }

    #[test]
    fn janus_poll_event_join_parses() {
        let raw = r#"{
            "janus": "event",
            "transaction": "abcdefghijkl",
            "sender": 123,
            "plugindata": {
                "plugin": "janus.plugin.videoroom",
                "data": {"videoroom": "joined", "room": 1234, "id": 5, "private_id": 9, "publishers": []}
            }
        }"#;
        let ev: JanusPollEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.janus, "event");
        let data = ev.plugindata.unwrap().data;
        assert_eq!(data.videoroom, "joined");
        assert_eq!(data.id, 5);
    }

    #[test]
    fn janus_keepalive_has_no_transaction() {
        let raw = r#"{"janus":"keepalive","session_id":42}"#;
        let ev: JanusPollEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(ev.janus, "keepalive");
        assert!(ev.transaction.is_none());
    }
}
