use serde::{Deserialize, Serialize};
use std::fmt;

/// RTP synchronization source identifier. For GB28181 this is parsed out of
/// the SDP `y=` line; for SRS/Janus it is assigned by the local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ssrc(pub u32);

impl fmt::Display for Ssrc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies one simulated participant (one publisher or one player task)
/// for logging and dump-file gating purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId {
    pub stream_index: u32,
    pub client_index: u32,
}

impl SessionId {
    pub fn new(stream_index: u32, client_index: u32) -> Self {
        Self {
            stream_index,
            client_index,
        }
    }

    /// Only the first client of the first stream may write dump files,
    /// per the orchestrator's "prevent interleaved writes to shared paths" rule.
    pub fn may_write_dumps(&self) -> bool {
        self.stream_index == 0 && self.client_index == 0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}c{}", self.stream_index, self.client_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_first_session_writes_dumps() {
        assert!(SessionId::new(0, 0).may_write_dumps());
        assert!(!SessionId::new(0, 1).may_write_dumps());
        assert!(!SessionId::new(1, 0).may_write_dumps());
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionId::new(2, 3).to_string(), "s2c3");
    }
}
