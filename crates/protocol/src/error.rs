//! The four-tier error taxonomy shared by every session state machine.
//!
//! Session code itself mostly returns `anyhow::Result<T>`, matching the
//! teacher's agent crate; `BenchError` is the typed core that the
//! orchestrator downcasts to when it needs to tell a deliberate
//! cancellation apart from a real failure (see `crates/harness::orchestrator`).

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// Root context cancellation, or a clean EOF-then-restart at the top level.
    /// Never logged as a failure.
    #[error("canceled")]
    Canceled,

    #[error("transient: {0}")]
    Transient(#[from] TransientKind),

    #[error("protocol failure: {0}")]
    Protocol(#[from] ProtocolKind),

    #[error("fatal: {0}")]
    Fatal(#[from] FatalKind),
}

/// EOF mid-stream, a single HTTP timeout, an SRT read/write deadline —
/// handled by restart or retry within the session, never surfaced to the
/// orchestrator as a failure on their own.
#[derive(Debug, thiserror::Error)]
pub enum TransientKind {
    #[error("source file EOF mid-stream: {path}")]
    SourceEof { path: String },
    #[error("HTTP request to {url} timed out")]
    HttpTimeout { url: String },
    #[error("SRT deadline exceeded after {0:?}")]
    SrtDeadline(std::time::Duration),
}

/// Non-zero signaling response code, malformed SDP, unexpected Janus verb,
/// DTLS handshake timeout — terminates the owning session, carrying the
/// offending payload for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolKind {
    #[error("SRS signaling returned code={code}: {body}")]
    SrsNonZeroCode { code: i64, body: String },
    #[error("unexpected janus verb {verb:?} in response: {body}")]
    UnexpectedJanusVerb { verb: String, body: String },
    #[error("SDP offer missing `y=` SSRC line: {sdp}")]
    MissingSsrcLine { sdp: String },
    #[error("SDP offer missing `m=video` media line: {sdp}")]
    MissingVideoMediaLine { sdp: String },
    #[error("DTLS handshake did not complete within {0:?}")]
    DtlsHandshakeTimeout(std::time::Duration),
}

/// File-open failure, invalid URL, malformed flags — the process exits
/// with a non-zero code before any networking starts.
#[derive(Debug, thiserror::Error)]
pub enum FatalKind {
    #[error("failed to open source file {path}: {source}")]
    SourceOpen {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("malformed command line flags: {0}")]
    BadFlags(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceled_never_wraps() {
        let err = BenchError::Canceled;
        assert_eq!(err.to_string(), "canceled");
    }

    #[test]
    fn transient_carries_path() {
        let err: BenchError = TransientKind::SourceEof {
            path: "avatar.h264".into(),
        }
        .into();
        assert!(err.to_string().contains("avatar.h264"));
    }

    #[test]
    fn protocol_carries_payload() {
        let err: BenchError = ProtocolKind::SrsNonZeroCode {
            code: 100,
            body: "{}".into(),
        }
        .into();
        assert!(err.to_string().contains("code=100"));
    }
}
