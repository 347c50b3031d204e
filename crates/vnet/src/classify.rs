//! Chunk classifier (§4.5): peeks well-known byte offsets on a UDP
//! payload to tell STUN, DTLS, RTP and RTCP apart without fully parsing
//! any of them — enough for filter chains to target specific traffic.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKind {
    Stun,
    Dtls,
    Rtp,
    Rtcp,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsHandshakeType {
    ClientHello,
    ServerHello,
    Certificate,
    ServerHelloDone,
    ClientKeyExchange,
    Finished,
    Unknown(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub kind: ChunkKind,
    pub dtls_content_type: Option<DtlsContentType>,
    pub dtls_handshake_type: Option<DtlsHandshakeType>,
    pub payload: &'a [u8],
}

const RTCP_PT_RANGE: std::ops::RangeInclusive<u8> = 192..=223;

pub fn classify(payload: &[u8]) -> Chunk<'_> {
    let Some(&first) = payload.first() else {
        return Chunk {
            kind: ChunkKind::Other,
            dtls_content_type: None,
            dtls_handshake_type: None,
            payload,
        };
    };

    match first {
        0 | 1 => Chunk {
            kind: ChunkKind::Stun,
            dtls_content_type: None,
            dtls_handshake_type: None,
            payload,
        },
        20..=63 => {
            let content_type = dtls_content_type(first);
            let handshake_type = if matches!(content_type, DtlsContentType::Handshake) {
                payload.get(13).copied().map(dtls_handshake_type)
            } else {
                None
            };
            Chunk {
                kind: ChunkKind::Dtls,
                dtls_content_type: Some(content_type),
                dtls_handshake_type: handshake_type,
                payload,
            }
        }
        128..=191 => {
            let pt = payload.get(1).copied().unwrap_or(0) & 0x7F;
            let kind = if RTCP_PT_RANGE.contains(&pt) {
                ChunkKind::Rtcp
            } else {
                ChunkKind::Rtp
            };
            Chunk {
                kind,
                dtls_content_type: None,
                dtls_handshake_type: None,
                payload,
            }
        }
        _ => Chunk {
            kind: ChunkKind::Other,
            dtls_content_type: None,
            dtls_handshake_type: None,
            payload,
        },
    }
}

fn dtls_content_type(b: u8) -> DtlsContentType {
    match b {
        20 => DtlsContentType::ChangeCipherSpec,
        21 => DtlsContentType::Alert,
        22 => DtlsContentType::Handshake,
        23 => DtlsContentType::ApplicationData,
        other => DtlsContentType::Unknown(other),
    }
}

fn dtls_handshake_type(b: u8) -> DtlsHandshakeType {
    match b {
        1 => DtlsHandshakeType::ClientHello,
        2 => DtlsHandshakeType::ServerHello,
        11 => DtlsHandshakeType::Certificate,
        14 => DtlsHandshakeType::ServerHelloDone,
        16 => DtlsHandshakeType::ClientKeyExchange,
        20 => DtlsHandshakeType::Finished,
        other => DtlsHandshakeType::Unknown(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_stun() {
        let payload = [0x00, 0x01, 0x00, 0x00];
        assert_eq!(classify(&payload).kind, ChunkKind::Stun);
    }

    #[test]
    fn classifies_dtls_client_hello() {
        let mut payload = vec![22u8]; // handshake
        payload.extend_from_slice(&[0u8; 12]); // pad to byte 13
        payload.push(1); // ClientHello
        let chunk = classify(&payload);
        assert_eq!(chunk.kind, ChunkKind::Dtls);
        assert_eq!(chunk.dtls_content_type, Some(DtlsContentType::Handshake));
        assert_eq!(
            chunk.dtls_handshake_type,
            Some(DtlsHandshakeType::ClientHello)
        );
    }

    #[test]
    fn classifies_dtls_application_data_without_handshake_type() {
        let payload = [23u8, 0, 0];
        let chunk = classify(&payload);
        assert_eq!(chunk.kind, ChunkKind::Dtls);
        assert_eq!(
            chunk.dtls_content_type,
            Some(DtlsContentType::ApplicationData)
        );
        assert_eq!(chunk.dtls_handshake_type, None);
    }

    #[test]
    fn classifies_rtp_vs_rtcp_by_payload_type() {
        let rtp = [0x80, 96, 0, 0];
        assert_eq!(classify(&rtp).kind, ChunkKind::Rtp);

        let rtcp = [0x80, 200, 0, 0]; // PT 200 = sender report
        assert_eq!(classify(&rtcp).kind, ChunkKind::Rtcp);
    }

    #[test]
    fn classifies_other_for_unmatched_first_byte() {
        let payload = [250u8, 0, 0];
        assert_eq!(classify(&payload).kind, ChunkKind::Other);
    }

    #[test]
    fn empty_payload_is_other() {
        assert_eq!(classify(&[]).kind, ChunkKind::Other);
    }
}
