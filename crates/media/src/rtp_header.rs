//! Minimal fixed 12-byte RTP header, used only to wrap GB28181's
//! PS-over-TCP transport (§4.7: "begin pushing PS-wrapped RTP via §4.4").
//! The `webrtc` crate's payloader is not involved here — GB28181 does not
//! negotiate ICE/DTLS/SRTP, it pushes raw RTP-framed PS packets over a
//! plain TCP socket, so this is hand-rolled the same way the teacher
//! hand-rolls its binary frame header in `protocol/frame.rs`.

pub const RTP_HEADER_LEN: usize = 12;
pub const RTP_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    pub fn serialize(&self) -> [u8; RTP_HEADER_LEN] {
        let mut buf = [0u8; RTP_HEADER_LEN];
        buf[0] = (RTP_VERSION << 6) & 0xC0;
        buf[1] = (self.payload_type & 0x7F) | if self.marker { 0x80 } else { 0 };
        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    pub fn wrap(&self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(RTP_HEADER_LEN + payload.len());
        out.extend_from_slice(&self.serialize());
        out.extend_from_slice(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_sets_version_bits() {
        let h = RtpHeader {
            marker: false,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 90000,
            ssrc: 0x1234_5678,
        };
        let buf = h.serialize();
        assert_eq!(buf[0] >> 6, 2);
        assert_eq!(buf[1] & 0x7F, 96);
        assert_eq!(buf[1] & 0x80, 0);
    }

    #[test]
    fn marker_bit_is_set() {
        let h = RtpHeader {
            marker: true,
            payload_type: 96,
            sequence_number: 1,
            timestamp: 0,
            ssrc: 0,
        };
        let buf = h.serialize();
        assert_eq!(buf[1] & 0x80, 0x80);
    }

    #[test]
    fn wrap_appends_payload() {
        let h = RtpHeader {
            marker: true,
            payload_type: 96,
            sequence_number: 7,
            timestamp: 42,
            ssrc: 99,
        };
        let wrapped = h.wrap(&[1, 2, 3]);
        assert_eq!(wrapped.len(), RTP_HEADER_LEN + 3);
        assert_eq!(&wrapped[RTP_HEADER_LEN..], &[1, 2, 3]);
        assert_eq!(u16::from_be_bytes([wrapped[2], wrapped[3]]), 7);
        assert_eq!(
            u32::from_be_bytes([wrapped[4], wrapped[5], wrapped[6], wrapped[7]]),
            42
        );
    }
}
