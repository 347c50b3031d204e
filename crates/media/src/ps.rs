//! MPEG-PS pack muxing for GB28181 (§4.4).
//!
//! Wraps each access unit / AAC frame in a PES packet, accumulating PES
//! buffers into one "pack" per video frame. The PES header-length fixup
//! mirrors the original implementation's pack-length recompute exactly,
//! since SRS validates the PS stream byte-for-byte and a short/long
//! `PES_packet_length` field gets the whole pack dropped.

const PACK_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xBA];
const SYSTEM_HEADER_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xBB];
const VIDEO_STREAM_ID: u8 = 0xE0;
const AUDIO_STREAM_ID: u8 = 0xC0;

/// PES optional-header flags relevant to this harness: only the PTS/DTS
/// presence bits ever get set, but the fixup accounts for every flag the
/// original toggles so the header-length arithmetic matches byte for byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct PesFlags {
    pub pts_dts_flags: u8, // 0b10 = PTS only, 0b11 = PTS+DTS
    pub escr_flag: bool,
    pub es_rate_flag: bool,
    pub dsm_trick_mode_flag: bool,
    pub additional_copy_info_flag: bool,
    pub pes_crc_flag: bool,
    pub pes_extension_flag: bool,
}

pub struct PesHeader {
    pub stream_id: u8,
    pub flags: PesFlags,
    pub pts: u64,
    pub dts: Option<u64>,
    pub payload: Vec<u8>,
}

impl PesHeader {
    /// Number of header-data bytes required to carry `flags`, the way
    /// `utilUpdatePesPacketLength` sums required bytes per flag.
    fn required_header_data_len(&self) -> u8 {
        let mut n = 0u8;
        n += match self.flags.pts_dts_flags {
            0b10 => 5,
            0b11 => 10,
            _ => 0,
        };
        if self.flags.escr_flag {
            n += 6;
        }
        if self.flags.es_rate_flag {
            n += 3;
        }
        if self.flags.dsm_trick_mode_flag {
            n += 1;
        }
        if self.flags.additional_copy_info_flag {
            n += 1;
        }
        if self.flags.pes_crc_flag {
            n += 2;
        }
        if self.flags.pes_extension_flag {
            n += 1;
        }
        n
    }

    fn write_timestamp(buf: &mut Vec<u8>, marker_bits: u8, ts: u64) {
        let ts = ts & 0x1_FFFF_FFFF;
        let b0 = (marker_bits << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01;
        let mid = ((ts >> 15) & 0x7FFF) as u16;
        let b1 = (mid >> 7) as u8;
        let b2 = (((mid & 0x7F) as u8) << 1) | 0x01;
        let low = (ts & 0x7FFF) as u16;
        let b3 = (low >> 7) as u8;
        let b4 = (((low & 0x7F) as u8) << 1) | 0x01;
        buf.extend_from_slice(&[b0, b1, b2, b3, b4]);
    }

    /// Serializes the PES packet, recomputing `PES_header_data_length` and
    /// `PES_packet_length` from the payload and flags before writing —
    /// the fixup the original performs after populating the PTS/DTS but
    /// before handing the pack to the writer.
    pub fn serialize(&self) -> Vec<u8> {
        let header_data_len = self.required_header_data_len();
        let packet_len = self.payload.len() as u32 + 3 + header_data_len as u32;

        let mut out = Vec::with_capacity(6 + 3 + header_data_len as usize + self.payload.len());
        out.extend_from_slice(&[0x00, 0x00, 0x01, self.stream_id]);
        out.extend_from_slice(&(packet_len.min(0xFFFF) as u16).to_be_bytes());

        out.push(0b1000_0000); // marker bits '10', no scrambling/priority/alignment/copyright/original flags
        let pts_dts_flags = self.flags.pts_dts_flags;
        let mut flag_byte = pts_dts_flags << 6;
        if self.flags.escr_flag {
            flag_byte |= 0b0010_0000;
        }
        if self.flags.es_rate_flag {
            flag_byte |= 0b0001_0000;
        }
        if self.flags.dsm_trick_mode_flag {
            flag_byte |= 0b0000_1000;
        }
        if self.flags.additional_copy_info_flag {
            flag_byte |= 0b0000_0100;
        }
        if self.flags.pes_crc_flag {
            flag_byte |= 0b0000_0010;
        }
        if self.flags.pes_extension_flag {
            flag_byte |= 0b0000_0001;
        }
        out.push(flag_byte);
        out.push(header_data_len);

        match (pts_dts_flags, self.dts) {
            (0b11, Some(dts)) => {
                Self::write_timestamp(&mut out, 0b0011, self.pts);
                Self::write_timestamp(&mut out, 0b0001, dts);
            }
            (0b10, _) => {
                Self::write_timestamp(&mut out, 0b0010, self.pts);
            }
            _ => {}
        }

        out.extend_from_slice(&self.payload);
        out
    }
}

fn write_pack_header(buf: &mut Vec<u8>, scr: u64) {
    buf.extend_from_slice(&PACK_START_CODE);
    let scr = scr & 0x1_FFFF_FFFF;
    let scr_ext: u16 = 0;
    let b0 = 0b0100_0000
        | (((scr >> 30) as u8 & 0x07) << 3)
        | 0b100
        | (((scr >> 28) as u8) & 0x03);
    let b1 = ((scr >> 20) & 0xFF) as u8;
    let b2 = (((scr >> 15) as u8 & 0x1F) << 3) | 0b100 | (((scr >> 13) as u8) & 0x03);
    let b3 = ((scr >> 5) & 0xFF) as u8;
    let b4 = (((scr as u8) & 0x1F) << 3) | 0b100 | (((scr_ext >> 7) as u8) & 0x03);
    let b5 = (((scr_ext & 0x7F) as u8) << 1) | 0x01;
    buf.extend_from_slice(&[b0, b1, b2, b3, b4, b5]);
    buf.extend_from_slice(&[0xFF, 0xFF, 0x01]); // mux_rate (24 bits, marker bits), unconstrained
    buf.push(0xF8); // reserved(5) + stuffing_length(3) = 0
}

fn write_system_header(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&SYSTEM_HEADER_START_CODE);
    buf.extend_from_slice(&12u16.to_be_bytes());
    buf.extend_from_slice(&[0xFF, 0xFF]); // rate_bound + marker
    buf.push(0xE0); // audio_bound(6) + fixed_flag + csps_flag
    buf.push(0x00); // system_audio_lock + system_video_lock + marker + video_bound(5, partial)
    buf.push(0xFF); // reserved/packet_rate_restriction + reserved bits
    buf.extend_from_slice(&[0xE0, 0x00, 0x00]); // video stream_id + P-STD buffer bound
    buf.extend_from_slice(&[0xC0, 0x00, 0x00]); // audio stream_id + P-STD buffer bound
}

/// Accumulates PES-framed video/audio into MPEG-PS packs.
///
/// One pack carries at most one video access unit; it is flushed once it
/// already holds video and the next audio DTS overtakes the video DTS —
/// the same ordering rule the original pack writer enforces so a PS pack
/// never straddles two video frames.
pub struct PsPackStream {
    packets: Vec<Vec<u8>>,
    has_video: bool,
    video_dts: u64,
    wrote_system_header: bool,
}

impl PsPackStream {
    pub fn new() -> Self {
        Self {
            packets: Vec::new(),
            has_video: false,
            video_dts: 0,
            wrote_system_header: false,
        }
    }

    /// Starts a new pack, writing the system header only on packs that
    /// carry parameter sets (the original calls this `WriteHeader`).
    pub fn begin_pack_with_system_header(&mut self, scr: u64) {
        let mut pack = Vec::new();
        write_pack_header(&mut pack, scr);
        write_system_header(&mut pack);
        self.packets.push(pack);
        self.wrote_system_header = true;
    }

    /// Starts a new pack without a system header (`WritePackHeader`).
    pub fn begin_pack(&mut self, scr: u64) {
        let mut pack = Vec::new();
        write_pack_header(&mut pack, scr);
        self.packets.push(pack);
    }

    pub fn write_video(&mut self, access_unit: &[u8], pts: u64, dts: u64) {
        let pes = PesHeader {
            stream_id: VIDEO_STREAM_ID,
            flags: PesFlags {
                pts_dts_flags: 0b11,
                ..Default::default()
            },
            pts,
            dts: Some(dts),
            payload: access_unit.to_vec(),
        };
        self.packets.push(pes.serialize());
        self.has_video = true;
        self.video_dts = dts;
    }

    pub fn write_audio(&mut self, frame: &[u8], pts: u64) {
        let pes = PesHeader {
            stream_id: AUDIO_STREAM_ID,
            flags: PesFlags {
                pts_dts_flags: 0b10,
                ..Default::default()
            },
            pts,
            dts: None,
            payload: frame.to_vec(),
        };
        self.packets.push(pes.serialize());
    }

    /// True once this pack holds a video frame and `audio_dts` has caught
    /// up to or passed it — time to flush and start the next pack.
    pub fn should_flush(&self, audio_dts: u64) -> bool {
        self.has_video && self.video_dts < audio_dts
    }

    pub fn has_video(&self) -> bool {
        self.has_video
    }

    pub fn video_dts(&self) -> u64 {
        self.video_dts
    }

    /// Drains the accumulated PES buffers, resetting state for the next pack.
    pub fn take_packets(&mut self) -> Vec<Vec<u8>> {
        self.has_video = false;
        self.wrote_system_header = false;
        std::mem::take(&mut self.packets)
    }
}

impl Default for PsPackStream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pes_header_fixup_matches_payload_length() {
        let pes = PesHeader {
            stream_id: VIDEO_STREAM_ID,
            flags: PesFlags {
                pts_dts_flags: 0b11,
                ..Default::default()
            },
            pts: 90_000,
            dts: Some(90_000),
            payload: vec![0xAA; 100],
        };
        let bytes = pes.serialize();
        let packet_len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        // 3 trailing header bytes (flags byte, header_data_length byte are
        // counted within those 3) + 10-byte PTS/DTS + 100-byte payload.
        assert_eq!(packet_len, 100 + 3 + 10);
        assert_eq!(bytes[8], 10); // header_data_length
    }

    #[test]
    fn pts_only_uses_5_byte_timestamp() {
        let pes = PesHeader {
            stream_id: AUDIO_STREAM_ID,
            flags: PesFlags {
                pts_dts_flags: 0b10,
                ..Default::default()
            },
            pts: 1024,
            dts: None,
            payload: vec![1, 2, 3],
        };
        let bytes = pes.serialize();
        assert_eq!(bytes[8], 5);
        let packet_len = u16::from_be_bytes([bytes[4], bytes[5]]) as usize;
        assert_eq!(packet_len, 3 + 3 + 5);
    }

    #[test]
    fn pack_flushes_once_audio_dts_overtakes_video() {
        let mut pack = PsPackStream::new();
        pack.begin_pack_with_system_header(0);
        pack.write_video(&[0u8; 10], 3600, 3600);
        assert!(!pack.should_flush(3600));
        assert!(pack.should_flush(3601));
    }

    #[test]
    fn take_packets_resets_video_state() {
        let mut pack = PsPackStream::new();
        pack.begin_pack(0);
        pack.write_video(&[0u8; 4], 100, 100);
        assert!(pack.has_video());
        let packets = pack.take_packets();
        assert!(!packets.is_empty());
        assert!(!pack.has_video());
    }
}
