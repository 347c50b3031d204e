//! The common restartable-iterator contract every elementary-stream reader
//! implements, so ingestion loops (WebRTC publisher, GB28181 PS driver,
//! SRT publisher) are generic over source kind.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("EOF")]
    Eof,
    #[error("malformed stream: {0}")]
    Malformed(String),
    #[error("short read: fewer than {needed} bytes remain")]
    ShortRead { needed: usize },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReadError {
    pub fn is_eof(&self) -> bool {
        matches!(self, ReadError::Eof)
    }
}

/// One H.264 Annex-B NAL unit.
///
/// `picture_order_count` is carried for parity with the wire NAL frame
/// shape but always `0` here: POC requires parsing the slice header's
/// `pic_order_cnt_lsb` against the active SPS, which this reader — built
/// only to split and reassemble Annex-B access units, not decode them —
/// never does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nal {
    pub unit_type: u8,
    pub ref_idc: u8,
    pub forbidden_zero_bit: bool,
    pub picture_order_count: u32,
    pub data: Vec<u8>,
}

pub const NAL_TYPE_SLICE_NON_IDR: u8 = 1;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
pub const NAL_TYPE_IDR: u8 = 5;

impl Nal {
    pub fn is_parameter_set(&self) -> bool {
        self.unit_type == NAL_TYPE_SPS || self.unit_type == NAL_TYPE_PPS
    }

    pub fn is_idr(&self) -> bool {
        self.unit_type == NAL_TYPE_IDR
    }
}

/// A decoded ADTS AAC frame.
#[derive(Debug, Clone)]
pub struct AacFrame {
    pub bytes: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u8,
}

/// One Ogg page carrying Opus audio.
#[derive(Debug, Clone)]
pub struct OpusPage {
    pub bytes: Vec<u8>,
    pub granule_position: u64,
}

impl OpusPage {
    /// Sample duration given the previous page's granule position and the
    /// codec clock rate (48kHz for Opus).
    pub fn duration_since(&self, last_granule: u64, clock_rate: u64) -> Duration {
        let samples = self.granule_position.saturating_sub(last_granule);
        Duration::from_nanos(samples * 1_000_000_000 / clock_rate)
    }
}

/// One VP8 frame read from an IVF container (used for IVF passthrough —
/// the source file is a sequence of raw VP8 frames, no Annex-B parsing
/// needed).
#[derive(Debug, Clone)]
pub struct IvfFrame {
    pub bytes: Vec<u8>,
    pub timestamp: u64,
}

/// Restartable frame source: `next_frame` returns `Eof` exactly once per
/// pass over the file; the caller decides whether to restart (re-open from
/// offset 0) or give up.
pub trait FrameSource {
    type Frame;

    fn next_frame(&mut self) -> Result<Self::Frame, ReadError>;

    /// Re-open the backing file from the start. Used to implement the
    /// "restart on EOF" contract so a finite file becomes an unbounded
    /// stream for long benchmark runs.
    fn restart(&mut self) -> Result<(), ReadError>;
}
