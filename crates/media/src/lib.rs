pub mod aac;
pub mod clock;
pub mod h264;
pub mod ivf;
pub mod opus;
pub mod ps;
pub mod rtp_header;
pub mod source;
pub mod ts;

pub use aac::AdtsReader;
pub use clock::{dts_from_samples, video_sample_rate, WallClock};
pub use h264::{access_unit_bytes, H264Reader};
pub use ivf::IvfReader;
pub use opus::{OggOpusReader, OPUS_CLOCK_RATE};
pub use ps::{PesFlags, PesHeader, PsPackStream};
pub use rtp_header::RtpHeader;
pub use source::{AacFrame, FrameSource, IvfFrame, Nal, OpusPage, ReadError};
pub use ts::{pack_ts_packet, pes_to_ts_packets, DemuxedFrame, ElementaryStreamKind, TsAccumulator, TsDemuxer};
