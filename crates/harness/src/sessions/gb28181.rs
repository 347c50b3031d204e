//! GB28181 SIP session (§4.7), grounded in `original_source/gb28181/gb28181.go`'s
//! `Run()` state machine. SIP is driven over a raw `TcpStream` with a minimal
//! hand-rolled text-message reader/writer — the distilled spec excludes
//! "concrete SIP stack internals" from scope, so this is deliberately not a
//! general-purpose SIP parser, just enough framing to drive REGISTER/INVITE.

use crate::sessions::{SessionContext, SessionHooks};
use anyhow::Context;
use std::time::Duration;
use streambench_media::{
    dts_from_samples, video_sample_rate, AdtsReader, FrameSource, H264Reader, PsPackStream,
    ReadError, RtpHeader, WallClock,
};
use streambench_protocol::{
    BenchError, FatalKind, Gb28181Config, ProtocolKind, PublishConfig,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

const CLOCK_RATE: u64 = 90_000;
const RTP_PAYLOAD_TYPE: u8 = 96;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const REGISTER_TIMEOUT: Duration = Duration::from_secs(3 * 3600);
const INVITE_TIMEOUT: Duration = Duration::from_secs(3 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SipState {
    Idle,
    Registering,
    Registered,
    AwaitingInvite,
    Inviting,
    Streaming,
    Closed,
}

struct SipMessage {
    start_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl SipMessage {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn serialize(&self) -> String {
        let mut out = format!("{}\r\n", self.start_line);
        for (k, v) in &self.headers {
            out.push_str(&format!("{k}: {v}\r\n"));
        }
        out.push_str(&format!("Content-Length: {}\r\n\r\n{}", self.body.len(), self.body));
        out
    }
}

struct SipTransport {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl SipTransport {
    async fn connect(addr: &str) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("connect SIP server")?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    async fn send(&mut self, msg: &SipMessage) -> anyhow::Result<()> {
        self.writer.write_all(msg.serialize().as_bytes()).await?;
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<SipMessage> {
        let mut start_line = String::new();
        loop {
            start_line.clear();
            let n = self.reader.read_line(&mut start_line).await?;
            if n == 0 {
                anyhow::bail!("SIP connection closed");
            }
            if !start_line.trim().is_empty() {
                break;
            }
        }

        let mut headers = Vec::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            self.reader.read_line(&mut line).await?;
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                break;
            }
            if let Some((k, v)) = trimmed.split_once(':') {
                let k = k.trim().to_string();
                let v = v.trim().to_string();
                if k.eq_ignore_ascii_case("content-length") {
                    content_length = v.parse().unwrap_or(0);
                }
                headers.push((k, v));
            }
        }

        let mut body_buf = vec![0u8; content_length];
        if content_length > 0 {
            tokio::io::AsyncReadExt::read_exact(&mut self.reader, &mut body_buf).await?;
        }
        let body = String::from_utf8_lossy(&body_buf).to_string();

        Ok(SipMessage {
            start_line: start_line.trim().to_string(),
            headers,
            body,
        })
    }
}

pub struct GbOfferFields {
    pub ssrc: u32,
    pub media_port: u16,
}

/// Extracts SSRC and media port with the exact naive split the original
/// uses — preserved byte-for-byte rather than replaced with a real SDP
/// parser, since a server that emits extra whitespace would behave
/// identically under either implementation for this harness's purposes.
fn parse_offer(offer: &str) -> Result<GbOfferFields, BenchError> {
    let ssrc_str = offer
        .split("y=")
        .nth(1)
        .ok_or_else(|| ProtocolKind::MissingSsrcLine { sdp: offer.to_string() })?
        .split("\r\n")
        .next()
        .unwrap_or("");
    let ssrc: u32 = ssrc_str
        .trim()
        .parse()
        .map_err(|_| ProtocolKind::MissingSsrcLine { sdp: offer.to_string() })?;

    let media_port_str = offer
        .split("m=video")
        .nth(1)
        .ok_or_else(|| ProtocolKind::MissingVideoMediaLine { sdp: offer.to_string() })?
        .split(' ')
        .nth(1)
        .unwrap_or("");
    let media_port: u16 = media_port_str
        .trim()
        .parse()
        .map_err(|_| ProtocolKind::MissingVideoMediaLine { sdp: offer.to_string() })?;

    Ok(GbOfferFields { ssrc, media_port })
}

fn our_sdp_answer(device_id: &str) -> String {
    format!(
        "v=0\r\no={device_id} 0 0 IN IP4 127.0.0.1\r\ns=Play\r\nc=IN IP4 127.0.0.1\r\nt=0 0\r\nm=video 0 TCP/RTP/AVP 96\r\na=recvonly\r\n"
    )
}

pub async fn run(
    mut ctx: SessionContext,
    gb: &Gb28181Config,
    publish: Option<&PublishConfig>,
    sip_addr: &str,
    hooks: Option<&SessionHooks>,
) -> Result<(), BenchError> {
    let mut rng = rand::thread_rng();
    let device_id = gb.device_id(&mut rng);
    let mut state = SipState::Idle;

    let mut transport = SipTransport::connect(sip_addr)
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: sip_addr.to_string(),
            reason: e.to_string(),
        })?;

    state = SipState::Registering;
    let contact = format!("sip:{device_id}@{}", gb.domain);
    let register = SipMessage {
        start_line: format!("REGISTER sip:{} SIP/2.0", gb.server),
        headers: vec![
            ("Contact".into(), contact.clone()),
            ("From".into(), contact.clone()),
            ("To".into(), format!("sip:{}@{}", gb.server, gb.domain)),
            ("CSeq".into(), "1 REGISTER".into()),
        ],
        body: String::new(),
    };
    transport.send(&register).await.map_err(|e| FatalKind::InvalidUrl {
        url: sip_addr.to_string(),
        reason: e.to_string(),
    })?;

    let register_response = tokio::time::timeout(REGISTER_TIMEOUT, transport.recv())
        .await
        .map_err(|_| ProtocolKind::DtlsHandshakeTimeout(REGISTER_TIMEOUT))?
        .map_err(|e| FatalKind::InvalidUrl {
            url: sip_addr.to_string(),
            reason: e.to_string(),
        })?;
    info!(status = %register_response.start_line, "GB28181 register response");
    state = SipState::Registered;
    if let Some(on_register_done) = hooks.and_then(|h| h.on_register_done.as_ref()) {
        on_register_done();
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    state = SipState::AwaitingInvite;
    let invite = loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                let keepalive = SipMessage {
                    start_line: format!("MESSAGE sip:{} SIP/2.0", gb.server),
                    headers: vec![("Contact".into(), contact.clone())],
                    body: "<?xml version=\"1.0\"?><Notify><CmdType>Keepalive</CmdType></Notify>".into(),
                };
                if let Err(e) = transport.send(&keepalive).await {
                    warn!("GB28181 heartbeat send failed: {e}");
                }
                if let Some(on_heartbeat) = hooks.and_then(|h| h.on_message_heartbeat.as_ref()) {
                    on_heartbeat();
                }
                continue;
            }
            msg = tokio::time::timeout(INVITE_TIMEOUT, transport.recv()) => {
                let msg = msg.map_err(|_| ProtocolKind::DtlsHandshakeTimeout(INVITE_TIMEOUT))?
                    .map_err(|e| FatalKind::InvalidUrl { url: sip_addr.to_string(), reason: e.to_string() })?;
                if msg.start_line.starts_with("INVITE") {
                    if let Some(on_invite) = hooks.and_then(|h| h.on_invite_request.as_ref()) {
                        on_invite(&msg.body);
                    }
                    break msg;
                }
            }
            _ = ctx.canceled() => return Err(BenchError::Canceled),
        }
    };

    state = SipState::Inviting;
    let trying = SipMessage {
        start_line: "SIP/2.0 100 Trying".to_string(),
        headers: vec![],
        body: String::new(),
    };
    transport.send(&trying).await.map_err(|e| FatalKind::InvalidUrl {
        url: sip_addr.to_string(),
        reason: e.to_string(),
    })?;

    let offer_fields = parse_offer(&invite.body)?;

    let ok = SipMessage {
        start_line: "SIP/2.0 200 OK".to_string(),
        headers: vec![
            ("Contact".into(), contact.clone()),
            (
                "CSeq".into(),
                invite.header("CSeq").unwrap_or("1 INVITE").to_string(),
            ),
        ],
        body: our_sdp_answer(&device_id),
    };
    transport.send(&ok).await.map_err(|e| FatalKind::InvalidUrl {
        url: sip_addr.to_string(),
        reason: e.to_string(),
    })?;

    info!(
        ssrc = offer_fields.ssrc,
        media_port = offer_fields.media_port,
        "GB28181 invite complete"
    );
    state = SipState::Streaming;

    if let Some(publish) = publish {
        if let (Some(video_path), Some(audio_path), Some(fps)) =
            (&publish.source_video, &publish.source_audio, publish.fps)
        {
            let media_host = sip_addr.split(':').next().unwrap_or("127.0.0.1");
            let media_addr = format!("{media_host}:{}", offer_fields.media_port);
            stream_ps_over_rtp(&mut ctx, video_path, audio_path, fps, offer_fields.ssrc, &media_addr, hooks).await?;
        }
    }

    ctx.canceled().await;
    let _ = state;
    state_closed(&mut transport).await;
    Err(BenchError::Canceled)
}

async fn state_closed(transport: &mut SipTransport) {
    let _ = transport.writer.shutdown().await;
}

/// Drives the PS-over-RTP publish loop exactly per §4.4/§4.7: one pack per
/// video frame, flushed once `audio_dts` overtakes `video_dts`, each PES
/// buffer in the pack wrapped in its own RTP packet (`WritePacksOverRTP`).
async fn stream_ps_over_rtp(
    ctx: &mut SessionContext,
    video_path: &std::path::Path,
    audio_path: &std::path::Path,
    fps: u32,
    ssrc: u32,
    media_addr: &str,
    hooks: Option<&SessionHooks>,
) -> Result<(), BenchError> {
    let mut media = TcpStream::connect(media_addr)
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: media_addr.to_string(),
            reason: e.to_string(),
        })?;

    let mut video = H264Reader::open(video_path).map_err(|e| FatalKind::SourceOpen {
        path: video_path.display().to_string(),
        source: std::io::Error::other(e.to_string()),
    })?;
    let mut audio = AdtsReader::open(audio_path).map_err(|e| FatalKind::SourceOpen {
        path: audio_path.display().to_string(),
        source: std::io::Error::other(e.to_string()),
    })?;

    let video_rate = video_sample_rate(fps);
    let mut clock = WallClock::new();
    let mut avc_samples = 0u64;
    let mut aac_samples = 0u64;
    let mut video_dts = 0u64;
    let mut seq = 0u16;
    let mut pack = PsPackStream::new();

    loop {
        if ctx.is_canceled() {
            return Err(BenchError::Canceled);
        }

        if !pack.has_video() {
            let mut access_unit = Vec::new();
            loop {
                match video.next_frame() {
                    Ok(nal) => {
                        let is_param_set = nal.is_parameter_set();
                        access_unit.push(nal);
                        if !is_param_set {
                            break;
                        }
                    }
                    Err(ReadError::Eof) => {
                        video.restart().map_err(|e| FatalKind::SourceOpen {
                            path: video_path.display().to_string(),
                            source: std::io::Error::other(e.to_string()),
                        })?;
                        continue;
                    }
                    Err(e) => {
                        return Err(FatalKind::SourceOpen {
                            path: video_path.display().to_string(),
                            source: std::io::Error::other(e.to_string()),
                        }
                        .into())
                    }
                }
            }

            avc_samples += 1024;
            video_dts = dts_from_samples(CLOCK_RATE, avc_samples, video_rate);
            let has_params = access_unit.iter().any(|n| n.is_parameter_set());
            if has_params {
                pack.begin_pack_with_system_header(video_dts);
            } else {
                pack.begin_pack(video_dts);
            }
            for nal in &access_unit {
                pack.write_video(&nal.data, video_dts, video_dts);
            }
        }

        let audio_frame = audio.next_frame();
        let audio_frame = match audio_frame {
            Ok(f) => f,
            Err(ReadError::Eof) => {
                audio.restart().map_err(|e| FatalKind::SourceOpen {
                    path: audio_path.display().to_string(),
                    source: std::io::Error::other(e.to_string()),
                })?;
                continue;
            }
            Err(e) => {
                return Err(FatalKind::SourceOpen {
                    path: audio_path.display().to_string(),
                    source: std::io::Error::other(e.to_string()),
                }
                .into())
            }
        };
        aac_samples += 1024;
        let audio_dts = dts_from_samples(CLOCK_RATE, aac_samples, audio_frame.sample_rate as u64);
        pack.write_audio(&audio_frame.bytes, audio_dts);

        if pack.should_flush(audio_dts) {
            for packet in pack.take_packets() {
                let header = RtpHeader {
                    marker: false,
                    payload_type: RTP_PAYLOAD_TYPE,
                    sequence_number: seq,
                    timestamp: video_dts as u32,
                    ssrc,
                };
                seq = seq.wrapping_add(1);
                let wrapped = header.wrap(&packet);
                if let Some(on_send_packet) = hooks.and_then(|h| h.on_send_packet.as_ref()) {
                    on_send_packet(&wrapped);
                }
                if media.write_all(&wrapped).await.is_err() {
                    return Err(BenchError::Canceled);
                }
            }
        }

        let sample_duration =
            Duration::from_secs_f64(1024.0 / audio_frame.sample_rate as f64);
        let residual = clock.tick(sample_duration);
        if residual > Duration::ZERO {
            tokio::time::sleep(residual).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ssrc_and_media_port_from_offer() {
        let offer = "v=0\r\no=- 0 0 IN IP4 1.2.3.4\r\ns=Play\r\nc=IN IP4 1.2.3.4\r\nt=0 0\r\nm=video 30000 TCP/RTP/AVP 96\r\ny=0123456789\r\n";
        let fields = parse_offer(offer).unwrap();
        assert_eq!(fields.ssrc, 123456789);
        assert_eq!(fields.media_port, 30000);
    }

    #[test]
    fn missing_ssrc_line_is_a_protocol_error() {
        let offer = "v=0\r\nm=video 30000 TCP/RTP/AVP 96\r\n";
        assert!(parse_offer(offer).is_err());
    }

    #[test]
    fn sip_message_serializes_with_content_length() {
        let msg = SipMessage {
            start_line: "REGISTER sip:example SIP/2.0".to_string(),
            headers: vec![("Contact".into(), "sip:a@b".into())],
            body: "hello".to_string(),
        };
        let text = msg.serialize();
        assert!(text.contains("Content-Length: 5"));
        assert!(text.ends_with("hello"));
    }
}
