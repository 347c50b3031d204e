//! WebRTC session driving SRS's `/rtc/v1/{publish,play}` signaling (§4.6),
//! grounded in the teacher's `agent/src/peer.rs` media-engine setup and
//! RTCP-drain pattern, generalized from one fixed H.264+Opus pair to
//! reading arbitrary source files and gating ingestion on PC-connected.

use crate::sessions::{has_extension, SessionContext, SessionHooks};
use anyhow::Context;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streambench_media::{
    access_unit_bytes, AdtsReader, FrameSource, H264Reader, IvfReader, OggOpusReader, ReadError,
    WallClock, OPUS_CLOCK_RATE,
};
use streambench_protocol::{BenchError, PlayConfig, ProtocolKind, PublishConfig, SrsApiRequest, SrsApiResponse};
use streambench_vnet::VnetRegistry;
use tokio::io::AsyncWriteExt;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const H264_PAYLOAD_TYPE: u8 = 125;
const VP8_PAYLOAD_TYPE: u8 = 96;
const OPUS_PAYLOAD_TYPE: u8 = 111;
const PLI_INTERVAL: Duration = Duration::from_secs(3);
/// Frame rate assumed for `.ivf` sources when `-fps` is not given — unlike
/// Annex-B H.264, IVF passthrough doesn't require an explicit rate (§6).
const DEFAULT_IVF_FPS: u32 = 30;

pub(crate) async fn build_peer_connection() -> anyhow::Result<Arc<RTCPeerConnection>> {
    let mut media_engine = MediaEngine::default();

    let video_feedback = vec![
        RTCPFeedback { typ: "goog-remb".into(), parameter: "".into() },
        RTCPFeedback { typ: "ccm".into(), parameter: "fir".into() },
        RTCPFeedback { typ: "nack".into(), parameter: "".into() },
        RTCPFeedback { typ: "nack".into(), parameter: "pli".into() },
    ];

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f".to_string(),
                rtcp_feedback: video_feedback.clone(),
            },
            payload_type: H264_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_string(),
                rtcp_feedback: video_feedback.clone(),
            },
            payload_type: VP8_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Video,
    )?;

    media_engine.register_codec(
        RTCRtpCodecParameters {
            capability: RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                rtcp_feedback: vec![],
            },
            payload_type: OPUS_PAYLOAD_TYPE,
            ..Default::default()
        },
        RTPCodecType::Audio,
    )?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let pc = Arc::new(api.new_peer_connection(RTCConfiguration::default()).await?);
    Ok(pc)
}

/// Fires once the peer connection reaches `Connected`, matching the
/// original's `pcDone` one-shot gate context.
pub(crate) fn gate_on_connected(pc: &Arc<RTCPeerConnection>) -> Arc<Notify> {
    let notify = Arc::new(Notify::new());
    let n = Arc::clone(&notify);
    pc.on_peer_connection_state_change(Box::new(move |state| {
        if state == RTCPeerConnectionState::Connected {
            n.notify_waiters();
        }
        Box::pin(async {})
    }));
    notify
}

fn srs_api_url(stream_url: &str, endpoint: &str) -> anyhow::Result<String> {
    let without_scheme = stream_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .context("stream URL missing scheme")?;
    let host = without_scheme
        .split('/')
        .next()
        .context("stream URL missing host")?;
    let host_only = host.split(':').next().unwrap_or(host);
    Ok(format!("http://{host_only}:1985/rtc/v1/{endpoint}/"))
}

async fn exchange_sdp(
    http: &reqwest::Client,
    api_url: &str,
    stream_url: &str,
    offer_sdp: &str,
) -> Result<String, BenchError> {
    let request = SrsApiRequest {
        api: api_url.to_string(),
        clientip: String::new(),
        sdp: offer_sdp.to_string(),
        streamurl: stream_url.to_string(),
    };

    let resp = http
        .post(api_url)
        .json(&request)
        .send()
        .await
        .map_err(|e| streambench_protocol::TransientKind::HttpTimeout { url: e.to_string() })?;

    let body: SrsApiResponse = resp
        .json()
        .await
        .map_err(|e| streambench_protocol::TransientKind::HttpTimeout { url: e.to_string() })?;

    if body.code != 0 {
        return Err(ProtocolKind::SrsNonZeroCode {
            code: body.code,
            body: body.sdp,
        }
        .into());
    }

    Ok(body.sdp)
}

/// Rewrites every `a=candidate` UDP host address in an SDP to a per-address
/// `VnetProxy`'s virtual endpoint (§4.5), so the negotiated ICE/SRTP path
/// runs through the fault-injection proxy instead of straight to the real
/// media server. Proxies are created lazily and keyed by the real address,
/// so repeat candidates pointing at the same server reuse one proxy.
async fn rewrite_candidates_through_vnet(
    sdp: &str,
    registry: &VnetRegistry,
) -> anyhow::Result<String> {
    let mut out = String::with_capacity(sdp.len());
    for line in sdp.split_terminator("\r\n") {
        let rewritten = match line.strip_prefix("a=candidate:") {
            Some(rest) => rewrite_candidate_line(rest, registry).await?,
            None => None,
        };
        out.push_str(&rewritten.unwrap_or_else(|| line.to_string()));
        out.push_str("\r\n");
    }
    Ok(out)
}

async fn rewrite_candidate_line(rest: &str, registry: &VnetRegistry) -> anyhow::Result<Option<String>> {
    let mut fields: Vec<&str> = rest.split_whitespace().collect();
    if fields.len() < 6 || !fields[2].eq_ignore_ascii_case("udp") {
        return Ok(None);
    }
    let (Ok(ip), Ok(port)) = (fields[4].parse::<std::net::IpAddr>(), fields[5].parse::<u16>()) else {
        return Ok(None);
    };
    let real_addr = std::net::SocketAddr::new(ip, port);
    let proxy = streambench_vnet::get_or_create_proxy(registry, real_addr).await?;
    let virtual_addr = proxy.virtual_addr()?;
    let ip_owned = virtual_addr.ip().to_string();
    let port_owned = virtual_addr.port().to_string();
    fields[4] = &ip_owned;
    fields[5] = &port_owned;
    debug!(%real_addr, %virtual_addr, "rewrote ICE candidate through vnet proxy");
    Ok(Some(format!("a=candidate:{}", fields.join(" "))))
}

pub async fn run_publisher(
    mut ctx: SessionContext,
    cfg: &PublishConfig,
    http: &reqwest::Client,
    vnet: Option<&VnetRegistry>,
    hooks: Option<&SessionHooks>,
) -> Result<(), BenchError> {
    let pc = build_peer_connection()
        .await
        .map_err(|e| streambench_protocol::FatalKind::InvalidUrl { url: cfg.url.clone(), reason: e.to_string() })?;

    let video_is_ivf = cfg.source_video.as_deref().map(|p| has_extension(p, "ivf")).unwrap_or(false);
    let video_track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: if video_is_ivf { MIME_TYPE_VP8 } else { MIME_TYPE_H264 }.to_string(),
            clock_rate: 90000,
            ..Default::default()
        },
        "video".to_string(),
        "streambench".to_string(),
    ));
    let audio_track = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_string(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        },
        "audio".to_string(),
        "streambench".to_string(),
    ));

    let video_sender = pc
        .add_track(Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .context("add video track")
        .map_err(fatal_url(&cfg.url))?;
    pc.add_track(Arc::clone(&audio_track) as Arc<dyn TrackLocal + Send + Sync>)
        .await
        .context("add audio track")
        .map_err(fatal_url(&cfg.url))?;

    // Drain the video sender's RTCP feedback side to avoid back-pressure.
    tokio::spawn(async move {
        while let Ok((packets, _)) = video_sender.read_rtcp().await {
            for _pkt in packets {}
        }
    });

    let connected = gate_on_connected(&pc);

    let offer = pc.create_offer(None).await.map_err(|e| anyhow::anyhow!(e)).map_err(fatal_url(&cfg.url))?;
    pc.set_local_description(offer.clone()).await.map_err(|e| anyhow::anyhow!(e)).map_err(fatal_url(&cfg.url))?;
    if let Some(on_offer) = hooks.and_then(|h| h.on_offer.as_ref()) {
        on_offer(&offer.sdp);
    }

    let api_url = srs_api_url(&cfg.url, "publish").map_err(fatal_url(&cfg.url))?;
    let mut answer_sdp = exchange_sdp(http, &api_url, &cfg.url, &offer.sdp).await?;
    if let Some(registry) = vnet {
        answer_sdp = rewrite_candidates_through_vnet(&answer_sdp, registry)
            .await
            .map_err(fatal_url(&cfg.url))?;
    }
    if let Some(on_answer) = hooks.and_then(|h| h.on_answer.as_ref()) {
        on_answer(&answer_sdp);
    }
    let answer = RTCSessionDescription::answer(answer_sdp)
        .context("parse SRS answer SDP")
        .map_err(fatal_url(&cfg.url))?;
    pc.set_remote_description(answer).await.map_err(|e| anyhow::anyhow!(e)).map_err(fatal_url(&cfg.url))?;

    info!(url = %cfg.url, "publisher signaling complete, waiting for PC connected");

    tokio::select! {
        _ = connected.notified() => {}
        _ = ctx.canceled() => return Err(BenchError::Canceled),
    }
    if let Some(ice_ready) = hooks.and_then(|h| h.ice_ready.as_ref()) {
        ice_ready();
    }

    let video_done = if let Some(video_path) = &cfg.source_video {
        let fps = match cfg.fps {
            Some(fps) => fps,
            None if video_is_ivf => DEFAULT_IVF_FPS,
            None => return Err(fatal_url(&cfg.url)(anyhow::anyhow!("video source requires fps"))),
        };
        Some(spawn_video_ingest(video_path, fps, video_track, ctx.clone()))
    } else {
        None
    };
    let audio_done = cfg
        .source_audio
        .as_ref()
        .map(|audio_path| spawn_audio_ingest(audio_path, audio_track, ctx.clone()));

    ctx.canceled().await;
    pc.close().await.ok();
    if let Some(h) = video_done {
        h.abort();
    }
    if let Some(h) = audio_done {
        h.abort();
    }

    Err(BenchError::Canceled)
}

fn fatal_url(url: &str) -> impl Fn(anyhow::Error) -> BenchError + '_ {
    move |e: anyhow::Error| {
        streambench_protocol::FatalKind::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        }
        .into()
    }
}

fn spawn_video_ingest(
    path: &Path,
    fps: u32,
    track: Arc<TrackLocalStaticSample>,
    ctx: SessionContext,
) -> tokio::task::JoinHandle<()> {
    if has_extension(path, "ivf") {
        spawn_ivf_video_ingest(path, fps, track, ctx)
    } else {
        spawn_h264_video_ingest(path, fps, track, ctx)
    }
}

fn spawn_h264_video_ingest(
    path: &Path,
    fps: u32,
    track: Arc<TrackLocalStaticSample>,
    mut ctx: SessionContext,
) -> tokio::task::JoinHandle<()> {
    let path = path.to_path_buf();
    tokio::spawn(async move {
        let mut reader = match H264Reader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!(?path, "failed to open video source: {e}");
                return;
            }
        };
        let mut clock = WallClock::new();
        let frame_duration = Duration::from_secs_f64(1.0 / fps as f64);

        loop {
            if ctx.is_canceled() {
                return;
            }
            let mut access_unit = Vec::new();
            loop {
                match reader.next_frame() {
                    Ok(nal) => {
                        let is_param_set = nal.is_parameter_set();
                        access_unit.push(nal);
                        if !is_param_set {
                            break;
                        }
                    }
                    Err(ReadError::Eof) => {
                        if let Err(e) = reader.restart() {
                            warn!("video restart failed: {e}");
                            return;
                        }
                        if access_unit.is_empty() {
                            continue;
                        }
                        break;
                    }
                    Err(e) => {
                        warn!("video read error: {e}");
                        return;
                    }
                }
            }

            let bytes = access_unit_bytes(&access_unit);
            if track
                .write_sample(&Sample {
                    data: bytes::Bytes::from(bytes),
                    duration: frame_duration,
                    ..Default::default()
                })
                .await
                .is_err()
            {
                return;
            }

            let residual = clock.tick(frame_duration);
            if residual > Duration::ZERO {
                tokio::time::sleep(residual).await;
            }
        }
    })
}

/// IVF frames are already complete VP8 payloads (§6), so unlike H.264 there
/// is no access-unit assembly: one `next_frame()` call maps to one RTP
/// sample.
fn spawn_ivf_video_ingest(
    path: &Path,
    fps: u32,
    track: Arc<TrackLocalStaticSample>,
    mut ctx: SessionContext,
) -> tokio::task::JoinHandle<()> {
    let path = path.to_path_buf();
    tokio::spawn(async move {
        let mut reader = match IvfReader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!(?path, "failed to open video source: {e}");
                return;
            }
        };
        let mut clock = WallClock::new();
        let frame_duration = Duration::from_secs_f64(1.0 / fps as f64);

        loop {
            if ctx.is_canceled() {
                return;
            }
            let frame = match reader.next_frame() {
                Ok(frame) => frame,
                Err(ReadError::Eof) => {
                    if let Err(e) = reader.restart() {
                        warn!("video restart failed: {e}");
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("video read error: {e}");
                    return;
                }
            };

            if track
                .write_sample(&Sample {
                    data: bytes::Bytes::from(frame.bytes),
                    duration: frame_duration,
                    ..Default::default()
                })
                .await
                .is_err()
            {
                return;
            }

            let residual = clock.tick(frame_duration);
            if residual > Duration::ZERO {
                tokio::time::sleep(residual).await;
            }
        }
    })
}

fn spawn_audio_ingest(
    path: &Path,
    track: Arc<TrackLocalStaticSample>,
    mut ctx: SessionContext,
) -> tokio::task::JoinHandle<()> {
    let path = path.to_path_buf();
    tokio::spawn(async move {
        let mut reader = match AdtsReader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!(?path, "failed to open audio source: {e}");
                return;
            }
        };
        let mut clock = WallClock::new();

        loop {
            if ctx.is_canceled() {
                return;
            }
            let frame = match reader.next_frame() {
                Ok(f) => f,
                Err(ReadError::Eof) => {
                    if let Err(e) = reader.restart() {
                        warn!("audio restart failed: {e}");
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("audio read error: {e}");
                    return;
                }
            };

            let samples_per_frame = 1024u64;
            let duration = Duration::from_nanos(samples_per_frame * 1_000_000_000 / frame.sample_rate as u64);

            if track
                .write_sample(&Sample {
                    data: bytes::Bytes::from(frame.bytes),
                    duration,
                    ..Default::default()
                })
                .await
                .is_err()
            {
                return;
            }

            let residual = clock.tick(duration);
            if residual > Duration::ZERO {
                tokio::time::sleep(residual).await;
            }
        }
    })
}

pub async fn run_player(
    mut ctx: SessionContext,
    cfg: &PlayConfig,
    http: &reqwest::Client,
    vnet: Option<&VnetRegistry>,
    hooks: Option<&SessionHooks>,
) -> Result<(), BenchError> {
    let pc = build_peer_connection()
        .await
        .map_err(|e| streambench_protocol::FatalKind::InvalidUrl { url: cfg.url.clone(), reason: e.to_string() })?;

    pc.add_transceiver_from_kind(RTPCodecType::Video, None)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .map_err(fatal_url(&cfg.url))?;
    pc.add_transceiver_from_kind(RTPCodecType::Audio, None)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .map_err(fatal_url(&cfg.url))?;

    let may_dump = ctx.session_id.may_write_dumps();
    let dump_video_path = cfg.dump_video.clone();
    let dump_audio_path = cfg.dump_audio.clone();
    let pc_for_pli = Arc::clone(&pc);

    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let is_video = track.kind() == webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Video;
        let dump_path = if !may_dump {
            None
        } else if is_video {
            dump_video_path.clone()
        } else {
            dump_audio_path.clone()
        };
        let pc_for_pli = Arc::clone(&pc_for_pli);
        Box::pin(async move {
            if is_video {
                spawn_pli_ticker(Arc::clone(&track), pc_for_pli);
            }
            spawn_track_drain(track, is_video, dump_path);
        })
    }));

    let connected = gate_on_connected(&pc);

    let offer = pc.create_offer(None).await.map_err(|e| anyhow::anyhow!(e)).map_err(fatal_url(&cfg.url))?;
    pc.set_local_description(offer.clone()).await.map_err(|e| anyhow::anyhow!(e)).map_err(fatal_url(&cfg.url))?;
    if let Some(on_offer) = hooks.and_then(|h| h.on_offer.as_ref()) {
        on_offer(&offer.sdp);
    }

    let api_url = srs_api_url(&cfg.url, "play").map_err(fatal_url(&cfg.url))?;
    let mut answer_sdp = exchange_sdp(http, &api_url, &cfg.url, &offer.sdp).await?;
    if let Some(registry) = vnet {
        answer_sdp = rewrite_candidates_through_vnet(&answer_sdp, registry)
            .await
            .map_err(fatal_url(&cfg.url))?;
    }
    if let Some(on_answer) = hooks.and_then(|h| h.on_answer.as_ref()) {
        on_answer(&answer_sdp);
    }
    let answer = RTCSessionDescription::answer(answer_sdp)
        .context("parse SRS answer SDP")
        .map_err(fatal_url(&cfg.url))?;
    pc.set_remote_description(answer).await.map_err(|e| anyhow::anyhow!(e)).map_err(fatal_url(&cfg.url))?;

    tokio::select! {
        _ = connected.notified() => {}
        _ = ctx.canceled() => return Err(BenchError::Canceled),
    }
    if let Some(ice_ready) = hooks.and_then(|h| h.ice_ready.as_ref()) {
        ice_ready();
    }

    info!(url = %cfg.url, "player connected, receiving");
    ctx.canceled().await;
    pc.close().await.ok();
    Err(BenchError::Canceled)
}

fn spawn_pli_ticker(track: Arc<TrackRemote>, pc: Arc<RTCPeerConnection>) {
    let ssrc = track.ssrc();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PLI_INTERVAL);
        loop {
            interval.tick().await;
            let pli: Box<dyn rtcp::packet::Packet + Send + Sync> = Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc: ssrc,
            });
            if let Err(e) = pc.write_rtcp(&[pli]).await {
                debug!(ssrc, "failed to send PLI: {e}");
                return;
            }
        }
    });
}

/// Drains a remote track, writing each packet's raw RTP payload to
/// `dump_path` in arrival order. This is not a depacketizer — FU-A
/// fragments land as separate writes rather than being reassembled into
/// Annex-B NALs — good enough for conformance inspection of "did bytes
/// arrive," not for producing a directly replayable media file.
pub(crate) fn spawn_track_drain(track: Arc<TrackRemote>, is_video: bool, dump_path: Option<std::path::PathBuf>) {
    let written = Arc::new(AtomicBool::new(false));
    tokio::spawn(async move {
        let mut dump = match &dump_path {
            Some(path) => match tokio::fs::File::create(path).await {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(path = %path.display(), "failed to open dump file: {e}");
                    None
                }
            },
            None => None,
        };

        let mut buf = vec![0u8; 1500];
        loop {
            match track.read(&mut buf).await {
                Ok((n, _attrs)) => {
                    if !written.swap(true, Ordering::Relaxed) {
                        debug!(is_video, n, "received first packet on track");
                    }
                    if let Some(file) = dump.as_mut() {
                        if let Err(e) = file.write_all(&buf[..n]).await {
                            warn!("dump write failed: {e}");
                            dump = None;
                        }
                    }
                }
                Err(_) => return,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srs_api_url_strips_port_and_scheme() {
        let url = srs_api_url("webrtc://localhost:8000/live/livestream", "publish").unwrap();
        assert_eq!(url, "http://localhost:1985/rtc/v1/publish/");
    }

    #[test]
    fn srs_api_url_rejects_missing_scheme() {
        assert!(srs_api_url("localhost/live/stream", "publish").is_err());
    }
}
