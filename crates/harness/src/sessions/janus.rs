//! Janus long-poll signaling client (§4.8): session/attach/join/configure
//! driven over plain HTTP, with async replies matched by transaction id off
//! a background poll loop — grounded in the same "transaction table +
//! dispatcher task" shape as the GB28181 heartbeat ticker, generalized to
//! HTTP long-polling instead of a raw socket.

use crate::sessions::webrtc::{build_peer_connection, gate_on_connected, spawn_track_drain};
use crate::sessions::{SessionContext, SessionHooks};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use streambench_media::{AdtsReader, FrameSource, H264Reader};
use streambench_protocol::{BenchError, FatalKind, PlayConfig, ProtocolKind, PublishConfig};
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";
const POLL_INTERVAL: Duration = Duration::from_millis(200);

type PendingMap = Arc<RwLock<HashMap<String, oneshot::Sender<streambench_protocol::JanusPollEvent>>>>;

fn random_transaction_id(rng: &mut impl Rng) -> String {
    (0..12)
        .map(|_| (b'a' + rng.gen_range(0..26)) as char)
        .collect()
}

struct JanusClient {
    http: reqwest::Client,
    base_url: String,
    session_id: u64,
    pending: PendingMap,
    hooks: Option<SessionHooks>,
}

impl JanusClient {
    async fn create(
        http: reqwest::Client,
        base_url: &str,
        hooks: Option<SessionHooks>,
    ) -> Result<Arc<Self>, BenchError> {
        let mut rng = rand::thread_rng();
        let envelope = streambench_protocol::JanusEnvelope {
            janus: "create".into(),
            transaction: random_transaction_id(&mut rng),
            session_id: None,
            body: None,
            jsep: None,
            plugin: None,
        };
        let ack: streambench_protocol::JanusAck = http
            .post(base_url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| transient_to_fatal(base_url, e))?
            .json()
            .await
            .map_err(|e| transient_to_fatal(base_url, e))?;

        if ack.janus != "success" {
            return Err(ProtocolKind::UnexpectedJanusVerb {
                verb: ack.janus,
                body: "create".into(),
            }
            .into());
        }
        let session_id = ack
            .data
            .map(|d| d.id)
            .ok_or_else(|| ProtocolKind::UnexpectedJanusVerb {
                verb: "success".into(),
                body: "missing session id".into(),
            })?;

        let client = Arc::new(Self {
            http,
            base_url: base_url.to_string(),
            session_id,
            pending: Arc::new(RwLock::new(HashMap::new())),
            hooks,
        });
        client.clone().spawn_poll_loop();
        Ok(client)
    }

    fn spawn_poll_loop(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let rid = rand_ms_timestamp();
                let url = format!(
                    "{}/{}?maxev=1&rid={rid}",
                    self.base_url, self.session_id
                );
                match self.http.get(&url).send().await {
                    Ok(resp) => match resp.json::<streambench_protocol::JanusPollEvent>().await {
                        Ok(event) => self.dispatch(event).await,
                        Err(e) => {
                            debug!("Janus poll response not parseable: {e}");
                        }
                    },
                    Err(e) => {
                        warn!("Janus long-poll request failed: {e}");
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
        })
    }

    async fn dispatch(&self, event: streambench_protocol::JanusPollEvent) {
        match event.janus.as_str() {
            "keepalive" => {}
            "webrtcup" => {
                info!(sender = ?event.sender, "Janus webrtcup");
                if let Some(on_webrtc_up) = self.hooks.as_ref().and_then(|h| h.on_webrtc_up.as_ref()) {
                    on_webrtc_up();
                }
            }
            "media" => {
                info!(media = ?event.media, receiving = ?event.receiving, "Janus media event");
                if let Some(on_media) = self.hooks.as_ref().and_then(|h| h.on_media.as_ref()) {
                    on_media(event.media.as_deref() == Some("video"), event.receiving.unwrap_or(false));
                }
            }
            "event" | "success" => {
                if let Some(tid) = &event.transaction {
                    let mut pending = self.pending.write().await;
                    if let Some(tx) = pending.remove(tid) {
                        let _ = tx.send(event);
                        return;
                    }
                }
            }
            _ => {}
        }
    }

    async fn request(
        &self,
        janus: &str,
        session_scoped: bool,
        body: Option<serde_json::Value>,
        jsep: Option<streambench_protocol::JanusJsep>,
        plugin: Option<String>,
    ) -> Result<streambench_protocol::JanusPollEvent, BenchError> {
        let mut rng = rand::thread_rng();
        let transaction = random_transaction_id(&mut rng);

        let (tx, rx) = oneshot::channel();
        self.pending
            .write()
            .await
            .insert(transaction.clone(), tx);

        let envelope = streambench_protocol::JanusEnvelope {
            janus: janus.to_string(),
            transaction: transaction.clone(),
            session_id: Some(self.session_id),
            body,
            jsep,
            plugin,
        };
        let url = if session_scoped {
            format!("{}/{}", self.base_url, self.session_id)
        } else {
            self.base_url.clone()
        };

        let ack: streambench_protocol::JanusAck = self
            .http
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| transient_to_fatal(&url, e))?
            .json()
            .await
            .map_err(|e| transient_to_fatal(&url, e))?;
        if ack.janus != "ack" && ack.janus != "success" {
            self.pending.write().await.remove(&transaction);
            return Err(ProtocolKind::UnexpectedJanusVerb {
                verb: ack.janus,
                body: janus.to_string(),
            }
            .into());
        }

        tokio::time::timeout(Duration::from_secs(10), rx)
            .await
            .map_err(|_| ProtocolKind::UnexpectedJanusVerb {
                verb: "timeout".into(),
                body: format!("no async reply to {janus}"),
            })?
            .map_err(|_| ProtocolKind::UnexpectedJanusVerb {
                verb: "dropped".into(),
                body: format!("reply channel for {janus} dropped"),
            })
            .map_err(BenchError::from)
    }

    async fn attach(&self, plugin: &str) -> Result<u64, BenchError> {
        let ack: streambench_protocol::JanusAck = self
            .http
            .post(format!("{}/{}", self.base_url, self.session_id))
            .json(&streambench_protocol::JanusEnvelope {
                janus: "attach".into(),
                transaction: random_transaction_id(&mut rand::thread_rng()),
                session_id: Some(self.session_id),
                body: None,
                jsep: None,
                plugin: Some(plugin.to_string()),
            })
            .send()
            .await
            .map_err(|e| transient_to_fatal(&self.base_url, e))?
            .json()
            .await
            .map_err(|e| transient_to_fatal(&self.base_url, e))?;
        ack.data
            .map(|d| d.id)
            .ok_or_else(|| {
                ProtocolKind::UnexpectedJanusVerb {
                    verb: ack.janus,
                    body: "attach".into(),
                }
                .into()
            })
    }

    async fn join_as_publisher(&self, room: i64, display: &str) -> Result<u64, BenchError> {
        let event = self
            .request(
                "message",
                true,
                Some(serde_json::json!({
                    "request": "join",
                    "ptype": "publisher",
                    "room": room,
                    "display": display,
                })),
                None,
                None,
            )
            .await?;
        let data = event
            .plugindata
            .ok_or_else(|| ProtocolKind::UnexpectedJanusVerb {
                verb: event.janus.clone(),
                body: "join missing plugindata".into(),
            })?
            .data;
        if data.videoroom != "joined" {
            return Err(ProtocolKind::UnexpectedJanusVerb {
                verb: data.videoroom,
                body: "expected videoroom=joined".into(),
            }
            .into());
        }
        Ok(data.id)
    }

    async fn publish(&self, offer_sdp: &str) -> Result<String, BenchError> {
        let event = self
            .request(
                "message",
                true,
                Some(serde_json::json!({
                    "request": "configure",
                    "video": true,
                    "audio": true,
                })),
                Some(streambench_protocol::JanusJsep {
                    kind: "offer".into(),
                    sdp: offer_sdp.to_string(),
                }),
                None,
            )
            .await?;
        event
            .jsep
            .map(|j| j.sdp)
            .ok_or_else(|| ProtocolKind::UnexpectedJanusVerb {
                verb: event.janus,
                body: "configure reply missing jsep answer".into(),
            })
            .map_err(BenchError::from)
    }
}

fn rand_ms_timestamp() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn transient_to_fatal(url: &str, e: reqwest::Error) -> BenchError {
    streambench_protocol::TransientKind::HttpTimeout {
        url: format!("{url}: {e}"),
    }
    .into()
}

fn janus_base_url(url: &str) -> Result<String, BenchError> {
    let without_scheme = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| FatalKind::InvalidUrl {
            url: url.to_string(),
            reason: "expected http(s):// URL".into(),
        })?;
    let host = without_scheme.split('/').next().unwrap_or(without_scheme);
    Ok(format!("http://{host}/janus"))
}

pub async fn run_publisher(
    mut ctx: SessionContext,
    cfg: &PublishConfig,
    http: &reqwest::Client,
    room: i64,
    hooks: Option<&SessionHooks>,
) -> Result<(), BenchError> {
    let base_url = janus_base_url(&cfg.url)?;
    let client = JanusClient::create(http.clone(), &base_url, hooks.cloned()).await?;
    client.attach(VIDEOROOM_PLUGIN).await?;
    let display = format!("streambench-{}", ctx.session_id);
    client.join_as_publisher(room, &display).await?;

    let pc = build_peer_connection()
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
    let connected = gate_on_connected(&pc);

    let mut video_track = None;
    if cfg.source_video.is_some() {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: webrtc::api::media_engine::MIME_TYPE_H264.to_string(),
                ..Default::default()
            },
            "video".into(),
            "streambench".into(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| FatalKind::InvalidUrl {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;
        video_track = Some(track);
    }
    let mut audio_track = None;
    if cfg.source_audio.is_some() {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: webrtc::api::media_engine::MIME_TYPE_OPUS.to_string(),
                ..Default::default()
            },
            "audio".into(),
            "streambench".into(),
        ));
        pc.add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| FatalKind::InvalidUrl {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;
        audio_track = Some(track);
    }

    let offer = pc
        .create_offer(None)
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
    pc.set_local_description(offer.clone())
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;

    let answer_sdp = client.publish(&offer.sdp).await?;
    pc.set_remote_description(webrtc::peer_connection::sdp::session_description::RTCSessionDescription::answer(answer_sdp).map_err(|e| FatalKind::InvalidUrl {
        url: base_url.clone(),
        reason: e.to_string(),
    })?)
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;

    tokio::select! {
        _ = connected.notified() => {}
        _ = ctx.canceled() => return Err(BenchError::Canceled),
    }

    let mut ingest_tasks = Vec::new();
    if let (Some(track), Some(path), Some(fps)) = (&video_track, &cfg.source_video, cfg.fps) {
        ingest_tasks.push(spawn_video_ingest(path.clone(), fps, track.clone(), ctx.clone()));
    }
    if let (Some(track), Some(path)) = (&audio_track, &cfg.source_audio) {
        ingest_tasks.push(spawn_audio_ingest(path.clone(), track.clone(), ctx.clone()));
    }

    ctx.canceled().await;
    for task in ingest_tasks {
        task.abort();
    }
    let _ = pc.close().await;
    Err(BenchError::Canceled)
}

pub async fn run_player(
    mut ctx: SessionContext,
    cfg: &PlayConfig,
    http: &reqwest::Client,
    room: i64,
    hooks: Option<&SessionHooks>,
) -> Result<(), BenchError> {
    let base_url = janus_base_url(&cfg.url)?;
    let client = JanusClient::create(http.clone(), &base_url, hooks.cloned()).await?;
    client.attach(VIDEOROOM_PLUGIN).await?;

    let pc = build_peer_connection()
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
    let connected = gate_on_connected(&pc);

    let dump_video = cfg.dump_video.clone();
    let dump_audio = cfg.dump_audio.clone();
    let may_dump = ctx.session_id.may_write_dumps();
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let is_video = track.kind() == webrtc::rtp_transceiver::rtp_codec::RTPCodecType::Video;
        let dump_path = if is_video { dump_video.clone() } else { dump_audio.clone() };
        Box::pin(async move {
            spawn_track_drain(track, is_video, if may_dump { dump_path } else { None });
        })
    }));

    let subscribe = format!("streambench-sub-{}", ctx.session_id);
    let _ = client.join_as_publisher(room, &subscribe).await;

    let offer = pc
        .create_offer(None)
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
    pc.set_local_description(offer.clone())
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
    let answer_sdp = client.publish(&offer.sdp).await?;
    pc.set_remote_description(webrtc::peer_connection::sdp::session_description::RTCSessionDescription::answer(answer_sdp).map_err(|e| FatalKind::InvalidUrl {
        url: base_url.clone(),
        reason: e.to_string(),
    })?)
        .await
        .map_err(|e| FatalKind::InvalidUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;

    tokio::select! {
        _ = connected.notified() => {}
        _ = ctx.canceled() => return Err(BenchError::Canceled),
    }

    ctx.canceled().await;
    let _ = pc.close().await;
    Err(BenchError::Canceled)
}

fn spawn_video_ingest(
    path: std::path::PathBuf,
    fps: u32,
    track: Arc<TrackLocalStaticSample>,
    mut ctx: SessionContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = match H264Reader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to open video source {}: {e}", path.display());
                return;
            }
        };
        let mut clock = streambench_media::WallClock::new();
        let frame_duration = Duration::from_secs_f64(1.0 / fps as f64);
        loop {
            if ctx.is_canceled() {
                return;
            }
            let mut access_unit = Vec::new();
            loop {
                match reader.next_frame() {
                    Ok(nal) => {
                        let is_param = nal.is_parameter_set();
                        access_unit.push(nal);
                        if !is_param {
                            break;
                        }
                    }
                    Err(streambench_media::ReadError::Eof) => {
                        if reader.restart().is_err() {
                            return;
                        }
                        continue;
                    }
                    Err(e) => {
                        warn!("video read error: {e}");
                        return;
                    }
                }
            }
            let bytes = streambench_media::access_unit_bytes(&access_unit);
            let sample = webrtc::media::Sample {
                data: bytes::Bytes::from(bytes),
                duration: frame_duration,
                ..Default::default()
            };
            if track.write_sample(&sample).await.is_err() {
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
    path: std::path::PathBuf,
    track: Arc<TrackLocalStaticSample>,
    mut ctx: SessionContext,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = match AdtsReader::open(&path) {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to open audio source {}: {e}", path.display());
                return;
            }
        };
        let mut clock = streambench_media::WallClock::new();
        loop {
            if ctx.is_canceled() {
                return;
            }
            let frame = match reader.next_frame() {
                Ok(f) => f,
                Err(streambench_media::ReadError::Eof) => {
                    if reader.restart().is_err() {
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("audio read error: {e}");
                    return;
                }
            };
            let duration = Duration::from_secs_f64(1024.0 / frame.sample_rate as f64);
            let sample = webrtc::media::Sample {
                data: bytes::Bytes::from(frame.bytes),
                duration,
                ..Default::default()
            };
            if track.write_sample(&sample).await.is_err() {
                return;
            }
            let residual = clock.tick(duration);
            if residual > Duration::ZERO {
                tokio::time::sleep(residual).await;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_ids_are_twelve_lowercase_letters() {
        let mut rng = rand::thread_rng();
        let tid = random_transaction_id(&mut rng);
        assert_eq!(tid.len(), 12);
        assert!(tid.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn janus_base_url_appends_path() {
        assert_eq!(
            janus_base_url("http://localhost:8088/janus").unwrap(),
            "http://localhost:8088/janus"
        );
    }

    #[test]
    fn janus_base_url_rejects_missing_scheme() {
        assert!(janus_base_url("localhost:8088").is_err());
    }
}
