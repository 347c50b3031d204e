use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which signaling dialect this run drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Sfu {
    SrsWebrtc,
    Janus,
    Gb28181Sip,
    Srt,
}

impl Sfu {
    pub fn from_flag(s: &str) -> Option<Self> {
        match s {
            "srs" => Some(Sfu::SrsWebrtc),
            "janus" => Some(Sfu::Janus),
            "gb28181" => Some(Sfu::Gb28181Sip),
            "srt" => Some(Sfu::Srt),
            _ => None,
        }
    }
}

/// Top-level immutable run configuration, built once from CLI flags (and
/// optionally layered over a TOML file) before any networking starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub sfu: Sfu,
    #[serde(default)]
    pub publish: Option<PublishConfig>,
    #[serde(default)]
    pub play: Option<PlayConfig>,
    #[serde(default)]
    pub gb28181: Option<Gb28181Config>,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Routes the WebRTC/SRS session's UDP candidates through an in-process
    /// `VnetProxy` instead of straight to the real media server (§4.5).
    #[serde(default)]
    pub vnet: bool,
}

/// `-pr <url> -sa <audio> -sv <video> -fps <n>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub url: String,
    pub source_audio: Option<PathBuf>,
    pub source_video: Option<PathBuf>,
    #[serde(default)]
    pub fps: Option<u32>,
}

/// `-sr <url> -da <ogg> -dv <h264|ivf> -dt <ts>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayConfig {
    pub url: String,
    #[serde(default)]
    pub dump_audio: Option<PathBuf>,
    #[serde(default)]
    pub dump_video: Option<PathBuf>,
    #[serde(default)]
    pub dump_ts: Option<PathBuf>,
}

/// `-user -server -domain -random N`, only meaningful for `sfu=gb28181`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gb28181Config {
    pub user: String,
    pub server: String,
    pub domain: String,
    #[serde(default)]
    pub random: u32,
}

impl Gb28181Config {
    /// Appends `random` random decimal digits to `user`, matching the
    /// source's `-random N` flag semantics exactly (device-ID padding for
    /// many simulated devices sharing a user prefix).
    pub fn device_id(&self, rng: &mut impl rand::Rng) -> String {
        if self.random == 0 {
            return self.user.clone();
        }
        let mut id = self.user.clone();
        for _ in 0..self.random {
            id.push(char::from_digit(rng.gen_range(0..10), 10).unwrap());
        }
        id
    }
}

/// `-nn <clients> -sn <streams> -delay <ms>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    #[serde(default = "default_streams")]
    pub streams: u32,
    #[serde(default = "default_clients_per_stream")]
    pub clients_per_stream: u32,
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            streams: default_streams(),
            clients_per_stream: default_clients_per_stream(),
            start_delay_ms: default_start_delay_ms(),
        }
    }
}

fn default_streams() -> u32 {
    1
}
fn default_clients_per_stream() -> u32 {
    1
}
fn default_start_delay_ms() -> u64 {
    0
}

impl RunConfig {
    /// Validate the configuration, collecting every issue rather than
    /// failing on the first one found.
    ///
    /// Issues are prefixed with "ERROR:" (fatal — process must exit before
    /// networking) or "WARNING:" (advisory, run proceeds).
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut issues = Vec::new();

        if self.publish.is_none() && self.play.is_none() {
            issues.push(
                "ERROR: neither -pr (publish) nor -sr (play) was given; nothing to do."
                    .to_string(),
            );
        }

        if let Some(pub_cfg) = &self.publish {
            if pub_cfg.source_audio.is_none() && pub_cfg.source_video.is_none() {
                issues.push(
                    "ERROR: -pr given but neither -sa nor -sv source file was set.".to_string(),
                );
            }
            if let Some(video) = &pub_cfg.source_video {
                let is_annex_b = video
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("h264"))
                    .unwrap_or(false);
                if is_annex_b && pub_cfg.fps.is_none() {
                    issues.push(format!(
                        "ERROR: -sv {} is Annex-B H.264 but -fps was not given.",
                        video.display()
                    ));
                }
                if let Some(fps) = pub_cfg.fps {
                    if fps == 0 || fps > 240 {
                        issues.push(format!(
                            "ERROR: -fps must be between 1 and 240, got {fps}."
                        ));
                    }
                }
            }
            if let Some(audio) = &pub_cfg.source_audio {
                let known = audio
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("ogg") || e.eq_ignore_ascii_case("aac"))
                    .unwrap_or(false);
                if !known {
                    issues.push(format!(
                        "WARNING: -sa {} has an unrecognized extension (expected .ogg or .aac).",
                        audio.display()
                    ));
                }
            }
        }

        if matches!(self.sfu, Sfu::Gb28181Sip) && self.gb28181.is_none() {
            issues.push(
                "ERROR: sfu=gb28181 requires -user, -server and -domain.".to_string(),
            );
        }
        if let Some(gb) = &self.gb28181 {
            if gb.user.is_empty() || gb.server.is_empty() || gb.domain.is_empty() {
                issues.push(
                    "ERROR: -user, -server and -domain must all be non-empty for gb28181."
                        .to_string(),
                );
            }
        }

        if self.concurrency.streams == 0 {
            issues.push("ERROR: -sn (streams) must be at least 1.".to_string());
        }
        if self.concurrency.clients_per_stream == 0 {
            issues.push("ERROR: -nn (clients) must be at least 1.".to_string());
        }
        if self.concurrency.streams as u64 * self.concurrency.clients_per_stream as u64 > 10_000 {
            issues.push(format!(
                "WARNING: {} total sessions ({} streams x {} clients) is unusually large.",
                self.concurrency.streams as u64 * self.concurrency.clients_per_stream as u64,
                self.concurrency.streams,
                self.concurrency.clients_per_stream
            ));
        }

        if self.vnet && !matches!(self.sfu, Sfu::SrsWebrtc) {
            issues.push(
                "WARNING: -vnet is only wired into the SRS/WebRTC session path; it has no effect for this sfu."
                    .to_string(),
            );
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> RunConfig {
        RunConfig {
            sfu: Sfu::SrsWebrtc,
            publish: Some(PublishConfig {
                url: "webrtc://localhost/live/livestream".into(),
                source_audio: Some("avatar.ogg".into()),
                source_video: Some("avatar.h264".into()),
                fps: Some(25),
            }),
            play: None,
            gb28181: None,
            concurrency: ConcurrencyConfig::default(),
            vnet: false,
        }
    }

    #[test]
    fn valid_publish_config_passes() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn neither_publish_nor_play_is_an_error() {
        let mut cfg = base();
        cfg.publish = None;
        let issues = cfg.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("neither -pr")));
    }

    #[test]
    fn h264_without_fps_is_an_error() {
        let mut cfg = base();
        cfg.publish.as_mut().unwrap().fps = None;
        let issues = cfg.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("-fps was not given")));
    }

    #[test]
    fn gb28181_without_sip_config_is_an_error() {
        let mut cfg = base();
        cfg.sfu = Sfu::Gb28181Sip;
        let issues = cfg.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("requires -user")));
    }

    #[test]
    fn gb28181_with_device_id_appends_random_digits() {
        let gb = Gb28181Config {
            user: "3402000000".into(),
            server: "34020000002000000001".into(),
            domain: "3402000000".into(),
            random: 10,
        };
        let mut rng = rand::thread_rng();
        let id = gb.device_id(&mut rng);
        assert_eq!(id.len(), gb.user.len() + 10);
        assert!(id.starts_with(&gb.user));
    }

    #[test]
    fn vnet_on_non_srs_sfu_is_a_warning() {
        let mut cfg = base();
        cfg.sfu = Sfu::Srt;
        cfg.vnet = true;
        let issues = cfg.validate().unwrap_err();
        assert!(issues.iter().any(|i| i.contains("WARNING") && i.contains("-vnet")));
    }

    #[test]
    fn sfu_from_flag_parses_known_values() {
        assert_eq!(Sfu::from_flag("srs"), Some(Sfu::SrsWebrtc));
        assert_eq!(Sfu::from_flag("gb28181"), Some(Sfu::Gb28181Sip));
        assert_eq!(Sfu::from_flag("bogus"), None);
    }
}
