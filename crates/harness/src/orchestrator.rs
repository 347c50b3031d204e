//! Fans a `RunConfig` out into one task per simulated client, mirroring the
//! teacher's single-peer `main.rs` `tokio::select!` shape but generalized
//! from "one agent, many subsystems" to "one config, many identical
//! sessions" (§5 Concurrency Model). Each task gets its own URL (stream
//! index substituted via `cli::substitute_stream_index`), its own
//! `SessionContext`, and is staggered by `-delay` milliseconds.

use crate::cli::substitute_stream_index;
use crate::sessions::{gb28181, janus, srt, webrtc, SessionContext, SessionHooks};
use streambench_protocol::{BenchError, PlayConfig, PublishConfig, RunConfig, Sfu};
use tokio::sync::watch;
use tracing::{error, info};

/// Janus demo room used by every session in a run (§4.6, Scenario E).
const JANUS_ROOM: i64 = 1234;

/// Tally of how a run ended, for the exit code decision in `main`.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub total: usize,
    pub canceled: usize,
    pub failed: usize,
}

impl RunOutcome {
    pub fn all_ok(&self) -> bool {
        self.failed == 0
    }
}

/// Spawns one publisher task per stream plus `clients_per_stream` player
/// tasks per stream, mirroring the original's two independent loops (a
/// publish loop with no inner client loop, a play loop with one) rather
/// than a single dispatch that picks publish over play per task. `-pr` and
/// `-sr` may both be set at once, in which case both loops run.
pub async fn run_all(
    cfg: &RunConfig,
    http: &reqwest::Client,
    cancel_rx: watch::Receiver<bool>,
    vnet: Option<streambench_vnet::VnetRegistry>,
    hooks: Option<SessionHooks>,
) -> RunOutcome {
    let streams = cfg.concurrency.streams;
    let clients = cfg.concurrency.clients_per_stream;
    let delay = std::time::Duration::from_millis(cfg.concurrency.start_delay_ms);

    let mut handles = Vec::new();

    if cfg.play.is_some() {
        for stream_index in 0..streams {
            let play = substitute_play(&cfg.play, stream_index);

            for client_index in 0..clients {
                let ctx = SessionContext {
                    session_id: streambench_protocol::SessionId::new(stream_index, client_index),
                    cancel: cancel_rx.clone(),
                };
                let cfg = cfg.clone();
                let play = play.clone();
                let http = http.clone();
                let vnet = vnet.clone();
                let hooks = hooks.clone();

                if !handles.is_empty() {
                    tokio::time::sleep(delay).await;
                }

                handles.push(tokio::spawn(async move {
                    let session_id = ctx.session_id;
                    let result = run_one(ctx, &cfg, None, play.as_ref(), &http, vnet.as_ref(), hooks.as_ref()).await;
                    (session_id, result)
                }));
            }
        }
    }

    if cfg.publish.is_some() {
        for stream_index in 0..streams {
            let publish = substitute_publish(&cfg.publish, stream_index);
            let ctx = SessionContext {
                session_id: streambench_protocol::SessionId::new(stream_index, 0),
                cancel: cancel_rx.clone(),
            };
            let cfg = cfg.clone();
            let http = http.clone();
            let vnet = vnet.clone();
            let hooks = hooks.clone();

            if !handles.is_empty() {
                tokio::time::sleep(delay).await;
            }

            handles.push(tokio::spawn(async move {
                let session_id = ctx.session_id;
                let result = run_one(ctx, &cfg, publish.as_ref(), None, &http, vnet.as_ref(), hooks.as_ref()).await;
                (session_id, result)
            }));
        }
    }

    let mut outcome = RunOutcome {
        total: handles.len(),
        ..Default::default()
    };

    for handle in handles {
        match handle.await {
            Ok((session_id, Ok(()))) => {
                info!(%session_id, "session completed");
            }
            Ok((session_id, Err(BenchError::Canceled))) => {
                outcome.canceled += 1;
                info!(%session_id, "session canceled");
            }
            Ok((session_id, Err(e))) => {
                outcome.failed += 1;
                error!(%session_id, error = %e, "session failed");
            }
            Err(join_err) => {
                outcome.failed += 1;
                error!(error = %join_err, "session task panicked");
            }
        }
    }

    outcome
}

async fn run_one(
    ctx: SessionContext,
    cfg: &RunConfig,
    publish: Option<&PublishConfig>,
    play: Option<&PlayConfig>,
    http: &reqwest::Client,
    vnet: Option<&streambench_vnet::VnetRegistry>,
    hooks: Option<&SessionHooks>,
) -> Result<(), BenchError> {
    match cfg.sfu {
        Sfu::SrsWebrtc => {
            if let Some(publish) = publish {
                webrtc::run_publisher(ctx, publish, http, vnet, hooks).await
            } else if let Some(play) = play {
                webrtc::run_player(ctx, play, http, vnet, hooks).await
            } else {
                unreachable!("validate() requires publish or play")
            }
        }
        Sfu::Janus => {
            if let Some(publish) = publish {
                janus::run_publisher(ctx, publish, http, JANUS_ROOM, hooks).await
            } else if let Some(play) = play {
                janus::run_player(ctx, play, http, JANUS_ROOM, hooks).await
            } else {
                unreachable!("validate() requires publish or play")
            }
        }
        Sfu::Gb28181Sip => {
            let gb = cfg
                .gb28181
                .as_ref()
                .expect("validate() requires gb28181 config for sfu=gb28181");
            let sip_addr = publish
                .map(|p| p.url.as_str())
                .or_else(|| play.map(|p| p.url.as_str()))
                .expect("validate() requires publish or play");
            gb28181::run(ctx, gb, publish, sip_addr, hooks).await
        }
        Sfu::Srt => {
            if let Some(publish) = publish {
                srt::run_publisher(ctx, publish).await
            } else if let Some(play) = play {
                srt::run_player(ctx, play).await
            } else {
                unreachable!("validate() requires publish or play")
            }
        }
    }
}

fn substitute_publish(cfg: &Option<PublishConfig>, stream_index: u32) -> Option<PublishConfig> {
    cfg.as_ref().map(|c| PublishConfig {
        url: substitute_stream_index(&c.url, stream_index),
        source_audio: c.source_audio.clone(),
        source_video: c.source_video.clone(),
        fps: c.fps,
    })
}

fn substitute_play(cfg: &Option<PlayConfig>, stream_index: u32) -> Option<PlayConfig> {
    cfg.as_ref().map(|c| PlayConfig {
        url: substitute_stream_index(&c.url, stream_index),
        dump_audio: c.dump_audio.clone(),
        dump_video: c.dump_video.clone(),
        dump_ts: c.dump_ts.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_outcome_all_ok_requires_zero_failures() {
        let outcome = RunOutcome {
            total: 3,
            canceled: 1,
            failed: 0,
        };
        assert!(outcome.all_ok());
    }

    #[test]
    fn run_outcome_reports_failure() {
        let outcome = RunOutcome {
            total: 3,
            canceled: 0,
            failed: 1,
        };
        assert!(!outcome.all_ok());
    }
}
