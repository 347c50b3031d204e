//! Hand-rolled flag parser (§6 External Interfaces), in the style of the
//! teacher's `agent/src/cli.rs`: a manual `while` loop over `std::env::args`
//! rather than a derive-macro parser, since flag parsing itself is out of
//! scope for correctness but the repo still needs a CLI surface.

use anyhow::Context;
use std::path::PathBuf;
use streambench_protocol::{
    ConcurrencyConfig, Gb28181Config, PlayConfig, PublishConfig, RunConfig, Sfu,
};

pub struct Args {
    pub run: RunConfig,
}

pub fn parse_args() -> anyhow::Result<Args> {
    let args: Vec<String> = std::env::args().collect();

    let mut sfu: Option<Sfu> = None;
    let mut streams: u32 = 1;
    let mut clients_per_stream: u32 = 1;
    let mut start_delay_ms: u64 = 0;

    let mut publish_url: Option<String> = None;
    let mut source_audio: Option<PathBuf> = None;
    let mut source_video: Option<PathBuf> = None;
    let mut fps: Option<u32> = None;

    let mut play_url: Option<String> = None;
    let mut dump_audio: Option<PathBuf> = None;
    let mut dump_video: Option<PathBuf> = None;
    let mut dump_ts: Option<PathBuf> = None;

    let mut gb_user: Option<String> = None;
    let mut gb_server: Option<String> = None;
    let mut gb_domain: Option<String> = None;
    let mut gb_random: u32 = 0;

    let mut vnet = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--sfu" => {
                i += 1;
                let v = args.get(i).context("missing --sfu value")?;
                sfu = Some(Sfu::from_flag(v).with_context(|| format!("unknown --sfu value: {v}"))?);
            }
            "-nn" => {
                i += 1;
                clients_per_stream = args.get(i).context("missing -nn value")?.parse()?;
            }
            "-sn" => {
                i += 1;
                streams = args.get(i).context("missing -sn value")?.parse()?;
            }
            "-delay" => {
                i += 1;
                start_delay_ms = args.get(i).context("missing -delay value")?.parse()?;
            }
            "-pr" => {
                i += 1;
                publish_url = Some(args.get(i).context("missing -pr value")?.clone());
            }
            "-sa" => {
                i += 1;
                source_audio = Some(PathBuf::from(args.get(i).context("missing -sa value")?));
            }
            "-sv" => {
                i += 1;
                source_video = Some(PathBuf::from(args.get(i).context("missing -sv value")?));
            }
            "-fps" => {
                i += 1;
                fps = Some(args.get(i).context("missing -fps value")?.parse()?);
            }
            "-sr" => {
                i += 1;
                play_url = Some(args.get(i).context("missing -sr value")?.clone());
            }
            "-da" => {
                i += 1;
                dump_audio = Some(PathBuf::from(args.get(i).context("missing -da value")?));
            }
            "-dv" => {
                i += 1;
                dump_video = Some(PathBuf::from(args.get(i).context("missing -dv value")?));
            }
            "-dt" => {
                i += 1;
                dump_ts = Some(PathBuf::from(args.get(i).context("missing -dt value")?));
            }
            "-user" => {
                i += 1;
                gb_user = Some(args.get(i).context("missing -user value")?.clone());
            }
            "-server" => {
                i += 1;
                gb_server = Some(args.get(i).context("missing -server value")?.clone());
            }
            "-domain" => {
                i += 1;
                gb_domain = Some(args.get(i).context("missing -domain value")?.clone());
            }
            "-random" => {
                i += 1;
                gb_random = args.get(i).context("missing -random value")?.parse()?;
            }
            "-vnet" => {
                vnet = true;
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }

    let sfu = sfu.context("--sfu is required")?;

    let publish = publish_url.map(|url| PublishConfig {
        url,
        source_audio,
        source_video,
        fps,
    });
    let play = play_url.map(|url| PlayConfig {
        url,
        dump_audio,
        dump_video,
        dump_ts,
    });
    let gb28181 = if gb_user.is_some() || gb_server.is_some() || gb_domain.is_some() {
        Some(Gb28181Config {
            user: gb_user.unwrap_or_default(),
            server: gb_server.unwrap_or_default(),
            domain: gb_domain.unwrap_or_default(),
            random: gb_random,
        })
    } else {
        None
    };

    let run = RunConfig {
        sfu,
        publish,
        play,
        gb28181,
        concurrency: ConcurrencyConfig {
            streams,
            clients_per_stream,
            start_delay_ms,
        },
        vnet,
    };

    Ok(Args { run })
}

fn print_help() {
    println!("streambench - multi-protocol media benchmark and conformance harness");
    println!();
    println!("USAGE:");
    println!("    streambench --sfu <srs|janus|gb28181|srt> [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -nn <clients>        clients per stream [default: 1]");
    println!("    -sn <streams>        number of streams [default: 1]");
    println!("    -delay <ms>          inter-start delay per task [default: 0]");
    println!("    -pr <url>            publish to this URL template");
    println!("    -sa <path>           source audio file (.ogg or .aac)");
    println!("    -sv <path>           source video file (.h264 or .ivf)");
    println!("    -fps <n>             source video frame rate (required for .h264)");
    println!("    -sr <url>            subscribe/play from this URL template");
    println!("    -da <path>           dump received audio to .ogg");
    println!("    -dv <path>           dump received video to .h264 or .ivf");
    println!("    -dt <path>           dump received MPEG-TS to .ts (SRT player)");
    println!("    -user <id>           GB28181 device user id");
    println!("    -server <id>         GB28181 SIP server id");
    println!("    -domain <domain>     GB28181 SIP domain");
    println!("    -random <n>          append n random digits to -user");
    println!("    -vnet                route publisher/player UDP through a virtual-network proxy (srs sfu only)");
}

/// Substitutes `[s]` or `%d` in a URL template with the stream index.
pub fn substitute_stream_index(template: &str, index: u32) -> String {
    if template.contains("[s]") {
        template.replace("[s]", &index.to_string())
    } else if template.contains("%d") {
        template.replacen("%d", &index.to_string(), 1)
    } else {
        template.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_bracket_template() {
        assert_eq!(substitute_stream_index("live/[s]/stream", 3), "live/3/stream");
    }

    #[test]
    fn substitutes_printf_template() {
        assert_eq!(substitute_stream_index("live/%d/stream", 3), "live/3/stream");
    }

    #[test]
    fn leaves_template_without_placeholder_untouched() {
        assert_eq!(substitute_stream_index("live/stream", 3), "live/stream");
    }
}
